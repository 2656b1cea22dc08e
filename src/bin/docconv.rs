//! CLI binary for edgequake-docconv.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConverterConfig`, converts each input and writes the results.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_docconv::{
    convert_many, ConversionObserver, ConversionRequest, ConversionResult, ConversionStage,
    ConvertError, Converter, ConverterConfig, ProfileTable, RemoteBackend, RouteKey,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Spinner showing the latest stage of whichever request moved last, and a
/// done/total counter advanced as work directories are released.
struct CliObserver {
    bar: ProgressBar,
    done: AtomicUsize,
}

impl CliObserver {
    fn new(total: usize) -> Arc<Self> {
        let bar = ProgressBar::new(total as u64);
        let template = "{spinner:.cyan} {prefix:.bold}  {pos}/{len}  {msg}  ⏱ {elapsed}";
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.set_message("locating LibreOffice…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            done: AtomicUsize::new(0),
        })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ConversionObserver for CliObserver {
    fn on_stage(&self, route: RouteKey, stage: ConversionStage) {
        self.bar.set_message(format!("{route}: {stage}"));
    }

    fn on_workdir_released(&self, _path: &Path) {
        let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        self.bar.set_position(n as u64);
    }

    fn on_strategy_failed(&self, route: RouteKey, strategy: &str, error: &ConvertError) {
        let first = error.to_string();
        let first = first.lines().next().unwrap_or_default();
        self.bar.println(format!(
            "  {} {route}: {strategy} failed  {}",
            cyan("↷"),
            dim(first)
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Route inferred from the extension; writes report.pdf next to the input
  docconv report.docx

  # Several files, four at a time, into one directory
  docconv *.xlsx *.pptx --out-dir pdf/ --concurrency 4

  # Explicit route and output file
  docconv --route html-to-pdf page.html -o page.pdf

  # JSON response envelope (base64 payload) on stdout
  docconv --json memo.docx > memo.json

  # PDF → Word through the remote backend
  docconv --route pdf-to-word --follow-remote --remote-url https://convert.example.com scan.pdf

  # Which LibreOffice would be used?
  docconv --check-engine

ROUTES:
  word-to-pdf   ppt-to-pdf   excel-to-pdf   html-to-pdf   htm-to-pdf   (local)
  pdf-to-word   pdf-to-ppt   pdf-to-excel                              (remote backend)

ENVIRONMENT VARIABLES:
  DOCCONV_SOFFICE_BIN     LibreOffice binary to try first (alias: LIBREOFFICE_BIN)
  DOCCONV_TEMP_ROOT       Parent of per-request work directories (alias: TEMP_ROOT)
  DOCCONV_REMOTE_URL      Base URL of the remote conversion backend
  DOCCONV_FALLBACK_PYTHON Python with the `uno` module for the spreadsheet page-setup script
  RUST_LOG                Log filter; overrides --verbose / --quiet
"#;

/// Convert office documents to PDF with a sandboxed headless LibreOffice.
#[derive(Parser, Debug)]
#[command(
    name = "docconv",
    version,
    about = "Convert office documents to PDF with a sandboxed headless LibreOffice",
    long_about = "Convert Word, Excel, PowerPoint and HTML documents to PDF by driving a headless \
LibreOffice in a private scratch directory per file. Spreadsheets go through a UNO page-setup \
script first so charts stay on one page. PDF → Office routes are served by a remote backend.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input documents.
    inputs: Vec<PathBuf>,

    /// Route key (e.g. word-to-pdf). Inferred from each input's extension if omitted.
    #[arg(short, long, env = "DOCCONV_ROUTE")]
    route: Option<String>,

    /// Output file (single input only).
    #[arg(short, long, conflicts_with = "out_dir")]
    output: Option<PathBuf>,

    /// Directory for outputs. Default: next to each input.
    #[arg(long, env = "DOCCONV_OUT_DIR")]
    out_dir: Option<PathBuf>,

    /// Print the JSON response envelope (or failure record) per input instead of writing files.
    #[arg(long)]
    json: bool,

    /// LibreOffice binary to try before the default candidates.
    #[arg(long, env = "DOCCONV_SOFFICE_BIN")]
    soffice: Option<PathBuf>,

    /// Parent directory for per-request work directories.
    #[arg(long, env = "DOCCONV_TEMP_ROOT")]
    temp_root: Option<PathBuf>,

    /// Override every route's engine timeout, in seconds.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    timeout_secs: Option<u64>,

    /// Skip the UNO page-setup script for spreadsheets.
    #[arg(long)]
    no_fallback: bool,

    /// Page-setup script to use instead of the bundled one.
    #[arg(long, env = "DOCCONV_FALLBACK_SCRIPT")]
    fallback_script: Option<PathBuf>,

    /// Python interpreter for the page-setup script.
    #[arg(long, env = "DOCCONV_FALLBACK_PYTHON")]
    python: Option<PathBuf>,

    /// Remote conversion backend base URL.
    #[arg(long, env = "DOCCONV_REMOTE_URL")]
    remote_url: Option<String>,

    /// Send PDF → Office routes to the remote backend instead of failing.
    #[arg(long)]
    follow_remote: bool,

    /// Number of conversions in flight.
    #[arg(short, long, env = "DOCCONV_CONCURRENCY", default_value_t = 2)]
    concurrency: usize,

    /// List routes and their profiles, then exit.
    #[arg(long)]
    list_routes: bool,

    /// Resolve LibreOffice, print its version, then exit.
    #[arg(long)]
    check_engine: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "DOCCONV_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCCONV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCCONV_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner covers lifecycle feedback, so INFO logs are hidden while
    // it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inputs.is_empty();
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Route table ──────────────────────────────────────────────────────
    if cli.list_routes {
        print_routes(&ProfileTable::default());
        return Ok(());
    }

    // ── Build converter ──────────────────────────────────────────────────
    let observer = show_progress.then(|| CliObserver::new(cli.inputs.len()));
    let config = build_config(&cli, observer.clone())?;
    let remote_url = config.remote_backend_url.clone();
    let converter = Converter::new(config);

    if cli.check_engine {
        let (path, version) = converter
            .check_engine()
            .await
            .context("No working LibreOffice found")?;
        println!("{}  {}", bold(&path.display().to_string()), version);
        return Ok(());
    }

    if cli.inputs.is_empty() {
        bail!("no input files given");
    }
    if cli.output.is_some() && cli.inputs.len() > 1 {
        bail!("--output takes a single input; use --out-dir for several");
    }

    // ── Load requests ────────────────────────────────────────────────────
    let mut requests = Vec::with_capacity(cli.inputs.len());
    for input in &cli.inputs {
        let route = match &cli.route {
            Some(r) => r.clone(),
            None => {
                let name = input.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
                RouteKey::infer_from_filename(&name)
                    .with_context(|| {
                        format!("Cannot infer a route for {}; pass --route", input.display())
                    })?
                    .to_string()
            }
        };
        let request = ConversionRequest::from_path(input, route)
            .await
            .with_context(|| format!("Failed to read {}", input.display()))?;
        requests.push(request);
    }

    // ── Convert ──────────────────────────────────────────────────────────
    let results = convert_many(&converter, requests.clone(), cli.concurrency).await;
    if let Some(obs) = &observer {
        obs.finish();
    }

    let remote = if cli.follow_remote {
        let url = remote_url.context("--follow-remote needs --remote-url or DOCCONV_REMOTE_URL")?;
        let timeout = Duration::from_secs(cli.timeout_secs.unwrap_or(120));
        Some(RemoteBackend::new(url, timeout)?)
    } else {
        None
    };

    // ── Write results ────────────────────────────────────────────────────
    let mut failed = 0usize;
    for ((input, request), result) in cli.inputs.iter().zip(&requests).zip(results) {
        let result = match (result, &remote) {
            (Err(ConvertError::RemoteRoute { .. }), Some(backend)) => {
                backend.convert(request).await
            }
            (other, _) => other,
        };
        match result {
            Ok(result) => {
                if cli.json {
                    let json = serde_json::to_string_pretty(&result.to_response())
                        .context("Failed to serialise response")?;
                    println!("{json}");
                } else {
                    let dest = output_path(&cli, input, &result);
                    write_output(&dest, &result).await?;
                    if !cli.quiet {
                        report_success(input, &dest, &result);
                    }
                }
            }
            Err(e) => {
                failed += 1;
                if cli.json {
                    let failure = e.to_failure(request.route_key.clone());
                    let json = serde_json::to_string_pretty(&failure)
                        .context("Failed to serialise failure")?;
                    println!("{json}");
                } else {
                    eprintln!(
                        "{} {}  {}",
                        red("✘"),
                        bold(&input.display().to_string()),
                        red(&e.to_string())
                    );
                }
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} conversions failed", cli.inputs.len());
    }
    Ok(())
}

/// Map CLI args to `ConverterConfig`.
fn build_config(cli: &Cli, observer: Option<Arc<CliObserver>>) -> Result<ConverterConfig> {
    let mut builder = ConverterConfig::from_env();
    if let Some(ref bin) = cli.soffice {
        builder = builder.engine_binary(bin);
    }
    if let Some(ref root) = cli.temp_root {
        builder = builder.temp_root(root);
    }
    if let Some(secs) = cli.timeout_secs {
        builder = builder.all_route_timeouts(Duration::from_secs(secs));
    }
    if cli.no_fallback {
        builder = builder.fallback_enabled(false);
    }
    if let Some(ref script) = cli.fallback_script {
        builder = builder.fallback_script(script);
    }
    if let Some(ref python) = cli.python {
        builder = builder.fallback_interpreter(python);
    }
    if let Some(ref url) = cli.remote_url {
        builder = builder.remote_backend_url(url.clone());
    }
    if let Some(obs) = observer {
        builder = builder.observer(obs as Arc<dyn ConversionObserver>);
    }
    builder.build().context("Invalid configuration")
}

fn output_path(cli: &Cli, input: &Path, result: &ConversionResult) -> PathBuf {
    if let Some(ref out) = cli.output {
        return out.clone();
    }
    let dir = cli
        .out_dir
        .clone()
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(&result.output_filename)
}

/// Atomic write: temp file next to the destination, then rename.
async fn write_output(dest: &Path, result: &ConversionResult) -> Result<()> {
    let bytes = result.decode_payload()?;
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp = dest.with_extension("docconv.tmp");
    tokio::fs::write(&tmp, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, dest)
        .await
        .with_context(|| format!("Failed to move output into {}", dest.display()))?;
    Ok(())
}

fn report_success(input: &Path, dest: &Path, result: &ConversionResult) {
    eprintln!(
        "{} {}  →  {}  {}",
        green("✔"),
        input.display(),
        bold(&dest.display().to_string()),
        dim(&format!(
            "{} bytes, {}ms, {}",
            result.output_size_bytes, result.duration_ms, result.produced_by
        )),
    );
    for w in &result.warnings {
        eprintln!("   {} {}", cyan("⚠"), dim(w));
    }
}

fn print_routes(table: &ProfileTable) {
    println!("{:<14} {:<7} {:<7} {:>8}  {}", "ROUTE", "SITE", "TARGET", "TIMEOUT", "FILTER");
    for p in table.iter() {
        let site = if p.is_local() { "local" } else { "remote" };
        let filter = p.export_filter.map(|f| f.split(':').next().unwrap_or(f)).unwrap_or("-");
        let fallback = if p.fallback_eligible { " (+ UNO page setup)" } else { "" };
        println!(
            "{:<14} {:<7} {:<7} {:>7}s  {filter}{fallback}",
            p.route.as_str(),
            site,
            p.target_format,
            p.timeout.as_secs()
        );
    }
}
