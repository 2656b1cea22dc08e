//! Conversion strategies and the ordered chain that tries them.
//!
//! A strategy turns the input file (under `in/` of the work directory) into
//! an artifact in the work directory's `out/`. Two exist:
//!
//! | Strategy | Engine | Used for |
//! |----------|--------|----------|
//! | [`ScriptedPageSetup`] | UNO automation script | fallback-eligible routes, tried first |
//! | [`PrimaryEngine`] | `soffice --convert-to` | every local route, always last |
//!
//! ## Why try the script first?
//!
//! `--convert-to` does not reliably honour page-layout filter options, so
//! charts in spreadsheets can still be split across pages. The script sets
//! the page style of every sheet directly, but it needs a Python with the
//! `uno` module, which many installs lack. The chain treats a script failure
//! as expected: it is logged at info, its partial output is deleted, and the
//! CLI engine runs.

use crate::config::ConverterConfig;
use crate::error::ConvertError;
use crate::pipeline::invoke::{engine_environment, invoke, EngineInvocation};
use crate::pipeline::resolve::{expected_output_name, locate_output, purge_outputs};
use crate::profile::{ConversionProfile, RouteKey};
use crate::progress::{ConversionStage, Observer};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// File name the bundled page-setup script is written to inside a work
/// directory.
pub const BUNDLED_SCRIPT_NAME: &str = ".docconv-page-setup.py";
const BUNDLED_SCRIPT: &str = include_str!("../../scripts/calc_page_setup.py");

/// Profile directory for the CLI engine, relative to the work directory.
const PRIMARY_PROFILE_DIR: &str = ".profile";
/// Profile directory for the scripted engine's private listener.
const SCRIPT_PROFILE_DIR: &str = ".profile-uno";

/// An artifact produced by a strategy. Not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub produced_by: &'static str,
}

/// Everything a strategy needs for one attempt.
#[derive(Debug)]
pub struct AttemptContext<'a> {
    pub route: RouteKey,
    pub profile: &'a ConversionProfile,
    pub config: &'a ConverterConfig,
    pub workdir: &'a Path,
    /// Where artifacts go; holds nothing else.
    pub output_dir: &'a Path,
    pub input_path: &'a Path,
    /// Sanitised input file name inside `workdir`.
    pub input_name: &'a str,
    /// Engine binary chosen by the resolver.
    pub engine: &'a Path,
}

#[async_trait]
pub trait ConversionStrategy: Send + Sync {
    /// Short identifier used in logs, observer events and results.
    fn name(&self) -> &'static str;

    /// Stage reported to the observer when this strategy starts.
    fn stage(&self) -> ConversionStage;

    async fn attempt(&self, ctx: &AttemptContext<'_>) -> Result<Artifact, ConvertError>;
}

// ── Primary engine ─────────────────────────────────────────────────────────

/// `soffice --headless --convert-to <fmt[:filter]> --outdir <dir> <input>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrimaryEngine;

impl PrimaryEngine {
    pub const NAME: &'static str = "soffice";

    /// Full argument list for one conversion.
    pub fn args(
        profile: &ConversionProfile,
        workdir: &Path,
        output_dir: &Path,
        input: &Path,
    ) -> Result<Vec<OsString>, ConvertError> {
        let mut args: Vec<OsString> = [
            "--headless",
            "--invisible",
            "--nodefault",
            "--norestore",
            "--nofirststartwizard",
            "--nolockcheck",
            "--nologo",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        let profile_dir = profile_url(&workdir.join(PRIMARY_PROFILE_DIR))?;
        args.push(format!("-env:UserInstallation={profile_dir}").into());
        args.push("--convert-to".into());
        args.push(profile.convert_to_arg().into());
        args.push("--outdir".into());
        args.push(output_dir.as_os_str().to_owned());
        args.push(input.as_os_str().to_owned());
        Ok(args)
    }
}

#[async_trait]
impl ConversionStrategy for PrimaryEngine {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn stage(&self) -> ConversionStage {
        ConversionStage::PrimaryInvoked
    }

    async fn attempt(&self, ctx: &AttemptContext<'_>) -> Result<Artifact, ConvertError> {
        let invocation = EngineInvocation {
            label: "LibreOffice".to_string(),
            program: ctx.engine.to_path_buf(),
            args: Self::args(ctx.profile, ctx.workdir, ctx.output_dir, ctx.input_path)?,
            working_dir: ctx.workdir.to_path_buf(),
            env: engine_environment(ctx.workdir),
            timeout: ctx.profile.timeout,
            capture_limit: ctx.config.capture_limit_bytes,
        };
        invoke(&invocation).await?;
        let path = locate_output(
            ctx.output_dir,
            ctx.input_name,
            ctx.profile.target_format,
            &ctx.config.settle,
        )
        .await?;
        Ok(Artifact {
            path,
            produced_by: Self::NAME,
        })
    }
}

// ── Scripted page-setup engine ────────────────────────────────────────────

/// `python3 <script> <input> <output> <settle-secs>` driving the engine's
/// UNO interface to fix the page layout before exporting.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptedPageSetup;

impl ScriptedPageSetup {
    pub const NAME: &'static str = "uno-page-setup";

    async fn script_path(ctx: &AttemptContext<'_>) -> Result<PathBuf, ConvertError> {
        if let Some(script) = &ctx.config.fallback.script {
            return Ok(script.clone());
        }
        let path = ctx.workdir.join(BUNDLED_SCRIPT_NAME);
        tokio::fs::write(&path, BUNDLED_SCRIPT)
            .await
            .map_err(|e| ConvertError::WorkDirectoryUnavailable {
                path: path.clone(),
                source: e,
            })?;
        Ok(path)
    }
}

#[async_trait]
impl ConversionStrategy for ScriptedPageSetup {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn stage(&self) -> ConversionStage {
        ConversionStage::FallbackAttempted
    }

    async fn attempt(&self, ctx: &AttemptContext<'_>) -> Result<Artifact, ConvertError> {
        let script = Self::script_path(ctx).await?;
        let output = ctx
            .output_dir
            .join(expected_output_name(ctx.input_name, ctx.profile.target_format));

        let mut env = engine_environment(ctx.workdir);
        env.insert("DOCCONV_SOFFICE_BIN".to_string(), ctx.engine.as_os_str().to_owned());
        env.insert(
            "DOCCONV_PROFILE_URL".to_string(),
            profile_url(&ctx.workdir.join(SCRIPT_PROFILE_DIR))?.into(),
        );

        let invocation = EngineInvocation {
            label: "UNO page setup".to_string(),
            program: ctx.config.fallback.interpreter.clone(),
            args: vec![
                script.into_os_string(),
                ctx.input_path.as_os_str().to_owned(),
                output.as_os_str().to_owned(),
                format!("{:.1}", ctx.config.fallback.settle_delay.as_secs_f64()).into(),
            ],
            working_dir: ctx.workdir.to_path_buf(),
            env,
            timeout: ctx.profile.timeout,
            capture_limit: ctx.config.capture_limit_bytes,
        };
        invoke(&invocation).await?;

        let path = locate_output(
            ctx.output_dir,
            ctx.input_name,
            ctx.profile.target_format,
            &ctx.config.settle,
        )
        .await?;
        if ctx.profile.targets_pdf() {
            check_pdf_signature(&path).await?;
        }
        Ok(Artifact {
            path,
            produced_by: Self::NAME,
        })
    }
}

/// Reject a script artifact that is empty or not a PDF, so the chain moves
/// on to the CLI engine instead of failing validation later.
async fn check_pdf_signature(path: &Path) -> Result<(), ConvertError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ConvertError::Internal(format!("cannot open {}: {e}", path.display())))?;
    let mut magic = Vec::with_capacity(4);
    (&mut file)
        .take(4)
        .read_to_end(&mut magic)
        .await
        .map_err(|e| ConvertError::Internal(format!("cannot read {}: {e}", path.display())))?;
    if magic.is_empty() {
        return Err(ConvertError::OutputEmpty {
            path: path.to_path_buf(),
        });
    }
    if magic != b"%PDF" {
        return Err(ConvertError::OutputCorrupt {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

fn profile_url(dir: &Path) -> Result<String, ConvertError> {
    reqwest::Url::from_directory_path(dir)
        .map(|u| u.to_string())
        .map_err(|_| ConvertError::Internal(format!("'{}' is not an absolute path", dir.display())))
}

// ── Chain ──────────────────────────────────────────────────────────────────

/// Strategies for `profile`, in priority order. Never empty.
pub fn strategies_for(
    profile: &ConversionProfile,
    config: &ConverterConfig,
) -> Vec<Box<dyn ConversionStrategy>> {
    let mut chain: Vec<Box<dyn ConversionStrategy>> = Vec::with_capacity(2);
    if profile.fallback_eligible && config.fallback.enabled {
        chain.push(Box::new(ScriptedPageSetup));
    }
    chain.push(Box::new(PrimaryEngine));
    chain
}

/// Try each strategy in order until one produces an artifact.
///
/// Failures of all but the last strategy are recovered: reported to the
/// observer, logged at info, and anything they left in the output directory
/// is removed. The last strategy's error is returned.
pub async fn run_chain(
    strategies: &[Box<dyn ConversionStrategy>],
    ctx: &AttemptContext<'_>,
    observer: &Observer,
) -> Result<Artifact, ConvertError> {
    let last = strategies.len().saturating_sub(1);
    for (i, strategy) in strategies.iter().enumerate() {
        observer.on_stage(ctx.route, strategy.stage());
        observer.on_strategy_attempt(ctx.route, strategy.name());
        debug!("[{}] trying {}", ctx.route, strategy.name());

        match strategy.attempt(ctx).await {
            Ok(artifact) => return Ok(artifact),
            Err(e) => {
                observer.on_strategy_failed(ctx.route, strategy.name(), &e);
                if i == last {
                    return Err(e);
                }
                info!(
                    "[{}] {} did not produce a usable artifact, falling back: {}",
                    ctx.route,
                    strategy.name(),
                    e.to_string().lines().next().unwrap_or_default()
                );
                purge_outputs(ctx.output_dir).await;
            }
        }
    }
    Err(ConvertError::Internal("no conversion strategy configured".into()))
}
