//! Integration tests for the conversion orchestrator.
//!
//! A real LibreOffice is not needed: each test writes a small `/bin/sh`
//! script that answers `--version`, parses `--convert-to` / `--outdir` /
//! input like `soffice` does, and then misbehaves in a chosen way (writes a
//! good PDF, garbage, nothing, hangs…). A second stub stands in for the
//! Python interpreter that runs the spreadsheet page-setup script.
//!
//! Run with:
//!   cargo test --test orchestrator -- --nocapture
#![cfg(unix)]

use edgequake_docconv::{
    ConversionObserver, ConversionRequest, ConversionStage, ConvertError, Converter,
    ConverterConfig, OutputSettle, RouteKey,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Engine stub. Appends `primary <stem> <HOME>` to `engine.log` in `dir`
/// on every conversion, then acts according to `mode`.
fn engine_stub(dir: &Path, mode: &str) -> PathBuf {
    let path = dir.join("soffice");
    let log = dir.join("engine.log");
    let body = format!(
        r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "LibreOffice 24.2.0.3 (stub)"
  exit 0
fi
fmt=""; outdir=""; input=""
while [ $# -gt 0 ]; do
  case "$1" in
    --convert-to) fmt="$2"; shift 2 ;;
    --outdir) outdir="$2"; shift 2 ;;
    -*) shift ;;
    *) input="$1"; shift ;;
  esac
done
ext="${{fmt%%:*}}"
base=$(basename "$input")
stem="${{base%.*}}"
out="$outdir/$stem.$ext"
echo "primary $stem $HOME" >> "{log}"
echo "javaldx: Could not find a Java Runtime Environment!" >&2
case "{mode}" in
  ok)
    printf '%%PDF-1.7\n%% source: %s\n' "$stem" > "$out"
    head -c 2048 /dev/zero | tr '\0' 'x' >> "$out"
    printf '\n%%%%EOF\n' >> "$out"
    ;;
  renamed)
    printf '%%PDF-1.7\n%% renamed\n%%%%EOF\n' > "$outdir/converted-output.$ext"
    ;;
  corrupt)
    printf '<html>not a pdf</html>' > "$out"
    ;;
  empty)
    : > "$out"
    ;;
  none)
    ;;
  fail)
    echo "Error: source file could not be loaded" >&2
    exit 81
    ;;
  hang)
    sleep 60 &
    echo $! > "{dir}/grandchild.pid"
    echo $$ > "{dir}/engine.pid"
    exec sleep 60
    ;;
esac
exit 0
"#,
        log = log.display(),
        dir = dir.display(),
        mode = mode
    );
    write_script(&path, &body);
    path
}

/// Interpreter stub for the page-setup script. Appends
/// `fallback <input name> <script-present|script-missing|script-clobbered>`
/// to `engine.log`.
fn python_stub(dir: &Path, mode: &str) -> PathBuf {
    let path = dir.join("python3");
    let log = dir.join("engine.log");
    let body = format!(
        r#"#!/bin/sh
# $1 script, $2 input, $3 output, $4 settle seconds
if [ ! -f "$1" ]; then s=script-missing
elif cmp -s "$1" "$2"; then s=script-clobbered
else s=script-present; fi
echo "fallback $(basename "$2") $s" >> "{log}"
case "{mode}" in
  ok)
    printf '%%PDF-1.4\n%% page-setup\n%%%%EOF\n' > "$3"
    ;;
  garbage)
    echo "not a pdf" > "$3"
    ;;
  fail)
    echo "ModuleNotFoundError: No module named 'uno'" >&2
    exit 1
    ;;
  hang)
    sleep 60 &
    echo $! > "{dir}/script-grandchild.pid"
    echo $$ > "{dir}/script.pid"
    exec sleep 60
    ;;
esac
exit 0
"#,
        log = log.display(),
        dir = dir.display(),
        mode = mode
    );
    write_script(&path, &body);
    path
}

fn engine_log(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("engine.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[derive(Default)]
struct Recorder {
    acquired: Mutex<Vec<PathBuf>>,
    released: Mutex<Vec<PathBuf>>,
    stages: Mutex<Vec<ConversionStage>>,
    failed_strategies: Mutex<Vec<String>>,
}

impl ConversionObserver for Recorder {
    fn on_stage(&self, _route: RouteKey, stage: ConversionStage) {
        self.stages.lock().unwrap().push(stage);
    }
    fn on_workdir_acquired(&self, path: &Path) {
        self.acquired.lock().unwrap().push(path.to_path_buf());
    }
    fn on_workdir_released(&self, path: &Path) {
        self.released.lock().unwrap().push(path.to_path_buf());
    }
    fn on_strategy_failed(&self, _route: RouteKey, strategy: &str, _error: &ConvertError) {
        self.failed_strategies.lock().unwrap().push(strategy.to_string());
    }
}

impl Recorder {
    /// Every acquired directory was released exactly once and is gone.
    fn assert_released_once(&self) {
        let acquired = self.acquired.lock().unwrap().clone();
        let mut released = self.released.lock().unwrap().clone();
        released.sort();
        let mut expected = acquired.clone();
        expected.sort();
        assert_eq!(released, expected, "each work directory must be released exactly once");
        for dir in &acquired {
            assert!(!dir.exists(), "{} still exists after release", dir.display());
        }
    }
}

struct Harness {
    _tmp: tempfile::TempDir,
    stubs: PathBuf,
    temp_root: PathBuf,
    recorder: Arc<Recorder>,
}

impl Harness {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let stubs = tmp.path().join("stubs");
        let temp_root = tmp.path().join("work");
        std::fs::create_dir_all(&stubs).unwrap();
        Self {
            _tmp: tmp,
            stubs,
            temp_root,
            recorder: Arc::new(Recorder::default()),
        }
    }

    fn builder(&self, engine_mode: &str) -> edgequake_docconv::ConverterConfigBuilder {
        let engine = engine_stub(&self.stubs, engine_mode);
        ConverterConfig::builder()
            .temp_root(&self.temp_root)
            .engine_candidates(vec![engine])
            .settle(OutputSettle {
                initial_interval: Duration::from_millis(10),
                max_interval: Duration::from_millis(40),
                budget: Duration::from_millis(300),
            })
            .observer(self.recorder.clone())
    }

    fn converter(&self, engine_mode: &str) -> Converter {
        Converter::new(self.builder(engine_mode).fallback_enabled(false).build().unwrap())
    }

    fn work_root_is_empty(&self) -> bool {
        std::fs::read_dir(&self.temp_root)
            .map(|mut rd| rd.next().is_none())
            .unwrap_or(true)
    }
}

fn request(name: &str, route: &str) -> ConversionRequest {
    ConversionRequest::new(b"PK\x03\x04 fixture".to_vec(), name, route)
}

/// True if `pid` is a live (non-zombie) process.
fn process_alive(pid: i32) -> bool {
    let stat = format!("/proc/{pid}/stat");
    if Path::new("/proc/self/stat").exists() {
        return match std::fs::read_to_string(stat) {
            Ok(s) => !s
                .rsplit(')')
                .next()
                .map(|rest| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        };
    }
    unsafe { libc::kill(pid, 0) == 0 }
}

fn read_pid(path: &Path) -> i32 {
    std::fs::read_to_string(path).unwrap().trim().parse().unwrap()
}

// ── Successful conversions ───────────────────────────────────────────────────

#[tokio::test]
async fn word_document_converts_to_pdf() {
    let h = Harness::new();
    let c = h.converter("ok");

    let result = c.convert(&request("memo.docx", "word-to-pdf")).await.unwrap();

    assert_eq!(result.output_filename, "memo.pdf");
    assert_eq!(result.output_mime_type, "application/pdf");
    assert_eq!(result.produced_by, "soffice");
    assert_eq!(result.route, "word-to-pdf");
    assert!(result.original_mime_type.contains("wordprocessingml"));
    assert_eq!(result.original_size_bytes, 12);
    let pdf = result.decode_payload().unwrap();
    assert_eq!(&pdf[..4], b"%PDF");
    assert_eq!(pdf.len() as u64, result.output_size_bytes);
    assert!(String::from_utf8_lossy(&pdf).contains("source: memo"));
    assert!(result.warnings.is_empty(), "{:?}", result.warnings);

    // HOME pointed into the request's own work directory.
    let log = engine_log(&h.stubs);
    assert_eq!(log.len(), 1);
    let home = log[0].split(' ').nth(2).unwrap();
    let root = std::fs::canonicalize(&h.temp_root).unwrap();
    assert!(Path::new(home).starts_with(&root), "HOME was {home}");

    h.recorder.assert_released_once();
    assert!(h.work_root_is_empty());
    let stages = h.recorder.stages.lock().unwrap().clone();
    assert_eq!(stages.first(), Some(&ConversionStage::Idle));
    assert_eq!(stages.last(), Some(&ConversionStage::DirReleased));
    assert!(stages.contains(&ConversionStage::Encoded));
}

#[tokio::test]
async fn every_local_route_yields_a_pdf() {
    let h = Harness::new();
    let c = h.converter("ok");
    for (name, route) in [
        ("a.docx", "word-to-pdf"),
        ("b.pptx", "ppt-to-pdf"),
        ("c.xlsx", "excel-to-pdf"),
        ("d.html", "html-to-pdf"),
        ("e.htm", "htm-to-pdf"),
    ] {
        let result = c.convert(&request(name, route)).await.unwrap();
        assert_eq!(result.output_mime_type, "application/pdf", "route {route}");
        assert_eq!(&result.decode_payload().unwrap()[..4], b"%PDF", "route {route}");
    }
    h.recorder.assert_released_once();
    assert_eq!(h.recorder.acquired.lock().unwrap().len(), 5);
}

#[tokio::test]
async fn output_with_unexpected_name_is_found_by_extension() {
    let h = Harness::new();
    let c = h.converter("renamed");
    let result = c.convert(&request("deck.pptx", "ppt-to-pdf")).await.unwrap();
    assert_eq!(result.output_filename, "converted-output.pdf");
    assert!(!result.warnings.is_empty(), "tiny PDF should be flagged");
}

#[tokio::test]
async fn pdf_named_input_on_word_route_converts() {
    let h = Harness::new();
    let c = h.converter("ok");
    let result = c.convert(&request("memo.pdf", "word-to-pdf")).await.unwrap();
    assert_eq!(result.output_filename, "memo.pdf");
    let text = String::from_utf8_lossy(&result.decode_payload().unwrap()).into_owned();
    assert!(text.contains("source: memo"), "got the input back: {text:?}");
    h.recorder.assert_released_once();
}

#[tokio::test]
async fn input_named_like_the_profile_directory_converts() {
    let h = Harness::new();
    let c = h.converter("ok");
    let result = c.convert(&request(".profile", "word-to-pdf")).await.unwrap();
    assert_eq!(&result.decode_payload().unwrap()[..4], b"%PDF");
    assert_eq!(result.original_filename, ".profile");
    h.recorder.assert_released_once();
    assert!(h.work_root_is_empty());
}

#[tokio::test]
async fn input_named_like_the_page_setup_script_leaves_it_intact() {
    let h = Harness::new();
    let python = python_stub(&h.stubs, "ok");
    let c = Converter::new(h.builder("ok").fallback_interpreter(python).build().unwrap());

    let result = c
        .convert(&request(".docconv-page-setup.py", "excel-to-pdf"))
        .await
        .unwrap();

    assert_eq!(result.produced_by, "uno-page-setup");
    let log = engine_log(&h.stubs);
    assert_eq!(log, vec!["fallback .docconv-page-setup.py script-present".to_string()]);
    h.recorder.assert_released_once();
}

#[tokio::test]
async fn path_traversal_in_filename_stays_inside_work_directory() {
    let h = Harness::new();
    let c = h.converter("ok");
    let req = ConversionRequest::new(b"x".to_vec(), "../../../etc/report.docx", "word-to-pdf");
    let result = c.convert(&req).await.unwrap();
    assert_eq!(result.original_filename, "report.docx");
    assert_eq!(result.output_filename, "report.pdf");
}

// ── Output failures ──────────────────────────────────────────────────────────

#[tokio::test]
async fn non_pdf_output_is_corrupt() {
    let h = Harness::new();
    let c = h.converter("corrupt");
    let err = c.convert(&request("memo.docx", "word-to-pdf")).await.unwrap_err();
    match err {
        ConvertError::OutputCorrupt { magic, .. } => assert_eq!(magic, b"<htm"),
        other => panic!("expected OutputCorrupt, got {other:?}"),
    }
    h.recorder.assert_released_once();
    assert!(h.work_root_is_empty());
}

#[tokio::test]
async fn zero_byte_output_is_empty() {
    let h = Harness::new();
    let c = h.converter("empty");
    let err = c.convert(&request("memo.docx", "word-to-pdf")).await.unwrap_err();
    assert!(matches!(err, ConvertError::OutputEmpty { .. }), "got {err:?}");
    h.recorder.assert_released_once();
}

#[tokio::test]
async fn missing_output_lists_directory_contents() {
    let h = Harness::new();
    let c = h.converter("none");
    let err = c.convert(&request("memo.docx", "word-to-pdf")).await.unwrap_err();
    match &err {
        ConvertError::OutputMissing { expected, found, .. } => {
            assert_eq!(expected, "memo.pdf");
            assert!(found.is_empty(), "output directory should be empty: {found:?}");
        }
        other => panic!("expected OutputMissing, got {other:?}"),
    }
    assert!(err.to_string().contains("Files found: none"), "{err}");
    h.recorder.assert_released_once();
}

// ── Engine failures ──────────────────────────────────────────────────────────

#[tokio::test]
async fn engine_crash_carries_stderr() {
    let h = Harness::new();
    let c = h.converter("fail");
    let err = c.convert(&request("memo.docx", "word-to-pdf")).await.unwrap_err();
    match &err {
        ConvertError::EngineExecutionError { stderr, .. } => {
            assert!(stderr.contains("source file could not be loaded"), "stderr: {stderr}");
        }
        other => panic!("expected EngineExecutionError, got {other:?}"),
    }
    let failure = err.to_failure("word-to-pdf");
    assert_eq!(failure.error_kind, edgequake_docconv::ErrorKind::EngineExecutionError);
    h.recorder.assert_released_once();
}

#[tokio::test]
async fn hanging_engine_times_out_and_leaves_no_process() {
    let h = Harness::new();
    let timeout = Duration::from_secs(1);
    let c = Converter::new(
        h.builder("hang")
            .fallback_enabled(false)
            .route_timeout(RouteKey::WordToPdf, timeout)
            .build()
            .unwrap(),
    );

    let started = Instant::now();
    let err = c.convert(&request("memo.docx", "word-to-pdf")).await.unwrap_err();
    let elapsed = started.elapsed();

    match err {
        ConvertError::ConversionTimeout { timeout: t, .. } => assert_eq!(t, timeout),
        other => panic!("expected ConversionTimeout, got {other:?}"),
    }
    // Version check, deadline and kill; generous epsilon for loaded CI machines.
    assert!(elapsed < timeout + Duration::from_secs(4), "took {elapsed:?}");

    let engine = read_pid(&h.stubs.join("engine.pid"));
    let grandchild = read_pid(&h.stubs.join("grandchild.pid"));
    // Give the kernel a moment to deliver SIGKILL to the group.
    let deadline = Instant::now() + Duration::from_secs(2);
    while (process_alive(engine) || process_alive(grandchild)) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!process_alive(engine), "engine pid {engine} survived");
    assert!(!process_alive(grandchild), "grandchild pid {grandchild} survived");

    h.recorder.assert_released_once();
    assert!(h.work_root_is_empty());
}

#[tokio::test]
async fn no_engine_lists_candidates_tried() {
    let h = Harness::new();
    let c = Converter::new(
        ConverterConfig::builder()
            .temp_root(&h.temp_root)
            .engine_candidates(vec![
                h.stubs.join("missing-soffice"),
                h.stubs.join("missing-libreoffice"),
            ])
            .observer(h.recorder.clone())
            .build()
            .unwrap(),
    );
    let err = c.convert(&request("memo.docx", "word-to-pdf")).await.unwrap_err();
    match &err {
        ConvertError::EngineNotFound { tried } => {
            assert_eq!(tried.len(), 2);
            assert!(tried[0].contains("missing-soffice"));
        }
        other => panic!("expected EngineNotFound, got {other:?}"),
    }
    h.recorder.assert_released_once();
}

// ── Spreadsheet fallback ─────────────────────────────────────────────────────

#[tokio::test]
async fn page_setup_success_skips_primary_engine() {
    let h = Harness::new();
    let python = python_stub(&h.stubs, "ok");
    let c = Converter::new(h.builder("ok").fallback_interpreter(python).build().unwrap());

    let result = c.convert(&request("Q3.xlsx", "excel-to-pdf")).await.unwrap();

    assert_eq!(result.produced_by, "uno-page-setup");
    assert_eq!(result.output_filename, "Q3.pdf");
    assert!(String::from_utf8_lossy(&result.decode_payload().unwrap()).contains("page-setup"));
    let log = engine_log(&h.stubs);
    assert_eq!(log, vec!["fallback Q3.xlsx script-present".to_string()]);
    assert!(h.recorder.stages.lock().unwrap().contains(&ConversionStage::FallbackAttempted));
    assert!(!h.recorder.stages.lock().unwrap().contains(&ConversionStage::PrimaryInvoked));
    h.recorder.assert_released_once();
}

#[tokio::test]
async fn page_setup_failure_falls_through_to_primary() {
    let h = Harness::new();
    let python = python_stub(&h.stubs, "fail");
    let c = Converter::new(h.builder("ok").fallback_interpreter(python).build().unwrap());

    let result = c.convert(&request("Q3.xlsx", "excel-to-pdf")).await.unwrap();

    assert_eq!(result.produced_by, "soffice");
    let log = engine_log(&h.stubs);
    assert_eq!(log.len(), 2);
    assert!(log[0].starts_with("fallback Q3.xlsx"));
    assert!(log[1].starts_with("primary Q3"));
    assert_eq!(*h.recorder.failed_strategies.lock().unwrap(), vec!["uno-page-setup"]);
    h.recorder.assert_released_once();
}

#[tokio::test]
async fn page_setup_timeout_falls_through_and_kills_script() {
    let h = Harness::new();
    let python = python_stub(&h.stubs, "hang");
    let timeout = Duration::from_secs(1);
    let c = Converter::new(
        h.builder("ok")
            .fallback_interpreter(python)
            .route_timeout(RouteKey::ExcelToPdf, timeout)
            .build()
            .unwrap(),
    );

    let started = Instant::now();
    let result = c.convert(&request("Q3.xlsx", "excel-to-pdf")).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.produced_by, "soffice");
    assert_eq!(*h.recorder.failed_strategies.lock().unwrap(), vec!["uno-page-setup"]);
    assert!(elapsed < timeout + Duration::from_secs(4), "took {elapsed:?}");

    let script = read_pid(&h.stubs.join("script.pid"));
    let helper = read_pid(&h.stubs.join("script-grandchild.pid"));
    let deadline = Instant::now() + Duration::from_secs(2);
    while (process_alive(script) || process_alive(helper)) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!process_alive(script), "script pid {script} survived");
    assert!(!process_alive(helper), "script child {helper} survived");

    h.recorder.assert_released_once();
    assert!(h.work_root_is_empty());
}

#[tokio::test]
async fn page_setup_garbage_is_discarded_before_primary_runs() {
    let h = Harness::new();
    let python = python_stub(&h.stubs, "garbage");
    let c = Converter::new(h.builder("ok").fallback_interpreter(python).build().unwrap());

    let result = c.convert(&request("Q3.xlsx", "excel-to-pdf")).await.unwrap();

    assert_eq!(result.produced_by, "soffice");
    let text = String::from_utf8_lossy(&result.decode_payload().unwrap()).into_owned();
    assert!(text.contains("source: Q3"), "primary output expected, got {text:?}");
}

#[tokio::test]
async fn missing_interpreter_falls_through_to_primary() {
    let h = Harness::new();
    let c = Converter::new(
        h.builder("ok")
            .fallback_interpreter(h.stubs.join("no-such-python"))
            .build()
            .unwrap(),
    );
    let result = c.convert(&request("Q3.xlsx", "excel-to-pdf")).await.unwrap();
    assert_eq!(result.produced_by, "soffice");
}

#[tokio::test]
async fn non_spreadsheet_routes_never_run_page_setup() {
    let h = Harness::new();
    let python = python_stub(&h.stubs, "ok");
    let c = Converter::new(h.builder("ok").fallback_interpreter(python).build().unwrap());
    c.convert(&request("memo.docx", "word-to-pdf")).await.unwrap();
    assert!(engine_log(&h.stubs).iter().all(|l| l.starts_with("primary")));
}

// ── Route checks ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_route_has_no_filesystem_side_effects() {
    let h = Harness::new();
    let c = h.converter("ok");
    let err = c.convert(&request("memo.docx", "docx-to-epub")).await.unwrap_err();
    assert!(matches!(err, ConvertError::UnsupportedRoute { .. }));
    assert!(!h.temp_root.exists());
    assert!(h.recorder.acquired.lock().unwrap().is_empty());
    assert!(engine_log(&h.stubs).is_empty());
}

#[tokio::test]
async fn remote_routes_are_redirected() {
    let h = Harness::new();
    let c = h.converter("ok");
    let err = c.convert(&request("scan.pdf", "pdf-to-word")).await.unwrap_err();
    assert!(matches!(err, ConvertError::RemoteRoute { route: RouteKey::PdfToWord, .. }));
    assert!(!h.temp_root.exists());
}

// ── Concurrency ──────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_use_distinct_work_directories() {
    let h = Harness::new();
    let c = h.converter("ok");
    let requests = vec![
        request("alpha.docx", "word-to-pdf"),
        request("bravo.pptx", "ppt-to-pdf"),
        request("charlie.xlsx", "excel-to-pdf"),
        request("delta.html", "html-to-pdf"),
        request("echo.htm", "htm-to-pdf"),
        request("foxtrot.docx", "word-to-pdf"),
    ];
    let stems: Vec<String> = requests
        .iter()
        .map(|r| r.original_filename.split('.').next().unwrap().to_string())
        .collect();

    let results = edgequake_docconv::convert_many(&c, requests, 6).await;

    for (stem, result) in stems.iter().zip(results) {
        let result = result.unwrap();
        assert_eq!(result.output_filename, format!("{stem}.pdf"));
        let text = String::from_utf8_lossy(&result.decode_payload().unwrap()).into_owned();
        assert!(text.contains(&format!("source: {stem}")), "{stem} got someone else's output");
    }

    let mut acquired = h.recorder.acquired.lock().unwrap().clone();
    assert_eq!(acquired.len(), 6);
    acquired.sort();
    acquired.dedup();
    assert_eq!(acquired.len(), 6, "work directories must be distinct");
    h.recorder.assert_released_once();
    assert!(h.work_root_is_empty());
}
