//! # soffice-locate
//!
//! Find a LibreOffice binary that actually answers, so callers of the
//! headless `soffice --convert-to` interface never have to hard-code an
//! install path or guess between `soffice` and `libreoffice`.
//!
//! ## How it works
//!
//! On every call to [`EngineLocator::resolve`]:
//!
//! 1. If a last-known-good binary is cached, probe it first.
//! 2. Otherwise (or if that probe fails) walk the ordered candidate list and
//!    run `<candidate> --version` under a short deadline.
//! 3. The first candidate that exits successfully wins and is cached.
//! 4. If nobody answers, return [`LocateError::NotFound`] listing every
//!    candidate tried together with why it failed.
//!
//! Probing per call is deliberate: in containerised deployments the engine
//! can disappear between two requests, and a stale cached path must not turn
//! into a confusing spawn error deep inside a conversion.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use soffice_locate::EngineLocator;
//!
//! # async fn run() -> Result<(), soffice_locate::LocateError> {
//! let locator = EngineLocator::with_defaults();
//! let soffice = locator.resolve().await?;
//! println!("using {}", soffice.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform defaults
//!
//! | OS      | Extra candidates                                              |
//! |---------|---------------------------------------------------------------|
//! | Linux   | `/usr/bin/soffice`, `/usr/bin/libreoffice`, `/opt/libreoffice/program/soffice` |
//! | macOS   | `/Applications/LibreOffice.app/Contents/MacOS/soffice`        |
//! | Windows | `C:\Program Files\LibreOffice\program\soffice.exe`            |
//!
//! ## Environment variable overrides
//!
//! - `DOCCONV_SOFFICE_BIN` — explicit binary, probed before every default.
//! - `LIBREOFFICE_BIN` — legacy alias of the above.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

// ── Public constants ─────────────────────────────────────────────────────────

/// Environment variable naming an explicit engine binary.
pub const ENV_SOFFICE_BIN: &str = "DOCCONV_SOFFICE_BIN";

/// Legacy alias for [`ENV_SOFFICE_BIN`].
pub const ENV_LIBREOFFICE_BIN: &str = "LIBREOFFICE_BIN";

/// Deadline for a single `--version` probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Logical names looked up through `PATH`, in priority order.
const LOGICAL_NAMES: &[&str] = &["soffice", "libreoffice"];

// ── Error type ───────────────────────────────────────────────────────────────

/// Why a single candidate did not qualify.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// The binary could not be started at all (missing, not executable).
    #[error("could not start: {0}")]
    Spawn(String),

    /// The binary did not answer `--version` before the deadline.
    #[error("no answer within {0:?}")]
    Timeout(Duration),

    /// The binary answered but exited unsuccessfully.
    #[error("exited with {0}")]
    Exit(String),
}

/// Errors returned by soffice-locate operations.
#[derive(Error, Debug)]
pub enum LocateError {
    /// No candidate responded to the probe.
    #[error("LibreOffice not found. Tried: {}", format_tried(.tried))]
    NotFound {
        tried: Vec<(PathBuf, ProbeFailure)>,
    },

    /// The locator was built with an empty candidate list.
    #[error("no engine candidates configured")]
    NoCandidates,
}

impl LocateError {
    /// Every candidate path that was probed, in probe order.
    pub fn candidates_tried(&self) -> Vec<PathBuf> {
        match self {
            LocateError::NotFound { tried } => tried.iter().map(|(p, _)| p.clone()).collect(),
            LocateError::NoCandidates => Vec::new(),
        }
    }
}

fn format_tried(tried: &[(PathBuf, ProbeFailure)]) -> String {
    tried
        .iter()
        .map(|(p, why)| format!("{} ({why})", p.display()))
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Candidate list ───────────────────────────────────────────────────────────

/// Absolute install locations worth trying on the current platform.
pub fn platform_install_paths() -> Vec<PathBuf> {
    let paths: &[&str] = match std::env::consts::OS {
        "linux" => &[
            "/usr/bin/soffice",
            "/usr/bin/libreoffice",
            "/usr/local/bin/soffice",
            "/opt/libreoffice/program/soffice",
        ],
        "macos" => &[
            "/Applications/LibreOffice.app/Contents/MacOS/soffice",
            "/opt/homebrew/bin/soffice",
            "/usr/local/bin/soffice",
        ],
        "windows" => &[
            r"C:\Program Files\LibreOffice\program\soffice.exe",
            r"C:\Program Files (x86)\LibreOffice\program\soffice.exe",
        ],
        _ => &[],
    };
    paths.iter().map(PathBuf::from).collect()
}

/// The explicit binary from the environment, if any.
pub fn env_override() -> Option<PathBuf> {
    [ENV_SOFFICE_BIN, ENV_LIBREOFFICE_BIN]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

/// Default ordered candidate list: environment override, logical names,
/// then platform install paths. Duplicates are removed, first one wins.
pub fn default_candidates() -> Vec<PathBuf> {
    let mut list: Vec<PathBuf> = Vec::new();
    if let Some(p) = env_override() {
        list.push(p);
    }
    list.extend(LOGICAL_NAMES.iter().map(PathBuf::from));
    list.extend(platform_install_paths());
    dedup_preserving_order(list)
}

fn dedup_preserving_order(list: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::with_capacity(list.len());
    for p in list {
        if !out.contains(&p) {
            out.push(p);
        }
    }
    out
}

// ── Locator ──────────────────────────────────────────────────────────────────

/// Ordered candidate list plus a last-known-good cache.
///
/// Shared across concurrent requests behind an `Arc`. The cache is only an
/// optimisation: a cached path is always re-probed before use, and a request
/// only clears the entry it observed failing, never one another request has
/// just written.
#[derive(Debug)]
pub struct EngineLocator {
    candidates: Vec<PathBuf>,
    probe_timeout: Duration,
    last_good: Mutex<Option<PathBuf>>,
}

impl EngineLocator {
    pub fn new(candidates: Vec<PathBuf>, probe_timeout: Duration) -> Self {
        Self {
            candidates: dedup_preserving_order(candidates),
            probe_timeout,
            last_good: Mutex::new(None),
        }
    }

    /// Locator over [`default_candidates`] with [`DEFAULT_PROBE_TIMEOUT`].
    pub fn with_defaults() -> Self {
        Self::new(default_candidates(), DEFAULT_PROBE_TIMEOUT)
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// The cached last-known-good binary, without probing it.
    pub fn cached(&self) -> Option<PathBuf> {
        self.last_good.lock().ok().and_then(|g| g.clone())
    }

    /// Return the first candidate that answers `--version`.
    pub async fn resolve(&self) -> Result<PathBuf, LocateError> {
        if self.candidates.is_empty() {
            return Err(LocateError::NoCandidates);
        }

        if let Some(cached) = self.cached() {
            match probe(&cached, self.probe_timeout).await {
                Ok(_) => return Ok(cached),
                Err(why) => {
                    info!("Cached engine {} stopped answering: {}", cached.display(), why);
                    self.forget(&cached);
                }
            }
        }

        let mut tried = Vec::with_capacity(self.candidates.len());
        for candidate in &self.candidates {
            match probe(candidate, self.probe_timeout).await {
                Ok(version) => {
                    info!("Using LibreOffice binary: {} ({})", candidate.display(), version);
                    self.remember(candidate);
                    return Ok(candidate.clone());
                }
                Err(why) => {
                    debug!("Engine candidate {} rejected: {}", candidate.display(), why);
                    tried.push((candidate.clone(), why));
                }
            }
        }

        Err(LocateError::NotFound { tried })
    }

    fn remember(&self, path: &Path) {
        if let Ok(mut guard) = self.last_good.lock() {
            *guard = Some(path.to_path_buf());
        }
    }

    /// Clear the cache only if it still holds `stale`.
    fn forget(&self, stale: &Path) {
        if let Ok(mut guard) = self.last_good.lock() {
            if guard.as_deref() == Some(stale) {
                *guard = None;
            }
        }
    }
}

impl Default for EngineLocator {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Run `<binary> --version` under `timeout`; return the first stdout line.
///
/// A launcher script may fork the real engine before answering. On unix the
/// child therefore leads its own process group, and the whole group is
/// killed once the version check is over, answered or not.
pub async fn probe(binary: &Path, timeout: Duration) -> Result<String, ProbeFailure> {
    let mut cmd = Command::new(binary);
    cmd.arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn().map_err(|e| ProbeFailure::Spawn(e.to_string()))?;
    let pid = child.id();

    let waited = tokio::time::timeout(timeout, child.wait_with_output()).await;
    kill_process_group(pid);
    let output = match waited {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(ProbeFailure::Spawn(e.to_string())),
        Err(_) => {
            debug!("{} did not answer within {timeout:?}", binary.display());
            return Err(ProbeFailure::Timeout(timeout));
        }
    };

    if !output.status.success() {
        return Err(ProbeFailure::Exit(output.status.to_string()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or("").trim().to_string())
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    // SAFETY: plain signal to the group spawned above; ESRCH once the
    // group is empty is expected.
    let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            debug!("kill(-{pid}) after version check: {err}");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

// ── Tests ─────────────────────────────────────────────────────────────────────
