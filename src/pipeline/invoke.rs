//! Process invoker: run one engine subprocess under a hard deadline.
//!
//! ## Why a process group?
//!
//! `soffice` is a launcher script that execs (or forks) `soffice.bin`, which
//! may in turn spawn helpers such as `javaldx` or `oosplash`. Killing only
//! the direct child on timeout would orphan the real renderer. The child is
//! therefore started as the leader of a new process group and the whole
//! group is signalled on expiry. `kill_on_drop` covers the case where the
//! surrounding future is cancelled.
//!
//! ## Why bounded capture?
//!
//! Some engine builds print per-page diagnostics. stdout and stderr are each
//! read by a dedicated task into a buffer capped at
//! [`crate::ConverterConfig::capture_limit_bytes`]; anything past the cap is
//! read and dropped so the child never blocks on a full pipe.

use crate::error::ConvertError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long the pipe readers may keep draining after the child has exited.
/// A surviving grandchild can hold the pipes open indefinitely.
const READER_GRACE: Duration = Duration::from_secs(2);

static ENGINE_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)javaldx|fontconfig|Gtk-WARNING|^\s*$").unwrap());

/// One subprocess execution attempt.
#[derive(Debug, Clone)]
pub struct EngineInvocation {
    /// Human-readable engine name used in errors and logs.
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: PathBuf,
    /// Variables added on top of the inherited environment.
    pub env: BTreeMap<String, OsString>,
    pub timeout: Duration,
    pub capture_limit: usize,
}

/// Captured result of a successful (exit status 0) invocation.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub elapsed: Duration,
}

/// Environment overrides shared by every engine process of one request.
///
/// `HOME` points into the work directory so concurrent requests never share
/// a user profile, and the VCL plugin is forced headless.
pub fn engine_environment(workdir: &Path) -> BTreeMap<String, OsString> {
    let mut env = BTreeMap::new();
    env.insert("HOME".to_string(), workdir.as_os_str().to_owned());
    env.insert("SAL_USE_VCLPLUGIN".to_string(), "headless".into());
    env.insert("OOO_DISABLE_RECOVERY".to_string(), "1".into());
    env.insert("UNO_DISABLE_ENV".to_string(), "true".into());
    env
}

/// Drop known-harmless engine chatter (javaldx, fontconfig, Gtk warnings,
/// blank lines) from captured stderr.
pub fn filter_engine_noise(stderr: &str) -> String {
    stderr
        .lines()
        .filter(|line| !ENGINE_NOISE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Spawn the invocation and wait for it, killing the process group on timeout.
///
/// Fails with [`ConvertError::ConversionTimeout`] when the deadline expires
/// and [`ConvertError::EngineExecutionError`] when the process cannot start,
/// cannot be waited on, or exits unsuccessfully.
pub async fn invoke(inv: &EngineInvocation) -> Result<EngineOutput, ConvertError> {
    debug!(
        "Running {}: {} {}",
        inv.label,
        inv.program.display(),
        inv.args
            .iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let mut cmd = Command::new(&inv.program);
    cmd.args(&inv.args)
        .current_dir(&inv.working_dir)
        .envs(&inv.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|e| ConvertError::EngineExecutionError {
        engine: inv.label.clone(),
        reason: format!("failed to start '{}': {e}", inv.program.display()),
        stderr: String::new(),
    })?;
    let pid = child.id();

    let stdout_task = child
        .stdout
        .take()
        .map(|out| tokio::spawn(capture_bounded(out, inv.capture_limit)));
    let stderr_task = child
        .stderr
        .take()
        .map(|err| tokio::spawn(capture_bounded(err, inv.capture_limit)));

    let status = match tokio::time::timeout(inv.timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            kill_process_group(pid);
            abort(stdout_task);
            abort(stderr_task);
            return Err(ConvertError::EngineExecutionError {
                engine: inv.label.clone(),
                reason: format!("failed to wait for process: {e}"),
                stderr: String::new(),
            });
        }
        Err(_) => {
            warn!(
                "{} exceeded {}ms, killing process group",
                inv.label,
                inv.timeout.as_millis()
            );
            kill_process_group(pid);
            if let Err(e) = child.kill().await {
                debug!("kill after timeout: {e}");
            }
            abort(stdout_task);
            abort(stderr_task);
            return Err(ConvertError::ConversionTimeout {
                engine: inv.label.clone(),
                timeout: inv.timeout,
            });
        }
    };
    let elapsed = started.elapsed();

    // Reap anything the engine left behind in its group.
    kill_process_group(pid);

    let (stdout, stdout_truncated) = join_capture(stdout_task).await;
    let (stderr_bytes, stderr_truncated) = join_capture(stderr_task).await;
    let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();

    if stdout_truncated || stderr_truncated {
        warn!(
            "{} output exceeded {} bytes and was truncated",
            inv.label, inv.capture_limit
        );
    }
    if !stdout.is_empty() {
        debug!("{} stdout: {}", inv.label, String::from_utf8_lossy(&stdout).trim_end());
    }
    if !stderr.is_empty() {
        debug!("{} stderr (full): {}", inv.label, stderr.trim_end());
        let filtered = filter_engine_noise(&stderr);
        if !filtered.is_empty() {
            warn!("{} stderr: {}", inv.label, filtered);
        }
    }

    if !status.success() {
        return Err(ConvertError::EngineExecutionError {
            engine: inv.label.clone(),
            reason: format!("exited with {status}"),
            stderr,
        });
    }

    debug!("{} finished in {}ms", inv.label, elapsed.as_millis());
    Ok(EngineOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        elapsed,
    })
}

async fn capture_bounded<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(buf.len());
                let take = n.min(room);
                buf.extend_from_slice(&chunk[..take]);
                if take < n {
                    truncated = true;
                }
            }
        }
    }
    (buf, truncated)
}

async fn join_capture(task: Option<JoinHandle<(Vec<u8>, bool)>>) -> (Vec<u8>, bool) {
    let Some(mut task) = task else {
        return (Vec::new(), false);
    };
    match tokio::time::timeout(READER_GRACE, &mut task).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            debug!("output reader failed: {e}");
            (Vec::new(), false)
        }
        Err(_) => {
            debug!("output reader still open after exit, abandoning");
            task.abort();
            (Vec::new(), true)
        }
    }
}

fn abort(task: Option<JoinHandle<(Vec<u8>, bool)>>) {
    if let Some(task) = task {
        task.abort();
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    // SAFETY: signalling a process group we created; ESRCH when it is
    // already gone is expected and ignored.
    let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            debug!("kill(-{pid}) failed: {err}");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_filter_drops_known_chatter() {
        let raw = "javaldx: Could not find a Java Runtime Environment!\n\
                   Fontconfig warning: ignoring UTF-8\n\
                   \n\
                   (soffice:1): Gtk-WARNING **: cannot open display\n\
                   Error: source file could not be loaded\n";
        assert_eq!(filter_engine_noise(raw), "Error: source file could not be loaded");
    }

    #[test]
    fn noise_filter_keeps_empty_when_all_noise() {
        assert!(filter_engine_noise("javaldx x\n   \n").is_empty());
    }

    #[test]
    fn environment_redirects_home() {
        let env = engine_environment(Path::new("/tmp/docconv/conv-abc"));
        assert_eq!(env["HOME"], OsString::from("/tmp/docconv/conv-abc"));
        assert_eq!(env["SAL_USE_VCLPLUGIN"], OsString::from("headless"));
        assert_eq!(env["OOO_DISABLE_RECOVERY"], OsString::from("1"));
    }

    #[test]
    fn capture_is_bounded_and_drained() {
        let data = vec![b'x'; 20_000];
        let (buf, truncated) =
            tokio_test::block_on(capture_bounded(std::io::Cursor::new(data), 1024));
        assert_eq!(buf.len(), 1024);
        assert!(truncated);

        let (buf, truncated) =
            tokio_test::block_on(capture_bounded(std::io::Cursor::new(b"short".to_vec()), 1024));
        assert_eq!(buf, b"short");
        assert!(!truncated);
    }

    #[cfg(unix)]
    fn sh(script: &str, timeout: Duration) -> EngineInvocation {
        EngineInvocation {
            label: "test-engine".into(),
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), script.into()],
            working_dir: std::env::temp_dir(),
            env: BTreeMap::new(),
            timeout,
            capture_limit: 64 * 1024,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_output_of_successful_run() {
        let out = invoke(&sh("echo hello; echo oops >&2", Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let err = invoke(&sh("echo 'cannot load' >&2; exit 3", Duration::from_secs(5)))
            .await
            .unwrap_err();
        match err {
            ConvertError::EngineExecutionError { stderr, reason, .. } => {
                assert!(stderr.contains("cannot load"));
                assert!(reason.contains('3'), "got: {reason}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_binary_is_execution_error() {
        let mut inv = sh("true", Duration::from_secs(5));
        inv.program = PathBuf::from("/definitely/not/here/soffice");
        let err = invoke(&inv).await.unwrap_err();
        assert!(matches!(err, ConvertError::EngineExecutionError { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_and_returns_promptly() {
        let started = Instant::now();
        let err = invoke(&sh("sleep 30", Duration::from_millis(300)))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::ConversionTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn env_overrides_are_applied() {
        let mut inv = sh("printf %s \"$SAL_USE_VCLPLUGIN\"", Duration::from_secs(5));
        inv.env = engine_environment(Path::new("/tmp"));
        let out = invoke(&inv).await.unwrap();
        assert_eq!(out.stdout, b"headless");
    }
}
