//! Configuration for the conversion orchestrator.
//!
//! Everything the orchestrator needs to know about its environment lives in
//! one immutable [`ConverterConfig`], built once at startup via
//! [`ConverterConfigBuilder`] (or [`ConverterConfig::from_env`]) and shared
//! by every request. The candidate-binary list and the per-route profile
//! table are plain data here rather than process-wide globals, so two
//! converters with different engines can coexist in one process (and in one
//! test binary).

use crate::error::ConvertError;
use crate::profile::{ProfileTable, RouteKey};
use crate::progress::{NoopObserver, Observer};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable: root directory for per-request work directories.
pub const ENV_TEMP_ROOT: &str = "DOCCONV_TEMP_ROOT";
/// Legacy alias for [`ENV_TEMP_ROOT`].
pub const ENV_TEMP_ROOT_LEGACY: &str = "TEMP_ROOT";
/// Environment variable: base URL of the remote conversion backend.
pub const ENV_REMOTE_URL: &str = "DOCCONV_REMOTE_URL";
/// Environment variable: interpreter used for the page-setup script.
pub const ENV_FALLBACK_PYTHON: &str = "DOCCONV_FALLBACK_PYTHON";

/// Settings for the scripted page-setup engine used on fallback-eligible routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackSettings {
    /// Try the scripted engine at all. Default: true.
    pub enabled: bool,
    /// Interpreter that runs the script. Default: `python3`.
    pub interpreter: PathBuf,
    /// Script path. `None` uses the bundled UNO page-setup script, written
    /// into the work directory for each request.
    pub script: Option<PathBuf>,
    /// Time the script waits for its private engine listener to come up.
    /// Passed to the script as its third argument. Default: 3 s.
    pub settle_delay: Duration,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interpreter: PathBuf::from("python3"),
            script: None,
            settle_delay: Duration::from_secs(3),
        }
    }
}

/// Bounded poll-with-backoff used to wait for an engine's output file to
/// appear and stop growing after the process has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSettle {
    /// First poll interval. Default: 50 ms.
    pub initial_interval: Duration,
    /// Interval cap; the interval doubles up to this. Default: 400 ms.
    pub max_interval: Duration,
    /// Total time spent polling before giving up. Default: 2 s.
    pub budget: Duration,
}

impl Default for OutputSettle {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_millis(400),
            budget: Duration::from_secs(2),
        }
    }
}

/// Immutable orchestrator configuration.
///
/// # Example
/// ```rust
/// use edgequake_docconv::{ConverterConfig, RouteKey};
/// use std::time::Duration;
///
/// let config = ConverterConfig::builder()
///     .engine_binary("/opt/libreoffice/program/soffice")
///     .route_timeout(RouteKey::ExcelToPdf, Duration::from_secs(45))
///     .build()
///     .unwrap();
/// assert_eq!(config.engine_candidates[0].to_str(), Some("/opt/libreoffice/program/soffice"));
/// ```
#[derive(Clone)]
pub struct ConverterConfig {
    /// Parent of every per-request work directory. Default: `$TMPDIR/docconv`.
    pub temp_root: PathBuf,

    /// Ordered engine candidates probed by the binary resolver.
    pub engine_candidates: Vec<PathBuf>,

    /// Deadline for each `--version` probe. Default: 5 s.
    pub probe_timeout: Duration,

    /// Per-stream cap on captured engine stdout/stderr. Default: 50 MiB.
    ///
    /// Output beyond the cap is drained and discarded so a chatty engine can
    /// never block on a full pipe or grow memory without bound.
    pub capture_limit_bytes: usize,

    /// Route → profile table.
    pub profiles: ProfileTable,

    /// Scripted page-setup engine settings.
    pub fallback: FallbackSettings,

    /// Output-file stability polling.
    pub settle: OutputSettle,

    /// Remote backend that serves the PDF → Office routes. Only used to
    /// build redirect errors and by [`crate::remote::RemoteBackend`].
    pub remote_backend_url: Option<String>,

    /// Lifecycle observer. Default: [`NoopObserver`].
    pub observer: Observer,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            temp_root: std::env::temp_dir().join("docconv"),
            engine_candidates: soffice_locate::default_candidates(),
            probe_timeout: soffice_locate::DEFAULT_PROBE_TIMEOUT,
            capture_limit_bytes: 50 * 1024 * 1024,
            profiles: ProfileTable::default(),
            fallback: FallbackSettings::default(),
            settle: OutputSettle::default(),
            remote_backend_url: None,
            observer: Arc::new(NoopObserver),
        }
    }
}

impl fmt::Debug for ConverterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterConfig")
            .field("temp_root", &self.temp_root)
            .field("engine_candidates", &self.engine_candidates)
            .field("probe_timeout", &self.probe_timeout)
            .field("capture_limit_bytes", &self.capture_limit_bytes)
            .field("profiles", &self.profiles)
            .field("fallback", &self.fallback)
            .field("settle", &self.settle)
            .field("remote_backend_url", &self.remote_backend_url)
            .field("observer", &"<dyn ConversionObserver>")
            .finish()
    }
}

impl ConverterConfig {
    /// Create a new builder for `ConverterConfig`.
    pub fn builder() -> ConverterConfigBuilder {
        ConverterConfigBuilder {
            config: Self::default(),
        }
    }

    /// Builder pre-populated from `DOCCONV_*` environment variables.
    ///
    /// The engine override (`DOCCONV_SOFFICE_BIN` / `LIBREOFFICE_BIN`) is
    /// already part of the default candidate list.
    pub fn from_env() -> ConverterConfigBuilder {
        let mut builder = Self::builder();
        if let Some(root) =
            env_non_empty(ENV_TEMP_ROOT).or_else(|| env_non_empty(ENV_TEMP_ROOT_LEGACY))
        {
            builder = builder.temp_root(root);
        }
        if let Some(url) = env_non_empty(ENV_REMOTE_URL) {
            builder = builder.remote_backend_url(url);
        }
        if let Some(python) = env_non_empty(ENV_FALLBACK_PYTHON) {
            builder = builder.fallback_interpreter(python);
        }
        builder
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Builder for [`ConverterConfig`].
#[derive(Debug)]
pub struct ConverterConfigBuilder {
    config: ConverterConfig,
}

impl ConverterConfigBuilder {
    pub fn temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.temp_root = root.into();
        self
    }

    /// Put an explicit engine binary in front of the candidate list.
    pub fn engine_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        let binary = binary.into();
        self.config.engine_candidates.retain(|c| c != &binary);
        self.config.engine_candidates.insert(0, binary);
        self
    }

    /// Replace the candidate list entirely.
    pub fn engine_candidates(mut self, candidates: Vec<PathBuf>) -> Self {
        self.config.engine_candidates = candidates;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe_timeout = timeout;
        self
    }

    pub fn capture_limit_bytes(mut self, bytes: usize) -> Self {
        self.config.capture_limit_bytes = bytes;
        self
    }

    pub fn profiles(mut self, profiles: ProfileTable) -> Self {
        self.config.profiles = profiles;
        self
    }

    pub fn route_timeout(mut self, route: RouteKey, timeout: Duration) -> Self {
        self.config.profiles = self.config.profiles.with_timeout(route, timeout);
        self
    }

    pub fn all_route_timeouts(mut self, timeout: Duration) -> Self {
        self.config.profiles = self.config.profiles.with_all_timeouts(timeout);
        self
    }

    pub fn fallback_enabled(mut self, v: bool) -> Self {
        self.config.fallback.enabled = v;
        self
    }

    pub fn fallback_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.config.fallback.interpreter = interpreter.into();
        self
    }

    pub fn fallback_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.config.fallback.script = Some(script.into());
        self
    }

    pub fn fallback_settle_delay(mut self, delay: Duration) -> Self {
        self.config.fallback.settle_delay = delay;
        self
    }

    pub fn settle(mut self, settle: OutputSettle) -> Self {
        self.config.settle = settle;
        self
    }

    pub fn remote_backend_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote_backend_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn observer(mut self, observer: Observer) -> Self {
        self.config.observer = observer;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConverterConfig, ConvertError> {
        let c = &self.config;
        if c.engine_candidates.is_empty() {
            return Err(ConvertError::InvalidConfig(
                "at least one engine candidate is required".into(),
            ));
        }
        if c.temp_root.as_os_str().is_empty() {
            return Err(ConvertError::InvalidConfig("temp_root must not be empty".into()));
        }
        if c.capture_limit_bytes < 1024 {
            return Err(ConvertError::InvalidConfig(format!(
                "capture limit must be ≥ 1024 bytes, got {}",
                c.capture_limit_bytes
            )));
        }
        if c.probe_timeout.is_zero() {
            return Err(ConvertError::InvalidConfig("probe timeout must be > 0".into()));
        }
        if let Some(p) = c.profiles.iter().find(|p| p.timeout.is_zero()) {
            return Err(ConvertError::InvalidConfig(format!(
                "timeout for route '{}' must be > 0",
                p.route
            )));
        }
        let settle = &c.settle;
        if settle.initial_interval.is_zero() || settle.max_interval < settle.initial_interval {
            return Err(ConvertError::InvalidConfig(
                "settle intervals must be > 0 and max ≥ initial".into(),
            ));
        }
        Ok(self.config)
    }
}
