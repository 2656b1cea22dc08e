//! Error types for the edgequake-docconv library.
//!
//! Two shapes exist because two audiences consume them:
//!
//! * [`ConvertError`] — the rich Rust error returned from
//!   [`crate::Converter::convert`]. Each variant carries the diagnostic
//!   detail an operator needs (candidates tried, files present in the work
//!   directory, captured engine stderr) without having to correlate logs.
//!
//! * [`ConversionFailure`] — the flat, serialisable `{errorKind,
//!   humanMessage, routeKey}` record handed to the HTTP/response layer.
//!   Built with [`ConvertError::to_failure`]; never carries a payload.
//!
//! Fallback-engine failures are also `ConvertError`s, but they are consumed
//! inside the strategy chain and only reach callers through the observer.

use crate::pipeline::resolve::FileEntry;
use crate::profile::RouteKey;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All terminal errors returned by the edgequake-docconv library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Request errors ────────────────────────────────────────────────────
    /// The route key is not one of the supported conversions.
    #[error("Unsupported conversion route: '{route}'\nSupported: {}", RouteKey::supported_list())]
    UnsupportedRoute { route: String },

    /// The route is valid but is served by the remote conversion backend.
    #[error(
        "Route '{route}' is not converted locally; send it to the remote conversion backend{}",
        remote_hint(.route, .backend_url)
    )]
    RemoteRoute {
        route: RouteKey,
        backend_url: Option<String>,
    },

    /// A local source file could not be read.
    #[error("Cannot read input file '{}': {source}", .path.display())]
    InputUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Sandbox errors ────────────────────────────────────────────────────
    /// The per-request scratch directory could not be created or written.
    #[error("Work directory unavailable at '{}': {source}", .path.display())]
    WorkDirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Engine errors ─────────────────────────────────────────────────────
    /// No engine candidate answered the `--version` probe.
    #[error("LibreOffice not found. Tried: {}", .tried.join(", "))]
    EngineNotFound { tried: Vec<String> },

    /// The engine (primary or fallback) exceeded its deadline and was killed.
    #[error("{engine} conversion timed out after {}ms", .timeout.as_millis())]
    ConversionTimeout { engine: String, timeout: Duration },

    /// The engine could not be started or exited unsuccessfully.
    #[error("{engine} conversion failed: {reason}\nStderr: {}", display_stderr(.stderr))]
    EngineExecutionError {
        engine: String,
        reason: String,
        stderr: String,
    },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The engine exited but no artifact with the target extension exists.
    #[error(
        "The engine did not produce an output file.\nExpected: {expected} (format: {extension})\nInput file: {input}\nFiles found: {}",
        display_entries(.found)
    )]
    OutputMissing {
        expected: String,
        extension: String,
        input: String,
        found: Vec<FileEntry>,
    },

    /// The artifact exists but is zero bytes long.
    #[error("The engine produced an empty output file: '{}'", .path.display())]
    OutputEmpty { path: PathBuf },

    /// A PDF artifact does not start with the `%PDF` signature.
    #[error(
        "Invalid PDF file '{}': missing PDF header. Got: {:?}",
        .path.display(),
        String::from_utf8_lossy(.magic)
    )]
    OutputCorrupt { path: PathBuf, magic: Vec<u8> },

    // ── Remote backend errors ─────────────────────────────────────────────
    /// The remote conversion backend rejected or failed the request.
    #[error("Remote backend '{url}' failed: {reason}")]
    RemoteBackend { url: String, reason: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn remote_hint(route: &RouteKey, backend_url: &Option<String>) -> String {
    match backend_url {
        Some(url) => format!(" at {}/convert/{route}", url.trim_end_matches('/')),
        None => String::new(),
    }
}

fn display_stderr(stderr: &str) -> &str {
    if stderr.trim().is_empty() {
        "none"
    } else {
        stderr.trim_end()
    }
}

fn display_entries(found: &[FileEntry]) -> String {
    if found.is_empty() {
        return "none".to_string();
    }
    found
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The error taxonomy exposed to callers, independent of Rust types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnsupportedRoute,
    RemoteRoute,
    InputUnreadable,
    WorkDirectoryUnavailable,
    EngineNotFound,
    ConversionTimeout,
    EngineExecutionError,
    OutputMissing,
    OutputEmpty,
    OutputCorrupt,
    RemoteBackend,
    InvalidConfig,
    Internal,
}

impl ConvertError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::UnsupportedRoute { .. } => ErrorKind::UnsupportedRoute,
            ConvertError::RemoteRoute { .. } => ErrorKind::RemoteRoute,
            ConvertError::InputUnreadable { .. } => ErrorKind::InputUnreadable,
            ConvertError::WorkDirectoryUnavailable { .. } => ErrorKind::WorkDirectoryUnavailable,
            ConvertError::EngineNotFound { .. } => ErrorKind::EngineNotFound,
            ConvertError::ConversionTimeout { .. } => ErrorKind::ConversionTimeout,
            ConvertError::EngineExecutionError { .. } => ErrorKind::EngineExecutionError,
            ConvertError::OutputMissing { .. } => ErrorKind::OutputMissing,
            ConvertError::OutputEmpty { .. } => ErrorKind::OutputEmpty,
            ConvertError::OutputCorrupt { .. } => ErrorKind::OutputCorrupt,
            ConvertError::RemoteBackend { .. } => ErrorKind::RemoteBackend,
            ConvertError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            ConvertError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Flatten into the outbound failure record for `route_key`.
    pub fn to_failure(&self, route_key: impl Into<String>) -> ConversionFailure {
        ConversionFailure {
            success: false,
            error_kind: self.kind(),
            human_message: self.to_string(),
            route_key: route_key.into(),
        }
    }
}

impl From<soffice_locate::LocateError> for ConvertError {
    fn from(e: soffice_locate::LocateError) -> Self {
        match e {
            soffice_locate::LocateError::NotFound { tried } => ConvertError::EngineNotFound {
                tried: tried
                    .into_iter()
                    .map(|(path, why)| format!("{} ({why})", path.display()))
                    .collect(),
            },
            soffice_locate::LocateError::NoCandidates => ConvertError::EngineNotFound {
                tried: Vec::new(),
            },
        }
    }
}

/// Structured failure returned to the response layer. Never carries a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionFailure {
    pub success: bool,
    pub error_kind: ErrorKind,
    pub human_message: String,
    pub route_key: String,
}
