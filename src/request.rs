//! Inbound conversion requests.
//!
//! A request carries the raw source bytes, the caller-supplied filename and
//! the route key. The filename is reduced to its final path component on
//! construction so nothing a caller sends can place the input outside the
//! work directory.

use crate::error::ConvertError;
use std::path::Path;
use tracing::debug;

/// One document to convert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub bytes: Vec<u8>,
    /// Bare filename (no directory components), e.g. `report.docx`.
    pub original_filename: String,
    /// Raw route key. Validated by the orchestrator, not here, so that an
    /// unknown key still produces a structured failure.
    pub route_key: String,
}

impl ConversionRequest {
    pub fn new(bytes: Vec<u8>, original_filename: &str, route_key: impl Into<String>) -> Self {
        Self {
            bytes,
            original_filename: sanitize_filename(original_filename),
            route_key: route_key.into(),
        }
    }

    /// Read a local file into a request, keeping its file name.
    pub async fn from_path(
        path: &Path,
        route_key: impl Into<String>,
    ) -> Result<Self, ConvertError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ConvertError::InputUnreadable {
                path: path.to_path_buf(),
                source: e,
            })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!("Loaded {} ({} bytes)", path.display(), bytes.len());
        Ok(Self::new(bytes, &name, route_key))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Strip any directory components (either separator) from a caller filename.
///
/// Empty results and the special names `.` / `..` become `document`.
pub fn sanitize_filename(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim()
        .trim_matches('\0');
    match last {
        "" | "." | ".." => "document".to_string(),
        other => other.to_string(),
    }
}
