//! Output validator.
//!
//! Headless engines can exit 0 having written a zero-byte or partial file
//! under resource pressure. Empty files and PDFs without the `%PDF`
//! signature are rejected; a missing `%%EOF` trailer or a tiny file is
//! reported as a warning only.

use crate::error::ConvertError;
use std::path::Path;
use tracing::{debug, warn};

const PDF_MAGIC: &[u8; 4] = b"%PDF";
const PDF_EOF_MARKER: &[u8] = b"%%EOF";
/// Trailing window searched for the EOF marker. Writers may append a few
/// whitespace bytes or an incremental-update trailer after it.
const EOF_WINDOW: usize = 1024;
/// Rendered documents below this size are suspicious.
const SMALL_PDF_BYTES: u64 = 1024;

/// Outcome of a successful validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub size: u64,
    pub warnings: Vec<String>,
}

/// Validate artifact `bytes` read from `path`.
pub fn validate_output(
    path: &Path,
    bytes: &[u8],
    is_pdf: bool,
) -> Result<ValidationReport, ConvertError> {
    if bytes.is_empty() {
        return Err(ConvertError::OutputEmpty {
            path: path.to_path_buf(),
        });
    }
    let mut report = ValidationReport {
        size: bytes.len() as u64,
        warnings: Vec::new(),
    };
    if !is_pdf {
        return Ok(report);
    }

    if bytes.len() < PDF_MAGIC.len() || &bytes[..PDF_MAGIC.len()] != PDF_MAGIC {
        return Err(ConvertError::OutputCorrupt {
            path: path.to_path_buf(),
            magic: bytes[..bytes.len().min(PDF_MAGIC.len())].to_vec(),
        });
    }

    let tail = &bytes[bytes.len().saturating_sub(EOF_WINDOW)..];
    let has_eof = tail.windows(PDF_EOF_MARKER.len()).any(|w| w == PDF_EOF_MARKER);
    if !has_eof {
        let msg = format!(
            "PDF '{}' has no %%EOF marker in its last {EOF_WINDOW} bytes; it may be truncated",
            path.display()
        );
        warn!("{msg}");
        report.warnings.push(msg);
    }
    if report.size < SMALL_PDF_BYTES {
        let msg = format!(
            "PDF '{}' is very small ({} bytes); it may be incomplete",
            path.display(),
            report.size
        );
        warn!("{msg}");
        report.warnings.push(msg);
    }

    debug!(
        "PDF validation: size={} eof={has_eof} path={}",
        report.size,
        path.display()
    );
    Ok(report)
}
