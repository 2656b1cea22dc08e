//! Conversion results and the outbound response envelope.

use crate::error::ConvertError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A validated, transport-ready conversion result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResult {
    pub output_filename: String,
    pub output_mime_type: String,
    pub output_size_bytes: u64,
    /// Base64 (standard alphabet, padded) of the output file.
    pub encoded_payload: String,
    pub original_filename: String,
    pub original_mime_type: String,
    pub original_size_bytes: u64,
    pub route: String,
    /// Name of the strategy that produced the artifact, e.g. `soffice`.
    pub produced_by: String,
    pub duration_ms: u64,
    /// Non-fatal validation and encoding findings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ConversionResult {
    /// Decode the payload back into raw output bytes.
    pub fn decode_payload(&self) -> Result<Vec<u8>, ConvertError> {
        STANDARD
            .decode(self.encoded_payload.as_bytes())
            .map_err(|e| ConvertError::Internal(format!("payload is not valid base64: {e}")))
    }

    /// Build the `{success, output, original}` response envelope.
    pub fn to_response(&self) -> ConversionResponse {
        ConversionResponse {
            success: true,
            output: OutputDescriptor {
                filename: self.output_filename.clone(),
                mimetype: self.output_mime_type.clone(),
                size: self.output_size_bytes,
                data: self.encoded_payload.clone(),
            },
            original: OriginalDescriptor {
                filename: self.original_filename.clone(),
                mimetype: self.original_mime_type.clone(),
                size: self.original_size_bytes,
            },
        }
    }
}

/// JSON envelope returned to HTTP clients on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResponse {
    pub success: bool,
    pub output: OutputDescriptor,
    pub original: OriginalDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    pub filename: String,
    pub mimetype: String,
    pub size: u64,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalDescriptor {
    pub filename: String,
    pub mimetype: String,
    pub size: u64,
}

/// MIME type for a filename, by extension (case-insensitive).
pub fn mime_from_extension(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "doc" => "application/msword",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "ppt" => "application/vnd.ms-powerpoint",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xls" => "application/vnd.ms-excel",
        "html" | "htm" => "text/html",
        _ => "application/octet-stream",
    }
}
