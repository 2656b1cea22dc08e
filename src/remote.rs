//! Client for the remote conversion backend that serves PDF → Office routes.
//!
//! The orchestrator never converts `pdf-to-word`, `pdf-to-ppt` or
//! `pdf-to-excel` locally; it rejects them with
//! [`ConvertError::RemoteRoute`]. Callers that want to follow that redirect
//! (the CLI with `--follow-remote`) use [`RemoteBackend`], which uploads the
//! file as `multipart/form-data` to `{base}/convert/{route}` and maps the
//! JSON reply `{success, filename, format?, size, file}` into the same
//! [`ConversionResult`] a local conversion returns.

use crate::error::ConvertError;
use crate::output::{mime_from_extension, ConversionResult};
use crate::pipeline::resolve::expected_output_name;
use crate::profile::RouteKey;
use crate::request::ConversionRequest;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Reply body of the remote backend. Error replies carry `detail` (or
/// `error`) and no payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteResponse {
    #[serde(default)]
    pub success: bool,
    pub filename: Option<String>,
    pub format: Option<String>,
    pub size: Option<u64>,
    pub file: Option<String>,
    pub error: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RemoteBackend {
    base_url: String,
    client: reqwest::Client,
}

impl RemoteBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ConvertError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConvertError::RemoteBackend {
                url: base_url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self { base_url, client })
    }

    pub fn endpoint(&self, route: RouteKey) -> String {
        format!("{}/convert/{}", self.base_url, route)
    }

    /// Upload `request` and return the converted document.
    ///
    /// Only remote routes are accepted; anything else is a local route and
    /// fails with [`ConvertError::InvalidConfig`].
    pub async fn convert(
        &self,
        request: &ConversionRequest,
    ) -> Result<ConversionResult, ConvertError> {
        let started = Instant::now();
        let route: RouteKey = request.route_key.parse()?;
        if !matches!(route, RouteKey::PdfToWord | RouteKey::PdfToPpt | RouteKey::PdfToExcel) {
            return Err(ConvertError::InvalidConfig(format!(
                "route '{route}' is converted locally, not by the remote backend"
            )));
        }

        let url = self.endpoint(route);
        let fail = |reason: String| ConvertError::RemoteBackend {
            url: url.clone(),
            reason,
        };
        let original_mime = mime_from_extension(&request.original_filename);
        info!(
            "Calling remote backend {url} ({}, {} bytes)",
            request.original_filename,
            request.bytes.len()
        );

        let part = reqwest::multipart::Part::bytes(request.bytes.clone())
            .file_name(request.original_filename.clone())
            .mime_str(original_mime)
            .map_err(|e| fail(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    fail("request timed out".into())
                } else {
                    fail(e.to_string())
                }
            })?;
        let status = response.status();
        let text = response.text().await.map_err(|e| fail(e.to_string()))?;
        debug!(
            "Remote backend replied {status}: {}",
            text.chars().take(200).collect::<String>()
        );

        let body: RemoteResponse = serde_json::from_str(&text).map_err(|e| {
            if status.is_success() {
                fail(format!("unparseable reply: {e}"))
            } else {
                fail(format!("HTTP {status}: {}", text.trim()))
            }
        })?;
        if !status.is_success() && body.success {
            return Err(fail(format!("HTTP {status}")));
        }

        let mut result = into_result(body, request, route).map_err(fail)?;
        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }
}

/// Map a backend reply into a [`ConversionResult`]; `Err` carries the
/// reason the reply is unusable.
pub fn into_result(
    body: RemoteResponse,
    request: &ConversionRequest,
    route: RouteKey,
) -> Result<ConversionResult, String> {
    if !body.success {
        return Err(body
            .error
            .or(body.detail)
            .unwrap_or_else(|| "remote conversion failed".to_string()));
    }
    let payload = body.file.ok_or("reply has no file payload")?;
    let decoded_len = STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| format!("payload is not valid base64: {e}"))?
        .len() as u64;
    if decoded_len == 0 {
        return Err("remote backend returned an empty file".into());
    }

    let output_filename = body.filename.unwrap_or_else(|| {
        expected_output_name(&request.original_filename, route_extension(route))
    });
    let output_mime_type = body
        .format
        .filter(|f| f.contains('/'))
        .unwrap_or_else(|| mime_from_extension(&output_filename).to_string());

    Ok(ConversionResult {
        output_filename,
        output_mime_type,
        output_size_bytes: body.size.unwrap_or(decoded_len),
        encoded_payload: payload,
        original_filename: request.original_filename.clone(),
        original_mime_type: mime_from_extension(&request.original_filename).to_string(),
        original_size_bytes: request.size(),
        route: route.to_string(),
        produced_by: "remote".to_string(),
        duration_ms: 0,
        warnings: Vec::new(),
    })
}

fn route_extension(route: RouteKey) -> &'static str {
    match route {
        RouteKey::PdfToWord => "docx",
        RouteKey::PdfToPpt => "pptx",
        RouteKey::PdfToExcel => "xlsx",
        _ => "pdf",
    }
}
