//! The conversion orchestrator.
//!
//! [`Converter::convert`] drives one request through the full state
//! machine:
//!
//! ```text
//! route lookup ─▶ remote check ─▶ acquire dir ─▶ resolve engine ─▶ write input
//!      ─▶ strategy chain ─▶ read artifact ─▶ validate ─▶ encode ─▶ release dir
//! ```
//!
//! Route checks happen before anything touches the filesystem, so an unknown
//! or remote route never creates a work directory. From the moment a
//! directory is acquired it is owned by a [`WorkDirectory`] guard and is
//! removed exactly once whichever step fails, including when the caller
//! drops the future.

use crate::config::ConverterConfig;
use crate::error::ConvertError;
use crate::output::{mime_from_extension, ConversionResult};
use crate::pipeline::encode::encode_payload;
use crate::pipeline::strategy::{run_chain, strategies_for, AttemptContext};
use crate::pipeline::validate::validate_output;
use crate::pipeline::workdir::WorkDirectory;
use crate::profile::ConversionProfile;
use crate::progress::{ConversionStage, Observer};
use crate::request::ConversionRequest;
use soffice_locate::EngineLocator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Shared, cheaply clonable orchestrator.
///
/// Holds the immutable configuration and the engine locator (whose
/// last-known-good cache is the only state shared between requests).
/// Safe to call concurrently from many tasks.
#[derive(Debug, Clone)]
pub struct Converter {
    config: Arc<ConverterConfig>,
    locator: Arc<EngineLocator>,
}

impl Converter {
    pub fn new(config: ConverterConfig) -> Self {
        let locator = EngineLocator::new(config.engine_candidates.clone(), config.probe_timeout);
        Self {
            config: Arc::new(config),
            locator: Arc::new(locator),
        }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn locator(&self) -> &EngineLocator {
        &self.locator
    }

    fn observer(&self) -> &Observer {
        &self.config.observer
    }

    /// Resolve the engine and return its path and `--version` banner.
    pub async fn check_engine(&self) -> Result<(PathBuf, String), ConvertError> {
        let engine = self.locator.resolve().await?;
        let version = soffice_locate::probe(&engine, self.config.probe_timeout)
            .await
            .map_err(|why| ConvertError::EngineNotFound {
                tried: vec![format!("{} ({why})", engine.display())],
            })?;
        Ok((engine, version))
    }

    /// Read `path` and convert it along `route_key`.
    pub async fn convert_path(
        &self,
        path: &Path,
        route_key: &str,
    ) -> Result<ConversionResult, ConvertError> {
        let request = ConversionRequest::from_path(path, route_key).await?;
        self.convert(&request).await
    }

    /// Convert one request.
    ///
    /// # Errors
    /// - [`ConvertError::UnsupportedRoute`] / [`ConvertError::RemoteRoute`]
    ///   before any filesystem work.
    /// - [`ConvertError::WorkDirectoryUnavailable`] if the sandbox cannot be
    ///   created or written.
    /// - [`ConvertError::EngineNotFound`] if no engine candidate responds.
    /// - [`ConvertError::ConversionTimeout`] / [`ConvertError::EngineExecutionError`]
    ///   from the last strategy in the chain.
    /// - [`ConvertError::OutputMissing`] / [`ConvertError::OutputEmpty`] /
    ///   [`ConvertError::OutputCorrupt`] from output checks.
    pub async fn convert(
        &self,
        request: &ConversionRequest,
    ) -> Result<ConversionResult, ConvertError> {
        let started = Instant::now();

        // ── Step 1: Route lookup (no side effects) ───────────────────────
        let profile = self.config.profiles.lookup(&request.route_key)?.clone();
        let route = profile.route;
        if !profile.is_local() {
            return Err(ConvertError::RemoteRoute {
                route,
                backend_url: self.config.remote_backend_url.clone(),
            });
        }
        self.observer().on_stage(route, ConversionStage::Idle);
        info!(
            "[{route}] converting {} ({} bytes)",
            request.original_filename,
            request.bytes.len()
        );

        // ── Step 2: Sandbox ──────────────────────────────────────────────
        let workdir = WorkDirectory::acquire(&self.config.temp_root, Arc::clone(self.observer()))?;
        self.observer().on_stage(route, ConversionStage::DirAcquired);

        let outcome = self.convert_in(&workdir, &profile, request, started).await;

        // ── Step 9: Release (exactly once, errors logged) ────────────────
        workdir.release();
        self.observer().on_stage(route, ConversionStage::DirReleased);

        match &outcome {
            Ok(result) => info!(
                "[{route}] {} → {} ({} bytes, {}ms, via {})",
                result.original_filename,
                result.output_filename,
                result.output_size_bytes,
                result.duration_ms,
                result.produced_by
            ),
            Err(e) => warn!("[{route}] conversion of {} failed: {e}", request.original_filename),
        }
        outcome
    }

    async fn convert_in(
        &self,
        workdir: &WorkDirectory,
        profile: &ConversionProfile,
        request: &ConversionRequest,
        started: Instant,
    ) -> Result<ConversionResult, ConvertError> {
        let route = profile.route;
        let observer = self.observer();

        // ── Step 3: Engine ───────────────────────────────────────────────
        let engine = self.locator.resolve().await?;
        debug!("[{route}] engine: {}", engine.display());
        observer.on_stage(route, ConversionStage::BinaryResolved);

        // ── Step 4: Input ────────────────────────────────────────────────
        let input_name = request.original_filename.as_str();
        let input_path = workdir.write_input(input_name, &request.bytes).await?;

        // ── Step 5: Strategy chain ───────────────────────────────────────
        let strategies = strategies_for(profile, &self.config);
        let output_dir = workdir.output_dir();
        let ctx = AttemptContext {
            route,
            profile,
            config: &self.config,
            workdir: workdir.path(),
            output_dir: &output_dir,
            input_path: &input_path,
            input_name,
            engine: &engine,
        };
        let artifact = run_chain(&strategies, &ctx, observer).await?;
        observer.on_stage(route, ConversionStage::OutputResolved);

        // ── Step 6: Validate ─────────────────────────────────────────────
        let bytes = tokio::fs::read(&artifact.path)
            .await
            .map_err(|e| ConvertError::WorkDirectoryUnavailable {
                path: artifact.path.clone(),
                source: e,
            })?;
        let report = validate_output(&artifact.path, &bytes, profile.targets_pdf())?;
        observer.on_stage(route, ConversionStage::OutputValidated);

        // ── Step 7: Encode ───────────────────────────────────────────────
        let encoded = encode_payload(&bytes);
        observer.on_stage(route, ConversionStage::Encoded);

        // ── Step 8: Result ───────────────────────────────────────────────
        let output_filename = artifact
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut warnings = report.warnings;
        warnings.extend(encoded.warning);

        Ok(ConversionResult {
            output_mime_type: mime_from_extension(&output_filename).to_string(),
            output_filename,
            output_size_bytes: report.size,
            encoded_payload: encoded.data,
            original_filename: request.original_filename.clone(),
            original_mime_type: mime_from_extension(&request.original_filename).to_string(),
            original_size_bytes: request.size(),
            route: route.to_string(),
            produced_by: artifact.produced_by.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            warnings,
        })
    }
}

/// Synchronous wrapper around [`Converter::convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    converter: &Converter,
    request: &ConversionRequest,
) -> Result<ConversionResult, ConvertError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ConvertError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(converter.convert(request))
}
