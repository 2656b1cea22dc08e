//! # edgequake-docconv
//!
//! Convert office documents (Word, Excel, PowerPoint, HTML) to PDF by
//! driving a headless LibreOffice as a sandboxed subprocess.
//!
//! ## Why this crate?
//!
//! Calling `soffice --convert-to pdf` from a server looks trivial and is
//! not. Concurrent calls fight over one user profile, a wedged conversion
//! hangs forever and leaves `soffice.bin` behind, the engine exits 0 after
//! writing a zero-byte file, and spreadsheets come out with charts split
//! across pages. This crate wraps the engine in an orchestrator that gives
//! every request its own scratch directory and profile, kills the whole
//! process group on timeout, finds and validates the artifact, and always
//! cleans up.
//!
//! ## Pipeline Overview
//!
//! ```text
//! (bytes, filename, route)
//!  │
//!  ├─ 1. Profile   route → export filter, timeout, fallback eligibility
//!  ├─ 2. Sandbox   private conv-XXXXXX directory (HOME and profile inside)
//!  ├─ 3. Engine    probe soffice / libreoffice candidates (cached)
//!  ├─ 4. Convert   [UNO page-setup script →] soffice --convert-to
//!  ├─ 5. Resolve   expected name, else scan by extension; wait until stable
//!  ├─ 6. Validate  non-empty, %PDF signature, %%EOF / size warnings
//!  ├─ 7. Encode    base64 with truncation check
//!  └─ 8. Release   directory removed on every path, exactly once
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docconv::{Converter, ConverterConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let converter = Converter::new(ConverterConfig::from_env().build()?);
//!     let result = converter.convert_path(Path::new("report.docx"), "word-to-pdf").await?;
//!     std::fs::write(&result.output_filename, result.decode_payload()?)?;
//!     eprintln!("{} bytes in {}ms", result.output_size_bytes, result.duration_ms);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docconv` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-docconv = { version = "0.1", default-features = false }
//! ```
//!
//! ## Routes
//!
//! | Route | Where | Export filter |
//! |-------|-------|---------------|
//! | `word-to-pdf` | local | `writer_pdf_Export` |
//! | `ppt-to-pdf` | local | `impress_pdf_Export` |
//! | `excel-to-pdf` | local (script first) | `calc_pdf_Export` + single-page sheets |
//! | `html-to-pdf`, `htm-to-pdf` | local | `writer_web_pdf_Export` |
//! | `pdf-to-word`, `pdf-to-ppt`, `pdf-to-excel` | remote backend | — |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod profile;
pub mod progress;
pub mod remote;
pub mod request;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConverterConfig, ConverterConfigBuilder, FallbackSettings, OutputSettle};
pub use convert::{convert_sync, Converter};
pub use error::{ConversionFailure, ConvertError, ErrorKind};
pub use output::{mime_from_extension, ConversionResponse, ConversionResult};
pub use profile::{ConversionProfile, ExecutionSite, ProfileTable, RouteKey};
pub use progress::{ConversionObserver, ConversionStage, NoopObserver, Observer};
pub use remote::RemoteBackend;
pub use request::ConversionRequest;
pub use stream::{convert_many, convert_stream, ConversionStream};
