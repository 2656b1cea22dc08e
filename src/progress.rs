//! Observer trait for per-request lifecycle events.
//!
//! Inject an [`Arc<dyn ConversionObserver>`] via
//! [`crate::config::ConverterConfigBuilder::observer`] to see each request
//! move through the orchestrator state machine:
//!
//! ```text
//! Idle → DirAcquired → BinaryResolved → (FallbackAttempted)? → PrimaryInvoked
//!      → OutputResolved → OutputValidated → Encoded → DirReleased
//! ```
//!
//! Any state may jump straight to `DirReleased` carrying a failure;
//! `DirReleased` is reported exactly once per request that acquired a
//! work directory.
//!
//! # Example
//!
//! ```rust
//! use edgequake_docconv::{ConversionObserver, ConverterConfig};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! #[derive(Default)]
//! struct ReleaseCounter {
//!     released: AtomicUsize,
//! }
//!
//! impl ConversionObserver for ReleaseCounter {
//!     fn on_workdir_released(&self, _path: &Path) {
//!         self.released.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(ReleaseCounter::default());
//! let config = ConverterConfig::builder()
//!     .observer(counter.clone() as Arc<dyn ConversionObserver>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::ConvertError;
use crate::profile::RouteKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Orchestrator state for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversionStage {
    Idle,
    DirAcquired,
    BinaryResolved,
    FallbackAttempted,
    PrimaryInvoked,
    OutputResolved,
    OutputValidated,
    Encoded,
    DirReleased,
}

impl fmt::Display for ConversionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConversionStage::Idle => "queued",
            ConversionStage::DirAcquired => "preparing sandbox",
            ConversionStage::BinaryResolved => "engine ready",
            ConversionStage::FallbackAttempted => "page-setup engine",
            ConversionStage::PrimaryInvoked => "converting",
            ConversionStage::OutputResolved => "output found",
            ConversionStage::OutputValidated => "output verified",
            ConversionStage::Encoded => "encoded",
            ConversionStage::DirReleased => "cleaned up",
        };
        f.write_str(label)
    }
}

/// Called by the orchestrator as it processes each request.
///
/// Implementations must be `Send + Sync`: many requests may run
/// concurrently and all of them share the observer configured on the
/// [`crate::Converter`]. Every method has a no-op default.
pub trait ConversionObserver: Send + Sync {
    /// The request entered `stage`.
    fn on_stage(&self, route: RouteKey, stage: ConversionStage) {
        let _ = (route, stage);
    }

    /// A work directory was created at `path`.
    fn on_workdir_acquired(&self, path: &Path) {
        let _ = path;
    }

    /// The work directory at `path` was torn down (successfully or not).
    fn on_workdir_released(&self, path: &Path) {
        let _ = path;
    }

    /// A conversion strategy is about to run.
    fn on_strategy_attempt(&self, route: RouteKey, strategy: &str) {
        let _ = (route, strategy);
    }

    /// A strategy failed. For non-final strategies this failure is recovered.
    fn on_strategy_failed(&self, route: RouteKey, strategy: &str, error: &ConvertError) {
        let _ = (route, strategy, error);
    }
}

/// Default observer: ignores everything.
pub struct NoopObserver;

impl ConversionObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::ConverterConfig`].
pub type Observer = Arc<dyn ConversionObserver>;
