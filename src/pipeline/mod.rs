//! Pipeline stages for one conversion request.
//!
//! Each submodule implements exactly one step of the orchestrator and is
//! independently testable.
//!
//! ## Data Flow
//!
//! ```text
//! workdir ──▶ strategy ──▶ invoke ──▶ resolve ──▶ validate ──▶ encode
//! (sandbox)   (chain)     (process)  (find file)  (%PDF)     (base64)
//! ```
//!
//! 1. [`workdir`]  — per-request scratch directory, removed on every exit path
//! 2. [`strategy`] — ordered engines: UNO page-setup script, then `soffice`
//! 3. [`invoke`]   — one subprocess under a hard deadline, process-group kill,
//!    bounded capture
//! 4. [`resolve`]  — locate the artifact, waiting for it to stop growing
//! 5. [`validate`] — reject empty or non-PDF output, warn on truncation signs
//! 6. [`encode`]   — base64 with an expansion-ratio sanity check

pub mod encode;
pub mod invoke;
pub mod resolve;
pub mod strategy;
pub mod validate;
pub mod workdir;
