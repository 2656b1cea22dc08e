//! Per-request scratch directories.
//!
//! ## Why a guard type?
//!
//! Every request writes its input, the engine's user profile and the output
//! artifact into one private directory:
//!
//! ```text
//! conv-XXXXXX/          HOME, engine profiles, page-setup script
//! ├── in/<filename>     the caller's document, under the caller's name
//! └── out/              engine --outdir; nothing else is ever written here
//! ```
//!
//! Keeping the input and the artifacts apart means no caller-chosen file
//! name can shadow the expected output or a profile directory.
//!
//! The directory must disappear on every exit path: success, validation failure, timeout, panic, or the
//! caller dropping the future mid-conversion. [`WorkDirectory`] owns a
//! [`TempDir`] and removes it either through [`WorkDirectory::release`] or,
//! if that never runs, in `Drop`. Either way the removal happens once and a
//! removal failure is logged, never returned.

use crate::error::ConvertError;
use crate::progress::Observer;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

const INPUT_DIR: &str = "in";
const OUTPUT_DIR: &str = "out";

/// An exclusively-owned, uniquely-named scratch directory.
pub struct WorkDirectory {
    dir: Option<TempDir>,
    path: PathBuf,
    observer: Observer,
}

impl WorkDirectory {
    /// Create a fresh `conv-XXXXXX` directory under `root`.
    pub fn acquire(root: &Path, observer: Observer) -> Result<Self, ConvertError> {
        let unavailable = |e| ConvertError::WorkDirectoryUnavailable {
            path: root.to_path_buf(),
            source: e,
        };
        std::fs::create_dir_all(root).map_err(unavailable)?;
        // Engine profile URLs must be absolute.
        let root = std::fs::canonicalize(root).map_err(unavailable)?;
        let dir = tempfile::Builder::new()
            .prefix("conv-")
            .tempdir_in(&root)
            .map_err(unavailable)?;
        let path = dir.path().to_path_buf();
        for sub in [INPUT_DIR, OUTPUT_DIR] {
            std::fs::create_dir(path.join(sub)).map_err(|e| ConvertError::WorkDirectoryUnavailable {
                path: path.join(sub),
                source: e,
            })?;
        }
        debug!("Acquired work directory {}", path.display());
        observer.on_workdir_acquired(&path);
        Ok(Self {
            dir: Some(dir),
            path,
            observer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding only the request's input file.
    pub fn input_dir(&self) -> PathBuf {
        self.path.join(INPUT_DIR)
    }

    /// Directory the engines write their artifacts into.
    pub fn output_dir(&self) -> PathBuf {
        self.path.join(OUTPUT_DIR)
    }

    /// Write the request's input file into [`Self::input_dir`] and return
    /// its path.
    pub async fn write_input(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, ConvertError> {
        let path = self.input_dir().join(name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ConvertError::WorkDirectoryUnavailable {
                path: path.clone(),
                source: e,
            })?;
        Ok(path)
    }

    /// Recursively delete the directory. Errors are logged, not returned.
    pub fn release(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        if let Err(e) = dir.close() {
            warn!("Failed to remove work directory {}: {e}", self.path.display());
        } else {
            debug!("Released work directory {}", self.path.display());
        }
        self.observer.on_workdir_released(&self.path);
    }
}

impl Drop for WorkDirectory {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for WorkDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkDirectory")
            .field("path", &self.path)
            .field("released", &self.dir.is_none())
            .finish()
    }
}
