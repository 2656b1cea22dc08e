//! Output resolver: find the artifact an engine wrote into the output
//! directory of a request.
//!
//! The engine names its output `<input stem>.<target ext>`. That name is
//! checked first; failing that, the top level of the directory is scanned
//! for any other file with the target extension. The output directory holds
//! nothing but engine artifacts, so whatever name the caller gave the input
//! it can never be mistaken for one.
//!
//! Engine exit does not guarantee the file is fully on disk, so the
//! resolver polls with a doubling interval (bounded by
//! [`OutputSettle::budget`]) until a candidate appears and its size stops
//! changing.

use crate::config::OutputSettle;
use crate::error::ConvertError;
use futures::StreamExt;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio_stream::wrappers::ReadDirStream;
use tracing::debug;

/// One directory entry, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    /// `None` when the entry could not be stat'ed.
    pub size: Option<u64>,
}

impl fmt::Display for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.size {
            Some(n) => write!(f, "{} ({n} bytes)", self.name),
            None => write!(f, "{} (size unknown)", self.name),
        }
    }
}

/// `<input stem>.<ext>`, e.g. `Q3 report.xlsx` → `Q3 report.pdf`.
pub fn expected_output_name(input_name: &str, ext: &str) -> String {
    let stem = Path::new(input_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| input_name.to_string());
    format!("{stem}.{ext}")
}

/// Top-level files of `dir`, sorted by name. Subdirectories are skipped.
pub async fn list_entries(dir: &Path) -> Vec<FileEntry> {
    let Ok(rd) = tokio::fs::read_dir(dir).await else {
        return Vec::new();
    };
    let mut entries: Vec<FileEntry> = ReadDirStream::new(rd)
        .filter_map(|e| async move { e.ok() })
        .filter_map(|e| async move {
            let meta = e.metadata().await.ok();
            if meta.as_ref().is_some_and(|m| m.is_dir()) {
                return None;
            }
            Some(FileEntry {
                name: e.file_name().to_string_lossy().into_owned(),
                size: meta.map(|m| m.len()),
            })
        })
        .collect()
        .await;
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

/// Case-insensitive extension match. Unlike [`Path::extension`], a bare
/// `.pdf` counts: engines name the output of a dot-file input that way.
fn has_extension(name: &str, ext: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, e)| e.eq_ignore_ascii_case(ext))
}

/// Files in `dir` that could be the artifact. The expected name, when
/// present, comes first.
async fn candidates(dir: &Path, expected: &str, ext: &str) -> Vec<FileEntry> {
    let mut found: Vec<FileEntry> = list_entries(dir)
        .await
        .into_iter()
        .filter(|e| has_extension(&e.name, ext))
        .collect();
    if let Some(pos) = found.iter().position(|e| e.name == expected) {
        let hit = found.remove(pos);
        found.insert(0, hit);
    }
    found
}

/// Locate the artifact for `input_name` with extension `ext` in the output
/// directory `dir`.
///
/// Returns [`ConvertError::OutputMissing`] with a full directory listing if
/// nothing turns up within the settle budget.
pub async fn locate_output(
    dir: &Path,
    input_name: &str,
    ext: &str,
    settle: &OutputSettle,
) -> Result<PathBuf, ConvertError> {
    let expected = expected_output_name(input_name, ext);

    let started = Instant::now();
    let mut interval = settle.initial_interval;
    loop {
        if let Some(hit) = candidates(dir, &expected, ext).await.into_iter().next() {
            if hit.name != expected {
                debug!("Expected {expected}, using {}", hit.name);
            }
            let path = dir.join(&hit.name);
            wait_for_stable(&path, settle, started).await;
            return Ok(path);
        }
        if started.elapsed() >= settle.budget {
            break;
        }
        tokio::time::sleep(interval).await;
        interval = (interval * 2).min(settle.max_interval);
    }

    let found = list_entries(dir).await;
    debug!(
        "No .{ext} output in {}: {}",
        dir.display(),
        found.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
    );
    Err(ConvertError::OutputMissing {
        expected,
        extension: ext.to_string(),
        input: input_name.to_string(),
        found,
    })
}

/// Wait until `path` is non-empty and its size is unchanged across two
/// consecutive polls, or until the budget (measured from `started`) runs out.
pub async fn wait_for_stable(path: &Path, settle: &OutputSettle, started: Instant) -> Option<u64> {
    let mut interval = settle.initial_interval;
    let mut last: Option<u64> = None;
    loop {
        let size = tokio::fs::metadata(path).await.ok().map(|m| m.len());
        if let (Some(now), Some(prev)) = (size, last) {
            if now > 0 && now == prev {
                return Some(now);
            }
        }
        if started.elapsed() >= settle.budget {
            debug!("{} did not settle within budget", path.display());
            return size;
        }
        last = size;
        tokio::time::sleep(interval).await;
        interval = (interval * 2).min(settle.max_interval);
    }
}

/// Empty the output directory `dir`.
///
/// Used after a failed strategy so its partial artifact can never be
/// mistaken for the next strategy's output.
pub async fn purge_outputs(dir: &Path) {
    for entry in list_entries(dir).await {
        let path = dir.join(&entry.name);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!("Could not remove stale {}: {e}", path.display());
        }
    }
}
