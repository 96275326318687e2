//! Artifact deletion.
//!
//! [`invalidate`] removes one source's artifact under every preset and never
//! stops early: a failure for one preset is recorded in the
//! [`InvalidationReport`] and the remaining presets are still attempted.
//! [`flush_all`] removes a whole cache tree.

use crate::layout::Layout;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// What happened to each artifact path during [`invalidate`].
#[derive(Debug, Default)]
pub struct InvalidationReport {
    pub removed: Vec<PathBuf>,
    /// Nothing was cached at these paths.
    pub absent: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, io::Error)>,
}

impl InvalidationReport {
    /// True if every artifact is gone.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Delete the artifact of `relative` for each preset in `presets`.
pub fn invalidate<'a>(
    layout: &Layout,
    presets: impl IntoIterator<Item = &'a str>,
    relative: &Path,
) -> InvalidationReport {
    let mut report = InvalidationReport::default();
    for preset in presets {
        let path = layout.cache_path(preset, relative);
        match fs::remove_file(&path) {
            Ok(()) => report.removed.push(path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => report.absent.push(path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not remove cached artifact");
                report.failed.push((path, e));
            }
        }
    }
    if !report.removed.is_empty() {
        info!(source = %relative.display(), removed = report.removed.len(), "invalidated");
    }
    report
}

/// Remove `root` and everything below it.
///
/// Returns `Ok(false)` if it did not exist.
pub fn flush_all(root: &Path) -> io::Result<bool> {
    match fs::remove_dir_all(root) {
        Ok(()) => {
            info!(path = %root.display(), "flushed cache");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
