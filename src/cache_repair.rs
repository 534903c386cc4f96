//! Build-cache repair run before compiler commands are replayed.
//!
//! Replayed commands read headers, module maps and swiftmodules from the
//! build products directory of the original build. Archiving can leave
//! symlinks there pointing into intermediate locations Xcode has since
//! removed, and a compiler following one fails with a confusing
//! "file not found". The repair hook runs once, before execution, and never
//! during a dry run.

use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A pre-execution fix applied to the build cache.
pub trait CacheRepair {
    /// Apply the repair.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] when the cache cannot be inspected or fixed.
    /// The pipeline logs the failure and continues.
    fn repair(&self) -> io::Result<()>;
}

/// Repair that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRepair;

impl CacheRepair for NoopRepair {
    fn repair(&self) -> io::Result<()> {
        debug!("no build cache to repair");
        Ok(())
    }
}

/// Removes dangling symlinks below a build products directory so compilers
/// fall back to their search paths instead of failing on a broken link.
#[derive(Debug, Clone)]
pub struct DanglingSymlinkRepair {
    root: PathBuf,
}

impl DanglingSymlinkRepair {
    /// Repair the tree rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl CacheRepair for DanglingSymlinkRepair {
    fn repair(&self) -> io::Result<()> {
        if !self.root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("build cache {} does not exist", self.root.display()),
            ));
        }
        let mut removed = 0_usize;
        for item in WalkDir::new(&self.root).follow_links(false) {
            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable build cache entry");
                    continue;
                }
            };
            if !entry.path_is_symlink() || entry.path().exists() {
                continue;
            }
            fs::remove_file(entry.path())?;
            debug!(path = %entry.path().display(), "removed dangling symlink");
            removed += 1;
        }
        info!(root = %self.root.display(), removed, "repaired build cache");
        Ok(())
    }
}
