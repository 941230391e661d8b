use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use tempfile::{Builder, TempDir};

use crate::error::{Error, Result};

/// Per-run scratch directory, removed recursively when dropped.
///
/// Removal is best-effort: failures are logged and never surface.
#[derive(Debug)]
pub struct WorkDir {
    dir: Option<TempDir>,
    keep: bool,
}

impl WorkDir {
    /// Create a fresh, uniquely named directory under `root`.
    pub fn create(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .map_err(|e| Error::io(format!("Failed to create {}", root.display()), e))?;
        let dir = Builder::new()
            .prefix("hdrbridge-")
            .tempdir_in(root)
            .map_err(|e| {
                Error::io(format!("Failed to create work dir in {}", root.display()), e)
            })?;
        debug!("work dir {}", dir.path().display());
        Ok(Self {
            dir: Some(dir),
            keep: false,
        })
    }

    /// Leave the directory on disk when dropped.
    pub fn keep(&mut self, keep: bool) {
        self.keep = keep;
    }

    pub fn path(&self) -> &Path {
        self.dir.as_ref().map_or(Path::new(""), TempDir::path)
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path().join(name)
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        if self.keep {
            warn!("keeping work dir {}", dir.keep().display());
            return;
        }
        let path = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => debug!("removed work dir {}", path.display()),
            Err(e) => warn!("could not remove {}: {e}", path.display()),
        }
    }
}
