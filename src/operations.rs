//! Filesystem operation abstractions for dependency injection.
//!
//! The engine only ever asks two things of the filesystem about artifacts it
//! already produced: does it still exist, and remove it.  Routing both
//! through [`FileSystemOps`] lets the engine's failure handling be tested
//! without real permission errors.

use std::path::Path;

/// Abstraction over the artifact queries made by the engine.
pub trait FileSystemOps: Send + Sync + std::fmt::Debug {
    /// Returns `true` if `path` exists (a dangling symlink counts as existing).
    fn exists(&self, path: &Path) -> bool;

    /// Remove the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; callers decide whether
    /// [`std::io::ErrorKind::NotFound`] is acceptable.
    fn remove_file(&self, path: &Path) -> std::io::Result<()>;
}

/// Production [`FileSystemOps`] implementation that delegates to [`std::fs`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFileSystemOps;

impl FileSystemOps for SystemFileSystemOps {
    fn exists(&self, path: &Path) -> bool {
        path.symlink_metadata().is_ok()
    }

    fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        std::fs::remove_file(path)
    }
}

/// Mock [`FileSystemOps`] for unit tests.
///
/// Paths registered with [`with_file`](Self::with_file) exist until removed;
/// paths registered with [`with_locked`](Self::with_locked) exist and refuse
/// removal with `PermissionDenied`.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockFileSystemOps {
    files: std::sync::Mutex<std::collections::HashSet<std::path::PathBuf>>,
    locked: std::sync::Mutex<std::collections::HashSet<std::path::PathBuf>>,
}

#[cfg(test)]
impl MockFileSystemOps {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `path` as an existing, removable file.
    #[must_use]
    pub fn with_file(self, path: impl Into<std::path::PathBuf>) -> Self {
        if let Ok(mut files) = self.files.lock() {
            files.insert(path.into());
        }
        self
    }

    /// Mark `path` as an existing file that cannot be removed.
    #[must_use]
    pub fn with_locked(self, path: impl Into<std::path::PathBuf>) -> Self {
        let p = path.into();
        if let Ok(mut files) = self.files.lock() {
            files.insert(p.clone());
        }
        if let Ok(mut locked) = self.locked.lock() {
            locked.insert(p);
        }
        self
    }

    /// Allow a previously locked path to be removed.
    pub fn unlock(&self, path: &Path) {
        if let Ok(mut locked) = self.locked.lock() {
            locked.remove(path);
        }
    }
}

#[cfg(test)]
impl FileSystemOps for MockFileSystemOps {
    fn exists(&self, path: &Path) -> bool {
        self.files.lock().is_ok_and(|files| files.contains(path))
    }

    fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        if self.locked.lock().is_ok_and(|locked| locked.contains(path)) {
            return Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        }
        let removed = self
            .files
            .lock()
            .map_err(|_| std::io::Error::other("mock files poisoned"))?
            .remove(path);
        if removed {
            Ok(())
        } else {
            Err(std::io::Error::from(std::io::ErrorKind::NotFound))
        }
    }
}
