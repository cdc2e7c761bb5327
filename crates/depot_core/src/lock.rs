//! Single-winner file creation and process-level locks.

use crate::backend::Backend;
use crate::error::{DepotError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Token proving this process won creation of a unique file.
///
/// On backends with hard links the token owns a witness file whose link
/// count was probed at creation time; the witness must live as long as the
/// logical lock, so it is only removed when the token drops.
pub struct LockToken {
    backend: Arc<dyn Backend>,
    target: PathBuf,
    witness: Option<PathBuf>,
}

impl LockToken {
    /// Path of the file this token owns.
    pub fn path(&self) -> &Path {
        &self.target
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        if let Some(witness) = &self.witness {
            if let Err(e) = self.backend.remove_file(witness) {
                warn!("failed to remove lock witness {}: {}", witness.display(), e);
            }
        }
        if let Err(e) = self.backend.remove_file(&self.target) {
            warn!("failed to remove lock file {}: {}", self.target.display(), e);
        }
    }
}

/// Creates `path` such that exactly one concurrent caller succeeds, even on
/// storage with weak create-exclusive semantics.
///
/// Strategy: write a uniquely named witness next to the target, hard-link it
/// to the target and accept only when the witness's link count is exactly
/// two. Backends that decline hard links fall back to plain exclusive
/// creation.
pub fn create_unique_file(backend: &Arc<dyn Backend>, path: &Path) -> Result<LockToken> {
    let unavailable = || DepotError::LockUnavailable {
        path: path.to_path_buf(),
    };

    if !backend.supports_hard_links() {
        backend.create_new(path).map_err(|_| unavailable())?;
        return Ok(LockToken {
            backend: Arc::clone(backend),
            target: path.to_path_buf(),
            witness: None,
        });
    }

    let witness = path.with_extension(format!("w{}", uuid::Uuid::new_v4().simple()));
    backend.write(&witness, uuid::Uuid::new_v4().as_bytes())?;

    if backend.hard_link(&witness, path).is_err() {
        let _ = backend.remove_file(&witness);
        return Err(unavailable());
    }

    match backend.link_count(&witness) {
        Ok(2) => Ok(LockToken {
            backend: Arc::clone(backend),
            target: path.to_path_buf(),
            witness: Some(witness),
        }),
        _ => {
            let _ = backend.remove_file(path);
            let _ = backend.remove_file(&witness);
            Err(unavailable())
        }
    }
}

/// Advisory exclusive lock over a local lock file.
///
/// Serializes maintenance runs on one store: two GC invocations on the same
/// repository must never execute concurrently, and this is how the command
/// layer enforces that.
pub struct GcLock {
    file: File,
    path: PathBuf,
}

impl GcLock {
    /// Acquires the lock, failing immediately when it is already held.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).write(true).open(path)?;
        file.try_lock_exclusive()
            .map_err(|_| DepotError::LockUnavailable {
                path: path.to_path_buf(),
            })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for GcLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use tempfile::TempDir;

    #[test]
    fn test_unique_file_single_winner() {
        let tmp = TempDir::new().unwrap();
        let backend: Arc<dyn Backend> = Arc::new(LocalBackend::new(tmp.path()));

        let token = create_unique_file(&backend, Path::new("stamp")).unwrap();
        assert!(backend.exists(Path::new("stamp")));

        // Second creation loses while the token lives.
        assert!(matches!(
            create_unique_file(&backend, Path::new("stamp")),
            Err(DepotError::LockUnavailable { .. })
        ));

        drop(token);
        assert!(!backend.exists(Path::new("stamp")));

        // Released: creation succeeds again.
        let token = create_unique_file(&backend, Path::new("stamp")).unwrap();
        drop(token);
    }

    #[test]
    fn test_witness_removed_on_drop() {
        let tmp = TempDir::new().unwrap();
        let backend: Arc<dyn Backend> = Arc::new(LocalBackend::new(tmp.path()));

        let token = create_unique_file(&backend, Path::new("w/stamp")).unwrap();
        drop(token);

        let leftovers = backend.read_dir(Path::new("w")).unwrap();
        assert!(leftovers.is_empty(), "leftover files: {:?}", leftovers);
    }

    #[test]
    fn test_gc_lock_excludes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("gc.lock");

        let lock = GcLock::acquire(&path).unwrap();
        assert!(matches!(
            GcLock::acquire(&path),
            Err(DepotError::LockUnavailable { .. })
        ));

        drop(lock);
        let lock = GcLock::acquire(&path).unwrap();
        drop(lock);
    }
}
