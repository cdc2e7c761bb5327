//! Pluggable storage backends.

use crate::error::Result;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Abstraction of a storage backend.
///
/// A backend is a filesystem-like store that can live on the local machine,
/// a network filesystem, an object storage service, etc. All paths are
/// relative to the backend root. Backends may be weakly consistent; the
/// object database never mutates a published file in place.
pub trait Backend: Send + Sync {
    /// Creates the backend root if it does not exist yet.
    fn create(&self) -> Result<()>;

    /// Returns true if a path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Returns true if the path is a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Reads an entire file.
    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Reads `length` bytes starting at `offset`.
    fn seek_read(&self, path: &Path, offset: u64, length: u64) -> Result<Vec<u8>>;

    /// Writes a file atomically (temp file + rename), creating parent
    /// directories as needed.
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Opens a streaming writer, creating parent directories as needed.
    /// The file becomes visible immediately; callers that need atomicity
    /// publish through a separate catalog.
    fn open_write(&self, path: &Path) -> Result<Box<dyn Write + Send>>;

    /// Creates an empty file, failing if it already exists.
    fn create_new(&self, path: &Path) -> Result<()>;

    /// Renames a file.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Removes a file.
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Recursively creates a directory and its parents.
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Lists the entries of a directory as backend-relative paths.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Returns the size of a file in bytes.
    fn file_size(&self, path: &Path) -> Result<u64>;

    /// Returns true when the backend supports hard links. Backends that
    /// decline fall back to exclusive-create semantics for unique-file
    /// creation.
    fn supports_hard_links(&self) -> bool {
        false
    }

    /// Creates a hard link `to` pointing at `from`.
    fn hard_link(&self, from: &Path, to: &Path) -> Result<()>;

    /// Returns the hard-link count of a file.
    fn link_count(&self, path: &Path) -> Result<u64>;
}

/// Local filesystem backend rooted at a directory.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Creates a backend rooted at `root`. The directory is not created
    /// until [`Backend::create`] is called.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Returns the root directory of this backend.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

impl Backend for LocalBackend {
    fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.full(path).exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.full(path).is_dir()
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(fs::read(self.full(path))?)
    }

    fn seek_read(&self, path: &Path, offset: u64, length: u64) -> Result<Vec<u8>> {
        let mut file = File::open(self.full(path))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let full = self.full(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = full.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(contents)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &full)?;

        // fsync parent directory (Unix-specific for crash safety)
        #[cfg(unix)]
        {
            if let Some(parent) = full.parent() {
                if let Ok(dir_file) = File::open(parent) {
                    let _ = dir_file.sync_all();
                }
            }
        }

        Ok(())
    }

    fn open_write(&self, path: &Path) -> Result<Box<dyn Write + Send>> {
        let full = self.full(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&full)?;
        Ok(Box::new(io::BufWriter::new(file)))
    }

    fn create_new(&self, path: &Path) -> Result<()> {
        let full = self.full(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().write(true).create_new(true).open(&full)?;
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(self.full(from), self.full(to))?;
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(self.full(path))?;
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(self.full(path))?;
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.full(path))? {
            let entry = entry?;
            if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                entries.push(rel.to_path_buf());
            }
        }
        entries.sort();
        Ok(entries)
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(self.full(path))?.len())
    }

    fn supports_hard_links(&self) -> bool {
        cfg!(unix)
    }

    fn hard_link(&self, from: &Path, to: &Path) -> Result<()> {
        fs::hard_link(self.full(from), self.full(to))?;
        Ok(())
    }

    #[cfg(unix)]
    fn link_count(&self, path: &Path) -> Result<u64> {
        use std::os::unix::fs::MetadataExt;
        Ok(fs::metadata(self.full(path))?.nlink())
    }

    #[cfg(not(unix))]
    fn link_count(&self, path: &Path) -> Result<u64> {
        Err(crate::error::DepotError::ObjDb(
            "hard links not supported on this platform".to_string(),
        ))
    }
}
