//! Reference database: named pointers into the object store.

use crate::backend::Backend;
use crate::error::{DepotError, Result};
use crate::ObjectId;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Namespace prefix shared by every ref.
pub const R_REFS: &str = "refs/";

/// Namespace of branch heads.
pub const R_HEADS: &str = "refs/heads/";

/// Namespace of tags.
pub const R_TAGS: &str = "refs/tags/";

/// Namespace of transactional ref-tree refs.
pub const R_TXN: &str = "refs/txn/";

/// A named pointer `(name, target, peeled?, symbolic?)`.
///
/// A symbolic ref indirects to another ref by name. A peeled id is the
/// non-tag object an annotated tag ultimately names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    name: String,
    target: Option<ObjectId>,
    peeled: Option<ObjectId>,
    symbolic_target: Option<String>,
}

impl Ref {
    /// Creates a direct ref.
    pub fn direct(name: impl Into<String>, target: ObjectId) -> Self {
        Self {
            name: name.into(),
            target: Some(target),
            peeled: None,
            symbolic_target: None,
        }
    }

    /// Creates a direct ref carrying a peeled id.
    pub fn peeled(name: impl Into<String>, target: ObjectId, peeled: ObjectId) -> Self {
        Self {
            name: name.into(),
            target: Some(target),
            peeled: Some(peeled),
            symbolic_target: None,
        }
    }

    /// Creates a symbolic ref pointing at another ref by name.
    pub fn symbolic(name: impl Into<String>, target_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: None,
            peeled: None,
            symbolic_target: Some(target_ref.into()),
        }
    }

    /// Creates a direct ref with no target (unborn).
    pub fn unborn(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: None,
            peeled: None,
            symbolic_target: None,
        }
    }

    /// The full ref name, e.g. `refs/heads/main`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The object this ref points at, if any.
    pub fn target(&self) -> Option<ObjectId> {
        self.target
    }

    /// The peeled object id for annotated tags.
    pub fn peeled_id(&self) -> Option<ObjectId> {
        self.peeled
    }

    /// True when this ref indirects to another ref.
    pub fn is_symbolic(&self) -> bool {
        self.symbolic_target.is_some()
    }

    /// Name of the ref a symbolic ref points at.
    pub fn symbolic_target(&self) -> Option<&str> {
        self.symbolic_target.as_deref()
    }
}

/// Read-side contract of the reference database.
///
/// The GC engine reads the whole ref set exactly once per run through this
/// interface and never writes.
pub trait RefDatabase: Send + Sync {
    /// Drops any cached state so the next read observes the backend.
    fn refresh(&self) -> Result<()>;

    /// Enumerates all refs under `refs/`, sorted by name.
    fn all_refs(&self) -> Result<Vec<Ref>>;

    /// Returns reserved refs living outside the `refs/` namespace
    /// (e.g. `HEAD`).
    fn additional_refs(&self) -> Result<Vec<Ref>>;

    /// True when the named ref is managed as a transactional ref-tree.
    fn is_ref_tree(&self, name: &str) -> bool;
}

/// Filesystem-backed reference database.
///
/// Each ref is one text file under the store root: the first line is either
/// a hex object id or `ref: <name>` for symbolic refs; an optional second
/// line `peeled <hex>` records the peeled id of an annotated tag. Writes
/// are atomic through the backend.
pub struct FileRefDatabase {
    backend: Arc<dyn Backend>,
    root: PathBuf,
}

impl FileRefDatabase {
    /// Creates a ref database rooted at `root` within the backend.
    pub fn new(backend: Arc<dyn Backend>, root: impl AsRef<Path>) -> Self {
        Self {
            backend,
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Reads a single ref by full name (e.g. `refs/heads/main` or `HEAD`).
    pub fn read_ref(&self, name: &str) -> Result<Ref> {
        let path = self.ref_path(name);
        if !self.backend.exists(&path) {
            return Err(DepotError::RefNotFound(name.to_string()));
        }
        self.parse_ref_file(name, &path)
    }

    /// Writes a direct ref atomically.
    pub fn write_ref(&self, name: &str, id: ObjectId) -> Result<()> {
        self.backend
            .write(&self.ref_path(name), format!("{}\n", id.as_hex()).as_bytes())
    }

    /// Writes a direct ref carrying a peeled id atomically.
    pub fn write_peeled_ref(&self, name: &str, id: ObjectId, peeled: ObjectId) -> Result<()> {
        let content = format!("{}\npeeled {}\n", id.as_hex(), peeled.as_hex());
        self.backend.write(&self.ref_path(name), content.as_bytes())
    }

    /// Writes a symbolic ref atomically.
    pub fn write_symbolic_ref(&self, name: &str, target_ref: &str) -> Result<()> {
        let content = format!("ref: {}\n", target_ref);
        self.backend.write(&self.ref_path(name), content.as_bytes())
    }

    /// Deletes a ref.
    ///
    /// # Errors
    ///
    /// Returns `RefNotFound` if the ref doesn't exist.
    pub fn delete_ref(&self, name: &str) -> Result<()> {
        let path = self.ref_path(name);
        if !self.backend.exists(&path) {
            return Err(DepotError::RefNotFound(name.to_string()));
        }
        self.backend.remove_file(&path)
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn parse_ref_file(&self, name: &str, path: &Path) -> Result<Ref> {
        let content = self.backend.read(path)?;
        let content = String::from_utf8(content).map_err(|_| DepotError::InvalidRef {
            path: path.to_path_buf(),
            reason: "not UTF-8".to_string(),
        })?;

        let mut lines = content.lines();
        let first = lines.next().unwrap_or("").trim();

        if let Some(target_ref) = first.strip_prefix("ref: ") {
            return Ok(Ref::symbolic(name, target_ref.trim()));
        }

        if first.len() != ObjectId::HEX_LEN {
            return Err(DepotError::InvalidRef {
                path: path.to_path_buf(),
                reason: format!("expected {} hex chars, got {}", ObjectId::HEX_LEN, first.len()),
            });
        }

        // An all-zero id records a ref with no target.
        if first.bytes().all(|b| b == b'0') {
            return Ok(Ref::unborn(name));
        }

        let target = ObjectId::from_hex(first).map_err(|_| DepotError::InvalidRef {
            path: path.to_path_buf(),
            reason: "invalid hex string".to_string(),
        })?;

        for line in lines {
            let line = line.trim();
            if let Some(hex) = line.strip_prefix("peeled ") {
                let peeled = ObjectId::from_hex(hex).map_err(|_| DepotError::InvalidRef {
                    path: path.to_path_buf(),
                    reason: "invalid peeled hex string".to_string(),
                })?;
                return Ok(Ref::peeled(name, target, peeled));
            }
        }

        Ok(Ref::direct(name, target))
    }

    fn collect_refs(&self, dir: &Path, refs: &mut Vec<Ref>) -> Result<()> {
        let entries = self
            .backend
            .read_dir(dir)
            .map_err(|e| DepotError::RefDb(format!("listing {}: {}", dir.display(), e)))?;

        for rel in entries {
            if self.backend.is_dir(&rel) {
                self.collect_refs(&rel, refs)?;
                continue;
            }

            // Skip leftover temp files from interrupted writes.
            if rel.extension().and_then(|s| s.to_str()) == Some("tmp") {
                continue;
            }

            let name = match rel.strip_prefix(&self.root) {
                Ok(p) => p.to_string_lossy().into_owned(),
                Err(_) => continue,
            };

            match self.parse_ref_file(&name, &rel) {
                Ok(r) => refs.push(r),
                Err(e) => {
                    tracing::warn!("skipping unreadable ref {}: {}", name, e);
                }
            }
        }

        Ok(())
    }
}

impl RefDatabase for FileRefDatabase {
    fn refresh(&self) -> Result<()> {
        // The filesystem impl reads straight from the backend on every
        // enumeration; nothing is cached.
        Ok(())
    }

    fn all_refs(&self) -> Result<Vec<Ref>> {
        let refs_dir = self.root.join("refs");
        if !self.backend.exists(&refs_dir) {
            return Ok(vec![]);
        }

        let mut refs = Vec::new();
        self.collect_refs(&refs_dir, &mut refs)?;
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(refs)
    }

    fn additional_refs(&self) -> Result<Vec<Ref>> {
        let head = self.ref_path("HEAD");
        if !self.backend.exists(&head) {
            return Ok(vec![]);
        }
        Ok(vec![self.parse_ref_file("HEAD", &head)?])
    }

    fn is_ref_tree(&self, name: &str) -> bool {
        name.starts_with(R_TXN)
    }
}
