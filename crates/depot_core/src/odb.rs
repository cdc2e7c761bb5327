//! Object database: the pack catalog over a pluggable backend.

use crate::backend::Backend;
use crate::cache::BlockCache;
use crate::error::{DepotError, Result};
use crate::object_id::{canonical_bytes, ObjectId, ObjectType};
use crate::pack::{PackDescription, PackExt, PackFile, PackSource};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Catalog manifest persisted next to the pack files.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    packs: Vec<PackDescription>,
}

/// Pack-organized object database.
///
/// The catalog of live packs is one JSON manifest rewritten atomically on
/// every commit; pack data files are immutable once published. Concurrent
/// inserters append to the catalog through [`ObjectDatabase::commit_pack`]
/// with an empty prune list.
pub struct ObjectDatabase {
    backend: Arc<dyn Backend>,
    root: PathBuf,
    cache: Arc<BlockCache>,
}

impl ObjectDatabase {
    /// Creates an object database rooted at `root` within the backend.
    pub fn new(backend: Arc<dyn Backend>, root: impl AsRef<Path>) -> Self {
        Self {
            backend,
            root: root.as_ref().to_path_buf(),
            cache: Arc::new(BlockCache::new()),
        }
    }

    /// Directory holding pack files and the manifest.
    pub fn pack_dir(&self) -> PathBuf {
        self.root.join("objects").join("pack")
    }

    fn manifest_path(&self) -> PathBuf {
        self.pack_dir().join("packs.json")
    }

    /// Returns a snapshot of the pack catalog.
    pub fn packs(&self) -> Result<Vec<PackDescription>> {
        Ok(self.read_manifest()?.packs)
    }

    /// Allocates a descriptor for a pack about to be written.
    pub fn new_pack(&self, source: PackSource, estimated_size: u64) -> PackDescription {
        let name = format!("pack-{}", uuid::Uuid::new_v4().simple());
        PackDescription::new(name, source, estimated_size)
    }

    /// Opens a streaming writer for a companion file of `desc`.
    pub fn write_file(&self, desc: &PackDescription, ext: PackExt) -> Result<Box<dyn Write + Send>> {
        let path = self.pack_dir().join(desc.file_name(ext));
        self.backend.open_write(&path)
    }

    /// Atomically publishes `add` and removes `prune` from the catalog.
    ///
    /// Returns `Ok(false)` when a race is detected: some pack in `prune`
    /// has already left the catalog, meaning another maintainer committed
    /// first and the caller's view of the store is stale. Nothing is
    /// changed in that case.
    pub fn commit_pack(&self, add: &[PackDescription], prune: &[PackDescription]) -> Result<bool> {
        let mut manifest = self.read_manifest()?;

        {
            let present: HashSet<&str> = manifest.packs.iter().map(|p| p.name()).collect();
            for d in prune {
                if !present.contains(d.name()) {
                    warn!(
                        "commit race: pack {} already removed from the catalog",
                        d.name()
                    );
                    return Ok(false);
                }
            }
        }

        let pruned: HashSet<&str> = prune.iter().map(|p| p.name()).collect();
        manifest.packs.retain(|p| !pruned.contains(p.name()));
        manifest.packs.extend(add.iter().cloned());
        self.write_manifest(&manifest)?;

        info!(
            added = add.len(),
            pruned = prune.len(),
            "committed pack catalog"
        );

        for d in prune {
            self.delete_pack_files(d);
            self.cache.remove(d.name());
        }

        Ok(true)
    }

    /// Discards packs that were written but never committed. Best effort:
    /// backend refusals are logged and never mask the original error.
    pub fn rollback_pack(&self, add: &[PackDescription]) {
        for d in add {
            debug!("rolling back uncommitted pack {}", d.name());
            self.delete_pack_files(d);
            self.cache.remove(d.name());
        }
    }

    /// Opens a reader over the current catalog snapshot.
    pub fn new_reader(&self) -> Result<ObjectReader> {
        let mut packs = Vec::new();
        for desc in self.packs()? {
            packs.push(self.open_pack(&desc)?);
        }
        Ok(ObjectReader {
            backend: Arc::clone(&self.backend),
            packs,
        })
    }

    /// Opens one pack through the shared block cache.
    pub fn open_pack(&self, desc: &PackDescription) -> Result<Arc<PackFile>> {
        self.cache
            .get_or_create(self.backend.as_ref(), &self.pack_dir(), desc)
    }

    /// Drops all cached pack state.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// The backend this database stores through.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    fn read_manifest(&self) -> Result<Manifest> {
        let path = self.manifest_path();
        if !self.backend.exists(&path) {
            return Ok(Manifest::default());
        }
        let bytes = self.backend.read(&path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| DepotError::ObjDb(format!("corrupt pack manifest: {}", e)))
    }

    fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(manifest)
            .map_err(|e| DepotError::ObjDb(format!("encoding pack manifest: {}", e)))?;
        self.backend.write(&self.manifest_path(), &bytes)
    }

    fn delete_pack_files(&self, desc: &PackDescription) {
        for ext in [PackExt::Pack, PackExt::Index, PackExt::BitmapIndex] {
            let path = self.pack_dir().join(desc.file_name(ext));
            if !self.backend.exists(&path) {
                continue;
            }
            if let Err(e) = self.backend.remove_file(&path) {
                warn!("failed to delete {}: {}", path.display(), e);
            }
        }
    }
}

/// Read access to the objects of a catalog snapshot.
///
/// Holds the pack set observed when the reader was opened; packs committed
/// afterwards are not visible.
pub struct ObjectReader {
    backend: Arc<dyn Backend>,
    packs: Vec<Arc<PackFile>>,
}

impl ObjectReader {
    /// True when any pack in the snapshot holds the object.
    pub fn has_object(&self, id: &ObjectId) -> bool {
        self.packs.iter().any(|p| p.has_object(id))
    }

    /// Reads and verifies an object.
    ///
    /// # Errors
    ///
    /// Returns `ObjectNotFound` if no pack holds the object and
    /// `HashMismatch` if the stored bytes do not hash back to `id`.
    pub fn read_object(&self, id: &ObjectId) -> Result<(ObjectType, Vec<u8>)> {
        let (pack, offset) = self
            .locate(id)
            .ok_or_else(|| DepotError::ObjectNotFound(id.as_hex()))?;

        let (otype, payload) = pack.read_object_at(self.backend.as_ref(), offset)?;

        let actual = blake3::hash(&canonical_bytes(otype, &payload));
        let actual = ObjectId::from_bytes(*actual.as_bytes());
        if actual != *id {
            return Err(DepotError::HashMismatch {
                expected: id.as_hex(),
                actual: actual.as_hex(),
            });
        }

        Ok((otype, payload))
    }

    /// Reads an object's entry without decompressing it.
    pub fn read_raw(&self, id: &ObjectId) -> Result<(ObjectType, Vec<u8>)> {
        let (pack, offset) = self
            .locate(id)
            .ok_or_else(|| DepotError::ObjectNotFound(id.as_hex()))?;
        pack.read_raw_at(self.backend.as_ref(), offset)
    }

    /// Returns the persisted type of an object.
    pub fn object_type(&self, id: &ObjectId) -> Result<ObjectType> {
        let (pack, offset) = self
            .locate(id)
            .ok_or_else(|| DepotError::ObjectNotFound(id.as_hex()))?;
        pack.object_type_at(self.backend.as_ref(), offset)
    }

    /// The packs in this snapshot.
    pub fn packs(&self) -> &[Arc<PackFile>] {
        &self.packs
    }

    /// The backend this reader reads through.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    fn locate(&self, id: &ObjectId) -> Option<(&Arc<PackFile>, u64)> {
        for pack in &self.packs {
            if let Some(offset) = pack.index().offset_of(id) {
                return Some((pack, offset));
            }
        }
        None
    }
}
