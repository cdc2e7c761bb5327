//! Shared block cache for open pack files.

use crate::backend::Backend;
use crate::error::Result;
use crate::pack::{PackDescription, PackFile};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Cache of open packs keyed by pack name.
///
/// Parsing a forward index is the expensive part of opening a pack, so one
/// parsed [`PackFile`] is shared by every reader. The GC engine pre-warms
/// the cache for each pack it writes.
#[derive(Default)]
pub struct BlockCache {
    inner: Mutex<HashMap<String, Arc<PackFile>>>,
}

impl BlockCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached pack, opening and caching it on first use.
    pub fn get_or_create(
        &self,
        backend: &dyn Backend,
        dir: &Path,
        desc: &PackDescription,
    ) -> Result<Arc<PackFile>> {
        {
            let inner = self.inner.lock().expect("cache lock");
            if let Some(pack) = inner.get(desc.name()) {
                return Ok(Arc::clone(pack));
            }
        }

        // Opening reads the index without holding the lock; a racing open
        // of the same pack is harmless and last-in wins.
        let pack = Arc::new(PackFile::open(backend, dir, desc.clone())?);

        let mut inner = self.inner.lock().expect("cache lock");
        inner.insert(desc.name().to_string(), Arc::clone(&pack));
        Ok(pack)
    }

    /// Drops one pack from the cache.
    pub fn remove(&self, name: &str) {
        self.inner.lock().expect("cache lock").remove(name);
    }

    /// Drops everything.
    pub fn clear(&self) {
        self.inner.lock().expect("cache lock").clear();
    }

    /// Number of cached packs.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock").len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::object_id::{ObjectId, ObjectType};
    use crate::pack::{write_index, PackFileWriter, PackSource};
    use tempfile::TempDir;

    fn write_sample_pack(backend: &LocalBackend, desc: &PackDescription) {
        let payload = b"cached object";
        let id = ObjectId::hash_object(ObjectType::Blob, payload);

        let mut pack_bytes = Vec::new();
        let mut pw = PackFileWriter::new(&mut pack_bytes, 1).unwrap();
        let offset = pw.write_entry(ObjectType::Blob, payload).unwrap();
        pw.finish().unwrap();

        let mut index_bytes = Vec::new();
        write_index(&mut index_bytes, 2, &[(id, offset)]).unwrap();

        backend
            .write(Path::new(&desc.file_name(crate::pack::PackExt::Pack)), &pack_bytes)
            .unwrap();
        backend
            .write(Path::new(&desc.file_name(crate::pack::PackExt::Index)), &index_bytes)
            .unwrap();
    }

    #[test]
    fn test_get_or_create_shares_instance() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path());
        let desc = PackDescription::new("pack-cache", PackSource::Insert, 0);
        write_sample_pack(&backend, &desc);

        let cache = BlockCache::new();
        let a = cache.get_or_create(&backend, Path::new(""), &desc).unwrap();
        let b = cache.get_or_create(&backend, Path::new(""), &desc).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path());
        let desc = PackDescription::new("pack-cache2", PackSource::Insert, 0);
        write_sample_pack(&backend, &desc);

        let cache = BlockCache::new();
        cache.get_or_create(&backend, Path::new(""), &desc).unwrap();
        cache.remove("pack-cache2");
        assert!(cache.is_empty());

        cache.get_or_create(&backend, Path::new(""), &desc).unwrap();
        cache.clear();
        assert!(cache.is_empty());
    }
}
