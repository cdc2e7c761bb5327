//! Pack inserter: buffers new objects into an `Insert`-class pack.

use crate::clock::Clock;
use crate::error::{DepotError, Result};
use crate::object_id::{ObjectId, ObjectType};
use crate::odb::ObjectDatabase;
use crate::pack::{write_index, PackDescription, PackExt, PackFileWriter, PackSource, PackStats};
use crate::types::{self, CommitObj, TagObj, TreeObj};
use std::collections::HashSet;
use tracing::debug;

/// Buffers objects and flushes them as one pack plus index.
///
/// This is the write path used by commands that add content to the store,
/// and the role a "concurrent inserter" plays while a GC runs: flushed
/// packs enter the catalog through an additions-only commit and are left
/// alone by any in-flight GC that read the catalog earlier.
pub struct PackInserter<'a> {
    odb: &'a ObjectDatabase,
    clock: &'a dyn Clock,
    objects: Vec<(ObjectId, ObjectType, Vec<u8>)>,
    buffered: HashSet<ObjectId>,
}

impl<'a> PackInserter<'a> {
    /// Creates an inserter writing through `odb`.
    pub fn new(odb: &'a ObjectDatabase, clock: &'a dyn Clock) -> Self {
        Self {
            odb,
            clock,
            objects: Vec::new(),
            buffered: HashSet::new(),
        }
    }

    /// Buffers one object and returns its id. Duplicate inserts within the
    /// batch are collapsed.
    pub fn insert(&mut self, otype: ObjectType, payload: Vec<u8>) -> Result<ObjectId> {
        let id = ObjectId::hash_object(otype, &payload);
        if self.buffered.insert(id) {
            self.objects.push((id, otype, payload));
        }
        Ok(id)
    }

    /// Buffers a commit object.
    pub fn insert_commit(&mut self, commit: &CommitObj) -> Result<ObjectId> {
        self.insert(ObjectType::Commit, types::encode(commit)?)
    }

    /// Buffers a tree object.
    pub fn insert_tree(&mut self, tree: &TreeObj) -> Result<ObjectId> {
        self.insert(ObjectType::Tree, types::encode(tree)?)
    }

    /// Buffers a tag object.
    pub fn insert_tag(&mut self, tag: &TagObj) -> Result<ObjectId> {
        self.insert(ObjectType::Tag, types::encode(tag)?)
    }

    /// Writes buffered objects as one `Insert` pack and publishes it.
    ///
    /// Objects already present in the store are skipped. Returns `None`
    /// when everything was already present or nothing was buffered.
    pub fn flush(&mut self) -> Result<Option<PackDescription>> {
        if self.objects.is_empty() {
            return Ok(None);
        }

        let objects = std::mem::take(&mut self.objects);
        self.buffered.clear();

        let reader = self.odb.new_reader()?;
        let fresh: Vec<_> = objects
            .into_iter()
            .filter(|(id, _, _)| !reader.has_object(id))
            .collect();
        if fresh.is_empty() {
            return Ok(None);
        }

        let estimated: u64 = fresh.iter().map(|(_, _, p)| p.len() as u64).sum::<u64>() + 32;
        let mut desc = self.odb.new_pack(PackSource::Insert, estimated);
        let mut stats = PackStats::default();

        let mut entries = Vec::with_capacity(fresh.len());
        {
            let mut out = self.odb.write_file(&desc, PackExt::Pack)?;
            let mut pw = PackFileWriter::new(&mut *out, fresh.len() as u32)?;
            for (id, otype, payload) in &fresh {
                let offset = pw.write_entry(*otype, payload)?;
                entries.push((*id, offset));
                stats.record(*otype);
            }
            let total = pw.finish()?;
            desc.set_file_size(PackExt::Pack, total);
            stats.total_bytes = total;
        }

        entries.sort_by_key(|(id, _)| *id);
        {
            let mut out = self.odb.write_file(&desc, PackExt::Index)?;
            let bytes = write_index(&mut *out, 2, &entries)?;
            desc.set_file_size(PackExt::Index, bytes);
            desc.set_index_version(2);
        }

        desc.set_object_count(fresh.len() as u64);
        desc.set_last_modified(self.clock.now_ms());
        desc.set_pack_stats(stats);

        if !self.odb.commit_pack(std::slice::from_ref(&desc), &[])? {
            self.odb.rollback_pack(std::slice::from_ref(&desc));
            return Err(DepotError::ObjDb(
                "failed to publish inserted pack".to_string(),
            ));
        }

        debug!(
            pack = desc.name(),
            objects = desc.object_count(),
            "flushed insert pack"
        );
        Ok(Some(desc))
    }
}
