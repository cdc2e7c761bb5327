//! Pack writer: assembles and emits one pack with its companion files.

use crate::config::PackConfig;
use crate::error::{DepotError, Result};
use crate::object_id::{ObjectId, ObjectType};
use crate::odb::ObjectReader;
use crate::pack::{write_index, PackFileWriter, PackStats, BITMAP_MAGIC};
use crate::progress::ProgressMonitor;
use crate::walk::RevWalk;
use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use std::sync::Arc;

/// Compact, immutable membership set over the OIDs of a written pack.
///
/// Kept as a sorted sequence; later pack phases probe it to exclude
/// objects that earlier phases already wrote.
pub struct ObjectIdSet {
    sorted: Vec<ObjectId>,
}

impl ObjectIdSet {
    /// Builds a set from arbitrary-order ids.
    pub fn from_unsorted(mut ids: Vec<ObjectId>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self { sorted: ids }
    }

    /// True when the set holds `id`.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.sorted.binary_search(id).is_ok()
    }

    /// Number of ids in the set.
    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    /// True when the set is empty.
    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Iterates ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &ObjectId> {
        self.sorted.iter()
    }
}

/// Writes one pack: collects objects via reachability or explicit adds,
/// then streams the pack, its forward index and optionally a bitmap index.
pub struct PackWriter<'a> {
    config: PackConfig,
    reader: &'a ObjectReader,
    tag_targets: HashSet<ObjectId>,
    exclusions: Vec<Arc<ObjectIdSet>>,
    entries: Vec<(ObjectId, ObjectType)>,
    seen: HashSet<ObjectId>,
    stats: PackStats,
    index_entries: Vec<(ObjectId, u64)>,
    bitmap_ready: bool,
}

impl<'a> PackWriter<'a> {
    /// Creates a writer reading source objects through `reader`.
    pub fn new(config: PackConfig, reader: &'a ObjectReader) -> Self {
        Self {
            config,
            reader,
            tag_targets: HashSet::new(),
            exclusions: Vec::new(),
            entries: Vec::new(),
            seen: HashSet::new(),
            stats: PackStats::default(),
            index_entries: Vec::new(),
            bitmap_ready: false,
        }
    }

    /// Records the peeled targets of tags for bitmap selection.
    pub fn set_tag_targets(&mut self, targets: HashSet<ObjectId>) {
        self.tag_targets = targets;
    }

    /// Excludes a set of objects from this pack. Objects of every
    /// previously written pack are excluded this way.
    pub fn exclude_objects(&mut self, set: Arc<ObjectIdSet>) {
        self.exclusions.push(set);
    }

    /// Collects every object reachable from `want` but not from `have`,
    /// minus exclusions, and orders them for writing.
    pub fn prepare_pack(
        &mut self,
        want: &BTreeSet<ObjectId>,
        have: &BTreeSet<ObjectId>,
    ) -> Result<()> {
        let mut walk = RevWalk::new(self.reader);
        for id in want {
            walk.mark_start(*id);
        }
        for id in have {
            walk.mark_uninteresting(*id);
        }

        for (id, otype) in walk.reachable_objects()? {
            if self.is_excluded(&id) {
                continue;
            }
            self.push(id, otype);
        }

        // Commits cluster at the front of the pack, then trees, blobs and
        // tags, preserving discovery order within each class.
        self.entries.sort_by_key(|(_, t)| match t {
            ObjectType::Commit => 0u8,
            ObjectType::Tree => 1,
            ObjectType::Blob => 2,
            ObjectType::Tag => 3,
        });
        Ok(())
    }

    /// Adds a single object with its persisted type. Used when the caller
    /// already knows the object set, as in the garbage phase.
    pub fn add_object(&mut self, id: ObjectId, otype: ObjectType) {
        self.push(id, otype);
    }

    /// Number of objects staged for this pack.
    pub fn object_count(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Streams the pack body and returns the total byte count.
    pub fn write_pack(
        &mut self,
        out: &mut dyn Write,
        pm: &mut dyn ProgressMonitor,
    ) -> Result<u64> {
        pm.begin_task("Writing objects", self.object_count());

        let mut pw = PackFileWriter::new(out, self.entries.len() as u32)?;
        pw.set_compression_level(self.config.compression_level);

        for (id, _) in &self.entries {
            if pm.is_cancelled() {
                return Err(DepotError::Cancelled);
            }

            let offset = if self.config.reuse_objects {
                let (otype, compressed) = self.reader.read_raw(id)?;
                pw.write_entry_raw(otype, &compressed)?
            } else {
                let (otype, payload) = self.reader.read_object(id)?;
                pw.write_entry(otype, &payload)?
            };
            self.index_entries.push((*id, offset));
            pm.update(1);
        }

        let total = pw.finish()?;
        self.stats.total_bytes = total;
        pm.end_task();
        Ok(total)
    }

    /// Writes the forward index. Returns the byte count and index version.
    pub fn write_index(&mut self, out: &mut dyn Write) -> Result<(u64, u32)> {
        if self.index_entries.len() != self.entries.len() {
            return Err(DepotError::PackWriter(
                "index requested before pack body was written".to_string(),
            ));
        }
        self.index_entries.sort_by_key(|(id, _)| *id);
        let bytes = write_index(out, self.config.index_version, &self.index_entries)?;
        Ok((bytes, self.config.index_version))
    }

    /// Decides whether a bitmap index will be written for this pack.
    pub fn prepare_bitmap_index(&mut self) -> bool {
        self.bitmap_ready = self.config.build_bitmaps && self.stats.commits > 0;
        self.bitmap_ready
    }

    /// Writes the bitmap index; call only after [`Self::prepare_bitmap_index`]
    /// returned true. Returns the byte count.
    pub fn write_bitmap_index(&self, out: &mut dyn Write) -> Result<u64> {
        if !self.bitmap_ready {
            return Err(DepotError::PackWriter(
                "bitmap index was not prepared".to_string(),
            ));
        }

        // Positions of commit objects within the OID-sorted index.
        let mut positions: Vec<u32> = Vec::with_capacity(self.stats.commits as usize);
        for (id, otype) in &self.entries {
            if *otype != ObjectType::Commit {
                continue;
            }
            if let Ok(pos) = self.index_entries.binary_search_by(|(e, _)| e.cmp(id)) {
                positions.push(pos as u32);
            }
        }
        positions.sort_unstable();

        let mut written = 0u64;
        out.write_all(BITMAP_MAGIC)?;
        out.write_all(&(positions.len() as u32).to_le_bytes())?;
        written += 8;
        for pos in positions {
            out.write_all(&pos.to_le_bytes())?;
            written += 4;
        }
        out.flush()?;
        Ok(written)
    }

    /// Statistics of the written pack.
    pub fn statistics(&self) -> PackStats {
        self.stats.clone()
    }

    /// The OID membership set of this pack.
    pub fn object_set(&self) -> Arc<ObjectIdSet> {
        Arc::new(ObjectIdSet::from_unsorted(
            self.entries.iter().map(|(id, _)| *id).collect(),
        ))
    }

    fn push(&mut self, id: ObjectId, otype: ObjectType) {
        if self.seen.insert(id) {
            self.entries.push((id, otype));
            self.stats.record(otype);
        }
    }

    fn is_excluded(&self, id: &ObjectId) -> bool {
        self.exclusions.iter().any(|set| set.contains(id))
    }
}
