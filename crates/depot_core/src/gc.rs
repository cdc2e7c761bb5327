//! Garbage collection and repack engine.
//!
//! A run snapshots the refs once, partitions the pack catalog into packs to
//! rewrite and expired garbage to drop unread, copies reachable objects into
//! up to four new packs (heads, non-heads, ref-tree, coalesced garbage) and
//! atomically swaps the old pack set for the new one. Any failure before the
//! swap discards every pack the run wrote.
//!
//! Unreachable objects are never deleted outright: they move into packs of
//! class `UnreachableGarbage` and are only expired after a later GC has
//! observed them and a retention window has passed, which is what makes
//! racing inserters safe.

use crate::clock::Clock;
use crate::config::{PackConfig, REQUIRED_INDEX_VERSION};
use crate::error::{DepotError, Result};
use crate::object_id::ObjectId;
use crate::odb::ObjectReader;
use crate::pack::{
    PackDescription, PackExt, PackFile, PackSource, PackStats, PACK_HEADER_LEN, PACK_TRAILER_LEN,
};
use crate::progress::ProgressMonitor;
use crate::refs::{RefDatabase, R_HEADS, R_REFS, R_TAGS};
use crate::store::Store;
use crate::writer::{ObjectIdSet, PackWriter};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Garbage collector over one store.
///
/// Multiple runs on the same store must not execute concurrently; callers
/// serialize runs (see [`crate::GcLock`]). A `false` return from
/// [`GarbageCollector::pack`] means a concurrent update raced the run and
/// the caller should rerun.
pub struct GarbageCollector<'a> {
    store: &'a Store,
    pack_config: PackConfig,
    coalesce_garbage_limit: u64,
    garbage_ttl_ms: i64,

    start_time_ms: i64,
    all_heads: BTreeSet<ObjectId>,
    non_heads: BTreeSet<ObjectId>,
    txn_heads: BTreeSet<ObjectId>,
    tag_targets: HashSet<ObjectId>,

    packs_before: Vec<Arc<PackFile>>,
    expired_garbage: Vec<PackDescription>,

    new_pack_desc: Vec<PackDescription>,
    new_pack_stats: Vec<PackStats>,
    new_pack_obj: Vec<Arc<ObjectIdSet>>,
}

impl<'a> GarbageCollector<'a> {
    /// Creates a collector with tunables taken from the store config.
    pub fn new(store: &'a Store) -> Self {
        let config = store.config();
        Self {
            store,
            pack_config: config.pack.clone(),
            coalesce_garbage_limit: config.gc.coalesce_garbage_limit,
            garbage_ttl_ms: config.gc.garbage_ttl_millis,
            start_time_ms: 0,
            all_heads: BTreeSet::new(),
            non_heads: BTreeSet::new(),
            txn_heads: BTreeSet::new(),
            tag_targets: HashSet::new(),
            packs_before: Vec::new(),
            expired_garbage: Vec::new(),
            new_pack_desc: Vec::new(),
            new_pack_stats: Vec::new(),
            new_pack_obj: Vec::new(),
        }
    }

    /// Sets the upper size bound for folding an unreachable pack into the
    /// new garbage pack. 0 disables coalescing.
    pub fn set_coalesce_garbage_limit(&mut self, bytes: u64) -> &mut Self {
        self.coalesce_garbage_limit = bytes;
        self
    }

    /// Sets the minimum age before an unreachable pack may be expired.
    /// 0 disables expiry.
    pub fn set_garbage_ttl_millis(&mut self, millis: i64) -> &mut Self {
        self.garbage_ttl_ms = millis;
        self
    }

    /// Replaces the pack configuration passed to the writers.
    pub fn set_pack_config(&mut self, config: PackConfig) -> &mut Self {
        self.pack_config = config;
        self
    }

    /// Runs one collection.
    ///
    /// Returns `Ok(true)` on success and `Ok(false)` when a concurrent
    /// update raced the run; in the latter case every pack this run wrote
    /// has been rolled back and the caller may rerun.
    ///
    /// # Errors
    ///
    /// Returns `Precondition` for an unsupported index version (before any
    /// side effect); any other error has already rolled back the new packs.
    pub fn pack(&mut self, pm: &mut dyn ProgressMonitor) -> Result<bool> {
        if self.pack_config.index_version != REQUIRED_INDEX_VERSION {
            return Err(DepotError::Precondition(format!(
                "pack index version must be {}, got {}",
                REQUIRED_INDEX_VERSION, self.pack_config.index_version
            )));
        }

        self.reset();

        let odb = self.store.odb();
        let refdb = self.store.refs();

        self.start_time_ms = self.store.clock().now_ms();
        refdb.refresh()?;
        odb.clear_cache();

        self.collect_refs()?;
        self.read_packs_before()?;

        if self.packs_before.is_empty() {
            if self.expired_garbage.is_empty() {
                return Ok(true);
            }
            let prune = self.expired_garbage.clone();
            info!(expired = prune.len(), "pruning expired garbage packs");
            return odb.commit_pack(&[], &prune);
        }

        let reader = odb.new_reader()?;
        match self.run_phases(&reader, pm) {
            Ok(committed) => {
                if !committed {
                    odb.rollback_pack(&self.new_pack_desc);
                }
                Ok(committed)
            }
            Err(e) => {
                odb.rollback_pack(&self.new_pack_desc);
                Err(e)
            }
        }
    }

    /// Descriptors of the packs this run wrote, in phase order.
    pub fn new_pack_descriptions(&self) -> &[PackDescription] {
        &self.new_pack_desc
    }

    /// Statistics parallel to [`Self::new_pack_descriptions`].
    pub fn pack_statistics(&self) -> &[PackStats] {
        &self.new_pack_stats
    }

    /// Descriptors of the packs this run pruned (rewritten plus expired).
    pub fn pruned_packs(&self) -> Vec<PackDescription> {
        let mut pruned: Vec<PackDescription> =
            self.packs_before.iter().map(|p| p.desc().clone()).collect();
        pruned.extend(self.expired_garbage.iter().cloned());
        pruned
    }

    fn reset(&mut self) {
        self.all_heads.clear();
        self.non_heads.clear();
        self.txn_heads.clear();
        self.tag_targets.clear();
        self.packs_before.clear();
        self.expired_garbage.clear();
        self.new_pack_desc.clear();
        self.new_pack_stats.clear();
        self.new_pack_obj.clear();
    }

    /// Reads the whole ref set once and partitions it.
    ///
    /// `all_heads`, `non_heads` and `txn_heads` are pairwise disjoint:
    /// every ref contributes its target to exactly one of them. Peeled tag
    /// ids land in `tag_targets`, which also absorbs all of `all_heads`.
    fn collect_refs(&mut self) -> Result<()> {
        let refdb = self.store.refs();

        let mut refs = refdb.all_refs()?;
        for r in refdb.additional_refs()? {
            if r.name().starts_with(R_REFS) {
                refs.push(r);
            }
        }

        for r in &refs {
            if r.is_symbolic() {
                continue;
            }
            let Some(id) = r.target() else {
                continue;
            };

            if r.name().starts_with(R_HEADS) || r.name().starts_with(R_TAGS) {
                self.all_heads.insert(id);
            } else if refdb.is_ref_tree(r.name()) {
                self.txn_heads.insert(id);
            } else {
                self.non_heads.insert(id);
            }

            if let Some(peeled) = r.peeled_id() {
                self.tag_targets.insert(peeled);
            }
        }

        self.tag_targets.extend(self.all_heads.iter().copied());
        Ok(())
    }

    /// Partitions the catalog into packs to rewrite and expired garbage to
    /// prune unread. Garbage packs that are neither stay in place.
    fn read_packs_before(&mut self) -> Result<()> {
        let odb = self.store.odb();
        let packs = odb.packs()?;
        let now = self.start_time_ms;

        // Most recent successful GC: newest pack produced as GC or GC_REST.
        // With no prior GC this is 0 and, because expiry requires strictly
        // older garbage, nothing can expire.
        let most_recent_gc = packs
            .iter()
            .filter(|d| matches!(d.source(), PackSource::Gc | PackSource::GcRest))
            .map(|d| d.last_modified_ms())
            .max()
            .unwrap_or(0);

        for desc in packs {
            if desc.source() != PackSource::UnreachableGarbage {
                self.packs_before.push(odb.open_pack(&desc)?);
            } else if self.pack_is_expired_garbage(&desc, most_recent_gc, now) {
                debug!(pack = desc.name(), "garbage pack expired");
                self.expired_garbage.push(desc);
            } else if self.pack_is_coalesceable_garbage(&desc, now) {
                self.packs_before.push(odb.open_pack(&desc)?);
            }
        }

        Ok(())
    }

    /// A garbage pack may be dropped unread only after a later GC run has
    /// observed it (so reachable objects were copied out) and the retention
    /// window has fully elapsed.
    fn pack_is_expired_garbage(
        &self,
        desc: &PackDescription,
        most_recent_gc: i64,
        now: i64,
    ) -> bool {
        desc.last_modified_ms() < most_recent_gc
            && self.garbage_ttl_ms > 0
            && now - desc.last_modified_ms() >= self.garbage_ttl_ms
    }

    /// A garbage pack small enough to fold into this run's garbage pack.
    ///
    /// Coalescing only folds packs from the current time slot of the
    /// current calendar day, bounding the number of garbage packs kept to
    /// roughly `ttl_days + 1`, or four when the TTL is a day or less.
    fn pack_is_coalesceable_garbage(&self, desc: &PackDescription, now: i64) -> bool {
        if self.coalesce_garbage_limit <= desc.file_size(PackExt::Pack) {
            return false;
        }
        if self.garbage_ttl_ms == 0 {
            return true;
        }

        let clock = self.store.clock();
        let last_modified = desc.last_modified_ms();
        let day_start_modified = clock.start_of_day_ms(last_modified);
        let day_start_now = clock.start_of_day_ms(now);

        if day_start_modified != day_start_now {
            // Not created today.
            return false;
        }
        if self.garbage_ttl_ms > DAY_MS {
            // TTL spans more than a day, so anything from today qualifies.
            return true;
        }

        let time_interval = self.garbage_ttl_ms / 3;
        if time_interval == 0 {
            return false;
        }

        let modified_slot = (last_modified - day_start_modified) / time_interval;
        let present_slot = (now - day_start_now) / time_interval;
        modified_slot == present_slot
    }

    fn run_phases(&mut self, reader: &ObjectReader, pm: &mut dyn ProgressMonitor) -> Result<bool> {
        self.pack_heads(reader, pm)?;
        self.check_cancelled(pm)?;
        self.pack_rest(reader, pm)?;
        self.check_cancelled(pm)?;
        self.pack_ref_tree(reader, pm)?;
        self.check_cancelled(pm)?;
        self.pack_garbage(reader, pm)?;

        let prune = self.pruned_packs();
        self.store.odb().commit_pack(&self.new_pack_desc, &prune)
    }

    /// Phase H: everything reachable from branch heads and tags.
    fn pack_heads(&mut self, reader: &ObjectReader, pm: &mut dyn ProgressMonitor) -> Result<()> {
        if self.all_heads.is_empty() {
            return Ok(());
        }

        let mut pw = PackWriter::new(self.phase_config(), reader);
        pw.set_tag_targets(self.tag_targets.clone());
        pw.prepare_pack(&self.all_heads, &BTreeSet::new())?;
        if pw.object_count() == 0 {
            return Ok(());
        }

        let estimated = self.estimate_gc_pack_size(&[
            PackSource::Insert,
            PackSource::Receive,
            PackSource::Compact,
            PackSource::Gc,
        ]);
        self.emit_pack(PackSource::Gc, pw, pm, estimated)
    }

    /// Phase R: objects reachable from other refs but not from the heads.
    fn pack_rest(&mut self, reader: &ObjectReader, pm: &mut dyn ProgressMonitor) -> Result<()> {
        if self.non_heads.is_empty() {
            return Ok(());
        }

        let mut pw = PackWriter::new(self.phase_config(), reader);
        for set in &self.new_pack_obj {
            pw.exclude_objects(Arc::clone(set));
        }
        pw.prepare_pack(&self.non_heads, &self.all_heads)?;
        if pw.object_count() == 0 {
            return Ok(());
        }

        let estimated = self.estimate_gc_pack_size(&[
            PackSource::Insert,
            PackSource::Receive,
            PackSource::Compact,
            PackSource::GcRest,
        ]);
        self.emit_pack(PackSource::GcRest, pw, pm, estimated)
    }

    /// Phase T: transactional ref-tree metadata.
    fn pack_ref_tree(&mut self, reader: &ObjectReader, pm: &mut dyn ProgressMonitor) -> Result<()> {
        if self.txn_heads.is_empty() {
            return Ok(());
        }

        let mut pw = PackWriter::new(self.phase_config(), reader);
        for set in &self.new_pack_obj {
            pw.exclude_objects(Arc::clone(set));
        }
        pw.prepare_pack(&self.txn_heads, &BTreeSet::new())?;
        if pw.object_count() == 0 {
            return Ok(());
        }

        self.emit_pack(PackSource::GcTxn, pw, pm, 0)
    }

    /// Phase G: every object of the rewritten packs that no new pack holds,
    /// copied with its persisted type into one coalesced garbage pack.
    fn pack_garbage(&mut self, reader: &ObjectReader, pm: &mut dyn ProgressMonitor) -> Result<()> {
        let mut pw = PackWriter::new(self.garbage_config(), reader);
        let backend = Arc::clone(reader.backend());

        pm.begin_task("Finding garbage", self.objects_before());
        let mut pool: HashSet<ObjectId> = HashSet::new();
        let mut estimated = PACK_HEADER_LEN + PACK_TRAILER_LEN;

        for pack in &self.packs_before {
            let desc = pack.desc();
            let max_offset = desc.file_size(PackExt::Pack) - PACK_TRAILER_LEN;

            for (id, offset) in pack.index().iter() {
                pm.update(1);
                if pm.is_cancelled() {
                    return Err(DepotError::Cancelled);
                }
                if pool.contains(&id) || self.any_new_pack_has(&id) {
                    continue;
                }
                pool.insert(id);

                let otype = pack.object_type_at(backend.as_ref(), offset)?;
                pw.add_object(id, otype);
                estimated += pack.reverse_index().next_offset(offset, max_offset)? - offset;
            }
        }
        pm.end_task();

        if pw.object_count() == 0 {
            return Ok(());
        }
        self.emit_pack(PackSource::UnreachableGarbage, pw, pm, estimated)
    }

    /// Writes one new pack: data stream, index, optional bitmap, stats and
    /// the run timestamp, then pre-warms the shared cache for it.
    fn emit_pack(
        &mut self,
        source: PackSource,
        mut pw: PackWriter<'_>,
        pm: &mut dyn ProgressMonitor,
        estimated_size: u64,
    ) -> Result<()> {
        let odb = self.store.odb();
        let mut desc = odb.new_pack(source, estimated_size);

        // Registered before any byte is streamed so rollback also removes
        // partially written files.
        self.new_pack_desc.push(desc.clone());

        {
            let mut out = odb.write_file(&desc, PackExt::Pack)?;
            let bytes = pw.write_pack(&mut *out, pm)?;
            desc.set_file_size(PackExt::Pack, bytes);
        }

        {
            let mut out = odb.write_file(&desc, PackExt::Index)?;
            let (bytes, version) = pw.write_index(&mut *out)?;
            desc.set_file_size(PackExt::Index, bytes);
            desc.set_index_version(version);
        }

        if pw.prepare_bitmap_index() {
            let mut out = odb.write_file(&desc, PackExt::BitmapIndex)?;
            let bytes = pw.write_bitmap_index(&mut *out)?;
            desc.set_file_size(PackExt::BitmapIndex, bytes);
        }

        desc.set_object_count(pw.object_count());
        desc.set_pack_stats(pw.statistics());
        desc.set_last_modified(self.start_time_ms);

        odb.open_pack(&desc)?;

        info!(
            pack = desc.name(),
            source = source.as_str(),
            objects = desc.object_count(),
            "wrote pack"
        );

        self.new_pack_obj.push(pw.object_set());
        self.new_pack_stats.push(pw.statistics());
        *self
            .new_pack_desc
            .last_mut()
            .expect("descriptor was registered above") = desc;
        Ok(())
    }

    /// Size estimate for a consolidation pack: the combined size of the
    /// source packs it replaces plus one header and trailer.
    fn estimate_gc_pack_size(&self, sources: &[PackSource]) -> u64 {
        let mut size = PACK_HEADER_LEN + PACK_TRAILER_LEN;
        for pack in &self.packs_before {
            if sources.contains(&pack.desc().source()) {
                size += pack.desc().file_size(PackExt::Pack);
            }
        }
        size
    }

    fn objects_before(&self) -> u64 {
        self.packs_before.iter().map(|p| p.desc().object_count()).sum()
    }

    fn any_new_pack_has(&self, id: &ObjectId) -> bool {
        self.new_pack_obj.iter().any(|set| set.contains(id))
    }

    fn phase_config(&self) -> PackConfig {
        let mut config = self.pack_config.clone();
        config.delta_base_as_offset = true;
        config.reuse_delta_commits = false;
        config
    }

    fn garbage_config(&self) -> PackConfig {
        let mut config = self.phase_config();
        config.reuse_deltas = true;
        config.reuse_objects = true;
        config.delta_compress = false;
        config.build_bitmaps = false;
        config
    }

    fn check_cancelled(&self, pm: &dyn ProgressMonitor) -> Result<()> {
        if pm.is_cancelled() {
            return Err(DepotError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::clock::FixedClock;
    use crate::object_id::ObjectType;
    use crate::pack::{write_index, PackFileWriter};
    use crate::progress::testutil::RecordingProgress;
    use crate::progress::NullProgress;
    use crate::store::Store;
    use crate::types::{CommitObj, TreeEntry, TreeObj};
    use tempfile::TempDir;

    const HOUR_MS: i64 = 60 * 60 * 1000;
    /// Noon UTC on 2023-11-14: leaves room within the day on both sides.
    const NOON: i64 = 1_699_963_200_000;

    struct Fixture {
        tmp: TempDir,
        store: Store,
        clock: Arc<FixedClock>,
    }

    fn fixture_at(now_ms: i64) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(FixedClock::new(now_ms, 0));
        let store = Store::init(tmp.path())
            .unwrap()
            .with_clock(Arc::clone(&clock) as Arc<dyn Clock>);
        Fixture { tmp, store, clock }
    }

    /// Inserts blob + tree + commit, optionally with extra unreachable
    /// blobs in the same pack. Returns (commit, tree, blob).
    fn insert_chain(
        store: &Store,
        data: &[u8],
        parent: Option<ObjectId>,
        extras: &[&[u8]],
    ) -> (ObjectId, ObjectId, ObjectId) {
        let mut ins = store.inserter();
        let blob = ins.insert(ObjectType::Blob, data.to_vec()).unwrap();
        let tree = ins
            .insert_tree(&TreeObj {
                entries: vec![TreeEntry {
                    name: "file".into(),
                    id: blob,
                    kind: ObjectType::Blob,
                }],
            })
            .unwrap();
        let commit = ins
            .insert_commit(&CommitObj {
                tree,
                parents: parent.into_iter().collect(),
                author_time_ms: 0,
                message: "test".into(),
            })
            .unwrap();
        for extra in extras {
            ins.insert(ObjectType::Blob, extra.to_vec()).unwrap();
        }
        ins.flush().unwrap().unwrap();
        (commit, tree, blob)
    }

    /// Publishes a pack of the given source class holding `blobs`,
    /// stamped `last_modified_ms`. Returns the descriptor and blob ids.
    fn publish_pack(
        store: &Store,
        source: PackSource,
        blobs: &[&[u8]],
        last_modified_ms: i64,
    ) -> (PackDescription, Vec<ObjectId>) {
        let odb = store.odb();
        let mut desc = odb.new_pack(source, 0);
        let mut ids = Vec::new();

        let mut entries = Vec::new();
        {
            let mut out = odb.write_file(&desc, PackExt::Pack).unwrap();
            let mut pw = PackFileWriter::new(&mut *out, blobs.len() as u32).unwrap();
            for payload in blobs {
                let id = ObjectId::hash_object(ObjectType::Blob, payload);
                let offset = pw.write_entry(ObjectType::Blob, payload).unwrap();
                entries.push((id, offset));
                ids.push(id);
            }
            let total = pw.finish().unwrap();
            desc.set_file_size(PackExt::Pack, total);
        }

        entries.sort_by_key(|(id, _)| *id);
        {
            let mut out = odb.write_file(&desc, PackExt::Index).unwrap();
            let bytes = write_index(&mut *out, 2, &entries).unwrap();
            desc.set_file_size(PackExt::Index, bytes);
        }

        desc.set_object_count(blobs.len() as u64);
        desc.set_index_version(2);
        desc.set_last_modified(last_modified_ms);
        assert!(odb.commit_pack(std::slice::from_ref(&desc), &[]).unwrap());
        (desc, ids)
    }

    fn catalog_by_source(store: &Store, source: PackSource) -> Vec<PackDescription> {
        store
            .odb()
            .packs()
            .unwrap()
            .into_iter()
            .filter(|d| d.source() == source)
            .collect()
    }

    fn pack_holds(store: &Store, desc: &PackDescription, id: &ObjectId) -> bool {
        store.odb().open_pack(desc).unwrap().has_object(id)
    }

    // --- end-to-end scenarios ---

    #[test]
    fn test_empty_store() {
        let fx = fixture_at(NOON);

        let mut gc = GarbageCollector::new(&fx.store);
        assert!(gc.pack(&mut NullProgress).unwrap());

        assert!(gc.new_pack_descriptions().is_empty());
        assert!(gc.pruned_packs().is_empty());
        assert!(fx.store.odb().packs().unwrap().is_empty());
    }

    #[test]
    fn test_only_expired_garbage_commits_prune_without_phases() {
        let fx = fixture_at(NOON);

        // A garbage pack stamped before the epoch is strictly older than
        // the "no prior GC" sentinel and long past any TTL; it is pruned
        // unread, so it needs no backing files.
        let mut desc = fx.store.odb().new_pack(PackSource::UnreachableGarbage, 0);
        desc.set_last_modified(-1);
        assert!(fx
            .store
            .odb()
            .commit_pack(std::slice::from_ref(&desc), &[])
            .unwrap());

        let mut gc = GarbageCollector::new(&fx.store);
        assert!(gc.pack(&mut NullProgress).unwrap());

        assert!(gc.new_pack_descriptions().is_empty());
        assert!(fx.store.odb().packs().unwrap().is_empty());
    }

    #[test]
    fn test_single_head_chain() {
        let fx = fixture_at(NOON);
        let (commit, tree, blob) = insert_chain(&fx.store, b"hello", None, &[]);
        let p1 = fx.store.odb().packs().unwrap().remove(0);

        fx.store
            .refs()
            .write_ref("refs/heads/main", commit)
            .unwrap();

        let mut gc = GarbageCollector::new(&fx.store);
        assert!(gc.pack(&mut NullProgress).unwrap());

        let packs = fx.store.odb().packs().unwrap();
        assert_eq!(packs.len(), 1);
        assert_eq!(packs[0].source(), PackSource::Gc);
        assert_eq!(packs[0].object_count(), 3);
        assert_ne!(packs[0].name(), p1.name());

        for id in [commit, tree, blob] {
            assert!(pack_holds(&fx.store, &packs[0], &id));
        }

        assert!(catalog_by_source(&fx.store, PackSource::GcRest).is_empty());
        assert!(catalog_by_source(&fx.store, PackSource::GcTxn).is_empty());
        assert!(catalog_by_source(&fx.store, PackSource::UnreachableGarbage).is_empty());
    }

    #[test]
    fn test_mixed_heads_and_garbage_coalesce() {
        let fx = fixture_at(NOON);

        // p1: a reachable chain plus one unreachable blob.
        let (commit, tree, blob) = insert_chain(&fx.store, b"live", None, &[b"orphan"]);
        let orphan = ObjectId::hash_object(ObjectType::Blob, b"orphan");

        // g1: an existing garbage pack from two hours ago, same day.
        let (g1, g1_ids) = publish_pack(
            &fx.store,
            PackSource::UnreachableGarbage,
            &[b"old garbage"],
            NOON - 2 * HOUR_MS,
        );

        fx.store
            .refs()
            .write_ref("refs/heads/main", commit)
            .unwrap();

        let mut gc = GarbageCollector::new(&fx.store);
        assert!(gc.pack(&mut NullProgress).unwrap());

        // No prior GC existed, so g1 could not expire; it was coalesced.
        let gc_packs = catalog_by_source(&fx.store, PackSource::Gc);
        assert_eq!(gc_packs.len(), 1);
        for id in [commit, tree, blob] {
            assert!(pack_holds(&fx.store, &gc_packs[0], &id));
        }
        assert!(!pack_holds(&fx.store, &gc_packs[0], &orphan));

        let garbage = catalog_by_source(&fx.store, PackSource::UnreachableGarbage);
        assert_eq!(garbage.len(), 1);
        assert_ne!(garbage[0].name(), g1.name());
        assert!(pack_holds(&fx.store, &garbage[0], &orphan));
        assert!(pack_holds(&fx.store, &garbage[0], &g1_ids[0]));

        assert_eq!(fx.store.odb().packs().unwrap().len(), 2);
    }

    #[test]
    fn test_ttl_driven_expiry() {
        let fx = fixture_at(NOON);

        // g1 written 24.5 hours ago, observed by a GC run one hour later.
        let g1_time = NOON - 24 * HOUR_MS - HOUR_MS / 2;
        let (g1, _) = publish_pack(
            &fx.store,
            PackSource::UnreachableGarbage,
            &[b"doomed"],
            g1_time,
        );
        let (p_gc, gc_ids) = publish_pack(&fx.store, PackSource::Gc, &[b"kept"], g1_time + HOUR_MS);

        let mut gc = GarbageCollector::new(&fx.store);
        assert!(gc.pack(&mut NullProgress).unwrap());

        // g1 was dropped unread; the GC pack's now-unreachable contents
        // moved to a fresh garbage pack.
        let packs = fx.store.odb().packs().unwrap();
        assert!(packs.iter().all(|d| d.name() != g1.name()));
        assert!(packs.iter().all(|d| d.name() != p_gc.name()));

        let garbage = catalog_by_source(&fx.store, PackSource::UnreachableGarbage);
        assert_eq!(garbage.len(), 1);
        assert!(pack_holds(&fx.store, &garbage[0], &gc_ids[0]));
    }

    #[test]
    fn test_ref_tree_refs_get_their_own_pack() {
        let fx = fixture_at(NOON);

        let mut ins = fx.store.inserter();
        let meta = ins.insert(ObjectType::Blob, b"txn metadata".to_vec()).unwrap();
        ins.flush().unwrap().unwrap();
        let p1 = fx.store.odb().packs().unwrap().remove(0);

        fx.store.refs().write_ref("refs/txn/commits", meta).unwrap();

        let mut gc = GarbageCollector::new(&fx.store);
        assert!(gc.pack(&mut NullProgress).unwrap());

        let packs = fx.store.odb().packs().unwrap();
        assert_eq!(packs.len(), 1);
        assert_eq!(packs[0].source(), PackSource::GcTxn);
        assert_ne!(packs[0].name(), p1.name());
        assert!(pack_holds(&fx.store, &packs[0], &meta));

        assert!(catalog_by_source(&fx.store, PackSource::Gc).is_empty());
        assert!(catalog_by_source(&fx.store, PackSource::GcRest).is_empty());
        assert!(catalog_by_source(&fx.store, PackSource::UnreachableGarbage).is_empty());
    }

    #[test]
    fn test_non_head_refs_go_to_rest_pack() {
        let fx = fixture_at(NOON);

        let (c_main, _, _) = insert_chain(&fx.store, b"main line", None, &[]);
        let (c_stash, stash_tree, stash_blob) =
            insert_chain(&fx.store, b"stashed", Some(c_main), &[]);

        fx.store
            .refs()
            .write_ref("refs/heads/main", c_main)
            .unwrap();
        fx.store
            .refs()
            .write_ref("refs/stash/0", c_stash)
            .unwrap();

        let mut gc = GarbageCollector::new(&fx.store);
        assert!(gc.pack(&mut NullProgress).unwrap());

        let gc_packs = catalog_by_source(&fx.store, PackSource::Gc);
        let rest = catalog_by_source(&fx.store, PackSource::GcRest);
        assert_eq!(gc_packs.len(), 1);
        assert_eq!(rest.len(), 1);

        // The rest pack holds only what the heads pack does not.
        assert!(pack_holds(&fx.store, &gc_packs[0], &c_main));
        for id in [c_stash, stash_tree, stash_blob] {
            assert!(pack_holds(&fx.store, &rest[0], &id));
            assert!(!pack_holds(&fx.store, &gc_packs[0], &id));
        }
        assert!(!pack_holds(&fx.store, &rest[0], &c_main));
    }

    #[test]
    fn test_tag_peeled_ids_feed_tag_targets() {
        let fx = fixture_at(NOON);
        let (commit, _, _) = insert_chain(&fx.store, b"tagged", None, &[]);

        let mut ins = fx.store.inserter();
        let tag = ins
            .insert_tag(&crate::types::TagObj {
                target: commit,
                target_type: ObjectType::Commit,
                name: "v1".into(),
                message: "release".into(),
            })
            .unwrap();
        ins.flush().unwrap().unwrap();

        fx.store
            .refs()
            .write_peeled_ref("refs/tags/v1", tag, commit)
            .unwrap();

        let mut gc = GarbageCollector::new(&fx.store);
        assert!(gc.pack(&mut NullProgress).unwrap());

        let gc_packs = catalog_by_source(&fx.store, PackSource::Gc);
        assert_eq!(gc_packs.len(), 1);
        assert!(pack_holds(&fx.store, &gc_packs[0], &tag));
        assert!(pack_holds(&fx.store, &gc_packs[0], &commit));
    }

    // --- invariants and laws ---

    #[test]
    fn test_new_packs_stamped_with_run_start_time() {
        let fx = fixture_at(NOON);
        let (commit, _, _) = insert_chain(&fx.store, b"stamp", None, &[b"junk"]);
        fx.store
            .refs()
            .write_ref("refs/heads/main", commit)
            .unwrap();

        let mut gc = GarbageCollector::new(&fx.store);
        assert!(gc.pack(&mut NullProgress).unwrap());

        assert_eq!(gc.new_pack_descriptions().len(), 2);
        for desc in gc.new_pack_descriptions() {
            assert_eq!(desc.last_modified_ms(), NOON);
        }
    }

    #[test]
    fn test_no_pack_in_both_new_and_prune_lists() {
        let fx = fixture_at(NOON);
        let (commit, _, _) = insert_chain(&fx.store, b"disjoint", None, &[b"junk"]);
        fx.store
            .refs()
            .write_ref("refs/heads/main", commit)
            .unwrap();

        let mut gc = GarbageCollector::new(&fx.store);
        assert!(gc.pack(&mut NullProgress).unwrap());

        let new_names: HashSet<String> = gc
            .new_pack_descriptions()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        for pruned in gc.pruned_packs() {
            assert!(!new_names.contains(pruned.name()));
        }
    }

    #[test]
    fn test_second_run_is_stable() {
        let fx = fixture_at(NOON);
        let (commit, _, _) = insert_chain(&fx.store, b"stable", None, &[b"junk"]);
        fx.store
            .refs()
            .write_ref("refs/heads/main", commit)
            .unwrap();

        let mut gc = GarbageCollector::new(&fx.store);
        assert!(gc.pack(&mut NullProgress).unwrap());
        let after_first: HashSet<String> = fx
            .store
            .odb()
            .packs()
            .unwrap()
            .iter()
            .map(|d| d.name().to_string())
            .collect();

        fx.clock.advance(1000);
        let mut gc = GarbageCollector::new(&fx.store);
        assert!(gc.pack(&mut NullProgress).unwrap());

        // The catalog shape is unchanged: one heads pack, one garbage
        // pack, with identical object membership.
        let packs = fx.store.odb().packs().unwrap();
        assert_eq!(packs.len(), after_first.len());
        assert_eq!(catalog_by_source(&fx.store, PackSource::Gc).len(), 1);
        assert_eq!(
            catalog_by_source(&fx.store, PackSource::UnreachableGarbage).len(),
            1
        );

        let junk = ObjectId::hash_object(ObjectType::Blob, b"junk");
        let garbage = catalog_by_source(&fx.store, PackSource::UnreachableGarbage);
        assert!(pack_holds(&fx.store, &garbage[0], &junk));
    }

    #[test]
    fn test_coalesce_limit_zero_leaves_garbage_in_place() {
        let fx = fixture_at(NOON);
        let (commit, _, _) = insert_chain(&fx.store, b"head", None, &[]);
        let (g1, _) = publish_pack(
            &fx.store,
            PackSource::UnreachableGarbage,
            &[b"left alone"],
            NOON - HOUR_MS,
        );
        fx.store
            .refs()
            .write_ref("refs/heads/main", commit)
            .unwrap();

        let mut gc = GarbageCollector::new(&fx.store);
        gc.set_coalesce_garbage_limit(0);
        assert!(gc.pack(&mut NullProgress).unwrap());

        // g1 was neither pruned nor rewritten.
        let garbage = catalog_by_source(&fx.store, PackSource::UnreachableGarbage);
        assert_eq!(garbage.len(), 1);
        assert_eq!(garbage[0].name(), g1.name());
    }

    #[test]
    fn test_index_version_precondition() {
        let fx = fixture_at(NOON);
        let (_, _) = publish_pack(&fx.store, PackSource::Insert, &[b"x"], NOON);

        let mut gc = GarbageCollector::new(&fx.store);
        let mut config = PackConfig::default();
        config.index_version = 1;
        gc.set_pack_config(config);

        assert!(matches!(
            gc.pack(&mut NullProgress),
            Err(DepotError::Precondition(_))
        ));
        // No side effects.
        assert_eq!(fx.store.odb().packs().unwrap().len(), 1);
    }

    #[test]
    fn test_cancellation_rolls_back() {
        let fx = fixture_at(NOON);
        let (commit, _, _) = insert_chain(&fx.store, b"cancel me", None, &[b"junk"]);
        fx.store
            .refs()
            .write_ref("refs/heads/main", commit)
            .unwrap();
        let before: Vec<String> = fx
            .store
            .odb()
            .packs()
            .unwrap()
            .iter()
            .map(|d| d.name().to_string())
            .collect();

        let mut pm = RecordingProgress {
            cancel_after: Some(1),
            ..Default::default()
        };
        let mut gc = GarbageCollector::new(&fx.store);
        assert!(matches!(gc.pack(&mut pm), Err(DepotError::Cancelled)));

        // Catalog untouched, and no stray pack files beyond the committed
        // ones plus the manifest.
        let after: Vec<String> = fx
            .store
            .odb()
            .packs()
            .unwrap()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(before, after);

        let files = fx
            .store
            .backend()
            .read_dir(std::path::Path::new("objects/pack"))
            .unwrap();
        // One pack + one index + manifest.
        assert_eq!(files.len(), 3);
        let _ = &fx.tmp;
    }

    #[test]
    fn test_commit_race_returns_false_and_rolls_back() {
        let fx = fixture_at(NOON);
        // Every object is reachable, so after the heads phase the run no
        // longer reads the source pack and the racer can safely steal it.
        let (commit, _, _) = insert_chain(&fx.store, b"raced", None, &[]);
        fx.store
            .refs()
            .write_ref("refs/heads/main", commit)
            .unwrap();
        let p1 = fx.store.odb().packs().unwrap().remove(0);

        // Steals the source pack out of the catalog once the heads phase
        // has copied its last object, as a concurrent maintainer would.
        struct Racer<'a> {
            store: &'a Store,
            victim: PackDescription,
            updates: u64,
            fired: bool,
        }

        impl ProgressMonitor for Racer<'_> {
            fn begin_task(&mut self, _title: &str, _total: u64) {}

            fn update(&mut self, delta: u64) {
                self.updates += delta;
                if self.updates >= self.victim.object_count() && !self.fired {
                    self.fired = true;
                    assert!(self
                        .store
                        .odb()
                        .commit_pack(&[], std::slice::from_ref(&self.victim))
                        .unwrap());
                }
            }

            fn end_task(&mut self) {}
        }

        let mut pm = Racer {
            store: &fx.store,
            victim: p1,
            updates: 0,
            fired: false,
        };

        let mut gc = GarbageCollector::new(&fx.store);
        assert!(!gc.pack(&mut pm).unwrap());
        assert!(pm.fired);

        // The racer won; this run's packs were rolled back.
        assert!(fx.store.odb().packs().unwrap().is_empty());
        let files = fx
            .store
            .backend()
            .read_dir(std::path::Path::new("objects/pack"))
            .unwrap();
        assert_eq!(files.len(), 1, "only the manifest should remain");
    }

    // --- classifier boundaries ---

    fn garbage_desc(size: u64, last_modified: i64) -> PackDescription {
        let mut desc = PackDescription::new("pack-test", PackSource::UnreachableGarbage, 0);
        desc.set_file_size(PackExt::Pack, size);
        desc.set_last_modified(last_modified);
        desc
    }

    #[test]
    fn test_expiry_boundaries() {
        let fx = fixture_at(NOON);
        let gc = GarbageCollector::new(&fx.store);

        let old = garbage_desc(1024, NOON - 48 * HOUR_MS);

        // Normal expiry.
        assert!(gc.pack_is_expired_garbage(&old, NOON - HOUR_MS, NOON));

        // ttl == 0 disables expiry regardless of age.
        let mut gc0 = GarbageCollector::new(&fx.store);
        gc0.set_garbage_ttl_millis(0);
        assert!(!gc0.pack_is_expired_garbage(&old, NOON - HOUR_MS, NOON));

        // No prior GC: most_recent_gc == 0 and nothing expires.
        assert!(!gc.pack_is_expired_garbage(&old, 0, NOON));

        // Equal to most_recent_gc is not strictly older.
        let boundary = garbage_desc(1024, NOON - 25 * HOUR_MS);
        assert!(!gc.pack_is_expired_garbage(&boundary, NOON - 25 * HOUR_MS, NOON));

        // ttl of 1 ms with zero age: not yet expired.
        let mut gc1 = GarbageCollector::new(&fx.store);
        gc1.set_garbage_ttl_millis(1);
        let fresh = garbage_desc(1024, NOON);
        assert!(!gc1.pack_is_expired_garbage(&fresh, NOON + HOUR_MS, NOON));
        // One millisecond of age reaches the window.
        let aged = garbage_desc(1024, NOON - 1);
        assert!(gc1.pack_is_expired_garbage(&aged, NOON + HOUR_MS, NOON));
    }

    #[test]
    fn test_coalesce_size_boundaries() {
        let fx = fixture_at(NOON);
        let mut gc = GarbageCollector::new(&fx.store);
        gc.set_garbage_ttl_millis(0); // isolate the size predicate

        let pack_size = 4096u64;
        let desc = garbage_desc(pack_size, NOON - HOUR_MS);

        gc.set_coalesce_garbage_limit(pack_size - 1);
        assert!(!gc.pack_is_coalesceable_garbage(&desc, NOON));

        gc.set_coalesce_garbage_limit(pack_size);
        assert!(!gc.pack_is_coalesceable_garbage(&desc, NOON));

        gc.set_coalesce_garbage_limit(pack_size + 1);
        assert!(gc.pack_is_coalesceable_garbage(&desc, NOON));

        gc.set_coalesce_garbage_limit(0);
        assert!(!gc.pack_is_coalesceable_garbage(&desc, NOON));

        gc.set_coalesce_garbage_limit(u64::MAX);
        assert!(gc.pack_is_coalesceable_garbage(&desc, NOON));
    }

    #[test]
    fn test_coalesce_day_and_slot_boundaries() {
        let fx = fixture_at(NOON);
        let mut gc = GarbageCollector::new(&fx.store);
        gc.set_coalesce_garbage_limit(u64::MAX);
        gc.set_garbage_ttl_millis(24 * HOUR_MS);

        // Different calendar day: never coalesced.
        let yesterday = garbage_desc(1024, NOON - 26 * HOUR_MS);
        assert!(!gc.pack_is_coalesceable_garbage(&yesterday, NOON));

        // Same day, same 8-hour slot (ttl/3): coalesced.
        let same_slot = garbage_desc(1024, NOON - 2 * HOUR_MS);
        assert!(gc.pack_is_coalesceable_garbage(&same_slot, NOON));

        // Same day, earlier slot: kept separate.
        let earlier_slot = garbage_desc(1024, NOON - 5 * HOUR_MS);
        assert!(!gc.pack_is_coalesceable_garbage(&earlier_slot, NOON));

        // TTL above one day coalesces anything from today.
        gc.set_garbage_ttl_millis(25 * HOUR_MS);
        assert!(gc.pack_is_coalesceable_garbage(&earlier_slot, NOON));

        // Degenerate TTL whose third truncates to zero: never coalesced.
        gc.set_garbage_ttl_millis(2);
        let just_now = garbage_desc(1024, NOON);
        assert!(!gc.pack_is_coalesceable_garbage(&just_now, NOON));
    }

    #[test]
    fn test_classifier_is_deterministic() {
        let fx = fixture_at(NOON);
        let gc = GarbageCollector::new(&fx.store);

        let desc = garbage_desc(1024, NOON - 2 * HOUR_MS);
        let first = gc.pack_is_coalesceable_garbage(&desc, NOON);
        let second = gc.pack_is_coalesceable_garbage(&desc, NOON);
        assert_eq!(first, second);

        let expired_first = gc.pack_is_expired_garbage(&desc, NOON - HOUR_MS, NOON);
        let expired_second = gc.pack_is_expired_garbage(&desc, NOON - HOUR_MS, NOON);
        assert_eq!(expired_first, expired_second);
    }

    #[test]
    fn test_progress_reports_garbage_scan_per_object() {
        let fx = fixture_at(NOON);
        let (commit, _, _) = insert_chain(&fx.store, b"progress", None, &[b"j1", b"j2"]);
        fx.store
            .refs()
            .write_ref("refs/heads/main", commit)
            .unwrap();

        let mut pm = RecordingProgress::default();
        let mut gc = GarbageCollector::new(&fx.store);
        assert!(gc.pack(&mut pm).unwrap());

        // One "Finding garbage" update per source index entry (5 objects),
        // plus the writer's own per-object updates.
        let scan = pm
            .tasks
            .iter()
            .find(|(title, _)| title == "Finding garbage")
            .unwrap();
        assert_eq!(scan.1, 5);
    }
}
