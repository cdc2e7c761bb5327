//! Pack files: descriptors, on-disk formats and index access.
//!
//! A pack is a binary archive of objects with a fixed 12-byte header, a body
//! of compressed entries and a 20-byte trailer. Each pack is accompanied by a
//! forward index (OID to offset, version 2) and optionally a bitmap index.

use crate::backend::Backend;
use crate::error::{DepotError, Result};
use crate::object_id::{ObjectId, ObjectType};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Pack file magic bytes.
pub const PACK_MAGIC: &[u8; 4] = b"DPCK";

/// Pack file format version.
pub const PACK_VERSION: u32 = 1;

/// Fixed pack header length: magic, version, object count.
pub const PACK_HEADER_LEN: u64 = 12;

/// Fixed pack trailer length: truncated BLAKE3 of everything before it.
pub const PACK_TRAILER_LEN: u64 = 20;

/// Index file magic bytes.
pub const INDEX_MAGIC: &[u8; 4] = b"DPIX";

/// Bitmap index file magic bytes.
pub const BITMAP_MAGIC: &[u8; 4] = b"DPBM";

/// Length of one forward-index entry: 32-byte OID plus u64 offset.
const INDEX_ENTRY_LEN: usize = ObjectId::LEN + 8;

/// The class under which a pack was produced.
///
/// Classification is a stored attribute of the pack, not computed from its
/// contents; retention policy keys off it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum PackSource {
    /// Written by a local inserter.
    Insert = 0,
    /// Received from a remote peer.
    Receive = 1,
    /// Produced by an online compaction.
    Compact = 2,
    /// Heads pack of a GC run.
    Gc = 3,
    /// Non-head reachable pack of a GC run.
    GcRest = 4,
    /// Transactional ref-tree pack of a GC run.
    GcTxn = 5,
    /// Unreachable objects retained under a TTL.
    UnreachableGarbage = 6,
}

impl PackSource {
    /// Canonical label used in catalog listings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Receive => "RECEIVE",
            Self::Compact => "COMPACT",
            Self::Gc => "GC",
            Self::GcRest => "GC_REST",
            Self::GcTxn => "GC_TXN",
            Self::UnreachableGarbage => "UNREACHABLE_GARBAGE",
        }
    }
}

/// Companion file extensions of a pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackExt {
    /// The pack data file.
    Pack,
    /// The forward index.
    Index,
    /// The optional bitmap index.
    BitmapIndex,
}

impl PackExt {
    /// File extension for this companion file.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pack => "pack",
            Self::Index => "idx",
            Self::BitmapIndex => "bitmap",
        }
    }
}

/// Opaque statistics attached to a written pack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackStats {
    /// Total objects in the pack.
    pub total_objects: u64,
    /// Commit count.
    pub commits: u64,
    /// Tree count.
    pub trees: u64,
    /// Blob count.
    pub blobs: u64,
    /// Tag count.
    pub tags: u64,
    /// Total bytes of the pack file.
    pub total_bytes: u64,
}

impl PackStats {
    pub(crate) fn record(&mut self, otype: ObjectType) {
        self.total_objects += 1;
        match otype {
            ObjectType::Commit => self.commits += 1,
            ObjectType::Tree => self.trees += 1,
            ObjectType::Blob => self.blobs += 1,
            ObjectType::Tag => self.tags += 1,
        }
    }
}

/// Descriptor of one pack file in the backend.
///
/// Allocated by the object database, populated while the pack is written,
/// then either committed to the catalog or rolled back. A committed
/// descriptor is immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackDescription {
    name: String,
    source: PackSource,
    last_modified_ms: i64,
    pack_size: u64,
    index_size: u64,
    bitmap_size: Option<u64>,
    object_count: u64,
    index_version: u32,
    estimated_pack_size: u64,
    stats: Option<PackStats>,
}

impl PackDescription {
    /// Creates a fresh descriptor for a pack about to be written.
    pub fn new(name: impl Into<String>, source: PackSource, estimated_pack_size: u64) -> Self {
        Self {
            name: name.into(),
            source,
            last_modified_ms: 0,
            pack_size: 0,
            index_size: 0,
            bitmap_size: None,
            object_count: 0,
            index_version: 0,
            estimated_pack_size,
            stats: None,
        }
    }

    /// Unique pack name, e.g. `pack-3f1a…`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The source class this pack was produced under.
    pub fn source(&self) -> PackSource {
        self.source
    }

    /// Wall-clock milliseconds at which the pack was written.
    pub fn last_modified_ms(&self) -> i64 {
        self.last_modified_ms
    }

    /// Stamps the last-modified time.
    pub fn set_last_modified(&mut self, ms: i64) {
        self.last_modified_ms = ms;
    }

    /// Bytes present for a companion file; 0 when unknown or absent.
    pub fn file_size(&self, ext: PackExt) -> u64 {
        match ext {
            PackExt::Pack => self.pack_size,
            PackExt::Index => self.index_size,
            PackExt::BitmapIndex => self.bitmap_size.unwrap_or(0),
        }
    }

    /// Records the size of a companion file.
    pub fn set_file_size(&mut self, ext: PackExt, size: u64) {
        match ext {
            PackExt::Pack => self.pack_size = size,
            PackExt::Index => self.index_size = size,
            PackExt::BitmapIndex => self.bitmap_size = Some(size),
        }
    }

    /// True when the pack carries a bitmap index.
    pub fn has_bitmap(&self) -> bool {
        self.bitmap_size.is_some()
    }

    /// Number of objects in the pack.
    pub fn object_count(&self) -> u64 {
        self.object_count
    }

    /// Records the object count.
    pub fn set_object_count(&mut self, count: u64) {
        self.object_count = count;
    }

    /// Version of the forward index.
    pub fn index_version(&self) -> u32 {
        self.index_version
    }

    /// Records the index version.
    pub fn set_index_version(&mut self, version: u32) {
        self.index_version = version;
    }

    /// Size estimate the pack was allocated under.
    pub fn estimated_pack_size(&self) -> u64 {
        self.estimated_pack_size
    }

    /// Statistics attached by the writer, if any.
    pub fn pack_stats(&self) -> Option<&PackStats> {
        self.stats.as_ref()
    }

    /// Attaches writer statistics.
    pub fn set_pack_stats(&mut self, stats: PackStats) {
        self.stats = Some(stats);
    }

    /// File name of a companion file, e.g. `pack-3f1a….idx`.
    pub fn file_name(&self, ext: PackExt) -> String {
        format!("{}.{}", self.name, ext.extension())
    }
}

/// Incremental pack stream emitter.
///
/// Writes the header up front, compressed entries as they are added, and a
/// trailer hash at the end. Tracks offsets so callers can build the forward
/// index.
pub struct PackFileWriter<'a> {
    out: &'a mut dyn Write,
    hasher: blake3::Hasher,
    offset: u64,
    compression_level: i32,
}

impl<'a> PackFileWriter<'a> {
    /// Starts a pack stream holding `object_count` entries.
    pub fn new(out: &'a mut dyn Write, object_count: u32) -> Result<Self> {
        let mut writer = Self {
            out,
            hasher: blake3::Hasher::new(),
            offset: 0,
            compression_level: 3,
        };

        let mut header = [0u8; PACK_HEADER_LEN as usize];
        header[..4].copy_from_slice(PACK_MAGIC);
        header[4..8].copy_from_slice(&PACK_VERSION.to_le_bytes());
        header[8..12].copy_from_slice(&object_count.to_le_bytes());
        writer.emit(&header)?;
        Ok(writer)
    }

    /// Sets the zstd level used for entry payloads.
    pub fn set_compression_level(&mut self, level: i32) {
        self.compression_level = level;
    }

    /// Compresses and writes one entry, returning its offset.
    pub fn write_entry(&mut self, otype: ObjectType, payload: &[u8]) -> Result<u64> {
        let compressed = zstd::encode_all(payload, self.compression_level)
            .map_err(|e| DepotError::Compression(e.to_string()))?;
        self.write_entry_raw(otype, &compressed)
    }

    /// Writes one entry whose payload is already compressed, returning its
    /// offset. Used when copying entries straight out of a source pack.
    pub fn write_entry_raw(&mut self, otype: ObjectType, compressed: &[u8]) -> Result<u64> {
        let offset = self.offset;
        self.emit(&[otype.code()])?;
        self.emit(&(compressed.len() as u32).to_le_bytes())?;
        self.emit(compressed)?;
        Ok(offset)
    }

    /// Writes the trailer and returns the total byte count of the stream.
    pub fn finish(mut self) -> Result<u64> {
        let hash = self.hasher.finalize();
        let trailer: [u8; PACK_TRAILER_LEN as usize] =
            hash.as_bytes()[..PACK_TRAILER_LEN as usize].try_into().expect("trailer length");
        self.out.write_all(&trailer)?;
        self.out.flush()?;
        Ok(self.offset + PACK_TRAILER_LEN)
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes)?;
        self.hasher.update(bytes);
        self.offset += bytes.len() as u64;
        Ok(())
    }
}

/// Writes a version-2 forward index for `entries`, which must be sorted by
/// OID. Returns the byte count written.
pub fn write_index(out: &mut dyn Write, version: u32, entries: &[(ObjectId, u64)]) -> Result<u64> {
    let mut written = 0u64;
    out.write_all(INDEX_MAGIC)?;
    out.write_all(&version.to_le_bytes())?;
    out.write_all(&(entries.len() as u32).to_le_bytes())?;
    written += 12;

    for (id, offset) in entries {
        out.write_all(id.as_bytes())?;
        out.write_all(&offset.to_le_bytes())?;
        written += INDEX_ENTRY_LEN as u64;
    }

    out.flush()?;
    Ok(written)
}

/// Parsed forward index: OID to offset, sorted by OID.
pub struct PackIndex {
    version: u32,
    entries: Vec<(ObjectId, u64)>,
}

impl PackIndex {
    /// Parses an index file.
    pub fn parse(name: &str, bytes: &[u8]) -> Result<Self> {
        let corrupt = |reason: &str| DepotError::CorruptIndex {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if bytes.len() < 12 {
            return Err(corrupt("truncated header"));
        }
        if &bytes[..4] != INDEX_MAGIC {
            return Err(corrupt("bad magic"));
        }

        let version = u32::from_le_bytes(bytes[4..8].try_into().expect("slice length"));
        let count = u32::from_le_bytes(bytes[8..12].try_into().expect("slice length")) as usize;

        let body = &bytes[12..];
        if body.len() != count * INDEX_ENTRY_LEN {
            return Err(corrupt("entry region length mismatch"));
        }

        let mut entries = Vec::with_capacity(count);
        for chunk in body.chunks_exact(INDEX_ENTRY_LEN) {
            let oid: [u8; 32] = chunk[..32].try_into().expect("slice length");
            let offset = u64::from_le_bytes(chunk[32..].try_into().expect("slice length"));
            entries.push((ObjectId::from_bytes(oid), offset));
        }

        if entries.windows(2).any(|w| w[0].0 >= w[1].0) {
            return Err(corrupt("entries not strictly sorted by oid"));
        }

        Ok(Self { version, entries })
    }

    /// The index format version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Number of objects indexed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up the pack offset of an object.
    pub fn offset_of(&self, id: &ObjectId) -> Option<u64> {
        self.entries
            .binary_search_by(|(e, _)| e.cmp(id))
            .ok()
            .map(|i| self.entries[i].1)
    }

    /// Iterates `(oid, offset)` pairs in OID order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, u64)> + '_ {
        self.entries.iter().copied()
    }
}

/// Reverse index: offsets in ascending order, answering "where does the
/// entry at `offset` end".
pub struct ReverseIndex {
    offsets: Vec<u64>,
}

impl ReverseIndex {
    /// Builds the reverse index from a forward index.
    pub fn from_index(index: &PackIndex) -> Self {
        let mut offsets: Vec<u64> = index.iter().map(|(_, o)| o).collect();
        offsets.sort_unstable();
        Self { offsets }
    }

    /// Returns the offset at which the entry starting at `offset` ends:
    /// the next entry's offset, or `max_offset` for the last entry
    /// (`pack_size - 20`, the body terminator).
    pub fn next_offset(&self, offset: u64, max_offset: u64) -> Result<u64> {
        match self.offsets.binary_search(&offset) {
            Ok(i) => Ok(self.offsets.get(i + 1).copied().unwrap_or(max_offset)),
            Err(_) => Err(DepotError::CorruptPack {
                name: String::new(),
                reason: format!("no entry starts at offset {}", offset),
            }),
        }
    }
}

/// An openable pack file: descriptor plus parsed forward index and lazily
/// built reverse index.
pub struct PackFile {
    desc: PackDescription,
    pack_path: PathBuf,
    index: PackIndex,
    reverse: OnceLock<ReverseIndex>,
}

impl PackFile {
    /// Opens a pack by reading and parsing its forward index.
    pub fn open(backend: &dyn Backend, dir: &Path, desc: PackDescription) -> Result<Self> {
        let index_path = dir.join(desc.file_name(PackExt::Index));
        let bytes = backend.read(&index_path)?;
        let index = PackIndex::parse(desc.name(), &bytes)?;

        Ok(Self {
            pack_path: dir.join(desc.file_name(PackExt::Pack)),
            desc,
            index,
            reverse: OnceLock::new(),
        })
    }

    /// The pack's descriptor.
    pub fn desc(&self) -> &PackDescription {
        &self.desc
    }

    /// The parsed forward index.
    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    /// The reverse index, built on first use.
    pub fn reverse_index(&self) -> &ReverseIndex {
        self.reverse.get_or_init(|| ReverseIndex::from_index(&self.index))
    }

    /// True when the pack holds the object.
    pub fn has_object(&self, id: &ObjectId) -> bool {
        self.index.offset_of(id).is_some()
    }

    /// Reads the persisted type of the entry at `offset`.
    pub fn object_type_at(&self, backend: &dyn Backend, offset: u64) -> Result<ObjectType> {
        let header = backend.seek_read(&self.pack_path, offset, 1)?;
        ObjectType::from_code(header[0]).ok_or_else(|| DepotError::CorruptPack {
            name: self.desc.name().to_string(),
            reason: format!("unknown object type code {} at offset {}", header[0], offset),
        })
    }

    /// Reads and decompresses the entry at `offset`.
    pub fn read_object_at(&self, backend: &dyn Backend, offset: u64) -> Result<(ObjectType, Vec<u8>)> {
        let (otype, compressed) = self.read_raw_at(backend, offset)?;
        let payload = zstd::decode_all(compressed.as_slice())
            .map_err(|e| DepotError::Compression(e.to_string()))?;
        Ok((otype, payload))
    }

    /// Reads the entry at `offset` without decompressing the payload.
    pub fn read_raw_at(&self, backend: &dyn Backend, offset: u64) -> Result<(ObjectType, Vec<u8>)> {
        let header = backend.seek_read(&self.pack_path, offset, 5)?;
        let otype = ObjectType::from_code(header[0]).ok_or_else(|| DepotError::CorruptPack {
            name: self.desc.name().to_string(),
            reason: format!("unknown object type code {} at offset {}", header[0], offset),
        })?;
        let len = u32::from_le_bytes(header[1..5].try_into().expect("slice length")) as u64;
        let compressed = backend.seek_read(&self.pack_path, offset + 5, len)?;
        Ok((otype, compressed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entries() -> Vec<(ObjectType, Vec<u8>, ObjectId)> {
        [
            (ObjectType::Commit, b"commit payload".to_vec()),
            (ObjectType::Tree, b"tree payload".to_vec()),
            (ObjectType::Blob, b"blob payload that is a bit longer".to_vec()),
        ]
        .into_iter()
        .map(|(t, p)| {
            let id = ObjectId::hash_object(t, &p);
            (t, p, id)
        })
        .collect()
    }

    #[test]
    fn test_pack_stream_layout() {
        let mut buf = Vec::new();
        let entries = sample_entries();

        let mut offsets = Vec::new();
        let mut pw = PackFileWriter::new(&mut buf, entries.len() as u32).unwrap();
        for (t, p, _) in &entries {
            offsets.push(pw.write_entry(*t, p).unwrap());
        }
        let total = pw.finish().unwrap();

        assert_eq!(total as usize, buf.len());
        assert_eq!(&buf[..4], PACK_MAGIC);
        assert_eq!(offsets[0], PACK_HEADER_LEN);
        assert!(total >= PACK_HEADER_LEN + PACK_TRAILER_LEN);

        // Trailer is the truncated hash of everything before it.
        let body_end = buf.len() - PACK_TRAILER_LEN as usize;
        let hash = blake3::hash(&buf[..body_end]);
        assert_eq!(&buf[body_end..], &hash.as_bytes()[..20]);
    }

    #[test]
    fn test_index_roundtrip_and_lookup() {
        let entries = sample_entries();
        let mut indexed: Vec<(ObjectId, u64)> = entries
            .iter()
            .enumerate()
            .map(|(i, (_, _, id))| (*id, 12 + i as u64 * 100))
            .collect();
        indexed.sort_by_key(|(id, _)| *id);

        let mut buf = Vec::new();
        let written = write_index(&mut buf, 2, &indexed).unwrap();
        assert_eq!(written as usize, buf.len());

        let index = PackIndex::parse("test", &buf).unwrap();
        assert_eq!(index.version(), 2);
        assert_eq!(index.len(), entries.len());
        for (id, offset) in &indexed {
            assert_eq!(index.offset_of(id), Some(*offset));
        }
        assert_eq!(index.offset_of(&ObjectId::from_bytes([0xee; 32])), None);
    }

    #[test]
    fn test_index_rejects_corruption() {
        assert!(matches!(
            PackIndex::parse("t", b"DPIXxxxx"),
            Err(DepotError::CorruptIndex { .. })
        ));
        assert!(matches!(
            PackIndex::parse("t", b"NOPE\x02\x00\x00\x00\x00\x00\x00\x00"),
            Err(DepotError::CorruptIndex { .. })
        ));
    }

    #[test]
    fn test_reverse_index_next_offset() {
        let ids: Vec<ObjectId> = (0u8..3).map(|i| ObjectId::from_bytes([i + 1; 32])).collect();
        let mut entries = vec![(ids[0], 12u64), (ids[1], 112u64), (ids[2], 512u64)];
        entries.sort_by_key(|(id, _)| *id);

        let mut buf = Vec::new();
        write_index(&mut buf, 2, &entries).unwrap();
        let index = PackIndex::parse("t", &buf).unwrap();
        let reverse = ReverseIndex::from_index(&index);

        assert_eq!(reverse.next_offset(12, 1000).unwrap(), 112);
        assert_eq!(reverse.next_offset(112, 1000).unwrap(), 512);
        // Last entry runs to the body terminator.
        assert_eq!(reverse.next_offset(512, 1000).unwrap(), 1000);
        assert!(reverse.next_offset(13, 1000).is_err());
    }

    #[test]
    fn test_description_accessors() {
        let mut desc = PackDescription::new("pack-abc", PackSource::Gc, 4096);
        assert_eq!(desc.name(), "pack-abc");
        assert_eq!(desc.source(), PackSource::Gc);
        assert_eq!(desc.estimated_pack_size(), 4096);
        assert_eq!(desc.file_size(PackExt::Pack), 0);
        assert!(!desc.has_bitmap());

        desc.set_file_size(PackExt::Pack, 100);
        desc.set_file_size(PackExt::Index, 52);
        desc.set_file_size(PackExt::BitmapIndex, 16);
        desc.set_last_modified(777);
        desc.set_object_count(3);
        desc.set_index_version(2);

        assert_eq!(desc.file_size(PackExt::Pack), 100);
        assert_eq!(desc.file_size(PackExt::BitmapIndex), 16);
        assert!(desc.has_bitmap());
        assert_eq!(desc.last_modified_ms(), 777);
        assert_eq!(desc.object_count(), 3);
        assert_eq!(desc.file_name(PackExt::Index), "pack-abc.idx");
    }

    #[test]
    fn test_source_labels() {
        assert_eq!(PackSource::Insert.as_str(), "INSERT");
        assert_eq!(PackSource::Receive.as_str(), "RECEIVE");
        assert_eq!(PackSource::Compact.as_str(), "COMPACT");
        assert_eq!(PackSource::Gc.as_str(), "GC");
        assert_eq!(PackSource::GcRest.as_str(), "GC_REST");
        assert_eq!(PackSource::GcTxn.as_str(), "GC_TXN");
        assert_eq!(PackSource::UnreachableGarbage.as_str(), "UNREACHABLE_GARBAGE");
    }

    #[test]
    fn test_description_serde_roundtrip() {
        let mut desc = PackDescription::new("pack-xyz", PackSource::UnreachableGarbage, 0);
        desc.set_last_modified(123456789);
        desc.set_pack_stats(PackStats {
            total_objects: 2,
            blobs: 2,
            total_bytes: 64,
            ..Default::default()
        });

        let json = serde_json::to_string(&desc).unwrap();
        let back: PackDescription = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name(), "pack-xyz");
        assert_eq!(back.source(), PackSource::UnreachableGarbage);
        assert_eq!(back.last_modified_ms(), 123456789);
        assert_eq!(back.pack_stats().unwrap().blobs, 2);
    }
}
