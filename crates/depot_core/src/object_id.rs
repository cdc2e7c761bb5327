//! Object identification and canonical envelope format.

use crate::error::{DepotError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte BLAKE3 content hash used to identify objects.
///
/// ObjectIds are the foundation of depot's content-addressed storage.
/// The same content always produces the same ObjectId, enabling
/// deduplication and integrity verification. Ids are totally ordered
/// so object sets can be kept as sorted sequences.
///
/// # Examples
///
/// ```
/// use depot_core::ObjectId;
///
/// let id = ObjectId::from_bytes([0xab; 32]);
/// assert_eq!(id.as_hex().len(), 64);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId([u8; 32]);

impl ObjectId {
    /// The length of an ObjectId in bytes.
    pub const LEN: usize = 32;

    /// The length of an ObjectId as a hex string.
    pub const HEX_LEN: usize = 64;

    /// Creates an ObjectId from raw bytes.
    #[inline]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns a reference to the underlying 32-byte BLAKE3 hash.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns this ObjectId as a lowercase hex string.
    ///
    /// The returned string is always exactly 64 characters long.
    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses an ObjectId from a hex string.
    ///
    /// # Errors
    ///
    /// Returns `DepotError::InvalidHex` if the string is not valid hex
    /// or is not exactly 64 characters long.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != Self::HEX_LEN {
            return Err(DepotError::InvalidHex(format!(
                "expected {} hex chars, got {}",
                Self::HEX_LEN,
                s.len()
            )));
        }

        let bytes = hex::decode(s).map_err(|e| DepotError::InvalidHex(e.to_string()))?;

        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| DepotError::InvalidHex("invalid length".to_string()))?;

        Ok(Self(arr))
    }

    /// Computes the ObjectId for an object of the given type.
    pub fn hash_object(otype: ObjectType, payload: &[u8]) -> Self {
        let canonical = canonical_bytes(otype, payload);
        let hash = blake3::hash(&canonical);
        Self::from_bytes(*hash.as_bytes())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({}...)", &self.as_hex()[..12])
    }
}

/// The type of a stored object.
///
/// The discriminant is persisted as the per-entry type byte in pack files,
/// so the values are stable.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    /// A commit pointing at a tree and zero or more parents.
    Commit = 1,
    /// A directory listing of named entries.
    Tree = 2,
    /// Raw file contents.
    Blob = 3,
    /// An annotated tag naming another object.
    Tag = 4,
}

impl ObjectType {
    /// Returns the stable on-disk code for this type.
    #[inline]
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Parses an on-disk type code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Commit),
            2 => Some(Self::Tree),
            3 => Some(Self::Blob),
            4 => Some(Self::Tag),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        };
        write!(f, "{}", s)
    }
}

/// Canonical envelope magic bytes.
pub(crate) const MAGIC: &[u8; 5] = b"DPOB1";

/// Constructs canonical bytes for hashing.
///
/// Format:
/// - Magic: "DPOB1" (5 bytes)
/// - Type code: u8 (1 byte)
/// - Length: u64 LE (8 bytes)
/// - Payload: variable bytes
pub(crate) fn canonical_bytes(otype: ObjectType, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + 1 + 8 + payload.len());
    out.extend_from_slice(MAGIC);
    out.push(otype.code());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_roundtrip() {
        let bytes = [42u8; 32];
        let id = ObjectId::from_bytes(bytes);
        assert_eq!(id.as_bytes(), &bytes);
    }

    #[test]
    fn test_hex_roundtrip() {
        let mut bytes = [0u8; 32];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (i % 256) as u8;
        }

        let id = ObjectId::from_bytes(bytes);
        let hex = id.as_hex();
        assert_eq!(hex.len(), 64);

        let parsed = ObjectId::from_hex(&hex).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_from_hex_invalid_length() {
        let result = ObjectId::from_hex("abc");
        assert!(matches!(result, Err(DepotError::InvalidHex(_))));
    }

    #[test]
    fn test_from_hex_invalid_chars() {
        let result = ObjectId::from_hex(&"g".repeat(64));
        assert!(matches!(result, Err(DepotError::InvalidHex(_))));
    }

    #[test]
    fn test_ordering_is_total() {
        let a = ObjectId::from_bytes([1; 32]);
        let b = ObjectId::from_bytes([2; 32]);
        assert!(a < b);
        assert_eq!(a.cmp(&a), std::cmp::Ordering::Equal);
    }

    #[test]
    fn test_hash_deterministic() {
        let data = b"test data";
        let id1 = ObjectId::hash_object(ObjectType::Blob, data);
        let id2 = ObjectId::hash_object(ObjectType::Blob, data);
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_hash_depends_on_type() {
        let data = b"same payload";
        let blob = ObjectId::hash_object(ObjectType::Blob, data);
        let tree = ObjectId::hash_object(ObjectType::Tree, data);
        assert_ne!(blob, tree);
    }

    #[test]
    fn test_type_code_roundtrip() {
        for t in [
            ObjectType::Commit,
            ObjectType::Tree,
            ObjectType::Blob,
            ObjectType::Tag,
        ] {
            assert_eq!(ObjectType::from_code(t.code()), Some(t));
        }
        assert_eq!(ObjectType::from_code(0), None);
        assert_eq!(ObjectType::from_code(5), None);
    }

    #[test]
    fn test_canonical_bytes_format() {
        let payload = b"test";
        let canonical = canonical_bytes(ObjectType::Blob, payload);

        assert_eq!(&canonical[..5], MAGIC);
        assert_eq!(canonical[5], ObjectType::Blob.code());

        let len = u64::from_le_bytes(canonical[6..14].try_into().unwrap());
        assert_eq!(len, 4);
        assert_eq!(&canonical[14..], payload);
    }
}
