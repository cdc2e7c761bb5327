//! Typed object models for the version-control DAG.

use crate::error::{DepotError, Result};
use crate::object_id::{ObjectId, ObjectType};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A commit object.
///
/// Points at the root tree of the committed state and at zero or more
/// parent commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitObj {
    /// Root tree of this commit.
    pub tree: ObjectId,

    /// Parent commits, oldest first.
    pub parents: Vec<ObjectId>,

    /// Author timestamp in Unix milliseconds.
    pub author_time_ms: i64,

    /// Commit message.
    pub message: String,
}

/// One entry of a tree object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Entry name within the tree.
    pub name: String,

    /// Object the entry points at.
    pub id: ObjectId,

    /// Type of the referenced object (tree or blob).
    pub kind: ObjectType,
}

/// A tree object: a sorted listing of named entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeObj {
    /// Entries sorted by name for deterministic encoding.
    pub entries: Vec<TreeEntry>,
}

/// An annotated tag object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagObj {
    /// The object this tag names.
    pub target: ObjectId,

    /// Type of the target object.
    pub target_type: ObjectType,

    /// Tag name.
    pub name: String,

    /// Tag message.
    pub message: String,
}

/// Encodes a typed object with deterministic serialization.
///
/// Uses postcard for compact, deterministic binary encoding so the
/// same value always produces the same ObjectId.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(value).map_err(|e| DepotError::Serialization(e.to_string()))
}

/// Decodes a typed object payload.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    postcard::from_bytes(payload).map_err(|e| DepotError::Deserialization(e.to_string()))
}
