//! Depot Core Library
//!
//! A content-addressed object store for version-control data, providing:
//! - Pack-organized object storage over pluggable backends
//! - Reference management with heads, tags and transactional refs
//! - A garbage collection and repack engine
//! - Race-free pack-set commits under concurrent inserters
//!
//! # Quick Start
//!
//! ```
//! use depot_core::{ObjectType, Store};
//! use tempfile::TempDir;
//!
//! let tmp = TempDir::new().unwrap();
//! let store = Store::init(tmp.path()).unwrap();
//!
//! // Insert an object through a pack.
//! let mut ins = store.inserter();
//! let id = ins.insert(ObjectType::Blob, b"hello world".to_vec()).unwrap();
//! ins.flush().unwrap();
//!
//! // Read it back.
//! let reader = store.odb().new_reader().unwrap();
//! let (_, data) = reader.read_object(&id).unwrap();
//! assert_eq!(data, b"hello world");
//! ```
//!
//! # Garbage Collection
//!
//! The GC engine copies everything reachable from heads and tags into
//! consolidated packs, segregates unreachable objects into garbage packs
//! kept under a time-to-live, and swaps the pack set atomically:
//!
//! ```
//! use depot_core::{GarbageCollector, NullProgress, Store};
//! use tempfile::TempDir;
//!
//! let tmp = TempDir::new().unwrap();
//! let store = Store::init(tmp.path()).unwrap();
//!
//! let mut gc = GarbageCollector::new(&store);
//! gc.set_garbage_ttl_millis(24 * 60 * 60 * 1000);
//! assert!(gc.pack(&mut NullProgress).unwrap());
//! ```

mod backend;
mod cache;
mod clock;
mod config;
mod error;
mod gc;
mod inserter;
mod lock;
mod object_id;
mod odb;
mod pack;
mod progress;
mod refs;
mod store;
mod types;
mod walk;
mod writer;

pub use backend::{Backend, LocalBackend};
pub use cache::BlockCache;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{
    Config, GcTuning, PackConfig, DEFAULT_COALESCE_GARBAGE_LIMIT, DEFAULT_GARBAGE_TTL_MILLIS,
    REQUIRED_INDEX_VERSION,
};
pub use error::{DepotError, Result};
pub use gc::GarbageCollector;
pub use inserter::PackInserter;
pub use lock::{create_unique_file, GcLock, LockToken};
pub use object_id::{ObjectId, ObjectType};
pub use odb::{ObjectDatabase, ObjectReader};
pub use pack::{
    PackDescription, PackExt, PackFile, PackIndex, PackSource, PackStats, ReverseIndex,
    PACK_HEADER_LEN, PACK_TRAILER_LEN,
};
pub use progress::{NullProgress, ProgressMonitor};
pub use refs::{FileRefDatabase, Ref, RefDatabase, R_HEADS, R_REFS, R_TAGS, R_TXN};
pub use store::{Store, DEPOT_DIR};
pub use types::{CommitObj, TagObj, TreeEntry, TreeObj};
pub use walk::RevWalk;
pub use writer::{ObjectIdSet, PackWriter};
