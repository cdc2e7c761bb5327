//! Configuration types for the depot store.

use crate::backend::Backend;
use crate::error::{DepotError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Required pack index version. Any other value is a fatal precondition
/// failure at the start of a GC run.
pub const REQUIRED_INDEX_VERSION: u32 = 2;

/// Default upper size bound for coalescing a garbage pack (50 MiB).
pub const DEFAULT_COALESCE_GARBAGE_LIMIT: u64 = 50 * 1024 * 1024;

/// Default retention window for unreachable packs (24 hours).
pub const DEFAULT_GARBAGE_TTL_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Comprehensive configuration for a depot store.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Pack writer configuration.
    #[serde(default)]
    pub pack: PackConfig,

    /// Garbage collection tuning.
    #[serde(default)]
    pub gc: GcTuning,
}

impl Config {
    /// Load configuration from `config.toml` under the store root.
    pub fn load(backend: &dyn Backend, root: &Path) -> Result<Self> {
        let path = root.join("config.toml");
        if backend.exists(&path) {
            let content = backend.read(&path)?;
            let content = String::from_utf8(content)
                .map_err(|e| DepotError::ConfigError(format!("config is not UTF-8: {}", e)))?;
            toml::from_str(&content)
                .map_err(|e| DepotError::ConfigError(format!("failed to parse config: {}", e)))
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to `config.toml` under the store root.
    pub fn save(&self, backend: &dyn Backend, root: &Path) -> Result<()> {
        let path = root.join("config.toml");
        let content = toml::to_string_pretty(self)
            .map_err(|e| DepotError::ConfigError(format!("failed to serialize config: {}", e)))?;
        backend.write(&path, content.as_bytes())
    }
}

/// Pack writer configuration.
///
/// The delta and reuse flags are honored by the writer where they apply;
/// the GC engine overrides them per phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackConfig {
    /// Pack index version to write. Must be 2.
    pub index_version: u32,

    /// Zstd compression level for pack entries (default: 3).
    pub compression_level: i32,

    /// Encode delta bases as offsets rather than full ids.
    pub delta_base_as_offset: bool,

    /// Reuse existing delta chains for commits.
    pub reuse_delta_commits: bool,

    /// Reuse existing deltas from source packs.
    pub reuse_deltas: bool,

    /// Copy already-compressed entries from source packs instead of
    /// recompressing.
    pub reuse_objects: bool,

    /// Attempt delta compression while writing.
    pub delta_compress: bool,

    /// Emit a bitmap index alongside packs that contain commits.
    pub build_bitmaps: bool,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            index_version: REQUIRED_INDEX_VERSION,
            compression_level: 3,
            delta_base_as_offset: false,
            reuse_delta_commits: true,
            reuse_deltas: false,
            reuse_objects: false,
            delta_compress: true,
            build_bitmaps: true,
        }
    }
}

/// Garbage collection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcTuning {
    /// Upper size bound in bytes for folding an unreachable pack into the
    /// new garbage pack. 0 disables coalescing; `u64::MAX` coalesces
    /// everything under TTL constraints.
    pub coalesce_garbage_limit: u64,

    /// Minimum age in milliseconds before an unreachable pack may be
    /// expired. 0 disables expiry.
    pub garbage_ttl_millis: i64,
}

impl Default for GcTuning {
    fn default() -> Self {
        Self {
            coalesce_garbage_limit: DEFAULT_COALESCE_GARBAGE_LIMIT,
            garbage_ttl_millis: DEFAULT_GARBAGE_TTL_MILLIS,
        }
    }
}
