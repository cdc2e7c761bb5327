//! Store handle tying the backend, object database and ref database.

use crate::backend::{Backend, LocalBackend};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{DepotError, Result};
use crate::inserter::PackInserter;
use crate::odb::ObjectDatabase;
use crate::refs::FileRefDatabase;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directory holding a store within a working tree.
pub const DEPOT_DIR: &str = ".depot";

/// A depot store: pack-organized objects plus refs over one backend.
pub struct Store {
    backend: Arc<dyn Backend>,
    odb: ObjectDatabase,
    refdb: FileRefDatabase,
    config: Config,
    clock: Arc<dyn Clock>,
}

impl Store {
    /// Initializes a new store in `path/.depot` on the local filesystem.
    pub fn init(path: impl AsRef<Path>) -> Result<Self> {
        let backend: Arc<dyn Backend> = Arc::new(LocalBackend::new(path.as_ref().join(DEPOT_DIR)));
        Self::init_backend(backend)
    }

    /// Initializes a new store at the root of `backend`.
    pub fn init_backend(backend: Arc<dyn Backend>) -> Result<Self> {
        backend.create()?;
        backend.create_dir_all(Path::new("objects/pack"))?;

        let config = Config::default();
        config.save(backend.as_ref(), Path::new(""))?;

        let refdb = FileRefDatabase::new(Arc::clone(&backend), "");
        refdb.write_symbolic_ref("HEAD", "refs/heads/main")?;

        Ok(Self {
            odb: ObjectDatabase::new(Arc::clone(&backend), ""),
            refdb,
            config,
            clock: Arc::new(SystemClock),
            backend,
        })
    }

    /// Opens an existing store under `path/.depot`.
    ///
    /// # Errors
    ///
    /// Returns an error when no store exists there.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().join(DEPOT_DIR);
        if !root.is_dir() {
            return Err(DepotError::ObjDb(format!(
                "not a depot store: {}",
                path.as_ref().display()
            )));
        }
        let backend: Arc<dyn Backend> = Arc::new(LocalBackend::new(root));
        Self::open_backend(backend)
    }

    /// Opens an existing store at the root of `backend`.
    pub fn open_backend(backend: Arc<dyn Backend>) -> Result<Self> {
        if !backend.exists(Path::new("objects")) {
            return Err(DepotError::ObjDb("not a depot store".to_string()));
        }

        let config = Config::load(backend.as_ref(), Path::new(""))?;
        Ok(Self {
            odb: ObjectDatabase::new(Arc::clone(&backend), ""),
            refdb: FileRefDatabase::new(Arc::clone(&backend), ""),
            config,
            clock: Arc::new(SystemClock),
            backend,
        })
    }

    /// Replaces the clock. Tests inject a fixed instant and time zone.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The object database.
    pub fn odb(&self) -> &ObjectDatabase {
        &self.odb
    }

    /// The reference database.
    pub fn refs(&self) -> &FileRefDatabase {
        &self.refdb
    }

    /// Store configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The clock used for pack timestamps and retention decisions.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// The storage backend.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Creates an inserter writing into this store.
    pub fn inserter(&self) -> PackInserter<'_> {
        PackInserter::new(&self.odb, self.clock.as_ref())
    }
}
