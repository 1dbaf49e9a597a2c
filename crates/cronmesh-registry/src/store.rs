//! EmbeddedRegistry — redb-backed registry for single-host clusters.
//!
//! Implements [`RegistryClient`] over a redb database so several scheduler
//! processes on one machine (or one process in tests) can share coordination
//! state through a file. Paths are table keys, payloads are the `&[u8]`
//! value column. Each handle produced by [`EmbeddedRegistry::session`] is an
//! independent session with its own ephemeral-node set; an orderly `close`
//! removes that session's ephemerals. A crashed process never closes, so its
//! liveness markers linger in the file. Detecting and taking over such
//! abandoned work is the scheduling layer's job, not the store's.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::debug;

use crate::client::RegistryClient;
use crate::error::{RegistryError, RegistryResult};
use crate::paths::{parent_of, validate};

/// Single table mapping registry paths to raw payloads.
const REGISTRY: TableDefinition<&str, &[u8]> = TableDefinition::new("registry");

/// Convert any `Display` error into a `RegistryError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| RegistryError::$variant(e.to_string())
    };
}

/// Per-session bookkeeping shared by clones of one handle.
struct SessionState {
    ephemerals: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl SessionState {
    fn fresh() -> Arc<Self> {
        Arc::new(Self {
            ephemerals: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        })
    }
}

/// Thread-safe registry client backed by redb.
///
/// Cloning shares the session; [`EmbeddedRegistry::session`] forks a new
/// session over the same backing store.
#[derive(Clone)]
pub struct EmbeddedRegistry {
    db: Arc<Database>,
    session: Arc<SessionState>,
}

impl EmbeddedRegistry {
    /// Open (or create) a persistent registry at the given path.
    pub fn open(path: &Path) -> RegistryResult<Self> {
        let db = Database::create(path).map_err(map_err!(Backend))?;
        let registry = Self {
            db: Arc::new(db),
            session: SessionState::fresh(),
        };
        registry.ensure_root()?;
        debug!(?path, "embedded registry opened");
        Ok(registry)
    }

    /// Create an ephemeral in-memory registry (for testing).
    pub fn open_in_memory() -> RegistryResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Backend))?;
        let registry = Self {
            db: Arc::new(db),
            session: SessionState::fresh(),
        };
        registry.ensure_root()?;
        debug!("in-memory registry opened");
        Ok(registry)
    }

    /// Fork a new session over the same backing store.
    ///
    /// The fork has its own ephemeral set and its own closed flag, so it
    /// behaves like a second cluster node connecting to the same registry.
    pub fn session(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            session: SessionState::fresh(),
        }
    }

    /// Create the table and seed the root node if absent.
    fn ensure_root(&self) -> RegistryResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Backend))?;
        {
            // Opening a table in a write transaction creates it if absent.
            let mut table = txn.open_table(REGISTRY).map_err(map_err!(Backend))?;
            let seeded = table.get("/").map_err(map_err!(Backend))?.is_some();
            if !seeded {
                table.insert("/", b"".as_slice()).map_err(map_err!(Backend))?;
            }
        }
        txn.commit().map_err(map_err!(Backend))?;
        Ok(())
    }

    fn ensure_open(&self) -> RegistryResult<()> {
        if self.session.closed.load(Ordering::SeqCst) {
            return Err(RegistryError::Backend("session is closed".to_string()));
        }
        Ok(())
    }

    fn create_inner(&self, path: &str, data: &[u8]) -> RegistryResult<()> {
        validate(path)?;
        let txn = self.db.begin_write().map_err(map_err!(Backend))?;
        {
            let mut table = txn.open_table(REGISTRY).map_err(map_err!(Backend))?;
            if let Some(parent) = parent_of(path) {
                if table.get(parent).map_err(map_err!(Backend))?.is_none() {
                    return Err(RegistryError::NotFound(parent.to_string()));
                }
            }
            if table.get(path).map_err(map_err!(Backend))?.is_some() {
                return Err(RegistryError::AlreadyExists(path.to_string()));
            }
            table.insert(path, data).map_err(map_err!(Backend))?;
        }
        txn.commit().map_err(map_err!(Backend))?;
        debug!(%path, "node created");
        Ok(())
    }

    fn delete_inner(&self, path: &str) -> RegistryResult<()> {
        validate(path)?;
        let txn = self.db.begin_write().map_err(map_err!(Backend))?;
        {
            let mut table = txn.open_table(REGISTRY).map_err(map_err!(Backend))?;
            let has_child = table
                .iter()
                .map_err(map_err!(Backend))?
                .filter_map(|entry| entry.ok())
                .any(|(key, _)| parent_of(key.value()) == Some(path));
            if has_child {
                return Err(RegistryError::NotEmpty(path.to_string()));
            }
            let removed = table.remove(path).map_err(map_err!(Backend))?.is_some();
            if !removed {
                return Err(RegistryError::NotFound(path.to_string()));
            }
        }
        txn.commit().map_err(map_err!(Backend))?;
        debug!(%path, "node deleted");
        Ok(())
    }
}

#[async_trait]
impl RegistryClient for EmbeddedRegistry {
    async fn exists(&self, path: &str) -> RegistryResult<bool> {
        self.ensure_open()?;
        validate(path)?;
        let txn = self.db.begin_read().map_err(map_err!(Backend))?;
        let table = txn.open_table(REGISTRY).map_err(map_err!(Backend))?;
        Ok(table.get(path).map_err(map_err!(Backend))?.is_some())
    }

    async fn create(&self, path: &str, data: &[u8]) -> RegistryResult<()> {
        self.ensure_open()?;
        self.create_inner(path, data)
    }

    async fn create_ephemeral(&self, path: &str, data: &[u8]) -> RegistryResult<()> {
        self.ensure_open()?;
        self.create_inner(path, data)?;
        self.session.ephemerals.lock().unwrap().insert(path.to_string());
        Ok(())
    }

    async fn read_data(&self, path: &str) -> RegistryResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        validate(path)?;
        let txn = self.db.begin_read().map_err(map_err!(Backend))?;
        let table = txn.open_table(REGISTRY).map_err(map_err!(Backend))?;
        match table.get(path).map_err(map_err!(Backend))? {
            Some(guard) if !guard.value().is_empty() => Ok(Some(guard.value().to_vec())),
            _ => Ok(None),
        }
    }

    async fn write_data(&self, path: &str, data: &[u8]) -> RegistryResult<()> {
        self.ensure_open()?;
        validate(path)?;
        let txn = self.db.begin_write().map_err(map_err!(Backend))?;
        {
            let mut table = txn.open_table(REGISTRY).map_err(map_err!(Backend))?;
            if table.get(path).map_err(map_err!(Backend))?.is_none() {
                return Err(RegistryError::NotFound(path.to_string()));
            }
            table.insert(path, data).map_err(map_err!(Backend))?;
        }
        txn.commit().map_err(map_err!(Backend))?;
        Ok(())
    }

    async fn get_children(&self, path: &str) -> RegistryResult<Vec<String>> {
        self.ensure_open()?;
        validate(path)?;
        let txn = self.db.begin_read().map_err(map_err!(Backend))?;
        let table = txn.open_table(REGISTRY).map_err(map_err!(Backend))?;
        if table.get(path).map_err(map_err!(Backend))?.is_none() {
            return Err(RegistryError::NotFound(path.to_string()));
        }
        let mut children = Vec::new();
        for entry in table.iter().map_err(map_err!(Backend))? {
            let (key, _) = entry.map_err(map_err!(Backend))?;
            let key = key.value();
            if parent_of(key) == Some(path) {
                if let Some(name) = key.rsplit('/').next() {
                    children.push(name.to_string());
                }
            }
        }
        children.sort();
        Ok(children)
    }

    async fn delete(&self, path: &str) -> RegistryResult<()> {
        self.ensure_open()?;
        let removed = self.delete_inner(path);
        if removed.is_ok() {
            self.session.ephemerals.lock().unwrap().remove(path);
        }
        removed
    }

    async fn close(&self) -> RegistryResult<()> {
        if self.session.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let ephemerals: Vec<String> = {
            let mut set = self.session.ephemerals.lock().unwrap();
            set.drain().collect()
        };
        for path in &ephemerals {
            match self.delete_inner(path) {
                Ok(()) => {}
                // Another actor may have cleaned the marker up already.
                Err(RegistryError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        debug!(count = ephemerals.len(), "session closed, ephemerals removed");
        Ok(())
    }
}
