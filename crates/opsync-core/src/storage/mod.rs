//! Storage layer
//!
//! Byte-level persistence for the local mirror and the session file.
//!
//! ## Architecture
//!
//! - **MirrorBackend**: key/value store of opaque payloads. The mirror
//!   layer above it owns encoding, versioning and the pending log.
//! - **FileBackend**: one JSON file per key, written atomically
//! - **SqliteBackend**: a single SQLite database with one row per key
//! - **MemoryBackend**: process-local map, used by tests and the `memory` mirror backend

pub mod error;
pub mod memory;
pub mod persistence;
pub mod schema;
pub mod sqlite;

use std::sync::Arc;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use persistence::FileBackend;
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
pub use sqlite::SqliteBackend;

use crate::config::{Config, MirrorBackendKind};

/// Durable key/value storage for mirrored payloads
///
/// Implementations must be safe to share between the coordinator and
/// background persist tasks.
pub trait MirrorBackend: Send + Sync {
    /// Read the payload stored under `key`, `None` if absent
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Replace the payload stored under `key`
    fn write(&self, key: &str, bytes: &[u8]) -> StorageResult<()>;

    /// Remove `key`; removing a missing key is not an error
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// All keys currently stored, sorted
    fn keys(&self) -> StorageResult<Vec<String>>;
}

/// Open the backend selected by `config.mirror_backend`
pub fn open_backend(config: &Config) -> StorageResult<Arc<dyn MirrorBackend>> {
    let backend: Arc<dyn MirrorBackend> = match config.mirror_backend {
        MirrorBackendKind::File => Arc::new(FileBackend::new(config.mirror_dir())),
        MirrorBackendKind::Sqlite => Arc::new(SqliteBackend::open(&config.sqlite_path())?),
        MirrorBackendKind::Memory => Arc::new(MemoryBackend::new()),
    };
    Ok(backend)
}
