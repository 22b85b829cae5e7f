//! opsync Core Library
//!
//! Optimistic writes with offline fallback for records kept behind a REST
//! API. Changes show up locally at once, are sent to the server, and are
//! either confirmed, rolled back, or kept on this device when the server
//! cannot be reached.
//!
//! # Architecture
//!
//! ```text
//! RemoteStore -> LocalMirror -> DebouncedPersister -> OptimisticMutator -> SyncCoordinator
//! ```
//!
//! Views use the `TaskBoard` and `ProjectSession` facades, which only talk
//! to a `SyncCoordinator`.
//!
//! # Quick Start
//!
//! ```text
//! let store = Store::open()?;
//! let board = store.task_board()?;
//!
//! board.load(&TaskFilter::default()).await;
//! board.quick_add("Call supplier", "").await?;
//! println!("{:?}", board.stats());
//! ```
//!
//! # Modules
//!
//! - `store`: Wiring from configuration (main entry point)
//! - `tasks`: Personal task board
//! - `project_sync`: Project view session with debounced saves
//! - `sync`: Sync coordinator, status and events
//! - `optimistic`: Optimistic mutations and their outcomes
//! - `debounce`: Per-key debounced persistence
//! - `mirror`: Per-user local fallback copy
//! - `remote`: REST resources (HTTP and in-memory)
//! - `storage`: Mirror backends (files, SQLite, memory)
//! - `models`, `project`: Record types
//! - `session`: Login session and token source
//! - `config`: Application configuration

pub mod config;
pub mod debounce;
pub mod mirror;
pub mod models;
pub mod optimistic;
pub mod project;
pub mod project_sync;
pub mod remote;
pub mod session;
pub mod storage;
pub mod store;
pub mod sync;
pub mod tasks;

pub use config::{Config, MirrorBackendKind};
pub use debounce::DebouncedPersister;
pub use mirror::{LocalMirror, MirrorKey, PendingLog, PendingOp};
pub use models::{Priority, Record, Task, TaskError, TaskStats, TaskStatus};
pub use optimistic::{Mutation, MutationPolicy, OptimisticMutator, Outcome};
pub use project::{ListId, ProjectAggregate, ProjectDocument, ProjectError, ProjectTask};
pub use project_sync::ProjectSession;
pub use remote::{
    HttpRemoteStore, ListParams, MemoryRemoteStore, RemoteError, RemoteStore, Resource,
    TokenSource,
};
pub use session::{Session, SessionStore};
pub use storage::{MirrorBackend, StorageError};
pub use store::Store;
pub use sync::{LoadOutcome, MutationOutcome, PushReport, SyncCoordinator, SyncEvent, SyncStatus};
pub use tasks::{Added, KanbanColumn, TaskBoard, TaskFilter};
