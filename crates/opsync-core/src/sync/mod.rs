//! Synchronization of loaded records with the remote store
//!
//! ## Status
//!
//! Each coordinator moves through:
//!
//! ```text
//! Unloaded -> Loading -> Synced | Offline
//! Synced  -> Offline   any failed remote call
//! Offline -> Synced    next successful load or mutation
//! ```
//!
//! There is no background retry. Offline work sits in the pending log until
//! the next successful load (which keeps it) or `push_pending` (which sends
//! it).
//!
//! ## Usage
//!
//! ```ignore
//! let coordinator = SyncCoordinator::new(remote, mirror, config.debounce());
//! coordinator.load().await;
//! coordinator.mutate(Mutation::Create(task), MutationPolicy::Fallback).await;
//! ```

mod coordinator;

use std::fmt;

use crate::remote::RemoteError;

pub use coordinator::SyncCoordinator;

/// Coordinator status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Nothing loaded yet
    Unloaded,
    /// A load is in flight
    Loading,
    /// Last remote interaction succeeded
    Synced,
    /// Last remote interaction failed; showing local data
    Offline,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncStatus::Unloaded => "unloaded",
            SyncStatus::Loading => "loading",
            SyncStatus::Synced => "synced",
            SyncStatus::Offline => "offline",
        })
    }
}

/// Events emitted by a coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Status changed
    StatusChanged(SyncStatus),
    /// Inline, non-blocking message for the user
    Banner(String),
    /// An optimistic change was undone
    RolledBack { id: String, message: String },
    /// A change was kept on this device only
    KeptOffline { id: String },
    /// The server does not provide this feature
    FeatureUnavailable { details: String },
    /// A debounced persist reached the server
    Persisted { id: String },
    /// The server no longer has this record
    Removed { id: String },
}

/// Result of `SyncCoordinator::load`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Server list loaded
    Synced { count: usize },
    /// Server unreachable; mirrored records loaded instead
    Offline { count: usize, error: RemoteError },
    /// No session; nothing was requested
    NotLoggedIn,
    /// Server reports the feature as not provisioned
    FeatureUnavailable,
}

/// Result of `SyncCoordinator::mutate`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Server accepted the change
    Committed,
    /// Change kept locally and queued for a later push
    KeptLocally,
    /// Change undone; `message` is suitable for a banner
    RolledBack { message: String },
    /// No session; the change was not applied
    NotLoggedIn,
}

impl MutationOutcome {
    /// Whether the change is still visible locally
    pub fn is_applied(&self) -> bool {
        matches!(self, MutationOutcome::Committed | MutationOutcome::KeptLocally)
    }
}

/// Result of `SyncCoordinator::push_pending`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Changes the server acknowledged
    pub pushed: usize,
    /// Changes the server refused; dropped from the log
    pub rejected: Vec<(String, RemoteError)>,
    /// Changes still waiting
    pub remaining: usize,
    /// Failure that ended the push early
    pub stopped_by: Option<RemoteError>,
}
