//! Local mirror of remote records
//!
//! A per-user, per-resource copy of the last known record list, used when
//! the remote store cannot be reached. Reads never fail: missing or
//! unreadable data is an empty list. Writes never fail either: a mirror
//! that cannot be written is logged and otherwise ignored.
//!
//! ## Layout
//!
//! Each key holds one JSON envelope:
//!
//! ```text
//! {
//!   "schemaVersion": 1,
//!   "savedAt": "2024-05-01T10:00:00Z",
//!   "records": [ ... ],
//!   "pending": [ { "id": "local-...", "op": "create", "at": "..." } ]
//! }
//! ```
//!
//! A bare JSON array is the older, unversioned layout and reads as
//! version 0 with an empty pending log.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::Record;
use crate::storage::{MirrorBackend, StorageError, StorageResult};

/// Envelope version written by this build
pub const MIRROR_SCHEMA_VERSION: u32 = 1;

/// Namespace of every mirror key
const KEY_PREFIX: &str = "opsync";

/// Identifies one mirrored list: whose, and of what
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MirrorKey {
    pub user_id: String,
    pub resource: String,
}

impl MirrorKey {
    pub fn new(user_id: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            resource: resource.into(),
        }
    }

    /// Storage key, `opsync:<user>:<resource>`
    pub fn storage_key(&self) -> String {
        format!("{}:{}:{}", KEY_PREFIX, self.user_id, self.resource)
    }
}

impl fmt::Display for MirrorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Kind of change the server has not acknowledged yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingOp {
    Create,
    Update,
    Delete,
}

/// One unacknowledged local change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    pub id: String,
    pub op: PendingOp,
    pub at: DateTime<Utc>,
}

/// Changes made locally that the server has not acknowledged
///
/// At most one entry per record id. Successive changes collapse: an update
/// after a create stays a create, a delete after a create cancels both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingLog(Vec<PendingChange>);

impl PendingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change to `id`
    pub fn record(&mut self, id: &str, op: PendingOp) {
        let now = Utc::now();
        match self.0.iter().position(|c| c.id == id) {
            None => self.0.push(PendingChange {
                id: id.to_string(),
                op,
                at: now,
            }),
            Some(idx) => {
                let previous = self.0[idx].op;
                match (previous, op) {
                    (PendingOp::Create, PendingOp::Delete) => {
                        self.0.remove(idx);
                    }
                    (PendingOp::Create, _) => self.0[idx].at = now,
                    (_, op) => {
                        self.0[idx].op = op;
                        self.0[idx].at = now;
                    }
                }
            }
        }
    }

    /// Forget `id`, e.g. once the server acknowledged it
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|c| c.id != id);
        self.0.len() != before
    }

    /// Pending change for `id`
    pub fn get(&self, id: &str) -> Option<&PendingChange> {
        self.0.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Entries in the order they were first recorded
    pub fn iter(&self) -> impl Iterator<Item = &PendingChange> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Everything stored under one mirror key
#[derive(Debug, Clone)]
pub struct MirrorSnapshot<R> {
    pub records: Vec<R>,
    pub pending: PendingLog,
    /// `None` for the unversioned layout
    pub saved_at: Option<DateTime<Utc>>,
    pub schema_version: u32,
}

impl<R> Default for MirrorSnapshot<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            pending: PendingLog::default(),
            saved_at: None,
            schema_version: MIRROR_SCHEMA_VERSION,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeOut<'a, R> {
    schema_version: u32,
    saved_at: DateTime<Utc>,
    records: &'a [R],
    pending: &'a PendingLog,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeIn<R> {
    saved_at: Option<DateTime<Utc>>,
    #[serde(default = "Vec::new")]
    records: Vec<R>,
    #[serde(default)]
    pending: PendingLog,
}

/// Durable fallback copy of one `(user, resource)` record list
pub struct LocalMirror<R> {
    backend: Arc<dyn MirrorBackend>,
    key: MirrorKey,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for LocalMirror<R> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            key: self.key.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: Record> LocalMirror<R> {
    pub fn new(backend: Arc<dyn MirrorBackend>, key: MirrorKey) -> Self {
        Self {
            backend,
            key,
            _record: PhantomData,
        }
    }

    pub fn key(&self) -> &MirrorKey {
        &self.key
    }

    /// Mirrored records; empty when absent or unreadable
    pub fn read(&self) -> Vec<R> {
        self.read_snapshot().records
    }

    /// Records plus pending log; empty when absent or unreadable
    pub fn read_snapshot(&self) -> MirrorSnapshot<R> {
        match self.try_read_snapshot() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => MirrorSnapshot::default(),
            Err(e) => {
                warn!("Ignoring unreadable mirror {}: {}", self.key, e);
                MirrorSnapshot::default()
            }
        }
    }

    /// Strict read: distinguishes "nothing stored" from "stored but unusable"
    pub fn try_read_snapshot(&self) -> StorageResult<Option<MirrorSnapshot<R>>> {
        let key = self.key.storage_key();
        let Some(bytes) = self.backend.read(&key)? else {
            return Ok(None);
        };
        decode_snapshot(&key, &bytes).map(Some)
    }

    /// Replace the mirrored records, keeping the pending log
    pub fn write(&self, records: &[R]) -> bool {
        let pending = self.read_snapshot().pending;
        self.write_snapshot(records, &pending)
    }

    /// Replace records and pending log together
    ///
    /// Returns whether the write reached storage. Failures are logged and
    /// otherwise swallowed.
    pub fn write_snapshot(&self, records: &[R], pending: &PendingLog) -> bool {
        match self.try_write_snapshot(records, pending) {
            Ok(()) => {
                debug!(
                    "Mirrored {} records ({} pending) to {}",
                    records.len(),
                    pending.len(),
                    self.key
                );
                true
            }
            Err(e) => {
                match e.recovery_suggestion() {
                    Some(hint) => warn!("Failed to write mirror {}: {}. {}", self.key, e, hint),
                    None => warn!("Failed to write mirror {}: {}", self.key, e),
                }
                false
            }
        }
    }

    fn try_write_snapshot(&self, records: &[R], pending: &PendingLog) -> StorageResult<()> {
        let envelope = EnvelopeOut {
            schema_version: MIRROR_SCHEMA_VERSION,
            saved_at: Utc::now(),
            records,
            pending,
        };
        let bytes = serde_json::to_vec(&envelope)?;
        self.backend.write(&self.key.storage_key(), &bytes)
    }

    /// Drop the mirrored list entirely
    pub fn clear(&self) -> bool {
        match self.backend.remove(&self.key.storage_key()) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to clear mirror {}: {}", self.key, e);
                false
            }
        }
    }
}

fn decode_snapshot<R: Record>(key: &str, bytes: &[u8]) -> StorageResult<MirrorSnapshot<R>> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| StorageError::InvalidFormat {
        key: key.to_string(),
        details: e.to_string(),
    })?;

    let invalid = |e: serde_json::Error| StorageError::InvalidFormat {
        key: key.to_string(),
        details: e.to_string(),
    };

    if value.is_array() {
        let records: Vec<R> = serde_json::from_value(value).map_err(invalid)?;
        return Ok(MirrorSnapshot {
            records,
            pending: PendingLog::default(),
            saved_at: None,
            schema_version: 0,
        });
    }

    let version = value
        .get("schemaVersion")
        .and_then(Value::as_u64)
        .ok_or_else(|| StorageError::InvalidFormat {
            key: key.to_string(),
            details: "missing schemaVersion".to_string(),
        })?;

    if version > u64::from(MIRROR_SCHEMA_VERSION) {
        return Err(StorageError::UnsupportedVersion {
            key: key.to_string(),
            found: u32::try_from(version).unwrap_or(u32::MAX),
            supported: MIRROR_SCHEMA_VERSION,
        });
    }

    let envelope: EnvelopeIn<R> = serde_json::from_value(value).map_err(invalid)?;
    Ok(MirrorSnapshot {
        records: envelope.records,
        pending: envelope.pending,
        saved_at: envelope.saved_at,
        schema_version: version as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Task, TaskStatus};
    use crate::storage::{FileBackend, MemoryBackend};
    use tempfile::TempDir;

    fn mirror(backend: Arc<dyn MirrorBackend>) -> LocalMirror<Task> {
        LocalMirror::new(backend, MirrorKey::new("user-1", "tasks"))
    }

    #[test]
    fn test_key_format() {
        let key = MirrorKey::new("u42", "user-tasks");
        assert_eq!(key.storage_key(), "opsync:u42:user-tasks");
        assert_eq!(key.to_string(), "opsync:u42:user-tasks");
    }

    #[test]
    fn test_missing_reads_empty() {
        let mirror = mirror(Arc::new(MemoryBackend::new()));
        assert!(mirror.read().is_empty());
        assert!(mirror.try_read_snapshot().unwrap().is_none());
    }

    #[test]
    fn test_write_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let mirror = mirror(Arc::new(FileBackend::new(temp_dir.path())));

        let tasks = vec![Task::with_id("1", "Order steel"), Task::with_id("2", "Ship crate")];
        assert!(mirror.write(&tasks));

        let read = mirror.read();
        assert_eq!(read.len(), 2);
        assert_eq!(read[1].title, "Ship crate");

        let snapshot = mirror.read_snapshot();
        assert_eq!(snapshot.schema_version, MIRROR_SCHEMA_VERSION);
        assert!(snapshot.saved_at.is_some());
    }

    #[test]
    fn test_keys_are_isolated_per_user() {
        let backend: Arc<dyn MirrorBackend> = Arc::new(MemoryBackend::new());
        let alice: LocalMirror<Task> =
            LocalMirror::new(backend.clone(), MirrorKey::new("alice", "tasks"));
        let bob: LocalMirror<Task> = LocalMirror::new(backend, MirrorKey::new("bob", "tasks"));

        alice.write(&[Task::with_id("1", "Alice's")]);
        assert!(bob.read().is_empty());
        assert_eq!(alice.read().len(), 1);
    }

    #[test]
    fn test_corrupt_data_reads_empty() {
        let backend = Arc::new(MemoryBackend::new());
        backend.write("opsync:user-1:tasks", b"{not json").unwrap();

        let mirror = mirror(backend);
        assert!(mirror.read().is_empty());
        let err = mirror.try_read_snapshot().unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_wrong_shape_reads_empty() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .write("opsync:user-1:tasks", br#"{"schemaVersion":1,"records":[{"title":"no id"}]}"#)
            .unwrap();

        assert!(mirror(backend).read().is_empty());
    }

    #[test]
    fn test_legacy_array_is_version_zero() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .write(
                "opsync:user-1:tasks",
                br#"[{"id":"1","title":"Old","status":"in-progress"}]"#,
            )
            .unwrap();

        let snapshot = mirror(backend).read_snapshot();
        assert_eq!(snapshot.schema_version, 0);
        assert!(snapshot.saved_at.is_none());
        assert_eq!(snapshot.records[0].status, TaskStatus::InProgress);
    }

    #[test]
    fn test_newer_version_reads_empty() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .write(
                "opsync:user-1:tasks",
                br#"{"schemaVersion":99,"records":[{"id":"1"}]}"#,
            )
            .unwrap();

        let mirror = mirror(backend);
        assert!(mirror.read().is_empty());
        assert!(matches!(
            mirror.try_read_snapshot().unwrap_err(),
            StorageError::UnsupportedVersion { found: 99, .. }
        ));
    }

    #[test]
    fn test_write_preserves_pending_log() {
        let mirror = mirror(Arc::new(MemoryBackend::new()));
        let mut pending = PendingLog::new();
        pending.record("local-1", PendingOp::Create);
        mirror.write_snapshot(&[Task::with_id("local-1", "Draft")], &pending);

        mirror.write(&[Task::with_id("local-1", "Draft v2")]);
        let snapshot = mirror.read_snapshot();
        assert_eq!(snapshot.records[0].title, "Draft v2");
        assert!(snapshot.pending.contains("local-1"));
    }

    #[test]
    fn test_write_failure_is_swallowed() {
        let temp_dir = TempDir::new().unwrap();
        // A regular file where the mirror directory should be
        let blocker = temp_dir.path().join("mirror");
        std::fs::write(&blocker, "not a directory").unwrap();

        let mirror = mirror(Arc::new(FileBackend::new(&blocker)));
        assert!(!mirror.write(&[Task::with_id("1", "x")]));
        assert!(mirror.read().is_empty());
    }

    #[test]
    fn test_clear() {
        let mirror = mirror(Arc::new(MemoryBackend::new()));
        mirror.write(&[Task::with_id("1", "x")]);
        assert!(mirror.clear());
        assert!(mirror.read().is_empty());
    }

    #[test]
    fn test_pending_log_collapses() {
        let mut log = PendingLog::new();
        log.record("a", PendingOp::Create);
        log.record("a", PendingOp::Update);
        assert_eq!(log.get("a").unwrap().op, PendingOp::Create);

        log.record("a", PendingOp::Delete);
        assert!(log.is_empty());

        log.record("b", PendingOp::Update);
        log.record("b", PendingOp::Delete);
        assert_eq!(log.get("b").unwrap().op, PendingOp::Delete);

        assert!(log.remove("b"));
        assert!(!log.remove("b"));
    }
}
