//! In-process remote store
//!
//! Behaves like the REST API (server-assigned ids on create, merge on
//! update, 404 for unknown ids) and can be told to fail or to answer
//! slowly. Tests use it in place of `HttpRemoteStore`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{ListParams, RemoteError, RemoteResult, RemoteStore};
use crate::models::Record;

/// Which call a failure applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Get,
    Create,
    Update,
    Remove,
}

/// Kind of failure to inject
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureMode {
    /// Transport failure
    Network,
    /// Non-success status with a JSON error body
    Status(u16),
    /// `*_TABLE_MISSING` sentinel
    FeatureUnavailable,
}

impl FailureMode {
    fn to_error(&self) -> RemoteError {
        match self {
            FailureMode::Network => RemoteError::network("connection refused"),
            FailureMode::Status(status) => RemoteError::from_response(
                *status,
                r#"{"error":{"message":"Injected failure"}}"#,
            ),
            FailureMode::FeatureUnavailable => RemoteError::FeatureUnavailable {
                details: "SERVICE_FORMS_TABLE_MISSING".to_string(),
            },
        }
    }
}

#[derive(Default)]
struct Failures {
    all: Option<FailureMode>,
    per_op: HashMap<Operation, FailureMode>,
}

/// `RemoteStore` held entirely in memory
pub struct MemoryRemoteStore<R> {
    records: Mutex<Vec<R>>,
    failures: Mutex<Failures>,
    calls: Mutex<HashMap<Operation, usize>>,
    authenticated: AtomicBool,
    next_id: AtomicU64,
    delays: Mutex<VecDeque<Duration>>,
}

impl<R: Record> Default for MemoryRemoteStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> MemoryRemoteStore<R> {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            failures: Mutex::new(Failures::default()),
            calls: Mutex::new(HashMap::new()),
            authenticated: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            delays: Mutex::new(VecDeque::new()),
        }
    }

    /// Start with `records` already on the "server"
    pub fn with_records(records: Vec<R>) -> Self {
        let store = Self::new();
        *store.records.lock() = records;
        store
    }

    /// Fail every call with `mode` until `heal()`
    pub fn fail_all(&self, mode: FailureMode) {
        self.failures.lock().all = Some(mode);
    }

    /// Fail only `op` with `mode`
    pub fn fail(&self, op: Operation, mode: FailureMode) {
        self.failures.lock().per_op.insert(op, mode);
    }

    /// Clear all injected failures
    pub fn heal(&self) {
        let mut failures = self.failures.lock();
        failures.all = None;
        failures.per_op.clear();
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }

    /// Delay the next calls, one duration per call in call order
    ///
    /// Lets a later call answer before an earlier one.
    pub fn delay_next_calls(&self, delays: impl IntoIterator<Item = Duration>) {
        self.delays.lock().extend(delays);
    }

    /// Snapshot of what the "server" holds
    pub fn records(&self) -> Vec<R> {
        self.records.lock().clone()
    }

    /// How many times `op` was attempted, including failed attempts
    pub fn calls(&self, op: Operation) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// Total attempted calls
    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    async fn begin(&self, op: Operation) -> RemoteResult<()> {
        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(RemoteError::AuthMissing);
        }

        *self.calls.lock().entry(op).or_insert(0) += 1;

        let delay = self.delays.lock().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failures = self.failures.lock();
        match failures.all.as_ref().or_else(|| failures.per_op.get(&op)) {
            Some(mode) => Err(mode.to_error()),
            None => Ok(()),
        }
    }

    fn not_found(id: &str) -> RemoteError {
        RemoteError::from_response(
            404,
            &format!(r#"{{"error":{{"message":"Record {} not found"}}}}"#, id),
        )
    }
}

#[async_trait]
impl<R: Record> RemoteStore<R> for MemoryRemoteStore<R> {
    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn list(&self, params: &ListParams) -> RemoteResult<Vec<R>> {
        self.begin(Operation::List).await?;
        let records = self.records.lock().clone();
        if params.is_empty() {
            return Ok(records);
        }

        // Filters apply to the JSON form so this works for any record type
        let query = params.to_query();
        Ok(records
            .into_iter()
            .filter(|r| {
                let Ok(value) = serde_json::to_value(r) else {
                    return false;
                };
                query.iter().all(|(key, expected)| match (*key, value.get(*key)) {
                    ("search", _) => value.to_string().to_lowercase().contains(&expected.to_lowercase()),
                    ("tagId", _) => value
                        .get("tags")
                        .and_then(Value::as_array)
                        .is_some_and(|tags| tags.iter().any(|t| t == expected.as_str())),
                    (_, Some(Value::String(actual))) => actual == expected,
                    _ => false,
                })
            })
            .collect())
    }

    async fn get(&self, id: &str) -> RemoteResult<R> {
        self.begin(Operation::Get).await?;
        self.records
            .lock()
            .iter()
            .find(|r| r.id() == id)
            .cloned()
            .ok_or_else(|| Self::not_found(id))
    }

    async fn create(&self, record: &R) -> RemoteResult<R> {
        self.begin(Operation::Create).await?;
        let mut created = record.clone();
        if created.has_local_id() || created.id().is_empty() {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            created.set_id(format!("srv-{}", n));
        }
        self.records.lock().push(created.clone());
        Ok(created)
    }

    async fn update(&self, id: &str, patch: &Value) -> RemoteResult<R> {
        self.begin(Operation::Update).await?;
        let mut records = self.records.lock();
        let record = records
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or_else(|| Self::not_found(id))?;

        let mut merged = serde_json::to_value(&*record).map_err(RemoteError::decode)?;
        if let (Some(target), Some(patch)) = (merged.as_object_mut(), patch.as_object()) {
            for (key, value) in patch {
                target.insert(key.clone(), value.clone());
            }
        }
        let mut updated: R = serde_json::from_value(merged).map_err(RemoteError::decode)?;
        updated.set_id(id.to_string());
        *record = updated.clone();
        Ok(updated)
    }

    async fn remove(&self, id: &str) -> RemoteResult<()> {
        self.begin(Operation::Remove).await?;
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.id() != id);
        if records.len() == before {
            return Err(Self::not_found(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Task, TaskStatus};
    use serde_json::json;

    #[tokio::test]
    async fn test_create_assigns_server_id() {
        let store = MemoryRemoteStore::new();
        let local = Task::new("Call supplier");
        assert!(local.has_local_id());

        let created = store.create(&local).await.unwrap();
        assert_eq!(created.id, "srv-1");
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_update_merges_patch() {
        let store = MemoryRemoteStore::with_records(vec![Task::with_id("t1", "Order steel")]);

        let updated = store
            .update("t1", &json!({"status": "completed"}))
            .await
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Completed);
        assert_eq!(updated.title, "Order steel");
        assert_eq!(store.records()[0].status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let store: MemoryRemoteStore<Task> = MemoryRemoteStore::new();
        assert!(store.get("x").await.unwrap_err().is_not_found());
        assert!(store.remove("x").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_filters() {
        let mut done = Task::with_id("2", "Ship crate");
        done.status = TaskStatus::Completed;
        done.tags.push("urgent-clients".to_string());
        let store = MemoryRemoteStore::with_records(vec![Task::with_id("1", "Order steel"), done]);

        let params = ListParams {
            status: Some("completed".to_string()),
            ..Default::default()
        };
        assert_eq!(store.list(&params).await.unwrap().len(), 1);

        let params = ListParams {
            tag_id: Some("urgent-clients".to_string()),
            ..Default::default()
        };
        assert_eq!(store.list(&params).await.unwrap()[0].id, "2");

        let params = ListParams {
            search: Some("STEEL".to_string()),
            ..Default::default()
        };
        assert_eq!(store.list(&params).await.unwrap()[0].id, "1");
    }

    #[tokio::test]
    async fn test_failure_injection_and_heal() {
        let store: MemoryRemoteStore<Task> = MemoryRemoteStore::new();

        store.fail(Operation::Create, FailureMode::Network);
        let err = store.create(&Task::new("a")).await.unwrap_err();
        assert!(matches!(err, RemoteError::Network { .. }));
        assert!(store.list(&ListParams::default()).await.is_ok());

        store.fail_all(FailureMode::Status(503));
        assert_eq!(
            store.list(&ListParams::default()).await.unwrap_err().status(),
            Some(503)
        );

        store.heal();
        assert!(store.create(&Task::new("b")).await.is_ok());
        assert_eq!(store.calls(Operation::Create), 2);
        assert_eq!(store.calls(Operation::List), 2);
    }

    #[tokio::test]
    async fn test_unauthenticated_calls_are_not_counted() {
        let store: MemoryRemoteStore<Task> = MemoryRemoteStore::new();
        store.set_authenticated(false);

        let err = store.list(&ListParams::default()).await.unwrap_err();
        assert_eq!(err, RemoteError::AuthMissing);
        assert_eq!(store.total_calls(), 0);
    }
}
