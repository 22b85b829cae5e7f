//! Sync coordinator
//!
//! Owns the loaded records of one resource for one user and decides, per
//! call, how a change reaches the server: immediately through the
//! optimistic mutator, or later through the debounced persister. Failures
//! fall back to the local mirror and flip the coordinator offline; the next
//! successful call flips it back. Nothing retries on its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{LoadOutcome, MutationOutcome, PushReport, SyncEvent, SyncStatus};
use crate::debounce::DebouncedPersister;
use crate::mirror::{LocalMirror, PendingLog, PendingOp};
use crate::models::Record;
use crate::optimistic::{Mutation, MutationPolicy, OptimisticMutator, Outcome};
use crate::remote::{ListParams, RemoteError, RemoteStore};

/// Loaded records plus the changes the server has not seen
struct State<R> {
    records: Vec<R>,
    pending: PendingLog,
    loaded: bool,
}

struct Inner<R: Record> {
    remote: Arc<dyn RemoteStore<R>>,
    mirror: LocalMirror<R>,
    mutator: OptimisticMutator<R>,
    persister: DebouncedPersister,
    state: Mutex<State<R>>,
    params: Mutex<ListParams>,
    feature_unavailable: AtomicBool,
    status_tx: watch::Sender<SyncStatus>,
    ready_tx: watch::Sender<bool>,
    event_tx: mpsc::UnboundedSender<SyncEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<SyncEvent>>>,
}

/// Facade over remote store, mirror, mutator and persister for one resource
///
/// Cheap to clone; clones share state.
pub struct SyncCoordinator<R: Record> {
    inner: Arc<Inner<R>>,
}

impl<R: Record> Clone for SyncCoordinator<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Record> SyncCoordinator<R> {
    /// Create a coordinator; nothing is loaded until `load()`
    pub fn new(remote: Arc<dyn RemoteStore<R>>, mirror: LocalMirror<R>, debounce: Duration) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::Unloaded);
        let (ready_tx, _) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(Inner {
                mutator: OptimisticMutator::new(Arc::clone(&remote)),
                remote,
                mirror,
                persister: DebouncedPersister::new(debounce),
                state: Mutex::new(State {
                    records: Vec::new(),
                    pending: PendingLog::new(),
                    loaded: false,
                }),
                params: Mutex::new(ListParams::default()),
                feature_unavailable: AtomicBool::new(false),
                status_tx,
                ready_tx,
                event_tx,
                event_rx: Mutex::new(Some(event_rx)),
            }),
        }
    }

    // ==================== Observation ====================

    pub fn status(&self) -> SyncStatus {
        *self.inner.status_tx.borrow()
    }

    /// Whether the last remote interaction failed
    pub fn is_offline(&self) -> bool {
        self.status() == SyncStatus::Offline
    }

    /// Set once the server reported the feature as not provisioned
    pub fn is_feature_unavailable(&self) -> bool {
        self.inner.feature_unavailable.load(Ordering::SeqCst)
    }

    /// Subscribe to status changes
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Take the event receiver (can only be called once)
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SyncEvent>> {
        self.inner.event_rx.lock().take()
    }

    /// Resolves once the first `load()` has settled
    pub async fn wait_ready(&self) {
        let mut ready = self.inner.ready_tx.subscribe();
        // Only fails if the sender is gone, which cannot outlive `self`
        let _ = ready.wait_for(|r| *r).await;
    }

    /// Snapshot of the loaded records
    pub fn records(&self) -> Vec<R> {
        self.inner.state.lock().records.clone()
    }

    /// One loaded record by id
    pub fn record(&self, id: &str) -> Option<R> {
        self.inner
            .state
            .lock()
            .records
            .iter()
            .find(|r| r.id() == id)
            .cloned()
    }

    /// Changes not yet acknowledged by the server
    pub fn pending(&self) -> PendingLog {
        self.inner.state.lock().pending.clone()
    }

    pub fn mirror(&self) -> &LocalMirror<R> {
        &self.inner.mirror
    }

    /// Filters used by subsequent `load()` calls
    pub fn set_params(&self, params: ListParams) {
        *self.inner.params.lock() = params;
    }

    // ==================== Loading ====================

    /// Fetch the record list, falling back to the mirror on failure
    pub async fn load(&self) -> LoadOutcome {
        let inner = &self.inner;

        if !inner.remote.is_authenticated() {
            inner.emit(SyncEvent::Banner(RemoteError::AuthMissing.user_message()));
            inner.mark_ready();
            return LoadOutcome::NotLoggedIn;
        }

        let previous = self.status();
        inner.set_status(SyncStatus::Loading);

        let params = inner.params.lock().clone();
        let outcome = match inner.remote.list(&params).await {
            Ok(server) => {
                let count = inner.adopt_server_list(server);
                inner.feature_unavailable.store(false, Ordering::SeqCst);
                inner.set_status(SyncStatus::Synced);
                info!("Loaded {} records from server", count);
                LoadOutcome::Synced { count }
            }
            Err(RemoteError::AuthMissing) => {
                // Token vanished between the check and the call
                inner.set_status(previous);
                inner.emit(SyncEvent::Banner(RemoteError::AuthMissing.user_message()));
                LoadOutcome::NotLoggedIn
            }
            Err(RemoteError::FeatureUnavailable { details }) => {
                inner.feature_unavailable.store(true, Ordering::SeqCst);
                {
                    let mut state = inner.state.lock();
                    state.records.clear();
                    state.loaded = true;
                }
                inner.set_status(SyncStatus::Synced);
                info!("Feature unavailable on server: {}", details);
                inner.emit(SyncEvent::FeatureUnavailable { details });
                LoadOutcome::FeatureUnavailable
            }
            Err(error) => {
                let snapshot = inner.mirror.read_snapshot();
                let count = snapshot.records.len();
                {
                    let mut state = inner.state.lock();
                    state.records = snapshot.records;
                    state.pending = snapshot.pending;
                    state.loaded = true;
                }
                inner.set_status(SyncStatus::Offline);
                warn!("Load failed, using {} mirrored records: {}", count, error);
                inner.emit(SyncEvent::Banner(error.user_message()));
                LoadOutcome::Offline { count, error }
            }
        };

        inner.mark_ready();
        outcome
    }

    /// Fetch one record, updating the loaded set
    ///
    /// A 404 removes the record locally and from the mirror. Other failures
    /// fall back to the mirrored copy.
    pub async fn load_one(&self, id: &str) -> Option<R> {
        let inner = &self.inner;

        if !inner.remote.is_authenticated() {
            inner.emit(SyncEvent::Banner(RemoteError::AuthMissing.user_message()));
            inner.mark_ready();
            return None;
        }

        if self.status() == SyncStatus::Unloaded {
            inner.set_status(SyncStatus::Loading);
        }

        let result = match inner.remote.get(id).await {
            Ok(record) => {
                let mut state = inner.state.lock();
                inner.seed_from_mirror(&mut state);
                // Unpushed local edits win over the server copy
                let local_wins = state.pending.contains(id) && state.records.iter().any(|r| r.id() == id);
                if !local_wins {
                    upsert(&mut state.records, record);
                }
                let found = state.records.iter().find(|r| r.id() == id).cloned();
                let (records, pending) = (state.records.clone(), state.pending.clone());
                drop(state);

                inner.mirror.write_snapshot(&records, &pending);
                inner.set_status(SyncStatus::Synced);
                found
            }
            Err(e) if e.is_not_found() => {
                let (records, pending) = {
                    let mut state = inner.state.lock();
                    inner.seed_from_mirror(&mut state);
                    state.records.retain(|r| r.id() != id);
                    state.pending.remove(id);
                    (state.records.clone(), state.pending.clone())
                };
                inner.mirror.write_snapshot(&records, &pending);
                inner.set_status(SyncStatus::Synced);
                info!("Record {} no longer exists on the server", id);
                inner.emit(SyncEvent::Removed { id: id.to_string() });
                None
            }
            Err(RemoteError::FeatureUnavailable { details }) => {
                inner.feature_unavailable.store(true, Ordering::SeqCst);
                inner.emit(SyncEvent::FeatureUnavailable { details });
                inner.set_status(SyncStatus::Synced);
                None
            }
            Err(RemoteError::AuthMissing) => {
                inner.emit(SyncEvent::Banner(RemoteError::AuthMissing.user_message()));
                None
            }
            Err(error) => {
                let found = {
                    let mut state = inner.state.lock();
                    inner.seed_from_mirror(&mut state);
                    state.records.iter().find(|r| r.id() == id).cloned()
                };
                inner.set_status(SyncStatus::Offline);
                warn!("Fetching {} failed, using mirrored copy: {}", id, error);
                inner.emit(SyncEvent::Banner(error.user_message()));
                found
            }
        };

        inner.mark_ready();
        result
    }

    // ==================== Mutations ====================

    /// Apply a change optimistically and commit it to the server
    ///
    /// The change is visible in `records()` before this returns its first
    /// poll. Concurrent calls apply locally in call order; their remote
    /// commits may finish in any order.
    pub async fn mutate(&self, mutation: Mutation<R>, policy: MutationPolicy) -> MutationOutcome {
        self.mutate_returning(mutation, policy).await.0
    }

    /// Like `mutate`, also returning the record as it now stands locally
    ///
    /// After a committed create this is the server's copy with its id.
    /// `None` when the record is no longer loaded.
    pub async fn mutate_returning(
        &self,
        mutation: Mutation<R>,
        policy: MutationPolicy,
    ) -> (MutationOutcome, Option<R>) {
        let inner = &self.inner;

        if !inner.remote.is_authenticated() {
            inner.emit(SyncEvent::Banner(RemoteError::AuthMissing.user_message()));
            return (MutationOutcome::NotLoggedIn, None);
        }

        if let Some(outcome) = inner.settle_unsent(&mutation) {
            let id = mutation.target_id().to_string();
            return (outcome, self.record(&id));
        }

        let optimistic = {
            let mut state = inner.state.lock();
            let mut optimistic = inner.mutator.apply(&state.records, mutation, policy);
            state.records = optimistic.take_next_state();
            optimistic
        };

        let outcome = optimistic.commit().await;
        let id = match &outcome {
            Outcome::Committed {
                server: Some(server),
                ..
            } => server.id().to_string(),
            other => other.mutation().target_id().to_string(),
        };
        let result = inner.settle(outcome, true);
        (result, self.record(&id))
    }

    /// Send a change first and apply it only once the server accepts it
    ///
    /// Nothing changes locally on failure, so there is nothing to roll back.
    pub async fn mutate_pessimistic(&self, mutation: Mutation<R>) -> MutationOutcome {
        let inner = &self.inner;

        if !inner.remote.is_authenticated() {
            inner.emit(SyncEvent::Banner(RemoteError::AuthMissing.user_message()));
            return MutationOutcome::NotLoggedIn;
        }

        if let Some(outcome) = inner.settle_unsent(&mutation) {
            return outcome;
        }

        let pending = {
            let state = inner.state.lock();
            inner
                .mutator
                .apply(&state.records, mutation, MutationPolicy::StrictRollback)
        };

        let outcome = pending.commit().await;
        if let Outcome::Committed { mutation, .. } = &outcome {
            mutation.apply_to(&mut inner.state.lock().records);
        }
        inner.settle(outcome, false)
    }

    /// Edit one record in place and schedule a debounced full-record persist
    ///
    /// `edit` runs under the state lock and must not block. When it returns
    /// `Err`, nothing is scheduled. Returns `None` if `id` is not loaded.
    pub fn mutate_deferred<T, E>(
        &self,
        id: &str,
        edit: impl FnOnce(&mut R) -> Result<T, E>,
    ) -> Option<Result<T, E>> {
        let result = {
            let mut state = self.inner.state.lock();
            let record = state.records.iter_mut().find(|r| r.id() == id)?;
            edit(record)
        };

        if result.is_ok() {
            self.schedule_persist(id);
        }
        Some(result)
    }

    fn schedule_persist(&self, id: &str) {
        let weak: Weak<Inner<R>> = Arc::downgrade(&self.inner);
        let key = id.to_string();
        self.inner.persister.schedule(id, move || async move {
            if let Some(inner) = weak.upgrade() {
                inner.persist_record(&key).await;
            }
        });
    }

    /// Run the pending debounced persist for `id` now
    pub async fn flush(&self, id: &str) -> bool {
        self.inner.persister.flush(id).await
    }

    /// Run every pending debounced persist now
    pub async fn flush_all(&self) -> usize {
        self.inner.persister.flush_all().await
    }

    /// Whether a debounced persist is armed for `id`
    pub fn has_scheduled(&self, id: &str) -> bool {
        self.inner.persister.has_pending(id)
    }

    /// Replay unacknowledged local changes against the server
    ///
    /// Stops at the first transport failure. Changes the server rejects
    /// outright are dropped from the log and reported.
    pub async fn push_pending(&self) -> PushReport {
        let inner = &self.inner;
        let mut report = PushReport::default();

        if !inner.remote.is_authenticated() {
            inner.emit(SyncEvent::Banner(RemoteError::AuthMissing.user_message()));
            report.stopped_by = Some(RemoteError::AuthMissing);
            report.remaining = self.pending().len();
            return report;
        }

        let changes: Vec<_> = {
            let mut state = inner.state.lock();
            inner.seed_from_mirror(&mut state);
            state.pending.iter().cloned().collect()
        };

        for change in changes {
            let record = self.record(&change.id);
            let result = match (change.op, record) {
                (PendingOp::Delete, _) => inner
                    .remote
                    .remove(&change.id)
                    .await
                    .map(|_| None)
                    .or_else(|e| if e.is_not_found() { Ok(None) } else { Err(e) }),
                (PendingOp::Create, Some(record)) => inner.remote.create(&record).await.map(Some),
                (PendingOp::Update, Some(record)) => {
                    let body = serde_json::to_value(&record).map_err(RemoteError::decode);
                    match body {
                        Ok(body) => inner.remote.update(&change.id, &body).await.map(Some),
                        Err(e) => Err(e),
                    }
                }
                // Record is gone locally; nothing left to push
                (_, None) => Ok(None),
            };

            match result {
                Ok(server) => {
                    let (records, pending) = {
                        let mut state = inner.state.lock();
                        state.pending.remove(&change.id);
                        if let Some(server) = server {
                            if let Some(slot) = state.records.iter_mut().find(|r| r.id() == change.id) {
                                *slot = server;
                            }
                        }
                        (state.records.clone(), state.pending.clone())
                    };
                    inner.mirror.write_snapshot(&records, &pending);
                    report.pushed += 1;
                    debug!("Pushed pending {:?} for {}", change.op, change.id);
                }
                Err(error) if error.is_transient() || error == RemoteError::AuthMissing => {
                    warn!("Push stopped at {}: {}", change.id, error);
                    report.stopped_by = Some(error);
                    break;
                }
                Err(error) => {
                    let (records, pending) = {
                        let mut state = inner.state.lock();
                        state.pending.remove(&change.id);
                        (state.records.clone(), state.pending.clone())
                    };
                    inner.mirror.write_snapshot(&records, &pending);
                    warn!("Server rejected pending change to {}: {}", change.id, error);
                    inner.emit(SyncEvent::Banner(error.user_message()));
                    report.rejected.push((change.id.clone(), error));
                }
            }
        }

        report.remaining = self.pending().len();
        match &report.stopped_by {
            Some(error) if error.is_connectivity() => inner.set_status(SyncStatus::Offline),
            Some(_) => {}
            None => inner.set_status(SyncStatus::Synced),
        }
        info!(
            "Pushed {} pending changes, {} remaining",
            report.pushed, report.remaining
        );
        report
    }
}

impl<R: Record> Inner<R> {
    fn emit(&self, event: SyncEvent) {
        // No receiver is fine; events are advisory
        let _ = self.event_tx.send(event);
    }

    fn set_status(&self, status: SyncStatus) {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            debug!("Sync status -> {:?}", status);
            self.emit(SyncEvent::StatusChanged(status));
        }
    }

    fn mark_ready(&self) {
        self.ready_tx.send_if_modified(|ready| !std::mem::replace(ready, true));
    }

    /// Pull records and pending log from the mirror before the first load
    fn seed_from_mirror(&self, state: &mut State<R>) {
        if state.loaded {
            return;
        }
        let snapshot = self.mirror.read_snapshot();
        state.records = snapshot.records;
        state.pending = snapshot.pending;
        state.loaded = true;
    }

    /// Replace the loaded set with the server's, keeping unpushed local work
    fn adopt_server_list(&self, server: Vec<R>) -> usize {
        let (records, pending) = {
            let mut state = self.state.lock();
            self.seed_from_mirror(&mut state);

            let merged = overlay_pending(server, &state.records, &state.pending);
            state.records = merged;
            (state.records.clone(), state.pending.clone())
        };
        self.mirror.write_snapshot(&records, &pending);
        records.len()
    }

    /// Handle a change to a record the server has never seen
    ///
    /// A record still waiting for its create has no server id to update or
    /// delete, so the change stays local and folds into the pending create.
    /// Returns `None` when the change should go to the server as usual.
    fn settle_unsent(&self, mutation: &Mutation<R>) -> Option<MutationOutcome> {
        if matches!(mutation, Mutation::Create(_)) {
            return None;
        }
        let id = mutation.target_id().to_string();

        let (records, pending) = {
            let mut state = self.state.lock();
            self.seed_from_mirror(&mut state);
            let unsent = state
                .pending
                .get(&id)
                .is_some_and(|change| change.op == PendingOp::Create);
            if !unsent {
                return None;
            }
            mutation.apply_to(&mut state.records);
            state.pending.record(&id, mutation.pending_op());
            (state.records.clone(), state.pending.clone())
        };

        self.mirror.write_snapshot(&records, &pending);
        debug!("{} has not reached the server yet; change kept locally", id);

        match mutation {
            // Nothing left to send once the pending create is cancelled
            Mutation::Delete { .. } => Some(MutationOutcome::Committed),
            _ => Some(MutationOutcome::KeptLocally),
        }
    }

    /// Apply a commit outcome to state, mirror and status
    ///
    /// `undo` is false when the change was never shown locally.
    fn settle(&self, outcome: Outcome<R>, undo: bool) -> MutationOutcome {
        let id = outcome.mutation().target_id().to_string();

        let (records, pending) = {
            let mut state = self.state.lock();
            if undo || !matches!(outcome, Outcome::RolledBack { .. }) {
                outcome.reconcile(&mut state.records);
            }
            match &outcome {
                Outcome::Committed { .. } => {
                    state.pending.remove(&id);
                }
                Outcome::KeptLocally { mutation, .. } => {
                    state.pending.record(&id, mutation.pending_op());
                }
                Outcome::RolledBack { .. } => {}
            }
            (state.records.clone(), state.pending.clone())
        };

        match outcome {
            Outcome::Committed { .. } => {
                self.mirror.write_snapshot(&records, &pending);
                self.set_status(SyncStatus::Synced);
                MutationOutcome::Committed
            }
            Outcome::KeptLocally { error, .. } => {
                self.mirror.write_snapshot(&records, &pending);
                self.set_status(SyncStatus::Offline);
                self.emit(SyncEvent::KeptOffline { id });
                self.emit(SyncEvent::Banner(error.user_message()));
                MutationOutcome::KeptLocally
            }
            Outcome::RolledBack { error, .. } => {
                let message = error.user_message();
                match &error {
                    RemoteError::FeatureUnavailable { details } => {
                        self.feature_unavailable.store(true, Ordering::SeqCst);
                        self.emit(SyncEvent::FeatureUnavailable {
                            details: details.clone(),
                        });
                    }
                    RemoteError::AuthMissing => {
                        self.emit(SyncEvent::Banner(message.clone()));
                        return MutationOutcome::NotLoggedIn;
                    }
                    e if e.is_connectivity() => self.set_status(SyncStatus::Offline),
                    _ => {}
                }
                self.emit(SyncEvent::RolledBack {
                    id,
                    message: message.clone(),
                });
                MutationOutcome::RolledBack { message }
            }
        }
    }

    /// Send the latest copy of one record; runs when a debounce fires
    async fn persist_record(&self, id: &str) {
        let Some(record) = self
            .state
            .lock()
            .records
            .iter()
            .find(|r| r.id() == id)
            .cloned()
        else {
            debug!("Record {} vanished before its persist ran", id);
            return;
        };

        let body = match serde_json::to_value(&record) {
            Ok(body) => body,
            Err(e) => {
                warn!("Cannot serialize {} for persist: {}", id, e);
                return;
            }
        };

        let result = self.remote.update(id, &body).await;

        let (records, pending) = {
            let mut state = self.state.lock();
            match &result {
                Ok(_) => {
                    state.pending.remove(id);
                }
                Err(RemoteError::AuthMissing) => {}
                Err(_) => state.pending.record(id, PendingOp::Update),
            }
            (state.records.clone(), state.pending.clone())
        };

        match result {
            Ok(_) => {
                self.mirror.write_snapshot(&records, &pending);
                self.set_status(SyncStatus::Synced);
                debug!("Persisted {}", id);
                self.emit(SyncEvent::Persisted { id: id.to_string() });
            }
            Err(RemoteError::AuthMissing) => {
                self.emit(SyncEvent::Banner(RemoteError::AuthMissing.user_message()));
            }
            Err(error) => {
                // Debounced edits cannot be rolled back meaningfully; keep them
                self.mirror.write_snapshot(&records, &pending);
                if let RemoteError::FeatureUnavailable { details } = &error {
                    self.feature_unavailable.store(true, Ordering::SeqCst);
                    self.emit(SyncEvent::FeatureUnavailable {
                        details: details.clone(),
                    });
                }
                if error.is_connectivity() {
                    self.set_status(SyncStatus::Offline);
                }
                warn!("Persisting {} failed, kept locally: {}", id, error);
                self.emit(SyncEvent::KeptOffline { id: id.to_string() });
                self.emit(SyncEvent::Banner(error.user_message()));
            }
        }
    }
}

/// Insert or replace by id
fn upsert<R: Record>(records: &mut Vec<R>, record: R) {
    match records.iter_mut().find(|r| r.id() == record.id()) {
        Some(slot) => *slot = record,
        None => records.push(record),
    }
}

/// Merge unpushed local changes over a fresh server list
fn overlay_pending<R: Record>(server: Vec<R>, local: &[R], pending: &PendingLog) -> Vec<R> {
    if pending.is_empty() {
        return server;
    }

    let mut merged = server;
    for change in pending.iter() {
        match change.op {
            PendingOp::Delete => merged.retain(|r| r.id() != change.id),
            PendingOp::Create | PendingOp::Update => {
                if let Some(local) = local.iter().find(|r| r.id() == change.id) {
                    upsert(&mut merged, local.clone());
                }
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::MirrorKey;
    use crate::models::{Task, TaskStatus};
    use crate::remote::memory::Operation;
    use crate::remote::{FailureMode, MemoryRemoteStore};
    use crate::storage::{MemoryBackend, MirrorBackend};

    struct Fixture {
        remote: Arc<MemoryRemoteStore<Task>>,
        backend: Arc<MemoryBackend>,
        coordinator: SyncCoordinator<Task>,
    }

    fn fixture(tasks: Vec<Task>) -> Fixture {
        let remote = Arc::new(MemoryRemoteStore::with_records(tasks));
        let backend = Arc::new(MemoryBackend::new());
        let mirror = LocalMirror::new(
            backend.clone() as Arc<dyn MirrorBackend>,
            MirrorKey::new("u1", "tasks"),
        );
        let coordinator = SyncCoordinator::new(
            remote.clone() as Arc<dyn RemoteStore<Task>>,
            mirror,
            Duration::from_millis(1500),
        );
        Fixture {
            remote,
            backend,
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_status_machine_on_load() {
        let f = fixture(vec![Task::with_id("1", "Order steel")]);
        assert_eq!(f.coordinator.status(), SyncStatus::Unloaded);

        let outcome = f.coordinator.load().await;
        assert_eq!(outcome, LoadOutcome::Synced { count: 1 });
        assert_eq!(f.coordinator.status(), SyncStatus::Synced);
        assert!(!f.backend.is_empty());

        f.remote.fail_all(FailureMode::Network);
        let outcome = f.coordinator.load().await;
        assert!(matches!(outcome, LoadOutcome::Offline { count: 1, .. }));
        assert!(f.coordinator.is_offline());

        f.remote.heal();
        f.coordinator.load().await;
        assert_eq!(f.coordinator.status(), SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_events_report_status_changes() {
        let f = fixture(vec![]);
        let mut events = f.coordinator.take_events().unwrap();
        assert!(f.coordinator.take_events().is_none());

        f.coordinator.load().await;
        assert_eq!(
            events.recv().await,
            Some(SyncEvent::StatusChanged(SyncStatus::Loading))
        );
        assert_eq!(
            events.recv().await,
            Some(SyncEvent::StatusChanged(SyncStatus::Synced))
        );
    }

    #[tokio::test]
    async fn test_not_logged_in_skips_everything() {
        let f = fixture(vec![Task::with_id("1", "x")]);
        f.remote.set_authenticated(false);

        assert_eq!(f.coordinator.load().await, LoadOutcome::NotLoggedIn);
        let outcome = f
            .coordinator
            .mutate(Mutation::Create(Task::new("y")), MutationPolicy::Fallback)
            .await;
        assert_eq!(outcome, MutationOutcome::NotLoggedIn);
        assert!(f.coordinator.records().is_empty());
        assert_eq!(f.remote.total_calls(), 0);
        assert!(f.backend.is_empty());

        // Readiness still settles
        f.coordinator.wait_ready().await;
    }

    #[tokio::test]
    async fn test_mutation_failure_flips_offline_and_success_recovers() {
        let f = fixture(vec![Task::with_id("1", "Order steel")]);
        f.coordinator.load().await;

        f.remote.fail(Operation::Create, FailureMode::Network);
        let outcome = f
            .coordinator
            .mutate(Mutation::Create(Task::new("Offline")), MutationPolicy::Fallback)
            .await;
        assert_eq!(outcome, MutationOutcome::KeptLocally);
        assert!(f.coordinator.is_offline());
        assert_eq!(f.coordinator.pending().len(), 1);

        let mut task = f.coordinator.record("1").unwrap();
        task.set_status(TaskStatus::Completed);
        let outcome = f
            .coordinator
            .mutate(Mutation::update(task).unwrap(), MutationPolicy::Fallback)
            .await;
        assert_eq!(outcome, MutationOutcome::Committed);
        assert_eq!(f.coordinator.status(), SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_feature_unavailable_is_a_flag() {
        let f = fixture(vec![]);
        f.remote.fail_all(FailureMode::FeatureUnavailable);

        assert_eq!(f.coordinator.load().await, LoadOutcome::FeatureUnavailable);
        assert!(f.coordinator.is_feature_unavailable());
        assert!(!f.coordinator.is_offline());
    }

    #[tokio::test]
    async fn test_pending_survives_reload_and_push_clears_it() {
        let f = fixture(vec![Task::with_id("1", "Order steel")]);
        f.coordinator.load().await;

        f.remote.fail_all(FailureMode::Network);
        f.coordinator
            .mutate(Mutation::Create(Task::new("Made offline")), MutationPolicy::Fallback)
            .await;
        f.remote.heal();

        f.coordinator.load().await;
        let records = f.coordinator.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|t| t.title == "Made offline"));
        assert_eq!(f.coordinator.pending().len(), 1);

        let report = f.coordinator.push_pending().await;
        assert_eq!(report.pushed, 1);
        assert_eq!(report.remaining, 0);
        assert!(f.coordinator.pending().is_empty());
        assert!(f.coordinator.records().iter().all(|t| !t.has_local_id()));
        assert_eq!(f.remote.records().len(), 2);
    }

    #[tokio::test]
    async fn test_push_stops_at_transport_failure() {
        let f = fixture(vec![]);
        f.coordinator.load().await;

        f.remote.fail_all(FailureMode::Network);
        for title in ["a", "b"] {
            f.coordinator
                .mutate(Mutation::Create(Task::new(title)), MutationPolicy::Fallback)
                .await;
        }

        let report = f.coordinator.push_pending().await;
        assert_eq!(report.pushed, 0);
        assert_eq!(report.remaining, 2);
        assert!(matches!(report.stopped_by, Some(RemoteError::Network { .. })));
        assert_eq!(f.remote.calls(Operation::Create), 3);
    }

    #[tokio::test]
    async fn test_load_one_not_found_clears_cached_copy() {
        let f = fixture(vec![Task::with_id("1", "Order steel")]);
        assert_eq!(f.coordinator.load_one("1").await.unwrap().title, "Order steel");
        assert_eq!(f.coordinator.mirror().read().len(), 1);

        f.remote.remove("1").await.unwrap();
        assert!(f.coordinator.load_one("1").await.is_none());
        assert!(f.coordinator.records().is_empty());
        assert!(f.coordinator.mirror().read().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_edits_collapse_into_one_update() {
        let f = fixture(vec![Task::with_id("1", "v0")]);
        f.coordinator.load_one("1").await;

        for title in ["v1", "v2", "v3"] {
            let result: Option<Result<(), ()>> = f.coordinator.mutate_deferred("1", |t| {
                t.title = title.to_string();
                Ok(())
            });
            assert!(result.is_some());
        }
        assert!(f.coordinator.has_scheduled("1"));
        assert_eq!(f.remote.calls(Operation::Update), 0);

        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(f.remote.calls(Operation::Update), 1);
        assert_eq!(f.remote.records()[0].title, "v3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_deferred_persist_keeps_local_copy() {
        let f = fixture(vec![Task::with_id("1", "v0")]);
        f.coordinator.load_one("1").await;
        f.remote.fail(Operation::Update, FailureMode::Network);

        let _: Option<Result<(), ()>> = f.coordinator.mutate_deferred("1", |t| {
            t.title = "edited offline".to_string();
            Ok(())
        });
        assert!(f.coordinator.flush("1").await);

        assert!(f.coordinator.is_offline());
        assert!(f.coordinator.pending().contains("1"));
        assert_eq!(f.coordinator.mirror().read()[0].title, "edited offline");
    }

    #[tokio::test]
    async fn test_pessimistic_save_applies_only_on_success() {
        let f = fixture(vec![Task::with_id("1", "Order steel")]);
        f.coordinator.load().await;

        f.remote.fail(Operation::Update, FailureMode::Status(400));
        let mut task = f.coordinator.record("1").unwrap();
        task.set_title("Rejected");
        let outcome = f.coordinator.mutate_pessimistic(Mutation::update(task.clone()).unwrap()).await;
        assert!(matches!(outcome, MutationOutcome::RolledBack { .. }));
        assert_eq!(f.coordinator.record("1").unwrap().title, "Order steel");

        f.remote.heal();
        task.set_title("Accepted");
        let outcome = f.coordinator.mutate_pessimistic(Mutation::update(task).unwrap()).await;
        assert_eq!(outcome, MutationOutcome::Committed);
        assert_eq!(f.coordinator.record("1").unwrap().title, "Accepted");
    }

    #[tokio::test]
    async fn test_edit_of_unsent_create_stays_local() {
        let f = fixture(vec![Task::with_id("1", "Order steel")]);
        f.coordinator.load().await;

        f.remote.fail_all(FailureMode::Network);
        let (_, created) = f
            .coordinator
            .mutate_returning(Mutation::Create(Task::new("Made offline")), MutationPolicy::Fallback)
            .await;
        let mut task = created.unwrap();
        f.remote.heal();
        assert_eq!(f.coordinator.load().await, LoadOutcome::Synced { count: 2 });

        task.set_status(TaskStatus::Completed);
        let id = task.id.clone();
        let outcome = f
            .coordinator
            .mutate(
                Mutation::patch(task, serde_json::json!({ "status": "completed" })),
                MutationPolicy::Fallback,
            )
            .await;
        assert_eq!(outcome, MutationOutcome::KeptLocally);
        assert_eq!(f.coordinator.record(&id).unwrap().status, TaskStatus::Completed);
        assert_eq!(f.coordinator.pending().get(&id).unwrap().op, PendingOp::Create);
        assert_eq!(f.coordinator.status(), SyncStatus::Synced);
        assert_eq!(f.remote.calls(Operation::Update), 0);

        let snapshot = f.coordinator.mirror().read_snapshot();
        let mirrored = snapshot.records.iter().find(|t| t.id == id).unwrap();
        assert_eq!(mirrored.status, TaskStatus::Completed);

        // The edit goes out with the create
        let report = f.coordinator.push_pending().await;
        assert_eq!(report.pushed, 1);
        assert!(f
            .remote
            .records()
            .iter()
            .any(|t| t.title == "Made offline" && t.status == TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_delete_of_unsent_create_cancels_it() {
        let f = fixture(vec![]);
        f.coordinator.load().await;

        f.remote.fail_all(FailureMode::Network);
        let (_, created) = f
            .coordinator
            .mutate_returning(Mutation::Create(Task::new("Never sent")), MutationPolicy::Fallback)
            .await;
        let id = created.unwrap().id;
        f.remote.heal();

        let outcome = f
            .coordinator
            .mutate(Mutation::delete(id.clone()), MutationPolicy::StrictRollback)
            .await;
        assert_eq!(outcome, MutationOutcome::Committed);
        assert!(f.coordinator.record(&id).is_none());
        assert!(f.coordinator.pending().is_empty());
        assert!(f.coordinator.mirror().read_snapshot().pending.is_empty());
        assert_eq!(f.remote.calls(Operation::Remove), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_edits_apply_in_call_order() {
        let f = fixture(vec![Task::with_id("1", "Order steel")]);
        f.coordinator.load().await;
        // First call answers after the second one
        f.remote
            .delay_next_calls([Duration::from_millis(200), Duration::from_millis(10)]);

        let edit = |title: &str| {
            let mut task = f.coordinator.record("1").unwrap();
            task.set_title(title);
            Mutation::patch(task, serde_json::json!({ "title": title }))
        };
        let first = f.coordinator.mutate(edit("First"), MutationPolicy::Fallback);
        let second = f.coordinator.mutate(edit("Second"), MutationPolicy::Fallback);
        let seen_in_flight = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            f.coordinator.record("1").unwrap().title
        };

        let (first, second, seen) = tokio::join!(first, second, seen_in_flight);
        assert_eq!(first, MutationOutcome::Committed);
        assert_eq!(second, MutationOutcome::Committed);
        assert_eq!(seen, "Second");
        assert_eq!(f.remote.calls(Operation::Update), 2);

        // The slower commit lands last on both sides
        assert_eq!(f.remote.records()[0].title, "First");
        assert_eq!(f.coordinator.record("1").unwrap().title, "First");
        assert!(f.coordinator.pending().is_empty());
    }

    #[test]
    fn test_overlay_pending() {
        let server = vec![Task::with_id("1", "server"), Task::with_id("2", "doomed")];
        let local = vec![Task::with_id("1", "local edit"), Task::with_id("local-x", "new")];
        let mut pending = PendingLog::new();
        pending.record("1", PendingOp::Update);
        pending.record("local-x", PendingOp::Create);
        pending.record("2", PendingOp::Delete);

        let merged = overlay_pending(server, &local, &pending);
        let titles: Vec<_> = merged.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["local edit", "new"]);
    }
}
