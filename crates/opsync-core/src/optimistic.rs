//! Optimistic mutations
//!
//! A mutation is applied to in-memory state first, then sent to the remote
//! store. The result of the remote call decides what happens to the local
//! change:
//!
//! - success: the server's copy replaces the optimistic one
//! - failure under [`MutationPolicy::StrictRollback`]: the change is undone
//! - transient failure under [`MutationPolicy::Fallback`]: the change is kept
//!   and the caller persists it locally
//!
//! Non-transient failures (validation errors, missing records) roll back
//! under either policy, since keeping a change the server rejected would only
//! defer the error.

use std::mem;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::mirror::PendingOp;
use crate::models::Record;
use crate::remote::{RemoteError, RemoteResult, RemoteStore};

/// What to do with an optimistic change when the remote write fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPolicy {
    /// Keep the change locally and go offline
    Fallback,
    /// Undo the change; local state never diverges from the server
    StrictRollback,
}

/// A change to one record
#[derive(Debug, Clone)]
pub enum Mutation<R> {
    /// Add a new record, usually carrying a local id
    Create(R),
    /// Replace a record locally and send `patch` (full or partial) remotely
    Update { id: String, record: R, patch: Value },
    /// Remove a record
    Delete { id: String },
}

impl<R: Record> Mutation<R> {
    /// Update sending the whole record as the body
    pub fn update(record: R) -> Result<Self, serde_json::Error> {
        let patch = serde_json::to_value(&record)?;
        Ok(Mutation::Update {
            id: record.id().to_string(),
            record,
            patch,
        })
    }

    /// Update sending only `patch`; `record` is the local result
    pub fn patch(record: R, patch: Value) -> Self {
        Mutation::Update {
            id: record.id().to_string(),
            record,
            patch,
        }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Mutation::Delete { id: id.into() }
    }

    /// Id of the record this mutation touches
    pub fn target_id(&self) -> &str {
        match self {
            Mutation::Create(record) => record.id(),
            Mutation::Update { id, .. } | Mutation::Delete { id } => id,
        }
    }

    /// Entry to record in the pending log if the change stays local
    pub fn pending_op(&self) -> PendingOp {
        match self {
            Mutation::Create(_) => PendingOp::Create,
            Mutation::Update { .. } => PendingOp::Update,
            Mutation::Delete { .. } => PendingOp::Delete,
        }
    }

    /// Apply to `state`, returning the replaced record and its position
    pub(crate) fn apply_to(&self, state: &mut Vec<R>) -> Option<(usize, R)> {
        match self {
            Mutation::Create(record) => {
                state.insert(0, record.clone());
                None
            }
            Mutation::Update { id, record, .. } => {
                let idx = state.iter().position(|r| r.id() == id)?;
                let previous = mem::replace(&mut state[idx], record.clone());
                Some((idx, previous))
            }
            Mutation::Delete { id } => {
                let idx = state.iter().position(|r| r.id() == id)?;
                Some((idx, state.remove(idx)))
            }
        }
    }

    async fn send(self, remote: Arc<dyn RemoteStore<R>>) -> RemoteResult<Option<R>> {
        match self {
            Mutation::Create(record) => remote.create(&record).await.map(Some),
            Mutation::Update { id, patch, .. } => remote.update(&id, &patch).await.map(Some),
            Mutation::Delete { id } => match remote.remove(&id).await {
                Ok(()) => Ok(None),
                // Already gone is what we wanted
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            },
        }
    }
}

/// Applies mutations and produces their remote commits
pub struct OptimisticMutator<R> {
    remote: Arc<dyn RemoteStore<R>>,
}

impl<R> Clone for OptimisticMutator<R> {
    fn clone(&self) -> Self {
        Self {
            remote: Arc::clone(&self.remote),
        }
    }
}

impl<R: Record> OptimisticMutator<R> {
    pub fn new(remote: Arc<dyn RemoteStore<R>>) -> Self {
        Self { remote }
    }

    /// Compute the optimistic next state and the pending remote commit
    ///
    /// The commit does nothing until awaited.
    pub fn apply(&self, current: &[R], mutation: Mutation<R>, policy: MutationPolicy) -> Optimistic<R> {
        let mut next_state = current.to_vec();
        let prior = mutation.apply_to(&mut next_state);
        let commit = mutation.clone().send(Arc::clone(&self.remote)).boxed();

        Optimistic {
            next_state,
            mutation,
            prior,
            policy,
            commit,
        }
    }
}

/// An applied mutation awaiting its remote commit
pub struct Optimistic<R> {
    next_state: Vec<R>,
    mutation: Mutation<R>,
    prior: Option<(usize, R)>,
    policy: MutationPolicy,
    commit: BoxFuture<'static, RemoteResult<Option<R>>>,
}

impl<R: Record> Optimistic<R> {
    /// State to show while the commit is in flight
    pub fn next_state(&self) -> &[R] {
        &self.next_state
    }

    /// Move the next state out, leaving an empty list behind
    pub fn take_next_state(&mut self) -> Vec<R> {
        mem::take(&mut self.next_state)
    }

    pub fn mutation(&self) -> &Mutation<R> {
        &self.mutation
    }

    /// Send the mutation and classify the result
    pub async fn commit(self) -> Outcome<R> {
        let Optimistic {
            mutation,
            prior,
            policy,
            commit,
            ..
        } = self;
        let id = mutation.target_id().to_string();

        match commit.await {
            Ok(server) => {
                debug!("Committed change to {}", id);
                Outcome::Committed { mutation, server }
            }
            Err(error) if policy == MutationPolicy::Fallback && error.is_transient() => {
                warn!("Keeping change to {} locally: {}", id, error);
                Outcome::KeptLocally { mutation, error }
            }
            Err(error) => {
                warn!("Rolling back change to {}: {}", id, error);
                Outcome::RolledBack {
                    mutation,
                    prior,
                    error,
                }
            }
        }
    }
}

/// How a committed mutation ended
#[derive(Debug, Clone)]
pub enum Outcome<R> {
    /// The server accepted the change; `server` is its copy, if returned
    Committed {
        mutation: Mutation<R>,
        server: Option<R>,
    },
    /// The change must be undone
    RolledBack {
        mutation: Mutation<R>,
        prior: Option<(usize, R)>,
        error: RemoteError,
    },
    /// The change stays local until it can be pushed
    KeptLocally {
        mutation: Mutation<R>,
        error: RemoteError,
    },
}

impl<R: Record> Outcome<R> {
    pub fn mutation(&self) -> &Mutation<R> {
        match self {
            Outcome::Committed { mutation, .. }
            | Outcome::RolledBack { mutation, .. }
            | Outcome::KeptLocally { mutation, .. } => mutation,
        }
    }

    pub fn error(&self) -> Option<&RemoteError> {
        match self {
            Outcome::Committed { .. } => None,
            Outcome::RolledBack { error, .. } | Outcome::KeptLocally { error, .. } => Some(error),
        }
    }

    /// Bring `state` in line with the outcome
    ///
    /// Works on the live state rather than a snapshot, so changes to other
    /// records made while the commit was in flight are preserved.
    pub fn reconcile(&self, state: &mut Vec<R>) {
        match self {
            Outcome::Committed {
                mutation,
                server: Some(server),
            } => {
                let id = mutation.target_id();
                if let Some(slot) = state.iter_mut().find(|r| r.id() == id) {
                    *slot = server.clone();
                }
            }
            Outcome::Committed { server: None, .. } | Outcome::KeptLocally { .. } => {}
            Outcome::RolledBack {
                mutation, prior, ..
            } => match (mutation, prior) {
                (Mutation::Create(record), _) => {
                    state.retain(|r| r.id() != record.id());
                }
                (Mutation::Update { id, .. }, Some((_, previous))) => {
                    if let Some(slot) = state.iter_mut().find(|r| r.id() == id) {
                        *slot = previous.clone();
                    }
                }
                (Mutation::Delete { id }, Some((idx, previous))) => {
                    if !state.iter().any(|r| r.id() == id) {
                        let idx = (*idx).min(state.len());
                        state.insert(idx, previous.clone());
                    }
                }
                (_, None) => {}
            },
        }
    }
}
