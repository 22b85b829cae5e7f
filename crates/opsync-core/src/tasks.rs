//! Personal task board
//!
//! `TaskBoard` is the task-list view's entry point into the sync layer. It
//! owns a `SyncCoordinator<Task>` and adds what the view needs on top:
//! quick-add normalization, filters, derived stats and the kanban and
//! calendar groupings.
//!
//! Create, edit and delete fall back to the local mirror when the server is
//! unreachable. The status toggle can be made strict, in which case a failed
//! write puts the old status back and nothing is mirrored.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::models::{Priority, Task, TaskError, TaskStats, TaskStatus};
use crate::optimistic::{Mutation, MutationPolicy};
use crate::remote::ListParams;
use crate::sync::{LoadOutcome, MutationOutcome, SyncCoordinator};

/// Filters applied to the task list
///
/// Everything except `search` is also sent to the server; search always
/// runs locally over the loaded set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub category: Option<String>,
    pub priority: Option<Priority>,
    pub tag: Option<String>,
    pub search: Option<String>,
}

impl TaskFilter {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, task: &Task) -> bool {
        if self.status.is_some_and(|s| s != task.status) {
            return false;
        }
        if self.priority.is_some_and(|p| p != task.priority) {
            return false;
        }
        if let Some(category) = &self.category {
            if !task.category.eq_ignore_ascii_case(category) {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !task.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim) {
            Some(query) if !query.is_empty() => task.matches_query(query),
            _ => true,
        }
    }

    /// Server-side part of the filter
    pub fn to_params(&self) -> ListParams {
        ListParams {
            status: self.status.map(|s| s.as_str().to_string()),
            category: self.category.clone(),
            tag_id: self.tag.clone(),
            priority: self.priority.map(|p| p.as_str().to_string()),
            search: None,
        }
    }
}

/// One kanban column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KanbanColumn {
    pub status: TaskStatus,
    pub tasks: Vec<Task>,
}

/// Result of adding a task
#[derive(Debug, Clone, PartialEq)]
pub struct Added {
    /// The task as created on this device
    pub draft: Task,
    /// The task as it now stands, with the server's id once committed
    pub task: Option<Task>,
    pub outcome: MutationOutcome,
}

/// Task list view over a `SyncCoordinator<Task>`
#[derive(Clone)]
pub struct TaskBoard {
    coordinator: SyncCoordinator<Task>,
}

impl TaskBoard {
    pub fn new(coordinator: SyncCoordinator<Task>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &SyncCoordinator<Task> {
        &self.coordinator
    }

    pub fn is_offline(&self) -> bool {
        self.coordinator.is_offline()
    }

    // ==================== Loading ====================

    /// Load tasks matching the server-side part of `filter`
    pub async fn load(&self, filter: &TaskFilter) -> LoadOutcome {
        self.coordinator.set_params(filter.to_params());
        self.coordinator.load().await
    }

    // ==================== Views ====================

    pub fn tasks(&self) -> Vec<Task> {
        self.coordinator.records()
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        self.coordinator.record(id)
    }

    /// Counters derived from the loaded set
    pub fn stats(&self) -> TaskStats {
        TaskStats::from_tasks(&self.tasks())
    }

    /// Distinct non-empty categories, sorted
    pub fn categories(&self) -> Vec<String> {
        self.tasks()
            .into_iter()
            .map(|t| t.category)
            .filter(|c| !c.trim().is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn filtered(&self, filter: &TaskFilter) -> Vec<Task> {
        self.tasks()
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect()
    }

    /// Tasks grouped by status, one column per status in workflow order
    pub fn kanban(&self) -> Vec<KanbanColumn> {
        let tasks = self.tasks();
        TaskStatus::ALL
            .iter()
            .map(|&status| KanbanColumn {
                status,
                tasks: tasks.iter().filter(|t| t.status == status).cloned().collect(),
            })
            .collect()
    }

    /// Tasks with a due date, grouped by that date
    pub fn calendar(&self) -> BTreeMap<NaiveDate, Vec<Task>> {
        let mut days: BTreeMap<NaiveDate, Vec<Task>> = BTreeMap::new();
        for task in self.tasks() {
            if let Some(due) = task.due_date {
                days.entry(due).or_default().push(task);
            }
        }
        days
    }

    // ==================== Mutations ====================

    /// Create a task from quick-add input
    ///
    /// Fails before anything is sent when both title and description are
    /// blank.
    pub async fn quick_add(&self, title: &str, description: &str) -> Result<Added, TaskError> {
        let task = Task::quick(title, description)?;
        Ok(self.create(task).await)
    }

    /// Create a task; kept locally when the server is unreachable
    pub async fn create(&self, task: Task) -> Added {
        debug!("Creating task {}", task.id);
        let (outcome, current) = self
            .coordinator
            .mutate_returning(Mutation::Create(task.clone()), MutationPolicy::Fallback)
            .await;
        Added {
            draft: task,
            task: current,
            outcome,
        }
    }

    /// Save a full task form
    ///
    /// With `optimistic` false the form is only applied once the server has
    /// accepted it.
    pub async fn save(&self, task: Task, optimistic: bool) -> Result<MutationOutcome, TaskError> {
        if self.coordinator.record(&task.id).is_none() {
            return Err(TaskError::NotFound(task.id));
        }
        let id = task.id.clone();
        let mutation =
            Mutation::update(task).map_err(|e| TaskError::Encode(id, e.to_string()))?;
        let outcome = if optimistic {
            self.coordinator
                .mutate(mutation, MutationPolicy::Fallback)
                .await
        } else {
            self.coordinator.mutate_pessimistic(mutation).await
        };
        Ok(outcome)
    }

    /// Edit one loaded task with a closure and save the result
    pub async fn update<F>(&self, id: &str, edit: F) -> Result<MutationOutcome, TaskError>
    where
        F: FnOnce(&mut Task),
    {
        let mut task = self
            .coordinator
            .record(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        edit(&mut task);
        self.save(task, true).await
    }

    /// Change only the status
    ///
    /// Sends `{"status": ...}`. With `optimistic` false a failed write
    /// restores the previous status.
    pub async fn set_status(
        &self,
        id: &str,
        status: TaskStatus,
        optimistic: bool,
    ) -> Result<MutationOutcome, TaskError> {
        let mut task = self
            .coordinator
            .record(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        task.set_status(status);

        let policy = if optimistic {
            MutationPolicy::Fallback
        } else {
            MutationPolicy::StrictRollback
        };
        let patch = json!({ "status": status });
        Ok(self
            .coordinator
            .mutate(Mutation::patch(task, patch), policy)
            .await)
    }

    /// Remove a task; the caller has already confirmed
    pub async fn delete(&self, id: &str) -> Result<MutationOutcome, TaskError> {
        if self.coordinator.record(id).is_none() {
            return Err(TaskError::NotFound(id.to_string()));
        }
        Ok(self
            .coordinator
            .mutate(Mutation::delete(id), MutationPolicy::Fallback)
            .await)
    }
}
