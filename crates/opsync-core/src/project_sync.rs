//! Project view session
//!
//! A `ProjectSession` holds one loaded `ProjectAggregate`. Every edit is
//! applied to the in-memory aggregate at once and arms a debounced persist
//! of the whole aggregate, so a burst of edits costs one request. Call
//! `flush()` before leaving the view.

use tracing::{debug, info};

use crate::project::{ListId, ProjectAggregate, ProjectDocument, ProjectError, ProjectTask};
use crate::sync::{SyncCoordinator, SyncStatus};

pub struct ProjectSession {
    coordinator: SyncCoordinator<ProjectAggregate>,
    project_id: String,
}

impl ProjectSession {
    pub fn new(coordinator: SyncCoordinator<ProjectAggregate>, project_id: impl Into<String>) -> Self {
        Self {
            coordinator,
            project_id: project_id.into(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn coordinator(&self) -> &SyncCoordinator<ProjectAggregate> {
        &self.coordinator
    }

    pub fn status(&self) -> SyncStatus {
        self.coordinator.status()
    }

    pub fn is_offline(&self) -> bool {
        self.coordinator.is_offline()
    }

    pub fn is_feature_unavailable(&self) -> bool {
        self.coordinator.is_feature_unavailable()
    }

    /// Fetch the project, falling back to the mirrored copy
    pub async fn load(&self) -> Option<ProjectAggregate> {
        let project = self.coordinator.load_one(&self.project_id).await;
        match &project {
            Some(p) => info!("Opened project {} ({} tasks)", p.id, p.tasks.len()),
            None => info!("Project {} is not available", self.project_id),
        }
        project
    }

    /// Current in-memory aggregate
    pub fn project(&self) -> Option<ProjectAggregate> {
        self.coordinator.record(&self.project_id)
    }

    pub fn completion_percentage(&self) -> Option<u8> {
        self.project().map(|p| p.completion_percentage())
    }

    /// Send any armed persist now
    pub async fn flush(&self) -> bool {
        self.coordinator.flush(&self.project_id).await
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.coordinator.has_scheduled(&self.project_id)
    }

    // ==================== Lists ====================

    pub fn add_list(
        &self,
        name: &str,
        color: Option<String>,
        description: &str,
    ) -> Result<ListId, ProjectError> {
        self.edit(|p| p.add_list(name, color, description))
    }

    pub fn update_list(
        &self,
        list_id: ListId,
        name: Option<String>,
        color: Option<String>,
    ) -> Result<(), ProjectError> {
        self.edit(|p| p.update_list(list_id, name, color))
    }

    /// Delete a list; returns the list that received its tasks and how many
    pub fn delete_list(&self, list_id: ListId) -> Result<(ListId, usize), ProjectError> {
        self.edit(|p| p.delete_list(list_id))
    }

    // ==================== Tasks ====================

    pub fn add_task(&self, list_id: ListId, title: &str) -> Result<String, ProjectError> {
        self.edit(|p| p.add_task(ProjectTask::new(list_id, title)))
    }

    pub fn add_subtask(&self, parent_id: &str, title: &str) -> Result<String, ProjectError> {
        // list id is replaced by the parent's
        self.edit(|p| p.add_subtask(parent_id, ProjectTask::new(0, title)))
    }

    pub fn update_task<F>(&self, task_id: &str, edit: F) -> Result<(), ProjectError>
    where
        F: FnOnce(&mut ProjectTask),
    {
        self.edit(|p| p.update_task(task_id, edit))
    }

    pub fn move_task(&self, task_id: &str, list_id: ListId) -> Result<(), ProjectError> {
        self.edit(|p| p.move_task(task_id, list_id))
    }

    pub fn delete_task(&self, task_id: &str) -> Result<(), ProjectError> {
        self.edit(|p| p.delete_task(task_id))
    }

    // ==================== Fields & documents ====================

    pub fn add_custom_field(&self, name: &str, field_type: &str) -> Result<(), ProjectError> {
        self.edit(|p| p.add_custom_field(name, field_type))
    }

    pub fn add_document(&self, document: ProjectDocument) -> Result<String, ProjectError> {
        self.edit(|p| Ok(p.add_document(document)))
    }

    pub fn remove_document(&self, document_id: &str) -> Result<(), ProjectError> {
        self.edit(|p| p.remove_document(document_id))
    }

    pub fn set_document_collection_process(&self, enabled: bool) -> Result<(), ProjectError> {
        self.edit(|p| {
            p.set_document_collection_process(enabled);
            Ok(())
        })
    }

    /// Apply an edit to the loaded aggregate and arm the persist
    fn edit<T>(
        &self,
        edit: impl FnOnce(&mut ProjectAggregate) -> Result<T, ProjectError>,
    ) -> Result<T, ProjectError> {
        let result = self
            .coordinator
            .mutate_deferred(&self.project_id, edit)
            .unwrap_or_else(|| Err(ProjectError::NotLoaded(self.project_id.clone())));
        if let Err(e) = &result {
            debug!("Edit to project {} refused: {}", self.project_id, e);
        }
        result
    }
}
