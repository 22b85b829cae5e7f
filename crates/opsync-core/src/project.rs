//! Project aggregate
//!
//! A project view owns one `ProjectAggregate`: its task lists, the tasks in
//! them, custom field definitions, documents and feature flags. The whole
//! aggregate is persisted as one document; the methods here only edit the
//! in-memory value and enforce its invariants.
//!
//! ## Invariants
//!
//! - Every task's `list_id` refers to an existing list.
//! - A project always keeps at least one list.
//! - Custom field names are unique.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{
    due_date_format, local_id, ChecklistItem, Comment, Priority, Record, TaskStatus,
};

/// Identifier of a task list within a project
pub type ListId = u64;

/// Errors raised by aggregate edits
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProjectError {
    #[error("Project {0} is not loaded")]
    NotLoaded(String),

    #[error("Cannot delete the last list. Projects must have at least one list.")]
    LastList,

    #[error("Task list {0} does not exist")]
    ListNotFound(ListId),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("A custom field named '{0}' already exists")]
    DuplicateField(String),

    #[error("List name cannot be empty")]
    EmptyListName,

    #[error("Task title cannot be empty")]
    EmptyTaskTitle,
}

/// A column on the project board
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskList {
    pub id: ListId,
    pub name: String,
    #[serde(default = "default_list_color")]
    pub color: String,
    #[serde(default)]
    pub description: String,
}

fn default_list_color() -> String {
    "blue".to_string()
}

/// A task inside a project, possibly with subtasks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectTask {
    pub id: String,
    pub list_id: ListId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, with = "due_date_format", skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub checklist: Vec<ChecklistItem>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    /// Values for the project's custom fields, by field name
    #[serde(default)]
    pub custom_fields: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub subtasks: Vec<ProjectTask>,
}

impl ProjectTask {
    pub fn new(list_id: ListId, title: impl Into<String>) -> Self {
        Self {
            id: local_id(),
            list_id,
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Todo,
            priority: Priority::Medium,
            assignee: None,
            due_date: None,
            checklist: Vec::new(),
            comments: Vec::new(),
            custom_fields: BTreeMap::new(),
            subtasks: Vec::new(),
        }
    }
}

/// Definition of a per-project custom task field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomFieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

/// A document attached to a project
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDocument {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, rename = "type")]
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub uploaded_by: String,
}

impl ProjectDocument {
    pub fn new(
        name: impl Into<String>,
        size: u64,
        mime_type: impl Into<String>,
        uploaded_by: impl Into<String>,
    ) -> Self {
        Self {
            id: local_id(),
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            uploaded_at: Utc::now(),
            uploaded_by: uploaded_by.into(),
        }
    }
}

/// Everything a project view loads and saves as one unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAggregate {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub task_lists: Vec<TaskList>,
    #[serde(default)]
    pub tasks: Vec<ProjectTask>,
    #[serde(default)]
    pub custom_field_definitions: Vec<CustomFieldDefinition>,
    #[serde(default)]
    pub documents: Vec<ProjectDocument>,
    #[serde(default)]
    pub has_document_collection_process: bool,
}

impl Record for ProjectAggregate {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

impl ProjectAggregate {
    /// Create a project with a single default list
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            task_lists: vec![TaskList {
                id: 1,
                name: "To Do".to_string(),
                color: default_list_color(),
                description: String::new(),
            }],
            tasks: Vec::new(),
            custom_field_definitions: Vec::new(),
            documents: Vec::new(),
            has_document_collection_process: false,
        }
    }

    pub fn list(&self, list_id: ListId) -> Option<&TaskList> {
        self.task_lists.iter().find(|l| l.id == list_id)
    }

    /// Add a list; its id is one more than the largest existing id
    pub fn add_list(
        &mut self,
        name: impl Into<String>,
        color: Option<String>,
        description: impl Into<String>,
    ) -> Result<ListId, ProjectError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ProjectError::EmptyListName);
        }

        let id = self.task_lists.iter().map(|l| l.id).max().unwrap_or(0) + 1;
        self.task_lists.push(TaskList {
            id,
            name,
            color: color.unwrap_or_else(default_list_color),
            description: description.into(),
        });
        Ok(id)
    }

    /// Rename or recolor a list
    pub fn update_list(
        &mut self,
        list_id: ListId,
        name: Option<String>,
        color: Option<String>,
    ) -> Result<(), ProjectError> {
        let list = self
            .task_lists
            .iter_mut()
            .find(|l| l.id == list_id)
            .ok_or(ProjectError::ListNotFound(list_id))?;

        if let Some(name) = name {
            if name.trim().is_empty() {
                return Err(ProjectError::EmptyListName);
            }
            list.name = name;
        }
        if let Some(color) = color {
            list.color = color;
        }
        Ok(())
    }

    /// Delete a list, moving its tasks to the first remaining list
    ///
    /// Returns the id of the list that received the tasks and how many
    /// tasks moved. Refused when `list_id` is the only list.
    pub fn delete_list(&mut self, list_id: ListId) -> Result<(ListId, usize), ProjectError> {
        if self.list(list_id).is_none() {
            return Err(ProjectError::ListNotFound(list_id));
        }
        if self.task_lists.len() == 1 {
            return Err(ProjectError::LastList);
        }

        let target = self
            .task_lists
            .iter()
            .find(|l| l.id != list_id)
            .map(|l| l.id)
            .ok_or(ProjectError::LastList)?;

        let mut moved = 0;
        for task in self.tasks.iter_mut().filter(|t| t.list_id == list_id) {
            set_list(task, target);
            moved += 1;
        }
        self.task_lists.retain(|l| l.id != list_id);
        Ok((target, moved))
    }

    /// Add a top-level task to a list
    pub fn add_task(&mut self, task: ProjectTask) -> Result<String, ProjectError> {
        if task.title.trim().is_empty() {
            return Err(ProjectError::EmptyTaskTitle);
        }
        if self.list(task.list_id).is_none() {
            return Err(ProjectError::ListNotFound(task.list_id));
        }
        let id = task.id.clone();
        self.tasks.push(task);
        Ok(id)
    }

    /// Add a subtask under a top-level task
    ///
    /// The subtask inherits its parent's list.
    pub fn add_subtask(
        &mut self,
        parent_id: &str,
        mut subtask: ProjectTask,
    ) -> Result<String, ProjectError> {
        if subtask.title.trim().is_empty() {
            return Err(ProjectError::EmptyTaskTitle);
        }
        let parent = self
            .tasks
            .iter_mut()
            .find(|t| t.id == parent_id)
            .ok_or_else(|| ProjectError::TaskNotFound(parent_id.to_string()))?;

        subtask.list_id = parent.list_id;
        let id = subtask.id.clone();
        parent.subtasks.push(subtask);
        Ok(id)
    }

    /// Find a task or subtask by id
    pub fn task(&self, task_id: &str) -> Option<&ProjectTask> {
        self.tasks.iter().find_map(|t| find_task(t, task_id))
    }

    /// Edit a task or subtask in place
    pub fn update_task<F>(&mut self, task_id: &str, edit: F) -> Result<(), ProjectError>
    where
        F: FnOnce(&mut ProjectTask),
    {
        let task = self
            .tasks
            .iter_mut()
            .find_map(|t| find_task_mut(t, task_id))
            .ok_or_else(|| ProjectError::TaskNotFound(task_id.to_string()))?;

        let list_before = task.list_id;
        edit(task);
        // an edit must not leave the task pointing at a missing list
        if task.list_id != list_before {
            let target = task.list_id;
            if !self.task_lists.iter().any(|l| l.id == target) {
                task.list_id = list_before;
                return Err(ProjectError::ListNotFound(target));
            }
        }
        Ok(())
    }

    /// Move a top-level task (and its subtasks) to another list
    pub fn move_task(&mut self, task_id: &str, list_id: ListId) -> Result<(), ProjectError> {
        if self.list(list_id).is_none() {
            return Err(ProjectError::ListNotFound(list_id));
        }
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| ProjectError::TaskNotFound(task_id.to_string()))?;

        set_list(task, list_id);
        Ok(())
    }

    /// Delete a task or a subtask
    pub fn delete_task(&mut self, task_id: &str) -> Result<(), ProjectError> {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != task_id);
        if self.tasks.len() != before {
            return Ok(());
        }

        for task in self.tasks.iter_mut() {
            let before = task.subtasks.len();
            task.subtasks.retain(|s| s.id != task_id);
            if task.subtasks.len() != before {
                return Ok(());
            }
        }
        Err(ProjectError::TaskNotFound(task_id.to_string()))
    }

    pub fn add_custom_field(
        &mut self,
        name: impl Into<String>,
        field_type: impl Into<String>,
    ) -> Result<(), ProjectError> {
        let name = name.into();
        if self
            .custom_field_definitions
            .iter()
            .any(|f| f.name.eq_ignore_ascii_case(&name))
        {
            return Err(ProjectError::DuplicateField(name));
        }
        self.custom_field_definitions.push(CustomFieldDefinition {
            name,
            field_type: field_type.into(),
        });
        Ok(())
    }

    pub fn add_document(&mut self, document: ProjectDocument) -> String {
        let id = document.id.clone();
        self.documents.push(document);
        id
    }

    pub fn remove_document(&mut self, document_id: &str) -> Result<(), ProjectError> {
        let before = self.documents.len();
        self.documents.retain(|d| d.id != document_id);
        if self.documents.len() == before {
            return Err(ProjectError::DocumentNotFound(document_id.to_string()));
        }
        Ok(())
    }

    pub fn set_document_collection_process(&mut self, enabled: bool) {
        self.has_document_collection_process = enabled;
    }

    /// Tasks belonging to a list, in project order
    pub fn tasks_in_list(&self, list_id: ListId) -> Vec<&ProjectTask> {
        self.tasks.iter().filter(|t| t.list_id == list_id).collect()
    }

    /// Share of completed top-level tasks, rounded to a whole percent
    pub fn completion_percentage(&self) -> u8 {
        let total = self.tasks.len();
        if total == 0 {
            return 0;
        }
        let completed = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        ((completed as f64 / total as f64) * 100.0).round() as u8
    }

    /// Ids of tasks whose list does not exist
    ///
    /// Always empty for aggregates edited through this type; used to check
    /// data loaded from elsewhere.
    pub fn orphaned_tasks(&self) -> Vec<&str> {
        let mut orphans = Vec::new();
        for task in &self.tasks {
            collect_orphans(task, &self.task_lists, &mut orphans);
        }
        orphans
    }
}

/// Point a task and all of its subtasks at `list_id`
fn set_list(task: &mut ProjectTask, list_id: ListId) {
    task.list_id = list_id;
    for subtask in task.subtasks.iter_mut() {
        set_list(subtask, list_id);
    }
}

fn find_task<'a>(task: &'a ProjectTask, id: &str) -> Option<&'a ProjectTask> {
    if task.id == id {
        return Some(task);
    }
    task.subtasks.iter().find_map(|s| find_task(s, id))
}

fn find_task_mut<'a>(task: &'a mut ProjectTask, id: &str) -> Option<&'a mut ProjectTask> {
    if task.id == id {
        return Some(task);
    }
    task.subtasks.iter_mut().find_map(|s| find_task_mut(s, id))
}

fn collect_orphans<'a>(task: &'a ProjectTask, lists: &[TaskList], out: &mut Vec<&'a str>) {
    if !lists.iter().any(|l| l.id == task.list_id) {
        out.push(&task.id);
    }
    for subtask in &task.subtasks {
        collect_orphans(subtask, lists, out);
    }
}
