//! Data models for opsync
//!
//! Defines the `Record` abstraction the sync layer is generic over, and the
//! personal `Task` record with its supporting types.
//!
//! Wire format follows the REST API: camelCase keys, kebab-case statuses.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Prefix for ids generated on this device before the server assigns one
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Maximum length of a title derived from a description
const DERIVED_TITLE_MAX: usize = 80;

/// A record that can be synchronized with a REST resource
///
/// Records are plain values: the sync layer clones them freely and
/// serializes them both to the wire and to the local mirror.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable identifier of the record
    fn id(&self) -> &str;

    /// Replace the identifier, e.g. when a server assigns one
    fn set_id(&mut self, id: String);

    /// Whether the id was generated on this device
    fn has_local_id(&self) -> bool {
        self.id().starts_with(LOCAL_ID_PREFIX)
    }
}

/// Generate a time-ordered local id
pub fn local_id() -> String {
    format!("{}{}", LOCAL_ID_PREFIX, Uuid::now_v7())
}

/// Errors raised when building or editing tasks
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("A task needs at least a title or a description")]
    EmptyTitle,

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Unknown task status '{0}' (expected todo, in-progress, completed or cancelled)")]
    InvalidStatus(String),

    #[error("Unknown priority '{0}' (expected low, medium, high or urgent)")]
    InvalidPriority(String),

    #[error("Cannot encode task {0}: {1}")]
    Encode(String, String),
}

/// Task workflow status
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Todo,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "todo" | "to-do" => Ok(TaskStatus::Todo),
            "in-progress" | "inprogress" | "in_progress" => Ok(TaskStatus::InProgress),
            "completed" | "done" => Ok(TaskStatus::Completed),
            "cancelled" | "canceled" => Ok(TaskStatus::Cancelled),
            _ => Err(TaskError::InvalidStatus(s.to_string())),
        }
    }
}

/// Task priority
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            _ => Err(TaskError::InvalidPriority(s.to_string())),
        }
    }
}

/// One entry of a task checklist
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChecklistItem {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
}

/// A comment on a task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

impl Comment {
    pub fn new(text: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: local_id(),
            text: text.into(),
            author: author.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Reference to an uploaded asset
///
/// Only the data contract is modelled; uploading is the server's concern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, rename = "type")]
    pub mime_type: String,
}

/// A personal task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub category: String,
    #[serde(default, with = "due_date_format", skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
    #[serde(default)]
    pub checklist: Vec<ChecklistItem>,
    /// Tag ids (set semantics, insertion ordered)
    #[serde(default, alias = "tagIds")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default)]
    pub files: Vec<Attachment>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Record for Task {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

impl Task {
    /// Create a new task with a locally generated id
    pub fn new(title: impl Into<String>) -> Self {
        Self::with_id(local_id(), title)
    }

    /// Create a task with a specific id (for server records)
    pub fn with_id(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Todo,
            priority: Priority::Medium,
            category: String::new(),
            due_date: None,
            client_id: None,
            project_id: None,
            lead_id: None,
            checklist: Vec::new(),
            tags: Vec::new(),
            photos: Vec::new(),
            files: Vec::new(),
            comments: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a task from quick-add input
    ///
    /// The title may be empty when a description is given; it is then
    /// derived from the description.
    pub fn quick(title: &str, description: &str) -> Result<Self, TaskError> {
        let description = description.trim();
        let title = normalize_title(title, description)?;
        let mut task = Self::new(title);
        task.description = description.to_string();
        Ok(task)
    }

    /// Whether this task has only ever existed on this device
    pub fn is_local(&self) -> bool {
        self.id.starts_with(LOCAL_ID_PREFIX)
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch();
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
        self.touch();
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.touch();
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
        self.touch();
    }

    pub fn set_due_date(&mut self, due_date: Option<NaiveDate>) {
        self.due_date = due_date;
        self.touch();
    }

    /// Add a tag
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
            self.touch();
        }
    }

    /// Remove a tag
    pub fn remove_tag(&mut self, tag: &str) {
        if let Some(pos) = self.tags.iter().position(|t| t == tag) {
            self.tags.remove(pos);
            self.touch();
        }
    }

    /// Append a checklist item, returning its id
    pub fn add_checklist_item(&mut self, text: impl Into<String>) -> String {
        let id = local_id();
        self.checklist.push(ChecklistItem {
            id: id.clone(),
            text: text.into(),
            completed: false,
        });
        self.touch();
        id
    }

    /// Flip a checklist item; returns false if the item does not exist
    pub fn toggle_checklist_item(&mut self, item_id: &str) -> bool {
        let Some(item) = self.checklist.iter_mut().find(|i| i.id == item_id) else {
            return false;
        };
        item.completed = !item.completed;
        self.touch();
        true
    }

    pub fn add_comment(&mut self, text: impl Into<String>, author: impl Into<String>) {
        self.comments.push(Comment::new(text, author));
        self.touch();
    }

    /// Case-insensitive match on title, description and category
    pub fn matches_query(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.title.to_lowercase().contains(&query)
            || self.description.to_lowercase().contains(&query)
            || self.category.to_lowercase().contains(&query)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Pick the title for a new task
///
/// An explicit title wins. Otherwise the description is used, cut to
/// 77 characters plus an ellipsis when it is longer than 80.
pub fn normalize_title(title: &str, description: &str) -> Result<String, TaskError> {
    let title = title.trim();
    if !title.is_empty() {
        return Ok(title.to_string());
    }

    let description = description.trim();
    if description.is_empty() {
        return Err(TaskError::EmptyTitle);
    }

    if description.chars().count() > DERIVED_TITLE_MAX {
        let head: String = description.chars().take(DERIVED_TITLE_MAX - 3).collect();
        Ok(format!("{}...", head))
    } else {
        Ok(description.to_string())
    }
}

/// Counters shown above the task list
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub total: usize,
    pub todo: usize,
    pub in_progress: usize,
    pub completed: usize,
}

impl TaskStats {
    /// Count tasks by status
    ///
    /// Cancelled tasks only contribute to `total`.
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut stats = Self {
            total: tasks.len(),
            ..Self::default()
        };
        for task in tasks {
            match task.status {
                TaskStatus::Todo => stats.todo += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Cancelled => {}
            }
        }
        stats
    }
}

/// Lenient due date handling
///
/// The API emits either `YYYY-MM-DD` or a full RFC 3339 timestamp; both are
/// read as a calendar date. Dates are written back as `YYYY-MM-DD`.
pub(crate) mod due_date_format {
    use chrono::{DateTime, NaiveDate};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d";

    pub fn serialize<S>(date: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => serializer.serialize_str(&d.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
            return Ok(None);
        };

        if let Ok(date) = NaiveDate::parse_from_str(raw.trim(), FORMAT) {
            return Ok(Some(date));
        }
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| Some(dt.date_naive()))
            .map_err(serde::de::Error::custom)
    }
}
