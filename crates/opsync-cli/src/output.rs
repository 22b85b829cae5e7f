//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use opsync_core::{KanbanColumn, MutationOutcome, ProjectAggregate, Task, TaskStats};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print a single task with its details
    pub fn print_task(&self, task: &Task) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:          {}", task.id);
                println!("Title:       {}", task.title);
                if !task.description.is_empty() {
                    println!("Description: {}", task.description);
                }
                println!("Status:      {}", task.status);
                println!("Priority:    {}", task.priority);
                if !task.category.is_empty() {
                    println!("Category:    {}", task.category);
                }
                if let Some(due) = task.due_date {
                    println!("Due:         {}", due);
                }
                if !task.tags.is_empty() {
                    println!("Tags:        {}", task.tags.join(", "));
                }
                if !task.checklist.is_empty() {
                    println!();
                    for item in &task.checklist {
                        let mark = if item.completed { "x" } else { " " };
                        println!("  [{}] {}", mark, item.text);
                    }
                }
                println!("Updated:     {}", task.updated_at.format("%Y-%m-%d %H:%M"));
                if task.is_local() {
                    println!("(not yet on the server)");
                }
            }
            OutputFormat::Json => print_json(task),
            OutputFormat::Quiet => println!("{}", task.id),
        }
    }

    /// Print a list of tasks
    pub fn print_tasks(&self, tasks: &[Task]) {
        match self.format {
            OutputFormat::Human => {
                if tasks.is_empty() {
                    println!("No tasks found.");
                    return;
                }
                for task in tasks {
                    println!(
                        "{} | {:<11} | {:<6} | {}{}",
                        short_id(&task.id),
                        task.status.as_str(),
                        task.priority.as_str(),
                        truncate(&task.title, 50),
                        task.due_date
                            .map(|d| format!(" (due {})", d))
                            .unwrap_or_default()
                    );
                }
                println!("\n{} task(s)", tasks.len());
            }
            OutputFormat::Json => print_json(&tasks),
            OutputFormat::Quiet => {
                for task in tasks {
                    println!("{}", task.id);
                }
            }
        }
    }

    pub fn print_stats(&self, stats: &TaskStats) {
        match self.format {
            OutputFormat::Human => {
                println!("Total:       {}", stats.total);
                println!("To do:       {}", stats.todo);
                println!("In progress: {}", stats.in_progress);
                println!("Completed:   {}", stats.completed);
            }
            OutputFormat::Json => print_json(stats),
            OutputFormat::Quiet => {
                println!(
                    "{} {} {} {}",
                    stats.total, stats.todo, stats.in_progress, stats.completed
                );
            }
        }
    }

    /// Print tasks grouped into kanban columns
    pub fn print_board(&self, columns: &[KanbanColumn]) {
        match self.format {
            OutputFormat::Human => {
                for column in columns {
                    println!("── {} ({}) ──", column.status, column.tasks.len());
                    for task in &column.tasks {
                        println!("  {} {}", short_id(&task.id), truncate(&task.title, 60));
                    }
                    println!();
                }
            }
            OutputFormat::Json => print_json(&columns),
            OutputFormat::Quiet => {
                for column in columns {
                    println!("{} {}", column.status, column.tasks.len());
                }
            }
        }
    }

    /// Print a project with its lists and tasks
    pub fn print_project(&self, project: &ProjectAggregate) {
        match self.format {
            OutputFormat::Human => {
                println!("{} ({})", project.name, project.id);
                println!(
                    "{}% complete, {} document(s), document collection {}",
                    project.completion_percentage(),
                    project.documents.len(),
                    if project.has_document_collection_process {
                        "on"
                    } else {
                        "off"
                    }
                );
                if !project.custom_field_definitions.is_empty() {
                    let fields: Vec<_> = project
                        .custom_field_definitions
                        .iter()
                        .map(|f| format!("{} ({})", f.name, f.field_type))
                        .collect();
                    println!("Fields: {}", fields.join(", "));
                }
                println!();
                for list in &project.task_lists {
                    let tasks = project.tasks_in_list(list.id);
                    println!("── [{}] {} ({}) ──", list.id, list.name, tasks.len());
                    for task in tasks {
                        println!("  {} {} [{}]", short_id(&task.id), task.title, task.status);
                        for subtask in &task.subtasks {
                            println!(
                                "    {} {} [{}]",
                                short_id(&subtask.id),
                                subtask.title,
                                subtask.status
                            );
                        }
                    }
                }
            }
            OutputFormat::Json => print_json(project),
            OutputFormat::Quiet => println!("{}", project.id),
        }
    }

    /// Report how a change ended
    pub fn outcome(&self, action: &str, outcome: &MutationOutcome) {
        match outcome {
            MutationOutcome::Committed => self.success(action),
            MutationOutcome::KeptLocally => {
                self.success(&format!("{} (saved on this device; run `opsync sync` later)", action))
            }
            MutationOutcome::RolledBack { message } => {
                self.warn(&format!("{} failed and was undone: {}", action, message))
            }
            MutationOutcome::NotLoggedIn => self.warn("You must be logged in"),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a non-fatal problem to stderr
    pub fn warn(&self, message: &str) {
        if !self.is_quiet() {
            eprintln!("⚠ {}", message);
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to encode JSON: {}", e),
    }
}

/// First 8 characters of an id, or the part after the local prefix
fn short_id(id: &str) -> String {
    let id = id.strip_prefix(opsync_core::models::LOCAL_ID_PREFIX).unwrap_or(id);
    id.chars().take(8).collect()
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ääääääääääää", 5), "ää...");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("local-0191c2d4-aaaa"), "0191c2d4");
        assert_eq!(short_id("srv-1"), "srv-1");
    }
}
