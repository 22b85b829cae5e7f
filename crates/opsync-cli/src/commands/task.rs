//! Task command handlers

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use clap::Args;

use opsync_core::{LoadOutcome, Priority, Store, Task, TaskBoard, TaskFilter, TaskStatus};

use crate::output::Output;
use crate::prompt;

/// Filters shared by `task list`, `task board` and `task stats`
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Only tasks with this status (todo, in-progress, completed, cancelled)
    #[arg(short, long)]
    pub status: Option<String>,
    /// Only tasks in this category
    #[arg(short, long)]
    pub category: Option<String>,
    /// Only tasks with this priority (low, medium, high, urgent)
    #[arg(short, long)]
    pub priority: Option<String>,
    /// Only tasks with this tag id
    #[arg(short, long)]
    pub tag: Option<String>,
    /// Match title, description or category
    #[arg(long)]
    pub search: Option<String>,
}

impl FilterArgs {
    fn to_filter(&self) -> Result<TaskFilter> {
        Ok(TaskFilter {
            status: self.status.as_deref().map(str::parse).transpose()?,
            category: self.category.clone(),
            priority: self.priority.as_deref().map(str::parse).transpose()?,
            tag: self.tag.clone(),
            search: self.search.clone(),
        })
    }
}

/// Optional task fields for `task add` and `task edit`
#[derive(Args, Debug, Clone, Default)]
pub struct FieldArgs {
    /// Longer description
    #[arg(short, long)]
    pub description: Option<String>,
    /// low, medium, high or urgent
    #[arg(short, long)]
    pub priority: Option<String>,
    /// Free-form category
    #[arg(short, long)]
    pub category: Option<String>,
    /// Due date (YYYY-MM-DD); empty clears it
    #[arg(long)]
    pub due: Option<String>,
    /// Tag ids to add
    #[arg(short, long)]
    pub tag: Vec<String>,
}

impl FieldArgs {
    fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.priority.is_none()
            && self.category.is_none()
            && self.due.is_none()
            && self.tag.is_empty()
    }

    /// Apply everything except the description
    fn apply(&self, task: &mut Task) -> Result<()> {
        if let Some(priority) = &self.priority {
            task.set_priority(priority.parse::<Priority>()?);
        }
        if let Some(category) = &self.category {
            task.category = category.clone();
        }
        if let Some(due) = &self.due {
            task.set_due_date(parse_due(due)?);
        }
        for tag in &self.tag {
            task.add_tag(tag.clone());
        }
        Ok(())
    }
}

/// Load the board, reporting offline fallback
async fn open_board(store: &Store, filter: &TaskFilter, output: &Output) -> Result<TaskBoard> {
    let board = store.task_board()?;
    match board.load(filter).await {
        LoadOutcome::Synced { .. } => {}
        LoadOutcome::Offline { error, .. } => {
            output.warn(&format!("Showing tasks saved on this device: {}", error.user_message()))
        }
        LoadOutcome::NotLoggedIn => {
            bail!("You must be logged in. Run `opsync login --user <id> --token <token>`.")
        }
        LoadOutcome::FeatureUnavailable => {
            output.warn("Tasks are not available on this server.")
        }
    }
    Ok(board)
}

pub async fn list(store: &Store, filter: FilterArgs, output: &Output) -> Result<()> {
    let filter = filter.to_filter()?;
    let board = open_board(store, &filter, output).await?;
    output.print_tasks(&board.filtered(&filter));
    Ok(())
}

pub async fn show(store: &Store, id: String, output: &Output) -> Result<()> {
    let board = open_board(store, &TaskFilter::default(), output).await?;
    let task = find_task(&board, &id)?;
    output.print_task(&task);
    Ok(())
}

pub async fn stats(store: &Store, filter: FilterArgs, output: &Output) -> Result<()> {
    let board = open_board(store, &filter.to_filter()?, output).await?;
    output.print_stats(&board.stats());
    Ok(())
}

pub async fn board(store: &Store, calendar: bool, output: &Output) -> Result<()> {
    let board = open_board(store, &TaskFilter::default(), output).await?;
    if calendar {
        let days = board.calendar();
        if output.is_json() {
            let json: serde_json::Map<_, _> = days
                .iter()
                .map(|(day, tasks)| (day.to_string(), serde_json::to_value(tasks).unwrap_or_default()))
                .collect();
            println!("{}", serde_json::Value::Object(json));
            return Ok(());
        }
        if days.is_empty() {
            output.message("No tasks with a due date.");
        }
        for (day, tasks) in days {
            output.message(&format!("── {} ──", day));
            output.print_tasks(&tasks);
        }
    } else {
        output.print_board(&board.kanban());
    }
    Ok(())
}

pub async fn add(store: &Store, title: Option<String>, fields: FieldArgs, output: &Output) -> Result<()> {
    let board = open_board(store, &TaskFilter::default(), output).await?;

    let mut task = Task::quick(
        title.as_deref().unwrap_or(""),
        fields.description.as_deref().unwrap_or(""),
    )?;
    fields.apply(&mut task)?;

    let added = board.create(task).await;
    output.outcome(&format!("Created task: {}", added.draft.title), &added.outcome);
    if let Some(task) = added.task.filter(|_| added.outcome.is_applied()) {
        output.print_task(&task);
    }
    Ok(())
}

pub async fn set_status(
    store: &Store,
    id: String,
    status: String,
    strict: bool,
    output: &Output,
) -> Result<()> {
    let status: TaskStatus = status.parse()?;
    let board = open_board(store, &TaskFilter::default(), output).await?;
    let task = find_task(&board, &id)?;

    let outcome = board.set_status(&task.id, status, !strict).await?;
    output.outcome(&format!("{} -> {}", task.title, status), &outcome);
    Ok(())
}

pub async fn edit(
    store: &Store,
    id: String,
    title: Option<String>,
    fields: FieldArgs,
    wait: bool,
    output: &Output,
) -> Result<()> {
    let board = open_board(store, &TaskFilter::default(), output).await?;
    let mut task = find_task(&board, &id)?;

    if title.is_none() && fields.is_empty() {
        if !output.should_prompt() {
            bail!("Nothing to change. Pass --title or another field.");
        }
        println!("Editing task: {}", task.id);
        println!("Press Enter to keep current value, or type new value.\n");
        if let Some(new_title) = prompt::with_default("Title", &task.title)? {
            task.set_title(new_title);
        }
        if let Some(new_desc) = prompt::with_default("Description", &task.description)? {
            task.set_description(new_desc);
        }
    } else {
        if let Some(title) = title {
            task.set_title(title);
        }
        if let Some(description) = &fields.description {
            task.set_description(description.clone());
        }
        fields.apply(&mut task)?;
    }

    let outcome = board.save(task, !wait).await?;
    output.outcome("Task updated", &outcome);
    Ok(())
}

pub async fn delete(store: &Store, id: String, yes: bool, output: &Output) -> Result<()> {
    let board = open_board(store, &TaskFilter::default(), output).await?;
    let task = find_task(&board, &id)?;

    if !yes && output.should_prompt() {
        println!("Delete task: {} - {}", task.id, task.title);
        if !prompt::confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    } else if !yes {
        bail!("Refusing to delete without confirmation. Pass --yes.");
    }

    let outcome = board.delete(&task.id).await?;
    output.outcome(&format!("Deleted task: {}", task.title), &outcome);
    Ok(())
}

/// Find a loaded task by full id or unique prefix
///
/// Local ids also match without their `local-` prefix.
fn find_task(board: &TaskBoard, id: &str) -> Result<Task> {
    if let Some(task) = board.task(id) {
        return Ok(task);
    }

    let matches: Vec<Task> = board
        .tasks()
        .into_iter()
        .filter(|t| {
            let bare = t
                .id
                .strip_prefix(opsync_core::models::LOCAL_ID_PREFIX)
                .unwrap_or(&t.id);
            t.id.starts_with(id) || bare.starts_with(id)
        })
        .collect();

    match matches.len() {
        0 => Err(anyhow!("No task found matching: {}", id)),
        1 => Ok(matches.into_iter().next().context("match vanished")?),
        _ => {
            eprintln!("Multiple tasks match '{}':", id);
            for task in &matches {
                eprintln!("  {} - {}", task.id, task.title);
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}

fn parse_due(value: &str) -> Result<Option<NaiveDate>> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map(Some)
        .with_context(|| format!("Invalid due date '{}', expected YYYY-MM-DD", value))
}
