//! opsync CLI
//!
//! Command-line interface for opsync - tasks and projects that keep
//! working when the server does not.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};

use opsync_core::{Config, ListId, Store};

mod commands;
mod logging;
mod output;
mod prompt;

use commands::task::{FieldArgs, FilterArgs};
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "opsync")]
#[command(about = "opsync - tasks and projects with offline fallback")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a session token for the API
    Login {
        /// User id the token belongs to
        #[arg(long)]
        user: String,
        /// Bearer token
        #[arg(long)]
        token: String,
        /// API base URL for this session (overrides api_url)
        #[arg(long)]
        api_url: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show who is logged in
    Whoami,
    /// Manage personal tasks
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Edit a project
    Project {
        /// Project id
        id: String,
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Show login, server and what is saved on this device
    Status,
    /// Send changes that were kept on this device
    Sync,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// List tasks
    #[command(alias = "ls")]
    List {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Show task details
    Show {
        /// Task id (full or prefix)
        id: String,
    },
    /// Create a task
    #[command(alias = "create")]
    Add {
        /// Task title
        title: Option<String>,
        #[command(flatten)]
        fields: FieldArgs,
    },
    /// Change a task's status
    Status {
        /// Task id (full or prefix)
        id: String,
        /// todo, in-progress, completed or cancelled
        status: String,
        /// Apply only after the server accepts it
        #[arg(long)]
        strict: bool,
    },
    /// Edit a task
    Edit {
        /// Task id (full or prefix)
        id: String,
        /// New title
        #[arg(short = 'T', long)]
        title: Option<String>,
        #[command(flatten)]
        fields: FieldArgs,
        /// Wait for the server before showing the change
        #[arg(long)]
        wait: bool,
    },
    /// Delete a task
    #[command(alias = "rm")]
    Delete {
        /// Task id (full or prefix)
        id: String,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Count tasks by status
    Stats {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Show tasks as a kanban board
    Board {
        /// Group by due date instead
        #[arg(long)]
        calendar: bool,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Show lists, tasks and documents
    Show,
    /// Add a task list
    ListAdd {
        name: String,
        #[arg(long)]
        color: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Rename or recolor a task list
    ListEdit {
        list_id: ListId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    /// Delete a task list; its tasks move to another list
    ListRm { list_id: ListId },
    /// Add a task to a list
    TaskAdd {
        list_id: ListId,
        title: String,
        /// Add as a subtask of this task instead
        #[arg(long)]
        parent: Option<String>,
    },
    /// Move a task to another list
    TaskMove { task_id: String, list_id: ListId },
    /// Delete a task
    TaskRm { task_id: String },
    /// Define a custom field
    FieldAdd {
        name: String,
        /// text, number, date, ...
        #[arg(default_value = "text")]
        field_type: String,
    },
    /// Record an uploaded document
    DocAdd {
        name: String,
        /// Size in bytes
        #[arg(long, default_value_t = 0)]
        size: u64,
        #[arg(long, default_value = "application/octet-stream")]
        mime_type: String,
    },
    /// Remove a document record
    DocRm { document_id: String },
    /// Turn document collection on or off
    Collection {
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, api_url, mirror_backend, debounce_ms,
        /// request_timeout_secs, log_file)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands must work even when the file is broken
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), cli.config.as_deref(), &output);
    }

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;
    logging::init(&config, cli.verbose)?;

    let store = Store::open_with_config(config)?;

    match cli.command {
        Commands::Login {
            user,
            token,
            api_url,
        } => commands::session::login(&store, user, token, api_url, &output),
        Commands::Logout => commands::session::logout(&store, &output),
        Commands::Whoami => commands::session::whoami(&store, &output),
        Commands::Task { command } => handle_task_command(command, &store, &output).await,
        Commands::Project { id, command } => {
            handle_project_command(id, command, &store, &output).await
        }
        Commands::Status => commands::status::show(&store, &output),
        Commands::Sync => commands::sync::sync(&store, &output).await,
        Commands::Config { .. } => Ok(()),
    }
}

async fn handle_task_command(command: TaskCommands, store: &Store, output: &Output) -> Result<()> {
    match command {
        TaskCommands::List { filter } => commands::task::list(store, filter, output).await,
        TaskCommands::Show { id } => commands::task::show(store, id, output).await,
        TaskCommands::Add { title, fields } => {
            commands::task::add(store, title, fields, output).await
        }
        TaskCommands::Status { id, status, strict } => {
            commands::task::set_status(store, id, status, strict, output).await
        }
        TaskCommands::Edit {
            id,
            title,
            fields,
            wait,
        } => commands::task::edit(store, id, title, fields, wait, output).await,
        TaskCommands::Delete { id, yes } => commands::task::delete(store, id, yes, output).await,
        TaskCommands::Stats { filter } => commands::task::stats(store, filter, output).await,
        TaskCommands::Board { calendar } => commands::task::board(store, calendar, output).await,
    }
}

async fn handle_project_command(
    id: String,
    command: ProjectCommands,
    store: &Store,
    output: &Output,
) -> Result<()> {
    use commands::project;

    match command {
        ProjectCommands::Show => project::show(store, id, output).await,
        ProjectCommands::ListAdd {
            name,
            color,
            description,
        } => project::add_list(store, id, name, color, description, output).await,
        ProjectCommands::ListEdit {
            list_id,
            name,
            color,
        } => project::rename_list(store, id, list_id, name, color, output).await,
        ProjectCommands::ListRm { list_id } => project::delete_list(store, id, list_id, output).await,
        ProjectCommands::TaskAdd {
            list_id,
            title,
            parent,
        } => project::add_task(store, id, list_id, title, parent, output).await,
        ProjectCommands::TaskMove { task_id, list_id } => {
            project::move_task(store, id, task_id, list_id, output).await
        }
        ProjectCommands::TaskRm { task_id } => project::delete_task(store, id, task_id, output).await,
        ProjectCommands::FieldAdd { name, field_type } => {
            project::add_field(store, id, name, field_type, output).await
        }
        ProjectCommands::DocAdd {
            name,
            size,
            mime_type,
        } => project::add_document(store, id, name, size, mime_type, output).await,
        ProjectCommands::DocRm { document_id } => {
            project::remove_document(store, id, document_id, output).await
        }
        ProjectCommands::Collection { enabled } => {
            project::set_collection(store, id, enabled, output).await
        }
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&std::path::Path>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}
