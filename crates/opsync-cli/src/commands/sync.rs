//! Sync command handler
//!
//! Replays changes that were kept on this device while the server was
//! unreachable. Nothing is loaded first: each coordinator starts from the
//! mirror, which is where those changes live.

use anyhow::{bail, Result};

use opsync_core::{PushReport, Store};

use crate::output::{Output, OutputFormat};

/// Push unsent task and project changes
pub async fn sync(store: &Store, output: &Output) -> Result<()> {
    if !store.session().is_logged_in() {
        bail!("You must be logged in. Run `opsync login --user <id> --token <token>`.");
    }

    output.message("Sending unsent changes...");

    let tasks = store.task_board()?.coordinator().push_pending().await;
    let projects = store.projects()?.push_pending().await;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "tasks": report_json(&tasks),
                    "projects": report_json(&projects),
                })
            );
        }
        OutputFormat::Quiet => {}
        OutputFormat::Human => {
            print_report("Tasks", &tasks);
            print_report("Projects", &projects);
        }
    }

    let stopped = tasks.stopped_by.as_ref().or(projects.stopped_by.as_ref());
    if let Some(error) = stopped {
        bail!(
            "Sync stopped: {}. Unsent changes are kept; try again later.",
            error.user_message()
        );
    }
    Ok(())
}

fn report_json(report: &PushReport) -> serde_json::Value {
    serde_json::json!({
        "pushed": report.pushed,
        "rejected": report
            .rejected
            .iter()
            .map(|(id, error)| serde_json::json!({"id": id, "error": error.to_string()}))
            .collect::<Vec<_>>(),
        "remaining": report.remaining,
        "stopped_by": report.stopped_by.as_ref().map(|e| e.to_string()),
    })
}

fn print_report(label: &str, report: &PushReport) {
    if report.pushed == 0 && report.rejected.is_empty() && report.remaining == 0 {
        println!("{}: nothing to send", label);
        return;
    }
    println!(
        "{}: {} sent, {} rejected, {} remaining",
        label,
        report.pushed,
        report.rejected.len(),
        report.remaining
    );
    for (id, error) in &report.rejected {
        println!("  ✗ {}: {}", id, error.user_message());
    }
}
