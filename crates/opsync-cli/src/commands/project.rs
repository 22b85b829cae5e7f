//! Project command handlers
//!
//! Every edit is saved through the session's debounced persist; the handler
//! flushes it before returning so nothing is left armed at exit.

use anyhow::{bail, Result};

use opsync_core::{ListId, ProjectDocument, ProjectSession, Store};

use crate::output::Output;

/// Load a project or fail with a readable message
async fn open(store: &Store, project_id: &str, output: &Output) -> Result<ProjectSession> {
    if !store.session().is_logged_in() {
        bail!("You must be logged in. Run `opsync login --user <id> --token <token>`.");
    }

    let session = store.project_session(project_id)?;
    let loaded = session.load().await;

    if session.is_feature_unavailable() {
        bail!("Projects are not available on this server.");
    }
    if loaded.is_none() {
        bail!("Project not found: {}", project_id);
    }
    if session.is_offline() {
        output.warn("Server unreachable; showing the copy saved on this device.");
    }
    Ok(session)
}

/// Send the pending save and say where it ended up
async fn finish(session: &ProjectSession, action: &str, output: &Output) {
    session.flush().await;
    if session.coordinator().pending().contains(session.project_id()) {
        output.success(&format!(
            "{} (saved on this device; run `opsync sync` later)",
            action
        ));
    } else {
        output.success(action);
    }
}

pub async fn show(store: &Store, project_id: String, output: &Output) -> Result<()> {
    let session = open(store, &project_id, output).await?;
    if let Some(project) = session.project() {
        output.print_project(&project);
    }
    Ok(())
}

pub async fn add_list(
    store: &Store,
    project_id: String,
    name: String,
    color: Option<String>,
    description: Option<String>,
    output: &Output,
) -> Result<()> {
    let session = open(store, &project_id, output).await?;
    let id = session.add_list(&name, color, description.as_deref().unwrap_or(""))?;
    finish(&session, &format!("Added list [{}] {}", id, name), output).await;
    Ok(())
}

pub async fn rename_list(
    store: &Store,
    project_id: String,
    list_id: ListId,
    name: Option<String>,
    color: Option<String>,
    output: &Output,
) -> Result<()> {
    if name.is_none() && color.is_none() {
        bail!("Nothing to change. Pass --name or --color.");
    }
    let session = open(store, &project_id, output).await?;
    session.update_list(list_id, name, color)?;
    finish(&session, &format!("Updated list [{}]", list_id), output).await;
    Ok(())
}

pub async fn delete_list(
    store: &Store,
    project_id: String,
    list_id: ListId,
    output: &Output,
) -> Result<()> {
    let session = open(store, &project_id, output).await?;
    let (target, moved) = session.delete_list(list_id)?;
    finish(
        &session,
        &format!("Deleted list [{}]; moved {} task(s) to list [{}]", list_id, moved, target),
        output,
    )
    .await;
    Ok(())
}

pub async fn add_task(
    store: &Store,
    project_id: String,
    list_id: ListId,
    title: String,
    parent: Option<String>,
    output: &Output,
) -> Result<()> {
    let session = open(store, &project_id, output).await?;
    let id = match parent {
        Some(parent) => session.add_subtask(&parent, &title)?,
        None => session.add_task(list_id, &title)?,
    };
    finish(&session, &format!("Added task {} ({})", title, id), output).await;
    Ok(())
}

pub async fn move_task(
    store: &Store,
    project_id: String,
    task_id: String,
    list_id: ListId,
    output: &Output,
) -> Result<()> {
    let session = open(store, &project_id, output).await?;
    session.move_task(&task_id, list_id)?;
    finish(&session, &format!("Moved {} to list [{}]", task_id, list_id), output).await;
    Ok(())
}

pub async fn delete_task(
    store: &Store,
    project_id: String,
    task_id: String,
    output: &Output,
) -> Result<()> {
    let session = open(store, &project_id, output).await?;
    session.delete_task(&task_id)?;
    finish(&session, &format!("Deleted task {}", task_id), output).await;
    Ok(())
}

pub async fn add_field(
    store: &Store,
    project_id: String,
    name: String,
    field_type: String,
    output: &Output,
) -> Result<()> {
    let session = open(store, &project_id, output).await?;
    session.add_custom_field(&name, &field_type)?;
    finish(&session, &format!("Added field {} ({})", name, field_type), output).await;
    Ok(())
}

/// Record a document's metadata; the upload itself happens elsewhere
pub async fn add_document(
    store: &Store,
    project_id: String,
    name: String,
    size: u64,
    mime_type: String,
    output: &Output,
) -> Result<()> {
    let session = open(store, &project_id, output).await?;
    let uploaded_by = store.session().user_id().unwrap_or_default();
    let id = session.add_document(ProjectDocument::new(&name, size, mime_type, uploaded_by))?;
    finish(&session, &format!("Added document {} ({})", name, id), output).await;
    Ok(())
}

pub async fn remove_document(
    store: &Store,
    project_id: String,
    document_id: String,
    output: &Output,
) -> Result<()> {
    let session = open(store, &project_id, output).await?;
    session.remove_document(&document_id)?;
    finish(&session, &format!("Removed document {}", document_id), output).await;
    Ok(())
}

pub async fn set_collection(
    store: &Store,
    project_id: String,
    enabled: bool,
    output: &Output,
) -> Result<()> {
    let session = open(store, &project_id, output).await?;
    session.set_document_collection_process(enabled)?;
    let state = if enabled { "enabled" } else { "disabled" };
    finish(&session, &format!("Document collection {}", state), output).await;
    Ok(())
}
