//! Status command handler

use anyhow::Result;
use serde::Serialize;

use opsync_core::mirror::MirrorSnapshot;
use opsync_core::{ProjectAggregate, Record, Resource, Store, Task};

use crate::output::{Output, OutputFormat};

/// What one resource's mirror currently holds
#[derive(Debug, Serialize)]
struct MirrorSummary {
    resource: String,
    records: usize,
    pending: usize,
    saved_at: Option<String>,
}

impl MirrorSummary {
    fn read<R: Record>(store: &Store, resource: Resource) -> Self {
        let name = resource.name().to_string();
        let snapshot: MirrorSnapshot<R> = store.mirror::<R>(&name).read_snapshot();
        Self {
            resource: name,
            records: snapshot.records.len(),
            pending: snapshot.pending.len(),
            saved_at: snapshot
                .saved_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

/// Show login, configuration and what is saved on this device
pub fn show(store: &Store, output: &Output) -> Result<()> {
    let config = store.config();
    let session = store.session().current();
    let api_url = session
        .as_ref()
        .and_then(|s| s.api_url.clone())
        .or_else(|| config.api_url.clone());

    let mirrors = vec![
        MirrorSummary::read::<Task>(store, Resource::tasks()),
        MirrorSummary::read::<ProjectAggregate>(store, Resource::projects()),
    ];

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "user_id": session.as_ref().map(|s| &s.user_id),
                    "api_url": api_url,
                    "mirror_backend": config.mirror_backend.to_string(),
                    "data_dir": config.data_dir,
                    "mirrors": mirrors,
                })
            );
        }
        OutputFormat::Quiet => {
            let pending: usize = mirrors.iter().map(|m| m.pending).sum();
            println!("{}", pending);
        }
        OutputFormat::Human => {
            println!("opsync status");
            println!("=============");
            println!();
            println!("Account:");
            match &session {
                Some(session) => println!("  User:   {}", session.user_id),
                None => println!("  User:   (not logged in)"),
            }
            println!(
                "  Server: {}",
                api_url.as_deref().unwrap_or("(not set)")
            );
            println!();
            println!("Saved on this device ({}):", config.mirror_backend);
            println!("  Location: {}", config.data_dir.display());
            for mirror in &mirrors {
                println!(
                    "  {:<9} {} record(s), {} unsent change(s), saved {}",
                    format!("{}:", mirror.resource),
                    mirror.records,
                    mirror.pending,
                    mirror.saved_at.as_deref().unwrap_or("never")
                );
            }
            if mirrors.iter().any(|m| m.pending > 0) {
                println!();
                println!("Run `opsync sync` to send unsent changes.");
            }
        }
    }

    Ok(())
}
