//! Login, logout and whoami

use anyhow::Result;

use opsync_core::{Session, Store};

use crate::output::{Output, OutputFormat};

pub fn login(store: &Store, user: String, token: String, api_url: Option<String>, output: &Output) -> Result<()> {
    let mut session = Session::new(user, token);
    session.api_url = api_url;
    let user_id = session.user_id.clone();
    store.session().login(session)?;

    output.success(&format!("Logged in as {}", user_id));
    if store.config().api_url.is_none() && store.session().current().and_then(|s| s.api_url).is_none() {
        output.warn("No API URL configured. Set one with `opsync config set api_url <url>`.");
    }
    Ok(())
}

pub fn logout(store: &Store, output: &Output) -> Result<()> {
    if store.session().logout()? {
        output.success("Logged out");
    } else {
        output.message("Not logged in.");
    }
    Ok(())
}

pub fn whoami(store: &Store, output: &Output) -> Result<()> {
    let session = store.session().current();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "logged_in": session.is_some(),
                    "user_id": session.as_ref().map(|s| &s.user_id),
                    "api_url": session.as_ref().and_then(|s| s.api_url.clone()).or_else(|| store.config().api_url.clone()),
                    "logged_in_at": session.as_ref().map(|s| s.logged_in_at),
                })
            );
        }
        OutputFormat::Quiet => {
            if let Some(session) = session {
                println!("{}", session.user_id);
            }
        }
        OutputFormat::Human => match session {
            Some(session) => {
                println!("User:      {}", session.user_id);
                println!("Since:     {}", session.logged_in_at.format("%Y-%m-%d %H:%M"));
                if let Some(url) = session.api_url.as_ref().or(store.config().api_url.as_ref()) {
                    println!("API:       {}", url);
                }
            }
            None => println!("Not logged in. Run `opsync login --user <id> --token <token>`."),
        },
    }
    Ok(())
}
