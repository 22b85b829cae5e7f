//! Login session
//!
//! The session names the user (which namespaces the local mirror) and holds
//! the bearer token the HTTP stores send. It lives in `session.json` under
//! the data directory and is written atomically.
//!
//! `SessionStore` is the `TokenSource` handed to remote stores, so logging
//! out takes effect on the next request without rebuilding anything.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::remote::TokenSource;
use crate::storage::persistence::atomic_write;

/// A logged-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub token: String,
    /// API the token was issued for, when it differs from the config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    pub logged_in_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
            api_url: None,
            logged_in_at: Utc::now(),
        }
    }
}

/// File-backed session with an in-memory copy
pub struct SessionStore {
    path: PathBuf,
    current: RwLock<Option<Session>>,
}

impl SessionStore {
    /// Open the session file at `path`
    ///
    /// A missing file means logged out. An unreadable one is logged and
    /// treated the same way, so a damaged file never locks the user out of
    /// logging in again.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match read_session(&path) {
            Ok(session) => session,
            Err(e) => {
                warn!("Ignoring unreadable session file {:?}: {:#}", path, e);
                None
            }
        };
        Self {
            path,
            current: RwLock::new(current),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::open(config.session_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> Option<Session> {
        self.current.read().clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.current.read().as_ref().map(|s| s.user_id.clone())
    }

    pub fn is_logged_in(&self) -> bool {
        self.current.read().is_some()
    }

    /// Store a new session, replacing any previous one
    pub fn login(&self, session: Session) -> Result<()> {
        if session.user_id.trim().is_empty() {
            bail!("User id cannot be empty");
        }
        if session.token.trim().is_empty() {
            bail!("Token cannot be empty");
        }

        let json = serde_json::to_vec_pretty(&session).context("Failed to serialize session")?;
        atomic_write(&self.path, &json)
            .with_context(|| format!("Failed to write session file: {:?}", self.path))?;

        info!("Logged in as {}", session.user_id);
        *self.current.write() = Some(session);
        Ok(())
    }

    /// Forget the session; returns whether one existed
    pub fn logout(&self) -> Result<bool> {
        let had_session = self.current.write().take().is_some();
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to remove session file: {:?}", self.path))
            }
        }
        debug!("Session cleared");
        Ok(had_session)
    }
}

impl TokenSource for SessionStore {
    fn token(&self) -> Option<String> {
        self.current.read().as_ref().map(|s| s.token.clone())
    }
}

fn read_session(path: &Path) -> Result<Option<Session>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
    };
    let session = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse session file: {:?}", path))?;
    Ok(Some(session))
}
