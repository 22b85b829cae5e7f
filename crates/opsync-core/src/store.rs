//! Application entry point
//!
//! The `Store` wires the pieces a consumer needs from one `Config`: the
//! login session, the mirror backend, and per-resource coordinators built
//! on top of them. Views get a `TaskBoard` or a `ProjectSession` and never
//! touch the plumbing.
//!
//! ## Usage
//!
//! ```ignore
//! let store = Store::open()?;
//!
//! let board = store.task_board()?;
//! board.load(&TaskFilter::default()).await;
//! board.quick_add("Call supplier", "").await?;
//!
//! let project = store.project_session("p1")?;
//! project.load().await;
//! project.add_list("Review", None, "")?;
//! project.flush().await;
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::mirror::{LocalMirror, MirrorKey};
use crate::models::{Record, Task};
use crate::project::ProjectAggregate;
use crate::project_sync::ProjectSession;
use crate::remote::{HttpRemoteStore, RemoteStore, Resource, TokenSource};
use crate::session::SessionStore;
use crate::storage::{open_backend, MirrorBackend};
use crate::sync::SyncCoordinator;
use crate::tasks::TaskBoard;

/// Mirror namespace used before anyone logs in
pub const ANONYMOUS_USER: &str = "anonymous";

/// Shared session and mirror storage for one configuration
pub struct Store {
    config: Config,
    session: Arc<SessionStore>,
    backend: Arc<dyn MirrorBackend>,
}

impl Store {
    /// Open using the default configuration
    pub fn open() -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        Self::open_with_config(config)
    }

    pub fn open_with_config(config: Config) -> Result<Self> {
        let backend = open_backend(&config).context("Failed to open local mirror")?;
        let session = Arc::new(SessionStore::from_config(&config));
        Ok(Self::with_parts(config, session, backend))
    }

    /// Assemble from already opened parts
    pub fn with_parts(
        config: Config,
        session: Arc<SessionStore>,
        backend: Arc<dyn MirrorBackend>,
    ) -> Self {
        Self {
            config,
            session,
            backend,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn backend(&self) -> &Arc<dyn MirrorBackend> {
        &self.backend
    }

    /// Mirror of `resource` for the logged-in user
    pub fn mirror<R: Record>(&self, resource: &str) -> LocalMirror<R> {
        let user = self
            .session
            .user_id()
            .unwrap_or_else(|| ANONYMOUS_USER.to_string());
        LocalMirror::new(Arc::clone(&self.backend), MirrorKey::new(user, resource))
    }

    /// Coordinator over any remote store, mirrored under `resource`
    pub fn coordinator<R: Record>(
        &self,
        remote: Arc<dyn RemoteStore<R>>,
        resource: &str,
    ) -> SyncCoordinator<R> {
        SyncCoordinator::new(remote, self.mirror(resource), self.config.debounce())
    }

    /// HTTP store for `resource` authenticated by the session
    ///
    /// A session issued for a specific API overrides the configured URL.
    pub fn http_remote<R: Record>(&self, resource: Resource) -> Result<Arc<dyn RemoteStore<R>>> {
        let tokens = Arc::clone(&self.session) as Arc<dyn TokenSource>;
        let remote = match self.session.current().and_then(|s| s.api_url) {
            Some(api_url) => HttpRemoteStore::<R>::new(
                &api_url,
                resource,
                tokens,
                self.config.request_timeout(),
            )?,
            None => HttpRemoteStore::<R>::from_config(&self.config, resource, tokens)?,
        };
        Ok(Arc::new(remote))
    }

    pub fn task_board(&self) -> Result<TaskBoard> {
        let resource = Resource::tasks();
        let name = resource.name().to_string();
        let remote = self.http_remote::<Task>(resource)?;
        Ok(TaskBoard::new(self.coordinator(remote, &name)))
    }

    /// Coordinator over every project the user can see
    pub fn projects(&self) -> Result<SyncCoordinator<ProjectAggregate>> {
        let resource = Resource::projects();
        let name = resource.name().to_string();
        let remote = self.http_remote::<ProjectAggregate>(resource)?;
        Ok(self.coordinator(remote, &name))
    }

    pub fn project_session(&self, project_id: &str) -> Result<ProjectSession> {
        Ok(ProjectSession::new(self.projects()?, project_id))
    }
}
