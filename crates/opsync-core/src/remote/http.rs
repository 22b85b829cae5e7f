//! REST-backed remote store
//!
//! Talks to `/api/<resource>` endpoints with bearer-token auth. One request
//! per call; the only timeout is the one configured on the client.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde_json::Value;
use tracing::{debug, warn};

use super::envelope;
use super::{ListParams, RemoteError, RemoteResult, RemoteStore, TokenSource};
use crate::config::Config;
use crate::models::Record;

/// Where a resource lives and how its responses are keyed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Collection path, e.g. `/api/tasks`
    pub path: String,
    /// Key of the array in list responses, e.g. `tasks`
    pub collection: String,
    /// Key of the record in single responses, e.g. `task`
    pub item: String,
}

impl Resource {
    pub fn new(
        path: impl Into<String>,
        collection: impl Into<String>,
        item: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            collection: collection.into(),
            item: item.into(),
        }
    }

    /// Personal task list
    pub fn tasks() -> Self {
        Self::new("/api/user-tasks", "tasks", "task")
    }

    /// Project aggregates
    pub fn projects() -> Self {
        Self::new("/api/projects", "projects", "project")
    }

    /// Name used for mirror keys
    pub fn name(&self) -> &str {
        &self.collection
    }
}

/// `RemoteStore` over HTTP using reqwest
pub struct HttpRemoteStore<R> {
    client: Client,
    collection_url: Url,
    resource: Resource,
    tokens: Arc<dyn TokenSource>,
    _record: PhantomData<fn() -> R>,
}

impl<R> fmt::Debug for HttpRemoteStore<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRemoteStore")
            .field("collection_url", &self.collection_url.as_str())
            .field("resource", &self.resource)
            .finish()
    }
}

impl<R: Record> HttpRemoteStore<R> {
    /// Create a store for `resource` under `base_url`
    ///
    /// `timeout` of `None` leaves reqwest's default (no overall timeout).
    pub fn new(
        base_url: &str,
        resource: Resource,
        tokens: Arc<dyn TokenSource>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("Invalid API URL: {}", base_url))?;
        if base.cannot_be_a_base() {
            bail!("API URL cannot be used as a base: {}", base_url);
        }
        let collection_url = base
            .join(&resource.path)
            .with_context(|| format!("Invalid resource path: {}", resource.path))?;

        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            collection_url,
            resource,
            tokens,
            _record: PhantomData,
        })
    }

    /// Create a store using `api_url` and `request_timeout_secs` from config
    pub fn from_config(
        config: &Config,
        resource: Resource,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self> {
        let Some(api_url) = config.api_url.as_deref() else {
            bail!("No API URL configured. Set api_url with `opsync config set api_url <url>` or OPSYNC_API_URL.");
        };
        Self::new(api_url, resource, tokens, config.request_timeout())
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    fn item_url(&self, id: &str) -> Url {
        let mut url = self.collection_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(id);
        }
        url
    }

    /// Send one request and return the decoded JSON body, if any
    async fn send(&self, method: Method, url: Url, body: Option<&Value>) -> RemoteResult<Option<Value>> {
        let Some(token) = self.tokens.token() else {
            debug!("No session token, skipping {} {}", method, url);
            return Err(RemoteError::AuthMissing);
        };

        debug!(method = %method, url = %url, "Sending request");

        let mut request = self.client.request(method.clone(), url.clone()).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            warn!(method = %method, url = %url, error = %e, "Request failed");
            RemoteError::network(e)
        })?;

        let status = response.status();
        let text = response.text().await.map_err(RemoteError::network)?;

        if !status.is_success() {
            warn!(method = %method, url = %url, status = %status, "Server returned an error");
            return Err(RemoteError::from_response(status.as_u16(), &text));
        }

        if text.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&text)
            .map(Some)
            .map_err(RemoteError::decode)
    }

    async fn send_for_record(&self, method: Method, url: Url, body: Option<&Value>) -> RemoteResult<R> {
        let value = self
            .send(method, url, body)
            .await?
            .ok_or_else(|| RemoteError::decode("empty response body"))?;
        envelope::decode_single(value, &self.resource.item)
    }
}

#[async_trait]
impl<R: Record> RemoteStore<R> for HttpRemoteStore<R> {
    fn is_authenticated(&self) -> bool {
        self.tokens.token().is_some()
    }

    async fn list(&self, params: &ListParams) -> RemoteResult<Vec<R>> {
        let mut url = self.collection_url.clone();
        let query = params.to_query();
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &query {
                pairs.append_pair(key, value);
            }
        }

        let body = self.send(Method::GET, url, None).await?;
        let records = body
            .map(|b| envelope::decode_list(b, &self.resource.collection))
            .unwrap_or_default();
        debug!("Listed {} {}", records.len(), self.resource.collection);
        Ok(records)
    }

    async fn get(&self, id: &str) -> RemoteResult<R> {
        self.send_for_record(Method::GET, self.item_url(id), None)
            .await
    }

    async fn create(&self, record: &R) -> RemoteResult<R> {
        let body = serde_json::to_value(record).map_err(RemoteError::decode)?;
        self.send_for_record(Method::POST, self.collection_url.clone(), Some(&body))
            .await
    }

    async fn update(&self, id: &str, patch: &Value) -> RemoteResult<R> {
        self.send_for_record(Method::PUT, self.item_url(id), Some(patch))
            .await
    }

    async fn remove(&self, id: &str) -> RemoteResult<()> {
        self.send(Method::DELETE, self.item_url(id), None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Task, TaskStatus};
    use crate::remote::StaticToken;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ServerState {
        hits: AtomicUsize,
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some("Bearer secret")
    }

    async fn list_tasks(
        State(state): State<Arc<ServerState>>,
        headers: HeaderMap,
        Query(query): Query<HashMap<String, String>>,
    ) -> (StatusCode, Json<Value>) {
        state.hits.fetch_add(1, Ordering::SeqCst);
        if !authorized(&headers) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": {"message": "Unauthorized"}})),
            );
        }
        let mut tasks = vec![
            json!({"id": "1", "title": "Order steel", "status": "todo"}),
            json!({"id": "2", "title": "Ship crate", "status": "completed"}),
        ];
        if let Some(status) = query.get("status") {
            tasks.retain(|t| t["status"] == status.as_str());
        }
        (StatusCode::OK, Json(json!({"data": {"tasks": tasks}})))
    }

    async fn create_task(
        State(state): State<Arc<ServerState>>,
        Json(mut body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        state.hits.fetch_add(1, Ordering::SeqCst);
        body["id"] = json!("srv-1");
        (StatusCode::CREATED, Json(json!({"data": {"task": body}})))
    }

    async fn get_task(
        State(state): State<Arc<ServerState>>,
        Path(id): Path<String>,
    ) -> (StatusCode, Json<Value>) {
        state.hits.fetch_add(1, Ordering::SeqCst);
        match id.as_str() {
            "1" => (
                StatusCode::OK,
                Json(json!({"task": {"id": "1", "title": "Order steel"}})),
            ),
            "forms" => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": {"message": "Database error", "details": "SERVICE_FORMS_TABLE_MISSING"}})),
            ),
            _ => (
                StatusCode::NOT_FOUND,
                Json(json!({"error": {"message": "Task not found"}})),
            ),
        }
    }

    async fn update_task(
        State(state): State<Arc<ServerState>>,
        Path(id): Path<String>,
        Json(patch): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        state.hits.fetch_add(1, Ordering::SeqCst);
        let mut task = json!({"id": id, "title": "Order steel", "status": "todo"});
        if let (Some(task), Some(patch)) = (task.as_object_mut(), patch.as_object()) {
            for (k, v) in patch {
                task.insert(k.clone(), v.clone());
            }
        }
        (StatusCode::OK, Json(json!({"data": {"task": task}})))
    }

    async fn delete_task(State(state): State<Arc<ServerState>>) -> StatusCode {
        state.hits.fetch_add(1, Ordering::SeqCst);
        StatusCode::NO_CONTENT
    }

    async fn start_test_server() -> (SocketAddr, Arc<ServerState>) {
        let state = Arc::new(ServerState::default());
        let app = Router::new()
            .route("/api/user-tasks", get(list_tasks).post(create_task))
            .route(
                "/api/user-tasks/{id}",
                get(get_task).put(update_task).delete(delete_task),
            )
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, state)
    }

    fn store(addr: SocketAddr, token: StaticToken) -> HttpRemoteStore<Task> {
        HttpRemoteStore::new(
            &format!("http://{}", addr),
            Resource::tasks(),
            Arc::new(token),
            Some(Duration::from_secs(5)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_with_filters() {
        let (addr, _) = start_test_server().await;
        let store = store(addr, StaticToken::new("secret"));

        let all = store.list(&ListParams::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let params = ListParams {
            status: Some("completed".to_string()),
            ..Default::default()
        };
        let done = store.list(&params).await.unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_missing_token_short_circuits() {
        let (addr, state) = start_test_server().await;
        let store = store(addr, StaticToken::none());

        assert!(!store.is_authenticated());
        let err = store.list(&ListParams::default()).await.unwrap_err();
        assert_eq!(err, RemoteError::AuthMissing);
        assert_eq!(state.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wrong_token_is_status_error() {
        let (addr, _) = start_test_server().await;
        let store = store(addr, StaticToken::new("stale"));

        let err = store.list(&ListParams::default()).await.unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert_eq!(err.user_message(), "Unauthorized");
    }

    #[tokio::test]
    async fn test_create_returns_server_record() {
        let (addr, _) = start_test_server().await;
        let store = store(addr, StaticToken::new("secret"));

        let created = store.create(&Task::new("Call supplier")).await.unwrap();
        assert_eq!(created.id, "srv-1");
        assert_eq!(created.title, "Call supplier");
    }

    #[tokio::test]
    async fn test_get_update_remove() {
        let (addr, _) = start_test_server().await;
        let store = store(addr, StaticToken::new("secret"));

        let task = store.get("1").await.unwrap();
        assert_eq!(task.title, "Order steel");

        let updated = store
            .update("1", &json!({"status": "in-progress"}))
            .await
            .unwrap();
        assert_eq!(updated.status, TaskStatus::InProgress);

        store.remove("1").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (addr, _) = start_test_server().await;
        let store = store(addr, StaticToken::new("secret"));

        let err = store.get("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_table_missing_is_feature_unavailable() {
        let (addr, _) = start_test_server().await;
        let store = store(addr, StaticToken::new("secret"));

        let err = store.get("forms").await.unwrap_err();
        assert!(matches!(err, RemoteError::FeatureUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = store(addr, StaticToken::new("secret"));
        let err = store.list(&ListParams::default()).await.unwrap_err();
        assert!(matches!(err, RemoteError::Network { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_item_url_escapes_ids() {
        let store: HttpRemoteStore<Task> = HttpRemoteStore::new(
            "https://ops.example.com",
            Resource::tasks(),
            Arc::new(StaticToken::none()),
            None,
        )
        .unwrap();
        assert_eq!(
            store.item_url("a/b").as_str(),
            "https://ops.example.com/api/user-tasks/a%2Fb"
        );
    }

    #[test]
    fn test_from_config_requires_api_url() {
        let config = Config::default();
        let result = HttpRemoteStore::<Task>::from_config(
            &config,
            Resource::tasks(),
            Arc::new(StaticToken::none()),
        );
        assert!(result.is_err());
    }
}
