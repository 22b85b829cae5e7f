//! Remote record stores
//!
//! A `RemoteStore` wraps one REST resource behind a uniform async interface.
//! Every call is a single attempt: no retries, no caching. Callers decide
//! what a failure means (rollback, offline fallback) based on `RemoteError`.

pub mod envelope;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::Record;

pub use http::{HttpRemoteStore, Resource};
pub use memory::{FailureMode, MemoryRemoteStore};

/// Suffix of the `details` sentinel the server sends for a feature whose
/// backing table has not been provisioned
pub const TABLE_MISSING_SUFFIX: &str = "_TABLE_MISSING";

/// Result type for remote operations
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors from a remote store call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// No bearer token; the request was never sent
    #[error("You must be logged in")]
    AuthMissing,

    /// Transport failure, including timeouts
    #[error("Network error: {cause}")]
    Network { cause: String },

    /// Server answered with a non-success status
    #[error("Request failed with status {status}: {}", message.as_deref().unwrap_or("no message"))]
    Status {
        status: u16,
        message: Option<String>,
        details: Option<String>,
        body: String,
    },

    /// The feature is not provisioned on this server
    #[error("Feature unavailable: {details}")]
    FeatureUnavailable { details: String },

    /// Response body could not be decoded into a record
    #[error("Invalid response: {message}")]
    Decode { message: String },
}

impl RemoteError {
    pub fn network(cause: impl ToString) -> Self {
        RemoteError::Network {
            cause: cause.to_string(),
        }
    }

    pub fn decode(message: impl ToString) -> Self {
        RemoteError::Decode {
            message: message.to_string(),
        }
    }

    /// Build an error from a non-success response
    ///
    /// Understands `{error: {message, details}}` and top-level `details`.
    /// A `*_TABLE_MISSING` sentinel in `details` becomes `FeatureUnavailable`.
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let error_obj = parsed.as_ref().and_then(|v| v.get("error"));

        let message = error_obj
            .and_then(|e| e.get("message").or_else(|| e.as_str().map(|_| e)))
            .and_then(Value::as_str)
            .or_else(|| parsed.as_ref()?.get("message")?.as_str())
            .map(str::to_string);

        let details = error_obj
            .and_then(|e| e.get("details"))
            .or_else(|| parsed.as_ref()?.get("details"))
            .and_then(details_text);

        if let Some(d) = details.as_deref() {
            if d.ends_with(TABLE_MISSING_SUFFIX) {
                return RemoteError::FeatureUnavailable {
                    details: d.to_string(),
                };
            }
        }

        RemoteError::Status {
            status,
            message,
            details,
            body: body.to_string(),
        }
    }

    /// HTTP status, if the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The server says the record does not exist
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Failures where keeping local changes and retrying later makes sense
    ///
    /// Transport errors, 5xx, 408 and 429. Other client errors mean the
    /// server rejected the change itself.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Network { .. } => true,
            RemoteError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    /// Failures that flip a coordinator to offline
    pub fn is_connectivity(&self) -> bool {
        matches!(self, RemoteError::Network { .. } | RemoteError::Status { .. })
    }

    /// Short message suitable for an inline banner
    pub fn user_message(&self) -> String {
        match self {
            RemoteError::AuthMissing => "You must be logged in".to_string(),
            RemoteError::Network { .. } => {
                "Could not reach the server. Changes are kept on this device.".to_string()
            }
            RemoteError::Status {
                status, message, ..
            } => match message {
                Some(m) => m.clone(),
                None => format!("The server rejected the request ({})", status),
            },
            RemoteError::FeatureUnavailable { .. } => {
                "This feature is not enabled on the server".to_string()
            }
            RemoteError::Decode { .. } => "The server sent an unexpected response".to_string(),
        }
    }
}

fn details_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Filters for list calls
///
/// Serialized as query parameters with the server's names
/// (`status`, `category`, `tagId`, `priority`, `search`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

impl ListParams {
    /// Query pairs in a stable order, unset filters omitted
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        [
            ("status", &self.status),
            ("category", &self.category),
            ("tagId", &self.tag_id),
            ("priority", &self.priority),
            ("search", &self.search),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| (k, v.clone())))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.to_query().is_empty()
    }
}

/// Supplies the bearer token for requests
///
/// Injected into stores so they never reach for global session state.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// Fixed token, mostly for tests
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// One REST resource of records of type `R`
#[async_trait]
pub trait RemoteStore<R: Record>: Send + Sync {
    /// Whether a call would carry credentials
    ///
    /// Callers check this first so a missing login never looks like an
    /// outage.
    fn is_authenticated(&self) -> bool;

    async fn list(&self, params: &ListParams) -> RemoteResult<Vec<R>>;

    async fn get(&self, id: &str) -> RemoteResult<R>;

    async fn create(&self, record: &R) -> RemoteResult<R>;

    /// Send a full or partial body; the server returns the merged record
    async fn update(&self, id: &str, patch: &Value) -> RemoteResult<R>;

    async fn remove(&self, id: &str) -> RemoteResult<()>;
}
