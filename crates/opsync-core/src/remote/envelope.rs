//! Response envelope normalization
//!
//! The API has shipped several response shapes over time. List endpoints
//! answer with any of:
//!
//! - `{ "data": { "<collection>": [...] } }`
//! - `{ "<collection>": [...] }`
//! - `{ "items": [...] }`
//!
//! and single-record endpoints with `{ "data": { "<item>": {...} } }`,
//! `{ "<item>": {...} }` or the bare record. This module is a compatibility
//! shim: once the server settles on the `data` envelope it can go.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{RemoteError, RemoteResult};

/// Extract the record array from a list response
///
/// Unknown shapes and a bare `null` yield an empty list. A bare top-level
/// array is accepted as well.
pub fn list_items(body: Value, collection: &str) -> Vec<Value> {
    let mut body = body;

    if let Some(data) = body.get_mut("data") {
        if let Some(Value::Array(items)) = data.get_mut(collection).map(Value::take) {
            return items;
        }
        if let Value::Array(items) = data.take() {
            return items;
        }
    }

    if let Some(Value::Array(items)) = body.get_mut(collection).map(Value::take) {
        return items;
    }

    if let Some(Value::Array(items)) = body.get_mut("items").map(Value::take) {
        return items;
    }

    match body {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

/// Extract a single record from a detail/create/update response
pub fn single_item(body: Value, item: &str) -> Option<Value> {
    let mut body = body;

    if let Some(data) = body.get_mut("data") {
        if let Some(record) = data.get_mut(item).map(Value::take) {
            if record.is_object() {
                return Some(record);
            }
        }
        if data.is_object() {
            return Some(data.take());
        }
    }

    if let Some(record) = body.get_mut(item).map(Value::take) {
        if record.is_object() {
            return Some(record);
        }
    }

    body.is_object().then_some(body)
}

/// Decode a list response into records
///
/// Entries that do not decode are skipped with a warning rather than
/// failing the whole list.
pub fn decode_list<R: DeserializeOwned>(body: Value, collection: &str) -> Vec<R> {
    list_items(body, collection)
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Skipping undecodable {} entry: {}", collection, e);
                None
            }
        })
        .collect()
}

/// Decode a single-record response
pub fn decode_single<R: DeserializeOwned>(body: Value, item: &str) -> RemoteResult<R> {
    let record = single_item(body, item)
        .ok_or_else(|| RemoteError::decode(format!("response has no '{}' record", item)))?;
    serde_json::from_value(record).map_err(RemoteError::decode)
}
