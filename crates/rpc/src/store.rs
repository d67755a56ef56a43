//! Request/result store
//!
//! Caller-visible results keyed by request id. Entries outlive the engine's own task
//! records, which are reaped soon after completion.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::protocol::ResponseStatus;

/// Stored state of one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRequest {
    pub result: Value,
    pub error: Option<String>,
    pub status: ResponseStatus,
}

impl StoredRequest {
    pub fn running() -> Self {
        Self {
            result: Value::Null,
            error: None,
            status: ResponseStatus::Running,
        }
    }

    pub fn completed(result: Value) -> Self {
        Self {
            result,
            error: None,
            status: ResponseStatus::Completed,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            result: Value::Null,
            error: Some(error.into()),
            status: ResponseStatus::Failed,
        }
    }
}

/// In-memory request store
#[derive(Default)]
pub struct RequestStore {
    requests: RwLock<HashMap<String, StoredRequest>>,
}

impl RequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for a request
    pub fn put(&self, request_id: &str, entry: StoredRequest) {
        debug!(%request_id, status = %entry.status, "Stored request");
        self.requests.write().insert(request_id.to_string(), entry);
    }

    /// Insert an entry unless the request id is already known
    ///
    /// Returns `false` if an entry existed; the existing entry is left untouched.
    pub fn insert_new(&self, request_id: &str, entry: StoredRequest) -> bool {
        let mut requests = self.requests.write();
        if requests.contains_key(request_id) {
            return false;
        }
        debug!(%request_id, status = %entry.status, "Stored request");
        requests.insert(request_id.to_string(), entry);
        true
    }

    pub fn get(&self, request_id: &str) -> Option<StoredRequest> {
        self.requests.read().get(request_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.requests.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.read().is_empty()
    }
}
