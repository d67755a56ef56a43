//! Wire format
//!
//! Requests follow JSON-RPC 2.0 framing (`jsonrpc`, `method`, `params`, `id`). Responses are
//! flat objects carrying the request id, a result, a status and an optional error message.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Protocol version sent by the client
pub const JSONRPC_VERSION: &str = "2.0";

/// Method names understood by the server
pub mod methods {
    pub const HELLO: &str = "hello";
    pub const ADD: &str = "add";
    pub const ASYNC_ADD: &str = "async_add";
    pub const CHECK_TASK_STATUS: &str = "check_task_status";
}

/// Error messages returned to callers
pub mod messages {
    pub const INVALID_JSON: &str = "Invalid JSON";
    pub const MISSING_ID: &str = "Missing request ID";
    pub const INVALID_PARAMS: &str = "Invalid parameters";
    pub const METHOD_NOT_FOUND: &str = "Method not found";
    pub const REQUEST_NOT_FOUND: &str = "Request ID not found";
    pub const SHUTTING_DOWN: &str = "Server is shutting down";
    pub const HELLO: &str = "Hello from http-rpc!";
    pub const TASK_SUBMITTED: &str = "Task submitted";
}

/// Inbound request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,

    #[serde(default)]
    pub method: Option<String>,

    #[serde(default)]
    pub params: Value,

    /// Request id; strings and numbers are accepted
    #[serde(default)]
    pub id: Value,
}

impl RpcRequest {
    /// Build a request with a string id
    pub fn new(method: impl Into<String>, params: Value, id: impl Into<String>) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            method: Some(method.into()),
            params,
            id: Value::String(id.into()),
        }
    }

    /// The id as a store/task key
    ///
    /// Returns `None` for a missing, null or non-scalar id.
    pub fn id_key(&self) -> Option<String> {
        match &self.id {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Lifecycle of a request as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Running,
    Completed,
    Failed,
    Error,
}

impl ResponseStatus {
    /// Whether the request is still being worked on
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Outbound response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Value,

    #[serde(default)]
    pub result: Value,

    pub status: ResponseStatus,

    #[serde(default)]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn completed(id: Value, result: Value) -> Self {
        Self {
            id,
            result,
            status: ResponseStatus::Completed,
            error: None,
        }
    }

    pub fn running(id: Value, result: Value) -> Self {
        Self {
            id,
            result,
            status: ResponseStatus::Running,
            error: None,
        }
    }

    pub fn error(id: Value, message: impl Into<String>) -> Self {
        Self {
            id,
            result: Value::Null,
            status: ResponseStatus::Error,
            error: Some(message.into()),
        }
    }
}

/// Sum two JSON numbers
///
/// Integers stay integers unless the sum overflows; anything else is summed as `f64`.
/// Returns `None` when either operand is not a number.
pub fn add_numbers(x: &Value, y: &Value) -> Option<Value> {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Some(json!(sum));
        }
    }
    let sum = x.as_f64()? + y.as_f64()?;
    serde_json::Number::from_f64(sum).map(Value::Number)
}

/// Extract the `x` and `y` operands of an add request
///
/// Params must be an object with exactly those two numeric keys.
pub fn add_operands(params: &Value) -> Option<(Value, Value)> {
    let params = params.as_object()?;
    if params.len() != 2 {
        return None;
    }
    let x = params.get("x")?;
    let y = params.get("y")?;
    if !x.is_number() || !y.is_number() {
        return None;
    }
    Some((x.clone(), y.clone()))
}
