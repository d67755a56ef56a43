//! HTTP client for the RPC endpoint

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::protocol::{methods, RpcRequest, RpcResponse};
use crate::retry::{RetryPolicy, Retryable};

/// Default per-request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC endpoint returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("RPC error: {0}")]
    Remote(String),
}

impl Retryable for RpcError {
    /// Connection problems, timeouts, 5xx and 429 are worth another attempt
    fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::Status { status, .. } => {
                *status >= 500 || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
            Self::Remote(_) => false,
        }
    }
}

/// Client for a `/rpc` endpoint
///
/// # Example
///
/// ```ignore
/// let client = RpcClient::new("http://127.0.0.1:5000/rpc")?;
/// client.async_add(json!(2), json!(3), Some("req-1".into())).await?;
/// let status = client.check_task_status("req-1").await?;
/// ```
pub struct RpcClient {
    url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl RpcClient {
    pub fn new(url: &str) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            url: url.to_string(),
            http,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Invoke `method` with `params`
    ///
    /// A request id is minted when none is given. Transient failures are retried per the
    /// client's policy; an `error` in the response body surfaces as [`RpcError::Remote`].
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        id: Option<String>,
    ) -> Result<RpcResponse, RpcError> {
        let id = id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let request = RpcRequest::new(method, params, id);
        debug!(%method, id = %request.id, "RPC call");

        self.retry.run(|| self.post(&request)).await
    }

    async fn post(&self, request: &RpcRequest) -> Result<RpcResponse, RpcError> {
        let response = self.http.post(&self.url).json(request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|body| body.get("error").and_then(Value::as_str).map(String::from))
                .unwrap_or(text);
            return Err(RpcError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: RpcResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(RpcError::Remote(error));
        }
        Ok(body)
    }

    pub async fn hello(&self) -> Result<RpcResponse, RpcError> {
        self.call(methods::HELLO, json!({}), None).await
    }

    pub async fn add(&self, x: Value, y: Value) -> Result<RpcResponse, RpcError> {
        self.call(methods::ADD, json!({ "x": x, "y": y }), None).await
    }

    pub async fn async_add(
        &self,
        x: Value,
        y: Value,
        id: Option<String>,
    ) -> Result<RpcResponse, RpcError> {
        self.call(methods::ASYNC_ADD, json!({ "x": x, "y": y }), id)
            .await
    }

    pub async fn check_task_status(&self, id: &str) -> Result<RpcResponse, RpcError> {
        self.call(methods::CHECK_TASK_STATUS, json!({}), Some(id.to_string()))
            .await
    }
}
