//! # Leasekeep RPC
//!
//! JSON-RPC style HTTP transport for the lease engine.
//!
//! - [`server::router`] - `/rpc` and `/health` routes over an [`AppState`]
//! - [`RequestStore`] - caller-visible results keyed by request id
//! - [`RpcClient`] - HTTP client with a [`RetryPolicy`]
//!
//! ```text
//!   RpcClient ──POST /rpc──▶ router ──▶ RequestStore
//!                               │            ▲
//!                               ▼            │ result
//!                            Engine ──▶ async_add work
//! ```

pub mod client;
pub mod config;
pub mod protocol;
pub mod retry;
pub mod server;
pub mod store;
pub mod telemetry;

pub use client::{RpcClient, RpcError};
pub use config::{ServerConfig, ServerConfigError};
pub use protocol::{ResponseStatus, RpcRequest, RpcResponse};
pub use retry::{RetryPolicy, Retryable};
pub use server::{router, AppState};
pub use store::{RequestStore, StoredRequest};
pub use telemetry::{init_telemetry, TelemetryConfig};
