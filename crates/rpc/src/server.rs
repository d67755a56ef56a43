// RPC HTTP routes
// Decision: One POST endpoint dispatching on the JSON-RPC `method` field
// Decision: A request id already in the store is answered from the store without re-executing

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use leasekeep_engine::{Arguments, Engine, EngineError, TaskStatus, Work, WorkContext, WorkError};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::protocol::{add_numbers, add_operands, messages, methods, RpcRequest, RpcResponse};
use crate::store::{RequestStore, StoredRequest};

/// State shared by the RPC routes
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub store: Arc<RequestStore>,
    /// Simulated duration of `async_add`
    pub add_delay: Duration,
}

impl AppState {
    pub fn new(engine: Engine, add_delay: Duration) -> Self {
        Self {
            engine,
            store: Arc::new(RequestStore::new()),
            add_delay,
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    tasks: usize,
    in_flight: usize,
}

type RpcReply = (StatusCode, Json<RpcResponse>);

/// Create the RPC router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/rpc", post(rpc_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        tasks: state.engine.task_count(),
        in_flight: state.engine.in_flight(),
    })
}

/// POST /rpc
async fn rpc_handler(
    State(state): State<AppState>,
    payload: Result<Json<RpcRequest>, JsonRejection>,
) -> RpcReply {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Rejected RPC payload");
            return reply(
                StatusCode::BAD_REQUEST,
                RpcResponse::error(Value::Null, messages::INVALID_JSON),
            );
        }
    };

    let method = request.method.clone().unwrap_or_default();
    info!(%method, id = %request.id, "Received RPC request");

    let Some(request_id) = request.id_key() else {
        return reply(
            StatusCode::BAD_REQUEST,
            RpcResponse::error(request.id, messages::MISSING_ID),
        );
    };

    if let Some(stored) = lookup(&state, &request_id) {
        debug!(%request_id, status = %stored.status, "Answering from request store");
        return reply(StatusCode::OK, stored_response(request.id, stored));
    }

    match method.as_str() {
        methods::HELLO => reply(
            StatusCode::OK,
            RpcResponse::completed(request.id, json!(messages::HELLO)),
        ),
        methods::ADD => handle_add(&state, request, &request_id),
        methods::ASYNC_ADD => handle_async_add(&state, request, &request_id),
        methods::CHECK_TASK_STATUS => {
            info!(%request_id, "Request ID not found");
            reply(
                StatusCode::NOT_FOUND,
                RpcResponse::error(request.id, messages::REQUEST_NOT_FOUND),
            )
        }
        _ => {
            warn!(%method, "Method not found");
            reply(
                StatusCode::NOT_FOUND,
                RpcResponse::error(request.id, messages::METHOD_NOT_FOUND),
            )
        }
    }
}

fn handle_add(state: &AppState, request: RpcRequest, request_id: &str) -> RpcReply {
    let Some(sum) = add_operands(&request.params).and_then(|(x, y)| add_numbers(&x, &y)) else {
        return invalid_params(request.id);
    };

    state
        .store
        .put(request_id, StoredRequest::completed(sum.clone()));
    reply(StatusCode::OK, RpcResponse::completed(request.id, sum))
}

fn handle_async_add(state: &AppState, request: RpcRequest, request_id: &str) -> RpcReply {
    let Some((x, y)) = add_operands(&request.params) else {
        return invalid_params(request.id);
    };

    if !state.store.insert_new(request_id, StoredRequest::running()) {
        // a concurrent request with the same id got there first
        let stored = lookup(state, request_id).unwrap_or_else(StoredRequest::running);
        return reply(StatusCode::OK, stored_response(request.id, stored));
    }

    let mut arguments = Arguments::new();
    arguments.insert("x".to_string(), x);
    arguments.insert("y".to_string(), y);

    let work = async_add_work(Arc::clone(&state.store), state.add_delay);
    match state.engine.submit(work, request_id, arguments) {
        Ok(()) => reply(
            StatusCode::OK,
            RpcResponse::running(request.id, json!(messages::TASK_SUBMITTED)),
        ),
        Err(e) => {
            error!(%request_id, error = %e, "Failed to submit async_add");
            state
                .store
                .put(request_id, StoredRequest::failed(e.to_string()));
            let (status, message) = match e {
                EngineError::ShuttingDown => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    messages::SHUTTING_DOWN.to_string(),
                ),
                other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
            };
            reply(status, RpcResponse::error(request.id, message))
        }
    }
}

/// Work behind `async_add`: wait, then record `x + y` in the request store
///
/// Failures are only stored while the attempt still owns the task.
pub fn async_add_work(store: Arc<RequestStore>, delay: Duration) -> Work {
    Work::new(move |ctx: WorkContext| {
        let store = Arc::clone(&store);
        async move {
            let outcome = delayed_sum(&ctx, delay).await;

            match &outcome {
                Ok(sum) => {
                    store.put(&ctx.task_id, StoredRequest::completed(sum.clone()));
                    ctx.complete(sum.clone());
                }
                // a superseded attempt failing is not a verdict on the request
                Err(e) if ctx.is_current_attempt() => {
                    store.put(&ctx.task_id, StoredRequest::failed(e.message.clone()))
                }
                Err(e) => debug!(
                    task_id = %ctx.task_id,
                    attempt_id = %ctx.attempt_id,
                    error = %e,
                    "Superseded async_add attempt failed"
                ),
            }
            outcome
        }
    })
}

async fn delayed_sum(ctx: &WorkContext, delay: Duration) -> Result<Value, WorkError> {
    let x: Value = ctx.arg("x")?;
    let y: Value = ctx.arg("y")?;
    debug!(task_id = %ctx.task_id, ?delay, "Simulating a long computation");
    tokio::time::sleep(delay).await;
    add_numbers(&x, &y).ok_or_else(|| WorkError::failed(messages::INVALID_PARAMS))
}

/// Stored state of a request, corrected by the engine's verdict
///
/// A request still marked running whose task the engine reports as failed is recorded and
/// returned as failed.
fn lookup(state: &AppState, request_id: &str) -> Option<StoredRequest> {
    let stored = state.store.get(request_id)?;
    if !stored.status.is_running() {
        return Some(stored);
    }

    match state.engine.status(request_id) {
        Ok(view) if view.status == TaskStatus::Failed => {
            let failed =
                StoredRequest::failed(view.error.unwrap_or_else(|| "task failed".to_string()));
            state.store.put(request_id, failed.clone());
            Some(failed)
        }
        _ => Some(stored),
    }
}

fn stored_response(id: Value, stored: StoredRequest) -> RpcResponse {
    RpcResponse {
        id,
        result: stored.result,
        status: stored.status,
        error: stored.error,
    }
}

fn invalid_params(id: Value) -> RpcReply {
    reply(
        StatusCode::BAD_REQUEST,
        RpcResponse::error(id, messages::INVALID_PARAMS),
    )
}

fn reply(status: StatusCode, body: RpcResponse) -> RpcReply {
    (status, Json(body))
}
