//! Request Proxy handlers: `POST /execute`, `POST /release`, `GET /status`.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use reqwest::StatusCode;

use crate::error::{GatewayError, Result};
use crate::pool::WorkerPoolController;

use super::types::{
    ExecuteRequest, ExecuteResponse, ReleaseRequest, ReleaseResponse, SandboxErrorBody, SandboxExecuteRequest,
    StatusResponse,
};

/// Armed for the duration of a forwarded sandbox call; if the handler
/// future is dropped before the call resolves — an external client
/// disconnecting mid-request — there is no way to know whether the
/// interpreter actually finished, so per §5 that is treated exactly like a
/// transport failure: the sandbox is destroyed and the session unbound.
/// `disarm` is called once the call actually resolves, at which point the
/// normal success/error handling in [`execute`] takes over.
struct CancelGuard {
    pool: Arc<WorkerPoolController>,
    session_id: String,
    armed: bool,
}

impl CancelGuard {
    fn new(pool: Arc<WorkerPoolController>, session_id: String) -> Self {
        Self { pool, session_id, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let pool = Arc::clone(&self.pool);
        let session_id = std::mem::take(&mut self.session_id);
        tokio::spawn(async move {
            tracing::warn!(session_id, "client disconnected mid-execute, destroying sandbox");
            pool.record_failure(&session_id).await;
        });
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<WorkerPoolController>,
    pub http_client: reqwest::Client,
    pub proxy_timeout: Duration,
}

/// Forwards one `/execute` call to a sandbox and translates its response
/// per §4.6: 2xx is the verbatim result, `408` is a reported execution
/// timeout, any other 4xx is a user-code error carrying a textual detail,
/// and everything else (5xx, a malformed body, a transport-level failure)
/// is this gateway's own `TransportFailure`.
async fn forward_to_sandbox(state: &AppState, base_url: &str, code: &str) -> Result<ExecuteResponse> {
    let response = state
        .http_client
        .post(format!("{base_url}/execute"))
        .timeout(state.proxy_timeout)
        .json(&SandboxExecuteRequest { code })
        .send()
        .await
        .map_err(|err| GatewayError::TransportFailure { reason: err.to_string() })?;

    match response.status() {
        status if status.is_success() => response
            .json::<ExecuteResponse>()
            .await
            .map_err(|err| GatewayError::TransportFailure { reason: err.to_string() }),
        StatusCode::REQUEST_TIMEOUT => Err(GatewayError::UserCodeTimeout),
        status if status.is_client_error() => {
            let detail = response
                .json::<SandboxErrorBody>()
                .await
                .map(|b| b.detail)
                .unwrap_or_else(|_| "sandbox reported a user-code error".to_string());
            Err(GatewayError::UserCodeError { message: detail })
        }
        status => Err(GatewayError::TransportFailure { reason: format!("sandbox returned status {status}") }),
    }
}

pub async fn execute(State(state): State<AppState>, Json(req): Json<ExecuteRequest>) -> Result<Json<ExecuteResponse>> {
    let sandbox = state.pool.acquire(&req.user_uuid).await?;

    let guard = CancelGuard::new(Arc::clone(&state.pool), req.user_uuid.clone());
    let result = forward_to_sandbox(&state, &sandbox.base_url, &req.code).await;
    guard.disarm();

    // The gateway's one consistent recovery policy: preserve the session on
    // a pure user-code error (and, by construction, on success), destroy it
    // on everything else — timeout, transport failure, or a bug.
    match &result {
        Err(err) if err.destroys_session() => state.pool.record_failure(&req.user_uuid).await,
        _ => state.pool.touch(&req.user_uuid).await,
    }

    result.map(Json)
}

pub async fn release(State(state): State<AppState>, Json(req): Json<ReleaseRequest>) -> Json<ReleaseResponse> {
    let existed = state.pool.lookup(&req.user_uuid).await.is_some();
    state.pool.release(&req.user_uuid).await;
    let detail = if existed {
        format!("session {} released", req.user_uuid)
    } else {
        format!("session {} was not bound", req.user_uuid)
    };
    Json(ReleaseResponse { status: "ok", detail })
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(state.pool.snapshot().await)
}

pub async fn health() -> &'static str {
    "ok"
}
