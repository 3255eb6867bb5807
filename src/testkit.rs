//! Reference Sandbox Agent: an in-process stand-in for the external
//! contract every sandbox container exposes, used only by this crate's integration
//! tests. It is not part of the production `serve` binary.
//!
//! Each "container" is really one axum server bound to an ephemeral
//! localhost port, holding its own interpreter state for the lifetime of
//! the fake `ContainerDriver` handle that created it — mirroring one real
//! sandbox container's lifetime being equal to one session's lifetime.
//! The interpreter itself is deliberately trivial: integer variable
//! assignment, `print(...)`, a `show()` marker that emits a fixed PNG
//! payload, and a `sleep()` marker that simulates the kernel reporting its
//! own execution timeout. Wiring its responses through
//! [`ExecutionAssembler`] keeps this harness honest about the precedence
//! rule it is standing in to exercise, and the HTTP status it answers with
//! — 200 for a result, 408 for a timeout, 400 for any other user-code error
//! — mirrors §4.6's external sandbox-agent contract rather than smuggling
//! error detail inside a 200 body.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::driver::{ContainerDriver, ContainerHandle, ContainerSpec, DriverError, Result as DriverResult};
use crate::execution::{ExecutionAssembler, ExecutionOutcome, ExecutionState, KernelMessage};
use crate::proxy::types::{ExecuteResponse, SandboxErrorBody, SandboxExecuteRequest};

/// A 1x1 transparent PNG, used as the fixed payload for `show()`.
pub const FAKE_PNG_BASE64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNk+A8AAQUBAScY42YAAAAASUVORK5CYII=";

/// The `ename` this harness uses for its synthetic "execution timed out"
/// marker, distinguishing it from an ordinary `SyntaxError` so the handler
/// knows to answer `408` rather than `400`.
const TIMEOUT_ENAME: &str = "TimeoutError";

struct AgentState {
    vars: Mutex<HashMap<String, i64>>,
}

async fn execute_handler(State(state): State<Arc<AgentState>>, Json(req): Json<SandboxExecuteRequestOwned>) -> Response {
    let mut assembler = ExecutionAssembler::new();
    let mut vars = state.vars.lock().await;

    for line in req.code.lines() {
        if assembler.is_done() {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "show()" {
            assembler.push(KernelMessage::DisplayData {
                image_base64: Some(FAKE_PNG_BASE64.to_string()),
                text: None,
            });
        } else if line == "hang()" {
            // Simulates a slow-but-eventually-successful execution, long
            // enough for a test to abort the caller mid-call and exercise
            // the gateway's client-disconnect cancellation path.
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            assembler.push(KernelMessage::Stream { text: "done\n".to_string() });
        } else if line == "sleep()" {
            // A real sandbox agent would actually enforce its own
            // EXECUTION_TIMEOUT and answer once that budget is exceeded.
            // Reproducing that wall-clock wait here would only make tests
            // slow and flaky, so this marker jumps straight to the outcome
            // a genuine timeout produces: an error the gateway must
            // recognize as a timeout rather than a generic user-code bug.
            assembler.push(KernelMessage::Error {
                ename: TIMEOUT_ENAME.to_string(),
                evalue: "execution exceeded the configured execution timeout".to_string(),
                traceback: vec![],
            });
        } else if let Some(rest) = line.strip_prefix("print(").and_then(|s| s.strip_suffix(")")) {
            match eval_expr(rest, &vars) {
                Some(value) => assembler.push(KernelMessage::Stream { text: format!("{value}\n") }),
                None => assembler.push(syntax_error(line)),
            }
        } else if let Some((name, value)) = line.split_once('=') {
            let name = name.trim();
            let value = value.trim();
            if value.is_empty() || !is_identifier(name) {
                assembler.push(syntax_error(line));
            } else {
                match eval_expr(value, &vars) {
                    Some(v) => {
                        vars.insert(name.to_string(), v);
                    }
                    None => assembler.push(syntax_error(line)),
                }
            }
        } else {
            assembler.push(syntax_error(line));
        }
    }
    drop(vars);

    assembler.push(KernelMessage::Status { execution_state: ExecutionState::Idle });
    match assembler.finish() {
        ExecutionOutcome::Error { message } => {
            let status = if message.starts_with(TIMEOUT_ENAME) {
                StatusCode::REQUEST_TIMEOUT
            } else {
                StatusCode::BAD_REQUEST
            };
            (status, Json(SandboxErrorBody { detail: message })).into_response()
        }
        outcome => (StatusCode::OK, Json(ExecuteResponse::from(outcome))).into_response(),
    }
}

fn syntax_error(line: &str) -> KernelMessage {
    KernelMessage::Error {
        ename: "SyntaxError".to_string(),
        evalue: format!("cannot parse: {line}"),
        traceback: vec![],
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') && !s.chars().next().unwrap().is_ascii_digit()
}

fn eval_expr(expr: &str, vars: &HashMap<String, i64>) -> Option<i64> {
    let expr = expr.trim();
    if let Ok(n) = expr.parse::<i64>() {
        return Some(n);
    }
    if let Some((lhs, rhs)) = expr.split_once('+') {
        return Some(resolve(lhs.trim(), vars)? + resolve(rhs.trim(), vars)?);
    }
    resolve(expr, vars)
}

fn resolve(token: &str, vars: &HashMap<String, i64>) -> Option<i64> {
    if let Ok(n) = token.parse::<i64>() {
        return Some(n);
    }
    vars.get(token).copied()
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// `serde`-identical to [`SandboxExecuteRequest`] but owned, since the
/// production type borrows its `code` field for zero-copy serialization on
/// the gateway side.
#[derive(Debug, serde::Deserialize)]
struct SandboxExecuteRequestOwned {
    code: String,
}

fn build_agent_router() -> Router {
    let state = Arc::new(AgentState { vars: Mutex::new(HashMap::new()) });
    Router::new()
        .route("/health", get(health_handler))
        .route("/execute", post(execute_handler))
        .with_state(state)
}

/// A [`ContainerDriver`] that spawns one in-process reference Sandbox Agent
/// per "container" instead of touching Docker, for integration tests that
/// need to exercise the full gateway over real HTTP.
pub struct InProcessSandboxDriver {
    servers: Mutex<HashMap<String, JoinHandle<()>>>,
    counter: std::sync::atomic::AtomicU64,
}

impl InProcessSandboxDriver {
    pub fn new() -> Self {
        Self {
            servers: Mutex::new(HashMap::new()),
            counter: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

impl Default for InProcessSandboxDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerDriver for InProcessSandboxDriver {
    async fn create(&self, spec: &ContainerSpec) -> DriverResult<ContainerHandle> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| DriverError::Create { name: spec.name.clone(), reason: e.to_string() })?;
        let addr = listener.local_addr().map_err(|e| DriverError::Create {
            name: spec.name.clone(),
            reason: e.to_string(),
        })?;

        let app = build_agent_router();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let id = format!(
            "testkit-{}",
            self.counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
        );
        self.servers.lock().await.insert(id.clone(), handle);

        Ok(ContainerHandle { container_id: id, host: addr.ip().to_string(), port: addr.port() })
    }

    async fn destroy(&self, container_id: &str) -> DriverResult<()> {
        if let Some(handle) = self.servers.lock().await.remove(container_id) {
            handle.abort();
        }
        Ok(())
    }

    async fn is_running(&self, container_id: &str) -> DriverResult<bool> {
        Ok(self.servers.lock().await.contains_key(container_id))
    }

    async fn list_managed(&self, _label: &str) -> DriverResult<Vec<String>> {
        Ok(self.servers.lock().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unused_spec() -> ContainerSpec {
        ContainerSpec {
            name: "t".to_string(),
            image: "unused".to_string(),
            network: "unused".to_string(),
            env: vec![],
            memory_limit_bytes: 0,
            cpu_quota: None,
            disk_limit_bytes: None,
            labels: Default::default(),
        }
    }

    #[tokio::test]
    async fn stateful_arithmetic_matches_seed_scenario() {
        let driver = InProcessSandboxDriver::new();
        let handle = driver.create(&unused_spec()).await.expect("create");

        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{}/execute", handle.base_url()))
            .json(&SandboxExecuteRequest { code: "x = 100" })
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let body: ExecuteResponse = resp.json().await.unwrap();
        assert_eq!(body, ExecuteResponse { result_text: None, result_base64: None });

        let resp = client
            .post(format!("{}/execute", handle.base_url()))
            .json(&SandboxExecuteRequest { code: "print(x+1)" })
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let body: ExecuteResponse = resp.json().await.unwrap();
        assert_eq!(body, ExecuteResponse { result_text: Some("101\n".to_string()), result_base64: None });
    }

    #[tokio::test]
    async fn syntax_error_on_bare_assignment_answers_400() {
        let driver = InProcessSandboxDriver::new();
        let handle = driver.create(&unused_spec()).await.expect("create");

        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{}/execute", handle.base_url()))
            .json(&SandboxExecuteRequest { code: "x =" })
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: SandboxErrorBody = resp.json().await.unwrap();
        assert!(body.detail.contains("SyntaxError"));
    }

    #[tokio::test]
    async fn sleep_marker_answers_408() {
        let driver = InProcessSandboxDriver::new();
        let handle = driver.create(&unused_spec()).await.expect("create");

        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{}/execute", handle.base_url()))
            .json(&SandboxExecuteRequest { code: "sleep()" })
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::REQUEST_TIMEOUT);
    }
}
