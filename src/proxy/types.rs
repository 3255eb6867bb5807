//! Request/response DTOs for the gateway's external HTTP surface and
//! for the internal contract the gateway speaks to each sandbox.
//!
//! The external shapes here are fixed wire contract: field names like
//! `user_uuid`, `result_text`, `result_base64`, and `status`/`detail` are
//! part of the gateway's public API, independent of whatever internal
//! representation ([`ExecutionOutcome`]) the Execution Channel uses.

use serde::{Deserialize, Serialize};

use crate::execution::ExecutionOutcome;
use crate::pool::PoolSnapshot;

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub user_uuid: String,
    pub code: String,
}

/// `{"result_text": string|null, "result_base64": string|null}`, mutually
/// exclusive per the Execution Channel's result precedence.
///
/// This is also the exact shape a sandbox agent's `/execute` returns on a
/// 2xx response (§4.5: "on a 2xx result, returns it verbatim") — the
/// gateway deserializes a sandbox's success body directly into this type
/// rather than re-encoding it.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecuteResponse {
    pub result_text: Option<String>,
    pub result_base64: Option<String>,
}

impl From<ExecutionOutcome> for ExecuteResponse {
    fn from(outcome: ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Image { base64_data, .. } => {
                Self { result_text: None, result_base64: Some(base64_data) }
            }
            ExecutionOutcome::Text { text } => Self { result_text: Some(text), result_base64: None },
            ExecutionOutcome::Empty => Self { result_text: None, result_base64: None },
            // The caller is expected to short-circuit `Error` into a
            // `GatewayError::UserCodeError` before converting; this arm only
            // exists so the `From` impl is total.
            ExecutionOutcome::Error { message } => Self { result_text: Some(message), result_base64: None },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub user_uuid: String,
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub status: &'static str,
    pub detail: String,
}

pub type StatusResponse = PoolSnapshot;

/// Body the gateway posts to a sandbox agent's `/execute` endpoint.
#[derive(Debug, Serialize)]
pub struct SandboxExecuteRequest<'a> {
    pub code: &'a str,
}

/// Body a sandbox agent returns on a non-2xx `/execute` response: a 4xx for
/// a user-code error or user-code timeout, a 5xx for an internal failure.
/// The gateway distinguishes a timeout from a generic user-code error by
/// status code (`408 Request Timeout` vs. `400 Bad Request`) rather than by
/// sniffing this `detail` string.
#[derive(Debug, Serialize, Deserialize)]
pub struct SandboxErrorBody {
    pub detail: String,
}
