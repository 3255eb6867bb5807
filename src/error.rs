//! Gateway-wide error taxonomy.
//!
//! Every variant maps to exactly one client-visible HTTP status and a fixed,
//! generic response body. Operator-facing detail (the `reason` fields) is
//! only ever emitted through `tracing::error!`, never serialized back to the
//! caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("auth token invalid or missing")]
    AuthInvalid,

    #[error("no capacity: {reason}")]
    NoCapacity { reason: String },

    #[error("pool is still initializing, no pre-warmed capacity yet")]
    Initializing,

    #[error("failed to create sandbox for session {session_id}: {reason}")]
    CreationFailed { session_id: String, reason: String },

    #[error("user code raised an error: {message}")]
    UserCodeError { message: String },

    #[error("user code exceeded the execution timeout")]
    UserCodeTimeout,

    #[error("transport failure talking to sandbox: {reason}")]
    TransportFailure { reason: String },

    #[error("internal error: {reason}")]
    InternalError { reason: String },
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::AuthInvalid => StatusCode::UNAUTHORIZED,
            GatewayError::NoCapacity { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Initializing => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::CreationFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UserCodeError { .. } => StatusCode::BAD_REQUEST,
            GatewayError::UserCodeTimeout => StatusCode::BAD_REQUEST,
            GatewayError::TransportFailure { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            GatewayError::AuthInvalid => "auth_invalid",
            GatewayError::NoCapacity { .. } => "no_capacity",
            GatewayError::Initializing => "initializing",
            GatewayError::CreationFailed { .. } => "creation_failed",
            GatewayError::UserCodeError { .. } => "user_code_error",
            GatewayError::UserCodeTimeout => "user_code_timeout",
            GatewayError::TransportFailure { .. } => "transport_failure",
            GatewayError::InternalError { .. } => "internal_error",
        }
    }

    /// Generic, client-safe message. Never includes `reason` fields.
    fn client_message(&self) -> String {
        match self {
            GatewayError::AuthInvalid => "invalid or missing auth token".to_string(),
            GatewayError::NoCapacity { .. } => "no worker capacity available, try again shortly".to_string(),
            GatewayError::Initializing => {
                "pool is still warming up, retry shortly".to_string()
            }
            GatewayError::CreationFailed { .. } => "failed to provision a sandbox".to_string(),
            GatewayError::UserCodeError { message } => message.clone(),
            GatewayError::UserCodeTimeout => "execution exceeded the time limit".to_string(),
            GatewayError::TransportFailure { .. } => "lost contact with the sandbox".to_string(),
            GatewayError::InternalError { .. } => "internal error".to_string(),
        }
    }

    /// Whether the session backing this error should be destroyed rather
    /// than preserved, per the gateway's destroy-on-everything-but-pure-user-error
    /// policy.
    pub fn destroys_session(&self) -> bool {
        !matches!(self, GatewayError::UserCodeError { .. })
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            GatewayError::InternalError { reason } => tracing::error!(reason, "internal error"),
            GatewayError::CreationFailed { session_id, reason } => {
                tracing::error!(session_id, reason, "sandbox creation failed")
            }
            GatewayError::TransportFailure { reason } => tracing::warn!(reason, "transport failure"),
            _ => tracing::debug!(error = %self, "request rejected"),
        }
        let body = ErrorBody {
            error: self.kind(),
            message: self.client_message(),
        };
        (status, axum::Json(body)).into_response()
    }
}
