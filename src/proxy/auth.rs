//! `X-Auth-Token` middleware: constant-time comparison against the
//! configured token, applied to every route except `/health`.

use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;

use crate::error::GatewayError;

#[derive(Clone)]
pub struct AuthState {
    pub token: String,
}

pub async fn auth_middleware(
    State(auth): State<AuthState>,
    request: Request,
    next: axum::middleware::Next,
) -> Response {
    if let Some(header) = request.headers().get("x-auth-token")
        && let Ok(value) = header.to_str()
        && bool::from(value.as_bytes().ct_eq(auth.token.as_bytes()))
    {
        return next.run(request).await;
    }
    GatewayError::AuthInvalid.into_response()
}
