//! Request Proxy: the axum router and middleware stack fronting the pool.

pub mod auth;
pub mod handlers;
pub mod types;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

pub use handlers::AppState;

use auth::AuthState;

/// Builds the gateway's router. `/health` is unauthenticated (it is what
/// an external load balancer polls); every other route requires
/// `X-Auth-Token`. The per-request proxy timeout is enforced inside the
/// `/execute` handler itself — against the specific sandbox call it makes
/// — rather than as a blanket layer, since a layer-level timeout would race
/// the handler's own `UserCodeTimeout`/`TransportFailure` classification.
pub fn router(state: AppState, auth_token: String) -> Router {
    let auth_state = AuthState { token: auth_token };

    let protected = Router::new()
        .route("/execute", post(handlers::execute))
        .route("/release", post(handlers::release))
        .route("/status", get(handlers::status))
        .layer(middleware::from_fn_with_state(auth_state, auth::auth_middleware));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
