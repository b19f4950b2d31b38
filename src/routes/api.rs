use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{api, token};
use crate::state::AppState;
use std::sync::Arc;

/// Create the API router
///
/// CORS and security headers are layered on in main.rs.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route(
            "/auth/token",
            post(token::issue_token)
                .options(token::preflight)
                .fallback(token::method_not_allowed),
        )
        .layer(TraceLayer::new_for_http())
}
