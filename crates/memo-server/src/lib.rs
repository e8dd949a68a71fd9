//! HTTP front for the memo-vault action handler.
//!
//! Provides:
//! - `POST /api`: `{action, data}` body with the session token in the `token` header
//! - `POST /invoke`: raw `{payload, headers}` invocation events
//! - `GET /health`

pub mod api;

use std::sync::Arc;

use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use api::ConfigSource;

/// Shared application state
pub struct AppState {
    pub router: memo_core::Router,
    pub config: ConfigSource,
}

/// Build the axum application.
pub fn app(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route("/api", post(api::action_handler))
        .route("/invoke", post(api::invoke_handler))
        .route("/health", get(api::health_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
