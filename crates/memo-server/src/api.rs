//! HTTP handlers wrapping the action router.
//!
//! Responses use a GraphQL-style envelope: `{"data": ...}` on success and
//! `{"errors": [{"message": ...}]}` on failure, so clients can match the
//! `Unauthorized` message regardless of transport.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use memo_core::{Headers, Invocation, MemoError, Payload, ServerConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AppState;

/// Name of the request header carrying the session token.
pub const TOKEN_HEADER: &str = "token";

/// Where each invocation gets its server configuration from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Re-read the process environment for every invocation
    Environment,
    /// Use a fixed configuration
    Fixed(ServerConfig),
}

impl ConfigSource {
    pub fn resolve(&self) -> ServerConfig {
        match self {
            ConfigSource::Environment => ServerConfig::from_env(),
            ConfigSource::Fixed(config) => config.clone(),
        }
    }
}

/// Successful response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct DataEnvelope {
    pub data: Value,
}

/// Error response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub errors: Vec<ErrorMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

/// Router error rendered as an HTTP response.
pub struct ApiError(pub MemoError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            MemoError::Unauthorized => StatusCode::UNAUTHORIZED,
            e if e.is_validation() => StatusCode::BAD_REQUEST,
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorEnvelope {
            errors: vec![ErrorMessage {
                message: self.0.to_string(),
            }],
        };
        (status, Json(body)).into_response()
    }
}

/// Collect request headers into the router's header map.
///
/// The `token` header becomes the session token; every other header that is
/// valid UTF-8 is kept for audit logging.
fn collect_headers(headers: &HeaderMap) -> Headers {
    let mut collected = Headers::default();

    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        if name.as_str() == TOKEN_HEADER {
            collected.token = Some(value.to_string());
        } else {
            collected
                .extra
                .insert(name.as_str().to_string(), Value::String(value.to_string()));
        }
    }

    collected
}

async fn run(state: &AppState, invocation: Invocation) -> Response {
    let config = state.config.resolve();
    match state.router.handle(&config, invocation).await {
        Ok(data) => (StatusCode::OK, Json(DataEnvelope { data })).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

/// Handler for `POST /api`: `{action, data}` body, token in the `token` header.
pub async fn action_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<Payload>,
) -> Response {
    let invocation = Invocation {
        payload,
        headers: collect_headers(&headers),
    };
    run(&state, invocation).await
}

/// Handler for `POST /invoke`: a raw `{payload, headers}` invocation event.
pub async fn invoke_handler(
    State(state): State<Arc<AppState>>,
    Json(invocation): Json<Invocation>,
) -> Response {
    run(&state, invocation).await
}

/// Handler for `GET /health`
pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
