//! API key gate for the `/manage` routes

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use secrecy::ExposeSecret;
use tracing::warn;

use crate::server::handlers::ErrorResponse;
use crate::server::state::ServerState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Reject requests whose `X-Api-Key` header does not match the configured key
pub async fn require_api_key(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|key| key == state.api_key.expose_secret());

    if authorized {
        return next.run(request).await;
    }

    warn!("Rejected {} {}: bad API key", request.method(), request.uri().path());
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: "API key is not valid".to_string(),
            error_type: None,
        }),
    )
        .into_response()
}
