//! HTTP request handlers

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::DeployError;
use crate::server::state::ServerState;
use crate::utils::version_info;

pub const BANNER: &str = "Deployment Server working";

/// Error body of every failed request
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(rename = "errorType", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl IntoResponse for DeployError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
            error_type: self.error_type().map(str::to_string),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// Banner handler
pub async fn root_handler() -> &'static str {
    BANNER
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "deployd".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

#[derive(Debug, Deserialize)]
pub struct DeployQuery {
    pub ports: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeployResponse {
    pub message: String,
    pub warnings: BTreeMap<String, String>,
}

/// Deploy handler
///
/// Answers as soon as the build is scheduled. The build and container swap
/// keep running after the response is sent. The scheduling itself runs on its
/// own task so a client hanging up mid-clone cannot cancel it halfway.
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Path(app_id): Path<String>,
    Query(query): Query<DeployQuery>,
) -> Result<Json<DeployResponse>, DeployError> {
    let ports = query.ports.filter(|p| !p.trim().is_empty());
    let orchestrator = state.orchestrator.clone();
    let scheduled = tokio::spawn(async move { orchestrator.deploy(&app_id, ports.as_deref()).await })
        .await
        .map_err(|e| DeployError::ServerError(format!("deployment task failed: {}", e)))??;

    info!(
        "Scheduled build of {}, logging to {}",
        scheduled.app_id,
        scheduled.log_file.display()
    );

    Ok(Json(DeployResponse {
        message: "Deployment successful".to_string(),
        warnings: scheduled.warnings,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanResponse {
    pub message: String,
    pub containers_removed: usize,
    pub images_removed: usize,
    pub failures: usize,
}

/// Manual garbage collection handler
pub async fn clean_handler(State(state): State<Arc<ServerState>>) -> Json<CleanResponse> {
    let report = state.orchestrator.collect().await;
    Json(CleanResponse {
        message: "Cleaned".to_string(),
        containers_removed: report.containers_removed.len(),
        images_removed: report.images_removed.len(),
        failures: report.failures.len(),
    })
}

/// Deployment status handler
pub async fn status_handler(
    State(state): State<Arc<ServerState>>,
    Path(app_id): Path<String>,
) -> Result<Response, DeployError> {
    match state.orchestrator.status(&app_id).await? {
        Some(status) => Ok(Json(status).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("No deployment of {} since startup", app_id),
                error_type: None,
            }),
        )
            .into_response()),
    }
}
