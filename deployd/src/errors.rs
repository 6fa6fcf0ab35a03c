//! Error types for the deployment server

use axum::http::StatusCode;
use thiserror::Error;

use crate::daemon::RuntimeError;

/// Main error type for the deployment server
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Container runtime error: {0}")]
    RuntimeError(#[from] RuntimeError),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("appId is not valid: {0}")]
    InvalidAppId(String),

    #[error("appId is not valid: {0}")]
    UnknownApp(String),

    #[error("{0}")]
    Cloning(String),

    #[error("Invalid port spec: {0}")]
    InvalidPortSpec(String),

    #[error("Image build request failed: {0}")]
    BuildTransportFailed(String),

    #[error("Image build failed: {0}")]
    BuildFailed(String),

    #[error("Container lifecycle error: {0}")]
    LifecycleFailed(String),

    #[error("Build log unavailable: {0}")]
    LogSinkUnavailable(String),

    #[error("A deployment of {0} is already in progress")]
    DeploymentInProgress(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

impl DeployError {
    /// HTTP status class reported to the caller of the request boundary
    pub fn status_code(&self) -> StatusCode {
        match self {
            DeployError::InvalidAppId(_)
            | DeployError::UnknownApp(_)
            | DeployError::InvalidPortSpec(_)
            | DeployError::PreconditionFailed(_) => StatusCode::BAD_REQUEST,
            DeployError::DeploymentInProgress(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Coarse error tag surfaced alongside the message, when one is defined
    pub fn error_type(&self) -> Option<&'static str> {
        match self {
            DeployError::Cloning(_) => Some("Cloning"),
            _ => None,
        }
    }
}
