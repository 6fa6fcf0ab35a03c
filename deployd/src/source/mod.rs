//! Collaborators the orchestrator consumes: app configuration lookup,
//! source checkout sync and environment file provisioning.

pub mod dotenv;
pub mod git;
pub mod registry;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::deploy::identity::AppId;
use crate::errors::DeployError;

/// Where an app's source comes from and where it is checked out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSource {
    pub repository_path: PathBuf,
    pub repository_url: String,

    /// Port spec configured for the app, if any
    pub ports: Option<String>,
}

/// Resolves the source configuration of an app
pub trait AppRegistry: Send + Sync {
    /// `None` unless both the checkout path and the repository url are known
    fn resolve(&self, app_id: &AppId) -> Option<AppSource>;
}

/// Source checkout operations
#[async_trait]
pub trait SourceSync: Send + Sync {
    async fn remove_checkout(&self, path: &Path) -> Result<(), DeployError>;

    async fn clone_repository(&self, url: &str, path: &Path) -> Result<(), DeployError>;
}

/// Environment file provisioning
#[async_trait]
pub trait EnvProvisioner: Send + Sync {
    /// Copy the app's environment file into `target_dir`
    async fn copy_env_file(&self, target_dir: &Path, app_id: &AppId) -> Result<(), DeployError>;
}
