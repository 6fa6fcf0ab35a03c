//! Environment file provisioning

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::deploy::identity::AppId;
use crate::errors::DeployError;
use crate::source::EnvProvisioner;

/// Copies `<env_dir>/.<appid>.env` to `<checkout>/.env`
#[derive(Debug, Clone)]
pub struct DotenvProvisioner {
    env_dir: PathBuf,
}

impl DotenvProvisioner {
    pub fn new(env_dir: impl Into<PathBuf>) -> Self {
        Self {
            env_dir: env_dir.into(),
        }
    }

    pub fn env_file(&self, app_id: &AppId) -> PathBuf {
        self.env_dir.join(format!(".{}.env", app_id))
    }
}

#[async_trait]
impl EnvProvisioner for DotenvProvisioner {
    async fn copy_env_file(&self, target_dir: &Path, app_id: &AppId) -> Result<(), DeployError> {
        let source = self.env_file(app_id);
        let meta = fs::metadata(&source).await.map_err(|e| {
            DeployError::PreconditionFailed(format!("{}: {}", source.display(), e))
        })?;
        if meta.is_dir() {
            return Err(DeployError::PreconditionFailed(format!(
                "{} is a directory",
                source.display()
            )));
        }
        if !meta.is_file() {
            return Err(DeployError::PreconditionFailed(format!(
                "{} is not a regular file",
                source.display()
            )));
        }

        let target = target_dir.join(".env");
        fs::copy(&source, &target).await?;
        debug!("Copied {} to {}", source.display(), target.display());
        Ok(())
    }
}
