//! Git source sync

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::source::SourceSync;

/// Clones with the `git` binary, optionally through a dedicated SSH key
#[derive(Debug, Clone, Default)]
pub struct GitSourceSync {
    ssh_key_path: Option<PathBuf>,
}

impl GitSourceSync {
    pub fn new(ssh_key_path: Option<PathBuf>) -> Self {
        Self { ssh_key_path }
    }

    fn ssh_command(&self) -> Option<String> {
        self.ssh_key_path
            .as_ref()
            .map(|key| format!("ssh -i {} -o IdentitiesOnly=yes", key.display()))
    }
}

#[async_trait]
impl SourceSync for GitSourceSync {
    async fn remove_checkout(&self, path: &Path) -> Result<(), DeployError> {
        match fs::remove_dir_all(path).await {
            Ok(()) => {
                debug!("Removed checkout {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeployError::Cloning(format!(
                "failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn clone_repository(&self, url: &str, path: &Path) -> Result<(), DeployError> {
        info!("Cloning {} into {}", url, path.display());

        let mut command = Command::new("git");
        command
            .arg("clone")
            .arg("--")
            .arg(url)
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .env("GIT_TERMINAL_PROMPT", "0");
        if let Some(ssh) = self.ssh_command() {
            command.env("GIT_SSH_COMMAND", ssh);
        }

        let output = command
            .output()
            .await
            .map_err(|e| DeployError::Cloning(format!("Failed to run git clone: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DeployError::Cloning(format!(
                "Git clone failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        debug!("Cloned {}", url);
        Ok(())
    }
}
