//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::daemon::docker::DockerRuntime;
use crate::daemon::ContainerRuntime;
use crate::deploy::orchestrator::{Collaborators, Orchestrator};
use crate::errors::DeployError;
use crate::source::dotenv::DotenvProvisioner;
use crate::source::git::GitSourceSync;
use crate::source::registry::EnvRegistry;

/// Main application state
pub struct AppState {
    /// Container runtime shared by every component
    pub runtime: Arc<dyn ContainerRuntime>,

    /// Deployment orchestrator
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Initialize application state against the local Docker Engine
    pub fn init(options: &AppOptions) -> Result<Self, DeployError> {
        info!("Initializing application state...");

        let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::connect()?);

        let collaborators = Collaborators {
            registry: Arc::new(EnvRegistry::new()),
            source: Arc::new(GitSourceSync::new(options.ssh_key_path.clone())),
            env: Arc::new(DotenvProvisioner::new(options.env_files_dir.clone())),
        };

        Ok(Self::new(runtime, collaborators, options))
    }

    /// Build state around an existing runtime and collaborators
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        collaborators: Collaborators,
        options: &AppOptions,
    ) -> Self {
        let orchestrator = Arc::new(Orchestrator::new(
            runtime.clone(),
            collaborators,
            options.orchestrator.clone(),
        ));

        Self {
            runtime,
            orchestrator,
        }
    }
}
