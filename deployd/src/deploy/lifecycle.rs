//! Container lifecycle manager

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::daemon::{ContainerRuntime, ContainerSpec};
use crate::deploy::identity::AppId;
use crate::deploy::ports::PortSpec;
use crate::errors::DeployError;

/// Where the replace cycle of one app currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerPhase {
    NoContainer,
    Removed,
    Created,
    Running,
}

/// Result of a successful replace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceOutcome {
    /// Id of the container that was removed, if there was one
    pub previous: Option<String>,

    /// Id of the new, running container
    pub container_id: String,

    /// Phases walked through, in order
    pub phases: Vec<ContainerPhase>,
}

/// Removes, recreates and starts the container of an app
pub struct ContainerLifecycleManager {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerLifecycleManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Replace the container named after `app_id` with a fresh one from
    /// `<app_id>:latest` bound to `ports`.
    ///
    /// Failing to inspect or remove the old container never blocks the new
    /// one; only a failed create or start is reported. A container that was
    /// created but failed to start is left in place for the next pass.
    pub async fn replace(
        &self,
        app_id: &AppId,
        ports: &PortSpec,
    ) -> Result<ReplaceOutcome, DeployError> {
        let name = app_id.as_str();
        let mut phases = vec![ContainerPhase::NoContainer];

        let previous = self.remove_existing(name).await;
        if previous.is_some() {
            phases.push(ContainerPhase::Removed);
        }

        let spec = ContainerSpec {
            name: name.to_string(),
            image: app_id.image_ref(),
            exposed_ports: ports.exposed_ports(),
            port_bindings: ports.port_bindings(),
        };

        let container_id = self.runtime.create_container(&spec).await.map_err(|e| {
            DeployError::LifecycleFailed(format!("failed to create container {}: {}", name, e))
        })?;
        phases.push(ContainerPhase::Created);
        debug!("Created container {} ({})", name, container_id);

        self.runtime.start_container(name).await.map_err(|e| {
            DeployError::LifecycleFailed(format!("failed to start container {}: {}", name, e))
        })?;
        phases.push(ContainerPhase::Running);

        info!("Container {} running with ports {}", name, ports);
        Ok(ReplaceOutcome {
            previous,
            container_id,
            phases,
        })
    }

    async fn remove_existing(&self, name: &str) -> Option<String> {
        let existing = match self.runtime.inspect_container(name).await {
            Ok(existing) => existing,
            Err(e) if e.is_not_found() => {
                debug!("No existing container named {}", name);
                return None;
            }
            Err(e) => {
                warn!("Failed to inspect container {}, assuming none: {}", name, e);
                return None;
            }
        };

        // The daemon also resolves id prefixes, so a lookup by name can land on
        // an unrelated container whose id happens to start with it
        if existing.name != name {
            debug!(
                "Lookup of {} resolved to container {} ({}), leaving it alone",
                name, existing.name, existing.id
            );
            return None;
        }

        match self.runtime.remove_container(&existing.id, true).await {
            Ok(()) => {
                info!("Removed previous container {} ({})", name, existing.id);
                Some(existing.id)
            }
            Err(e) if e.is_not_found() => {
                debug!("Container {} disappeared before removal", name);
                Some(existing.id)
            }
            Err(e) => {
                warn!("Failed to remove previous container {}: {}", name, e);
                None
            }
        }
    }
}
