//! Container runtime capability
//!
//! Everything the image builder, the lifecycle manager and the garbage
//! collector need from the container daemon, independent of any SDK.
//! [`docker::DockerRuntime`] talks to a real Docker Engine and
//! [`memory::InMemoryRuntime`] keeps the whole inventory in process.

pub mod docker;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a container runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("No such object: {0}")]
    NotFound(String),

    #[error("Daemon API error: {0}")]
    Api(String),

    #[error("Build stream error: {0}")]
    Stream(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

/// Raw newline-delimited JSON progress records streamed back by a build
pub type BuildStream = BoxStream<'static, Result<Bytes, RuntimeError>>;

/// Image build request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Build descriptor file name, relative to the context root
    pub dockerfile: String,

    /// Target tag
    pub tag: String,
}

/// Container lifecycle state as reported by the daemon
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Removing => "removing",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
        }
    }
}

impl std::str::FromStr for ContainerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" => Ok(ContainerState::Created),
            "running" => Ok(ContainerState::Running),
            "paused" => Ok(ContainerState::Paused),
            "restarting" => Ok(ContainerState::Restarting),
            "removing" => Ok(ContainerState::Removing),
            "exited" => Ok(ContainerState::Exited),
            "dead" => Ok(ContainerState::Dead),
            _ => Err(format!("Unknown container state: {}", s)),
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Daemon-owned container entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,

    /// Name without the leading slash
    pub name: String,

    /// Image reference the container was created from; a `sha256:` digest
    /// once the tag it was created from has moved to a newer build
    pub image: String,

    /// Resolved image id
    pub image_id: String,

    pub state: ContainerState,
}

/// Image inventory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: String,
    pub repo_tags: Vec<String>,

    /// `name@sha256:...` references; images pulled by digest carry these
    /// without any tag
    pub repo_digests: Vec<String>,
}

/// Published port of a container, e.g. `3002/tcp`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExposedPort {
    pub port: u16,
    pub protocol: String,
}

impl fmt::Display for ExposedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

/// Host side of a port binding
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostBinding {
    /// Empty binds every interface
    pub host_ip: String,

    /// Empty lets the daemon pick a port
    pub host_port: String,
}

/// Everything needed to create a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub exposed_ports: Vec<ExposedPort>,
    pub port_bindings: BTreeMap<ExposedPort, Vec<HostBinding>>,
}

/// The operations the deployment core requires from a container daemon
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Submit a tar build context and stream back the progress records
    async fn build_image(
        &self,
        context: Bytes,
        options: BuildOptions,
    ) -> Result<BuildStream, RuntimeError>;

    /// Look up a container by name or id
    async fn inspect_container(&self, name: &str) -> Result<ContainerRecord, RuntimeError>;

    /// Remove a container, killing it first when `force` is set
    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError>;

    /// Create a container and return its id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, name: &str) -> Result<(), RuntimeError>;

    /// List containers whose state is one of `states`
    async fn list_containers(
        &self,
        states: &[ContainerState],
    ) -> Result<Vec<ContainerRecord>, RuntimeError>;

    async fn list_images(&self) -> Result<Vec<ImageRecord>, RuntimeError>;

    async fn remove_image(
        &self,
        id: &str,
        force: bool,
        prune_children: bool,
    ) -> Result<(), RuntimeError>;
}
