//! Docker Engine runtime

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{BuildImageOptions, ListImagesOptions, RemoveImageOptions};
use bollard::models::{BuildInfo, HostConfig, PortBinding};
use bollard::Docker;
use bytes::Bytes;
use futures::{stream, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::daemon::{
    BuildOptions, BuildStream, ContainerRecord, ContainerRuntime, ContainerSpec, ContainerState,
    ImageRecord, RuntimeError,
};

const BUILD_CHANNEL_CAPACITY: usize = 64;

/// Runtime backed by the local Docker Engine API
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the platform defaults (unix socket or named pipe)
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults().map_err(map_error)?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

fn map_error(err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        other => RuntimeError::Api(other.to_string()),
    }
}

fn parse_state(state: Option<&str>) -> ContainerState {
    state
        .and_then(|s| s.parse().ok())
        .unwrap_or(ContainerState::Dead)
}

/// Re-encode one build progress record as an NDJSON line in the daemon's
/// wire shape (`stream`, `status`, `id`, `error`, `errorDetail`, `aux`)
fn encode_build_info(info: &BuildInfo) -> Result<Bytes, RuntimeError> {
    let mut record = Map::new();
    let text_fields = [
        ("id", &info.id),
        ("stream", &info.stream),
        ("status", &info.status),
        ("progress", &info.progress),
        ("error", &info.error),
    ];
    for (key, value) in text_fields {
        if let Some(value) = value {
            record.insert(key.to_string(), Value::String(value.clone()));
        }
    }
    if let Some(detail) = &info.error_detail {
        let mut detail_record = Map::new();
        if let Some(code) = detail.code {
            detail_record.insert("code".to_string(), Value::from(code));
        }
        detail_record.insert(
            "message".to_string(),
            Value::String(detail.message.clone().unwrap_or_default()),
        );
        record.insert("errorDetail".to_string(), Value::Object(detail_record));
    }
    if let Some(image_id) = info.aux.as_ref().and_then(|aux| aux.id.clone()) {
        let mut aux = Map::new();
        aux.insert("ID".to_string(), Value::String(image_id));
        record.insert("aux".to_string(), Value::Object(aux));
    }

    let mut line = serde_json::to_vec(&Value::Object(record))
        .map_err(|e| RuntimeError::Stream(e.to_string()))?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn build_image(
        &self,
        context: Bytes,
        options: BuildOptions,
    ) -> Result<BuildStream, RuntimeError> {
        debug!("Submitting build context for {} ({} bytes)", options.tag, context.len());

        let build_options = BuildImageOptions {
            dockerfile: options.dockerfile,
            t: options.tag,
            rm: true,
            ..Default::default()
        };

        // The build stream borrows the client, so it is driven from its own
        // task and handed over through a channel
        let docker = self.docker.clone();
        let (tx, rx) = mpsc::channel::<Result<Bytes, RuntimeError>>(BUILD_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut records = docker.build_image(build_options, None, Some(context));
            while let Some(item) = records.next().await {
                let line = match item {
                    Ok(info) => encode_build_info(&info),
                    Err(e) => Err(RuntimeError::Stream(e.to_string())),
                };
                if tx.send(line).await.is_err() {
                    debug!("Build output receiver dropped, abandoning stream");
                    break;
                }
            }
        });

        let records = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(records.boxed())
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerRecord, RuntimeError> {
        let info = self
            .docker
            .inspect_container(name, None)
            .await
            .map_err(map_error)?;

        let state = info
            .state
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .map(|status| status.to_string());

        Ok(ContainerRecord {
            id: info.id.unwrap_or_default(),
            name: info
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            image: info
                .config
                .and_then(|c| c.image)
                .unwrap_or_default(),
            image_id: info.image.unwrap_or_default(),
            state: parse_state(state.as_deref()),
        })
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        debug!("Removing container {} (force: {})", id, force);
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(map_error)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        debug!("Creating container {} from {}", spec.name, spec.image);

        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .exposed_ports
            .iter()
            .map(|port| (port.to_string(), HashMap::new()))
            .collect();

        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
            .port_bindings
            .iter()
            .map(|(port, bindings)| {
                let bindings = bindings
                    .iter()
                    .map(|b| PortBinding {
                        host_ip: Some(b.host_ip.clone()),
                        host_port: Some(b.host_port.clone()),
                    })
                    .collect();
                (port.to_string(), Some(bindings))
            })
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(map_error)?;

        for warning in &response.warnings {
            debug!("Daemon warning for {}: {}", spec.name, warning);
        }

        Ok(response.id)
    }

    async fn start_container(&self, name: &str) -> Result<(), RuntimeError> {
        debug!("Starting container {}", name);
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_error)
    }

    async fn list_containers(
        &self,
        states: &[ContainerState],
    ) -> Result<Vec<ContainerRecord>, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert(
            "status".to_string(),
            states.iter().map(|s| s.as_str().to_string()).collect::<Vec<_>>(),
        );

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(map_error)?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerRecord {
                id: c.id.unwrap_or_default(),
                name: c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .unwrap_or_default()
                    .trim_start_matches('/')
                    .to_string(),
                image: c.image.unwrap_or_default(),
                image_id: c.image_id.unwrap_or_default(),
                state: parse_state(c.state.as_deref()),
            })
            .collect())
    }

    async fn list_images(&self) -> Result<Vec<ImageRecord>, RuntimeError> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(map_error)?;

        Ok(images
            .into_iter()
            .map(|i| ImageRecord {
                id: i.id,
                repo_tags: i.repo_tags,
                repo_digests: i.repo_digests,
            })
            .collect())
    }

    async fn remove_image(
        &self,
        id: &str,
        force: bool,
        prune_children: bool,
    ) -> Result<(), RuntimeError> {
        debug!("Removing image {} (force: {}, prune: {})", id, force, prune_children);
        self.docker
            .remove_image(
                id,
                Some(RemoveImageOptions {
                    force,
                    noprune: !prune_children,
                }),
                None,
            )
            .await
            .map(|_| ())
            .map_err(map_error)
    }
}
