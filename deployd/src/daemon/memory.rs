//! In-process container runtime
//!
//! Keeps a container and image inventory in memory and mimics the parts of
//! Docker Engine behaviour the deployment core depends on: building a tag
//! moves it to a fresh image and leaves the previous one dangling, containers
//! keep pointing at their image by digest once their tag has moved, and
//! force-removal kills running containers. Every mutating call is recorded so
//! callers can assert on ordering.

use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;

use crate::daemon::{
    BuildOptions, BuildStream, ContainerRecord, ContainerRuntime, ContainerSpec, ContainerState,
    ImageRecord, RuntimeError,
};

/// Sentinel repo:tag the daemon reports for untagged images
pub const UNTAGGED: &str = "<none>:<none>";

#[derive(Debug, Clone)]
struct StoredContainer {
    id: String,
    name: String,
    image_ref: String,
    image_id: String,
    state: ContainerState,
    spec: Option<ContainerSpec>,
}

#[derive(Debug, Clone)]
struct StoredImage {
    id: String,
    tags: Vec<String>,
    digests: Vec<String>,
}

/// Failure injection knobs
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Reject the build request itself
    pub build_transport: Option<String>,

    /// Emit an error record in the build stream instead of producing an image
    pub build_error_record: Option<String>,

    /// Fail every container start
    pub start: Option<String>,

    /// Fail every container inspection with a non-404 error
    pub inspect: Option<String>,

    /// Fail inventory listings
    pub list: Option<String>,
}

#[derive(Debug, Default)]
struct Inventory {
    containers: Vec<StoredContainer>,
    images: Vec<StoredImage>,
    next_id: u64,
    calls: Vec<String>,
    faults: Faults,
}

impl Inventory {
    fn next_hex_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:064x}", self.next_id)
    }

    fn image_for_ref(&self, reference: &str) -> Option<&StoredImage> {
        let tagged = if reference.contains(':') {
            reference.to_string()
        } else {
            format!("{}:latest", reference)
        };
        self.images
            .iter()
            .find(|i| i.tags.contains(&tagged) || i.id == reference)
    }

    fn record(&self, c: &StoredContainer) -> ContainerRecord {
        let tag_still_points_here = self
            .image_for_ref(&c.image_ref)
            .map(|i| i.id == c.image_id)
            .unwrap_or(false);
        ContainerRecord {
            id: c.id.clone(),
            name: c.name.clone(),
            image: if tag_still_points_here {
                c.image_ref.clone()
            } else {
                c.image_id.clone()
            },
            image_id: c.image_id.clone(),
            state: c.state.clone(),
        }
    }

    /// Resolve a name, a full id or an unambiguous id prefix, in that order
    fn find_container(&self, name_or_id: &str) -> Option<usize> {
        if let Some(idx) = self.find_by_name(name_or_id) {
            return Some(idx);
        }
        if let Some(idx) = self.containers.iter().position(|c| c.id == name_or_id) {
            return Some(idx);
        }
        if name_or_id.is_empty() {
            return None;
        }
        let mut matches = self
            .containers
            .iter()
            .enumerate()
            .filter(|(_, c)| c.id.starts_with(name_or_id))
            .map(|(idx, _)| idx);
        match (matches.next(), matches.next()) {
            (Some(idx), None) => Some(idx),
            _ => None,
        }
    }

    fn find_by_name(&self, name: &str) -> Option<usize> {
        self.containers.iter().position(|c| c.name == name)
    }
}

/// Container runtime that never leaves the process
#[derive(Debug, Default)]
pub struct InMemoryRuntime {
    inner: Mutex<Inventory>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the active failure injection
    pub async fn set_faults(&self, faults: Faults) {
        self.inner.lock().await.faults = faults;
    }

    /// Add an image to the inventory and return its id
    pub async fn add_image(&self, tags: &[&str]) -> String {
        self.add_image_with_digests(tags, &[]).await
    }

    /// Add an image carrying repository digests, as a pull by digest leaves it
    pub async fn add_image_with_digests(&self, tags: &[&str], digests: &[&str]) -> String {
        let mut inv = self.inner.lock().await;
        let id = format!("sha256:{}", inv.next_hex_id());
        for tag in tags {
            for image in inv.images.iter_mut() {
                image.tags.retain(|t| t != tag);
            }
        }
        inv.images.push(StoredImage {
            id: id.clone(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            digests: digests.iter().map(|d| d.to_string()).collect(),
        });
        id
    }

    /// Add a container created from `image_ref` in the given state
    pub async fn add_container(
        &self,
        name: &str,
        image_ref: &str,
        state: ContainerState,
    ) -> Result<String, RuntimeError> {
        let mut inv = self.inner.lock().await;
        let image_id = inv
            .image_for_ref(image_ref)
            .map(|i| i.id.clone())
            .ok_or_else(|| RuntimeError::NotFound(format!("No such image: {}", image_ref)))?;
        let id = inv.next_hex_id();
        inv.containers.push(StoredContainer {
            id: id.clone(),
            name: name.to_string(),
            image_ref: image_ref.to_string(),
            image_id,
            state,
            spec: None,
        });
        Ok(id)
    }

    /// Force a container into another state, e.g. to simulate it exiting
    pub async fn set_container_state(&self, name_or_id: &str, state: ContainerState) -> bool {
        let mut inv = self.inner.lock().await;
        match inv.find_container(name_or_id) {
            Some(idx) => {
                inv.containers[idx].state = state;
                true
            }
            None => false,
        }
    }

    pub async fn containers(&self) -> Vec<ContainerRecord> {
        let inv = self.inner.lock().await;
        inv.containers.iter().map(|c| inv.record(c)).collect()
    }

    pub async fn images(&self) -> Vec<ImageRecord> {
        let inv = self.inner.lock().await;
        inv.images.iter().map(image_record).collect()
    }

    /// The `ContainerSpec` a container was created with, if it went through `create_container`
    pub async fn container_spec(&self, name: &str) -> Option<ContainerSpec> {
        let inv = self.inner.lock().await;
        inv.find_container(name)
            .and_then(|idx| inv.containers[idx].spec.clone())
    }

    /// Mutating calls in the order they were made, as `operation:target`
    pub async fn calls(&self) -> Vec<String> {
        self.inner.lock().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.inner.lock().await.calls.clear();
    }
}

fn image_record(image: &StoredImage) -> ImageRecord {
    ImageRecord {
        id: image.id.clone(),
        repo_tags: if image.tags.is_empty() {
            vec![UNTAGGED.to_string()]
        } else {
            image.tags.clone()
        },
        repo_digests: image.digests.clone(),
    }
}

fn progress_line(value: serde_json::Value) -> Result<Bytes, RuntimeError> {
    let mut line = serde_json::to_vec(&value).map_err(|e| RuntimeError::Stream(e.to_string()))?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

fn context_contains(context: &[u8], file_name: &str) -> bool {
    let mut archive = tar::Archive::new(Cursor::new(context));
    let entries = match archive.entries() {
        Ok(entries) => entries,
        Err(_) => return false,
    };
    entries.filter_map(Result::ok).any(|entry| {
        entry
            .path()
            .map(|p| p.to_string_lossy().trim_start_matches("./") == file_name)
            .unwrap_or(false)
    })
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn build_image(
        &self,
        context: Bytes,
        options: BuildOptions,
    ) -> Result<BuildStream, RuntimeError> {
        let mut inv = self.inner.lock().await;
        inv.calls.push(format!("build_image:{}", options.tag));

        if let Some(message) = inv.faults.build_transport.clone() {
            return Err(RuntimeError::Api(message));
        }
        if !context_contains(&context, &options.dockerfile) {
            return Err(RuntimeError::Api(format!(
                "Cannot locate specified Dockerfile: {}",
                options.dockerfile
            )));
        }

        let mut lines = vec![progress_line(serde_json::json!({
            "stream": "Step 1/1 : FROM scratch\n",
        }))];

        if let Some(message) = inv.faults.build_error_record.clone() {
            lines.push(progress_line(serde_json::json!({
                "error": message,
                "errorDetail": { "message": message },
            })));
            return Ok(stream::iter(lines).boxed());
        }

        let tag = if options.tag.contains(':') {
            options.tag.clone()
        } else {
            format!("{}:latest", options.tag)
        };
        let id = format!("sha256:{}", inv.next_hex_id());
        for image in inv.images.iter_mut() {
            image.tags.retain(|t| t != &tag);
        }
        inv.images.push(StoredImage {
            id: id.clone(),
            tags: vec![tag.clone()],
            digests: Vec::new(),
        });

        lines.push(progress_line(serde_json::json!({ "aux": { "ID": id } })));
        lines.push(progress_line(serde_json::json!({
            "stream": format!("Successfully tagged {}\n", tag),
        })));

        Ok(stream::iter(lines).boxed())
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerRecord, RuntimeError> {
        let inv = self.inner.lock().await;
        if let Some(message) = inv.faults.inspect.clone() {
            return Err(RuntimeError::Api(message));
        }
        inv.find_container(name)
            .map(|idx| inv.record(&inv.containers[idx]))
            .ok_or_else(|| RuntimeError::NotFound(format!("No such container: {}", name)))
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let mut inv = self.inner.lock().await;
        inv.calls.push(format!("remove_container:{}", id));
        let idx = inv
            .find_container(id)
            .ok_or_else(|| RuntimeError::NotFound(format!("No such container: {}", id)))?;
        if inv.containers[idx].state == ContainerState::Running && !force {
            return Err(RuntimeError::Api(format!(
                "You cannot remove a running container {}",
                id
            )));
        }
        inv.containers.remove(idx);
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut inv = self.inner.lock().await;
        inv.calls.push(format!("create_container:{}", spec.name));
        if inv.find_by_name(&spec.name).is_some() {
            return Err(RuntimeError::Api(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        let image_id = inv
            .image_for_ref(&spec.image)
            .map(|i| i.id.clone())
            .ok_or_else(|| RuntimeError::NotFound(format!("No such image: {}", spec.image)))?;
        let id = inv.next_hex_id();
        inv.containers.push(StoredContainer {
            id: id.clone(),
            name: spec.name.clone(),
            image_ref: spec.image.clone(),
            image_id,
            state: ContainerState::Created,
            spec: Some(spec.clone()),
        });
        Ok(id)
    }

    async fn start_container(&self, name: &str) -> Result<(), RuntimeError> {
        let mut inv = self.inner.lock().await;
        inv.calls.push(format!("start_container:{}", name));
        if let Some(message) = inv.faults.start.clone() {
            return Err(RuntimeError::Api(message));
        }
        let idx = inv
            .find_container(name)
            .ok_or_else(|| RuntimeError::NotFound(format!("No such container: {}", name)))?;
        inv.containers[idx].state = ContainerState::Running;
        Ok(())
    }

    async fn list_containers(
        &self,
        states: &[ContainerState],
    ) -> Result<Vec<ContainerRecord>, RuntimeError> {
        let inv = self.inner.lock().await;
        if let Some(message) = inv.faults.list.clone() {
            return Err(RuntimeError::Api(message));
        }
        Ok(inv
            .containers
            .iter()
            .filter(|c| states.contains(&c.state))
            .map(|c| inv.record(c))
            .collect())
    }

    async fn list_images(&self) -> Result<Vec<ImageRecord>, RuntimeError> {
        let inv = self.inner.lock().await;
        if let Some(message) = inv.faults.list.clone() {
            return Err(RuntimeError::Api(message));
        }
        Ok(inv.images.iter().map(image_record).collect())
    }

    async fn remove_image(
        &self,
        id: &str,
        force: bool,
        _prune_children: bool,
    ) -> Result<(), RuntimeError> {
        let mut inv = self.inner.lock().await;
        inv.calls.push(format!("remove_image:{}", id));
        let idx = inv
            .images
            .iter()
            .position(|i| i.id == id)
            .ok_or_else(|| RuntimeError::NotFound(format!("No such image: {}", id)))?;
        let users: Vec<&StoredContainer> =
            inv.containers.iter().filter(|c| c.image_id == id).collect();
        if users.iter().any(|c| c.state == ContainerState::Running) {
            return Err(RuntimeError::Api(format!(
                "conflict: unable to delete {} (cannot be forced) - image is being used by running container",
                id
            )));
        }
        if !users.is_empty() && !force {
            return Err(RuntimeError::Api(format!(
                "conflict: unable to delete {} - image is being used by a container",
                id
            )));
        }
        inv.images.remove(idx);
        Ok(())
    }
}
