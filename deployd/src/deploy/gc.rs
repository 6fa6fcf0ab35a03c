//! Garbage collector for stale containers and dangling images
//!
//! A pass only ever targets `exited`/`created` containers whose image is an
//! anonymous digest and images without a tag, so it can run while a
//! deployment is in flight. Every error is recorded and swallowed.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::daemon::{ContainerRuntime, ContainerState, ImageRecord};

/// Repo:tag reported for images that lost their tag
pub const UNTAGGED_REPO_TAG: &str = "<none>:<none>";

/// Placeholder repository digest reported for images without one
pub const UNTAGGED_REPO_DIGEST: &str = "<none>@<none>";

/// Container states eligible for collection
pub const COLLECTABLE_STATES: [ContainerState; 2] = [ContainerState::Exited, ContainerState::Created];

/// Stage of a pass at which an error was swallowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStage {
    ListContainers,
    RemoveContainer,
    ListImages,
    RemoveImage,
}

/// An error swallowed during a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionFailure {
    pub stage: CollectionStage,
    pub target: Option<String>,
    pub message: String,
}

/// What one pass removed and which errors it swallowed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionReport {
    pub containers_removed: Vec<String>,
    pub images_removed: Vec<String>,
    pub failures: Vec<CollectionFailure>,
}

impl CollectionReport {
    /// Single sink for every swallowed error
    pub fn record_failure(
        &mut self,
        stage: CollectionStage,
        target: Option<&str>,
        err: impl std::fmt::Display,
    ) {
        let message = err.to_string();
        warn!(
            target: "deployd::gc",
            stage = ?stage,
            target_id = target.unwrap_or("-"),
            "Garbage collection step failed: {}",
            message
        );
        self.failures.push(CollectionFailure {
            stage,
            target: target.map(str::to_string),
            message,
        });
    }

    /// Nothing was removed and nothing failed
    pub fn is_noop(&self) -> bool {
        self.containers_removed.is_empty()
            && self.images_removed.is_empty()
            && self.failures.is_empty()
    }
}

/// Whether an image reference is a content digest rather than a tag
pub fn is_digest_reference(image: &str) -> bool {
    image.starts_with("sha256:")
}

/// Whether an image has neither a tag nor a repository digest besides the
/// untagged sentinels
pub fn is_dangling(image: &ImageRecord) -> bool {
    image.repo_tags.iter().all(|t| t == UNTAGGED_REPO_TAG)
        && image.repo_digests.iter().all(|d| d == UNTAGGED_REPO_DIGEST)
}

/// Removes stale containers and dangling images
pub struct GarbageCollector {
    runtime: Arc<dyn ContainerRuntime>,
}

impl GarbageCollector {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Run one collection pass over a fresh inventory snapshot
    pub async fn collect(&self) -> CollectionReport {
        let mut report = CollectionReport::default();
        let mut orphaned_images: Vec<String> = Vec::new();

        // Containers first: an image cannot go while a container references it
        match self.runtime.list_containers(&COLLECTABLE_STATES).await {
            Ok(containers) => {
                for container in containers {
                    if !COLLECTABLE_STATES.contains(&container.state)
                        || !is_digest_reference(&container.image)
                    {
                        continue;
                    }

                    info!("Removing container {} ({})", container.name, container.id);
                    match self.runtime.remove_container(&container.id, true).await {
                        Ok(()) => {
                            report.containers_removed.push(container.id.clone());
                            if !container.image_id.is_empty()
                                && !orphaned_images.contains(&container.image_id)
                            {
                                orphaned_images.push(container.image_id.clone());
                            }
                        }
                        Err(e) => report.record_failure(
                            CollectionStage::RemoveContainer,
                            Some(&container.id),
                            e,
                        ),
                    }
                }
            }
            Err(e) => report.record_failure(CollectionStage::ListContainers, None, e),
        }

        for image_id in orphaned_images {
            info!("Removing related image {}", image_id);
            self.remove_image(&image_id, false, &mut report).await;
        }

        match self.runtime.list_images().await {
            Ok(images) => {
                for image in images.iter().filter(|i| is_dangling(i)) {
                    if report.images_removed.contains(&image.id) {
                        continue;
                    }
                    info!("Removing dangling image {}", image.id);
                    self.remove_image(&image.id, true, &mut report).await;
                }
            }
            Err(e) => report.record_failure(CollectionStage::ListImages, None, e),
        }

        debug!(
            "Garbage collection removed {} containers and {} images ({} failures)",
            report.containers_removed.len(),
            report.images_removed.len(),
            report.failures.len()
        );
        report
    }

    async fn remove_image(&self, id: &str, prune_children: bool, report: &mut CollectionReport) {
        match self.runtime.remove_image(id, true, prune_children).await {
            Ok(()) => report.images_removed.push(id.to_string()),
            // Already gone, e.g. pruned as the child of an earlier removal
            Err(e) if e.is_not_found() => debug!("Image {} already removed", id),
            Err(e) => report.record_failure(CollectionStage::RemoveImage, Some(id), e),
        }
    }
}
