//! Deployment orchestrator
//!
//! Runs the fast synchronous prefix of a deployment (validate, refresh the
//! checkout, provision the environment file) and hands the slow part (image
//! build, container replace, garbage collection) to a detached task.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use crate::daemon::ContainerRuntime;
use crate::deploy::build_log::{BuildAttempt, BuildLogSink};
use crate::deploy::builder::{ImageBuilder, DEFAULT_DOCKERFILE};
use crate::deploy::fsm::DeploymentEvent;
use crate::deploy::gc::{CollectionReport, GarbageCollector};
use crate::deploy::identity::AppId;
use crate::deploy::lifecycle::{ContainerLifecycleManager, ReplaceOutcome};
use crate::deploy::locks::{AppGuard, AppLocks};
use crate::deploy::ports::PortSpec;
use crate::deploy::tracker::{DeploymentStatus, DeploymentTracker};
use crate::errors::DeployError;
use crate::source::{AppRegistry, EnvProvisioner, SourceSync};

/// Warning key reported when the environment file could not be provisioned
pub const DOTENV_WARNING: &str = "dotenv";

/// Port spec used when neither the request nor the app configuration has one
pub const DEFAULT_PORTS: &str = "127.0.0.1:3002:3002";

/// Orchestrator options
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Root directory of the build logs
    pub logs_dir: PathBuf,

    /// Build descriptor file name
    pub dockerfile: String,

    /// Fallback port spec
    pub default_ports: String,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("logs"),
            dockerfile: DEFAULT_DOCKERFILE.to_string(),
            default_ports: DEFAULT_PORTS.to_string(),
        }
    }
}

/// External collaborators of the orchestrator
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn AppRegistry>,
    pub source: Arc<dyn SourceSync>,
    pub env: Arc<dyn EnvProvisioner>,
}

/// A deployment whose build/replace task has been handed off
#[derive(Debug)]
pub struct ScheduledDeployment {
    pub app_id: AppId,

    /// Soft failures of the synchronous prefix, keyed by concern
    pub warnings: BTreeMap<String, String>,

    /// Build attempt of the detached task
    pub attempt: BuildAttempt,

    /// Where the build output will be written
    pub log_file: PathBuf,

    /// The detached build/replace task. Dropping it does not cancel it.
    pub task: JoinHandle<Result<ReplaceOutcome, DeployError>>,
}

/// Turns "deploy app X" requests into running containers
pub struct Orchestrator {
    collaborators: Collaborators,
    builder: Arc<ImageBuilder>,
    lifecycle: Arc<ContainerLifecycleManager>,
    collector: Arc<GarbageCollector>,
    tracker: Arc<DeploymentTracker>,
    locks: AppLocks,
    default_ports: String,
}

impl Orchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        collaborators: Collaborators,
        options: OrchestratorOptions,
    ) -> Self {
        let builder = ImageBuilder::new(runtime.clone(), BuildLogSink::new(options.logs_dir))
            .with_dockerfile(options.dockerfile);

        Self {
            collaborators,
            builder: Arc::new(builder),
            lifecycle: Arc::new(ContainerLifecycleManager::new(runtime.clone())),
            collector: Arc::new(GarbageCollector::new(runtime)),
            tracker: Arc::new(DeploymentTracker::new()),
            locks: AppLocks::new(),
            default_ports: options.default_ports,
        }
    }

    /// Validate, refresh the checkout and schedule the build/replace task.
    ///
    /// `raw_ports` overrides the port spec configured for the app. Returns
    /// once the task is scheduled; its outcome is only observable through the
    /// build log, the status tracker and the returned task handle.
    pub async fn deploy(
        &self,
        raw_app_id: &str,
        raw_ports: Option<&str>,
    ) -> Result<ScheduledDeployment, DeployError> {
        let app_id = AppId::parse(raw_app_id)?;

        let source = self
            .collaborators
            .registry
            .resolve(&app_id)
            .ok_or_else(|| DeployError::UnknownApp(app_id.to_string()))?;

        let raw_ports = raw_ports
            .map(str::to_string)
            .or_else(|| source.ports.clone())
            .unwrap_or_else(|| self.default_ports.clone());
        let ports = PortSpec::parse(&raw_ports)?;

        let guard = self
            .locks
            .try_acquire(&app_id)
            .await
            .ok_or_else(|| DeployError::DeploymentInProgress(app_id.to_string()))?;

        info!("Deploying {} from {}", app_id, source.repository_url);
        self.tracker.process(&app_id, DeploymentEvent::Deploy).await;

        if let Err(e) = self.refresh_checkout(&source.repository_url, &source.repository_path).await {
            error!("Failed to refresh checkout of {}: {}", app_id, e);
            self.tracker
                .process(&app_id, DeploymentEvent::Failed(e.to_string()))
                .await;
            return Err(e);
        }

        let mut warnings = BTreeMap::new();
        if let Err(e) = self
            .collaborators
            .env
            .copy_env_file(&source.repository_path, &app_id)
            .await
        {
            warn!("Deploying {} without an environment file: {}", app_id, e);
            warnings.insert(DOTENV_WARNING.to_string(), e.to_string());
        }

        let attempt = BuildAttempt::new(app_id.clone());
        let log_file = self.builder.logs().path_for(&attempt);
        self.tracker.process(&app_id, DeploymentEvent::Cloned).await;
        self.tracker
            .attach_build(&app_id, &attempt, log_file.clone())
            .await;

        let task = self.spawn_build_and_replace(
            guard,
            attempt.clone(),
            source.repository_path.clone(),
            ports,
        );

        Ok(ScheduledDeployment {
            app_id,
            warnings,
            attempt,
            log_file,
            task,
        })
    }

    async fn refresh_checkout(&self, url: &str, path: &Path) -> Result<(), DeployError> {
        let source = &self.collaborators.source;
        source.remove_checkout(path).await.map_err(into_cloning)?;
        source.clone_repository(url, path).await.map_err(into_cloning)
    }

    fn spawn_build_and_replace(
        &self,
        guard: AppGuard,
        attempt: BuildAttempt,
        checkout: PathBuf,
        ports: PortSpec,
    ) -> JoinHandle<Result<ReplaceOutcome, DeployError>> {
        let builder = self.builder.clone();
        let lifecycle = self.lifecycle.clone();
        let collector = self.collector.clone();
        let tracker = self.tracker.clone();
        let span = info_span!("deployment", app = %attempt.app_id, nonce = %attempt.nonce);

        tokio::spawn(
            async move {
                let app_id = attempt.app_id.clone();

                let result =
                    build_and_replace(&builder, &lifecycle, &tracker, &attempt, &checkout, &ports)
                        .await;

                match &result {
                    Ok(outcome) => {
                        tracker.process(&app_id, DeploymentEvent::Started).await;
                        info!("Deployed {} as container {}", app_id, outcome.container_id);
                    }
                    Err(e) => {
                        tracker
                            .process(&app_id, DeploymentEvent::Failed(e.to_string()))
                            .await;
                        error!("Deployment of {} failed: {}", app_id, e);
                    }
                }

                collector.collect().await;
                drop(guard);
                result
            }
            .instrument(span),
        )
    }

    /// Run one garbage collection pass now
    pub async fn collect(&self) -> CollectionReport {
        self.collector.collect().await
    }

    pub fn collector(&self) -> Arc<GarbageCollector> {
        self.collector.clone()
    }

    /// Wait for every build/replace task started so far to finish
    pub async fn drain(&self) {
        self.locks.wait_idle().await;
    }

    /// Latest deployment status of an app, if it was deployed since startup
    pub async fn status(&self, raw_app_id: &str) -> Result<Option<DeploymentStatus>, DeployError> {
        let app_id = AppId::parse(raw_app_id)?;
        Ok(self.tracker.status(&app_id).await)
    }
}

async fn build_and_replace(
    builder: &ImageBuilder,
    lifecycle: &ContainerLifecycleManager,
    tracker: &DeploymentTracker,
    attempt: &BuildAttempt,
    checkout: &Path,
    ports: &PortSpec,
) -> Result<ReplaceOutcome, DeployError> {
    builder.build(checkout, attempt).await?;
    tracker.process(&attempt.app_id, DeploymentEvent::Built).await;
    lifecycle.replace(&attempt.app_id, ports).await
}

fn into_cloning(err: DeployError) -> DeployError {
    match err {
        DeployError::Cloning(_) => err,
        other => DeployError::Cloning(other.to_string()),
    }
}
