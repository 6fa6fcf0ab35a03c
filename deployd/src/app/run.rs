//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::deploy::orchestrator::Orchestrator;
use crate::errors::DeployError;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::collector;

/// Run the deployment server until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DeployError> {
    info!("Initializing deployment server...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(options, &shutdown_tx, &mut shutdown_manager).await {
        error!("Failed to start deployment server: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: AppOptions,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), DeployError> {
    let app_state = Arc::new(AppState::init(&options)?);
    shutdown_manager.with_orchestrator(app_state.orchestrator.clone())?;

    if options.enable_collector {
        init_collector_worker(
            options.collector.clone(),
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )?;
    }

    init_server(options, app_state, shutdown_manager, shutdown_tx.subscribe()).await
}

fn init_collector_worker(
    options: collector::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DeployError> {
    info!(
        "Initializing collector worker (every {:?})...",
        options.interval
    );

    let collector = app_state.orchestrator.collector();

    let handle = tokio::spawn(async move {
        collector::run(
            &options,
            collector.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_collector_worker_handle(handle)
}

async fn init_server(
    options: AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DeployError> {
    info!("Initializing HTTP server...");

    let server_state = ServerState::new(app_state.orchestrator.clone(), options.api_key);

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    server_handle: Option<JoinHandle<Result<(), DeployError>>>,
    collector_worker_handle: Option<JoinHandle<()>>,
    orchestrator: Option<Arc<Orchestrator>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            server_handle: None,
            collector_worker_handle: None,
            orchestrator: None,
        }
    }

    fn with_orchestrator(&mut self, orchestrator: Arc<Orchestrator>) -> Result<(), DeployError> {
        if self.orchestrator.is_some() {
            return Err(DeployError::ShutdownError("orchestrator already set".to_string()));
        }
        self.orchestrator = Some(orchestrator);
        Ok(())
    }

    fn with_collector_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), DeployError> {
        if self.collector_worker_handle.is_some() {
            return Err(DeployError::ShutdownError(
                "collector_handle already set".to_string(),
            ));
        }
        self.collector_worker_handle = Some(handle);
        Ok(())
    }

    fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), DeployError>>,
    ) -> Result<(), DeployError> {
        if self.server_handle.is_some() {
            return Err(DeployError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), DeployError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), DeployError> {
        info!("Shutting down deployment server...");

        // 1. Collector worker
        if let Some(handle) = self.collector_worker_handle.take() {
            handle
                .await
                .map_err(|e| DeployError::ShutdownError(e.to_string()))?;
        }

        // 2. HTTP server, which stops accepting and drains in-flight requests
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| DeployError::ShutdownError(e.to_string()))??;
        }

        // 3. Deployments still building or swapping containers
        if let Some(orchestrator) = self.orchestrator.take() {
            info!("Waiting for in-flight deployments...");
            orchestrator.drain().await;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
