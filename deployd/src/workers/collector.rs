//! Periodic garbage collection worker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info};

use crate::deploy::gc::GarbageCollector;

/// Collector worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Interval between passes
    pub interval: Duration,

    /// Initial delay before the first pass
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            initial_delay: Duration::from_secs(30),
        }
    }
}

/// Run the collector worker until `shutdown_signal` resolves
pub async fn run<S, F>(
    options: &Options,
    collector: &GarbageCollector,
    mut sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: FnMut(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Collector worker starting...");

    let mut wait = options.initial_delay;
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_signal => {
                info!("Collector worker shutting down...");
                return;
            }
            _ = sleep_fn(wait) => {}
        }
        wait = options.interval;

        debug!("Running scheduled garbage collection...");
        let report = collector.collect().await;
        if !report.is_noop() {
            info!(
                "Scheduled collection removed {} containers and {} images",
                report.containers_removed.len(),
                report.images_removed.len()
            );
        }
    }
}
