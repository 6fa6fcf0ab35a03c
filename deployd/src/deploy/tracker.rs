//! Latest deployment status per app

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::warn;

use crate::deploy::build_log::BuildAttempt;
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentState};
use crate::deploy::identity::AppId;

#[derive(Debug, Clone)]
struct Entry {
    fsm: DeploymentFsm,
    nonce: Option<String>,
    log_file: Option<PathBuf>,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Status snapshot served to callers polling a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentStatus {
    pub app_id: AppId,
    pub state: DeploymentState,
    pub error: Option<String>,
    pub failure_streak: u32,
    pub nonce: Option<String>,
    pub log_file: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Tracks the state machine of the latest deployment of every app
#[derive(Debug, Default)]
pub struct DeploymentTracker {
    entries: RwLock<HashMap<AppId, Entry>>,
}

impl DeploymentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed an event to the app's state machine. Invalid transitions are
    /// logged and ignored.
    pub async fn process(&self, app_id: &AppId, event: DeploymentEvent) {
        let mut entries = self.entries.write().await;
        let now = Utc::now();
        let entry = entries.entry(app_id.clone()).or_insert_with(|| Entry {
            fsm: DeploymentFsm::new(),
            nonce: None,
            log_file: None,
            started_at: now,
            updated_at: now,
        });

        let starting = matches!(event, DeploymentEvent::Deploy);
        if let Err(e) = entry.fsm.process(event) {
            warn!("Deployment state of {} not updated: {}", app_id, e);
            return;
        }
        if starting {
            entry.nonce = None;
            entry.log_file = None;
            entry.started_at = now;
        }
        entry.updated_at = now;
    }

    /// Attach the build attempt of the current deployment
    pub async fn attach_build(&self, app_id: &AppId, attempt: &BuildAttempt, log_file: PathBuf) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(app_id) {
            entry.nonce = Some(attempt.nonce.clone());
            entry.log_file = Some(log_file);
            entry.updated_at = Utc::now();
        }
    }

    pub async fn status(&self, app_id: &AppId) -> Option<DeploymentStatus> {
        let entries = self.entries.read().await;
        entries.get(app_id).map(|entry| DeploymentStatus {
            app_id: app_id.clone(),
            state: entry.fsm.state().clone(),
            error: entry.fsm.error().map(str::to_string),
            failure_streak: entry.fsm.failure_streak(),
            nonce: entry.nonce.clone(),
            log_file: entry.log_file.clone(),
            started_at: entry.started_at,
            updated_at: entry.updated_at,
        })
    }
}
