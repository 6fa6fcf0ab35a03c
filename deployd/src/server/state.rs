//! Server state

use std::sync::Arc;

use secrecy::SecretString;

use crate::deploy::orchestrator::Orchestrator;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<Orchestrator>,
    pub api_key: SecretString,
}

impl ServerState {
    pub fn new(orchestrator: Arc<Orchestrator>, api_key: SecretString) -> Self {
        Self {
            orchestrator,
            api_key,
        }
    }
}
