//! Finite State Machine for app deployments

use serde::{Deserialize, Serialize};

/// Deployment state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    /// Never deployed since the server started
    Pending,

    /// Removing the old checkout and cloning the source
    Cloning,

    /// Image build in progress
    Building,

    /// Swapping the old container for the new one
    Replacing,

    /// New container started
    Running,

    /// Deployment failed
    Failed,
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Start a deployment
    Deploy,

    /// Source checked out, build scheduled
    Cloned,

    /// Image built
    Built,

    /// New container started
    Started,

    /// Any stage failed
    Failed(String),

    /// Forget the last outcome
    Reset,
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentState,
    error: Option<String>,
    failure_streak: u32,
}

impl DeploymentFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: DeploymentState::Pending,
            error: None,
            failure_streak: 0,
        }
    }

    /// Get current state
    pub fn state(&self) -> &DeploymentState {
        &self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Consecutive failed deployments
    pub fn failure_streak(&self) -> u32 {
        self.failure_streak
    }

    /// Whether a deployment is between `Deploy` and its outcome
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self.state,
            DeploymentState::Cloning | DeploymentState::Building | DeploymentState::Replacing
        )
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            // Start a new deployment from any settled state
            (
                DeploymentState::Pending | DeploymentState::Running | DeploymentState::Failed,
                DeploymentEvent::Deploy,
            ) => {
                self.error = None;
                DeploymentState::Cloning
            }

            (DeploymentState::Cloning, DeploymentEvent::Cloned) => DeploymentState::Building,
            (DeploymentState::Building, DeploymentEvent::Built) => DeploymentState::Replacing,
            (DeploymentState::Replacing, DeploymentEvent::Started) => {
                self.failure_streak = 0;
                DeploymentState::Running
            }

            (
                DeploymentState::Cloning | DeploymentState::Building | DeploymentState::Replacing,
                DeploymentEvent::Failed(err),
            ) => {
                self.error = Some(err.clone());
                self.failure_streak += 1;
                DeploymentState::Failed
            }

            (DeploymentState::Running | DeploymentState::Failed, DeploymentEvent::Reset) => {
                self.error = None;
                self.failure_streak = 0;
                DeploymentState::Pending
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
