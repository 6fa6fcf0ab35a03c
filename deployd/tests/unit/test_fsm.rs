//! FSM unit tests

use deployd::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentState};

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new();
    assert_eq!(fsm.state(), &DeploymentState::Pending);
    assert!(fsm.error().is_none());
    assert_eq!(fsm.failure_streak(), 0);
    assert!(!fsm.is_in_progress());
}

#[test]
fn test_fsm_deploy_success_flow() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Deploy).unwrap();
    assert_eq!(fsm.state(), &DeploymentState::Cloning);

    fsm.process(DeploymentEvent::Cloned).unwrap();
    assert_eq!(fsm.state(), &DeploymentState::Building);

    fsm.process(DeploymentEvent::Built).unwrap();
    assert_eq!(fsm.state(), &DeploymentState::Replacing);

    fsm.process(DeploymentEvent::Started).unwrap();
    assert_eq!(fsm.state(), &DeploymentState::Running);
}

#[test]
fn test_fsm_fails_from_every_stage() {
    let stages = [
        vec![DeploymentEvent::Deploy],
        vec![DeploymentEvent::Deploy, DeploymentEvent::Cloned],
        vec![
            DeploymentEvent::Deploy,
            DeploymentEvent::Cloned,
            DeploymentEvent::Built,
        ],
    ];

    for events in stages {
        let mut fsm = DeploymentFsm::new();
        for event in events {
            fsm.process(event).unwrap();
        }
        fsm.process(DeploymentEvent::Failed("boom".to_string()))
            .unwrap();
        assert_eq!(fsm.state(), &DeploymentState::Failed);
        assert_eq!(fsm.error(), Some("boom"));
    }
}

#[test]
fn test_fsm_failure_streak() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Deploy).unwrap();
    fsm.process(DeploymentEvent::Failed("error 1".to_string()))
        .unwrap();
    assert_eq!(fsm.failure_streak(), 1);

    // Redeploying clears the error but keeps counting failures
    fsm.process(DeploymentEvent::Deploy).unwrap();
    assert!(fsm.error().is_none());
    fsm.process(DeploymentEvent::Failed("error 2".to_string()))
        .unwrap();
    assert_eq!(fsm.failure_streak(), 2);

    fsm.process(DeploymentEvent::Deploy).unwrap();
    fsm.process(DeploymentEvent::Cloned).unwrap();
    fsm.process(DeploymentEvent::Built).unwrap();
    fsm.process(DeploymentEvent::Started).unwrap();
    assert_eq!(fsm.failure_streak(), 0);
}

#[test]
fn test_fsm_redeploy_running_app() {
    let mut fsm = DeploymentFsm::new();
    fsm.process(DeploymentEvent::Deploy).unwrap();
    fsm.process(DeploymentEvent::Cloned).unwrap();
    fsm.process(DeploymentEvent::Built).unwrap();
    fsm.process(DeploymentEvent::Started).unwrap();

    fsm.process(DeploymentEvent::Deploy).unwrap();
    assert_eq!(fsm.state(), &DeploymentState::Cloning);
}

#[test]
fn test_fsm_reset() {
    let mut fsm = DeploymentFsm::new();
    fsm.process(DeploymentEvent::Deploy).unwrap();
    fsm.process(DeploymentEvent::Failed("error".to_string()))
        .unwrap();

    fsm.process(DeploymentEvent::Reset).unwrap();
    assert_eq!(fsm.state(), &DeploymentState::Pending);
    assert!(fsm.error().is_none());
    assert_eq!(fsm.failure_streak(), 0);
}

#[test]
fn test_fsm_invalid_transition() {
    let mut fsm = DeploymentFsm::new();

    // Cannot build before cloning
    assert!(fsm.process(DeploymentEvent::Built).is_err());
    assert_eq!(fsm.state(), &DeploymentState::Pending);

    // Cannot start a second deployment while one is in progress
    fsm.process(DeploymentEvent::Deploy).unwrap();
    assert!(fsm.process(DeploymentEvent::Deploy).is_err());
    assert!(fsm.process(DeploymentEvent::Reset).is_err());
    assert_eq!(fsm.state(), &DeploymentState::Cloning);

    // Nothing to fail when idle
    let mut idle = DeploymentFsm::new();
    assert!(idle.process(DeploymentEvent::Failed("x".to_string())).is_err());
}

#[test]
fn test_state_serializes_lowercase() {
    assert_eq!(
        serde_json::to_string(&DeploymentState::Replacing).unwrap(),
        "\"replacing\""
    );
}
