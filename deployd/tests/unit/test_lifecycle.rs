//! Container lifecycle tests

use std::sync::Arc;

use deployd::daemon::memory::{Faults, InMemoryRuntime};
use deployd::daemon::{ContainerRuntime, ContainerState, ExposedPort};
use deployd::deploy::identity::AppId;
use deployd::deploy::lifecycle::{ContainerLifecycleManager, ContainerPhase};
use deployd::deploy::ports::PortSpec;
use deployd::errors::DeployError;
use tokio_test::{assert_err, assert_ok};

async fn setup() -> (Arc<InMemoryRuntime>, ContainerLifecycleManager) {
    let runtime = Arc::new(InMemoryRuntime::new());
    runtime.add_image(&["demo:latest"]).await;
    let manager = ContainerLifecycleManager::new(runtime.clone() as Arc<dyn ContainerRuntime>);
    (runtime, manager)
}

fn demo() -> AppId {
    AppId::parse("demo").unwrap()
}

#[tokio::test]
async fn test_replace_without_prior_container() {
    let (runtime, manager) = setup().await;
    let ports = PortSpec::parse("127.0.0.1:3002:3002").unwrap();

    let outcome = assert_ok!(manager.replace(&demo(), &ports).await);
    assert_eq!(outcome.previous, None);
    assert_eq!(
        outcome.phases,
        vec![
            ContainerPhase::NoContainer,
            ContainerPhase::Created,
            ContainerPhase::Running
        ]
    );

    let spec = runtime.container_spec("demo").await.unwrap();
    assert_eq!(spec.image, "demo:latest");
    let port = ExposedPort {
        port: 3002,
        protocol: "tcp".to_string(),
    };
    assert_eq!(spec.exposed_ports, vec![port.clone()]);
    let bindings = &spec.port_bindings[&port];
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].host_ip, "127.0.0.1");
    assert_eq!(bindings[0].host_port, "3002");

    let containers = runtime.containers().await;
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].state, ContainerState::Running);
}

#[tokio::test]
async fn test_replace_removes_running_container_first() {
    let (runtime, manager) = setup().await;
    let old = runtime
        .add_container("demo", "demo:latest", ContainerState::Running)
        .await
        .unwrap();
    let ports = PortSpec::parse("127.0.0.1:3002:3002").unwrap();

    let outcome = manager.replace(&demo(), &ports).await.unwrap();
    assert_eq!(outcome.previous, Some(old.clone()));
    assert_eq!(outcome.phases[1], ContainerPhase::Removed);

    let calls = runtime.calls().await;
    let removed = calls
        .iter()
        .position(|c| c == &format!("remove_container:{}", old))
        .unwrap();
    let created = calls
        .iter()
        .position(|c| c == "create_container:demo")
        .unwrap();
    assert!(removed < created);
}

#[tokio::test]
async fn test_replace_is_idempotent() {
    let (runtime, manager) = setup().await;
    let ports = PortSpec::parse("127.0.0.1:3002:3002").unwrap();

    manager.replace(&demo(), &ports).await.unwrap();
    manager.replace(&demo(), &ports).await.unwrap();

    let containers = runtime.containers().await;
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].name, "demo");
    assert_eq!(containers[0].state, ContainerState::Running);
}

#[tokio::test]
async fn test_inspect_failure_does_not_block_create() {
    let (runtime, manager) = setup().await;
    runtime
        .set_faults(Faults {
            inspect: Some("daemon hiccup".to_string()),
            ..Default::default()
        })
        .await;
    let ports = PortSpec::parse("127.0.0.1:3002:3002").unwrap();

    let outcome = assert_ok!(manager.replace(&demo(), &ports).await);
    assert_eq!(outcome.previous, None);
}

#[tokio::test]
async fn test_start_failure_leaves_created_container() {
    let (runtime, manager) = setup().await;
    runtime
        .set_faults(Faults {
            start: Some("port is already allocated".to_string()),
            ..Default::default()
        })
        .await;
    let ports = PortSpec::parse("127.0.0.1:3002:3002").unwrap();

    let err = assert_err!(manager.replace(&demo(), &ports).await);
    match err {
        DeployError::LifecycleFailed(message) => {
            assert!(message.contains("port is already allocated"))
        }
        other => panic!("unexpected error: {other}"),
    }

    let containers = runtime.containers().await;
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].state, ContainerState::Created);

    // The next replace removes the leftover and succeeds
    runtime.set_faults(Faults::default()).await;
    let outcome = manager.replace(&demo(), &ports).await.unwrap();
    assert!(outcome.previous.is_some());
}

#[tokio::test]
async fn test_missing_image_fails_create() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let manager = ContainerLifecycleManager::new(runtime.clone() as Arc<dyn ContainerRuntime>);
    let ports = PortSpec::parse("127.0.0.1:3002:3002").unwrap();

    let err = assert_err!(manager.replace(&demo(), &ports).await);
    assert!(matches!(err, DeployError::LifecycleFailed(_)));
    assert!(runtime.containers().await.is_empty());
}

#[tokio::test]
async fn test_multiple_bindings() {
    let (runtime, manager) = setup().await;
    let ports = PortSpec::parse("127.0.0.1:3002:3002,0.0.0.0:8443:443/tcp,:9000:9000/udp").unwrap();

    manager.replace(&demo(), &ports).await.unwrap();

    let spec = runtime.container_spec("demo").await.unwrap();
    let exposed: Vec<String> = spec.exposed_ports.iter().map(|p| p.to_string()).collect();
    assert_eq!(exposed, vec!["3002/tcp", "443/tcp", "9000/udp"]);

    let udp = ExposedPort {
        port: 9000,
        protocol: "udp".to_string(),
    };
    assert_eq!(spec.port_bindings[&udp][0].host_ip, "");
    assert_eq!(spec.port_bindings[&udp][0].host_port, "9000");
}

#[tokio::test]
async fn test_replace_ignores_container_matched_by_id_prefix() {
    let runtime = Arc::new(InMemoryRuntime::new());
    runtime.add_image(&["other:latest"]).await;
    let other = assert_ok!(
        runtime
            .add_container("other", "other:latest", ContainerState::Running)
            .await
    );
    assert!(other.starts_with("0000"));
    runtime.add_image(&["0000:latest"]).await;
    let manager = ContainerLifecycleManager::new(runtime.clone() as Arc<dyn ContainerRuntime>);

    let app_id = AppId::parse("0000").unwrap();
    let ports = PortSpec::parse("127.0.0.1:3003:3003").unwrap();
    let outcome = assert_ok!(manager.replace(&app_id, &ports).await);
    assert_eq!(outcome.previous, None);

    let containers = runtime.containers().await;
    assert_eq!(containers.len(), 2);
    let survivor = containers.iter().find(|c| c.id == other).unwrap();
    assert_eq!(survivor.name, "other");
    assert_eq!(survivor.state, ContainerState::Running);
    assert!(!runtime
        .calls()
        .await
        .contains(&format!("remove_container:{}", other)));
}
