// Copyright (c) 2025 - Cowboy AI, Inc.
//! Integration tests for containers and supported container types

mod fixtures;

use fixtures::{suite, Suite, SERIES};
use pretty_assertions::assert_eq;
use serde_json::json;

use cim_machine_state::{
    ContainerType, Machine, MachineJob, MachineTemplate, State, StateError, Status,
};

fn template() -> MachineTemplate {
    MachineTemplate::new(SERIES, &[MachineJob::HostUnits])
}

async fn add_container(st: &State, parent: &str, ty: ContainerType) -> Machine {
    st.add_machine_inside_machine(template(), parent, ty)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_container_defaults() {
    let Suite { machine, .. } = suite().await;

    assert_eq!(machine.supported_containers(), (&[][..], false));
    assert!(machine.containers().await.unwrap().is_empty());
    assert!(!machine.is_container());
    assert_eq!(machine.container_type(), ContainerType::None);
    assert_eq!(machine.parent_id(), None);
}

#[tokio::test]
async fn test_container_identity() {
    let Suite { st, machine, .. } = suite().await;
    let container = add_container(&st, machine.id(), ContainerType::Lxc).await;

    assert_eq!(container.id(), "1/lxc/0");
    assert_eq!(container.tag(), "machine-1-lxc-0");
    assert!(container.is_container());
    assert_eq!(container.container_type(), ContainerType::Lxc);
    assert_eq!(container.parent_id(), Some("1"));
    assert_eq!(container.status().await.unwrap().status, Status::Pending);

    let fresh = st.machine("1/lxc/0").await.unwrap();
    assert_eq!(fresh.series(), SERIES);
    assert_eq!(machine.containers().await.unwrap(), vec!["1/lxc/0".to_string()]);
}

#[tokio::test]
async fn test_container_parent_must_exist_and_live() {
    let Suite { st, mut machine, .. } = suite().await;

    let err = st
        .add_machine_inside_machine(template(), "42", ContainerType::Lxc)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "machine 42 not found");

    machine.destroy().await.unwrap();
    let err = st
        .add_machine_inside_machine(template(), machine.id(), ContainerType::Lxc)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "machine 1 is not alive");
}

#[tokio::test]
async fn test_supports_no_containers() {
    let Suite { st, mut machine, .. } = suite().await;
    machine.supports_no_containers().await.unwrap();
    assert_eq!(machine.supported_containers(), (&[][..], true));

    let err = st
        .add_machine_inside_machine(template(), machine.id(), ContainerType::Lxc)
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::UnsupportedContainer { .. }));
    assert_eq!(err.to_string(), "machine 1 cannot host lxc containers");
}

#[tokio::test]
async fn test_set_supported_containers_drops_duplicates() {
    let Suite { st, mut machine, .. } = suite().await;
    machine
        .set_supported_containers(&[ContainerType::Lxc, ContainerType::Kvm, ContainerType::Lxc])
        .await
        .unwrap();

    let fresh = st.machine("1").await.unwrap();
    assert_eq!(
        fresh.supported_containers(),
        (&[ContainerType::Lxc, ContainerType::Kvm][..], true)
    );

    let err = machine
        .set_supported_containers(&[ContainerType::None])
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::InvalidContainerType(_)));
}

#[tokio::test]
async fn test_unsupported_containers_are_flagged() {
    let Suite { st, mut machine, .. } = suite().await;
    let lxc = add_container(&st, machine.id(), ContainerType::Lxc).await;
    let kvm = add_container(&st, machine.id(), ContainerType::Kvm).await;

    machine
        .set_supported_containers(&[ContainerType::Kvm])
        .await
        .unwrap();

    let status = lxc.status().await.unwrap();
    assert_eq!(status.status, Status::Error);
    assert_eq!(status.message, "unsupported container");
    assert_eq!(status.data.get("type"), Some(&json!("lxc")));
    assert_eq!(kvm.status().await.unwrap().status, Status::Pending);

    // Supporting the type again clears the error
    machine
        .set_supported_containers(&[ContainerType::Lxc, ContainerType::Kvm])
        .await
        .unwrap();
    let status = lxc.status().await.unwrap();
    assert_eq!(status.status, Status::Pending);
    assert!(status.data.is_empty());
}

#[tokio::test]
async fn test_other_errors_survive_reclassification() {
    let Suite { st, mut machine, .. } = suite().await;
    let lxc = add_container(&st, machine.id(), ContainerType::Lxc).await;
    lxc.set_status(cim_machine_state::StatusInfo::new(Status::Error, "disk full"))
        .await
        .unwrap();

    machine
        .set_supported_containers(&[ContainerType::Lxc])
        .await
        .unwrap();

    let status = lxc.status().await.unwrap();
    assert_eq!(status.status, Status::Error);
    assert_eq!(status.message, "disk full");
}

#[tokio::test]
async fn test_nested_containers() {
    let Suite { st, machine, .. } = suite().await;
    let outer = add_container(&st, machine.id(), ContainerType::Lxc).await;
    let inner = add_container(&st, outer.id(), ContainerType::Kvm).await;

    assert_eq!(inner.id(), "1/lxc/0/kvm/0");
    assert_eq!(inner.parent_id(), Some("1/lxc/0"));
    assert_eq!(outer.containers().await.unwrap(), vec!["1/lxc/0/kvm/0".to_string()]);
    assert_eq!(machine.containers().await.unwrap(), vec!["1/lxc/0".to_string()]);

    let ids: Vec<String> = st
        .all_machines()
        .await
        .unwrap()
        .iter()
        .map(|m| m.id().to_string())
        .collect();
    assert_eq!(ids, vec!["0", "1", "1/lxc/0", "1/lxc/0/kvm/0"]);
}
