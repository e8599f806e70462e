// Copyright (c) 2025 - Cowboy AI, Inc.
//! Integration tests for provisioning, constraints and agent bookkeeping

mod fixtures;

use std::sync::Arc;

use fixtures::{suite, values, Suite, MODEL_NAME, SERIES};
use pretty_assertions::assert_eq;

use cim_machine_state::{
    Address, Constraints, HardwareCharacteristics, InstanceId, MachineJob, MachineTemplate,
    MemoryStore, State, StateConfig, Status, StatusInfo, StateError, TestHook,
};

fn hardware() -> HardwareCharacteristics {
    HardwareCharacteristics {
        arch: Some("amd64".to_string()),
        mem: Some(4096),
        cpu_cores: Some(2),
        availability_zone: Some("a_zone".to_string()),
        ..Default::default()
    }
}

fn cons(s: &str) -> Constraints {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_set_provisioned_once() {
    let Suite { st, mut machine, .. } = suite().await;

    let err = machine.instance_id().unwrap_err();
    assert_eq!(err.to_string(), "machine 1 not provisioned");
    assert!(!machine.check_provisioned("fake_nonce"));

    machine
        .set_provisioned("umbrella/0", "fake_nonce", Some(hardware()))
        .await
        .unwrap();
    assert_eq!(machine.instance_id().unwrap(), InstanceId::new("umbrella/0"));
    assert!(machine.check_provisioned("fake_nonce"));
    assert!(!machine.check_provisioned("not-really"));

    let err = machine
        .set_provisioned("umbrella/1", "fake_nonce", None)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        r#"cannot set instance data for machine "1": already set"#
    );

    let fresh = st.machine("1").await.unwrap();
    assert_eq!(fresh.instance_id().unwrap(), InstanceId::new("umbrella/0"));
    assert!(fresh.check_provisioned("fake_nonce"));
}

#[tokio::test]
async fn test_set_provisioned_rejects_empty_values() {
    let Suite { mut machine, .. } = suite().await;
    for (id, nonce) in [("", "nonce"), ("i-1", ""), ("", "")] {
        let err = machine.set_provisioned(id, nonce, None).await.unwrap_err();
        assert!(matches!(err, StateError::Provisioning { .. }), "{err}");
    }
    assert!(machine.instance_id().is_err());
}

#[tokio::test]
async fn test_set_provisioned_requires_alive() {
    let Suite { mut machine, .. } = suite().await;
    machine.destroy().await.unwrap();

    let err = machine
        .set_provisioned("i-1", "nonce", None)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        r#"cannot set instance data for machine "1": not found or not alive"#
    );
}

#[tokio::test]
async fn test_hardware_and_availability_zone() {
    let Suite { mut machine, .. } = suite().await;
    assert!(matches!(
        machine.hardware_characteristics().await,
        Err(StateError::NotFound(_))
    ));

    machine
        .set_provisioned("i-1", "nonce", Some(hardware()))
        .await
        .unwrap();

    assert_eq!(machine.hardware_characteristics().await.unwrap(), hardware());
    assert_eq!(machine.availability_zone().await.unwrap(), "a_zone");
}

#[tokio::test]
async fn test_provisioned_template() {
    let Suite { st, .. } = suite().await;
    let machine = st
        .add_one_machine(
            MachineTemplate::new(SERIES, &[MachineJob::HostUnits])
                .with_instance("i-2", "nonce-2")
                .with_hardware(hardware()),
        )
        .await
        .unwrap();

    assert_eq!(machine.instance_id().unwrap(), InstanceId::new("i-2"));
    assert!(machine.check_provisioned("nonce-2"));
    assert_eq!(machine.hardware_characteristics().await.unwrap(), hardware());

    let err = st
        .add_one_machine(MachineTemplate::new(SERIES, &[MachineJob::HostUnits]).with_instance("i-3", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_set_instance_info_records_addresses() {
    let Suite { mut machine, .. } = suite().await;
    machine
        .set_instance_info(
            "i-1",
            "nonce",
            None,
            Address::new_addresses(&["10.0.0.1", "8.8.8.8"]),
        )
        .await
        .unwrap();

    assert!(machine.check_provisioned("nonce"));
    assert_eq!(values(machine.provider_addresses()), vec!["8.8.8.8", "10.0.0.1"]);
}

#[tokio::test]
async fn test_failed_instance_info_does_not_provision() {
    let config = StateConfig::new(MODEL_NAME).with_txn_attempts(2);
    let st = State::open(Arc::new(MemoryStore::new()), config).await.unwrap();
    let mut machine = st.add_machine(SERIES, &[MachineJob::HostUnits]).await.unwrap();

    // Every address attempt loses to another writer
    let hooks = (0..2).map(|n| {
        let hook_st = st.clone();
        TestHook::before(move || async move {
            let mut other = hook_st.machine("0").await.unwrap();
            other.set_agent_version(&format!("1.0.{n}")).await.unwrap();
        })
    });
    st.set_test_hooks(hooks);

    let err = machine
        .set_instance_info("i-1", "nonce", Some(hardware()), Address::new_addresses(&["8.8.8.8"]))
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::ExcessiveContention));

    machine.refresh().await.unwrap();
    assert!(machine.instance_id().unwrap_err().is_not_provisioned());
    assert!(!machine.check_provisioned("nonce"));
    assert!(machine.hardware_characteristics().await.unwrap_err().is_not_found());

    // Empty identity is refused before anything is written
    let err = machine
        .set_instance_info("", "nonce", None, Address::new_addresses(&["8.8.8.8"]))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        r#"cannot set instance data for machine "0": instance id and nonce cannot be empty"#
    );
    machine.refresh().await.unwrap();
    assert!(machine.provider_addresses().is_empty());
}

#[tokio::test]
async fn test_instance_status() {
    let Suite { mut machine, .. } = suite().await;
    let err = machine
        .set_instance_status(StatusInfo::new(Status::Running, ""))
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::NotProvisioned(_)));

    machine.set_provisioned("i-1", "nonce", None).await.unwrap();
    assert!(matches!(machine.instance_status().await, Err(StateError::NotFound(_))));

    machine
        .set_instance_status(StatusInfo::new(Status::Running, "booted"))
        .await
        .unwrap();
    let status = machine.instance_status().await.unwrap();
    assert_eq!(status.status, Status::Running);
    assert_eq!(status.message, "booted");
}

#[tokio::test]
async fn test_machine_takes_model_constraints() {
    let Suite { st, machine, .. } = suite().await;
    assert!(machine.constraints().await.unwrap().is_empty());

    st.set_model_constraints(cons("mem=4G")).await.unwrap();
    let inherited = st.add_machine(SERIES, &[MachineJob::HostUnits]).await.unwrap();
    assert_eq!(inherited.constraints().await.unwrap().mem, Some(4096));

    let own = st
        .add_one_machine(
            MachineTemplate::new(SERIES, &[MachineJob::HostUnits])
                .with_constraints(cons("cpu-cores=8")),
        )
        .await
        .unwrap();
    let own_cons = own.constraints().await.unwrap();
    assert_eq!(own_cons.cpu_cores, Some(8));
    assert_eq!(own_cons.mem, None);
}

#[tokio::test]
async fn test_set_constraints_validates() {
    let Suite { machine, .. } = suite().await;

    let err = machine
        .set_constraints(cons("instance-type=m1.small mem=4G"))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        r#"cannot set constraints: ambiguous constraints: "instance-type" overlaps with "mem""#
    );

    // Unsupported attributes are recorded with a warning
    machine.set_constraints(cons("cpu-power=100 mem=2G")).await.unwrap();
    let stored = machine.constraints().await.unwrap();
    assert_eq!(stored.cpu_power, Some(100));
    assert_eq!(stored.mem, Some(2048));
}

#[tokio::test]
async fn test_constraints_frozen_after_provisioning() {
    let Suite { mut machine, .. } = suite().await;
    machine.set_constraints(cons("mem=1G")).await.unwrap();
    machine.set_provisioned("i-1", "nonce", None).await.unwrap();

    let err = machine.set_constraints(cons("mem=8G")).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot set constraints: machine is already provisioned"
    );
    assert_eq!(machine.constraints().await.unwrap().mem, Some(1024));
}

#[tokio::test]
async fn test_constraints_require_alive_machine() {
    let Suite { mut machine, .. } = suite().await;
    machine.destroy().await.unwrap();

    let err = machine.set_constraints(cons("mem=1G")).await.unwrap_err();
    assert_eq!(err.to_string(), "cannot set constraints: not found or not alive");
}

#[tokio::test]
async fn test_agent_status() {
    let Suite { machine, .. } = suite().await;
    assert_eq!(machine.status().await.unwrap().status, Status::Pending);

    let err = machine
        .set_status(StatusInfo::new(Status::Error, ""))
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::InvalidArgument(_)));

    machine
        .set_status(StatusInfo::new(Status::Started, "ready"))
        .await
        .unwrap();
    let status = machine.status().await.unwrap();
    assert_eq!(status.status, Status::Started);
    assert_eq!(status.message, "ready");
}

#[tokio::test]
async fn test_agent_password() {
    let Suite { st, mut machine, .. } = suite().await;
    assert!(!machine.password_valid(""));

    let err = machine.set_password("short").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "password is only 5 bytes long, and is not a valid agent password"
    );

    machine.set_password("very very secret password").await.unwrap();
    assert!(machine.password_valid("very very secret password"));
    assert!(!machine.password_valid("very very secret passwort"));

    let fresh = st.machine("1").await.unwrap();
    assert!(fresh.password_valid("very very secret password"));
}

#[tokio::test]
async fn test_votes_and_agent_version() {
    let Suite { st, mut machine0, .. } = suite().await;
    assert!(!machine0.wants_vote());

    machine0.set_wants_vote(true).await.unwrap();
    machine0.set_has_vote(true).await.unwrap();
    machine0.set_agent_version("2.0.1").await.unwrap();

    let fresh = st.machine("0").await.unwrap();
    assert!(fresh.wants_vote());
    assert!(fresh.has_vote());
    assert_eq!(fresh.agent_version(), Some("2.0.1"));
    assert!(fresh.is_manager());
}

#[tokio::test]
async fn test_ssh_host_keys() {
    let Suite { st, machine, .. } = suite().await;
    let tag = machine.tag();
    assert_eq!(tag, "machine-1");
    assert!(matches!(st.get_ssh_host_keys(&tag).await, Err(StateError::NotFound(_))));

    st.set_ssh_host_keys(&tag, vec!["rsa".to_string(), "ed25519".to_string()])
        .await
        .unwrap();
    assert_eq!(st.get_ssh_host_keys(&tag).await.unwrap(), vec!["rsa", "ed25519"]);

    st.set_ssh_host_keys(&tag, vec!["ecdsa".to_string()]).await.unwrap();
    assert_eq!(st.get_ssh_host_keys(&tag).await.unwrap(), vec!["ecdsa"]);
}
