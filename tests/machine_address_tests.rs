// Copyright (c) 2025 - Cowboy AI, Inc.
//! Integration tests for machine address bookkeeping
//!
//! Provider and machine lists, preferred address stability, subnet
//! filtering and retry under concurrent writers.

mod fixtures;

use std::sync::Arc;

use fixtures::{suite, values, Suite, MODEL_NAME, SERIES};
use pretty_assertions::assert_eq;

use cim_machine_state::{
    Address, ContainerType, MachineJob, MachineTemplate, MemoryStore, State, StateConfig,
    StateError, SubnetInfo, TestHook,
};
use cim_machine_state::store::Collection;
use cim_machine_state::DocumentStore;

fn addrs(values: &[&str]) -> Vec<Address> {
    Address::new_addresses(values)
}

#[tokio::test]
async fn test_no_preferred_address_until_set() {
    let Suite { machine, .. } = suite().await;

    let err = machine.public_address().unwrap_err();
    assert_eq!(err.to_string(), "no public address");
    assert!(matches!(machine.private_address(), Err(StateError::NoAddress("private"))));
    assert!(machine.addresses().is_empty());
}

#[tokio::test]
async fn test_provider_addresses_are_sorted_and_preferred() {
    let Suite { st, mut machine, .. } = suite().await;

    machine
        .set_provider_addresses(addrs(&["127.0.0.1", "10.0.0.1", "8.8.8.8", "10.0.0.1", ""]))
        .await
        .unwrap();

    assert_eq!(
        values(machine.provider_addresses()),
        vec!["8.8.8.8", "10.0.0.1", "127.0.0.1"]
    );
    assert_eq!(machine.public_address().unwrap().value, "8.8.8.8");
    assert_eq!(machine.private_address().unwrap().value, "10.0.0.1");

    let fresh = st.machine("1").await.unwrap();
    assert_eq!(values(fresh.provider_addresses()), values(machine.provider_addresses()));
    assert_eq!(fresh.public_address().unwrap(), machine.public_address().unwrap());
}

#[tokio::test]
async fn test_merged_addresses_prefer_provider_entries() {
    let Suite { mut machine, .. } = suite().await;
    machine
        .set_provider_addresses(addrs(&["8.8.8.8", "10.0.0.1"]))
        .await
        .unwrap();
    machine
        .set_machine_addresses(addrs(&["10.0.0.1", "10.0.0.2", "127.0.0.1"]))
        .await
        .unwrap();

    assert_eq!(
        values(&machine.addresses()),
        vec!["8.8.8.8", "10.0.0.1", "10.0.0.2", "127.0.0.1"]
    );
    assert_eq!(machine.private_address().unwrap().value, "10.0.0.1");
}

#[tokio::test]
async fn test_provider_address_replaces_machine_origin() {
    let Suite { mut machine, .. } = suite().await;

    machine
        .set_machine_addresses(addrs(&["10.0.0.5"]))
        .await
        .unwrap();
    assert_eq!(machine.private_address().unwrap().value, "10.0.0.5");
    assert_eq!(machine.public_address().unwrap().value, "10.0.0.5");

    machine
        .set_provider_addresses(addrs(&["10.0.0.9"]))
        .await
        .unwrap();
    assert_eq!(machine.private_address().unwrap().value, "10.0.0.9");
    assert_eq!(machine.public_address().unwrap().value, "10.0.0.9");
}

#[tokio::test]
async fn test_preferred_address_is_stable() {
    let Suite { mut machine, .. } = suite().await;
    machine
        .set_provider_addresses(addrs(&["8.8.8.8"]))
        .await
        .unwrap();

    // Still present and still an exact match: keep it
    machine
        .set_provider_addresses(addrs(&["8.8.4.4", "8.8.8.8"]))
        .await
        .unwrap();
    assert_eq!(machine.public_address().unwrap().value, "8.8.8.8");

    // Vanished: pick again
    machine
        .set_provider_addresses(addrs(&["8.8.4.4"]))
        .await
        .unwrap();
    assert_eq!(machine.public_address().unwrap().value, "8.8.4.4");
}

#[tokio::test]
async fn test_inexact_preference_upgraded_to_exact() {
    let Suite { mut machine, .. } = suite().await;
    machine
        .set_provider_addresses(addrs(&["10.0.0.1"]))
        .await
        .unwrap();
    assert_eq!(machine.public_address().unwrap().value, "10.0.0.1");

    machine
        .set_provider_addresses(addrs(&["10.0.0.1", "8.8.8.8"]))
        .await
        .unwrap();
    assert_eq!(machine.public_address().unwrap().value, "8.8.8.8");
    assert_eq!(machine.private_address().unwrap().value, "10.0.0.1");
}

#[tokio::test]
async fn test_prefer_ipv6_changes_order() {
    let Suite { st, mut machine, .. } = suite().await;
    st.set_prefer_ipv6(true).await.unwrap();

    machine
        .set_provider_addresses(addrs(&["8.8.8.8", "2001:db8::1"]))
        .await
        .unwrap();

    assert_eq!(values(machine.provider_addresses()), vec!["2001:db8::1", "8.8.8.8"]);
    assert_eq!(machine.public_address().unwrap().value, "2001:db8::1");
}

#[tokio::test]
async fn test_template_addresses_seed_preferences() {
    let Suite { st, .. } = suite().await;
    let machine = st
        .add_one_machine(
            MachineTemplate::new(SERIES, &[MachineJob::HostUnits])
                .with_addresses(addrs(&["10.0.0.3", "8.8.8.8"])),
        )
        .await
        .unwrap();

    assert_eq!(values(machine.provider_addresses()), vec!["8.8.8.8", "10.0.0.3"]);
    assert_eq!(machine.public_address().unwrap().value, "8.8.8.8");
    assert_eq!(machine.private_address().unwrap().value, "10.0.0.3");
}

#[tokio::test]
async fn test_allocatable_subnet_addresses_belong_to_containers() {
    let Suite { st, mut machine, .. } = suite().await;
    st.add_subnet(SubnetInfo {
        cidr: "192.168.1.0/24".to_string(),
        allocatable_ip_low: "192.168.1.0".to_string(),
        allocatable_ip_high: "192.168.1.10".to_string(),
    })
    .await
    .unwrap();

    machine
        .set_provider_addresses(addrs(&["127.0.0.1", "8.8.8.8", "192.168.1.4"]))
        .await
        .unwrap();
    assert_eq!(values(machine.provider_addresses()), vec!["8.8.8.8", "127.0.0.1"]);

    // Outside the allocatable range the address stays
    machine
        .set_provider_addresses(addrs(&["192.168.1.20"]))
        .await
        .unwrap();
    assert_eq!(values(machine.provider_addresses()), vec!["192.168.1.20"]);

    let mut container = st
        .add_machine_inside_machine(
            MachineTemplate::new(SERIES, &[MachineJob::HostUnits]),
            machine.id(),
            ContainerType::Lxc,
        )
        .await
        .unwrap();
    container
        .set_provider_addresses(addrs(&["192.168.1.4"]))
        .await
        .unwrap();
    assert_eq!(values(container.provider_addresses()), vec!["192.168.1.4"]);
}

#[tokio::test]
async fn test_dead_machine_rejects_addresses() {
    let Suite { mut machine, .. } = suite().await;
    machine.ensure_dead().await.unwrap();

    let err = machine
        .set_machine_addresses(addrs(&["10.0.0.1"]))
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::NotAlive(_)));
}

#[tokio::test]
async fn test_address_update_retries_after_concurrent_change() {
    let Suite { st, mut machine, .. } = suite().await;
    let hook_st = st.clone();
    st.set_test_hooks([TestHook::before(move || async move {
        let mut other = hook_st.machine("1").await.unwrap();
        other.set_agent_version("1.2.3").await.unwrap();
    })]);

    machine
        .set_provider_addresses(addrs(&["8.8.8.8"]))
        .await
        .unwrap();
    assert_eq!(st.pending_test_hooks(), 0);

    machine.refresh().await.unwrap();
    assert_eq!(values(machine.provider_addresses()), vec!["8.8.8.8"]);
    assert_eq!(machine.agent_version(), Some("1.2.3"));
}

#[tokio::test]
async fn test_address_update_gives_up_under_contention() {
    let config = StateConfig::new(MODEL_NAME).with_txn_attempts(3);
    let st = State::open(Arc::new(MemoryStore::new()), config).await.unwrap();
    let mut machine = st.add_machine(SERIES, &[MachineJob::HostUnits]).await.unwrap();

    let hooks = (0..3).map(|n| {
        let hook_st = st.clone();
        TestHook::before(move || async move {
            let mut other = hook_st.machine("0").await.unwrap();
            other.set_agent_version(&format!("1.0.{n}")).await.unwrap();
        })
    });
    st.set_test_hooks(hooks);

    let err = machine
        .set_provider_addresses(addrs(&["8.8.8.8"]))
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::ExcessiveContention));
    assert_eq!(err.to_string(), "state changing too quickly; try again soon");

    machine.refresh().await.unwrap();
    assert!(machine.provider_addresses().is_empty());
}

#[tokio::test]
async fn test_equal_resubmission_still_writes() {
    let Suite { mut machine, .. } = suite().await;
    machine
        .set_provider_addresses(addrs(&["8.8.8.8", "10.0.0.1"]))
        .await
        .unwrap();
    machine.refresh().await.unwrap();
    let before = machine.revno();

    machine
        .set_provider_addresses(addrs(&["8.8.8.8", "10.0.0.1"]))
        .await
        .unwrap();
    machine.refresh().await.unwrap();
    assert_eq!(machine.revno(), before + 1);
    assert_eq!(values(machine.provider_addresses()), vec!["8.8.8.8", "10.0.0.1"]);
}

#[tokio::test]
async fn test_concurrent_equal_writers_each_commit() {
    let Suite { st, mut machine, .. } = suite().await;
    machine.refresh().await.unwrap();
    let before = machine.revno();
    let wanted = addrs(&["10.0.0.1", "8.8.8.8", "example.org"]);

    let mut writers = Vec::new();
    for _ in 0..3 {
        writers.push(st.machine("1").await.unwrap());
    }
    let [mut a, mut b, mut c]: [_; 3] = writers.try_into().unwrap();
    let (ra, rb, rc) = tokio::join!(
        a.set_machine_addresses(wanted.clone()),
        b.set_machine_addresses(wanted.clone()),
        c.set_machine_addresses(wanted.clone()),
    );
    ra.unwrap();
    rb.unwrap();
    rc.unwrap();

    machine.refresh().await.unwrap();
    assert_eq!(machine.revno(), before + 3);
    let expected = values(&a.addresses());
    for writer in [&b, &c, &machine] {
        assert_eq!(values(&writer.addresses()), expected);
    }
    assert_eq!(expected, vec!["8.8.8.8", "example.org", "10.0.0.1"]);
}

#[tokio::test]
async fn test_clearing_addresses_drops_preferences() {
    let Suite { st, mut machine, .. } = suite().await;
    machine
        .set_provider_addresses(addrs(&["8.8.8.8", "10.0.0.1"]))
        .await
        .unwrap();

    machine.set_provider_addresses(Vec::new()).await.unwrap();
    assert!(machine.public_address().unwrap_err().is_no_address());
    assert!(machine.private_address().unwrap_err().is_no_address());

    let stored = st.store().get(Collection::Machines, "1").await.unwrap().unwrap();
    assert!(stored.body.get("preferred_public_address").is_none());
    assert!(stored.body.get("preferred_private_address").is_none());

    let fresh = st.machine("1").await.unwrap();
    assert!(fresh.public_address().unwrap_err().is_no_address());
}
