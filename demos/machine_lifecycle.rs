// Copyright (c) 2025 - Cowboy AI, Inc.
//! Machine Lifecycle Example
//!
//! Walks a small model through the life of its machines:
//!
//! ```text
//! add host ──▶ provision ──▶ add container ──▶ assign unit
//!                                                  │
//!      remove ◀── ensure dead ◀── destroy ◀────────┘
//! ```
//!
//! Run with `RUST_LOG=cim_machine_state=debug` to see every transaction.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use cim_machine_state::{
    Address, ContainerType, HardwareCharacteristics, MachineJob, MachineTemplate, MemoryStore,
    State, StateConfig, StateError, Status, StatusInfo,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = StateConfig::from_env()
        .unwrap_or_else(|_| StateConfig::new("demo"));
    let store = Arc::new(MemoryStore::from_config(&config));
    let st = State::open(store, config)
        .await
        .context("opening machine state")?;

    println!("=== Machine Lifecycle Example ===\n");

    // === Step 1: Machines ===
    let manager = st.add_machine("jammy", &[MachineJob::ManageModel]).await?;
    let mut host = st.add_machine("jammy", &[MachineJob::HostUnits]).await?;
    println!("Added manager {} and host {}", manager.tag(), host.tag());

    // === Step 2: Provisioning ===
    host.set_instance_info(
        "i-0042",
        "machine-1:nonce",
        Some(HardwareCharacteristics {
            arch: Some("amd64".to_string()),
            mem: Some(8192),
            cpu_cores: Some(4),
            ..Default::default()
        }),
        Address::new_addresses(&["203.0.113.7", "10.1.0.7", "127.0.0.1"]),
    )
    .await?;
    host.set_status(StatusInfo::new(Status::Started, "")).await?;
    println!(
        "Provisioned {} as {} (public {}, private {})",
        host.id(),
        host.instance_id()?,
        host.public_address()?,
        host.private_address()?
    );
    println!("Hardware: {}", host.hardware_characteristics().await?);

    // === Step 3: Containers ===
    host.set_supported_containers(&[ContainerType::Lxd]).await?;
    let template = MachineTemplate::new("jammy", &[MachineJob::HostUnits]);
    let mut container = st
        .add_machine_inside_machine(template.clone(), host.id(), ContainerType::Lxd)
        .await?;
    println!("Container {} inside {}", container.id(), host.id());

    match st
        .add_machine_inside_machine(template, host.id(), ContainerType::Kvm)
        .await
    {
        Err(err @ StateError::UnsupportedContainer { .. }) => println!("Refused: {err}"),
        other => anyhow::bail!("expected an unsupported container error, got {other:?}"),
    }

    // === Step 4: Units ===
    let app = st.add_application("postgresql").await?;
    let mut unit = app.add_unit().await?;
    unit.assign_to_machine(&mut host).await?;
    println!("Unit {} assigned to {}", unit.name(), host.id());

    if let Err(err) = host.destroy().await {
        println!("Host cannot be destroyed yet: {err}");
    }

    // === Step 5: Teardown ===
    container.ensure_dead().await?;
    container.remove().await?;

    unit.destroy().await?;
    unit.ensure_dead().await?;
    unit.remove().await?;

    host.destroy().await?;
    host.ensure_dead().await?;
    host.remove().await?;
    println!("Host removed; {} machine(s) left", st.all_machines().await?.len());

    for cleanup in st.cleanups().await? {
        println!("Pending cleanup: {:?} for {}", cleanup.kind, cleanup.prefix);
    }

    st.close().await;
    println!("\n=== Example Complete ===");
    Ok(())
}
