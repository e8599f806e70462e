// Copyright (c) 2025 - Cowboy AI, Inc.
//! Test fixtures for cim-machine-state
//!
//! Every suite starts from the same model:
//!
//! ```text
//! model "testenv"
//!   machine 0   ManageModel
//!   machine 1   HostUnits
//! ```
//!
//! The constraints validator treats `instance-type` and `mem` as
//! conflicting and ignores `cpu-power`, like a typical cloud provider.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use cim_machine_state::constraints::{CPU_POWER, INSTANCE_TYPE, MEM};
use cim_machine_state::{
    ConstraintsValidator, Machine, MachineJob, MemoryStore, State, StateConfig,
};

pub const MODEL_NAME: &str = "testenv";
pub const SERIES: &str = "quantal";

/// How long a watcher must stay quiet to count as "no change"
pub const QUIET: Duration = Duration::from_millis(50);

pub struct Suite {
    pub st: State,
    pub machine0: Machine,
    pub machine: Machine,
}

/// Provider policy used by every suite
pub fn validator() -> ConstraintsValidator {
    ConstraintsValidator::new()
        .register_conflicts(&[INSTANCE_TYPE], &[MEM])
        .register_unsupported(&[CPU_POWER])
}

/// Fresh state over an empty in-memory store
pub async fn open_state() -> State {
    State::open(Arc::new(MemoryStore::new()), StateConfig::new(MODEL_NAME))
        .await
        .expect("open state")
        .with_constraints_validator(validator())
}

/// Standard suite: a manager machine and one unit host
pub async fn suite() -> Suite {
    init_tracing();
    let st = open_state().await;
    let machine0 = st
        .add_machine(SERIES, &[MachineJob::ManageModel])
        .await
        .expect("add machine 0");
    let machine = st
        .add_machine(SERIES, &[MachineJob::HostUnits])
        .await
        .expect("add machine 1");
    assert_eq!(machine.id(), "1");
    Suite {
        st,
        machine0,
        machine,
    }
}

/// Route test logs through the env filter once per binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Values of a list of addresses, in order
pub fn values(addresses: &[cim_machine_state::Address]) -> Vec<String> {
    addresses.iter().map(|a| a.value.clone()).collect()
}
