// Copyright (c) 2025 - Cowboy AI, Inc.
//! Transactional machine state for the Composable Information Machine
//!
//! Persistent records of the machines in a model, their lifecycle,
//! addresses, provisioning identity, containers and reboot flags, kept
//! consistent under concurrent writers through conditional multi-document
//! transactions with bounded retry.
//!
//! ```text
//! State ──▶ Machine ──builder──▶ TxnRunner ──ops──▶ DocumentStore
//!   │                                                    │
//!   └────────── NotifyWatcher / UnitsWatcher ◀── changes ┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use cim_machine_state::{MachineJob, MemoryStore, State, StateConfig};
//!
//! # tokio_test::block_on(async {
//! let st = State::open(Arc::new(MemoryStore::new()), StateConfig::new("demo"))
//!     .await
//!     .unwrap();
//! let mut machine = st.add_machine("quantal", &[MachineJob::HostUnits]).await.unwrap();
//! machine.destroy().await.unwrap();
//! machine.ensure_dead().await.unwrap();
//! machine.remove().await.unwrap();
//! # });
//! ```

pub mod config;
pub mod constraints;
pub mod errors;
pub mod instance;
pub mod machine;
pub mod network;
pub mod state;
pub mod state_machine;
pub mod status;
pub mod store;
pub mod txn;
pub mod watcher;

pub use config::StateConfig;
pub use constraints::{Constraints, ConstraintsValidator};
pub use errors::{StateError, StateResult, StoreError};
pub use instance::{ContainerType, HardwareCharacteristics, InstanceId};
pub use machine::{Machine, MachineJob, MachineTemplate};
pub use network::{Address, AddressType, Scope};
pub use state::{Application, IpAddress, MigrationMode, Model, State, Subnet, SubnetInfo, Unit};
pub use state_machine::{Life, RebootAction};
pub use status::{Status, StatusInfo};
pub use store::{DocumentStore, MemoryStore};
pub use txn::{TestHook, TxnRunner};
pub use watcher::{NotifyWatcher, UnitsWatcher};
