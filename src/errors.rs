// Copyright (c) 2025 - Cowboy AI, Inc.
//! Error types for machine state operations
//!
//! Two layers:
//!
//! ```text
//! DocumentStore ──StoreError──▶ TxnRunner ──StateError──▶ callers
//! ```
//!
//! `StoreError::Aborted` never escapes the runner on its own: it is either
//! retried away or converted into a contention error once the attempt budget
//! is exhausted.

use thiserror::Error;

/// Errors reported by a [`DocumentStore`](crate::store::DocumentStore)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// An assertion in the operation set did not hold; nothing was applied
    #[error("transaction aborted")]
    Aborted,

    /// The store session has been closed
    #[error("document store closed")]
    Closed,

    /// A stored document could not be decoded
    #[error("malformed document {collection}/{id}: {reason}")]
    Malformed {
        collection: String,
        id: String,
        reason: String,
    },

    /// The backing store cannot serve requests
    #[error("document store unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur in machine state operations
#[derive(Debug, Error)]
pub enum StateError {
    /// Entity does not exist (or no longer exists)
    #[error("{0} not found")]
    NotFound(String),

    /// Machine has no instance id yet
    #[error("machine {0} not provisioned")]
    NotProvisioned(String),

    /// Principal units still assigned to the machine
    #[error("machine {machine_id} has {} assigned", describe_units(.units))]
    HasAssignedUnits { machine_id: String, units: Vec<String> },

    /// Child containers still recorded for the machine
    #[error("machine {machine_id} is hosting containers {:?}", .containers.join(","))]
    HasContainers {
        machine_id: String,
        containers: Vec<String>,
    },

    /// Machine runs the ManageModel job and may not leave Alive
    #[error("machine {0} is required by the model")]
    RequiredByModel(String),

    /// Forced destruction of a ManageModel machine
    #[error("machine is required by the model")]
    ManagerMachine,

    /// Machine is a voting replica set member
    #[error("machine {0} is a voting replica set member")]
    VotingMember(String),

    /// Removal of a machine that is not Dead
    #[error("cannot remove machine {0}: machine is not dead")]
    MachineNotDead(String),

    /// Lifecycle retry budget exhausted
    #[error("machine {0} cannot advance lifecycle: state changing too quickly; try again soon")]
    LifecycleContention(String),

    /// General retry budget exhausted
    #[error("state changing too quickly; try again soon")]
    ExcessiveContention,

    /// Instance data could not be recorded
    #[error("cannot set instance data for machine {machine_id:?}: {reason}")]
    Provisioning { machine_id: String, reason: String },

    /// Constraints could not be recorded
    #[error("cannot set constraints: {0}")]
    Constraints(String),

    /// Unit could not be assigned to a machine
    #[error("cannot assign unit {unit:?} to machine {machine_id}: {reason}")]
    CannotAssign {
        unit: String,
        machine_id: String,
        reason: String,
    },

    /// No address of the requested kind is recorded
    #[error("no {0} address")]
    NoAddress(&'static str),

    /// Container type is not acceptable in this position
    #[error("{0:?} is not a valid container type")]
    InvalidContainerType(String),

    /// Parent machine does not support the requested container type
    #[error("machine {machine_id} cannot host {container_type} containers")]
    UnsupportedContainer {
        machine_id: String,
        container_type: String,
    },

    /// Entity exists but is not Alive
    #[error("{0} is not alive")]
    NotAlive(String),

    /// Model is Dying or Dead
    #[error("model {0:?} is no longer alive")]
    ModelNotAlive(String),

    /// Model is being migrated away
    #[error("model {0:?} is being migrated")]
    ModelMigrating(String),

    /// Entity already exists
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Caller supplied an invalid argument
    #[error("{0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The store session was closed underneath the caller
    #[error("document store closed")]
    StoreClosed,

    /// Any other store failure, propagated unchanged
    #[error(transparent)]
    Store(StoreError),
}

/// Result type for machine state operations
pub type StateResult<T> = Result<T, StateError>;

impl StateError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::NotFound(_))
    }

    pub fn is_not_provisioned(&self) -> bool {
        matches!(self, StateError::NotProvisioned(_))
    }

    pub fn is_has_assigned_units(&self) -> bool {
        matches!(self, StateError::HasAssignedUnits { .. })
    }

    pub fn is_has_containers(&self) -> bool {
        matches!(self, StateError::HasContainers { .. })
    }

    pub fn is_no_address(&self) -> bool {
        matches!(self, StateError::NoAddress(_))
    }

    /// True for both the general and the lifecycle contention errors
    pub fn is_excessive_contention(&self) -> bool {
        matches!(
            self,
            StateError::ExcessiveContention | StateError::LifecycleContention(_)
        )
    }
}

impl From<StoreError> for StateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Closed => StateError::StoreClosed,
            other => StateError::Store(other),
        }
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

fn describe_units(units: &[String]) -> String {
    let quoted: Vec<String> = units.iter().map(|u| format!("{u:?}")).collect();
    match quoted.len() {
        1 => format!("unit {}", quoted[0]),
        _ => format!("units {}", quoted.join(", ")),
    }
}
