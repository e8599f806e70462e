// Copyright (c) 2025 - Cowboy AI, Inc.
//! Document Store Abstraction
//!
//! Conditional, all-or-nothing operation sets against named document
//! collections, with optimistic concurrency through per-document revision
//! numbers.
//!
//! # Architecture
//!
//! ```text
//! Machine / Unit / State ──▶ TxnRunner ──▶ DocumentStore::apply_ops
//!                                                │
//!                                                ▼
//!                                          change stream ──▶ watchers
//! ```
//!
//! # Store Requirements
//!
//! 1. **Atomicity**: every assertion in a batch is checked against the same
//!    state; if any fails nothing is applied and the batch reports
//!    [`StoreError::Aborted`]
//! 2. **Revisions**: each applied mutation increments the document revision
//! 3. **Change stream**: every committed document change is published as a
//!    [`Change`]; removals carry revision `-1`
//! 4. **Close**: closing the store terminates every derived change stream
//!
//! # Example
//!
//! ```rust
//! use cim_machine_state::store::{Collection, ConditionalOp, DocumentStore, MemoryStore};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let store = MemoryStore::new();
//! store
//!     .apply_ops(vec![ConditionalOp::insert(
//!         Collection::Machines,
//!         "0",
//!         json!({"life": "alive"}),
//!     )])
//!     .await
//!     .unwrap();
//!
//! let doc = store.get(Collection::Machines, "0").await.unwrap().unwrap();
//! assert_eq!(doc.revno, 1);
//! # });
//! ```

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::sync::broadcast;

use crate::errors::StoreError;

pub mod filter;
pub mod memory;
pub mod update;

pub use filter::Filter;
pub use memory::MemoryStore;
pub use update::Update;

/// Document collections known to the machine state core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Models,
    Machines,
    InstanceData,
    Constraints,
    Statuses,
    ContainerRefs,
    SshHostKeys,
    Reboot,
    Applications,
    Units,
    Subnets,
    IpAddresses,
    Sequences,
    Cleanups,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Models => "models",
            Collection::Machines => "machines",
            Collection::InstanceData => "instanceData",
            Collection::Constraints => "constraints",
            Collection::Statuses => "statuses",
            Collection::ContainerRefs => "containerRefs",
            Collection::SshHostKeys => "sshHostKeys",
            Collection::Reboot => "reboot",
            Collection::Applications => "applications",
            Collection::Units => "units",
            Collection::Subnets => "subnets",
            Collection::IpAddresses => "ipAddresses",
            Collection::Sequences => "sequences",
            Collection::Cleanups => "cleanups",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored document together with its revision
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub collection: Collection,
    pub id: String,
    pub revno: i64,
    pub body: Value,
}

impl Document {
    /// Decode the body into a typed document
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.body.clone()).map_err(|e| StoreError::Malformed {
            collection: self.collection.to_string(),
            id: self.id.clone(),
            reason: e.to_string(),
        })
    }
}

/// Precondition attached to a [`ConditionalOp`]
#[derive(Debug, Clone, PartialEq)]
pub enum Assert {
    /// No precondition
    None,
    /// The document must exist
    Exists,
    /// The document must not exist
    Missing,
    /// The document must exist at exactly this revision
    Revno(i64),
    /// The document must exist and match the filter
    Matches(Filter),
    /// Every listed assertion must hold
    All(Vec<Assert>),
}

impl Assert {
    /// Evaluate against the current revision and body of a document
    pub fn holds(&self, current: Option<(i64, &Value)>) -> bool {
        match self {
            Assert::None => true,
            Assert::Exists => current.is_some(),
            Assert::Missing => current.is_none(),
            Assert::Revno(expected) => current.map(|(revno, _)| revno) == Some(*expected),
            Assert::Matches(filter) => current.is_some_and(|(_, body)| filter.matches(body)),
            Assert::All(asserts) => asserts.iter().all(|a| a.holds(current)),
        }
    }
}

/// Mutation carried by a [`ConditionalOp`]
///
/// Updates and removals of a missing document are no-ops unless the
/// accompanying assertion requires existence. Inserting an existing
/// document aborts the batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    None,
    Insert(Value),
    Update(Update),
    Remove,
}

/// One assert-and-mutate step of an operation set
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalOp {
    pub collection: Collection,
    pub id: String,
    pub assert: Assert,
    pub mutation: Mutation,
}

impl ConditionalOp {
    /// Insert a new document; aborts if it already exists
    pub fn insert(collection: Collection, id: impl Into<String>, body: Value) -> Self {
        Self {
            collection,
            id: id.into(),
            assert: Assert::Missing,
            mutation: Mutation::Insert(body),
        }
    }

    /// Update a document if present
    pub fn update(collection: Collection, id: impl Into<String>, update: Update) -> Self {
        Self {
            collection,
            id: id.into(),
            assert: Assert::None,
            mutation: Mutation::Update(update),
        }
    }

    /// Remove a document if present
    pub fn remove(collection: Collection, id: impl Into<String>) -> Self {
        Self {
            collection,
            id: id.into(),
            assert: Assert::None,
            mutation: Mutation::Remove,
        }
    }

    /// Assert without mutating
    pub fn check(collection: Collection, id: impl Into<String>, assert: Assert) -> Self {
        Self {
            collection,
            id: id.into(),
            assert,
            mutation: Mutation::None,
        }
    }

    /// Replace the assertion
    pub fn with_assert(mut self, assert: Assert) -> Self {
        self.assert = assert;
        self
    }
}

/// A committed document change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub collection: Collection,
    pub id: String,
    /// Revision after the change, `-1` when removed
    pub revno: i64,
}

/// Raw change stream handed to watchers
pub type ChangeStream = broadcast::Receiver<Change>;

/// Conditional transactional document store
///
/// Implementations must honour the all-or-nothing contract of
/// [`apply_ops`](DocumentStore::apply_ops) and publish every committed
/// change to subscribers in commit order.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one document
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError>;

    /// Fetch every document in a collection that matches the filter
    async fn find(&self, collection: Collection, filter: &Filter)
        -> Result<Vec<Document>, StoreError>;

    /// Apply an operation set atomically
    async fn apply_ops(&self, ops: Vec<ConditionalOp>) -> Result<(), StoreError>;

    /// Subscribe to committed changes
    fn subscribe(&self) -> Result<ChangeStream, StoreError>;

    /// End the session; every change stream terminates
    async fn close(&self);

    /// Whether [`close`](DocumentStore::close) has been called
    fn is_closed(&self) -> bool;
}
