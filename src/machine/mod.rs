// Copyright (c) 2025 - Cowboy AI, Inc.
//! Machine Aggregate
//!
//! A [`Machine`] is a snapshot of one machine document plus the handle
//! needed to mutate it. Accessors read the snapshot; mutations go through
//! the transaction runner and update the snapshot on success. Other writers
//! become visible through [`Machine::refresh`].
//!
//! ```text
//!                  ┌──────────── Machine ────────────┐
//!                  │ lifecycle   destroy / remove    │
//!   callers ──────▶│ addresses   provider / machine  │──▶ TxnRunner ──▶ store
//!                  │ provisioning, constraints       │
//!                  │ containers, reboot, watchers    │
//!                  └─────────────────────────────────┘
//! ```
//!
//! Owned records (instance data, constraints, status, container refs, SSH
//! host keys, reboot flag) live in their own collections under the machine
//! id and are deleted explicitly by [`Machine::remove`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::debug;

use crate::errors::{StateError, StateResult};
use crate::instance::ContainerType;
use crate::network::{Address, PreferredAddress};
use crate::state::{to_body, State, Unit};
use crate::state_machine::Life;
use crate::status::{Status, StatusInfo};
use crate::store::{Assert, Collection, ConditionalOp, Update};
use crate::txn::TxnPlan;
use crate::watcher::{NotifyWatcher, UnitsWatcher};

pub mod addresses;
pub mod containers;
pub mod lifecycle;
pub mod provisioning;
pub mod reboot;
mod template;

pub use template::MachineTemplate;

const MIN_PASSWORD_LENGTH: usize = 18;

/// Role a machine plays in the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MachineJob {
    HostUnits,
    ManageModel,
}

impl MachineJob {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineJob::HostUnits => "host-units",
            MachineJob::ManageModel => "manage-model",
        }
    }
}

impl fmt::Display for MachineJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted machine document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct MachineDoc {
    pub id: String,
    pub series: String,
    #[serde(default)]
    pub container_type: ContainerType,
    pub jobs: Vec<MachineJob>,
    pub life: Life,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub principals: Vec<String>,
    #[serde(default)]
    pub clean: bool,
    #[serde(default)]
    pub supported_containers: Vec<ContainerType>,
    #[serde(default)]
    pub supported_containers_known: bool,
    #[serde(default)]
    pub has_vote: bool,
    #[serde(default)]
    pub wants_vote: bool,
    #[serde(default)]
    pub password_hash: String,
    #[serde(default)]
    pub provider_addresses: Vec<Address>,
    #[serde(default)]
    pub machine_addresses: Vec<Address>,
    #[serde(default)]
    pub preferred_public_address: Option<PreferredAddress>,
    #[serde(default)]
    pub preferred_private_address: Option<PreferredAddress>,
    #[serde(default)]
    pub agent_version: Option<String>,
    #[serde(default)]
    pub placement: String,
}

impl MachineDoc {
    pub fn is_manager(&self) -> bool {
        self.jobs.contains(&MachineJob::ManageModel)
    }
}

/// Snapshot of a machine with the operations that change it
#[derive(Clone)]
pub struct Machine {
    st: State,
    doc: MachineDoc,
    revno: i64,
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("id", &self.doc.id)
            .field("life", &self.doc.life)
            .field("revno", &self.revno)
            .finish()
    }
}

impl Machine {
    pub(crate) fn new(st: State, doc: MachineDoc, revno: i64) -> Self {
        Self { st, doc, revno }
    }

    pub fn id(&self) -> &str {
        &self.doc.id
    }

    /// Entity tag, e.g. `machine-1-lxc-0`
    pub fn tag(&self) -> String {
        machine_tag(&self.doc.id)
    }

    pub fn series(&self) -> &str {
        &self.doc.series
    }

    pub fn jobs(&self) -> &[MachineJob] {
        &self.doc.jobs
    }

    pub fn life(&self) -> Life {
        self.doc.life
    }

    pub fn is_manager(&self) -> bool {
        self.doc.is_manager()
    }

    /// Manually provisioned machines carry a `manual:` nonce
    pub fn is_manual(&self) -> bool {
        self.doc.nonce.starts_with("manual:")
    }

    pub fn is_container(&self) -> bool {
        self.doc.container_type != ContainerType::None
    }

    pub fn container_type(&self) -> ContainerType {
        self.doc.container_type
    }

    /// Id of the hosting machine, `None` for top-level machines
    pub fn parent_id(&self) -> Option<&str> {
        parent_id(&self.doc.id)
    }

    pub fn placement(&self) -> &str {
        &self.doc.placement
    }

    /// True until a unit has ever been assigned
    pub fn clean(&self) -> bool {
        self.doc.clean
    }

    /// Names of the principal units assigned to the machine
    pub fn principal_units(&self) -> &[String] {
        &self.doc.principals
    }

    pub fn has_vote(&self) -> bool {
        self.doc.has_vote
    }

    pub fn wants_vote(&self) -> bool {
        self.doc.wants_vote
    }

    pub fn agent_version(&self) -> Option<&str> {
        self.doc.agent_version.as_deref()
    }

    /// Revision of the snapshot
    pub fn revno(&self) -> i64 {
        self.revno
    }

    /// Replace the snapshot with the stored document
    pub async fn refresh(&mut self) -> StateResult<()> {
        match self.st.read::<MachineDoc>(Collection::Machines, &self.doc.id).await? {
            Some((doc, revno)) => {
                self.doc = doc;
                self.revno = revno;
                Ok(())
            }
            None => Err(not_found(&self.doc.id)),
        }
    }

    /// Ids of the containers recorded directly inside this machine
    pub async fn containers(&self) -> StateResult<Vec<String>> {
        match self
            .st
            .read::<ContainerRefsDoc>(Collection::ContainerRefs, &self.doc.id)
            .await?
        {
            Some((refs, _)) => Ok(refs.children),
            None => Err(StateError::NotFound(format!("container info for machine {}", self.doc.id))),
        }
    }

    /// Every unit deployed to the machine: principals and their subordinates
    pub async fn units(&self) -> StateResult<Vec<Unit>> {
        self.st.units_for(&self.doc.id).await
    }

    pub async fn set_has_vote(&mut self, has_vote: bool) -> StateResult<()> {
        self.update_not_dead(Update::new().set("has_vote", has_vote)).await?;
        self.doc.has_vote = has_vote;
        Ok(())
    }

    pub async fn set_wants_vote(&mut self, wants_vote: bool) -> StateResult<()> {
        self.update_not_dead(Update::new().set("wants_vote", wants_vote)).await?;
        self.doc.wants_vote = wants_vote;
        Ok(())
    }

    pub async fn set_agent_version(&mut self, version: &str) -> StateResult<()> {
        self.update_not_dead(Update::new().set("agent_version", version)).await?;
        self.doc.agent_version = Some(version.to_string());
        Ok(())
    }

    /// Store the hash of a new agent password
    pub async fn set_password(&mut self, password: &str) -> StateResult<()> {
        if password.len() < MIN_PASSWORD_LENGTH {
            return Err(StateError::InvalidArgument(format!(
                "password is only {} bytes long, and is not a valid agent password",
                password.len()
            )));
        }
        let hash = password_hash(password);
        self.update_not_dead(Update::new().set("password_hash", hash.as_str()))
            .await?;
        self.doc.password_hash = hash;
        Ok(())
    }

    pub fn password_valid(&self, password: &str) -> bool {
        !self.doc.password_hash.is_empty() && password_hash(password) == self.doc.password_hash
    }

    /// Record the machine agent status
    pub async fn set_status(&self, info: StatusInfo) -> StateResult<()> {
        if info.status == Status::Error && info.message.is_empty() {
            return Err(StateError::InvalidArgument(format!(
                "cannot set status {:?} without info",
                info.status.as_str()
            )));
        }
        let id = self.doc.id.as_str();
        let update = &replace_fields(&to_body(&info)?);
        self.st
            .runner()
            .run(self.st.config().txn_attempts, move |_| async move {
                if self.st.store().get(Collection::Statuses, id).await?.is_none() {
                    return Err(not_found(id));
                }
                Ok(TxnPlan::Apply(vec![ConditionalOp::update(
                    Collection::Statuses,
                    id,
                    update.clone(),
                )
                .with_assert(Assert::Exists)]))
            })
            .await
    }

    pub async fn status(&self) -> StateResult<StatusInfo> {
        match self.st.read::<StatusInfo>(Collection::Statuses, &self.doc.id).await? {
            Some((info, _)) => Ok(info),
            None => Err(StateError::NotFound(format!("status for machine {}", self.doc.id))),
        }
    }

    /// Coalescing notifications for changes to this machine's document
    pub fn watch(&self) -> StateResult<NotifyWatcher> {
        NotifyWatcher::for_document(&self.st, Collection::Machines, &self.doc.id)
    }

    /// Life changes of the principal units assigned to this machine
    pub fn watch_principal_units(&self) -> StateResult<UnitsWatcher> {
        UnitsWatcher::new(&self.st, &self.doc.id, false)
    }

    /// Life changes of principal units and their subordinates
    pub fn watch_units(&self) -> StateResult<UnitsWatcher> {
        UnitsWatcher::new(&self.st, &self.doc.id, true)
    }

    pub(crate) fn note_unit_assigned(&mut self, unit: &str) {
        if !self.doc.principals.iter().any(|p| p == unit) {
            self.doc.principals.push(unit.to_string());
        }
        self.doc.clean = false;
    }

    async fn update_not_dead(&self, update: Update) -> StateResult<()> {
        let id = self.doc.id.as_str();
        let update = &update;
        self.st
            .runner()
            .run(self.st.config().txn_attempts, move |_| async move {
                match self.st.read::<MachineDoc>(Collection::Machines, id).await? {
                    Some((doc, _)) if doc.life != Life::Dead => {
                        Ok(TxnPlan::Apply(vec![ConditionalOp::update(
                            Collection::Machines,
                            id,
                            update.clone(),
                        )
                        .with_assert(Assert::Matches(Life::not_dead_filter()))]))
                    }
                    _ => Err(StateError::NotFound(format!("machine {id} (dead or removed)"))),
                }
            })
            .await?;
        debug!(machine = %id, "Updated machine document");
        Ok(())
    }
}

/// Children recorded for a machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct ContainerRefsDoc {
    pub id: String,
    #[serde(default)]
    pub children: Vec<String>,
}

/// `machine-` followed by the id with `/` replaced by `-`
pub fn machine_tag(id: &str) -> String {
    format!("machine-{}", id.replace('/', "-"))
}

/// Everything before the last `/<type>/<n>` of a container id
pub fn parent_id(id: &str) -> Option<&str> {
    let mut parts = id.rsplitn(3, '/');
    let _seq = parts.next()?;
    let _kind = parts.next()?;
    parts.next()
}

/// First segment of a machine id
pub fn root_id(id: &str) -> &str {
    id.split('/').next().unwrap_or(id)
}

pub(crate) fn not_found(id: &str) -> StateError {
    StateError::NotFound(format!("machine {id}"))
}

pub(crate) fn password_hash(password: &str) -> String {
    STANDARD.encode(Sha256::digest(password.as_bytes()))
}

/// An update setting every top-level field of `body`
pub(crate) fn replace_fields(body: &serde_json::Value) -> Update {
    let mut update = Update::new();
    if let Some(fields) = body.as_object() {
        for (field, value) in fields {
            update = update.set(field.as_str(), value.clone());
        }
    }
    update
}
