// Copyright (c) 2025 - Cowboy AI, Inc.
//! Provisioning identity and constraints
//!
//! Instance id and nonce are recorded together, exactly once, and only while
//! the machine is Alive. Constraints may change until then and are frozen
//! afterwards.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{Machine, MachineDoc};
use crate::constraints::Constraints;
use crate::errors::{StateError, StateResult};
use crate::instance::{HardwareCharacteristics, InstanceId};
use crate::network::Address;
use crate::state::to_body;
use crate::state_machine::Life;
use crate::status::StatusInfo;
use crate::store::{Assert, Collection, ConditionalOp, Filter, Update};
use crate::txn::TxnPlan;

/// Hardware and instance status of a provisioned machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct InstanceDataDoc {
    pub machine_id: String,
    pub instance_id: String,
    #[serde(flatten)]
    pub hardware: HardwareCharacteristics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_status: Option<StatusInfo>,
}

impl InstanceDataDoc {
    pub fn new(machine_id: &str, instance_id: &str, hardware: Option<HardwareCharacteristics>) -> Self {
        Self {
            machine_id: machine_id.to_string(),
            instance_id: instance_id.to_string(),
            hardware: hardware.unwrap_or_default(),
            instance_status: None,
        }
    }
}

/// Constraints owned by one machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct ConstraintsDoc {
    #[serde(default)]
    pub constraints: Constraints,
}

const NOT_FOUND_OR_NOT_ALIVE: &str = "not found or not alive";
const EMPTY_IDENTITY: &str = "instance id and nonce cannot be empty";

impl Machine {
    /// Provider instance id; `NotProvisioned` until set
    pub fn instance_id(&self) -> StateResult<InstanceId> {
        if self.doc.instance_id.is_empty() {
            return Err(StateError::NotProvisioned(self.doc.id.clone()));
        }
        Ok(InstanceId::new(self.doc.instance_id.as_str()))
    }

    /// True when provisioned with exactly this nonce
    pub fn check_provisioned(&self, nonce: &str) -> bool {
        !self.doc.instance_id.is_empty() && self.doc.nonce == nonce
    }

    /// Record the provider instance. Fails when either value is empty, when
    /// the machine is not Alive, or when it has already been provisioned.
    pub async fn set_provisioned(
        &mut self,
        instance_id: &str,
        nonce: &str,
        hardware: Option<HardwareCharacteristics>,
    ) -> StateResult<()> {
        let id = self.doc.id.clone();
        let failed = |reason: &str| StateError::Provisioning {
            machine_id: id.clone(),
            reason: reason.to_string(),
        };
        if instance_id.is_empty() || nonce.is_empty() {
            return Err(failed(EMPTY_IDENTITY));
        }

        let instance_data = to_body(&InstanceDataDoc::new(&id, instance_id, hardware))?;
        let this = &*self;
        let instance_data = &instance_data;
        this.st
            .runner()
            .run(this.st.config().txn_attempts, move |_| async move {
                let doc = this.fresh_doc().await?;
                match doc {
                    Some(doc) if doc.life == Life::Alive && doc.nonce.is_empty() => {}
                    Some(doc) if doc.life == Life::Alive => return Err(failed("already set")),
                    _ => return Err(failed(NOT_FOUND_OR_NOT_ALIVE)),
                }
                Ok(TxnPlan::Apply(vec![
                    ConditionalOp::update(
                        Collection::Machines,
                        this.doc.id.as_str(),
                        Update::new()
                            .set("instance_id", instance_id)
                            .set("nonce", nonce),
                    )
                    .with_assert(Assert::Matches(Filter::And(vec![
                        Life::is_alive_filter(),
                        Filter::eq("nonce", ""),
                    ]))),
                    ConditionalOp::insert(
                        Collection::InstanceData,
                        this.doc.id.as_str(),
                        instance_data.clone(),
                    ),
                ]))
            })
            .await?;

        self.st.span()
            .in_scope(|| info!(machine = %self.doc.id, instance_id, "Machine provisioned"));
        self.doc.instance_id = instance_id.to_string();
        self.doc.nonce = nonce.to_string();
        Ok(())
    }

    /// Record the provider addresses, then provision, as two commits
    ///
    /// Provisioning lands last, so a failed address update leaves the
    /// machine unprovisioned.
    pub async fn set_instance_info(
        &mut self,
        instance_id: &str,
        nonce: &str,
        hardware: Option<HardwareCharacteristics>,
        addresses: Vec<Address>,
    ) -> StateResult<()> {
        if instance_id.is_empty() || nonce.is_empty() {
            return Err(StateError::Provisioning {
                machine_id: self.doc.id.clone(),
                reason: EMPTY_IDENTITY.to_string(),
            });
        }
        self.set_provider_addresses(addresses).await?;
        self.set_provisioned(instance_id, nonce, hardware).await
    }

    /// Hardware recorded at provisioning; `NotFound` before that
    pub async fn hardware_characteristics(&self) -> StateResult<HardwareCharacteristics> {
        Ok(self.instance_data().await?.hardware)
    }

    /// Zone the instance was started in; empty when unknown
    pub async fn availability_zone(&self) -> StateResult<String> {
        Ok(self
            .instance_data()
            .await?
            .hardware
            .availability_zone
            .unwrap_or_default())
    }

    /// Record the provider's view of the instance
    pub async fn set_instance_status(&self, info: StatusInfo) -> StateResult<()> {
        let id = self.doc.id.as_str();
        let status = &to_body(&info)?;
        self.st
            .runner()
            .run(self.st.config().txn_attempts, move |_| async move {
                if self.st.store().get(Collection::InstanceData, id).await?.is_none() {
                    return Err(StateError::NotProvisioned(id.to_string()));
                }
                Ok(TxnPlan::Apply(vec![ConditionalOp::update(
                    Collection::InstanceData,
                    id,
                    Update::new().set("instance_status", status.clone()),
                )
                .with_assert(Assert::Exists)]))
            })
            .await
    }

    /// Provider status of the instance; `NotFound` when never reported
    pub async fn instance_status(&self) -> StateResult<StatusInfo> {
        self.instance_data()
            .await?
            .instance_status
            .ok_or_else(|| StateError::NotFound(format!("instance status for machine {}", self.doc.id)))
    }

    /// Replace the machine's constraints; only while Alive and unprovisioned
    pub async fn set_constraints(&self, cons: Constraints) -> StateResult<()> {
        let unsupported = self
            .st
            .constraints_validator()
            .validate(&cons)
            .map_err(|e| StateError::Constraints(e.to_string()))?;
        if !unsupported.is_empty() {
            self.st.span().in_scope(|| {
                warn!(
                    "setting constraints on machine {:?}: unsupported constraints: {}",
                    self.doc.id,
                    unsupported.join(",")
                )
            });
        }

        let body = &to_body(&cons)?;
        self.st
            .runner()
            .run(self.st.config().txn_attempts, move |_| async move {
                match self.fresh_doc().await? {
                    Some(doc) if doc.life != Life::Alive => {
                        Err(StateError::Constraints(NOT_FOUND_OR_NOT_ALIVE.to_string()))
                    }
                    None => Err(StateError::Constraints(NOT_FOUND_OR_NOT_ALIVE.to_string())),
                    Some(doc) if !doc.nonce.is_empty() => Err(StateError::Constraints(
                        "machine is already provisioned".to_string(),
                    )),
                    Some(_) => Ok(TxnPlan::Apply(vec![
                        ConditionalOp::check(
                            Collection::Machines,
                            self.doc.id.as_str(),
                            Assert::Matches(Filter::And(vec![
                                Life::is_alive_filter(),
                                Filter::eq("nonce", ""),
                            ])),
                        ),
                        ConditionalOp::update(
                            Collection::Constraints,
                            self.doc.id.as_str(),
                            Update::new().set("constraints", body.clone()),
                        )
                        .with_assert(Assert::Exists),
                    ])),
                }
            })
            .await
    }

    /// Constraints recorded for the machine; `NotFound` once removed
    pub async fn constraints(&self) -> StateResult<Constraints> {
        match self
            .st
            .read::<ConstraintsDoc>(Collection::Constraints, &self.doc.id)
            .await?
        {
            Some((doc, _)) => Ok(doc.constraints),
            None => Err(StateError::NotFound("constraints".to_string())),
        }
    }

    pub(crate) async fn fresh_doc(&self) -> StateResult<Option<MachineDoc>> {
        Ok(self
            .st
            .read::<MachineDoc>(Collection::Machines, &self.doc.id)
            .await?
            .map(|(doc, _)| doc))
    }

    async fn instance_data(&self) -> StateResult<InstanceDataDoc> {
        match self
            .st
            .read::<InstanceDataDoc>(Collection::InstanceData, &self.doc.id)
            .await?
        {
            Some((doc, _)) => Ok(doc),
            None => Err(StateError::NotFound(format!("instance data for machine {}", self.doc.id))),
        }
    }
}
