// Copyright (c) 2025 - Cowboy AI, Inc.
//! Applications and units
//!
//! Only as much of the application model as the machine lifecycle depends
//! on: principal units are assigned to machines and recorded in the
//! machine's `principals` array; subordinate units follow their principal
//! onto its machine.
//!
//! ```text
//! Application ──add_unit──▶ Unit (principal) ──assign_to_machine──▶ Machine.principals
//!      │                          │
//!      └─add_subordinate_unit─────┴──▶ Unit (subordinate) ──▶ principal.subordinates
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use super::{to_body, State};
use crate::errors::{StateError, StateResult, StoreError};
use crate::machine::{Machine, MachineDoc, MachineJob};
use crate::state_machine::{Life, LifeCommand, LifeTransition, StateMachine};
use crate::status::StatusInfo;
use crate::store::{Assert, Collection, ConditionalOp, Filter, Update};
use crate::txn::TxnPlan;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ApplicationDoc {
    pub name: String,
    pub life: Life,
    #[serde(default)]
    pub subordinate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct UnitDoc {
    pub name: String,
    pub application: String,
    pub life: Life,
    /// Principal of a subordinate unit; empty for principals
    #[serde(default)]
    pub principal: String,
    #[serde(default)]
    pub subordinates: Vec<String>,
    #[serde(default)]
    pub machine_id: String,
    #[serde(default)]
    pub agent_status: Option<StatusInfo>,
}

impl UnitDoc {
    fn is_principal(&self) -> bool {
        self.principal.is_empty()
    }
}

/// Snapshot of an application
#[derive(Clone)]
pub struct Application {
    st: State,
    doc: ApplicationDoc,
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.doc.name)
            .field("life", &self.doc.life)
            .finish()
    }
}

/// Snapshot of a unit
#[derive(Clone)]
pub struct Unit {
    st: State,
    doc: UnitDoc,
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("name", &self.doc.name)
            .field("life", &self.doc.life)
            .field("machine_id", &self.doc.machine_id)
            .finish()
    }
}

impl State {
    /// Add an application whose units are assigned to machines directly
    pub async fn add_application(&self, name: &str) -> StateResult<Application> {
        self.insert_application(name, false).await
    }

    /// Add an application whose units only exist alongside a principal
    pub async fn add_subordinate_application(&self, name: &str) -> StateResult<Application> {
        self.insert_application(name, true).await
    }

    async fn insert_application(&self, name: &str, subordinate: bool) -> StateResult<Application> {
        if name.is_empty() || name.contains('/') {
            return Err(StateError::InvalidArgument(format!(
                "invalid application name {name:?}"
            )));
        }
        let doc = ApplicationDoc {
            name: name.to_string(),
            life: Life::Alive,
            subordinate,
        };
        let op = ConditionalOp::insert(Collection::Applications, name, to_body(&doc)?);
        match self.store().apply_ops(vec![op]).await {
            Ok(()) => {}
            Err(StoreError::Aborted) => {
                return Err(StateError::AlreadyExists(format!("application {name:?}")))
            }
            Err(err) => return Err(err.into()),
        }
        self.span().in_scope(|| info!(application = %name, subordinate, "Application added"));
        Ok(Application {
            st: self.clone(),
            doc,
        })
    }

    pub async fn application(&self, name: &str) -> StateResult<Application> {
        match self.read::<ApplicationDoc>(Collection::Applications, name).await? {
            Some((doc, _)) => Ok(Application {
                st: self.clone(),
                doc,
            }),
            None => Err(StateError::NotFound(format!("application {name:?}"))),
        }
    }

    pub async fn unit(&self, name: &str) -> StateResult<Unit> {
        match self.read::<UnitDoc>(Collection::Units, name).await? {
            Some((doc, _)) => Ok(Unit {
                st: self.clone(),
                doc,
            }),
            None => Err(StateError::NotFound(format!("unit {name:?}"))),
        }
    }

    /// Principal units assigned to a machine and their subordinates
    pub async fn units_for(&self, machine_id: &str) -> StateResult<Vec<Unit>> {
        let principals: Vec<UnitDoc> = self
            .read_all(
                Collection::Units,
                &Filter::And(vec![Filter::eq("machine_id", machine_id), Filter::eq("principal", "")]),
            )
            .await?;
        let subordinates: Vec<String> = principals
            .iter()
            .flat_map(|p| p.subordinates.iter().cloned())
            .collect();
        let subordinates: Vec<UnitDoc> = self
            .read_all(Collection::Units, &Filter::is_in("name", subordinates))
            .await?;
        Ok(principals
            .into_iter()
            .chain(subordinates)
            .map(|doc| Unit {
                st: self.clone(),
                doc,
            })
            .collect())
    }
}

impl Application {
    pub fn name(&self) -> &str {
        &self.doc.name
    }

    pub fn life(&self) -> Life {
        self.doc.life
    }

    pub fn is_subordinate(&self) -> bool {
        self.doc.subordinate
    }

    pub async fn refresh(&mut self) -> StateResult<()> {
        let fresh = self.st.application(&self.doc.name).await?;
        self.doc = fresh.doc;
        Ok(())
    }

    /// Add a principal unit named `<application>/<n>`
    pub async fn add_unit(&self) -> StateResult<Unit> {
        if self.doc.subordinate {
            return Err(StateError::InvalidArgument(format!(
                "cannot directly add units to subordinate application {:?}",
                self.doc.name
            )));
        }
        let doc = self.new_unit_doc("").await?;
        let op = ConditionalOp::insert(Collection::Units, doc.name.as_str(), to_body(&doc)?);
        self.st
            .store()
            .apply_ops(vec![self.alive_op(), op])
            .await
            .map_err(|err| self.insert_failed(err))?;
        debug!(unit = %doc.name, "Unit added");
        Ok(Unit {
            st: self.st.clone(),
            doc,
        })
    }

    /// Add a unit of this subordinate application next to `principal`
    pub async fn add_subordinate_unit(&self, principal: &Unit) -> StateResult<Unit> {
        if !self.doc.subordinate {
            return Err(StateError::InvalidArgument(format!(
                "application {:?} is not a subordinate",
                self.doc.name
            )));
        }
        if !principal.doc.is_principal() {
            return Err(StateError::InvalidArgument(format!(
                "unit {:?} is not a principal",
                principal.doc.name
            )));
        }
        let Some((current, _)) = self
            .st
            .read::<UnitDoc>(Collection::Units, &principal.doc.name)
            .await?
        else {
            return Err(StateError::NotFound(format!("unit {:?}", principal.doc.name)));
        };
        if current.life != Life::Alive {
            return Err(StateError::NotAlive(format!("unit {:?}", current.name)));
        }

        let mut doc = self.new_unit_doc(&current.name).await?;
        doc.machine_id = current.machine_id.clone();
        let ops = vec![
            self.alive_op(),
            ConditionalOp::insert(Collection::Units, doc.name.as_str(), to_body(&doc)?),
            ConditionalOp::update(
                Collection::Units,
                current.name.as_str(),
                Update::new().add_to_set("subordinates", doc.name.as_str()),
            )
            .with_assert(Assert::Matches(Filter::And(vec![
                Life::is_alive_filter(),
                Filter::eq("machine_id", current.machine_id.as_str()),
            ]))),
        ];
        self.st
            .store()
            .apply_ops(ops)
            .await
            .map_err(|err| self.insert_failed(err))?;
        debug!(unit = %doc.name, principal = %current.name, "Subordinate unit added");
        Ok(Unit {
            st: self.st.clone(),
            doc,
        })
    }

    /// Alive → Dying; units of a Dying application no longer hold machines
    pub async fn destroy(&mut self) -> StateResult<()> {
        let name = self.doc.name.as_str();
        let st = &self.st;
        st.runner()
            .run(st.config().txn_attempts, move |_| async move {
                match st.read::<ApplicationDoc>(Collection::Applications, name).await? {
                    Some((doc, _)) if doc.life == Life::Alive => {
                        Ok(TxnPlan::Apply(vec![ConditionalOp::update(
                            Collection::Applications,
                            name,
                            Update::new().set("life", Life::Dying),
                        )
                        .with_assert(Assert::Matches(Life::is_alive_filter()))]))
                    }
                    _ => Ok(TxnPlan::Nothing),
                }
            })
            .await?;
        self.st.span().in_scope(|| info!(application = %self.doc.name, "Application destroyed"));
        self.doc.life = self.doc.life.max(Life::Dying);
        Ok(())
    }

    async fn new_unit_doc(&self, principal: &str) -> StateResult<UnitDoc> {
        let n = self
            .st
            .next_sequence(&format!("application-{}", self.doc.name))
            .await?;
        Ok(UnitDoc {
            name: format!("{}/{}", self.doc.name, n),
            application: self.doc.name.clone(),
            life: Life::Alive,
            principal: principal.to_string(),
            subordinates: Vec::new(),
            machine_id: String::new(),
            agent_status: None,
        })
    }

    fn alive_op(&self) -> ConditionalOp {
        ConditionalOp::check(
            Collection::Applications,
            self.doc.name.as_str(),
            Assert::Matches(Life::is_alive_filter()),
        )
    }

    fn insert_failed(&self, err: StoreError) -> StateError {
        match err {
            StoreError::Aborted => StateError::NotAlive(format!("application {:?}", self.doc.name)),
            other => other.into(),
        }
    }
}

impl Unit {
    pub fn name(&self) -> &str {
        &self.doc.name
    }

    pub fn application_name(&self) -> &str {
        &self.doc.application
    }

    pub fn life(&self) -> Life {
        self.doc.life
    }

    pub fn is_principal(&self) -> bool {
        self.doc.is_principal()
    }

    /// Principal of a subordinate unit
    pub fn principal_name(&self) -> Option<&str> {
        (!self.doc.principal.is_empty()).then_some(self.doc.principal.as_str())
    }

    pub fn subordinate_names(&self) -> &[String] {
        &self.doc.subordinates
    }

    /// Machine the unit is deployed to, if any
    pub fn machine_id(&self) -> Option<&str> {
        (!self.doc.machine_id.is_empty()).then_some(self.doc.machine_id.as_str())
    }

    pub fn agent_status(&self) -> Option<&StatusInfo> {
        self.doc.agent_status.as_ref()
    }

    pub async fn refresh(&mut self) -> StateResult<()> {
        let fresh = self.st.unit(&self.doc.name).await?;
        self.doc = fresh.doc;
        Ok(())
    }

    /// Assign the principal unit to a machine
    ///
    /// Assigning to the machine the unit already occupies is a no-op. The
    /// machine becomes permanently unclean.
    pub async fn assign_to_machine(&mut self, machine: &mut Machine) -> StateResult<()> {
        let name = self.doc.name.as_str();
        let machine_id = machine.id().to_string();
        {
            let machine_id = machine_id.as_str();
            let st = &self.st;
            st.runner()
                .run(st.config().txn_attempts, move |_| assign_ops(st, name, machine_id))
                .await?;
        }

        self.st.span()
            .in_scope(|| info!(unit = %self.doc.name, machine = %machine_id, "Unit assigned"));
        self.doc.machine_id = machine_id;
        machine.note_unit_assigned(&self.doc.name);
        Ok(())
    }

    /// Take the principal unit off its machine; no-op when unassigned
    pub async fn unassign_from_machine(&mut self) -> StateResult<()> {
        let name = self.doc.name.as_str();
        let st = &self.st;
        st.runner()
            .run(st.config().txn_attempts, move |_| unassign_ops(st, name))
            .await?;
        self.doc.machine_id.clear();
        Ok(())
    }

    /// Alive → Dying
    pub async fn destroy(&mut self) -> StateResult<()> {
        self.advance(LifeCommand::Destroy).await
    }

    /// Alive or Dying → Dead
    pub async fn ensure_dead(&mut self) -> StateResult<()> {
        self.advance(LifeCommand::EnsureDead).await
    }

    async fn advance(&mut self, cmd: LifeCommand) -> StateResult<()> {
        let name = self.doc.name.as_str();
        let st = &self.st;
        st.runner()
            .run(st.config().txn_attempts, move |_| async move {
                let Some((doc, revno)) = st.read::<UnitDoc>(Collection::Units, name).await? else {
                    return Ok(TxnPlan::Nothing);
                };
                let (next, transition) = doc
                    .life
                    .transition(&cmd)
                    .map_err(|e| StateError::InvalidArgument(format!("unit {name:?}: {e}")))?;
                if transition != LifeTransition::Advanced {
                    return Ok(TxnPlan::Nothing);
                }
                Ok(TxnPlan::Apply(vec![ConditionalOp::update(
                    Collection::Units,
                    name,
                    Update::new().set("life", next),
                )
                .with_assert(Assert::Revno(revno))]))
            })
            .await?;
        self.doc.life = self.doc.life.max(cmd.target());
        Ok(())
    }

    /// Delete a Dead unit and detach it from its machine or principal
    pub async fn remove(&self) -> StateResult<()> {
        let name = self.doc.name.as_str();
        let st = &self.st;
        st.runner()
            .run(st.config().txn_attempts, move |_| async move {
                let Some((doc, _)) = st.read::<UnitDoc>(Collection::Units, name).await? else {
                    return Ok(TxnPlan::Nothing);
                };
                if doc.life != Life::Dead {
                    return Err(StateError::InvalidArgument(format!(
                        "cannot remove unit {name:?}: unit is not dead"
                    )));
                }
                let mut ops = vec![ConditionalOp::remove(Collection::Units, name)
                    .with_assert(Assert::Matches(Life::is_dead_filter()))];
                if !doc.is_principal() {
                    ops.push(ConditionalOp::update(
                        Collection::Units,
                        doc.principal.as_str(),
                        Update::new().pull("subordinates", name),
                    ));
                } else if !doc.machine_id.is_empty() {
                    ops.push(ConditionalOp::update(
                        Collection::Machines,
                        doc.machine_id.as_str(),
                        Update::new().pull("principals", name),
                    ));
                }
                Ok(TxnPlan::Apply(ops))
            })
            .await?;
        debug!(unit = %self.doc.name, "Unit removed");
        Ok(())
    }

    /// Record the unit agent status
    pub async fn set_agent_status(&mut self, info: StatusInfo) -> StateResult<()> {
        let name = self.doc.name.as_str();
        let body = &to_body(&info)?;
        let st = &self.st;
        st.runner()
            .run(st.config().txn_attempts, move |_| async move {
                match st.read::<UnitDoc>(Collection::Units, name).await? {
                    Some((doc, _)) if doc.life != Life::Dead => {}
                    _ => return Err(StateError::NotFound(format!("unit {name:?} (dead or removed)"))),
                }
                Ok(TxnPlan::Apply(vec![ConditionalOp::update(
                    Collection::Units,
                    name,
                    Update::new().set("agent_status", body.clone()),
                )
                .with_assert(Assert::Matches(Life::not_dead_filter()))]))
            })
            .await?;
        self.doc.agent_status = Some(info);
        Ok(())
    }
}

async fn assign_ops(st: &State, name: &str, machine_id: &str) -> StateResult<TxnPlan> {
    let cannot = |reason: &str| StateError::CannotAssign {
        unit: name.to_string(),
        machine_id: machine_id.to_string(),
        reason: reason.to_string(),
    };
    let Some((unit, _)) = st.read::<UnitDoc>(Collection::Units, name).await? else {
        return Err(cannot("unit not found"));
    };
    if !unit.is_principal() {
        return Err(cannot("unit is a subordinate"));
    }
    if unit.life != Life::Alive {
        return Err(cannot("unit is not alive"));
    }
    if unit.machine_id == machine_id {
        return Ok(TxnPlan::Nothing);
    }
    if !unit.machine_id.is_empty() {
        return Err(cannot("unit is already assigned to a machine"));
    }

    let Some((machine, _)) = st
        .read::<MachineDoc>(Collection::Machines, machine_id)
        .await?
    else {
        return Err(cannot("machine not found"));
    };
    if machine.life != Life::Alive {
        return Err(cannot("machine is not alive"));
    }
    if !machine.jobs.contains(&MachineJob::HostUnits) {
        return Err(cannot("machine cannot host units"));
    }

    let mut ops = vec![
        ConditionalOp::update(
            Collection::Units,
            name,
            Update::new().set("machine_id", machine_id),
        )
        .with_assert(Assert::Matches(Filter::And(vec![
            Life::is_alive_filter(),
            Filter::eq("machine_id", ""),
        ]))),
        ConditionalOp::update(
            Collection::Machines,
            machine_id,
            Update::new()
                .add_to_set("principals", name)
                .set("clean", false),
        )
        .with_assert(Assert::Matches(Filter::And(vec![
            Life::is_alive_filter(),
            Filter::contains("jobs", MachineJob::HostUnits.as_str()),
        ]))),
    ];
    ops.extend(unit.subordinates.iter().map(|sub| {
        ConditionalOp::update(
            Collection::Units,
            sub.as_str(),
            Update::new().set("machine_id", machine_id),
        )
    }));
    Ok(TxnPlan::Apply(ops))
}

async fn unassign_ops(st: &State, name: &str) -> StateResult<TxnPlan> {
    let Some((unit, revno)) = st.read::<UnitDoc>(Collection::Units, name).await? else {
        return Err(StateError::NotFound(format!("unit {name:?}")));
    };
    if unit.machine_id.is_empty() {
        return Ok(TxnPlan::Nothing);
    }
    let mut ops = vec![
        ConditionalOp::update(
            Collection::Units,
            name,
            Update::new().set("machine_id", ""),
        )
        .with_assert(Assert::Revno(revno)),
        ConditionalOp::update(
            Collection::Machines,
            unit.machine_id.as_str(),
            Update::new().pull("principals", name),
        ),
    ];
    ops.extend(unit.subordinates.iter().map(|sub| {
        ConditionalOp::update(
            Collection::Units,
            sub.as_str(),
            Update::new().set("machine_id", ""),
        )
    }));
    Ok(TxnPlan::Apply(ops))
}
