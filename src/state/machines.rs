// Copyright (c) 2025 - Cowboy AI, Inc.
//! Adding and looking up machines
//!
//! Top-level machines take ids from the `machine` sequence. Containers take
//! ids of the form `<parent>/<type>/<n>` from a sequence per parent and
//! type. Every new machine is created in one batch together with its owned
//! records:
//!
//! ```text
//! model check ─┬─ machines/<id>        (life alive, clean)
//!              ├─ statuses/<id>        (pending)
//!              ├─ constraints/<id>     (template or model constraints)
//!              ├─ containerRefs/<id>   (no children)
//!              ├─ instanceData/<id>    (only when provisioned)
//!              └─ containerRefs/<parent> += id   (containers only)
//! ```

use tracing::info;

use super::{to_body, State};
use crate::constraints::Constraints;
use crate::errors::{StateError, StateResult};
use crate::instance::ContainerType;
use crate::machine::addresses::seed_addresses;
use crate::machine::provisioning::{ConstraintsDoc, InstanceDataDoc};
use crate::machine::{ContainerRefsDoc, Machine, MachineDoc, MachineJob, MachineTemplate};
use crate::state_machine::Life;
use crate::status::{Status, StatusInfo};
use crate::store::{Assert, Collection, ConditionalOp, Filter, Update};
use crate::txn::TxnPlan;

impl State {
    /// Add a top-level machine with the given series and jobs
    pub async fn add_machine(&self, series: &str, jobs: &[MachineJob]) -> StateResult<Machine> {
        self.add_one_machine(MachineTemplate::new(series, jobs)).await
    }

    /// Add a top-level machine described by a template
    pub async fn add_one_machine(&self, template: MachineTemplate) -> StateResult<Machine> {
        template.validate()?;
        let id = self.next_sequence("machine").await?.to_string();
        let doc = self.new_machine_doc(&id, ContainerType::None, &template).await?;

        {
            let (doc, template) = (&doc, &template);
            self.runner()
                .run(self.config().txn_attempts, move |_| async move {
                    self.check_model_active().await?;
                    let mut ops = vec![State::model_active_op()];
                    ops.extend(self.new_machine_ops(doc, template).await?);
                    Ok(TxnPlan::Apply(ops))
                })
                .await?;
        }

        self.span().in_scope(|| info!(machine = %id, jobs = ?doc.jobs, "Machine added"));
        Ok(Machine::new(self.clone(), doc, 1))
    }

    /// Add a container of the given type inside an existing machine
    ///
    /// The parent must be Alive and, once its supported container types are
    /// known, support `container_type`.
    pub async fn add_machine_inside_machine(
        &self,
        template: MachineTemplate,
        parent_id: &str,
        container_type: ContainerType,
    ) -> StateResult<Machine> {
        if container_type == ContainerType::None {
            return Err(StateError::InvalidContainerType(container_type.as_str().to_string()));
        }
        template.validate()?;
        let n = self
            .next_sequence(&format!("machine{parent_id}{container_type}Container"))
            .await?;
        let id = format!("{parent_id}/{container_type}/{n}");
        let doc = self.new_machine_doc(&id, container_type, &template).await?;

        {
            let (doc, template) = (&doc, &template);
            self.runner()
                .run(self.config().txn_attempts, move |_| async move {
                    self.check_model_active().await?;
                    self.check_parent(parent_id, container_type).await?;
                    let mut ops = vec![
                        State::model_active_op(),
                        ConditionalOp::check(
                            Collection::Machines,
                            parent_id,
                            Assert::Matches(Filter::And(vec![
                                Life::is_alive_filter(),
                                Filter::Or(vec![
                                    Filter::eq("supported_containers_known", false),
                                    Filter::contains("supported_containers", container_type.as_str()),
                                ]),
                            ])),
                        ),
                        ConditionalOp::update(
                            Collection::ContainerRefs,
                            parent_id,
                            Update::new().add_to_set("children", doc.id.as_str()),
                        )
                        .with_assert(Assert::Exists),
                    ];
                    ops.extend(self.new_machine_ops(doc, template).await?);
                    Ok(TxnPlan::Apply(ops))
                })
                .await?;
        }

        self.span().in_scope(|| info!(machine = %id, parent = %parent_id, "Container added"));
        Ok(Machine::new(self.clone(), doc, 1))
    }

    /// Look up a machine by id
    pub async fn machine(&self, id: &str) -> StateResult<Machine> {
        match self.read::<MachineDoc>(Collection::Machines, id).await? {
            Some((doc, revno)) => Ok(Machine::new(self.clone(), doc, revno)),
            None => Err(StateError::NotFound(format!("machine {id}"))),
        }
    }

    /// Every machine in the model, ordered by id
    pub async fn all_machines(&self) -> StateResult<Vec<Machine>> {
        let docs = self.store().find(Collection::Machines, &Filter::All).await?;
        let mut machines = docs
            .iter()
            .map(|doc| Ok(Machine::new(self.clone(), doc.decode()?, doc.revno)))
            .collect::<StateResult<Vec<_>>>()?;
        machines.sort_by(|a, b| id_key(a.id()).cmp(&id_key(b.id())));
        Ok(machines)
    }

    async fn check_parent(&self, parent_id: &str, container_type: ContainerType) -> StateResult<()> {
        let Some((parent, _)) = self.read::<MachineDoc>(Collection::Machines, parent_id).await? else {
            return Err(StateError::NotFound(format!("machine {parent_id}")));
        };
        if parent.life != Life::Alive {
            return Err(StateError::NotAlive(format!("machine {parent_id}")));
        }
        if parent.supported_containers_known && !parent.supported_containers.contains(&container_type) {
            return Err(StateError::UnsupportedContainer {
                machine_id: parent_id.to_string(),
                container_type: container_type.to_string(),
            });
        }
        Ok(())
    }

    async fn new_machine_doc(
        &self,
        id: &str,
        container_type: ContainerType,
        template: &MachineTemplate,
    ) -> StateResult<MachineDoc> {
        let prefer_ipv6 = self.model().await?.prefer_ipv6();
        let mut doc = MachineDoc {
            id: id.to_string(),
            series: template.series.clone(),
            container_type,
            jobs: template.jobs.clone(),
            life: Life::Alive,
            nonce: template.nonce.clone(),
            instance_id: template.instance_id.clone(),
            principals: Vec::new(),
            clean: true,
            supported_containers: Vec::new(),
            supported_containers_known: false,
            has_vote: false,
            wants_vote: false,
            password_hash: String::new(),
            provider_addresses: Vec::new(),
            machine_addresses: Vec::new(),
            preferred_public_address: None,
            preferred_private_address: None,
            agent_version: None,
            placement: template.placement.clone(),
        };
        seed_addresses(&mut doc, template.addresses.clone(), prefer_ipv6);
        Ok(doc)
    }

    /// Inserts for the machine document and every record it owns
    async fn new_machine_ops(
        &self,
        doc: &MachineDoc,
        template: &MachineTemplate,
    ) -> StateResult<Vec<ConditionalOp>> {
        let constraints: Constraints = if template.constraints.is_empty() {
            self.model().await?.constraints().clone()
        } else {
            template.constraints.clone()
        };
        let id = doc.id.as_str();
        let mut ops = vec![
            ConditionalOp::insert(Collection::Machines, id, to_body(doc)?),
            ConditionalOp::insert(
                Collection::Statuses,
                id,
                to_body(&StatusInfo::new(Status::Pending, ""))?,
            ),
            ConditionalOp::insert(
                Collection::Constraints,
                id,
                to_body(&ConstraintsDoc { constraints })?,
            ),
            ConditionalOp::insert(
                Collection::ContainerRefs,
                id,
                to_body(&ContainerRefsDoc {
                    id: id.to_string(),
                    children: Vec::new(),
                })?,
            ),
        ];
        if template.is_provisioned() {
            ops.push(ConditionalOp::insert(
                Collection::InstanceData,
                id,
                to_body(&InstanceDataDoc::new(id, &template.instance_id, template.hardware.clone()))?,
            ));
        }
        Ok(ops)
    }
}

/// Sort key treating numeric id segments as numbers
fn id_key(id: &str) -> Vec<(u64, &str)> {
    id.split('/')
        .map(|part| (part.parse().unwrap_or(u64::MAX), part))
        .collect()
}
