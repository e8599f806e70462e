// Copyright (c) 2025 - Cowboy AI, Inc.
//! Machine lifecycle: destroy, ensure dead, force destroy, remove
//!
//! ```text
//!            destroy                ensure_dead            remove
//!   Alive ─────────────▶ Dying ─────────────────▶ Dead ─────────────▶ (gone)
//!     │                                            ▲
//!     └──────────────── ensure_dead ───────────────┘
//! ```
//!
//! Blockers are checked against fresh state on every attempt and asserted
//! again in the committed batch, so a unit or container added between read
//! and commit aborts the batch and the rebuild reports it.
//!
//! A principal unit blocks `destroy` only while both the unit and its
//! application are Alive. `ensure_dead` is blocked by any assigned
//! principal.

use tracing::info;

use super::{machine_tag, parent_id, ContainerRefsDoc, Machine, MachineDoc, MachineJob};
use crate::errors::{StateError, StateResult};
use crate::state::cleanup::{cleanup_op, CleanupKind};
use crate::state::subnets::IpAddressDoc;
use crate::state::units::{ApplicationDoc, UnitDoc};
use crate::state_machine::{Life, LifeCommand, LifeTransition, StateMachine};
use crate::store::{Assert, Collection, ConditionalOp, Filter, Update};
use crate::txn::TxnPlan;

impl Machine {
    /// Request destruction: Alive → Dying
    ///
    /// Idempotent once the machine is Dying or Dead.
    pub async fn destroy(&mut self) -> StateResult<()> {
        self.advance_lifecycle(Life::Dying).await
    }

    /// Alive or Dying → Dead
    pub async fn ensure_dead(&mut self) -> StateResult<()> {
        self.advance_lifecycle(Life::Dead).await
    }

    /// Mark the machine Dying regardless of assigned units and schedule a
    /// cleanup that tears the rest down
    pub async fn force_destroy(&mut self) -> StateResult<()> {
        if self.is_manager() {
            return Err(StateError::ManagerMachine);
        }
        {
            let this = &*self;
            this.st
                .runner()
                .run(this.st.config().txn_attempts, move |_| this.force_destroy_ops())
                .await?;
        }
        self.st.span().in_scope(|| info!(machine = %self.doc.id, "Machine force-destroyed"));
        self.doc.life = self.doc.life.max(Life::Dying);
        Ok(())
    }

    /// Delete a Dead machine and everything it owns
    ///
    /// IP address allocations owned by the machine are marked Dead and the
    /// machine is detached from its parent. Removing an already removed
    /// machine succeeds.
    pub async fn remove(&self) -> StateResult<()> {
        self.st
            .runner()
            .run(self.st.config().txn_attempts, |_| self.remove_ops())
            .await?;
        self.st.span().in_scope(|| info!(machine = %self.doc.id, "Machine removed"));
        Ok(())
    }

    async fn advance_lifecycle(&mut self, target: Life) -> StateResult<()> {
        let containers = self.child_containers().await?;
        if !containers.is_empty() {
            return Err(StateError::HasContainers {
                machine_id: self.doc.id.clone(),
                containers,
            });
        }

        let result = {
            let this = &*self;
            this.st
                .runner()
                .run(this.st.config().lifecycle_attempts, move |_| {
                    this.lifecycle_ops(target)
                })
                .await
        };
        match result {
            Ok(()) => {
                self.doc.life = self.doc.life.max(target);
                self.st.span()
                    .in_scope(|| info!(machine = %self.doc.id, life = %self.doc.life, "Machine lifecycle advanced"));
                Ok(())
            }
            Err(StateError::ExcessiveContention) => {
                Err(StateError::LifecycleContention(self.doc.id.clone()))
            }
            Err(err) => Err(err),
        }
    }

    async fn lifecycle_ops(&self, target: Life) -> StateResult<TxnPlan> {
        let Some(doc) = self.fresh_doc().await? else {
            return Ok(TxnPlan::Nothing);
        };
        let cmd = match target {
            Life::Dying => LifeCommand::Destroy,
            _ => LifeCommand::EnsureDead,
        };
        if !matches!(doc.life.transition(&cmd), Ok((_, LifeTransition::Advanced))) {
            return Ok(TxnPlan::Nothing);
        }
        if doc.is_manager() {
            return Err(StateError::RequiredByModel(doc.id));
        }
        if doc.has_vote {
            return Err(StateError::VotingMember(doc.id));
        }

        let refs = self
            .st
            .read::<ContainerRefsDoc>(Collection::ContainerRefs, &doc.id)
            .await?
            .map(|(refs, _)| refs);
        let containers = refs.as_ref().map(|r| r.children.clone()).unwrap_or_default();
        let no_children = ConditionalOp::check(
            Collection::ContainerRefs,
            doc.id.as_str(),
            match refs {
                Some(_) => Assert::Matches(Filter::empty("children")),
                None => Assert::Missing,
            },
        );

        if target == Life::Dying && containers.is_empty() && self.principals_can_die(&doc).await? {
            return Ok(TxnPlan::Apply(vec![
                ConditionalOp::update(
                    Collection::Machines,
                    doc.id.as_str(),
                    Update::new().set("life", Life::Dying),
                )
                .with_assert(Assert::Matches(Filter::And(vec![
                    Life::is_alive_filter(),
                    not_manager_filter(),
                    no_vote_filter(),
                    Filter::Or(vec![
                        Filter::eq("principals", doc.principals.clone()),
                        Filter::empty("principals"),
                    ]),
                ]))),
                no_children,
                cleanup_op(CleanupKind::DyingMachine, &doc.id)?,
            ]));
        }

        if !doc.principals.is_empty() {
            return Err(StateError::HasAssignedUnits {
                machine_id: doc.id,
                units: doc.principals,
            });
        }
        if !containers.is_empty() {
            return Err(StateError::HasContainers {
                machine_id: doc.id,
                containers,
            });
        }

        let life_filter = match target {
            Life::Dying => Life::is_alive_filter(),
            _ => Life::not_dead_filter(),
        };
        Ok(TxnPlan::Apply(vec![
            ConditionalOp::update(
                Collection::Machines,
                doc.id.as_str(),
                Update::new().set("life", target),
            )
            .with_assert(Assert::Matches(Filter::And(vec![
                life_filter,
                not_manager_filter(),
                no_vote_filter(),
                Filter::empty("principals"),
            ]))),
            no_children,
        ]))
    }

    /// Whether every assigned principal is already on its way out
    async fn principals_can_die(&self, doc: &MachineDoc) -> StateResult<bool> {
        for name in &doc.principals {
            let Some((unit, _)) = self.st.read::<UnitDoc>(Collection::Units, name).await? else {
                continue;
            };
            if unit.life != Life::Alive {
                continue;
            }
            let app = self
                .st
                .read::<ApplicationDoc>(Collection::Applications, &unit.application)
                .await?;
            if matches!(app, Some((app, _)) if app.life == Life::Alive) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn force_destroy_ops(&self) -> StateResult<TxnPlan> {
        let Some(doc) = self.fresh_doc().await? else {
            return Ok(TxnPlan::Nothing);
        };
        if doc.life == Life::Dead {
            return Ok(TxnPlan::Nothing);
        }
        if doc.is_manager() {
            return Err(StateError::ManagerMachine);
        }
        let machine_op = match doc.life {
            Life::Alive => ConditionalOp::update(
                Collection::Machines,
                doc.id.as_str(),
                Update::new().set("life", Life::Dying),
            )
            .with_assert(Assert::Matches(Filter::And(vec![
                Life::is_alive_filter(),
                not_manager_filter(),
            ]))),
            _ => ConditionalOp::check(
                Collection::Machines,
                doc.id.as_str(),
                Assert::Matches(Life::not_dead_filter()),
            ),
        };
        Ok(TxnPlan::Apply(vec![
            machine_op,
            cleanup_op(CleanupKind::ForceDestroyedMachine, &doc.id)?,
        ]))
    }

    async fn remove_ops(&self) -> StateResult<TxnPlan> {
        let Some(doc) = self.fresh_doc().await? else {
            return Ok(TxnPlan::Nothing);
        };
        if !doc.life.can_transition(&LifeCommand::Remove) {
            return Err(StateError::MachineNotDead(doc.id));
        }

        let id = doc.id.as_str();
        let mut ops = vec![
            ConditionalOp::remove(Collection::Machines, id)
                .with_assert(Assert::Matches(Life::is_dead_filter())),
            ConditionalOp::remove(Collection::InstanceData, id),
            ConditionalOp::remove(Collection::Constraints, id),
            ConditionalOp::remove(Collection::Statuses, id),
            ConditionalOp::remove(Collection::ContainerRefs, id),
            ConditionalOp::remove(Collection::Reboot, id),
            ConditionalOp::remove(Collection::SshHostKeys, machine_tag(id)),
        ];

        let allocated: Vec<IpAddressDoc> = self
            .st
            .read_all(
                Collection::IpAddresses,
                &Filter::And(vec![Filter::eq("machine_id", id), Life::not_dead_filter()]),
            )
            .await?;
        ops.extend(allocated.iter().map(|ip| {
            ConditionalOp::update(
                Collection::IpAddresses,
                ip.value.as_str(),
                Update::new().set("life", Life::Dead),
            )
            .with_assert(Assert::Matches(Life::not_dead_filter()))
        }));

        if let Some(parent) = parent_id(id) {
            ops.push(ConditionalOp::update(
                Collection::ContainerRefs,
                parent,
                Update::new().pull("children", id),
            ));
        }
        Ok(TxnPlan::Apply(ops))
    }

    /// Children recorded in the container refs; empty once removed
    async fn child_containers(&self) -> StateResult<Vec<String>> {
        Ok(self
            .st
            .read::<ContainerRefsDoc>(Collection::ContainerRefs, &self.doc.id)
            .await?
            .map(|(refs, _)| refs.children)
            .unwrap_or_default())
    }
}

fn not_manager_filter() -> Filter {
    Filter::negate(Filter::contains("jobs", MachineJob::ManageModel.as_str()))
}

fn no_vote_filter() -> Filter {
    Filter::ne("has_vote", true)
}
