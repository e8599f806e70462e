// Copyright (c) 2025 - Cowboy AI, Inc.
//! Reboot flags
//!
//! A flag is a document in the reboot collection keyed by machine id; its
//! presence means a reboot was requested. Raising a flag requires a machine
//! that is not Dead. Lowering one always succeeds.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{not_found, root_id, Machine};
use crate::errors::StateResult;
use crate::state::to_body;
use crate::state_machine::{reboot_action, Life, RebootAction};
use crate::store::{Assert, Collection, ConditionalOp};
use crate::txn::TxnPlan;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RebootDoc {
    machine_id: String,
}

impl Machine {
    /// Raise or lower the reboot flag
    pub async fn set_reboot_flag(&self, flag: bool) -> StateResult<()> {
        let id = self.doc.id.as_str();
        if !flag {
            return self
                .st
                .runner()
                .run(self.st.config().txn_attempts, move |_| async move {
                    Ok(TxnPlan::Apply(vec![ConditionalOp::remove(Collection::Reboot, id)]))
                })
                .await;
        }

        self.st
            .runner()
            .run(self.st.config().txn_attempts, move |_| self.raise_reboot_ops())
            .await?;
        self.st.span().in_scope(|| info!(machine = %id, "Reboot requested"));
        Ok(())
    }

    async fn raise_reboot_ops(&self) -> StateResult<TxnPlan> {
        match self.fresh_doc().await? {
            Some(doc) if doc.life != Life::Dead => {}
            _ => return Err(not_found(&self.doc.id)),
        }
        let id = self.doc.id.as_str();
        if self.st.store().get(Collection::Reboot, id).await?.is_some() {
            return Ok(TxnPlan::Nothing);
        }
        Ok(TxnPlan::Apply(vec![
            ConditionalOp::check(
                Collection::Machines,
                id,
                Assert::Matches(Life::not_dead_filter()),
            ),
            ConditionalOp::insert(
                Collection::Reboot,
                id,
                to_body(&RebootDoc {
                    machine_id: id.to_string(),
                })?,
            ),
        ]))
    }

    /// Whether a reboot has been requested for this machine
    pub async fn get_reboot_flag(&self) -> StateResult<bool> {
        flagged(self, &self.doc.id).await
    }

    /// What the agent on this machine should do about pending reboots
    ///
    /// A flag on the outermost host shuts every container inside it down;
    /// otherwise only a machine's own flag makes it reboot.
    pub async fn should_reboot_or_shutdown(&self) -> StateResult<RebootAction> {
        let own = flagged(self, &self.doc.id).await?;
        let root = match self.parent_id() {
            Some(_) => Some(flagged(self, root_id(&self.doc.id)).await?),
            None => None,
        };
        Ok(reboot_action(own, root))
    }
}

async fn flagged(m: &Machine, id: &str) -> StateResult<bool> {
    Ok(m.st.store().get(Collection::Reboot, id).await?.is_some())
}
