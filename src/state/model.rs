// Copyright (c) 2025 - Cowboy AI, Inc.
//! Model document
//!
//! A single document per store carries the model's life, migration mode,
//! default constraints and address-family preference. Machine creation is
//! gated on it: only an Alive model that is not migrating accepts new
//! machines.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{to_body, State};
use crate::constraints::Constraints;
use crate::errors::{StateError, StateResult};
use crate::state_machine::Life;
use crate::store::{Assert, Collection, ConditionalOp, Filter, Update};
use crate::txn::TxnPlan;

pub(crate) const MODEL_DOC_ID: &str = "model";

/// Whether the model is being moved to another controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationMode {
    #[default]
    None,
    Exporting,
    Importing,
}

impl MigrationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationMode::None => "none",
            MigrationMode::Exporting => "exporting",
            MigrationMode::Importing => "importing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ModelDoc {
    pub name: String,
    pub life: Life,
    #[serde(default)]
    pub migration_mode: MigrationMode,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub prefer_ipv6: bool,
}

impl ModelDoc {
    pub fn new(name: &str, prefer_ipv6: bool) -> Self {
        Self {
            name: name.to_string(),
            life: Life::Alive,
            migration_mode: MigrationMode::None,
            constraints: Constraints::default(),
            prefer_ipv6,
        }
    }
}

/// Snapshot of the model document
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    doc: ModelDoc,
}

impl Model {
    pub fn name(&self) -> &str {
        &self.doc.name
    }

    pub fn life(&self) -> Life {
        self.doc.life
    }

    pub fn migration_mode(&self) -> MigrationMode {
        self.doc.migration_mode
    }

    /// Constraints new machines start from
    pub fn constraints(&self) -> &Constraints {
        &self.doc.constraints
    }

    pub fn prefer_ipv6(&self) -> bool {
        self.doc.prefer_ipv6
    }
}

impl State {
    /// Current model snapshot
    pub async fn model(&self) -> StateResult<Model> {
        match self.read::<ModelDoc>(Collection::Models, MODEL_DOC_ID).await? {
            Some((doc, _)) => Ok(Model { doc }),
            None => Err(StateError::NotFound(format!(
                "model {:?}",
                self.config().model_name
            ))),
        }
    }

    /// Start tearing the model down; no new machines are accepted afterwards
    pub async fn destroy_model(&self) -> StateResult<()> {
        self.runner()
            .run(self.config().txn_attempts, |_| self.destroy_model_ops())
            .await?;
        self.span().in_scope(|| info!("Model {:?} is dying", self.config().model_name));
        Ok(())
    }

    async fn destroy_model_ops(&self) -> StateResult<TxnPlan> {
        let model = self.model().await?;
        if model.life() != Life::Alive {
            return Ok(TxnPlan::Nothing);
        }
        Ok(TxnPlan::Apply(vec![ConditionalOp::update(
            Collection::Models,
            MODEL_DOC_ID,
            Update::new().set("life", Life::Dying),
        )
        .with_assert(Assert::Matches(Life::is_alive_filter()))]))
    }

    pub async fn set_migration_mode(&self, mode: MigrationMode) -> StateResult<()> {
        self.update_model(Update::new().set("migration_mode", mode.as_str()))
            .await
    }

    /// Constraints copied into every machine added afterwards
    pub async fn set_model_constraints(&self, cons: Constraints) -> StateResult<()> {
        let unsupported = self
            .constraints_validator()
            .validate(&cons)
            .map_err(|e| StateError::Constraints(e.to_string()))?;
        if !unsupported.is_empty() {
            self.span().in_scope(|| {
                tracing::warn!(
                    "setting model constraints: unsupported constraints: {}",
                    unsupported.join(",")
                )
            });
        }
        self.update_model(Update::new().set("constraints", to_body(&cons)?))
            .await
    }

    pub async fn set_prefer_ipv6(&self, prefer_ipv6: bool) -> StateResult<()> {
        self.update_model(Update::new().set("prefer_ipv6", prefer_ipv6))
            .await
    }

    async fn update_model(&self, update: Update) -> StateResult<()> {
        let op = ConditionalOp::update(Collection::Models, MODEL_DOC_ID, update)
            .with_assert(Assert::Exists);
        self.runner()
            .run(self.config().txn_attempts, |_| {
                let op = op.clone();
                async move { Ok(TxnPlan::Apply(vec![op])) }
            })
            .await
    }

    /// Operation asserting the model accepts new machines
    pub(crate) fn model_active_op() -> ConditionalOp {
        ConditionalOp::check(
            Collection::Models,
            MODEL_DOC_ID,
            Assert::Matches(Filter::And(vec![
                Life::is_alive_filter(),
                Filter::eq("migration_mode", MigrationMode::None.as_str()),
            ])),
        )
    }

    /// Explain why the model refuses new machines, if it does
    pub(crate) async fn check_model_active(&self) -> StateResult<()> {
        let model = self.model().await?;
        if model.life() != Life::Alive {
            return Err(StateError::ModelNotAlive(model.name().to_string()));
        }
        if model.migration_mode() != MigrationMode::None {
            return Err(StateError::ModelMigrating(model.name().to_string()));
        }
        Ok(())
    }
}
