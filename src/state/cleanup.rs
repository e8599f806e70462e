// Copyright (c) 2025 - Cowboy AI, Inc.
//! Deferred cleanup records
//!
//! Destroying a machine schedules follow-up work instead of doing it inline.
//! The records are written in the same transaction as the life change and
//! consumed by an external cleanup worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{to_body, State};
use crate::errors::StateResult;
use crate::store::{Collection, ConditionalOp, Filter};

/// Kind of follow-up work scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupKind {
    DyingMachine,
    ForceDestroyedMachine,
}

/// A scheduled cleanup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cleanup {
    pub id: String,
    pub kind: CleanupKind,
    /// Id of the entity the cleanup concerns
    pub prefix: String,
    pub created_at: DateTime<Utc>,
}

/// Operation inserting a fresh cleanup record
pub(crate) fn cleanup_op(kind: CleanupKind, prefix: &str) -> StateResult<ConditionalOp> {
    let cleanup = Cleanup {
        id: Uuid::now_v7().to_string(),
        kind,
        prefix: prefix.to_string(),
        created_at: Utc::now(),
    };
    Ok(ConditionalOp::insert(
        Collection::Cleanups,
        cleanup.id.clone(),
        to_body(&cleanup)?,
    ))
}

impl State {
    /// Cleanups not yet consumed, oldest first
    pub async fn cleanups(&self) -> StateResult<Vec<Cleanup>> {
        let mut cleanups: Vec<Cleanup> = self.read_all(Collection::Cleanups, &Filter::All).await?;
        cleanups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(cleanups)
    }
}
