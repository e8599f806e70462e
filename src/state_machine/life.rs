// Copyright (c) 2025 - Cowboy AI, Inc.
//! Entity Life State Machine
//!
//! Shared by machines, units, applications, IP addresses and the model.
//!
//! # States
//!
//! - Alive: normal operation
//! - Dying: destruction requested, dependants still winding down
//! - Dead: no longer in use, awaiting removal
//!
//! Removal is not a state: a removed entity has no document at all.
//!
//! # Inputs
//!
//! - Destroy: Alive → Dying (no-op when Dying or Dead)
//! - EnsureDead: Alive | Dying → Dead (no-op when Dead)
//! - Remove: Dead → removed (rejected otherwise)
//!
//! Life never moves backwards.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::{StateMachine, TransitionError, TransitionResult};
use crate::store::Filter;

/// Lifecycle stage of an entity
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Life {
    #[default]
    Alive,
    Dying,
    Dead,
}

impl Life {
    pub fn as_str(&self) -> &'static str {
        match self {
            Life::Alive => "alive",
            Life::Dying => "dying",
            Life::Dead => "dead",
        }
    }

    /// Store filter: `life == alive`
    pub fn is_alive_filter() -> Filter {
        Filter::eq("life", Life::Alive)
    }

    /// Store filter: `life != dead`
    pub fn not_dead_filter() -> Filter {
        Filter::ne("life", Life::Dead)
    }

    /// Store filter: `life == dead`
    pub fn is_dead_filter() -> Filter {
        Filter::eq("life", Life::Dead)
    }
}

impl fmt::Display for Life {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Life> for Value {
    fn from(life: Life) -> Self {
        Value::from(life.as_str())
    }
}

/// Lifecycle command (FSM input)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifeCommand {
    Destroy,
    EnsureDead,
    Remove,
}

impl LifeCommand {
    /// The life an entity holds once this command succeeds
    pub fn target(&self) -> Life {
        match self {
            LifeCommand::Destroy => Life::Dying,
            LifeCommand::EnsureDead | LifeCommand::Remove => Life::Dead,
        }
    }
}

/// Transition output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifeTransition {
    /// Already at or past the target; nothing to write
    Unchanged,
    /// Life field must advance
    Advanced,
    /// Document must be deleted
    Removed,
}

impl StateMachine for Life {
    type Input = LifeCommand;
    type Output = LifeTransition;

    fn transition(&self, input: &Self::Input) -> TransitionResult<(Self, Self::Output)> {
        use LifeCommand::*;

        match (self, input) {
            (Life::Alive, Destroy) => Ok((Life::Dying, LifeTransition::Advanced)),
            (Life::Dying | Life::Dead, Destroy) => Ok((*self, LifeTransition::Unchanged)),

            (Life::Alive | Life::Dying, EnsureDead) => Ok((Life::Dead, LifeTransition::Advanced)),
            (Life::Dead, EnsureDead) => Ok((Life::Dead, LifeTransition::Unchanged)),

            (Life::Dead, Remove) => Ok((Life::Dead, LifeTransition::Removed)),
            (_, Remove) => Err(TransitionError::PreconditionFailed(format!(
                "{} entity is not dead",
                self
            ))),
        }
    }

    fn valid_inputs(&self) -> Vec<Self::Input> {
        match self {
            Life::Alive | Life::Dying => vec![LifeCommand::Destroy, LifeCommand::EnsureDead],
            Life::Dead => vec![
                LifeCommand::Destroy,
                LifeCommand::EnsureDead,
                LifeCommand::Remove,
            ],
        }
    }
}
