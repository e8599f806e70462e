// Copyright (c) 2025 - Cowboy AI, Inc.
//! Finite State Machine Abstractions
//!
//! Pure transition functions for entity lifecycles. The machine aggregate
//! asks a state machine which transition applies, then turns the answer into
//! a conditional operation set that re-asserts the same preconditions in the
//! store.
//!
//! # State Machine Type
//!
//! Both machines here are Mealy machines: the output depends on the current
//! state and the input.
//!
//! ```text
//! (State, Input) → (State, Output)
//! ```
//!
//! # Machines
//!
//! - [`life`]: Alive → Dying → Dead → removed
//! - [`reboot`]: reboot / shutdown decision over a container hierarchy

pub mod life;
pub mod reboot;

pub use life::{Life, LifeCommand, LifeTransition};
pub use reboot::{reboot_action, RebootAction};

/// Result of a state transition
pub type TransitionResult<S> = Result<S, TransitionError>;

/// Errors that can occur during state transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// Transition from current state to target state is not allowed
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Precondition not met for transition
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),
}

/// Trait for finite state machines
///
/// Implement this trait to define a state machine with typed states,
/// inputs, and outputs.
pub trait StateMachine: Sized + Clone {
    /// Input type that triggers transitions
    type Input;

    /// Output type produced by transitions (use () if none)
    type Output;

    /// Attempt to transition to a new state given an input
    ///
    /// # Returns
    /// - Ok((new_state, output)) if transition is valid
    /// - Err(TransitionError) if transition is invalid
    fn transition(&self, input: &Self::Input) -> TransitionResult<(Self, Self::Output)>;

    /// Check if a transition is valid without performing it
    fn can_transition(&self, input: &Self::Input) -> bool {
        self.transition(input).is_ok()
    }

    /// Get all valid inputs from current state (if enumerable)
    fn valid_inputs(&self) -> Vec<Self::Input>
    where
        Self::Input: Clone,
    {
        Vec::new()
    }
}
