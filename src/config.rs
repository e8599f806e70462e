// Copyright (c) 2025 - Cowboy AI, Inc.
//! Machine state configuration

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use tracing::debug;

use crate::errors::{StateError, StateResult};

/// Attempt budget for general mutations
pub const DEFAULT_TXN_ATTEMPTS: u32 = 100;

/// Attempt budget for lifecycle transitions
pub const DEFAULT_LIFECYCLE_ATTEMPTS: u32 = 3;

/// Capacity of the store change stream
pub const DEFAULT_WATCHER_BUFFER: usize = 1024;

/// Configuration for a [`State`](crate::state::State)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConfig {
    /// Name of the model this state serves
    pub model_name: String,

    /// Retry budget for general mutations
    pub txn_attempts: u32,

    /// Retry budget for destroy / ensure-dead / remove
    pub lifecycle_attempts: u32,

    /// Change stream capacity; slow watchers beyond this resync
    pub watcher_buffer: usize,

    /// Initial value of the model's `prefer_ipv6` setting
    pub prefer_ipv6: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            model_name: "default".to_string(),
            txn_attempts: DEFAULT_TXN_ATTEMPTS,
            lifecycle_attempts: DEFAULT_LIFECYCLE_ATTEMPTS,
            watcher_buffer: DEFAULT_WATCHER_BUFFER,
            prefer_ipv6: false,
        }
    }
}

impl StateConfig {
    /// Create a configuration for the named model
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Default::default()
        }
    }

    /// Set the general retry budget
    pub fn with_txn_attempts(mut self, attempts: u32) -> Self {
        self.txn_attempts = attempts;
        self
    }

    /// Set the lifecycle retry budget
    pub fn with_lifecycle_attempts(mut self, attempts: u32) -> Self {
        self.lifecycle_attempts = attempts;
        self
    }

    /// Set the change stream capacity
    pub fn with_watcher_buffer(mut self, buffer: usize) -> Self {
        self.watcher_buffer = buffer;
        self
    }

    /// Set the initial IPv6 preference
    pub fn with_prefer_ipv6(mut self, prefer_ipv6: bool) -> Self {
        self.prefer_ipv6 = prefer_ipv6;
        self
    }

    /// Build a configuration from `MACHINE_STATE_*` environment variables
    ///
    /// Unset variables keep their defaults:
    ///
    /// ```text
    /// MACHINE_STATE_MODEL               model name
    /// MACHINE_STATE_TXN_ATTEMPTS        general retry budget
    /// MACHINE_STATE_LIFECYCLE_ATTEMPTS  lifecycle retry budget
    /// MACHINE_STATE_WATCHER_BUFFER      change stream capacity
    /// MACHINE_STATE_PREFER_IPV6         true / false
    /// ```
    pub fn from_env() -> StateResult<Self> {
        let mut config = Self::default();
        if let Ok(name) = env::var("MACHINE_STATE_MODEL") {
            config.model_name = name;
        }
        if let Some(v) = parse_var("MACHINE_STATE_TXN_ATTEMPTS")? {
            config.txn_attempts = v;
        }
        if let Some(v) = parse_var("MACHINE_STATE_LIFECYCLE_ATTEMPTS")? {
            config.lifecycle_attempts = v;
        }
        if let Some(v) = parse_var("MACHINE_STATE_WATCHER_BUFFER")? {
            config.watcher_buffer = v;
        }
        if let Some(v) = parse_var("MACHINE_STATE_PREFER_IPV6")? {
            config.prefer_ipv6 = v;
        }
        config.validate()?;
        debug!("Loaded state configuration from environment: {:?}", config);
        Ok(config)
    }

    /// Reject configurations that could never make progress
    pub fn validate(&self) -> StateResult<()> {
        if self.model_name.is_empty() {
            return Err(StateError::Configuration("model name is empty".to_string()));
        }
        if self.txn_attempts == 0 || self.lifecycle_attempts == 0 {
            return Err(StateError::Configuration(
                "attempt budgets must be at least 1".to_string(),
            ));
        }
        if self.watcher_buffer == 0 {
            return Err(StateError::Configuration(
                "watcher buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str) -> StateResult<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| StateError::Configuration(format!("invalid value {raw:?} for {name}"))),
        Err(_) => Ok(None),
    }
}
