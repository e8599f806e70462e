// Copyright (c) 2025 - Cowboy AI, Inc.
//! Agent and instance status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Status values reported for machines, units and instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Pending,
    Allocating,
    Started,
    Running,
    Idle,
    Executing,
    Stopped,
    Down,
    Error,
    ProvisioningError,
    Unknown,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Allocating => "allocating",
            Status::Started => "started",
            Status::Running => "running",
            Status::Idle => "idle",
            Status::Executing => "executing",
            Status::Stopped => "stopped",
            Status::Down => "down",
            Status::Error => "error",
            Status::ProvisioningError => "provisioning-error",
            Status::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded status with message and structured data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub status: Status,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
    pub since: DateTime<Utc>,
}

impl StatusInfo {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            data: BTreeMap::new(),
            since: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: BTreeMap<String, Value>) -> Self {
        self.data = data;
        self
    }
}
