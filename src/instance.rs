// Copyright (c) 2025 - Cowboy AI, Inc.
//! Provisioned instance descriptors
//!
//! Container types, provider instance ids and hardware characteristics as
//! recorded once a machine has been provisioned.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::StateError;

/// Kind of container a machine is, or can host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    /// Not a container
    #[default]
    None,
    Lxd,
    Lxc,
    Kvm,
}

impl ContainerType {
    /// Types a machine can actually host
    pub const HOSTABLE: [ContainerType; 3] = [ContainerType::Lxd, ContainerType::Lxc, ContainerType::Kvm];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerType::None => "none",
            ContainerType::Lxd => "lxd",
            ContainerType::Lxc => "lxc",
            ContainerType::Kvm => "kvm",
        }
    }
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerType {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "" => Ok(ContainerType::None),
            "lxd" => Ok(ContainerType::Lxd),
            "lxc" => Ok(ContainerType::Lxc),
            "kvm" => Ok(ContainerType::Kvm),
            other => Err(StateError::InvalidContainerType(other.to_string())),
        }
    }
}

/// Provider-assigned instance identifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Hardware of a provisioned instance; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HardwareCharacteristics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    /// Megabytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem: Option<u64>,
    /// Megabytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_disk: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_power: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
}

impl fmt::Display for HardwareCharacteristics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(arch) = &self.arch {
            parts.push(format!("arch={arch}"));
        }
        if let Some(cores) = self.cpu_cores {
            parts.push(format!("cpu-cores={cores}"));
        }
        if let Some(power) = self.cpu_power {
            parts.push(format!("cpu-power={power}"));
        }
        if let Some(mem) = self.mem {
            parts.push(format!("mem={mem}M"));
        }
        if let Some(disk) = self.root_disk {
            parts.push(format!("root-disk={disk}M"));
        }
        if let Some(tags) = &self.tags {
            parts.push(format!("tags={}", tags.join(",")));
        }
        if let Some(zone) = &self.availability_zone {
            parts.push(format!("availability-zone={zone}"));
        }
        f.write_str(&parts.join(" "))
    }
}
