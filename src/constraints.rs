// Copyright (c) 2025 - Cowboy AI, Inc.
//! Machine constraints
//!
//! Resource requirements a provisioner must satisfy. Written as
//! space-separated `key=value` pairs:
//!
//! ```text
//! mem=4G cpu-cores=2 tags=ssd,fast zones=a,b
//! ```
//!
//! Sizes (`mem`, `root-disk`) are stored in megabytes and accept the
//! suffixes `M`, `G`, `T` and `P`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::instance::ContainerType;

pub const ARCH: &str = "arch";
pub const CONTAINER: &str = "container";
pub const CPU_CORES: &str = "cpu-cores";
pub const CPU_POWER: &str = "cpu-power";
pub const INSTANCE_TYPE: &str = "instance-type";
pub const MEM: &str = "mem";
pub const ROOT_DISK: &str = "root-disk";
pub const TAGS: &str = "tags";
pub const ZONES: &str = "zones";

/// Constraint parsing and validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstraintsError {
    #[error("malformed constraint {0:?}")]
    Malformed(String),

    #[error("unknown constraint {0:?}")]
    Unknown(String),

    #[error("bad {attr} constraint: {reason}")]
    BadValue { attr: &'static str, reason: String },

    #[error("bad {0} constraint: already set")]
    Duplicate(&'static str),

    #[error("ambiguous constraints: {attr:?} overlaps with {other:?}")]
    Ambiguous { attr: String, other: String },
}

/// Resource requirements; unset fields are unconstrained
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_power: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_disk: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zones: Option<Vec<String>>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self == &Constraints::default()
    }

    /// Names of the attributes that are set, in sorted order
    pub fn attributes(&self) -> Vec<&'static str> {
        let mut attrs = Vec::new();
        if self.arch.is_some() {
            attrs.push(ARCH);
        }
        if self.container.is_some() {
            attrs.push(CONTAINER);
        }
        if self.cpu_cores.is_some() {
            attrs.push(CPU_CORES);
        }
        if self.cpu_power.is_some() {
            attrs.push(CPU_POWER);
        }
        if self.instance_type.is_some() {
            attrs.push(INSTANCE_TYPE);
        }
        if self.mem.is_some() {
            attrs.push(MEM);
        }
        if self.root_disk.is_some() {
            attrs.push(ROOT_DISK);
        }
        if self.tags.is_some() {
            attrs.push(TAGS);
        }
        if self.zones.is_some() {
            attrs.push(ZONES);
        }
        attrs
    }

    fn set_attr(&mut self, attr: &str, value: &str) -> Result<(), ConstraintsError> {
        match attr {
            ARCH => set_once(&mut self.arch, ARCH, non_empty(value)),
            CONTAINER => {
                let ct = match value {
                    "" => None,
                    v => Some(v.parse::<ContainerType>().map_err(|e| ConstraintsError::BadValue {
                        attr: CONTAINER,
                        reason: e.to_string(),
                    })?),
                };
                set_once(&mut self.container, CONTAINER, ct)
            }
            CPU_CORES => set_once(&mut self.cpu_cores, CPU_CORES, parse_count(CPU_CORES, value)?),
            CPU_POWER => set_once(&mut self.cpu_power, CPU_POWER, parse_count(CPU_POWER, value)?),
            INSTANCE_TYPE => set_once(&mut self.instance_type, INSTANCE_TYPE, non_empty(value)),
            MEM => set_once(&mut self.mem, MEM, parse_size(MEM, value)?),
            ROOT_DISK => set_once(&mut self.root_disk, ROOT_DISK, parse_size(ROOT_DISK, value)?),
            TAGS => set_once(&mut self.tags, TAGS, Some(parse_list(value))),
            ZONES => set_once(&mut self.zones, ZONES, Some(parse_list(value))),
            other => Err(ConstraintsError::Unknown(other.to_string())),
        }
    }
}

fn set_once<T>(slot: &mut Option<T>, attr: &'static str, value: Option<T>) -> Result<(), ConstraintsError> {
    if slot.is_some() {
        return Err(ConstraintsError::Duplicate(attr));
    }
    *slot = value;
    Ok(())
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_count(attr: &'static str, value: &str) -> Result<Option<u64>, ConstraintsError> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ConstraintsError::BadValue {
            attr,
            reason: format!("must be a non-negative integer, got {value:?}"),
        })
}

fn parse_size(attr: &'static str, value: &str) -> Result<Option<u64>, ConstraintsError> {
    if value.is_empty() {
        return Ok(None);
    }
    let (number, multiplier) = match value.char_indices().last() {
        Some((i, 'M')) => (&value[..i], 1.0),
        Some((i, 'G')) => (&value[..i], 1024.0),
        Some((i, 'T')) => (&value[..i], 1024.0 * 1024.0),
        Some((i, 'P')) => (&value[..i], 1024.0 * 1024.0 * 1024.0),
        _ => (value, 1.0),
    };
    let bad = || ConstraintsError::BadValue {
        attr,
        reason: format!("must be a non-negative float with optional M/G/T/P suffix, got {value:?}"),
    };
    let parsed: f64 = number.parse().map_err(|_| bad())?;
    if !parsed.is_finite() || parsed < 0.0 {
        return Err(bad());
    }
    Ok(Some((parsed * multiplier).ceil() as u64))
}

impl FromStr for Constraints {
    type Err = ConstraintsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut cons = Constraints::default();
        for word in s.split_whitespace() {
            let (attr, value) = word
                .split_once('=')
                .ok_or_else(|| ConstraintsError::Malformed(word.to_string()))?;
            cons.set_attr(attr, value)?;
        }
        Ok(cons)
    }
}

impl fmt::Display for Constraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(arch) = &self.arch {
            parts.push(format!("{ARCH}={arch}"));
        }
        if let Some(container) = &self.container {
            parts.push(format!("{CONTAINER}={container}"));
        }
        if let Some(cores) = self.cpu_cores {
            parts.push(format!("{CPU_CORES}={cores}"));
        }
        if let Some(power) = self.cpu_power {
            parts.push(format!("{CPU_POWER}={power}"));
        }
        if let Some(it) = &self.instance_type {
            parts.push(format!("{INSTANCE_TYPE}={it}"));
        }
        if let Some(mem) = self.mem {
            parts.push(format!("{MEM}={mem}M"));
        }
        if let Some(disk) = self.root_disk {
            parts.push(format!("{ROOT_DISK}={disk}M"));
        }
        if let Some(tags) = &self.tags {
            parts.push(format!("{TAGS}={}", tags.join(",")));
        }
        if let Some(zones) = &self.zones {
            parts.push(format!("{ZONES}={}", zones.join(",")));
        }
        f.write_str(&parts.join(" "))
    }
}

/// Provider policy for which constraints may be combined or honoured
#[derive(Debug, Clone, Default)]
pub struct ConstraintsValidator {
    conflicts: Vec<(BTreeSet<String>, BTreeSet<String>)>,
    unsupported: BTreeSet<String>,
}

impl ConstraintsValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attributes in `first` may not be combined with attributes in `second`
    pub fn register_conflicts(mut self, first: &[&str], second: &[&str]) -> Self {
        self.conflicts.push((
            first.iter().map(|s| s.to_string()).collect(),
            second.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    /// Attributes the provider ignores
    pub fn register_unsupported(mut self, attrs: &[&str]) -> Self {
        self.unsupported.extend(attrs.iter().map(|s| s.to_string()));
        self
    }

    /// Reject conflicting attributes; return the unsupported ones that are set
    pub fn validate(&self, cons: &Constraints) -> Result<Vec<String>, ConstraintsError> {
        let attrs = cons.attributes();
        for attr in &attrs {
            for (first, second) in &self.conflicts {
                let others = if first.contains(*attr) {
                    second
                } else if second.contains(*attr) {
                    first
                } else {
                    continue;
                };
                if let Some(other) = attrs.iter().find(|a| others.contains(**a)) {
                    return Err(ConstraintsError::Ambiguous {
                        attr: attr.to_string(),
                        other: other.to_string(),
                    });
                }
            }
        }
        Ok(attrs
            .into_iter()
            .filter(|a| self.unsupported.contains(*a))
            .map(str::to_string)
            .collect())
    }
}
