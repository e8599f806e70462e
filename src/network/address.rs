// Copyright (c) 2025 - Cowboy AI, Inc.
//! Address Resolution
//!
//! Addresses are classified by type and scope on construction, then ranked
//! by a fixed preference order:
//!
//! ```text
//! public IP  >  hostname  >  cloud-local  >  machine-local  >  link-local
//! ```
//!
//! Inside a tier IPv4 precedes IPv6 unless the model prefers IPv6. Sorting
//! is stable, so equal-rank addresses keep their input order.
//!
//! Preferred public and private addresses are persisted alongside the
//! origin list they were picked from, and only replaced when
//! [`maybe_get_new_address`] says so. That keeps them stable across
//! re-submissions of equivalent lists.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Address value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    Ipv4,
    Ipv6,
    Hostname,
}

/// Reachability scope of an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    Unknown,
    Public,
    CloudLocal,
    MachineLocal,
    LinkLocal,
}

/// A network address with derived type and scope
///
/// # Examples
///
/// ```rust
/// use cim_machine_state::network::{Address, AddressType, Scope};
///
/// let addr = Address::new("10.0.0.1");
/// assert_eq!(addr.address_type, AddressType::Ipv4);
/// assert_eq!(addr.scope, Scope::CloudLocal);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub value: String,
    #[serde(rename = "type")]
    pub address_type: AddressType,
    pub scope: Scope,
}

impl Address {
    /// Classify a raw address value
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let (address_type, scope) = match value.parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) => (AddressType::Ipv4, ipv4_scope(&ip)),
            Ok(IpAddr::V6(ip)) => (AddressType::Ipv6, ipv6_scope(&ip)),
            Err(_) if value == "localhost" => (AddressType::Hostname, Scope::MachineLocal),
            Err(_) => (AddressType::Hostname, Scope::Unknown),
        };
        Self {
            value,
            address_type,
            scope,
        }
    }

    /// Classify many values at once
    pub fn new_addresses<S: AsRef<str>>(values: &[S]) -> Vec<Address> {
        values.iter().map(|v| Address::new(v.as_ref())).collect()
    }

    /// Parsed IP, if the address is not a hostname
    pub fn ip(&self) -> Option<IpAddr> {
        match self.address_type {
            AddressType::Hostname => None,
            _ => self.value.parse().ok(),
        }
    }

    /// Rank within the preference order; lower sorts first
    fn sort_order(&self, prefer_ipv6: bool) -> u8 {
        let mut order = match self.scope {
            Scope::Public => 0x00,
            Scope::CloudLocal => 0x20,
            Scope::MachineLocal => 0x40,
            Scope::LinkLocal => 0x80,
            Scope::Unknown => 0xf0,
        };
        match self.address_type {
            AddressType::Hostname => order = 0x10,
            AddressType::Ipv4 if prefer_ipv6 => order += 1,
            AddressType::Ipv6 if !prefer_ipv6 => order += 1,
            _ => {}
        }
        order
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Address::new(value)
    }
}

fn ipv4_scope(ip: &Ipv4Addr) -> Scope {
    if ip.is_loopback() {
        Scope::MachineLocal
    } else if ip.is_link_local() {
        Scope::LinkLocal
    } else if ip.is_private() {
        Scope::CloudLocal
    } else {
        Scope::Public
    }
}

fn ipv6_scope(ip: &Ipv6Addr) -> Scope {
    let first = ip.segments()[0];
    if ip.is_loopback() {
        Scope::MachineLocal
    } else if first & 0xffc0 == 0xfe80 {
        Scope::LinkLocal
    } else if first & 0xfe00 == 0xfc00 {
        Scope::CloudLocal
    } else {
        Scope::Public
    }
}

/// Stable sort by preference order
pub fn sort_addresses(addresses: &mut [Address], prefer_ipv6: bool) {
    addresses.sort_by_key(|a| a.sort_order(prefer_ipv6));
}

/// Drop empty values and duplicates (first occurrence wins), then sort
pub fn normalize_addresses(
    addresses: impl IntoIterator<Item = Address>,
    prefer_ipv6: bool,
) -> Vec<Address> {
    let mut seen = HashSet::new();
    let mut result: Vec<Address> = addresses
        .into_iter()
        .filter(|a| !a.value.is_empty())
        .filter(|a| seen.insert(a.value.clone()))
        .collect();
    sort_addresses(&mut result, prefer_ipv6);
    result
}

/// Provider addresses, then machine addresses not already present
pub fn merged_addresses(provider: &[Address], machine: &[Address]) -> Vec<Address> {
    let mut merged = provider.to_vec();
    for addr in machine {
        if !merged.iter().any(|p| p.value == addr.value) {
            merged.push(addr.clone());
        }
    }
    merged
}

/// Which preferred address is being chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Public,
    Private,
}

impl AddressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressKind::Public => "public",
            AddressKind::Private => "private",
        }
    }

    /// Lower is better; `0` is an exact scope match
    fn score(&self, addr: &Address) -> u8 {
        match (self, addr.scope) {
            (AddressKind::Public, Scope::Public) => 0,
            (AddressKind::Public, Scope::Unknown) => 1,
            (AddressKind::Public, Scope::CloudLocal) => 2,
            (AddressKind::Private, Scope::CloudLocal) => 0,
            (AddressKind::Private, Scope::Public) => 1,
            (AddressKind::Private, Scope::Unknown) => 2,
            (_, Scope::MachineLocal) => 3,
            (_, Scope::LinkLocal) => 4,
        }
    }

    fn is_exact(&self, addr: &Address) -> bool {
        self.score(addr) == 0
    }
}

/// Best address of the requested kind; the first of equal candidates wins
pub fn select_address(addresses: &[Address], kind: AddressKind) -> Option<&Address> {
    addresses.iter().min_by_key(|a| kind.score(a))
}

/// Which list a preferred address was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Provider,
    Machine,
}

/// A persisted preferred address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredAddress {
    pub address: Address,
    pub origin: Origin,
}

/// Outcome of re-evaluating a preferred address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preference {
    Keep,
    Replace(Option<PreferredAddress>),
}

/// Decide whether a stored preferred address should be replaced.
///
/// Replacement happens, in this order, when the stored address is empty,
/// when it has vanished from both lists, when it came from the machine and
/// a provider address is now available, or when it is not an exact scope
/// match and a same-origin exact match exists.
pub fn maybe_get_new_address(
    current: Option<&PreferredAddress>,
    provider: &[Address],
    machine: &[Address],
    kind: AddressKind,
) -> Preference {
    let candidate = match select_address(provider, kind) {
        Some(addr) => Some(PreferredAddress {
            address: addr.clone(),
            origin: Origin::Provider,
        }),
        None => select_address(machine, kind).map(|addr| PreferredAddress {
            address: addr.clone(),
            origin: Origin::Machine,
        }),
    };

    let Some(current) = current.filter(|c| !c.address.value.is_empty()) else {
        return match candidate {
            Some(c) => Preference::Replace(Some(c)),
            None => Preference::Keep,
        };
    };

    let present = |list: &[Address]| list.iter().any(|a| a.value == current.address.value);
    if !present(provider) && !present(machine) {
        return Preference::Replace(candidate);
    }

    let Some(candidate) = candidate else {
        return Preference::Keep;
    };

    if current.origin != Origin::Provider && candidate.origin == Origin::Provider {
        return Preference::Replace(Some(candidate));
    }

    if !kind.is_exact(&current.address)
        && current.origin == candidate.origin
        && kind.is_exact(&candidate.address)
    {
        return Preference::Replace(Some(candidate));
    }

    Preference::Keep
}
