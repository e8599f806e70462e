// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for Address Ordering and Preference
//!
//! ```text
//! public IP  >  hostname  >  cloud-local  >  machine-local  >  link-local
//! ```
//!
//! The tier table below is written out independently of the library so the
//! properties check the documented order, not the implementation's own
//! ranking function.

use std::collections::HashSet;

use cim_machine_state::network::{
    maybe_get_new_address, merged_addresses, normalize_addresses, select_address, Address,
    AddressKind, AddressType, Origin, Preference, Scope,
};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn any_address() -> impl Strategy<Value = Address> {
    prop_oneof![
        (0u8..4, 0u8..4).prop_map(|(a, b)| format!("8.8.{a}.{b}")),
        (0u8..4, 0u8..4).prop_map(|(a, b)| format!("10.0.{a}.{b}")),
        (1u8..4).prop_map(|a| format!("127.0.0.{a}")),
        (1u8..4).prop_map(|a| format!("169.254.0.{a}")),
        (1u16..4).prop_map(|a| format!("2001:db8::{a:x}")),
        (1u16..4).prop_map(|a| format!("fd00::{a:x}")),
        (1u16..4).prop_map(|a| format!("fe80::{a:x}")),
        Just("::1".to_string()),
        prop::sample::select(vec!["example.org", "db.internal", "localhost"])
            .prop_map(str::to_string),
        Just(String::new()),
    ]
    .prop_map(Address::new)
}

fn address_list() -> impl Strategy<Value = Vec<Address>> {
    prop::collection::vec(any_address(), 0..16)
}

// ============================================================================
// Reference ordering
// ============================================================================

fn tier(addr: &Address) -> u8 {
    if addr.address_type == AddressType::Hostname {
        return 1;
    }
    match addr.scope {
        Scope::Public => 0,
        Scope::CloudLocal => 2,
        Scope::MachineLocal => 3,
        Scope::LinkLocal => 4,
        Scope::Unknown => 5,
    }
}

fn rank(addr: &Address, prefer_ipv6: bool) -> (u8, u8) {
    let off_family = match addr.address_type {
        AddressType::Hostname => 0,
        AddressType::Ipv4 => u8::from(prefer_ipv6),
        AddressType::Ipv6 => u8::from(!prefer_ipv6),
    };
    (tier(addr), off_family)
}

fn values(addresses: &[Address]) -> Vec<&str> {
    addresses.iter().map(|a| a.value.as_str()).collect()
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Normalizing twice changes nothing
    #[test]
    fn prop_normalize_is_idempotent(addrs in address_list(), prefer_ipv6 in any::<bool>()) {
        let once = normalize_addresses(addrs, prefer_ipv6);
        let twice = normalize_addresses(once.clone(), prefer_ipv6);
        prop_assert_eq!(once, twice);
    }

    /// Output keeps every non-empty value exactly once
    #[test]
    fn prop_normalize_keeps_each_value_once(addrs in address_list(), prefer_ipv6 in any::<bool>()) {
        let expected: HashSet<String> = addrs
            .iter()
            .filter(|a| !a.value.is_empty())
            .map(|a| a.value.clone())
            .collect();

        let normalized = normalize_addresses(addrs, prefer_ipv6);
        let got: HashSet<String> = normalized.iter().map(|a| a.value.clone()).collect();

        prop_assert_eq!(got.len(), normalized.len());
        prop_assert_eq!(got, expected);
    }

    /// Ranks never decrease along the normalized list
    #[test]
    fn prop_normalize_orders_by_rank(addrs in address_list(), prefer_ipv6 in any::<bool>()) {
        let normalized = normalize_addresses(addrs, prefer_ipv6);
        for pair in normalized.windows(2) {
            prop_assert!(
                rank(&pair[0], prefer_ipv6) <= rank(&pair[1], prefer_ipv6),
                "{} sorted before {}", pair[0], pair[1]
            );
        }
    }

    /// Equal-rank addresses keep their first-occurrence order
    #[test]
    fn prop_normalize_is_stable(addrs in address_list(), prefer_ipv6 in any::<bool>()) {
        let mut first_seen: Vec<&str> = Vec::new();
        for a in &addrs {
            if !a.value.is_empty() && !first_seen.contains(&a.value.as_str()) {
                first_seen.push(a.value.as_str());
            }
        }
        let position = |v: &str| first_seen.iter().position(|s| *s == v);

        let normalized = normalize_addresses(addrs.clone(), prefer_ipv6);
        for pair in normalized.windows(2) {
            if rank(&pair[0], prefer_ipv6) == rank(&pair[1], prefer_ipv6) {
                prop_assert!(position(&pair[0].value) < position(&pair[1].value));
            }
        }
    }

    /// Provider entries come first; machine entries fill in what is missing
    #[test]
    fn prop_merged_addresses(provider in address_list(), machine in address_list()) {
        let provider = normalize_addresses(provider, false);
        let machine = normalize_addresses(machine, false);
        let merged = merged_addresses(&provider, &machine);

        prop_assert_eq!(&merged[..provider.len()], &provider[..]);
        let merged_values: HashSet<&str> = values(&merged).into_iter().collect();
        prop_assert_eq!(merged_values.len(), merged.len());
        for addr in &machine {
            prop_assert!(merged_values.contains(addr.value.as_str()));
        }
    }

    /// A freshly chosen preference is kept when the lists do not change
    #[test]
    fn prop_preference_is_stable(
        provider in address_list(),
        machine in address_list(),
        public in any::<bool>(),
    ) {
        let kind = if public { AddressKind::Public } else { AddressKind::Private };
        let provider = normalize_addresses(provider, false);
        let machine = normalize_addresses(machine, false);

        match maybe_get_new_address(None, &provider, &machine, kind) {
            Preference::Replace(Some(chosen)) => {
                let expected = select_address(&provider, kind)
                    .map(|a| (a, Origin::Provider))
                    .or_else(|| select_address(&machine, kind).map(|a| (a, Origin::Machine)));
                prop_assert_eq!(Some((&chosen.address, chosen.origin)), expected);
                prop_assert_eq!(
                    maybe_get_new_address(Some(&chosen), &provider, &machine, kind),
                    Preference::Keep
                );
            }
            Preference::Keep => {
                prop_assert!(provider.is_empty() && machine.is_empty());
            }
            Preference::Replace(None) => prop_assert!(false, "replaced nothing with nothing"),
        }
    }
}
