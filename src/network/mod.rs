// Copyright (c) 2025 - Cowboy AI, Inc.
//! Network addressing
//!
//! - [`address`]: classification, ordering and preferred-address selection
//! - [`values`]: validated CIDR and MAC value objects

pub mod address;
pub mod values;

pub use address::{
    maybe_get_new_address, merged_addresses, normalize_addresses, select_address,
    sort_addresses, Address, AddressKind, AddressType, Origin, Preference, PreferredAddress,
    Scope,
};
pub use values::{IpAddressWithCidr, MacAddress, NetworkError};
