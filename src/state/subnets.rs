// Copyright (c) 2025 - Cowboy AI, Inc.
//! Subnets and IP address allocations
//!
//! A subnet reserves an allocatable range for container addresses. IP
//! address documents record which machine interface an address is allocated
//! to; removing the machine marks its allocations Dead.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::info;

use super::{to_body, State};
use crate::errors::{StateError, StateResult, StoreError};
use crate::machine::MachineDoc;
use crate::network::values::ip_ordinal;
use crate::network::{Address, IpAddressWithCidr, MacAddress};
use crate::state_machine::Life;
use crate::store::{Assert, Collection, ConditionalOp, Filter, Update};
use crate::txn::TxnPlan;

/// Parameters for a new subnet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetInfo {
    pub cidr: String,
    /// First allocatable address; empty when nothing is allocatable
    #[serde(default)]
    pub allocatable_ip_low: String,
    #[serde(default)]
    pub allocatable_ip_high: String,
}

/// A known subnet
#[derive(Debug, Clone)]
pub struct Subnet {
    info: SubnetInfo,
    range: Option<(IpAddr, IpAddr)>,
}

impl Subnet {
    fn from_info(info: SubnetInfo) -> StateResult<Self> {
        let network = IpAddressWithCidr::new(&info.cidr)
            .map_err(|e| StateError::InvalidArgument(e.to_string()))?;
        let range = match (info.allocatable_ip_low.as_str(), info.allocatable_ip_high.as_str()) {
            ("", "") => None,
            (low, high) => {
                let invalid = || {
                    StateError::InvalidArgument(format!(
                        "invalid allocatable range {low} - {high} for subnet {}",
                        info.cidr
                    ))
                };
                let low: IpAddr = low.parse().map_err(|_| invalid())?;
                let high: IpAddr = high.parse().map_err(|_| invalid())?;
                if !network.contains(&low) || !network.contains(&high) || ip_ordinal(&low) > ip_ordinal(&high) {
                    return Err(invalid());
                }
                Some((low, high))
            }
        };
        Ok(Self { info, range })
    }

    pub fn cidr(&self) -> &str {
        &self.info.cidr
    }

    pub fn info(&self) -> &SubnetInfo {
        &self.info
    }

    /// Whether `ip` falls inside the allocatable range
    pub fn in_allocatable_range(&self, ip: &IpAddr) -> bool {
        match &self.range {
            Some((low, high)) if low.is_ipv4() == ip.is_ipv4() => {
                (ip_ordinal(low)..=ip_ordinal(high)).contains(&ip_ordinal(ip))
            }
            _ => false,
        }
    }
}

/// Persisted IP address allocation, keyed by address value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct IpAddressDoc {
    pub value: String,
    pub subnet_id: String,
    pub life: Life,
    #[serde(default)]
    pub machine_id: String,
    #[serde(default)]
    pub interface_id: String,
    #[serde(default)]
    pub mac_address: String,
}

/// Snapshot of an IP address allocation
#[derive(Clone)]
pub struct IpAddress {
    st: State,
    doc: IpAddressDoc,
}

impl std::fmt::Debug for IpAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpAddress")
            .field("value", &self.doc.value)
            .field("life", &self.doc.life)
            .field("machine_id", &self.doc.machine_id)
            .finish()
    }
}

impl IpAddress {
    pub fn value(&self) -> &str {
        &self.doc.value
    }

    pub fn subnet_id(&self) -> &str {
        &self.doc.subnet_id
    }

    pub fn life(&self) -> Life {
        self.doc.life
    }

    /// Machine the address is allocated to; empty when unallocated
    pub fn machine_id(&self) -> &str {
        &self.doc.machine_id
    }

    pub fn interface_id(&self) -> &str {
        &self.doc.interface_id
    }

    pub fn mac_address(&self) -> &str {
        &self.doc.mac_address
    }

    /// Allocate the address to a machine interface
    ///
    /// The machine must be Alive, and stays Alive for the commit to land.
    /// Re-allocating to the same machine only updates the interface.
    pub async fn allocate_to(&mut self, machine_id: &str, interface_id: &str, mac: &str) -> StateResult<()> {
        let mac = MacAddress::new(mac)
            .map_err(|e| StateError::InvalidArgument(e.to_string()))?
            .as_str();
        let value = self.doc.value.as_str();
        let mac_ref = mac.as_str();
        let st = &self.st;
        st.runner()
            .run(st.config().txn_attempts, move |_| async move {
                let Some((doc, _)) = st.read::<IpAddressDoc>(Collection::IpAddresses, value).await? else {
                    return Err(StateError::NotFound(format!("IP address {value}")));
                };
                if doc.life != Life::Alive {
                    return Err(StateError::NotAlive(format!("IP address {value}")));
                }
                match st.read::<MachineDoc>(Collection::Machines, machine_id).await? {
                    None => return Err(StateError::NotFound(format!("machine {machine_id}"))),
                    Some((machine, _)) if machine.life != Life::Alive => {
                        return Err(StateError::NotAlive(format!("machine {machine_id}")));
                    }
                    Some(_) => {}
                }
                if !doc.machine_id.is_empty() && doc.machine_id != machine_id {
                    return Err(StateError::InvalidArgument(format!(
                        "IP address {value} already allocated to machine {}",
                        doc.machine_id
                    )));
                }
                Ok(TxnPlan::Apply(vec![
                    ConditionalOp::check(
                        Collection::Machines,
                        machine_id,
                        Assert::Matches(Life::is_alive_filter()),
                    ),
                    ConditionalOp::update(
                        Collection::IpAddresses,
                        value,
                        Update::new()
                            .set("machine_id", machine_id)
                            .set("interface_id", interface_id)
                            .set("mac_address", mac_ref),
                    )
                    .with_assert(Assert::Matches(Filter::And(vec![
                        Life::is_alive_filter(),
                        Filter::is_in("machine_id", ["", machine_id]),
                    ]))),
                ]))
            })
            .await?;

        self.doc.machine_id = machine_id.to_string();
        self.doc.interface_id = interface_id.to_string();
        self.doc.mac_address = mac;
        Ok(())
    }

    /// Mark the allocation Dead; no-op when already Dead or removed
    pub async fn ensure_dead(&mut self) -> StateResult<()> {
        let value = self.doc.value.as_str();
        self.st
            .runner()
            .run(self.st.config().txn_attempts, move |_| async move {
                Ok(TxnPlan::Apply(vec![ConditionalOp::update(
                    Collection::IpAddresses,
                    value,
                    Update::new().set("life", Life::Dead),
                )]))
            })
            .await?;
        self.doc.life = Life::Dead;
        Ok(())
    }

    pub async fn refresh(&mut self) -> StateResult<()> {
        match self
            .st
            .read::<IpAddressDoc>(Collection::IpAddresses, &self.doc.value)
            .await?
        {
            Some((doc, _)) => {
                self.doc = doc;
                Ok(())
            }
            None => Err(StateError::NotFound(format!("IP address {}", self.doc.value))),
        }
    }
}

impl State {
    /// Register a subnet; its CIDR is its id
    pub async fn add_subnet(&self, info: SubnetInfo) -> StateResult<Subnet> {
        let subnet = Subnet::from_info(info)?;
        let op = ConditionalOp::insert(Collection::Subnets, subnet.cidr(), to_body(subnet.info())?);
        match self.store().apply_ops(vec![op]).await {
            Ok(()) => {}
            Err(StoreError::Aborted) => {
                return Err(StateError::AlreadyExists(format!("subnet {}", subnet.cidr())))
            }
            Err(err) => return Err(err.into()),
        }
        self.span().in_scope(|| info!(cidr = %subnet.cidr(), "Subnet added"));
        Ok(subnet)
    }

    pub async fn subnet(&self, cidr: &str) -> StateResult<Subnet> {
        match self.read::<SubnetInfo>(Collection::Subnets, cidr).await? {
            Some((info, _)) => Subnet::from_info(info),
            None => Err(StateError::NotFound(format!("subnet {cidr}"))),
        }
    }

    pub async fn all_subnets(&self) -> StateResult<Vec<Subnet>> {
        self.read_all::<SubnetInfo>(Collection::Subnets, &Filter::All)
            .await?
            .into_iter()
            .map(Subnet::from_info)
            .collect()
    }

    /// Record an unallocated IP address in a subnet
    pub async fn add_ip_address(&self, addr: Address, subnet_id: &str) -> StateResult<IpAddress> {
        if addr.ip().is_none() {
            return Err(StateError::InvalidArgument(format!(
                "{:?} is not an IP address",
                addr.value
            )));
        }
        let doc = IpAddressDoc {
            value: addr.value.clone(),
            subnet_id: subnet_id.to_string(),
            life: Life::Alive,
            machine_id: String::new(),
            interface_id: String::new(),
            mac_address: String::new(),
        };
        let op = ConditionalOp::insert(Collection::IpAddresses, doc.value.as_str(), to_body(&doc)?);
        match self.store().apply_ops(vec![op]).await {
            Ok(()) => {}
            Err(StoreError::Aborted) => {
                return Err(StateError::AlreadyExists(format!("IP address {}", doc.value)))
            }
            Err(err) => return Err(err.into()),
        }
        Ok(IpAddress {
            st: self.clone(),
            doc,
        })
    }

    pub async fn ip_address(&self, value: &str) -> StateResult<IpAddress> {
        match self.read::<IpAddressDoc>(Collection::IpAddresses, value).await? {
            Some((doc, _)) => Ok(IpAddress {
                st: self.clone(),
                doc,
            }),
            None => Err(StateError::NotFound(format!("IP address {value}"))),
        }
    }
}
