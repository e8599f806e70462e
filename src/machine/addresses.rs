// Copyright (c) 2025 - Cowboy AI, Inc.
//! Machine addresses
//!
//! Provider and machine-reported addresses are stored separately, each
//! normalized and sorted. Preferred public and private addresses are
//! persisted with their origin and only replaced under the rules of
//! [`maybe_get_new_address`].
//!
//! Address updates are last-write-wins: every call writes, even when the
//! stored list is already equal.

use std::sync::Mutex;
use tracing::debug;

use super::{Machine, MachineDoc};
use crate::errors::{StateError, StateResult};
use crate::instance::ContainerType;
use crate::network::{
    maybe_get_new_address, merged_addresses, normalize_addresses, Address, AddressKind, Preference,
    PreferredAddress,
};
use crate::state::{to_body, State};
use crate::state_machine::Life;
use crate::store::{Assert, Collection, ConditionalOp, Update};
use crate::txn::TxnPlan;

/// Which stored list an update replaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Provider,
    Machine,
}

impl Source {
    fn field(&self) -> &'static str {
        match self {
            Source::Provider => "provider_addresses",
            Source::Machine => "machine_addresses",
        }
    }
}

/// What a committed address update wrote
#[derive(Debug, Clone)]
struct Written {
    addresses: Vec<Address>,
    public: Preference,
    private: Preference,
}

impl Machine {
    /// Provider addresses in stored order, then machine addresses not
    /// already present
    pub fn addresses(&self) -> Vec<Address> {
        merged_addresses(&self.doc.provider_addresses, &self.doc.machine_addresses)
    }

    pub fn provider_addresses(&self) -> &[Address] {
        &self.doc.provider_addresses
    }

    pub fn machine_addresses(&self) -> &[Address] {
        &self.doc.machine_addresses
    }

    /// Stored preferred public address
    pub fn public_address(&self) -> StateResult<Address> {
        preferred(&self.doc.preferred_public_address, AddressKind::Public)
    }

    /// Stored preferred private address
    pub fn private_address(&self) -> StateResult<Address> {
        preferred(&self.doc.preferred_private_address, AddressKind::Private)
    }

    /// Replace the addresses reported by the cloud provider
    ///
    /// For machines that are not containers, addresses inside the
    /// allocatable range of a known subnet are dropped: those belong to
    /// containers hosted on the machine.
    pub async fn set_provider_addresses(&mut self, addresses: Vec<Address>) -> StateResult<()> {
        self.set_addresses(Source::Provider, addresses).await
    }

    /// Replace the addresses reported by the machine agent
    pub async fn set_machine_addresses(&mut self, addresses: Vec<Address>) -> StateResult<()> {
        self.set_addresses(Source::Machine, addresses).await
    }

    async fn set_addresses(&mut self, source: Source, addresses: Vec<Address>) -> StateResult<()> {
        let written = Mutex::new(None);
        {
            let this = &*self;
            let addresses = &addresses[..];
            let written = &written;
            this.st
                .runner()
                .run(this.st.config().txn_attempts, move |_| {
                    this.address_ops(source, addresses, written)
                })
                .await?;
        }

        let written = written
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
            .ok_or_else(|| StateError::NotFound(format!("machine {}", self.doc.id)))?;
        debug!(
            machine = %self.doc.id,
            field = source.field(),
            count = written.addresses.len(),
            "Addresses updated"
        );
        match source {
            Source::Provider => self.doc.provider_addresses = written.addresses,
            Source::Machine => self.doc.machine_addresses = written.addresses,
        }
        if let Preference::Replace(addr) = written.public {
            self.doc.preferred_public_address = addr;
        }
        if let Preference::Replace(addr) = written.private {
            self.doc.preferred_private_address = addr;
        }
        Ok(())
    }

    async fn address_ops(
        &self,
        source: Source,
        addresses: &[Address],
        written: &Mutex<Option<Written>>,
    ) -> StateResult<TxnPlan> {
        let Some((doc, revno)) = self
            .st
            .read::<MachineDoc>(Collection::Machines, &self.doc.id)
            .await?
        else {
            return Err(super::not_found(&self.doc.id));
        };
        if doc.life == Life::Dead {
            return Err(StateError::NotAlive(format!("machine {}", doc.id)));
        }

        let prefer_ipv6 = self.st.model().await?.prefer_ipv6();
        let mut addresses = addresses.to_vec();
        if source == Source::Provider && doc.container_type == ContainerType::None {
            addresses = without_allocatable(&self.st, addresses).await?;
        }
        let addresses = normalize_addresses(addresses, prefer_ipv6);

        let (provider, machine) = match source {
            Source::Provider => (&addresses[..], &doc.machine_addresses[..]),
            Source::Machine => (&doc.provider_addresses[..], &addresses[..]),
        };
        let public = maybe_get_new_address(
            doc.preferred_public_address.as_ref(),
            provider,
            machine,
            AddressKind::Public,
        );
        let private = maybe_get_new_address(
            doc.preferred_private_address.as_ref(),
            provider,
            machine,
            AddressKind::Private,
        );

        let mut update = Update::new().set(source.field(), to_body(&addresses)?);
        if let Preference::Replace(addr) = &public {
            update = replace_preference(update, "preferred_public_address", addr.as_ref())?;
        }
        if let Preference::Replace(addr) = &private {
            update = replace_preference(update, "preferred_private_address", addr.as_ref())?;
        }

        *written.lock().unwrap_or_else(|e| e.into_inner()) = Some(Written {
            addresses,
            public,
            private,
        });
        Ok(TxnPlan::Apply(vec![ConditionalOp::update(
            Collection::Machines,
            doc.id.as_str(),
            update,
        )
        .with_assert(Assert::All(vec![
            Assert::Revno(revno),
            Assert::Matches(Life::not_dead_filter()),
        ]))]))
    }
}

/// A preference that no longer has a candidate is dropped from the document
fn replace_preference(update: Update, field: &str, addr: Option<&PreferredAddress>) -> StateResult<Update> {
    Ok(match addr {
        Some(addr) => update.set(field, to_body(addr)?),
        None => update.unset(field),
    })
}

/// Normalize the addresses a new machine starts with and pick its preferred
/// addresses
pub(crate) fn seed_addresses(doc: &mut MachineDoc, addresses: Vec<Address>, prefer_ipv6: bool) {
    doc.provider_addresses = normalize_addresses(addresses, prefer_ipv6);
    for kind in [AddressKind::Public, AddressKind::Private] {
        if let Preference::Replace(addr) =
            maybe_get_new_address(None, &doc.provider_addresses, &doc.machine_addresses, kind)
        {
            match kind {
                AddressKind::Public => doc.preferred_public_address = addr,
                AddressKind::Private => doc.preferred_private_address = addr,
            }
        }
    }
}

fn preferred(stored: &Option<PreferredAddress>, kind: AddressKind) -> StateResult<Address> {
    match stored {
        Some(pref) if !pref.address.value.is_empty() => Ok(pref.address.clone()),
        _ => Err(StateError::NoAddress(kind.as_str())),
    }
}

async fn without_allocatable(st: &State, addresses: Vec<Address>) -> StateResult<Vec<Address>> {
    let subnets = st.all_subnets().await?;
    if subnets.is_empty() {
        return Ok(addresses);
    }
    Ok(addresses
        .into_iter()
        .filter(|addr| match addr.ip() {
            Some(ip) => !subnets.iter().any(|s| s.in_allocatable_range(&ip)),
            None => true,
        })
        .collect())
}
