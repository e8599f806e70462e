// Copyright (c) 2025 - Cowboy AI, Inc.
//! Supported container types
//!
//! Until the machine agent reports what it can host, the supported set is
//! unknown and any container type may be added. Once reported, existing
//! children are reclassified in the same batch: unsupported ones get an
//! error status, supported ones previously marked unsupported go back to
//! pending.

use serde_json::Value;
use std::collections::BTreeMap;

use super::{replace_fields, ContainerRefsDoc, Machine};
use crate::errors::{StateError, StateResult};
use crate::instance::ContainerType;
use crate::state::to_body;
use crate::state_machine::Life;
use crate::status::{Status, StatusInfo};
use crate::store::{Assert, Collection, ConditionalOp, Update};
use crate::txn::TxnPlan;

const UNSUPPORTED_CONTAINER: &str = "unsupported container";

impl Machine {
    /// Supported container types and whether they have been reported
    pub fn supported_containers(&self) -> (&[ContainerType], bool) {
        (
            &self.doc.supported_containers,
            self.doc.supported_containers_known,
        )
    }

    /// Record that the machine can host no containers at all
    pub async fn supports_no_containers(&mut self) -> StateResult<()> {
        self.set_supported_containers(&[]).await
    }

    /// Record the container types the machine can host
    ///
    /// `none` is rejected. Duplicates are dropped, keeping the first.
    pub async fn set_supported_containers(&mut self, types: &[ContainerType]) -> StateResult<()> {
        let mut supported: Vec<ContainerType> = Vec::with_capacity(types.len());
        for ty in types {
            if *ty == ContainerType::None {
                return Err(StateError::InvalidContainerType(ty.as_str().to_string()));
            }
            if !supported.contains(ty) {
                supported.push(*ty);
            }
        }

        {
            let this = &*self;
            let supported = &supported[..];
            this.st
                .runner()
                .run(this.st.config().txn_attempts, move |_| {
                    this.supported_containers_ops(supported)
                })
                .await?;
        }

        self.doc.supported_containers = supported;
        self.doc.supported_containers_known = true;
        Ok(())
    }

    async fn supported_containers_ops(
        &self,
        supported: &[ContainerType],
    ) -> StateResult<TxnPlan> {
        let Some(doc) = self.fresh_doc().await? else {
            return Err(super::not_found(&self.doc.id));
        };
        if doc.life == Life::Dead {
            return Err(StateError::NotAlive(format!("machine {}", doc.id)));
        }

        let mut ops = vec![ConditionalOp::update(
            Collection::Machines,
            doc.id.as_str(),
            Update::new()
                .set("supported_containers", to_body(&supported)?)
                .set("supported_containers_known", true),
        )
        .with_assert(Assert::Matches(Life::not_dead_filter()))];

        if let Some((refs, revno)) = self
            .st
            .read::<ContainerRefsDoc>(Collection::ContainerRefs, &doc.id)
            .await?
        {
            ops.push(ConditionalOp::check(
                Collection::ContainerRefs,
                doc.id.as_str(),
                Assert::Revno(revno),
            ));
            for child in &refs.children {
                if let Some(op) = self.reclassify_op(child, supported).await? {
                    ops.push(op);
                }
            }
        }

        Ok(TxnPlan::Apply(ops))
    }

    /// Status change for one child container, if its classification moved
    async fn reclassify_op(
        &self,
        child: &str,
        supported: &[ContainerType],
    ) -> StateResult<Option<ConditionalOp>> {
        let Some(ty) = container_type_of(child) else {
            return Ok(None);
        };
        let Some((current, _)) = self.st.read::<StatusInfo>(Collection::Statuses, child).await? else {
            return Ok(None);
        };

        let info = if !supported.contains(&ty) {
            let data = BTreeMap::from([("type".to_string(), Value::from(ty.as_str()))]);
            StatusInfo::new(Status::Error, UNSUPPORTED_CONTAINER).with_data(data)
        } else if current.status == Status::Error && current.message == UNSUPPORTED_CONTAINER {
            StatusInfo::new(Status::Pending, "")
        } else {
            return Ok(None);
        };

        Ok(Some(
            ConditionalOp::update(Collection::Statuses, child, replace_fields(&to_body(&info)?))
                .with_assert(Assert::Exists),
        ))
    }
}

/// Container type encoded in a container id (`1/lxc/0` → lxc)
pub fn container_type_of(id: &str) -> Option<ContainerType> {
    let mut parts = id.rsplit('/');
    let _seq = parts.next()?;
    parts.next()?.parse().ok()
}
