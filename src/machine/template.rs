// Copyright (c) 2025 - Cowboy AI, Inc.
//! Parameters for adding a machine

use super::MachineJob;
use crate::constraints::Constraints;
use crate::errors::{StateError, StateResult};
use crate::instance::HardwareCharacteristics;
use crate::network::Address;

/// Describes a machine to add
///
/// A template may describe an already provisioned machine by carrying both
/// an instance id and a nonce.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MachineTemplate {
    pub series: String,
    pub jobs: Vec<MachineJob>,
    /// Empty means "use the model constraints"
    pub constraints: Constraints,
    pub instance_id: String,
    pub nonce: String,
    pub hardware: Option<HardwareCharacteristics>,
    /// Provider addresses known at creation
    pub addresses: Vec<Address>,
    pub placement: String,
}

impl MachineTemplate {
    pub fn new(series: impl Into<String>, jobs: &[MachineJob]) -> Self {
        Self {
            series: series.into(),
            jobs: jobs.to_vec(),
            ..Default::default()
        }
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_instance(mut self, instance_id: impl Into<String>, nonce: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self.nonce = nonce.into();
        self
    }

    pub fn with_hardware(mut self, hardware: HardwareCharacteristics) -> Self {
        self.hardware = Some(hardware);
        self
    }

    pub fn with_addresses(mut self, addresses: Vec<Address>) -> Self {
        self.addresses = addresses;
        self
    }

    pub fn with_placement(mut self, placement: impl Into<String>) -> Self {
        self.placement = placement.into();
        self
    }

    pub(crate) fn validate(&self) -> StateResult<()> {
        if self.series.is_empty() {
            return Err(StateError::InvalidArgument("no series specified".to_string()));
        }
        if self.jobs.is_empty() {
            return Err(StateError::InvalidArgument("no jobs specified".to_string()));
        }
        let mut seen = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            if seen.contains(job) {
                return Err(StateError::InvalidArgument(format!("duplicate job: {job}")));
            }
            seen.push(*job);
        }
        if self.instance_id.is_empty() != self.nonce.is_empty() {
            return Err(StateError::InvalidArgument(
                "cannot add a machine with an instance id and no nonce".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn is_provisioned(&self) -> bool {
        !self.instance_id.is_empty()
    }
}
