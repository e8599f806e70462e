// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for Constraints

use cim_machine_state::constraints::{Constraints, ConstraintsError, CPU_POWER};
use cim_machine_state::ContainerType;
use proptest::option;
use proptest::prelude::*;

use crate::fixtures::validator;

fn words() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z][a-z0-9-]{0,5}", 1..4)
}

fn any_constraints() -> impl Strategy<Value = Constraints> {
    (
        option::of(prop::sample::select(vec!["amd64", "arm64", "ppc64el"])),
        option::of(prop::sample::select(ContainerType::HOSTABLE.to_vec())),
        option::of(0u64..256),
        option::of(0u64..10_000),
        option::of(prop::sample::select(vec!["m1.small", "t2.micro", "n2-standard-4"])),
        option::of(0u64..1_048_576),
        option::of(0u64..1_048_576),
        option::of(words()),
        option::of(words()),
    )
        .prop_map(
            |(arch, container, cpu_cores, cpu_power, instance_type, mem, root_disk, tags, zones)| {
                Constraints {
                    arch: arch.map(str::to_string),
                    container,
                    cpu_cores,
                    cpu_power,
                    instance_type: instance_type.map(str::to_string),
                    mem,
                    root_disk,
                    tags,
                    zones,
                }
            },
        )
}

proptest! {
    /// The textual form parses back to the same constraints
    #[test]
    fn prop_display_parses_back(cons in any_constraints()) {
        let text = cons.to_string();
        let parsed: Constraints = text.parse().map_err(|e| {
            TestCaseError::fail(format!("{text:?} does not parse: {e}"))
        })?;
        prop_assert_eq!(parsed, cons);
    }

    /// Only instance-type together with mem is rejected; cpu-power is
    /// reported as unsupported whenever it is set
    #[test]
    fn prop_validator_policy(cons in any_constraints()) {
        let result = validator().validate(&cons);
        if cons.instance_type.is_some() && cons.mem.is_some() {
            let is_ambiguous = matches!(result, Err(ConstraintsError::Ambiguous { .. }));
            prop_assert!(is_ambiguous);
        } else {
            let unsupported = result.map_err(|e| TestCaseError::fail(e.to_string()))?;
            let expected: Vec<String> = cons
                .cpu_power
                .map(|_| CPU_POWER.to_string())
                .into_iter()
                .collect();
            prop_assert_eq!(unsupported, expected);
        }
    }
}
