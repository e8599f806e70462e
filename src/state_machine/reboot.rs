// Copyright (c) 2025 - Cowboy AI, Inc.
//! Reboot decision over a container hierarchy
//!
//! A flag on the outermost machine wins: the host reboots and everything
//! nested inside it shuts down. Otherwise a machine reboots only when its
//! own flag is set.

use serde::{Deserialize, Serialize};

/// What a machine agent should do about pending reboots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebootAction {
    ShouldDoNothing,
    ShouldReboot,
    ShouldShutdown,
}

/// Decide the action for a machine.
///
/// `root_flagged` is `None` when the machine is itself the outermost
/// machine of its hierarchy.
pub fn reboot_action(self_flagged: bool, root_flagged: Option<bool>) -> RebootAction {
    match (root_flagged, self_flagged) {
        (Some(true), _) => RebootAction::ShouldShutdown,
        (_, true) => RebootAction::ShouldReboot,
        _ => RebootAction::ShouldDoNothing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(false, None => RebootAction::ShouldDoNothing ; "root unflagged")]
    #[test_case(true, None => RebootAction::ShouldReboot ; "root flagged")]
    #[test_case(false, Some(false) => RebootAction::ShouldDoNothing ; "container unflagged")]
    #[test_case(true, Some(false) => RebootAction::ShouldReboot ; "container flagged")]
    #[test_case(false, Some(true) => RebootAction::ShouldShutdown ; "host flagged")]
    #[test_case(true, Some(true) => RebootAction::ShouldShutdown ; "both flagged")]
    fn test_reboot_action(self_flagged: bool, root_flagged: Option<bool>) -> RebootAction {
        reboot_action(self_flagged, root_flagged)
    }
}
