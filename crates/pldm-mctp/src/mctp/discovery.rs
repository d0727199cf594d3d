// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint discovery state of the local binding.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Addressing status of the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscoveryState {
    /// The node is the addressing authority and is never discovered itself.
    NotApplicable,
    Undiscovered,
    Discovered,
}

impl DiscoveryState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotApplicable => "NotApplicable",
            Self::Undiscovered => "Undiscovered",
            Self::Discovered => "Discovered",
        }
    }
}

impl fmt::Display for DiscoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guards which discovery commands the binding honours.
///
/// Cycles between `Undiscovered` and `Discovered` for the life of the
/// process; an authority stays in `NotApplicable`.
#[derive(Debug, Clone)]
pub struct DiscoveryMachine {
    state: DiscoveryState,
}

impl DiscoveryMachine {
    pub fn new(is_authority: bool) -> Self {
        let state = if is_authority {
            DiscoveryState::NotApplicable
        } else {
            DiscoveryState::Undiscovered
        };
        Self { state }
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    /// "Prepare for endpoint discovery": reset to `Undiscovered`.
    ///
    /// Returns `false` for an authority, which has nothing to reset.
    pub fn prepare(&mut self) -> bool {
        match self.state {
            DiscoveryState::NotApplicable => false,
            DiscoveryState::Undiscovered | DiscoveryState::Discovered => {
                self.state = DiscoveryState::Undiscovered;
                true
            }
        }
    }

    /// Whether an "endpoint discovery" announce gets an answer.
    pub fn accepts_announce(&self) -> bool {
        self.state == DiscoveryState::Undiscovered
    }

    /// Whether a peer may assign an endpoint id right now.
    pub fn accepts_assignment(&self) -> bool {
        self.state == DiscoveryState::Undiscovered
    }

    /// Record a successful address assignment.
    pub fn assigned(&mut self) {
        debug_assert!(self.accepts_assignment());
        self.state = DiscoveryState::Discovered;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        assert_eq!(
            DiscoveryMachine::new(true).state(),
            DiscoveryState::NotApplicable
        );
        assert_eq!(
            DiscoveryMachine::new(false).state(),
            DiscoveryState::Undiscovered
        );
    }

    #[test]
    fn test_assignment_only_once_until_prepare() {
        let mut m = DiscoveryMachine::new(false);
        assert!(m.accepts_assignment());
        m.assigned();
        assert_eq!(m.state(), DiscoveryState::Discovered);
        assert!(!m.accepts_assignment());
        assert!(!m.accepts_announce());

        assert!(m.prepare());
        assert_eq!(m.state(), DiscoveryState::Undiscovered);
        assert!(m.accepts_assignment());
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let mut m = DiscoveryMachine::new(false);
        m.assigned();
        assert!(m.prepare());
        assert!(m.prepare());
        assert_eq!(m.state(), DiscoveryState::Undiscovered);
    }

    #[test]
    fn test_authority_ignores_discovery() {
        let mut m = DiscoveryMachine::new(true);
        assert!(!m.prepare());
        assert!(!m.accepts_announce());
        assert!(!m.accepts_assignment());
        assert_eq!(m.state(), DiscoveryState::NotApplicable);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(DiscoveryState::Discovered.to_string(), "Discovered");
        assert_eq!(DiscoveryState::NotApplicable.as_str(), "NotApplicable");
    }
}
