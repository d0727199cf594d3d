// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-terminus instance id counters.

use super::registry::Tid;
use super::INSTANCE_ID_MASK;
use std::collections::HashMap;

/// Instance id sequencer, one counter per TID, created on first use.
#[derive(Debug, Default)]
pub struct InstanceIdSequencer {
    counters: HashMap<Tid, u8>,
}

impl InstanceIdSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the counter of `tid` and return the new value (modulo 32).
    pub fn next(&mut self, tid: Tid) -> u8 {
        let counter = self.counters.entry(tid).or_insert(0);
        *counter = counter.wrapping_add(1) & INSTANCE_ID_MASK;
        *counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increments_and_wraps() {
        let mut seq = InstanceIdSequencer::new();
        let values: Vec<u8> = (0..40).map(|_| seq.next(1)).collect();
        assert_eq!(values[0], 1);
        assert_eq!(values[30], 31);
        assert_eq!(values[31], 0);
        assert_eq!(values[32], 1);
        for pair in values.windows(2) {
            assert_eq!(pair[1], (pair[0] + 1) % 32);
        }
    }

    #[test]
    fn test_no_repeat_within_window() {
        let mut seq = InstanceIdSequencer::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..32 {
            assert!(seen.insert(seq.next(7)));
        }
        assert!(!seen.insert(seq.next(7)));
    }

    #[test]
    fn test_counters_are_per_terminus() {
        let mut seq = InstanceIdSequencer::new();
        assert_eq!(seq.next(1), 1);
        assert_eq!(seq.next(1), 2);
        assert_eq!(seq.next(2), 1);
        assert_eq!(seq.next(1), 3);
    }
}
