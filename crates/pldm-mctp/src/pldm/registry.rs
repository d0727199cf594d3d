// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Terminus id allocation and TID to EID mapping.

use crate::mctp::Eid;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Process-local handle of one managed device.
pub type Tid = u8;

/// First TID handed out; 0x00 is reserved.
pub const TID_MIN: Tid = 0x01;

/// Last TID handed out; 0xFF is reserved.
pub const TID_MAX: Tid = 0xfe;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("terminus id pool exhausted")]
    Exhausted,

    #[error("terminus id {0} was never allocated")]
    NotAllocated(Tid),
}

/// Owned TID registry.
///
/// TIDs are issued in strictly increasing order and never reused; once the
/// pool is spent every further allocation fails. Entries are never removed.
#[derive(Debug)]
pub struct TerminusRegistry {
    next: Option<Tid>,
    /// Allocated TIDs; `None` until the terminus is bound to an EID.
    entries: BTreeMap<Tid, Option<Eid>>,
}

impl Default for TerminusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminusRegistry {
    pub fn new() -> Self {
        Self {
            next: Some(TID_MIN),
            entries: BTreeMap::new(),
        }
    }

    /// Issue the next unused TID.
    pub fn allocate(&mut self) -> Result<Tid, RegistryError> {
        let tid = self.next.ok_or(RegistryError::Exhausted)?;
        self.next = if tid == TID_MAX { None } else { Some(tid + 1) };
        self.entries.insert(tid, None);
        debug!("Allocated TID {}", tid);
        Ok(tid)
    }

    /// Create or overwrite the EID reachable at `tid`.
    ///
    /// The mapping stays one to one: any other TID holding `eid` is unbound.
    pub fn bind(&mut self, tid: Tid, eid: Eid) -> Result<(), RegistryError> {
        if !self.entries.contains_key(&tid) {
            return Err(RegistryError::NotAllocated(tid));
        }
        for (other, bound) in self.entries.iter_mut() {
            if *other != tid && *bound == Some(eid) {
                debug!("EID {} moved from TID {} to TID {}", eid, other, tid);
                *bound = None;
            }
        }
        let entry = self
            .entries
            .get_mut(&tid)
            .ok_or(RegistryError::NotAllocated(tid))?;
        if let Some(old) = entry.replace(eid) {
            if old != eid {
                debug!("TID {} re-addressed: EID {} -> {}", tid, old, eid);
            }
        }
        Ok(())
    }

    pub fn lookup_by_tid(&self, tid: Tid) -> Option<Eid> {
        self.entries.get(&tid).copied().flatten()
    }

    /// TID currently bound to `eid`.
    pub fn lookup_by_eid(&self, eid: Eid) -> Option<Tid> {
        self.entries
            .iter()
            .find_map(|(tid, bound)| (*bound == Some(eid)).then_some(*tid))
    }

    /// Number of allocated TIDs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
