// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/response correlation for PLDM termini.
//!
//! Each terminus has at most one wait slot. A [`Requester`] owns the slot
//! for its TID for as long as it lives, so two flows can never wait on the
//! same terminus at once. Inbound PLDM traffic is pushed through
//! [`Correlator::dispatch`], which admits only registered senders (or the
//! EID of a pending [`Requester::request_eid`]) and queues the message in
//! the slot of the matching TID; the requester then keeps or discards it by
//! comparing instance ids.

use super::instance_id::InstanceIdSequencer;
use super::registry::{RegistryError, TerminusRegistry, Tid};
use super::{
    instance_id_of, is_request, pldm_type_of, stamp_instance_id, PLDM_HEADER_SIZE, PLDM_TYPE_FWU,
};
use crate::mctp::{
    Eid, InboundMessage, MessageSender, TransportError, MCTP_MSG_TYPE_MASK, MCTP_MSG_TYPE_PLDM,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Message tag used for correlated requests.
const REQUEST_MSG_TAG: u8 = 0;

/// Inbound messages queued per slot before further ones are dropped.
const SLOT_CAPACITY: usize = 8;

/// Correlation errors.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("terminus {0} is not mapped to an endpoint")]
    InvalidTerminus(Tid),

    #[error("terminus {0} already has a requester")]
    TerminusBusy(Tid),

    #[error("request too short: {0} bytes")]
    InvalidRequest(usize),

    #[error("no response from terminus {tid} for instance id {instance_id}")]
    Timeout { tid: Tid, instance_id: u8 },

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("correlator closed")]
    Closed,
}

impl RequestError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport(_))
    }
}

struct Termini {
    registry: TerminusRegistry,
    instance_ids: InstanceIdSequencer,
}

struct Slot {
    generation: u64,
    tx: mpsc::Sender<Vec<u8>>,
    /// EID admitted for this slot while an overridden request is pending.
    override_eid: Option<Eid>,
}

/// Shared correlation context: registry, instance ids and wait slots.
#[derive(Clone)]
pub struct Correlator {
    sender: Arc<dyn MessageSender>,
    termini: Arc<Mutex<Termini>>,
    slots: Arc<Mutex<HashMap<Tid, Slot>>>,
    generation: Arc<AtomicU64>,
}

impl Correlator {
    pub fn new(sender: Arc<dyn MessageSender>) -> Self {
        Self {
            sender,
            termini: Arc::new(Mutex::new(Termini {
                registry: TerminusRegistry::new(),
                instance_ids: InstanceIdSequencer::new(),
            })),
            slots: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn allocate_tid(&self) -> Result<Tid, RegistryError> {
        self.termini.lock().registry.allocate()
    }

    pub fn bind(&self, tid: Tid, eid: Eid) -> Result<(), RegistryError> {
        self.termini.lock().registry.bind(tid, eid)
    }

    /// Allocate a fresh TID and bind it to `eid`.
    pub fn register_terminus(&self, eid: Eid) -> Result<Tid, RegistryError> {
        let mut termini = self.termini.lock();
        let tid = termini.registry.allocate()?;
        termini.registry.bind(tid, eid)?;
        info!("Terminus {} registered at EID {}", tid, eid);
        Ok(tid)
    }

    pub fn lookup_by_tid(&self, tid: Tid) -> Option<Eid> {
        self.termini.lock().registry.lookup_by_tid(tid)
    }

    pub fn lookup_by_eid(&self, eid: Eid) -> Option<Tid> {
        self.termini.lock().registry.lookup_by_eid(eid)
    }

    /// Claim the wait slot of `tid`.
    pub fn requester(&self, tid: Tid) -> Result<Requester, RequestError> {
        let mut slots = self.slots.lock();
        if slots.contains_key(&tid) {
            return Err(RequestError::TerminusBusy(tid));
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (tx, inbox) = mpsc::channel(SLOT_CAPACITY);
        slots.insert(
            tid,
            Slot {
                generation,
                tx,
                override_eid: None,
            },
        );
        Ok(Requester {
            tid,
            generation,
            correlator: self.clone(),
            inbox,
        })
    }

    /// Fire-and-forget send of a PLDM message to `tid`.
    pub async fn send(
        &self,
        tid: Tid,
        msg_tag: u8,
        tag_owner: bool,
        pldm_msg: &[u8],
    ) -> Result<(), RequestError> {
        let eid = self
            .lookup_by_tid(tid)
            .ok_or(RequestError::InvalidTerminus(tid))?;
        self.sender
            .send_message(eid, tag_owner, msg_tag, with_mctp_type(pldm_msg))
            .await?;
        Ok(())
    }

    /// Terminus an inbound message from `eid` belongs to. A pending
    /// overridden request takes precedence over the registry mapping.
    fn sender_tid(&self, eid: Eid) -> Option<Tid> {
        let overridden = self
            .slots
            .lock()
            .iter()
            .find_map(|(tid, slot)| (slot.override_eid == Some(eid)).then_some(*tid));
        overridden.or_else(|| self.lookup_by_eid(eid))
    }

    /// Route one inbound message to the terminus it came from.
    pub fn dispatch(&self, msg: InboundMessage) {
        let Some(tid) = self.sender_tid(msg.eid) else {
            warn!("Dropping message from unmapped EID {}", msg.eid);
            return;
        };

        let Some((&msg_type, pldm_msg)) = msg.payload.split_first() else {
            debug!("Dropping empty message from TID {}", tid);
            return;
        };
        if msg_type & MCTP_MSG_TYPE_MASK != MCTP_MSG_TYPE_PLDM {
            debug!(
                "Dropping MCTP message type 0x{:02x} from TID {}",
                msg_type, tid
            );
            return;
        }

        match pldm_type_of(pldm_msg) {
            Some(PLDM_TYPE_FWU) if is_request(pldm_msg) => {
                debug!(
                    "Unsupported firmware update request 0x{:02x} from TID {}",
                    pldm_msg.get(2).copied().unwrap_or_default(),
                    tid
                );
            }
            Some(PLDM_TYPE_FWU) => self.deliver(tid, msg.payload),
            Some(other) => {
                debug!("Unsupported PLDM type 0x{:02x} from TID {}", other, tid);
            }
            None => {
                debug!("Dropping truncated PLDM message from TID {}", tid);
            }
        }
    }

    fn deliver(&self, tid: Tid, payload: Vec<u8>) {
        let slots = self.slots.lock();
        let Some(slot) = slots.get(&tid) else {
            debug!("No request outstanding on TID {}, dropping response", tid);
            return;
        };
        match slot.tx.try_send(payload) {
            Ok(()) => trace!("Queued response for TID {}", tid),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Response queue of TID {} full, dropping", tid);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Requester of TID {} gone, dropping", tid);
            }
        }
    }

    /// Consume inbound messages from the binding until shutdown.
    pub async fn run(
        &self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                msg = inbound.recv() => {
                    match msg {
                        Some(msg) => self.dispatch(msg),
                        None => {
                            debug!("Inbound channel closed");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    debug!("Correlator shutting down");
                    break;
                }
            }
        }
    }

    fn set_override(&self, tid: Tid, generation: u64, eid: Option<Eid>) {
        if let Some(slot) = self
            .slots
            .lock()
            .get_mut(&tid)
            .filter(|s| s.generation == generation)
        {
            slot.override_eid = eid;
        }
    }

    fn release(&self, tid: Tid, generation: u64) {
        let mut slots = self.slots.lock();
        if slots.get(&tid).is_some_and(|s| s.generation == generation) {
            slots.remove(&tid);
        }
    }
}

fn with_mctp_type(pldm_msg: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + pldm_msg.len());
    payload.push(MCTP_MSG_TYPE_PLDM);
    payload.extend_from_slice(pldm_msg);
    payload
}

/// Exclusive request context for one terminus.
pub struct Requester {
    tid: Tid,
    generation: u64,
    correlator: Correlator,
    inbox: mpsc::Receiver<Vec<u8>>,
}

impl Requester {
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Send `msg` to the EID bound to this terminus and wait for the
    /// matching response (PLDM message, MCTP type byte stripped).
    pub async fn request(
        &mut self,
        msg: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, RequestError> {
        self.request_to(None, msg, timeout).await
    }

    /// Same as [`Requester::request`], addressed to `eid` instead of the
    /// registry mapping.
    pub async fn request_eid(
        &mut self,
        eid: Eid,
        msg: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, RequestError> {
        self.request_to(Some(eid), msg, timeout).await
    }

    async fn request_to(
        &mut self,
        override_eid: Option<Eid>,
        mut msg: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, RequestError> {
        if msg.len() < PLDM_HEADER_SIZE {
            return Err(RequestError::InvalidRequest(msg.len()));
        }

        let (eid, instance_id) = {
            let mut termini = self.correlator.termini.lock();
            let eid = override_eid
                .or_else(|| termini.registry.lookup_by_tid(self.tid))
                .ok_or(RequestError::InvalidTerminus(self.tid))?;
            (eid, termini.instance_ids.next(self.tid))
        };
        stamp_instance_id(&mut msg, instance_id);

        self.correlator
            .set_override(self.tid, self.generation, override_eid);
        let result = self.exchange(eid, instance_id, msg, timeout).await;
        if override_eid.is_some() {
            self.correlator.set_override(self.tid, self.generation, None);
        }
        result
    }

    async fn exchange(
        &mut self,
        eid: Eid,
        instance_id: u8,
        msg: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, RequestError> {
        // Anything already queued answers an earlier request.
        while let Ok(stale) = self.inbox.try_recv() {
            trace!("Discarding {} stale bytes for TID {}", stale.len(), self.tid);
        }

        let deadline = Instant::now() + timeout;
        self.correlator
            .sender
            .send_message(eid, true, REQUEST_MSG_TAG, with_mctp_type(&msg))
            .await?;
        trace!(
            "Request 0x{:02x} sent to TID {} (EID {}, iid {})",
            msg[2],
            self.tid,
            eid,
            instance_id
        );

        loop {
            let payload = match tokio::time::timeout_at(deadline, self.inbox.recv()).await {
                Ok(Some(payload)) => payload,
                Ok(None) => return Err(RequestError::Closed),
                Err(_) => {
                    debug!(
                        "Timed out waiting for TID {} (iid {})",
                        self.tid, instance_id
                    );
                    return Err(RequestError::Timeout {
                        tid: self.tid,
                        instance_id,
                    });
                }
            };

            let Some((&msg_type, response)) = payload.split_first() else {
                continue;
            };
            if msg_type & MCTP_MSG_TYPE_MASK != MCTP_MSG_TYPE_PLDM || response.is_empty() {
                debug!("Discarding non-PLDM or empty message for TID {}", self.tid);
                continue;
            }
            if is_request(response) {
                continue;
            }
            if instance_id_of(response) != Some(instance_id) {
                debug!(
                    "Discarding response with iid {:?} for TID {} (expected {})",
                    instance_id_of(response),
                    self.tid,
                    instance_id
                );
                continue;
            }
            return Ok(response.to_vec());
        }
    }
}

impl Drop for Requester {
    fn drop(&mut self) {
        self.correlator.release(self.tid, self.generation);
    }
}
