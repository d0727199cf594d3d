// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PCIe-style MCTP binding.
//!
//! Owns the local endpoint id, the routing address (BDF) and the discovery
//! state. Inbound control requests are answered here; every other message
//! type is handed to the upper layer through an mpsc channel.
//!
//! Response routing is part of the protocol contract:
//!
//! | Command                     | Response routing        |
//! |-----------------------------|-------------------------|
//! | Prepare for discovery       | to authority            |
//! | Endpoint discovery          | to authority            |
//! | Get endpoint id             | by id (requester BDF)   |
//! | Set endpoint id             | by id (requester BDF)   |

use super::control::{
    build_message, completion, Command, ControlHeader, EidType, EndpointType, GetEidResponse,
    SetEidOperation, SetEidRequest, SetEidResponse,
};
use super::discovery::{DiscoveryMachine, DiscoveryState};
use super::transport::{Bdf, Frame, Routing, RoutingInfo, Transport, TransportError};
use super::{
    Eid, MessageSender, EID_BROADCAST, EID_NULL, MCTP_MSG_TYPE_CONTROL, MCTP_MSG_TYPE_MASK,
};
use crate::config::{BindingConfig, BindingMode};
use crate::wire::Reader;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Binding errors.
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// Externally observable binding state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BindingProperties {
    pub eid: Eid,
    pub static_eid: bool,
    pub bdf: Bdf,
    pub discovery: DiscoveryState,
}

/// Non-control message delivered to the upper layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub eid: Eid,
    pub tag_owner: bool,
    pub msg_tag: u8,
    /// MCTP message, starting with the message-type byte.
    pub payload: Vec<u8>,
}

/// Result of handling one inbound control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    Respond(Frame),
    Drop,
}

struct BindingState {
    discovery: DiscoveryMachine,
    eid: Eid,
    static_eid: bool,
    bdf: Bdf,
    /// Routing address each peer EID was last seen at.
    routes: HashMap<Eid, Bdf>,
}

impl BindingState {
    fn properties(&self) -> BindingProperties {
        BindingProperties {
            eid: self.eid,
            static_eid: self.static_eid,
            bdf: self.bdf,
            discovery: self.discovery.state(),
        }
    }
}

/// MCTP binding over an opaque transport channel.
#[derive(Clone)]
pub struct Binding {
    mode: BindingMode,
    static_eid: Option<Eid>,
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<BindingState>>,
    properties: Arc<watch::Sender<BindingProperties>>,
    control_instance: Arc<AtomicU8>,
}

impl Binding {
    pub fn new(config: &BindingConfig, transport: Arc<dyn Transport>) -> Self {
        let state = BindingState {
            discovery: DiscoveryMachine::new(config.mode == BindingMode::BusOwner),
            eid: config.static_eid.unwrap_or(EID_NULL),
            static_eid: config.static_eid.is_some(),
            bdf: config.bdf,
            routes: HashMap::new(),
        };
        let (properties, _) = watch::channel(state.properties());
        Self {
            mode: config.mode,
            static_eid: config.static_eid,
            transport,
            state: Arc::new(Mutex::new(state)),
            properties: Arc::new(properties),
            control_instance: Arc::new(AtomicU8::new(0)),
        }
    }

    /// Current published properties.
    pub fn properties(&self) -> BindingProperties {
        *self.properties.borrow()
    }

    /// Observe endpoint id, BDF and discovery state changes.
    pub fn subscribe(&self) -> watch::Receiver<BindingProperties> {
        self.properties.subscribe()
    }

    /// Routing address `eid` was last seen at, if any.
    pub fn route_for(&self, eid: Eid) -> Option<Bdf> {
        self.state.lock().routes.get(&eid).copied()
    }

    fn publish(&self, props: BindingProperties) {
        self.properties.send_if_modified(|current| {
            if *current == props {
                return false;
            }
            info!(
                "Binding properties: EID {} (static: {}), BDF {}, {}",
                props.eid, props.static_eid, props.bdf, props.discovery
            );
            *current = props;
            true
        });
    }

    fn next_control_instance(&self) -> u8 {
        self.control_instance.fetch_add(1, Ordering::Relaxed) & 0x1f
    }

    /// Decode one inbound control frame and produce the response, if any.
    pub fn handle_control(&self, frame: &Frame) -> ControlOutcome {
        let mut r = Reader::new(&frame.payload);
        let header = match ControlHeader::decode(&mut r) {
            Ok(header) => header,
            Err(e) => {
                debug!("Dropping malformed control message from EID {}: {}", frame.eid, e);
                return ControlOutcome::Drop;
            }
        };

        if !header.request {
            debug!(
                "Control response 0x{:02x} from EID {} (cc {:?})",
                header.command,
                frame.eid,
                frame.payload.get(3)
            );
            return ControlOutcome::Drop;
        }

        let Some(command) = Command::from_u8(header.command) else {
            debug!(
                "Not handled: control command 0x{:02x} from EID {}",
                header.command, frame.eid
            );
            return ControlOutcome::Drop;
        };

        let mut state = self.state.lock();
        let mut body = Vec::with_capacity(4);
        let routing = match command {
            Command::PrepareEndpointDiscovery => {
                // The bus owner assigns EIDs and is never itself discovered.
                if !state.discovery.prepare() {
                    debug!("Prepare for endpoint discovery ignored by the addressing authority");
                    return ControlOutcome::Drop;
                }
                info!("Prepare for endpoint discovery: state reset to Undiscovered");
                body.push(completion::SUCCESS);
                Routing::ToAuthority
            }
            Command::EndpointDiscovery => {
                if !state.discovery.accepts_announce() {
                    debug!(
                        "Endpoint discovery not handled, binding is {}",
                        state.discovery.state()
                    );
                    return ControlOutcome::Drop;
                }
                body.push(completion::SUCCESS);
                Routing::ToAuthority
            }
            Command::GetEndpointId => {
                let endpoint_type = match self.mode {
                    BindingMode::BusOwner => EndpointType::BusOwnerOrBridge,
                    BindingMode::Endpoint => EndpointType::SimpleEndpoint,
                };
                let eid_type = match self.static_eid {
                    Some(s) if s == state.eid => EidType::StaticMatching,
                    Some(_) => EidType::StaticNotMatching,
                    None => EidType::Dynamic,
                };
                GetEidResponse {
                    completion_code: completion::SUCCESS,
                    eid: state.eid,
                    endpoint_type,
                    eid_type,
                    medium_specific: 0,
                }
                .encode(&mut body);
                Routing::ById
            }
            Command::SetEndpointId => {
                if !state.discovery.accepts_assignment() {
                    debug!(
                        "Set endpoint id not handled, binding is {}",
                        state.discovery.state()
                    );
                    return ControlOutcome::Drop;
                }
                let request = match SetEidRequest::decode(&mut r) {
                    Ok(request) => request,
                    Err(e) => {
                        debug!("Dropping malformed Set Endpoint ID from EID {}: {}", frame.eid, e);
                        return ControlOutcome::Drop;
                    }
                };
                self.apply_set_eid(&mut state, request, frame.routing.own_id)
                    .encode(&mut body);
                Routing::ById
            }
            Command::DiscoveryNotify => {
                if self.mode != BindingMode::BusOwner {
                    debug!("Discovery notify from EID {} ignored by endpoint", frame.eid);
                    return ControlOutcome::Drop;
                }
                info!("Discovery notify from BDF {}", frame.routing.remote_id);
                body.push(completion::SUCCESS);
                Routing::ById
            }
        };

        let remote_id = match routing {
            Routing::ById => frame.routing.remote_id,
            Routing::ToAuthority | Routing::BroadcastFromAuthority => Bdf::default(),
        };
        let response = Frame {
            eid: frame.eid,
            tag_owner: false,
            msg_tag: frame.msg_tag,
            routing: RoutingInfo {
                routing,
                remote_id,
                own_id: state.bdf,
            },
            payload: build_message(header.to_response(), &body),
        };
        let props = state.properties();
        drop(state);

        self.publish(props);
        ControlOutcome::Respond(response)
    }

    fn apply_set_eid(
        &self,
        state: &mut BindingState,
        request: SetEidRequest,
        own_id: Bdf,
    ) -> SetEidResponse {
        let rejected = |eid| SetEidResponse {
            completion_code: completion::ERROR_INVALID_DATA,
            accepted: false,
            eid_setting: eid,
            pool_size: 0,
        };

        match request.operation {
            SetEidOperation::Set | SetEidOperation::Force => {
                if request.eid == EID_NULL || request.eid == EID_BROADCAST {
                    warn!("Rejecting invalid endpoint id 0x{:02x}", request.eid);
                    return rejected(state.eid);
                }
                state.eid = request.eid;
                state.static_eid = false;
            }
            SetEidOperation::Reset => match self.static_eid {
                Some(eid) => {
                    state.eid = eid;
                    state.static_eid = true;
                }
                None => {
                    warn!("Set Endpoint ID reset requested without a static EID");
                    return rejected(state.eid);
                }
            },
            SetEidOperation::SetDiscovered => {}
        }

        state.bdf = own_id;
        state.discovery.assigned();
        info!("Endpoint id {} assigned, BDF {}", state.eid, state.bdf);

        SetEidResponse {
            completion_code: completion::SUCCESS,
            accepted: true,
            eid_setting: state.eid,
            pool_size: 0,
        }
    }

    /// Announce this endpoint to the authority.
    pub async fn discovery_notify(&self) -> Result<(), TransportError> {
        let header = ControlHeader::request(Command::DiscoveryNotify, self.next_control_instance());
        let frame = Frame {
            eid: EID_NULL,
            tag_owner: true,
            msg_tag: 0,
            routing: RoutingInfo {
                routing: Routing::ToAuthority,
                remote_id: Bdf::default(),
                own_id: self.state.lock().bdf,
            },
            payload: build_message(header, &[]),
        };
        self.transport.send_frame(&frame).await
    }

    async fn process_frame(&self, frame: Frame, upper: &mpsc::Sender<InboundMessage>) {
        if frame.eid != EID_NULL {
            self.state
                .lock()
                .routes
                .insert(frame.eid, frame.routing.remote_id);
        }

        let Some(&msg_type) = frame.payload.first() else {
            debug!("Dropping empty frame from EID {}", frame.eid);
            return;
        };

        if msg_type & MCTP_MSG_TYPE_MASK == MCTP_MSG_TYPE_CONTROL {
            if let ControlOutcome::Respond(response) = self.handle_control(&frame) {
                if let Err(e) = self.transport.send_frame(&response).await {
                    warn!("Failed to send control response to EID {}: {}", frame.eid, e);
                }
            }
            return;
        }

        let message = InboundMessage {
            eid: frame.eid,
            tag_owner: frame.tag_owner,
            msg_tag: frame.msg_tag,
            payload: frame.payload,
        };
        if upper.send(message).await.is_err() {
            debug!(
                "No upper layer for message type 0x{:02x}, dropping",
                msg_type
            );
        }
    }

    /// Read loop: runs until shutdown or until the channel is permanently gone.
    ///
    /// Transient receive errors are logged and polling continues.
    pub async fn run(
        &self,
        upper: mpsc::Sender<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BindingError> {
        info!(
            "MCTP binding running: {:?} mode, BDF {}",
            self.mode,
            self.properties().bdf
        );

        loop {
            tokio::select! {
                result = self.transport.recv_frame() => {
                    match result {
                        Ok(frame) => self.process_frame(frame, &upper).await,
                        Err(e) if e.is_fatal() => {
                            error!("Transport channel lost: {}", e);
                            return Err(BindingError::Transport(e));
                        }
                        Err(e) => {
                            warn!("Error reading from transport: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    debug!("Binding read loop shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl MessageSender for Binding {
    async fn send_message(
        &self,
        eid: Eid,
        tag_owner: bool,
        msg_tag: u8,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let routing = {
            let state = self.state.lock();
            let mut routing = match state.routes.get(&eid) {
                Some(bdf) => RoutingInfo::by_id(*bdf),
                None => RoutingInfo::to_authority(),
            };
            routing.own_id = state.bdf;
            routing
        };
        let frame = Frame {
            eid,
            tag_owner,
            msg_tag,
            routing,
            payload,
        };
        self.transport.send_frame(&frame).await
    }
}
