// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MCTP transport binding: endpoint discovery and control messages.

use async_trait::async_trait;

pub mod binding;
pub mod control;
pub mod discovery;
pub mod transport;

pub use binding::{Binding, BindingError, BindingProperties, ControlOutcome, InboundMessage};
pub use discovery::{DiscoveryMachine, DiscoveryState};
pub use transport::{
    Bdf, ChannelTransport, Frame, Routing, RoutingInfo, Transport, TransportError,
    UdpEmulatorTransport,
};

/// MCTP endpoint identifier.
pub type Eid = u8;

/// Null EID, used before an endpoint has been assigned an address.
pub const EID_NULL: Eid = 0x00;

/// Broadcast EID.
pub const EID_BROADCAST: Eid = 0xff;

/// Message type of MCTP control messages.
pub const MCTP_MSG_TYPE_CONTROL: u8 = 0x00;

/// Message type of PLDM over MCTP.
pub const MCTP_MSG_TYPE_PLDM: u8 = 0x01;

/// Message type bits of the first message byte (bit 7 is the integrity check flag).
pub const MCTP_MSG_TYPE_MASK: u8 = 0x7f;

/// Outbound path used by upper-layer protocols.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send one MCTP message (starting with its message-type byte) to `eid`.
    async fn send_message(
        &self,
        eid: Eid,
        tag_owner: bool,
        msg_tag: u8,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;
}
