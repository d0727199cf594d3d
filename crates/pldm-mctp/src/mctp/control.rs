// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MCTP control message codec.
//!
//! Wire format (after the transport has delivered a whole message):
//! ```text
//! +---------+----------------------+---------+-----------+----------
//! | MsgType | Rq | D | rsvd | IID  | Command | [CC]      | body ...
//! | 0x00    | b7 | b6| b5   | b4:0 |         | resp only |
//! +---------+----------------------+---------+-----------+----------
//! ```

use super::{Eid, MCTP_MSG_TYPE_CONTROL, MCTP_MSG_TYPE_MASK};
use crate::wire::{DecodeError, Reader};

/// Message type byte plus the two control header bytes.
pub const CONTROL_HEADER_SIZE: usize = 3;

const RQ_BIT: u8 = 0x80;
const DATAGRAM_BIT: u8 = 0x40;
const INSTANCE_ID_MASK: u8 = 0x1f;

/// Control completion codes (DSP0236 table 13).
pub mod completion {
    pub const SUCCESS: u8 = 0x00;
    pub const ERROR_INVALID_DATA: u8 = 0x02;
}

/// Control commands handled by the binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    SetEndpointId = 0x01,
    GetEndpointId = 0x02,
    PrepareEndpointDiscovery = 0x0b,
    EndpointDiscovery = 0x0c,
    DiscoveryNotify = 0x0d,
}

impl Command {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::SetEndpointId),
            0x02 => Some(Self::GetEndpointId),
            0x0b => Some(Self::PrepareEndpointDiscovery),
            0x0c => Some(Self::EndpointDiscovery),
            0x0d => Some(Self::DiscoveryNotify),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Decoded control header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlHeader {
    pub instance_id: u8,
    pub request: bool,
    pub datagram: bool,
    /// Raw command code; unknown codes must survive decoding so they can be logged.
    pub command: u8,
}

impl ControlHeader {
    pub fn request(command: Command, instance_id: u8) -> Self {
        Self {
            instance_id: instance_id & INSTANCE_ID_MASK,
            request: true,
            datagram: false,
            command: command.as_u8(),
        }
    }

    /// Header of the response answering this request: same instance id and
    /// command, request bit cleared.
    pub fn to_response(self) -> Self {
        Self {
            request: false,
            ..self
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let msg_type = r.u8("message type")?;
        if msg_type & MCTP_MSG_TYPE_MASK != MCTP_MSG_TYPE_CONTROL {
            return Err(DecodeError::InvalidValue {
                field: "control message type",
                value: u32::from(msg_type),
            });
        }
        let flags = r.u8("control flags")?;
        let command = r.u8("command code")?;
        Ok(Self {
            instance_id: flags & INSTANCE_ID_MASK,
            request: flags & RQ_BIT != 0,
            datagram: flags & DATAGRAM_BIT != 0,
            command,
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        let mut flags = self.instance_id & INSTANCE_ID_MASK;
        if self.request {
            flags |= RQ_BIT;
        }
        if self.datagram {
            flags |= DATAGRAM_BIT;
        }
        buf.push(MCTP_MSG_TYPE_CONTROL);
        buf.push(flags);
        buf.push(self.command);
    }
}

/// Build a complete control message: header followed by `body`.
pub fn build_message(header: ControlHeader, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(CONTROL_HEADER_SIZE + body.len());
    header.encode(&mut buf);
    buf.extend_from_slice(body);
    buf
}

// ---------------------------------------------------------------------------
// Set Endpoint ID
// ---------------------------------------------------------------------------

/// Operation field of a Set Endpoint ID request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SetEidOperation {
    Set = 0,
    Force = 1,
    Reset = 2,
    SetDiscovered = 3,
}

impl SetEidOperation {
    fn from_bits(v: u8) -> Self {
        match v & 0x03 {
            0 => Self::Set,
            1 => Self::Force,
            2 => Self::Reset,
            _ => Self::SetDiscovered,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetEidRequest {
    pub operation: SetEidOperation,
    pub eid: Eid,
}

impl SetEidRequest {
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let operation = SetEidOperation::from_bits(r.u8("set eid operation")?);
        let eid = r.u8("set eid value")?;
        Ok(Self { operation, eid })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.operation as u8);
        buf.push(self.eid);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetEidResponse {
    pub completion_code: u8,
    /// Assignment status bits 5:4; `false` means rejected.
    pub accepted: bool,
    pub eid_setting: Eid,
    pub pool_size: u8,
}

impl SetEidResponse {
    const REJECTED: u8 = 0x10;

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.completion_code);
        buf.push(if self.accepted { 0 } else { Self::REJECTED });
        buf.push(self.eid_setting);
        buf.push(self.pool_size);
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let completion_code = r.u8("completion code")?;
        let status = r.u8("set eid status")?;
        Ok(Self {
            completion_code,
            accepted: status & 0x30 == 0,
            eid_setting: r.u8("eid setting")?,
            pool_size: r.u8("eid pool size")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Get Endpoint ID
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EndpointType {
    SimpleEndpoint = 0,
    BusOwnerOrBridge = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EidType {
    Dynamic = 0,
    StaticSupported = 1,
    StaticMatching = 2,
    StaticNotMatching = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetEidResponse {
    pub completion_code: u8,
    pub eid: Eid,
    pub endpoint_type: EndpointType,
    pub eid_type: EidType,
    pub medium_specific: u8,
}

impl GetEidResponse {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.completion_code);
        buf.push(self.eid);
        buf.push(((self.endpoint_type as u8) << 4) | self.eid_type as u8);
        buf.push(self.medium_specific);
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let completion_code = r.u8("completion code")?;
        let eid = r.u8("eid")?;
        let kind = r.u8("eid type")?;
        let endpoint_type = match (kind >> 4) & 0x03 {
            0 => EndpointType::SimpleEndpoint,
            1 => EndpointType::BusOwnerOrBridge,
            v => {
                return Err(DecodeError::InvalidValue {
                    field: "endpoint type",
                    value: u32::from(v),
                })
            }
        };
        let eid_type = match kind & 0x03 {
            0 => EidType::Dynamic,
            1 => EidType::StaticSupported,
            2 => EidType::StaticMatching,
            _ => EidType::StaticNotMatching,
        };
        Ok(Self {
            completion_code,
            eid,
            endpoint_type,
            eid_type,
            medium_specific: r.u8("medium specific")?,
        })
    }
}
