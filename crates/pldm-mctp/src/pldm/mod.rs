// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PLDM over MCTP: header codec, terminus bookkeeping and request correlation.
//!
//! ```text
//! +----------------------+------------------+---------+-----------+------
//! | Rq | D | rsvd | IID  | HdrVer | Type    | Command | [CC]      | ...
//! | b7 | b6| b5   | b4:0 | b7:6   | b5:0    |         | resp only |
//! +----------------------+------------------+---------+-----------+------
//! ```

pub mod fwu;
pub mod instance_id;
pub mod registry;
pub mod requester;

pub use instance_id::InstanceIdSequencer;
pub use registry::{RegistryError, TerminusRegistry, Tid};
pub use requester::{Correlator, RequestError, Requester};

use crate::wire::{DecodeError, Reader};

/// PLDM header size for requests.
pub const PLDM_HEADER_SIZE: usize = 3;

/// Instance ids live in the low five bits of the first header byte.
pub const INSTANCE_ID_MASK: u8 = 0x1f;

/// PLDM type bits of the second header byte.
pub const PLDM_TYPE_MASK: u8 = 0x3f;

/// Header version bits of the second header byte.
pub const HEADER_VERSION_MASK: u8 = 0xc0;

const RQ_BIT: u8 = 0x80;
const DATAGRAM_BIT: u8 = 0x40;

/// PLDM type: firmware update.
pub const PLDM_TYPE_FWU: u8 = 0x05;

/// Generic PLDM completion codes (DSP0240).
pub mod completion {
    pub const SUCCESS: u8 = 0x00;
    pub const ERROR_NOT_READY: u8 = 0x04;
}

/// Decoded PLDM message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PldmHeader {
    pub instance_id: u8,
    pub request: bool,
    pub datagram: bool,
    pub header_version: u8,
    pub pldm_type: u8,
    pub command: u8,
}

impl PldmHeader {
    pub fn request(pldm_type: u8, command: u8) -> Self {
        Self {
            instance_id: 0,
            request: true,
            datagram: false,
            header_version: 0,
            pldm_type: pldm_type & PLDM_TYPE_MASK,
            command,
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let flags = r.u8("pldm flags")?;
        let kind = r.u8("pldm type")?;
        let command = r.u8("pldm command")?;
        Ok(Self {
            instance_id: flags & INSTANCE_ID_MASK,
            request: flags & RQ_BIT != 0,
            datagram: flags & DATAGRAM_BIT != 0,
            header_version: (kind & HEADER_VERSION_MASK) >> 6,
            pldm_type: kind & PLDM_TYPE_MASK,
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
        buf.push(flags);
        buf.push(((self.header_version << 6) & HEADER_VERSION_MASK) | (self.pldm_type & PLDM_TYPE_MASK));
        buf.push(self.command);
    }
}

/// Build a request message with a zero instance id; the correlator stamps
/// the real one just before sending.
pub fn build_request(pldm_type: u8, command: u8, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PLDM_HEADER_SIZE + body.len());
    PldmHeader::request(pldm_type, command).encode(&mut buf);
    buf.extend_from_slice(body);
    buf
}

/// Overwrite the instance id of an encoded message, keeping the flag bits.
pub fn stamp_instance_id(msg: &mut [u8], instance_id: u8) {
    if let Some(first) = msg.first_mut() {
        *first = (*first & !INSTANCE_ID_MASK) | (instance_id & INSTANCE_ID_MASK);
    }
}

/// Instance id of an encoded message, if it has a first byte.
pub fn instance_id_of(msg: &[u8]) -> Option<u8> {
    msg.first().map(|b| b & INSTANCE_ID_MASK)
}

/// Whether an encoded message has the request bit set.
pub fn is_request(msg: &[u8]) -> bool {
    msg.first().is_some_and(|b| b & RQ_BIT != 0)
}

/// PLDM type of an encoded message.
pub fn pldm_type_of(msg: &[u8]) -> Option<u8> {
    msg.get(1).map(|b| b & PLDM_TYPE_MASK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let msg = build_request(PLDM_TYPE_FWU, 0x02, &[0xaa]);
        assert_eq!(msg, vec![0x80, 0x05, 0x02, 0xaa]);
        assert!(is_request(&msg));
        assert_eq!(pldm_type_of(&msg), Some(PLDM_TYPE_FWU));
    }

    #[test]
    fn test_stamp_keeps_flags() {
        let mut msg = build_request(PLDM_TYPE_FWU, 0x01, &[]);
        stamp_instance_id(&mut msg, 0x3f);
        assert_eq!(msg[0], 0x9f);
        assert_eq!(instance_id_of(&msg), Some(0x1f));

        stamp_instance_id(&mut msg, 4);
        assert_eq!(msg[0], 0x84);

        let mut empty: Vec<u8> = Vec::new();
        stamp_instance_id(&mut empty, 1);
        assert_eq!(instance_id_of(&empty), None);
    }

    #[test]
    fn test_header_decode() {
        let mut r = Reader::new(&[0x45, 0x45, 0x01, 0x00]);
        let hdr = PldmHeader::decode(&mut r).unwrap();
        assert!(!hdr.request);
        assert!(hdr.datagram);
        assert_eq!(hdr.instance_id, 5);
        assert_eq!(hdr.header_version, 1);
        assert_eq!(hdr.pldm_type, PLDM_TYPE_FWU);
        assert_eq!(hdr.command, 0x01);
        assert_eq!(r.remaining(), 1);

        let mut buf = Vec::new();
        hdr.encode(&mut buf);
        assert_eq!(buf, vec![0x45, 0x45, 0x01]);
    }
}
