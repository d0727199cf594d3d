// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport channel abstraction.
//!
//! The binding never touches the hardware driver directly. It sees an
//! opaque channel that delivers whole MCTP messages together with the
//! routing metadata of the interconnect (the PCIe VDM routing mode and the
//! bus/device/function of both ends).
//!
//! Two implementations live here:
//! - [`UdpEmulatorTransport`]: datagram emulation of the interconnect, one
//!   MCTP message per UDP datagram behind a small metadata prefix.
//! - [`ChannelTransport`]: in-process pair used by tests and loopback setups.

use super::Eid;
use crate::wire::{DecodeError, Reader};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

/// Largest datagram accepted by the UDP emulator.
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// Size of the metadata prefix carried by each emulated datagram.
pub const EMULATOR_HEADER_SIZE: usize = 7;

const TAG_OWNER_BIT: u8 = 0x08;
const MSG_TAG_MASK: u8 = 0x07;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Malformed(#[from] DecodeError),

    #[error("frame too large: {0} bytes")]
    TooLarge(usize),

    #[error("transport channel closed")]
    Closed,
}

impl TransportError {
    /// Whether the channel is permanently gone.
    ///
    /// Everything else is logged by the caller and polling continues.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::NotConnected | std::io::ErrorKind::BrokenPipe
            ),
            Self::Malformed(_) | Self::TooLarge(_) => false,
        }
    }
}

/// PCIe bus/device/function triple packed into 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bdf(pub u16);

impl Bdf {
    pub fn new(bus: u8, device: u8, function: u8) -> Self {
        Self((u16::from(bus) << 8) | (u16::from(device & 0x1f) << 3) | u16::from(function & 0x07))
    }

    pub fn bus(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn device(self) -> u8 {
        ((self.0 >> 3) & 0x1f) as u8
    }

    pub fn function(self) -> u8 {
        (self.0 & 0x07) as u8
    }
}

impl From<u16> for Bdf {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Bdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}.{}",
            self.bus(),
            self.device(),
            self.function()
        )
    }
}

impl FromStr for Bdf {
    type Err = String;

    /// Accepts `bb:dd.f` (hex bus and device) or a raw 16-bit value.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || format!("invalid BDF '{}' (expected bb:dd.f or a 16-bit value)", s);

        if let Some((bus, rest)) = s.split_once(':') {
            let (device, function) = rest.split_once('.').ok_or_else(bad)?;
            let bus = u8::from_str_radix(bus, 16).map_err(|_| bad())?;
            let device = u8::from_str_radix(device, 16).map_err(|_| bad())?;
            let function: u8 = function.parse().map_err(|_| bad())?;
            if device > 0x1f || function > 0x07 {
                return Err(bad());
            }
            return Ok(Self::new(bus, device, function));
        }

        let raw = match s.strip_prefix("0x") {
            Some(hex) => u16::from_str_radix(hex, 16),
            None => s.parse(),
        };
        raw.map(Self).map_err(|_| bad())
    }
}

/// Routing mode of a frame on the interconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Routing {
    /// Deliver to the addressing authority (PCIe root complex).
    ToAuthority = 0,
    /// Deliver to the device at `remote_id`.
    ById = 2,
    /// Broadcast originated by the authority.
    BroadcastFromAuthority = 3,
}

impl Routing {
    pub fn from_u8(v: u8) -> Result<Self, DecodeError> {
        match v {
            0 => Ok(Self::ToAuthority),
            2 => Ok(Self::ById),
            3 => Ok(Self::BroadcastFromAuthority),
            _ => Err(DecodeError::InvalidValue {
                field: "routing mode",
                value: u32::from(v),
            }),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Side-channel metadata attached to every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingInfo {
    pub routing: Routing,
    /// Peer locator: source of an inbound frame, target of an outbound one.
    pub remote_id: Bdf,
    /// Locator of the local node as seen by the transport.
    pub own_id: Bdf,
}

impl RoutingInfo {
    pub fn to_authority() -> Self {
        Self {
            routing: Routing::ToAuthority,
            remote_id: Bdf::default(),
            own_id: Bdf::default(),
        }
    }

    pub fn by_id(remote_id: Bdf) -> Self {
        Self {
            routing: Routing::ById,
            remote_id,
            own_id: Bdf::default(),
        }
    }
}

/// One MCTP message with its routing metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Source EID for inbound frames, destination EID for outbound ones.
    pub eid: Eid,
    pub tag_owner: bool,
    pub msg_tag: u8,
    pub routing: RoutingInfo,
    /// MCTP message, starting with the message-type byte.
    pub payload: Vec<u8>,
}

/// Non-blocking channel bound to the interconnect.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one frame.
    async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError>;

    /// Wait for the next inbound frame.
    async fn recv_frame(&self) -> Result<Frame, TransportError>;
}

// ---------------------------------------------------------------------------
// UDP emulator
// ---------------------------------------------------------------------------

/// Serialize a frame into an emulator datagram.
pub fn encode_datagram(frame: &Frame) -> Result<Vec<u8>, TransportError> {
    let len = EMULATOR_HEADER_SIZE + frame.payload.len();
    if len > MAX_DATAGRAM_SIZE {
        return Err(TransportError::TooLarge(len));
    }
    let mut buf = Vec::with_capacity(len);
    buf.push(frame.eid);
    buf.push(frame.routing.routing.as_u8());
    buf.extend_from_slice(&frame.routing.remote_id.0.to_le_bytes());
    buf.extend_from_slice(&frame.routing.own_id.0.to_le_bytes());
    let mut tag = frame.msg_tag & MSG_TAG_MASK;
    if frame.tag_owner {
        tag |= TAG_OWNER_BIT;
    }
    buf.push(tag);
    buf.extend_from_slice(&frame.payload);
    Ok(buf)
}

/// Parse an emulator datagram.
pub fn decode_datagram(buf: &[u8]) -> Result<Frame, DecodeError> {
    let mut r = Reader::new(buf);
    let eid = r.u8("eid")?;
    let routing = Routing::from_u8(r.u8("routing mode")?)?;
    let remote_id = Bdf(r.u16_le("remote id")?);
    let own_id = Bdf(r.u16_le("own id")?);
    let tag = r.u8("tag")?;
    Ok(Frame {
        eid,
        tag_owner: tag & TAG_OWNER_BIT != 0,
        msg_tag: tag & MSG_TAG_MASK,
        routing: RoutingInfo {
            routing,
            remote_id,
            own_id,
        },
        payload: r.rest().to_vec(),
    })
}

/// Interconnect emulation over UDP.
pub struct UdpEmulatorTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpEmulatorTransport {
    /// Bind `local` and exchange datagrams with `peer`.
    pub async fn bind(local: SocketAddr, peer: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(local).await?;
        tracing::debug!("UDP emulator bound to {} (peer {})", local, peer);
        Ok(Self { socket, peer })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl Transport for UdpEmulatorTransport {
    async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        let datagram = encode_datagram(frame)?;
        self.socket.send_to(&datagram, self.peer).await?;
        Ok(())
    }

    async fn recv_frame(&self) -> Result<Frame, TransportError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (n, from) = self.socket.recv_from(&mut buf).await?;
        if from != self.peer {
            tracing::trace!("datagram from {} (configured peer {})", from, self.peer);
        }
        Ok(decode_datagram(&buf[..n])?)
    }
}

// ---------------------------------------------------------------------------
// In-process channel
// ---------------------------------------------------------------------------

/// One end of an in-process transport pair.
pub struct ChannelTransport {
    tx: mpsc::Sender<Frame>,
    rx: Mutex<mpsc::Receiver<Frame>>,
}

impl ChannelTransport {
    /// Create two connected ends; frames sent on one are received on the other.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        (
            Self {
                tx: a_tx,
                rx: Mutex::new(b_rx),
            },
            Self {
                tx: b_tx,
                rx: Mutex::new(a_rx),
            },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        self.tx
            .send(frame.clone())
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn recv_frame(&self) -> Result<Frame, TransportError> {
        self.rx.lock().await.recv().await.ok_or(TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> Frame {
        Frame {
            eid: 0x08,
            tag_owner: true,
            msg_tag: 5,
            routing: RoutingInfo {
                routing: Routing::ById,
                remote_id: Bdf(0x0300),
                own_id: Bdf(0x0418),
            },
            payload: vec![0x01, 0x85, 0x05, 0x01],
        }
    }

    #[test]
    fn test_bdf_fields() {
        let bdf = Bdf::new(0x03, 0x1f, 0x7);
        assert_eq!(bdf.bus(), 0x03);
        assert_eq!(bdf.device(), 0x1f);
        assert_eq!(bdf.function(), 0x7);
        assert_eq!(bdf.to_string(), "03:1f.7");
    }

    #[test]
    fn test_bdf_parse() {
        assert_eq!("03:1f.7".parse::<Bdf>().unwrap(), Bdf::new(0x03, 0x1f, 7));
        assert_eq!("0x0300".parse::<Bdf>().unwrap(), Bdf(0x0300));
        assert_eq!("256".parse::<Bdf>().unwrap(), Bdf(0x0100));
        assert!("03:20.0".parse::<Bdf>().is_err());
        assert!("03:00".parse::<Bdf>().is_err());
        assert!("pcie".parse::<Bdf>().is_err());
    }

    #[test]
    fn test_datagram_layout() {
        let buf = encode_datagram(&sample_frame()).unwrap();
        assert_eq!(
            buf,
            vec![0x08, 0x02, 0x00, 0x03, 0x18, 0x04, 0x0d, 0x01, 0x85, 0x05, 0x01]
        );
        assert_eq!(decode_datagram(&buf).unwrap(), sample_frame());
    }

    #[test]
    fn test_decode_rejects_short_and_bad_routing() {
        assert!(matches!(
            decode_datagram(&[0x08, 0x02, 0x00]),
            Err(DecodeError::Truncated { .. })
        ));
        assert!(matches!(
            decode_datagram(&[0x08, 0x01, 0, 0, 0, 0, 0]),
            Err(DecodeError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(TransportError::Closed.is_fatal());
        assert!(!TransportError::TooLarge(9000).is_fatal());
        let io = std::io::Error::new(std::io::ErrorKind::WouldBlock, "again");
        assert!(!TransportError::Io(io).is_fatal());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(TransportError::Io(io).is_fatal());
    }

    #[tokio::test]
    async fn test_channel_pair_delivers_both_ways() {
        let (a, b) = ChannelTransport::pair(4);
        a.send_frame(&sample_frame()).await.unwrap();
        assert_eq!(b.recv_frame().await.unwrap(), sample_frame());

        b.send_frame(&sample_frame()).await.unwrap();
        assert_eq!(a.recv_frame().await.unwrap(), sample_frame());

        drop(b);
        assert!(matches!(
            a.recv_frame().await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_udp_emulator_loopback() {
        let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let a_sock = UdpSocket::bind(any).await.unwrap();
        let a_addr = a_sock.local_addr().unwrap();
        drop(a_sock);

        let b = UdpEmulatorTransport::bind(any, a_addr).await.unwrap();
        let a = UdpEmulatorTransport::bind(a_addr, b.local_addr().unwrap())
            .await
            .unwrap();

        a.send_frame(&sample_frame()).await.unwrap();
        assert_eq!(b.recv_frame().await.unwrap(), sample_frame());
    }
}
