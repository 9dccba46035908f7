//! CHIRP wire format — the on-wire shape of every discovery datagram.
//!
//! These types ARE the protocol. A discovery message is a fixed 42-byte
//! datagram; every field, offset, and tag value here is part of the wire
//! format and must not change within a protocol version.
//!
//! The raw layout is #[repr(C, packed)] for deterministic placement and
//! uses zerocopy derives for allocation-free serialization. There is no
//! unsafe code in this module. A parser rejects anything outside the
//! defined enumerations; it never normalizes unknown values.

use std::fmt;

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{NetworkEndian, U16};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::hash::Md5Hash;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Protocol marker at the head of every datagram.
pub const MAGIC: [u8; 5] = *b"CHIRP";

/// Current protocol version byte, directly after the magic.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Exact length of a discovery datagram. Anything else is rejected.
pub const MESSAGE_LEN: usize = 42;

/// Well-known UDP port for discovery broadcasts. Peers send to and
/// receive on this port so they rendezvous without prior knowledge.
pub const CHIRP_PORT: u16 = 7123;

// ── Message type ──────────────────────────────────────────────────────────────

/// The three verbs of the discovery protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Solicit OFFERs for a service kind from every peer in the group.
    Request = 0x01,
    /// Announce one service this peer provides.
    Offer = 0x02,
    /// Withdraw a previously offered service.
    Leaving = 0x03,
}

impl TryFrom<u8> for MessageType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageType::Request),
            0x02 => Ok(MessageType::Offer),
            0x03 => Ok(MessageType::Leaving),
            other => Err(DecodeError::UnknownMessageType(other)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> u8 {
        value as u8
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MessageType::Request => "REQUEST",
            MessageType::Offer => "OFFER",
            MessageType::Leaving => "LEAVING",
        })
    }
}

// ── Service identifier ────────────────────────────────────────────────────────

/// The kind of endpoint a service advertises, distinct from its port.
///
/// A closed enumeration fixed per protocol version. The derived ordering
/// follows the wire tags, which is what the service sets sort by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ServiceIdentifier {
    Control = 0x01,
    Heartbeat = 0x02,
    Monitoring = 0x03,
    Data = 0x04,
}

impl ServiceIdentifier {
    /// Every defined service kind, in tag order.
    pub const ALL: [ServiceIdentifier; 4] = [
        ServiceIdentifier::Control,
        ServiceIdentifier::Heartbeat,
        ServiceIdentifier::Monitoring,
        ServiceIdentifier::Data,
    ];
}

impl TryFrom<u8> for ServiceIdentifier {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(ServiceIdentifier::Control),
            0x02 => Ok(ServiceIdentifier::Heartbeat),
            0x03 => Ok(ServiceIdentifier::Monitoring),
            0x04 => Ok(ServiceIdentifier::Data),
            other => Err(DecodeError::UnknownServiceIdentifier(other)),
        }
    }
}

impl From<ServiceIdentifier> for u8 {
    fn from(value: ServiceIdentifier) -> u8 {
        value as u8
    }
}

impl fmt::Display for ServiceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServiceIdentifier::Control => "CONTROL",
            ServiceIdentifier::Heartbeat => "HEARTBEAT",
            ServiceIdentifier::Monitoring => "MONITORING",
            ServiceIdentifier::Data => "DATA",
        })
    }
}

// ── Raw layout ────────────────────────────────────────────────────────────────

/// The exact 42-byte datagram layout.
///
/// | Offset | Size | Field                 |
/// |--------|------|-----------------------|
/// | 0      | 5    | Magic `"CHIRP"`       |
/// | 5      | 1    | Protocol version      |
/// | 6      | 1    | MessageType tag       |
/// | 7      | 16   | Group hash            |
/// | 23     | 16   | Name hash             |
/// | 39     | 1    | ServiceIdentifier tag |
/// | 40     | 2    | Port, big-endian      |
#[derive(AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
struct RawMessage {
    magic: [u8; 5],
    version: u8,
    msg_type: u8,
    group_hash: [u8; 16],
    name_hash: [u8; 16],
    service_id: u8,
    port: U16<NetworkEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(RawMessage, [u8; MESSAGE_LEN]);

// ── Message ───────────────────────────────────────────────────────────────────

/// A validated discovery message.
///
/// Every value of this type can be assembled into a well-formed datagram,
/// and every datagram that parses yields exactly one value of this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub msg_type: MessageType,
    pub group_hash: Md5Hash,
    pub name_hash: Md5Hash,
    pub service_id: ServiceIdentifier,
    pub port: u16,
}

impl Message {
    pub fn new(
        msg_type: MessageType,
        group_hash: Md5Hash,
        name_hash: Md5Hash,
        service_id: ServiceIdentifier,
        port: u16,
    ) -> Self {
        Self {
            msg_type,
            group_hash,
            name_hash,
            service_id,
            port,
        }
    }

    /// Serialize into the fixed 42-byte wire form.
    pub fn assemble(&self) -> [u8; MESSAGE_LEN] {
        let raw = RawMessage {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            msg_type: self.msg_type.into(),
            group_hash: self.group_hash.to_bytes(),
            name_hash: self.name_hash.to_bytes(),
            service_id: self.service_id.into(),
            port: U16::new(self.port),
        };

        let mut out = [0u8; MESSAGE_LEN];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    /// Parse a received datagram.
    ///
    /// Fails when the length is not exactly 42, the magic or version do
    /// not match, or either enumeration tag is outside its defined set.
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != MESSAGE_LEN {
            return Err(DecodeError::BadLength(bytes.len()));
        }
        let raw = RawMessage::read_from(bytes).ok_or(DecodeError::BadLength(bytes.len()))?;

        if raw.magic != MAGIC {
            return Err(DecodeError::BadMagic);
        }
        if raw.version != PROTOCOL_VERSION {
            return Err(DecodeError::UnknownVersion(raw.version));
        }

        Ok(Self {
            msg_type: MessageType::try_from(raw.msg_type)?,
            group_hash: Md5Hash::from_bytes(raw.group_hash),
            name_hash: Md5Hash::from_bytes(raw.name_hash),
            service_id: ServiceIdentifier::try_from(raw.service_id)?,
            port: raw.port.get(),
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} group={} name={} service={} port={}",
            self.msg_type, self.group_hash, self.name_hash, self.service_id, self.port
        )
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why a received datagram was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("datagram length {0}, expected {MESSAGE_LEN}")]
    BadLength(usize),

    #[error("magic bytes mismatch")]
    BadMagic,

    #[error("unknown protocol version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("unknown service identifier: 0x{0:02x}")]
    UnknownServiceIdentifier(u8),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
