//! Protocol versions and the codec selected for each.
//!
//! The handshake reply tells the host which protocol generation the
//! firmware speaks. Codecs are looked up by that version instead of
//! branching on it throughout the session.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::packet::Packet;
use crate::error::DecodeError;

/// Protocol version announced in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion {
    /// Incompatible wire changes.
    pub major: u8,
    /// Additive changes.
    pub minor: u8,
}

impl ProtocolVersion {
    /// Version this host announces.
    pub const CURRENT: ProtocolVersion = ProtocolVersion::new(1, 2);

    /// Create a version.
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Encoder/decoder for one protocol generation.
pub trait PacketCodec: Send + Sync + 'static {
    /// Generation name for logs.
    fn name(&self) -> &'static str;

    /// Encode a packet. Never fails.
    fn encode(&self, packet: &Packet) -> Bytes;

    /// Decode one transport message.
    fn decode(&self, buf: &[u8]) -> Result<Packet, DecodeError>;
}

/// Codec for protocol major version 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalCodec;

impl PacketCodec for CanonicalCodec {
    fn name(&self) -> &'static str {
        "v1"
    }

    #[inline]
    fn encode(&self, packet: &Packet) -> Bytes {
        packet.encode()
    }

    #[inline]
    fn decode(&self, buf: &[u8]) -> Result<Packet, DecodeError> {
        Packet::decode(buf)
    }
}

/// Codec for a negotiated version, `None` if the generation is unsupported.
pub fn codec_for(version: ProtocolVersion) -> Option<&'static dyn PacketCodec> {
    static CANONICAL: CanonicalCodec = CanonicalCodec;

    match version.major {
        1 => Some(&CANONICAL),
        _ => None,
    }
}
