//! Wire format constants and the two-byte packet header.
//!
//! Every packet starts with the same header:
//! ```text
//! ┌──────────┬───────────┬──────────────────────────┐
//! │ Type     │ Reference │ Body                     │
//! │ 1 byte   │ 1 byte    │ fixed or remaining bytes │
//! └──────────┴───────────┴──────────────────────────┘
//! ```
//!
//! All multi-byte integers in packet bodies are Little Endian.

use crate::error::DecodeError;

/// Header size in bytes (type tag + reference).
pub const HEADER_SIZE: usize = 2;

/// Reference value meaning "no correlation". Never assigned to a request.
pub const INVALID_REF: u8 = 0;

/// Fixed reference reserved for the debug-log stream commands.
pub const LOG_STREAM_REF: u8 = 255;

/// Largest single transport message the device accepts.
pub const MAX_PACKET_SIZE: usize = 152;

/// Fixed part of a Data packet: header, offset, total length.
pub const DATA_HEADER_SIZE: usize = HEADER_SIZE + 8;

/// Largest Data payload that fits into one transport message.
pub const MAX_DATA_PAYLOAD: usize = MAX_PACKET_SIZE - DATA_HEADER_SIZE;

/// Size of one log list item on the wire.
pub const LOG_ITEM_SIZE: usize = 16;

/// Maximum items in one LogList page.
pub const MAX_LOG_ITEMS: usize = (MAX_PACKET_SIZE - HEADER_SIZE - 2) / LOG_ITEM_SIZE;

/// Maximum size of a command parameter block.
pub const MAX_COMMAND_PARAMS: usize = 32;

/// Packet type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Protocol version exchange.
    Handshake = 1,
    /// Host clock synchronization.
    Time = 2,
    /// Result code for a request.
    Status = 3,
    /// Command with parameters.
    Command = 4,
    /// Device configuration.
    Config = 5,
    /// One page of the recorded log listing.
    LogList = 6,
    /// Chunk of a bulk transfer.
    Data = 7,
    /// Unsolicited debug log line.
    DebugMessage = 8,
}

impl PacketType {
    /// Smallest total packet size (header included) for this type.
    pub fn min_size(self) -> usize {
        HEADER_SIZE
            + match self {
                Self::Handshake => 2,
                Self::Time => 8,
                Self::Status => 2,
                Self::Command => 1,
                Self::Config => super::config::CONFIG_BODY_SIZE,
                Self::LogList => 2,
                Self::Data => 8,
                Self::DebugMessage => 5,
            }
    }

    /// Whether the device ever sends this type to the host.
    pub fn is_inbound(self) -> bool {
        !matches!(self, Self::Time | Self::Command)
    }
}

impl TryFrom<u8> for PacketType {
    type Error = DecodeError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            1 => Self::Handshake,
            2 => Self::Time,
            3 => Self::Status,
            4 => Self::Command,
            5 => Self::Config,
            6 => Self::LogList,
            7 => Self::Data,
            8 => Self::DebugMessage,
            other => return Err(DecodeError::UnknownType(other)),
        })
    }
}

/// Decoded packet header.
///
/// The type tag is kept raw so that unknown types can be classified
/// without failing the header read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Raw type tag.
    pub type_tag: u8,
    /// Request reference (0 = invalid).
    pub reference: u8,
}

impl Header {
    /// Create a new header.
    pub fn new(packet_type: PacketType, reference: u8) -> Self {
        Self {
            type_tag: packet_type as u8,
            reference,
        }
    }

    /// Encode header to bytes.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        [self.type_tag, self.reference]
    }

    /// Read the header of a received packet without decoding the body.
    ///
    /// # Example
    ///
    /// ```
    /// use sensorlink::protocol::{Header, PacketType};
    ///
    /// let header = Header::peek(&[3, 42, 200, 0]).unwrap();
    /// assert_eq!(header.packet_type().unwrap(), PacketType::Status);
    /// assert_eq!(header.reference, 42);
    /// ```
    pub fn peek(buf: &[u8]) -> Result<Self, DecodeError> {
        let header = match buf {
            [type_tag, reference, ..] => Self {
                type_tag: *type_tag,
                reference: *reference,
            },
            _ => return Err(DecodeError::MalformedHeader),
        };
        header.validate()?;
        Ok(header)
    }

    /// Validate the header: the reference must not be the invalid sentinel.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.reference == INVALID_REF {
            return Err(DecodeError::MalformedHeader);
        }
        Ok(())
    }

    /// Typed packet kind, if the tag is known.
    pub fn packet_type(&self) -> Result<PacketType, DecodeError> {
        PacketType::try_from(self.type_tag)
    }
}
