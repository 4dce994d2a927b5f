//! Packet variants with typed bodies.
//!
//! Uses `bytes::Bytes` for Data payloads and debug text so reassembly can
//! hand chunks around without copying.
//!
//! # Example
//!
//! ```
//! use sensorlink::protocol::{Packet, StatusCode};
//!
//! let packet = Packet::Status { reference: 7, status: StatusCode(200) };
//! let bytes = packet.encode();
//! assert_eq!(&bytes[..], &[3, 7, 200, 0]);
//! assert_eq!(Packet::decode(&bytes).unwrap(), packet);
//! ```

use std::borrow::Cow;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::command::Command;
use super::config::SensorConfig;
use super::version::ProtocolVersion;
use super::wire_format::{
    Header, PacketType, DATA_HEADER_SIZE, HEADER_SIZE, LOG_ITEM_SIZE, MAX_LOG_ITEMS,
};
use crate::error::DecodeError;

/// Result code carried by a Status packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u16);

impl StatusCode {
    /// Codes at or above this value report a failed request.
    pub const FAILURE_THRESHOLD: u16 = 300;

    /// Request accepted and completed.
    pub const OK: StatusCode = StatusCode(200);

    /// Whether the request this status answers failed.
    #[inline]
    pub fn is_failure(self) -> bool {
        self.0 >= Self::FAILURE_THRESHOLD
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Severity of a device debug message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Fatal,
    Error,
    Warning,
    Info,
    Verbose,
    /// Level outside the documented range.
    Other(u8),
}

impl LogLevel {
    /// Bracketed label, `None` for undocumented levels.
    pub fn label(self) -> Option<&'static str> {
        match self {
            Self::Fatal => Some("[FATAL]"),
            Self::Error => Some("[ERROR]"),
            Self::Warning => Some("[WARNING]"),
            Self::Info => Some("[INFO]"),
            Self::Verbose => Some("[VERBOSE]"),
            Self::Other(_) => None,
        }
    }
}

impl From<u8> for LogLevel {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Fatal,
            1 => Self::Error,
            2 => Self::Warning,
            3 => Self::Info,
            4 => Self::Verbose,
            other => Self::Other(other),
        }
    }
}

impl From<LogLevel> for u8 {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Fatal => 0,
            LogLevel::Error => 1,
            LogLevel::Warning => 2,
            LogLevel::Info => 3,
            LogLevel::Verbose => 4,
            LogLevel::Other(raw) => raw,
        }
    }
}

/// One recorded log as listed by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogItem {
    /// Log identifier / index.
    pub id: u32,
    /// Size in bytes.
    pub size: u32,
    /// Last modification time as reported by the device.
    pub modified: u64,
}

/// One page of a log listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogListPage {
    /// Items on this page.
    pub items: Vec<LogItem>,
    /// `false` while more pages follow under the same reference.
    pub complete: bool,
}

/// One chunk of a bulk transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunk {
    /// Position of `payload` in the reassembled buffer.
    pub offset: u32,
    /// Size of the whole transfer.
    pub total: u32,
    /// Chunk bytes.
    pub payload: Bytes,
}

/// Unsolicited debug line from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugMessage {
    /// Device uptime in milliseconds.
    pub timestamp_ms: u32,
    /// Severity.
    pub level: LogLevel,
    /// Raw message text.
    pub text: Bytes,
}

impl DebugMessage {
    /// Message text, invalid UTF-8 replaced.
    pub fn text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.text)
    }
}

impl fmt::Display for DebugMessage {
    /// Formats as `<secs>.<ms> [LEVEL] text`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03} ", self.timestamp_ms / 1000, self.timestamp_ms % 1000)?;
        if let Some(label) = self.level.label() {
            write!(f, "{} ", label)?;
        }
        write!(f, "{}", self.text_lossy())
    }
}

/// A decoded protocol packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Version exchange.
    Handshake {
        reference: u8,
        version: ProtocolVersion,
    },
    /// Host clock in microseconds since the Unix epoch.
    Time { reference: u8, timestamp_us: u64 },
    /// Result of the request with the same reference.
    Status { reference: u8, status: StatusCode },
    /// Command to the device.
    Command { reference: u8, command: Command },
    /// Device configuration.
    Config {
        reference: u8,
        config: SensorConfig,
    },
    /// Log listing page.
    LogList { reference: u8, page: LogListPage },
    /// Bulk transfer chunk.
    Data { reference: u8, chunk: DataChunk },
    /// Debug stream line.
    DebugMessage {
        reference: u8,
        message: DebugMessage,
    },
}

impl Packet {
    /// Packet kind.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Handshake { .. } => PacketType::Handshake,
            Self::Time { .. } => PacketType::Time,
            Self::Status { .. } => PacketType::Status,
            Self::Command { .. } => PacketType::Command,
            Self::Config { .. } => PacketType::Config,
            Self::LogList { .. } => PacketType::LogList,
            Self::Data { .. } => PacketType::Data,
            Self::DebugMessage { .. } => PacketType::DebugMessage,
        }
    }

    /// Request reference.
    pub fn reference(&self) -> u8 {
        match self {
            Self::Handshake { reference, .. }
            | Self::Time { reference, .. }
            | Self::Status { reference, .. }
            | Self::Command { reference, .. }
            | Self::Config { reference, .. }
            | Self::LogList { reference, .. }
            | Self::Data { reference, .. }
            | Self::DebugMessage { reference, .. } => *reference,
        }
    }

    /// Exact number of bytes `encode` produces.
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Command { command, .. } => HEADER_SIZE + 1 + command.params_len(),
            Self::LogList { page, .. } => {
                HEADER_SIZE + 2 + page.items.len().min(MAX_LOG_ITEMS) * LOG_ITEM_SIZE
            }
            Self::Data { chunk, .. } => DATA_HEADER_SIZE + chunk.payload.len(),
            Self::DebugMessage { message, .. } => {
                self.packet_type().min_size() + message.text.len()
            }
            _ => self.packet_type().min_size(),
        }
    }

    /// Encode to wire bytes. Never fails.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Encode into an existing buffer.
    pub fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_slice(&Header::new(self.packet_type(), self.reference()).encode());
        match self {
            Self::Handshake { version, .. } => {
                buf.put_u8(version.major);
                buf.put_u8(version.minor);
            }
            Self::Time { timestamp_us, .. } => buf.put_u64_le(*timestamp_us),
            Self::Status { status, .. } => buf.put_u16_le(status.0),
            Self::Command { command, .. } => command.write_to(buf),
            Self::Config { config, .. } => config.write_to(buf),
            Self::LogList { page, .. } => {
                // Pages above the bound are clipped, the count byte must match.
                let count = page.items.len().min(MAX_LOG_ITEMS);
                buf.put_u8(count as u8);
                buf.put_u8(u8::from(page.complete));
                for item in &page.items[..count] {
                    buf.put_u32_le(item.id);
                    buf.put_u32_le(item.size);
                    buf.put_u64_le(item.modified);
                }
            }
            Self::Data { chunk, .. } => {
                buf.put_u32_le(chunk.offset);
                buf.put_u32_le(chunk.total);
                buf.put_slice(&chunk.payload);
            }
            Self::DebugMessage { message, .. } => {
                buf.put_u32_le(message.timestamp_ms);
                buf.put_u8(message.level.into());
                buf.put_slice(&message.text);
            }
        }
    }

    /// Decode a complete transport message.
    ///
    /// Validates header, type tag, reference and the minimum size of the
    /// claimed type before touching any body field.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let header = Header::peek(buf)?;
        let packet_type = header.packet_type()?;

        let needed = packet_type.min_size();
        if buf.len() < needed {
            return Err(DecodeError::TruncatedPayload {
                needed,
                actual: buf.len(),
            });
        }

        let reference = header.reference;
        let mut body = &buf[HEADER_SIZE..];

        let packet = match packet_type {
            PacketType::Handshake => Self::Handshake {
                reference,
                version: ProtocolVersion::new(body.get_u8(), body.get_u8()),
            },
            PacketType::Time => Self::Time {
                reference,
                timestamp_us: body.get_u64_le(),
            },
            PacketType::Status => Self::Status {
                reference,
                status: StatusCode(body.get_u16_le()),
            },
            PacketType::Command => Self::Command {
                reference,
                command: Command::read_from(&mut body)?,
            },
            PacketType::Config => Self::Config {
                reference,
                config: SensorConfig::read_from(&mut body),
            },
            PacketType::LogList => Self::LogList {
                reference,
                page: decode_log_list(&mut body, buf.len())?,
            },
            PacketType::Data => Self::Data {
                reference,
                chunk: DataChunk {
                    offset: body.get_u32_le(),
                    total: body.get_u32_le(),
                    payload: Bytes::copy_from_slice(body),
                },
            },
            PacketType::DebugMessage => Self::DebugMessage {
                reference,
                message: DebugMessage {
                    timestamp_ms: body.get_u32_le(),
                    level: LogLevel::from(body.get_u8()),
                    text: Bytes::copy_from_slice(body),
                },
            },
        };

        Ok(packet)
    }
}

fn decode_log_list(body: &mut &[u8], packet_len: usize) -> Result<LogListPage, DecodeError> {
    let count = usize::from(body.get_u8());
    let complete = body.get_u8() != 0;

    if count > MAX_LOG_ITEMS {
        return Err(DecodeError::InvalidField {
            field: "count",
            value: count as u32,
        });
    }

    let needed = count * LOG_ITEM_SIZE;
    if body.remaining() < needed {
        return Err(DecodeError::TruncatedPayload {
            needed: HEADER_SIZE + 2 + needed,
            actual: packet_len,
        });
    }

    let items = (0..count)
        .map(|_| LogItem {
            id: body.get_u32_le(),
            size: body.get_u32_le(),
            modified: body.get_u64_le(),
        })
        .collect();

    Ok(LogListPage { items, complete })
}

/// Split `data` into Data packets that each fit into `max_packet` bytes.
///
/// Offsets advance by the previous chunk's payload length. An empty
/// payload still produces one packet announcing a zero-length transfer.
///
/// # Example
///
/// ```
/// use sensorlink::protocol::{chunk_payload, Packet, MAX_PACKET_SIZE};
///
/// let packets = chunk_payload(9, &[0xAB; 300], MAX_PACKET_SIZE);
/// assert_eq!(packets.len(), 3);
/// assert!(packets.iter().all(|p| p.encoded_len() <= MAX_PACKET_SIZE));
/// ```
pub fn chunk_payload(reference: u8, data: &[u8], max_packet: usize) -> Vec<Packet> {
    let chunk_size = max_packet.saturating_sub(DATA_HEADER_SIZE).max(1);
    let total = data.len() as u32;

    if data.is_empty() {
        return vec![Packet::Data {
            reference,
            chunk: DataChunk {
                offset: 0,
                total: 0,
                payload: Bytes::new(),
            },
        }];
    }

    data.chunks(chunk_size)
        .enumerate()
        .map(|(i, part)| Packet::Data {
            reference,
            chunk: DataChunk {
                offset: (i * chunk_size) as u32,
                total,
                payload: Bytes::copy_from_slice(part),
            },
        })
        .collect()
}
