//! Protocol module - wire format, packet types and codecs.
//!
//! This module implements the binary protocol spoken over the GATT link:
//! - 2-byte header (type tag + reference)
//! - Typed packet bodies with Little Endian fields
//! - Versioned codec selection after the handshake

mod command;
mod config;
mod packet;
mod version;
mod wire_format;

pub use command::{Command, CommandId};
pub use config::{
    Channel, SampleRates, SensorConfig, WakeUpBehavior, CONFIG_BODY_SIZE,
    DEFAULT_SLEEP_DELAY_SECS, ECG_SAMPLE_RATES, IMU_SAMPLE_RATES, ON_OFF_RATES, RATE_OFF, RATE_ON,
};
pub use packet::{
    chunk_payload, DataChunk, DebugMessage, LogItem, LogLevel, LogListPage, Packet, StatusCode,
};
pub use version::{codec_for, CanonicalCodec, PacketCodec, ProtocolVersion};
pub use wire_format::{
    Header, PacketType, DATA_HEADER_SIZE, HEADER_SIZE, INVALID_REF, LOG_ITEM_SIZE, LOG_STREAM_REF,
    MAX_COMMAND_PARAMS, MAX_DATA_PAYLOAD, MAX_LOG_ITEMS, MAX_PACKET_SIZE,
};
