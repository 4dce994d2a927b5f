//! Commands and their parameter blocks.

use bytes::{Buf, BufMut};

use super::wire_format::MAX_COMMAND_PARAMS;
use crate::error::DecodeError;

/// Command identifiers understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandId {
    /// Reply with a Config packet.
    ReadConfig = 0x01,
    /// Reply with LogList pages.
    ListLogs = 0x03,
    /// Reply with the selected log as Data packets.
    ReadLog = 0x04,
    /// Erase all recorded logs.
    ClearLogs = 0x05,
    /// Start streaming DebugMessage packets.
    StartDebugLog = 0x06,
    /// Stop the debug stream.
    StopDebugLog = 0x07,
    /// Reply with the last-fault blob as Data packets.
    ReadLastFault = 0x08,
}

impl TryFrom<u8> for CommandId {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => Self::ReadConfig,
            0x03 => Self::ListLogs,
            0x04 => Self::ReadLog,
            0x05 => Self::ClearLogs,
            0x06 => Self::StartDebugLog,
            0x07 => Self::StopDebugLog,
            0x08 => Self::ReadLastFault,
            other => {
                return Err(DecodeError::InvalidField {
                    field: "command",
                    value: u32::from(other),
                })
            }
        })
    }
}

/// A command together with its parameters.
///
/// Each variant fixes the parameter layout, so an id can never be paired
/// with the wrong parameter shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Read the device configuration.
    ReadConfig,
    /// List recorded logs.
    ListLogs,
    /// Download the log at `index`.
    ReadLog {
        /// Log index as reported in the listing.
        index: u16,
    },
    /// Erase all logs.
    ClearLogs,
    /// Start the debug-log stream.
    StartDebugLog {
        /// Most verbose level to stream (0 = fatal .. 4 = verbose).
        level: u8,
        /// Bit mask of firmware sources to include.
        source_mask: u32,
    },
    /// Stop the debug-log stream.
    StopDebugLog,
    /// Read the last-fault blob.
    ReadLastFault,
}

impl Command {
    /// Wire identifier.
    pub fn id(&self) -> CommandId {
        match self {
            Self::ReadConfig => CommandId::ReadConfig,
            Self::ListLogs => CommandId::ListLogs,
            Self::ReadLog { .. } => CommandId::ReadLog,
            Self::ClearLogs => CommandId::ClearLogs,
            Self::StartDebugLog { .. } => CommandId::StartDebugLog,
            Self::StopDebugLog => CommandId::StopDebugLog,
            Self::ReadLastFault => CommandId::ReadLastFault,
        }
    }

    /// Size of the parameter block.
    pub fn params_len(&self) -> usize {
        Self::params_len_for(self.id())
    }

    fn params_len_for(id: CommandId) -> usize {
        match id {
            CommandId::ReadLog => 2,
            CommandId::StartDebugLog => 5,
            _ => 0,
        }
    }

    pub(crate) fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.id() as u8);
        match *self {
            Self::ReadLog { index } => buf.put_u16_le(index),
            Self::StartDebugLog { level, source_mask } => {
                buf.put_u8(level);
                buf.put_u32_le(source_mask);
            }
            _ => {}
        }
    }

    /// Read command id and parameters from the remaining body.
    ///
    /// Trailing bytes beyond the command's layout are ignored, the firmware
    /// pads parameter blocks.
    pub(crate) fn read_from(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        if !buf.has_remaining() {
            return Err(DecodeError::TruncatedPayload {
                needed: 1,
                actual: 0,
            });
        }
        let id = CommandId::try_from(buf.get_u8())?;

        let params = buf.remaining();
        let needed = Self::params_len_for(id);
        if params < needed {
            return Err(DecodeError::TruncatedPayload {
                needed: 1 + needed,
                actual: 1 + params,
            });
        }
        if params > MAX_COMMAND_PARAMS {
            return Err(DecodeError::InvalidField {
                field: "params",
                value: params as u32,
            });
        }

        let command = match id {
            CommandId::ReadConfig => Self::ReadConfig,
            CommandId::ListLogs => Self::ListLogs,
            CommandId::ReadLog => Self::ReadLog {
                index: buf.get_u16_le(),
            },
            CommandId::ClearLogs => Self::ClearLogs,
            CommandId::StartDebugLog => Self::StartDebugLog {
                level: buf.get_u8(),
                source_mask: buf.get_u32_le(),
            },
            CommandId::StopDebugLog => Self::StopDebugLog,
            CommandId::ReadLastFault => Self::ReadLastFault,
        };
        buf.advance(buf.remaining());
        Ok(command)
    }
}
