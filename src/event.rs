//! Events delivered from a session to its consumer.
//!
//! Events are sent over a tokio unbounded channel in the order the session
//! produces them. A closed receiver is not an error: the session keeps
//! running and drops further events.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::DecodeError;
use crate::protocol::{DebugMessage, LogItem, ProtocolVersion, SensorConfig, StatusCode};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No link.
    Disconnected,
    /// Link requested, waiting for the transport.
    Connecting,
    /// Link up, waiting for the GATT profile and the bootstrap.
    DiscoveringServices,
    /// Bootstrap finished, the first configuration has been read.
    Connected,
}

/// Kind of request a reference was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Handshake,
    TimeSync,
    Config,
    Command,
    LogList,
    LogDownload,
    /// Last-fault read issued during the bootstrap.
    FaultLog,
}

/// Failure surfaced to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The peer lacks the sensor service or speaks an unsupported protocol.
    UnsupportedDevice,
    /// Transport-level failure. The connection has been dropped.
    ControllerError(String),
    /// A Config packet could not be decoded.
    ConfigReadFailure(DecodeError),
    /// A Data packet could not be decoded.
    DataReadFailure(DecodeError),
    /// Any other packet could not be decoded.
    ReadFailure(DecodeError),
    /// A transfer violated its bounds and was dropped.
    Corrupted { reference: u8 },
    /// The transport rejected a write.
    WriteFailed { reference: u8 },
}

/// Everything a session reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorEvent {
    /// Lifecycle transition.
    StateChanged(ConnectionState),
    /// The peer answered the handshake.
    VersionNegotiated(ProtocolVersion),
    /// A configuration was read or echoed back.
    ConfigUpdated { reference: u8, config: SensorConfig },
    /// The device answered a request with a status code.
    StatusReceived { reference: u8, status: StatusCode },
    /// One page of a log listing.
    LogListPage {
        reference: u8,
        items: Vec<LogItem>,
        complete: bool,
    },
    /// All pages of a log listing, emitted after the last page.
    LogListCompleted { reference: u8, items: Vec<LogItem> },
    /// Bytes received so far for a download.
    TransferProgress {
        reference: u8,
        received: u32,
        total: u32,
    },
    /// A download finished.
    TransferCompleted { reference: u8, data: Bytes },
    /// Lines of the last-fault blob read during the bootstrap.
    FaultReport { reset_marker: u64, lines: Vec<String> },
    /// Debug stream line.
    LogLine(DebugMessage),
    /// No reply arrived for a request within the configured timeout.
    RequestTimedOut { reference: u8, kind: RequestKind },
    /// Something went wrong.
    Error(ErrorKind),
}

/// Sending half of the event channel.
pub type EventSender = mpsc::UnboundedSender<SensorEvent>;

/// Receiving half of the event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<SensorEvent>;

/// Create a connected event channel.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
