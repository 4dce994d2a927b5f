//! Connection state machine.
//!
//! A [`Session`] owns one link to one device. It is synchronous and does no
//! I/O of its own: transport callbacks go in through
//! [`Session::handle_transport_event`], outgoing packets leave through the
//! [`Transport`] primitives and everything worth reporting is sent as a
//! [`SensorEvent`].
//!
//! # Bootstrap
//!
//! ```text
//! Disconnected ─connect()─► Connecting ─link up─► DiscoveringServices
//!     ─profile ok─► Handshake ─reply─► Time + ReadLastFault (or ReadConfig)
//!     ─fault blob / status / timeout─► ReadConfig ─Config─► Connected
//! ```
//!
//! A session is single use. Once it has left `Disconnected` it cannot be
//! connected again; create a new one for the next connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{DecodeError, Result, SensorError};
use crate::event::{
    ConnectionState, ErrorKind, EventSender, RequestKind, SensorEvent,
};
use crate::protocol::{
    codec_for, CanonicalCodec, Command, DataChunk, Header, LogItem, LogListPage, Packet,
    PacketCodec, PacketType, ProtocolVersion, SensorConfig, StatusCode, INVALID_REF,
    LOG_STREAM_REF,
};
use crate::reassembly::{TransferEvent, TransferTable, DEFAULT_MAX_TRANSFER_SIZE};
use crate::reference::{ReferenceAllocator, DEFAULT_REF_END, DEFAULT_REF_START};
use crate::transport::{GattProfile, Transport, TransportEvent};

/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between timeout sweeps of the sensor task.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// First firmware version that keeps a last-fault log.
pub const DEFAULT_MIN_FAULT_LOG_VERSION: ProtocolVersion = ProtocolVersion::new(1, 1);

/// Session settings.
///
/// Loadable from JSON; missing fields keep their defaults.
///
/// ```
/// use sensorlink::SessionConfig;
///
/// let config = SessionConfig::from_json(r#"{ "request_timeout_ms": 2500 }"#).unwrap();
/// assert_eq!(config.request_timeout(), Some(std::time::Duration::from_millis(2500)));
/// assert_eq!(config.reference_start, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// First request reference.
    pub reference_start: u8,
    /// Last request reference.
    pub reference_end: u8,
    /// Idle time after which a request is abandoned. `None` disables timeouts.
    pub request_timeout_ms: Option<u64>,
    /// Firmware versions at or above this one are asked for their fault log.
    pub min_fault_log_version: ProtocolVersion,
    /// Largest Data transfer accepted.
    pub max_transfer_size: u32,
    /// How often the sensor task looks for timed-out requests.
    pub sweep_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reference_start: DEFAULT_REF_START,
            reference_end: DEFAULT_REF_END,
            request_timeout_ms: Some(DEFAULT_REQUEST_TIMEOUT.as_millis() as u64),
            min_fault_log_version: DEFAULT_MIN_FAULT_LOG_VERSION,
            max_transfer_size: DEFAULT_MAX_TRANSFER_SIZE,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL.as_millis() as u64,
        }
    }
}

impl SessionConfig {
    /// Parse and validate settings from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the settings can be used.
    pub fn validate(&self) -> Result<()> {
        ReferenceAllocator::new(self.reference_start, self.reference_end)?;
        if self.sweep_interval_ms == 0 {
            return Err(SensorError::InvalidConfig(
                "sweep interval must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Sweep interval as a duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// A request waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outgoing {
    Handshake,
    Time,
    Config(SensorConfig),
    Command(Command),
}

impl Outgoing {
    fn kind(&self) -> RequestKind {
        match self {
            Self::Handshake => RequestKind::Handshake,
            Self::Time => RequestKind::TimeSync,
            Self::Config(_) | Self::Command(Command::ReadConfig) => RequestKind::Config,
            Self::Command(Command::ListLogs) => RequestKind::LogList,
            Self::Command(Command::ReadLog { .. }) => RequestKind::LogDownload,
            Self::Command(_) => RequestKind::Command,
        }
    }

    fn into_packet(self, reference: u8) -> Packet {
        match self {
            Self::Handshake => Packet::Handshake {
                reference,
                version: ProtocolVersion::CURRENT,
            },
            Self::Time => Packet::Time {
                reference,
                timestamp_us: unix_micros(),
            },
            Self::Config(config) => Packet::Config { reference, config },
            Self::Command(command) => Packet::Command { reference, command },
        }
    }
}

/// Whether a command belongs to the debug stream and uses its fixed reference.
pub(crate) fn is_stream_command(command: &Command) -> bool {
    matches!(
        command,
        Command::StartDebugLog { .. } | Command::StopDebugLog
    )
}

fn unix_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Split a last-fault blob into its reset marker and message lines.
///
/// The blob starts with an 8-byte Little Endian marker; a zero marker means
/// the device has not faulted. The rest is NUL-separated text.
///
/// ```
/// use sensorlink::session::parse_fault_report;
///
/// let mut blob = 7u64.to_le_bytes().to_vec();
/// blob.extend_from_slice(b"watchdog\0\0stack overflow\0");
/// let (marker, lines) = parse_fault_report(&blob).unwrap();
/// assert_eq!(marker, 7);
/// assert_eq!(lines, vec!["watchdog", "stack overflow"]);
/// ```
pub fn parse_fault_report(blob: &[u8]) -> Option<(u64, Vec<String>)> {
    let (marker, text) = blob.split_first_chunk::<8>()?;
    let marker = u64::from_le_bytes(*marker);
    if marker == 0 {
        return None;
    }
    let lines = text
        .split(|b| *b == 0)
        .filter(|segment| !segment.is_empty())
        .map(|segment| String::from_utf8_lossy(segment).into_owned())
        .collect();
    Some((marker, lines))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bootstrap {
    Idle,
    AwaitHandshake(u8),
    AwaitFaultLog(u8),
    AwaitConfig(u8),
    Ready,
}

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    kind: RequestKind,
    last_activity: Instant,
}

/// State machine for one connection.
pub struct Session<T: Transport> {
    transport: T,
    events: EventSender,
    config: SessionConfig,
    refs: Arc<ReferenceAllocator>,
    writable: Arc<AtomicBool>,
    codec: &'static dyn PacketCodec,
    state: ConnectionState,
    spent: bool,
    version: Option<ProtocolVersion>,
    time_synced: bool,
    bootstrap: Bootstrap,
    transfers: TransferTable,
    listings: HashMap<u8, Vec<LogItem>>,
    pending: HashMap<u8, PendingRequest>,
}

impl<T: Transport> Session<T> {
    /// Create a disconnected session.
    pub fn new(transport: T, events: EventSender, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let refs = ReferenceAllocator::new(config.reference_start, config.reference_end)?;
        let transfers = TransferTable::new(config.max_transfer_size);
        Ok(Self {
            transport,
            events,
            config,
            refs: Arc::new(refs),
            writable: Arc::new(AtomicBool::new(false)),
            codec: &CanonicalCodec,
            state: ConnectionState::Disconnected,
            spent: false,
            version: None,
            time_synced: false,
            bootstrap: Bootstrap::Idle,
            transfers,
            listings: HashMap::new(),
            pending: HashMap::new(),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Version reported by the peer, once the handshake has been answered.
    pub fn version(&self) -> Option<ProtocolVersion> {
        self.version
    }

    /// Whether outgoing packets can be written.
    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::Acquire)
    }

    /// Settings this session runs with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Number of requests waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Number of Data transfers being reassembled.
    pub fn transfers_in_flight(&self) -> usize {
        self.transfers.len()
    }

    /// The transport this session drives.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub(crate) fn shared_handles(&self) -> (Arc<ReferenceAllocator>, Arc<AtomicBool>) {
        (self.refs.clone(), self.writable.clone())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start connecting.
    ///
    /// Fails with [`SensorError::SessionSpent`] if the session has been
    /// connected before.
    pub fn connect(&mut self) -> Result<()> {
        if self.spent {
            return Err(SensorError::SessionSpent);
        }
        self.spent = true;
        self.set_state(ConnectionState::Connecting);

        if let Err(e) = self.transport.connect() {
            self.fail_transport(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    /// Close the connection and drop all in-flight exchanges.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        if let Err(e) = self.transport.disconnect() {
            warn!("Transport disconnect failed: {}", e);
        }
        self.teardown();
    }

    /// Feed one transport callback into the session.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_link_up(),
            TransportEvent::Disconnected => {
                if self.state != ConnectionState::Disconnected {
                    info!("Link lost");
                    self.teardown();
                }
            }
            TransportEvent::ServicesDiscovered(profile) => self.on_services(profile),
            TransportEvent::Notification(bytes) => self.on_notification(&bytes),
            TransportEvent::WriteError(msg) | TransportEvent::DiscoveryError(msg) => {
                self.fail_transport(msg)
            }
        }
    }

    fn on_link_up(&mut self) {
        if self.state != ConnectionState::Connecting {
            debug!("Ignoring link-up in state {:?}", self.state);
            return;
        }
        self.set_state(ConnectionState::DiscoveringServices);
        if let Err(e) = self.transport.discover_services() {
            self.fail_transport(e.to_string());
        }
    }

    fn on_services(&mut self, profile: GattProfile) {
        if self.state != ConnectionState::DiscoveringServices {
            debug!("Ignoring service discovery in state {:?}", self.state);
            return;
        }
        if !profile.is_supported() {
            warn!("Sensor service not found, disconnecting");
            self.emit(SensorEvent::Error(ErrorKind::UnsupportedDevice));
            self.disconnect();
            return;
        }
        if let Err(e) = self.transport.enable_notifications() {
            self.fail_transport(e.to_string());
            return;
        }

        self.writable.store(true, Ordering::Release);
        match self.handshake() {
            INVALID_REF => self.abort_bootstrap("handshake could not be sent"),
            reference => self.bootstrap = Bootstrap::AwaitHandshake(reference),
        }
    }

    /// Transport failures are fatal for the connection.
    fn fail_transport(&mut self, msg: String) {
        warn!("Transport error: {}", msg);
        self.emit(SensorEvent::Error(ErrorKind::ControllerError(msg)));
        self.disconnect();
    }

    fn teardown(&mut self) {
        self.writable.store(false, Ordering::Release);
        self.time_synced = false;
        self.bootstrap = Bootstrap::Idle;
        self.transfers.clear();
        self.listings.clear();
        self.pending.clear();
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!("State {:?} -> {:?}", self.state, state);
        self.state = state;
        self.emit(SensorEvent::StateChanged(state));
    }

    fn emit(&self, event: SensorEvent) {
        // A dropped receiver only means nobody is listening anymore.
        let _ = self.events.send(event);
    }

    // ========================================================================
    // Outgoing
    // ========================================================================

    /// Announce our protocol version.
    pub fn handshake(&mut self) -> u8 {
        self.issue(Outgoing::Handshake)
    }

    /// Send the host clock.
    pub fn sync_time(&mut self) -> u8 {
        let reference = self.issue(Outgoing::Time);
        if reference != INVALID_REF {
            self.time_synced = true;
        }
        reference
    }

    /// Write a configuration to the device.
    pub fn send_config(&mut self, config: SensorConfig) -> u8 {
        self.issue(Outgoing::Config(config))
    }

    /// Send a command.
    ///
    /// Debug-stream commands always use `LOG_STREAM_REF`.
    pub fn send_command(&mut self, command: Command) -> u8 {
        if is_stream_command(&command) {
            if !self.is_writable() {
                return INVALID_REF;
            }
            return if self.submit(LOG_STREAM_REF, Outgoing::Command(command)) {
                LOG_STREAM_REF
            } else {
                INVALID_REF
            };
        }
        self.issue(Outgoing::Command(command))
    }

    /// Ask the device for its configuration.
    pub fn read_config(&mut self) -> u8 {
        self.send_command(Command::ReadConfig)
    }

    /// List recorded logs.
    pub fn fetch_logs(&mut self) -> u8 {
        self.send_command(Command::ListLogs)
    }

    /// Download the log at `index`.
    pub fn download_log(&mut self, index: u16) -> u8 {
        self.send_command(Command::ReadLog { index })
    }

    /// Erase all recorded logs.
    pub fn erase_logs(&mut self) -> u8 {
        self.send_command(Command::ClearLogs)
    }

    /// Read the last-fault blob. The reply arrives as a transfer.
    pub fn read_last_fault(&mut self) -> u8 {
        self.send_command(Command::ReadLastFault)
    }

    /// Start the debug-log stream.
    pub fn start_debug_stream(&mut self, level: u8, source_mask: u32) -> bool {
        self.send_command(Command::StartDebugLog { level, source_mask }) != INVALID_REF
    }

    /// Stop the debug-log stream.
    pub fn stop_debug_stream(&mut self) -> bool {
        self.send_command(Command::StopDebugLog) != INVALID_REF
    }

    fn issue(&mut self, request: Outgoing) -> u8 {
        let kind = request.kind();
        self.issue_as(request, kind)
    }

    fn issue_as(&mut self, request: Outgoing, kind: RequestKind) -> u8 {
        if !self.is_writable() {
            debug!("Not writable, dropping {:?}", kind);
            return INVALID_REF;
        }
        let reference = self.refs.next();
        if self.submit_as(reference, request, kind) {
            reference
        } else {
            INVALID_REF
        }
    }

    /// Send a request under a reference the caller already allocated.
    pub(crate) fn submit(&mut self, reference: u8, request: Outgoing) -> bool {
        let kind = request.kind();
        self.submit_as(reference, request, kind)
    }

    fn submit_as(&mut self, reference: u8, request: Outgoing, kind: RequestKind) -> bool {
        if !self.is_writable() {
            warn!("Request {} issued after the link closed", reference);
            self.emit(SensorEvent::Error(ErrorKind::WriteFailed { reference }));
            return false;
        }

        let packet = request.into_packet(reference);
        let bytes = self.codec.encode(&packet);
        if let Err(e) = self.transport.write(bytes) {
            warn!("Write of {:?} (ref {}) failed: {}", kind, reference, e);
            self.emit(SensorEvent::Error(ErrorKind::WriteFailed { reference }));
            return false;
        }

        // Stream commands and time sync are fire-and-forget.
        if reference != LOG_STREAM_REF && kind != RequestKind::TimeSync {
            self.pending.insert(
                reference,
                PendingRequest {
                    kind,
                    last_activity: Instant::now(),
                },
            );
        }
        true
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    fn on_notification(&mut self, bytes: &Bytes) {
        let header = match Header::peek(bytes) {
            Ok(header) => header,
            Err(e) => {
                warn!("Dropping notification: {}", e);
                self.emit(SensorEvent::Error(ErrorKind::ReadFailure(e)));
                return;
            }
        };

        let packet_type = match header.packet_type() {
            Ok(t) if t.is_inbound() => t,
            Ok(t) => {
                debug!("Dropping host-only {:?} packet", t);
                return;
            }
            Err(e) => {
                debug!("Dropping packet: {}", e);
                return;
            }
        };

        match self.codec.decode(bytes) {
            Ok(packet) => self.dispatch(packet),
            Err(e) => self.on_decode_failure(packet_type, header.reference, e),
        }
    }

    fn on_decode_failure(&mut self, packet_type: PacketType, reference: u8, error: DecodeError) {
        warn!(
            "Failed to decode {:?} packet (ref {}): {}",
            packet_type, reference, error
        );
        let kind = match packet_type {
            PacketType::Config => ErrorKind::ConfigReadFailure(error),
            PacketType::Data => ErrorKind::DataReadFailure(error),
            _ => ErrorKind::ReadFailure(error),
        };
        self.emit(SensorEvent::Error(kind));

        if packet_type != PacketType::DebugMessage {
            self.finish_exchange(reference);
        }
    }

    fn dispatch(&mut self, packet: Packet) {
        match packet {
            Packet::Handshake { reference, version } => self.on_handshake(reference, version),
            Packet::Status { reference, status } => self.on_status(reference, status),
            Packet::Config { reference, config } => self.on_config(reference, config),
            Packet::LogList { reference, page } => self.on_log_list(reference, page),
            Packet::Data { reference, chunk } => self.on_data(reference, chunk),
            Packet::DebugMessage { message, .. } => self.emit(SensorEvent::LogLine(message)),
            Packet::Time { .. } | Packet::Command { .. } => {
                debug!("Dropping host-only {:?} packet", packet.packet_type());
            }
        }
    }

    fn on_handshake(&mut self, reference: u8, version: ProtocolVersion) {
        let in_bootstrap = match self.bootstrap {
            Bootstrap::AwaitHandshake(expected) if expected != reference => {
                debug!(
                    "Ignoring handshake reply {} while waiting for {}",
                    reference, expected
                );
                return;
            }
            Bootstrap::AwaitHandshake(_) => true,
            _ => false,
        };
        self.pending.remove(&reference);

        let Some(codec) = codec_for(version) else {
            warn!("Unsupported protocol version {}", version);
            self.emit(SensorEvent::Error(ErrorKind::UnsupportedDevice));
            self.disconnect();
            return;
        };
        info!("Peer speaks protocol {} ({} codec)", version, codec.name());
        self.version = Some(version);
        self.codec = codec;
        self.emit(SensorEvent::VersionNegotiated(version));

        if !in_bootstrap {
            debug!("Handshake reply outside the bootstrap");
            return;
        }

        if !self.time_synced {
            self.sync_time();
        }

        if version >= self.config.min_fault_log_version {
            let fault_ref = self.issue_as(
                Outgoing::Command(Command::ReadLastFault),
                RequestKind::FaultLog,
            );
            if fault_ref != INVALID_REF {
                self.bootstrap = Bootstrap::AwaitFaultLog(fault_ref);
                return;
            }
        }
        self.request_bootstrap_config();
    }

    fn on_status(&mut self, reference: u8, status: StatusCode) {
        if status.is_failure() {
            debug!("Request {} failed with status {}", reference, status);
        }
        self.emit(SensorEvent::StatusReceived { reference, status });

        if self.is_fault_request(reference) {
            debug!("No fault log available");
            self.finish_exchange(reference);
        } else if status.is_failure() {
            self.finish_exchange(reference);
        } else if !self.transfers.contains(reference) && !self.listings.contains_key(&reference) {
            // Success codes leave running transfers and listings alone.
            self.pending.remove(&reference);
        }
    }

    fn on_config(&mut self, reference: u8, config: SensorConfig) {
        self.pending.remove(&reference);
        self.emit(SensorEvent::ConfigUpdated { reference, config });

        if self.bootstrap == Bootstrap::AwaitConfig(reference) {
            self.bootstrap = Bootstrap::Ready;
            info!("Sensor ready");
            self.set_state(ConnectionState::Connected);
        }
        if !self.time_synced {
            self.sync_time();
        }
    }

    fn on_log_list(&mut self, reference: u8, page: LogListPage) {
        self.touch(reference);
        let LogListPage { items, complete } = page;

        self.listings
            .entry(reference)
            .or_default()
            .extend_from_slice(&items);
        self.emit(SensorEvent::LogListPage {
            reference,
            items,
            complete,
        });

        if complete {
            self.pending.remove(&reference);
            let items = self.listings.remove(&reference).unwrap_or_default();
            debug!("Log listing {} complete: {} items", reference, items.len());
            self.emit(SensorEvent::LogListCompleted { reference, items });
        }
    }

    fn on_data(&mut self, reference: u8, chunk: DataChunk) {
        self.touch(reference);
        let fault = self.is_fault_request(reference);

        match self
            .transfers
            .on_chunk(reference, chunk.offset, chunk.total, &chunk.payload)
        {
            TransferEvent::Progress {
                reference,
                received,
                total,
            } => {
                if !fault {
                    self.emit(SensorEvent::TransferProgress {
                        reference,
                        received,
                        total,
                    });
                }
            }
            TransferEvent::Completed { reference, data } => {
                self.pending.remove(&reference);
                if fault {
                    self.report_fault(&data);
                    self.request_bootstrap_config();
                } else {
                    self.emit(SensorEvent::TransferCompleted { reference, data });
                }
            }
            TransferEvent::Corrupted { reference } => {
                self.emit(SensorEvent::Error(ErrorKind::Corrupted { reference }));
                self.finish_exchange(reference);
            }
        }
    }

    fn report_fault(&self, blob: &[u8]) {
        match parse_fault_report(blob) {
            Some((reset_marker, lines)) => {
                info!("Device reset after a fault ({:#x})", reset_marker);
                for line in &lines {
                    info!("  {}", line);
                }
                self.emit(SensorEvent::FaultReport {
                    reset_marker,
                    lines,
                });
            }
            None => debug!("No fault recorded"),
        }
    }

    // ========================================================================
    // Bookkeeping
    // ========================================================================

    /// Abandon requests that have been idle longer than the request timeout.
    ///
    /// Called periodically by the sensor task; call it yourself when driving
    /// a session directly.
    pub fn expire_stale(&mut self, now: Instant) {
        let Some(timeout) = self.config.request_timeout() else {
            return;
        };

        let mut expired: Vec<(u8, RequestKind)> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.last_activity) > timeout)
            .map(|(r, p)| (*r, p.kind))
            .collect();
        expired.sort_unstable_by_key(|(r, _)| *r);

        for (reference, kind) in expired {
            // An earlier expiry may have torn the connection down.
            if !self.pending.contains_key(&reference) {
                continue;
            }
            warn!("Request {} ({:?}) timed out", reference, kind);
            self.emit(SensorEvent::RequestTimedOut { reference, kind });
            self.finish_exchange(reference);
        }
    }

    fn touch(&mut self, reference: u8) {
        if let Some(pending) = self.pending.get_mut(&reference) {
            pending.last_activity = Instant::now();
        }
    }

    /// Drop everything tracked for `reference`.
    ///
    /// An unfinished fault read moves the bootstrap on to the configuration.
    /// An unfinished handshake or configuration read ends the connection.
    fn finish_exchange(&mut self, reference: u8) {
        self.pending.remove(&reference);
        self.transfers.abort(reference);
        self.listings.remove(&reference);
        match self.bootstrap {
            Bootstrap::AwaitFaultLog(r) if r == reference => self.request_bootstrap_config(),
            Bootstrap::AwaitHandshake(r) if r == reference => {
                self.abort_bootstrap("handshake unanswered")
            }
            Bootstrap::AwaitConfig(r) if r == reference => {
                self.abort_bootstrap("configuration unavailable")
            }
            _ => {}
        }
    }

    fn is_fault_request(&self, reference: u8) -> bool {
        matches!(self.bootstrap, Bootstrap::AwaitFaultLog(r) if r == reference)
    }

    fn request_bootstrap_config(&mut self) {
        match self.read_config() {
            INVALID_REF => self.abort_bootstrap("configuration could not be requested"),
            reference => self.bootstrap = Bootstrap::AwaitConfig(reference),
        }
    }

    /// The bootstrap cannot reach `Connected`; drop the link.
    fn abort_bootstrap(&mut self, reason: &str) {
        warn!("Bootstrap failed: {}", reason);
        self.bootstrap = Bootstrap::Idle;
        self.emit(SensorEvent::Error(ErrorKind::ControllerError(format!(
            "bootstrap failed: {}",
            reason
        ))));
        self.disconnect();
    }
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("version", &self.version)
            .field("bootstrap", &self.bootstrap)
            .field("pending", &self.pending.len())
            .field("transfers", &self.transfers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{event_channel, EventReceiver};
    use crate::protocol::{chunk_payload, DebugMessage, LogLevel, MAX_PACKET_SIZE};
    use crate::transport::{MemoryPeer, MemoryTransport, TransportCall};

    struct Harness {
        session: Session<MemoryTransport>,
        peer: MemoryPeer,
        events: EventReceiver,
    }

    impl Harness {
        fn new(config: SessionConfig) -> Self {
            let (transport, peer) = MemoryTransport::new();
            let (tx, events) = event_channel();
            let session = Session::new(transport, tx, config).unwrap();
            Self {
                session,
                peer,
                events,
            }
        }

        fn full_range() -> Self {
            Self::new(SessionConfig {
                reference_start: 1,
                reference_end: 254,
                ..SessionConfig::default()
            })
        }

        fn events(&mut self) -> Vec<SensorEvent> {
            std::iter::from_fn(|| self.events.try_recv().ok()).collect()
        }

        fn deliver(&mut self, packet: Packet) {
            self.session
                .handle_transport_event(TransportEvent::Notification(packet.encode()));
        }

        fn deliver_raw(&mut self, bytes: &[u8]) {
            self.session
                .handle_transport_event(TransportEvent::Notification(Bytes::copy_from_slice(
                    bytes,
                )));
        }

        /// Run connect and discovery; returns the handshake reference.
        fn open(&mut self) -> u8 {
            self.session.connect().unwrap();
            self.session
                .handle_transport_event(TransportEvent::Connected);
            self.session
                .handle_transport_event(TransportEvent::ServicesDiscovered(GattProfile::sensor()));
            match self.peer.drain_packets().as_slice() {
                [Packet::Handshake { reference, .. }] => *reference,
                other => panic!("expected handshake, got {:?}", other),
            }
        }

        /// Bootstrap against firmware without a fault log.
        fn ready(&mut self) {
            let handshake = self.open();
            self.deliver(Packet::Handshake {
                reference: handshake,
                version: ProtocolVersion::new(1, 0),
            });
            let config_ref = self
                .peer
                .drain_packets()
                .into_iter()
                .find_map(|p| match p {
                    Packet::Command {
                        reference,
                        command: Command::ReadConfig,
                    } => Some(reference),
                    _ => None,
                })
                .unwrap();
            self.deliver(Packet::Config {
                reference: config_ref,
                config: SensorConfig::factory_default(),
            });
            assert_eq!(self.session.state(), ConnectionState::Connected);
            self.events();
        }
    }

    #[test]
    fn test_full_bootstrap() {
        let mut h = Harness::full_range();
        assert_eq!(h.open(), 1);
        assert_eq!(
            h.peer.drain(),
            Vec::<TransportCall>::new(),
            "handshake already drained"
        );

        h.deliver(Packet::Handshake {
            reference: 1,
            version: ProtocolVersion::new(1, 2),
        });
        let sent = h.peer.drain_packets();
        assert!(matches!(sent[0], Packet::Time { reference: 2, .. }));
        assert_eq!(
            sent[1],
            Packet::Command {
                reference: 3,
                command: Command::ReadLastFault
            }
        );
        assert_eq!(sent.len(), 2);

        // Zero reset marker: no fault recorded.
        let blob = [0u8; 8];
        for packet in chunk_payload(3, &blob, MAX_PACKET_SIZE) {
            h.deliver(packet);
        }
        assert_eq!(
            h.peer.drain_packets(),
            vec![Packet::Command {
                reference: 4,
                command: Command::ReadConfig
            }]
        );
        assert_ne!(h.session.state(), ConnectionState::Connected);

        let config = SensorConfig::factory_default();
        h.deliver(Packet::Config {
            reference: 4,
            config,
        });

        let events = h.events();
        assert_eq!(
            events,
            vec![
                SensorEvent::StateChanged(ConnectionState::Connecting),
                SensorEvent::StateChanged(ConnectionState::DiscoveringServices),
                SensorEvent::VersionNegotiated(ProtocolVersion::new(1, 2)),
                SensorEvent::ConfigUpdated {
                    reference: 4,
                    config
                },
                SensorEvent::StateChanged(ConnectionState::Connected),
            ]
        );
        assert!(h.peer.drain_packets().is_empty(), "time is synced once");
    }

    #[test]
    fn test_old_firmware_skips_fault_log() {
        let mut h = Harness::full_range();
        let handshake = h.open();
        h.deliver(Packet::Handshake {
            reference: handshake,
            version: ProtocolVersion::new(1, 0),
        });

        let sent = h.peer.drain_packets();
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0], Packet::Time { .. }));
        assert!(matches!(
            sent[1],
            Packet::Command {
                command: Command::ReadConfig,
                ..
            }
        ));
    }

    #[test]
    fn test_fault_report_lines() {
        let mut h = Harness::full_range();
        let handshake = h.open();
        h.deliver(Packet::Handshake {
            reference: handshake,
            version: ProtocolVersion::new(1, 1),
        });
        h.peer.drain();

        let mut blob = 0xDEADu64.to_le_bytes().to_vec();
        blob.extend_from_slice(b"hard fault\0\0pc=0x0800\0");
        for packet in chunk_payload(3, &blob, MAX_PACKET_SIZE) {
            h.deliver(packet);
        }

        let events = h.events();
        assert!(events.contains(&SensorEvent::FaultReport {
            reset_marker: 0xDEAD,
            lines: vec!["hard fault".to_string(), "pc=0x0800".to_string()],
        }));
        assert!(!events
            .iter()
            .any(|e| matches!(e, SensorEvent::TransferCompleted { .. })));
        assert!(matches!(
            h.peer.drain_packets().as_slice(),
            [Packet::Command {
                command: Command::ReadConfig,
                ..
            }]
        ));
    }

    #[test]
    fn test_status_on_fault_request_continues_bootstrap() {
        let mut h = Harness::full_range();
        let handshake = h.open();
        h.deliver(Packet::Handshake {
            reference: handshake,
            version: ProtocolVersion::new(1, 2),
        });
        h.peer.drain();

        h.deliver(Packet::Status {
            reference: 3,
            status: StatusCode(404),
        });
        assert!(matches!(
            h.peer.drain_packets().as_slice(),
            [Packet::Command {
                reference: 4,
                command: Command::ReadConfig
            }]
        ));
    }

    #[test]
    fn test_corrupted_fault_blob_continues_bootstrap() {
        let mut h = Harness::full_range();
        let handshake = h.open();
        h.deliver(Packet::Handshake {
            reference: handshake,
            version: ProtocolVersion::new(1, 2),
        });
        h.peer.drain();
        h.events();

        h.deliver(Packet::Data {
            reference: 3,
            chunk: DataChunk {
                offset: 20,
                total: 16,
                payload: Bytes::from_static(b"xx"),
            },
        });
        assert_eq!(
            h.events(),
            vec![SensorEvent::Error(ErrorKind::Corrupted { reference: 3 })]
        );
        assert_eq!(h.peer.drain_packets().len(), 1);
    }

    #[test]
    fn test_missing_service_is_unsupported() {
        let mut h = Harness::full_range();
        h.session.connect().unwrap();
        h.session.handle_transport_event(TransportEvent::Connected);
        h.session
            .handle_transport_event(TransportEvent::ServicesDiscovered(GattProfile::default()));

        assert_eq!(h.session.state(), ConnectionState::Disconnected);
        assert!(!h.session.is_writable());
        assert_eq!(
            h.peer.drain(),
            vec![
                TransportCall::Connect,
                TransportCall::DiscoverServices,
                TransportCall::Disconnect
            ]
        );
        let events = h.events();
        assert!(events.contains(&SensorEvent::Error(ErrorKind::UnsupportedDevice)));
        assert_eq!(
            events.last(),
            Some(&SensorEvent::StateChanged(ConnectionState::Disconnected))
        );
    }

    #[test]
    fn test_unsupported_major_version() {
        let mut h = Harness::full_range();
        let handshake = h.open();
        h.deliver(Packet::Handshake {
            reference: handshake,
            version: ProtocolVersion::new(2, 0),
        });

        assert_eq!(h.session.state(), ConnectionState::Disconnected);
        assert_eq!(h.peer.drain(), vec![TransportCall::Disconnect]);
        assert!(h
            .events()
            .contains(&SensorEvent::Error(ErrorKind::UnsupportedDevice)));
    }

    #[test]
    fn test_discovery_error_forces_disconnect() {
        let mut h = Harness::full_range();
        h.session.connect().unwrap();
        h.session.handle_transport_event(TransportEvent::Connected);
        h.session
            .handle_transport_event(TransportEvent::DiscoveryError("gatt 133".into()));

        assert_eq!(h.session.state(), ConnectionState::Disconnected);
        assert!(h.events().contains(&SensorEvent::Error(ErrorKind::ControllerError(
            "gatt 133".into()
        ))));
    }

    #[test]
    fn test_operations_need_writable_channel() {
        let mut h = Harness::full_range();
        assert_eq!(h.session.fetch_logs(), INVALID_REF);
        assert_eq!(h.session.send_config(SensorConfig::default()), INVALID_REF);
        assert_eq!(h.session.sync_time(), INVALID_REF);
        assert!(!h.session.start_debug_stream(4, u32::MAX));
        assert!(h.peer.drain().is_empty());
    }

    #[test]
    fn test_log_list_accumulates_pages() {
        let mut h = Harness::full_range();
        h.ready();

        let reference = h.session.fetch_logs();
        assert_ne!(reference, INVALID_REF);
        let item = |id| LogItem {
            id,
            size: id * 100,
            modified: 0,
        };

        h.deliver(Packet::LogList {
            reference,
            page: LogListPage {
                items: (1..=5).map(item).collect(),
                complete: false,
            },
        });
        h.deliver(Packet::LogList {
            reference,
            page: LogListPage {
                items: (6..=8).map(item).collect(),
                complete: true,
            },
        });

        let events = h.events();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[2],
            SensorEvent::LogListCompleted {
                reference,
                items: (1..=8).map(item).collect()
            }
        );
        assert_eq!(h.session.pending_requests(), 0);
    }

    #[test]
    fn test_download_progress_and_completion() {
        let mut h = Harness::full_range();
        h.ready();

        let reference = h.session.download_log(2);
        assert!(matches!(
            h.peer.drain_packets().as_slice(),
            [Packet::Command {
                command: Command::ReadLog { index: 2 },
                ..
            }]
        ));

        let data: Vec<u8> = (0..200u8).collect();
        for packet in chunk_payload(reference, &data, MAX_PACKET_SIZE) {
            h.deliver(packet);
        }

        assert_eq!(
            h.events(),
            vec![
                SensorEvent::TransferProgress {
                    reference,
                    received: 142,
                    total: 200
                },
                SensorEvent::TransferCompleted {
                    reference,
                    data: Bytes::from(data)
                },
            ]
        );
        assert_eq!(h.session.transfers_in_flight(), 0);
    }

    #[test]
    fn test_failed_status_aborts_download() {
        let mut h = Harness::full_range();
        h.ready();

        let reference = h.session.download_log(9);
        h.deliver(Packet::Data {
            reference,
            chunk: DataChunk {
                offset: 0,
                total: 500,
                payload: Bytes::from_static(b"abc"),
            },
        });
        h.deliver(Packet::Status {
            reference,
            status: StatusCode(500),
        });
        assert_eq!(h.session.transfers_in_flight(), 0);
        assert_eq!(h.session.pending_requests(), 0);
    }

    #[test]
    fn test_decode_failures_by_type() {
        let mut h = Harness::full_range();
        h.ready();

        h.deliver_raw(&[PacketType::Config as u8, 9, 0, 0]);
        h.deliver_raw(&[PacketType::Data as u8, 9, 0, 0]);
        h.deliver_raw(&[PacketType::Status as u8, 9, 1]);
        h.deliver_raw(&[PacketType::Status as u8, INVALID_REF, 200, 0]);
        h.deliver_raw(&[PacketType::Status as u8]);

        let events = h.events();
        assert_eq!(events.len(), 5);
        assert!(matches!(
            events[0],
            SensorEvent::Error(ErrorKind::ConfigReadFailure(DecodeError::TruncatedPayload { .. }))
        ));
        assert!(matches!(
            events[1],
            SensorEvent::Error(ErrorKind::DataReadFailure(_))
        ));
        assert!(matches!(
            events[2],
            SensorEvent::Error(ErrorKind::ReadFailure(_))
        ));
        assert_eq!(
            events[3],
            SensorEvent::Error(ErrorKind::ReadFailure(DecodeError::MalformedHeader))
        );
        assert_eq!(
            events[4],
            SensorEvent::Error(ErrorKind::ReadFailure(DecodeError::MalformedHeader))
        );
    }

    #[test]
    fn test_unknown_and_host_only_packets_dropped() {
        let mut h = Harness::full_range();
        h.ready();

        h.deliver_raw(&[0x42, 5, 1, 2, 3]);
        h.deliver(Packet::Time {
            reference: 5,
            timestamp_us: 1,
        });
        h.deliver(Packet::Command {
            reference: 5,
            command: Command::ListLogs,
        });
        assert!(h.events().is_empty());
    }

    #[test]
    fn test_debug_stream() {
        let mut h = Harness::full_range();
        h.ready();

        assert!(h.session.start_debug_stream(4, 0xFFFF_FFFF));
        assert_eq!(
            h.peer.drain_packets(),
            vec![Packet::Command {
                reference: LOG_STREAM_REF,
                command: Command::StartDebugLog {
                    level: 4,
                    source_mask: 0xFFFF_FFFF
                }
            }]
        );
        assert_eq!(h.session.pending_requests(), 0);

        let message = DebugMessage {
            timestamp_ms: 1500,
            level: LogLevel::Info,
            text: Bytes::from_static(b"tick"),
        };
        h.deliver(Packet::DebugMessage {
            reference: LOG_STREAM_REF,
            message: message.clone(),
        });
        assert_eq!(h.events(), vec![SensorEvent::LogLine(message)]);

        assert!(h.session.stop_debug_stream());
    }

    #[test]
    fn test_disconnect_clears_state() {
        let mut h = Harness::full_range();
        h.ready();

        let download = h.session.download_log(1);
        let listing = h.session.fetch_logs();
        h.deliver(Packet::Data {
            reference: download,
            chunk: DataChunk {
                offset: 0,
                total: 1000,
                payload: Bytes::from_static(b"partial"),
            },
        });
        h.deliver(Packet::LogList {
            reference: listing,
            page: LogListPage {
                items: vec![],
                complete: false,
            },
        });
        assert_eq!(h.session.transfers_in_flight(), 1);

        h.session
            .handle_transport_event(TransportEvent::Disconnected);

        assert_eq!(h.session.state(), ConnectionState::Disconnected);
        assert_eq!(h.session.transfers_in_flight(), 0);
        assert_eq!(h.session.pending_requests(), 0);
        assert!(!h.session.is_writable());
        assert!(matches!(h.session.connect(), Err(SensorError::SessionSpent)));
    }

    #[test]
    fn test_request_timeout() {
        let mut h = Harness::new(SessionConfig {
            reference_start: 1,
            reference_end: 254,
            request_timeout_ms: Some(5_000),
            ..SessionConfig::default()
        });
        h.ready();

        let reference = h.session.fetch_logs();
        let now = Instant::now();
        h.session.expire_stale(now + Duration::from_secs(4));
        assert!(h.events().is_empty());

        h.session.expire_stale(now + Duration::from_secs(6));
        assert_eq!(
            h.events(),
            vec![SensorEvent::RequestTimedOut {
                reference,
                kind: RequestKind::LogList
            }]
        );
        assert_eq!(h.session.pending_requests(), 0);
    }

    #[test]
    fn test_fault_request_timeout_continues_bootstrap() {
        let mut h = Harness::full_range();
        let handshake = h.open();
        h.deliver(Packet::Handshake {
            reference: handshake,
            version: ProtocolVersion::new(1, 2),
        });
        h.peer.drain();
        h.events();

        h.session
            .expire_stale(Instant::now() + DEFAULT_REQUEST_TIMEOUT + Duration::from_secs(1));

        let events = h.events();
        assert!(events.contains(&SensorEvent::RequestTimedOut {
            reference: 3,
            kind: RequestKind::FaultLog
        }));
        assert!(h
            .peer
            .drain_packets()
            .iter()
            .any(|p| matches!(p, Packet::Command { command: Command::ReadConfig, .. })));
    }

    #[test]
    fn test_timeouts_disabled() {
        let mut h = Harness::new(SessionConfig {
            request_timeout_ms: None,
            ..SessionConfig::default()
        });
        h.ready();
        h.session.fetch_logs();
        h.session
            .expire_stale(Instant::now() + Duration::from_secs(3600));
        assert!(h.events().is_empty());
        assert_eq!(h.session.pending_requests(), 1);
    }

    #[test]
    fn test_write_failure_reports_reference() {
        let mut h = Harness::full_range();
        h.ready();

        h.peer.set_fail_writes(true);
        assert_eq!(h.session.erase_logs(), INVALID_REF);
        match h.events().as_slice() {
            [SensorEvent::Error(ErrorKind::WriteFailed { reference })] => {
                assert_ne!(*reference, INVALID_REF)
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn test_default_references() {
        let mut h = Harness::new(SessionConfig::default());
        assert_eq!(h.open(), DEFAULT_REF_START);
    }

    #[test]
    fn test_session_config_json() {
        let config = SessionConfig::from_json(
            r#"{ "reference_start": 1, "reference_end": 50, "request_timeout_ms": null }"#,
        )
        .unwrap();
        assert_eq!(config.reference_end, 50);
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.max_transfer_size, DEFAULT_MAX_TRANSFER_SIZE);

        assert!(SessionConfig::from_json(r#"{ "reference_end": 255 }"#).is_err());
        assert!(SessionConfig::from_json(r#"{ "sweep_interval_ms": 0 }"#).is_err());
        assert!(SessionConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_parse_fault_report() {
        assert_eq!(parse_fault_report(&[0u8; 8]), None);
        assert_eq!(parse_fault_report(&[1u8; 4]), None);

        let mut blob = 1u64.to_le_bytes().to_vec();
        blob.extend_from_slice(b"\0\0a\xFFb\0");
        let (marker, lines) = parse_fault_report(&blob).unwrap();
        assert_eq!(marker, 1);
        assert_eq!(lines, vec!["a\u{FFFD}b".to_string()]);
    }

    #[test]
    fn test_success_status_keeps_download() {
        let mut h = Harness::full_range();
        h.ready();

        let reference = h.session.download_log(4);
        let data: Vec<u8> = (0..200u8).collect();
        let chunk = |offset: usize, end: usize| Packet::Data {
            reference,
            chunk: DataChunk {
                offset: offset as u32,
                total: 200,
                payload: Bytes::copy_from_slice(&data[offset..end]),
            },
        };

        h.deliver(chunk(0, 100));
        h.deliver(Packet::Status {
            reference,
            status: StatusCode::OK,
        });
        assert_eq!(h.session.transfers_in_flight(), 1);
        h.deliver(chunk(100, 200));

        let events = h.events();
        assert_eq!(
            events.last(),
            Some(&SensorEvent::TransferCompleted {
                reference,
                data: Bytes::from(data.clone())
            })
        );
        assert_eq!(h.session.transfers_in_flight(), 0);
        assert_eq!(h.session.pending_requests(), 0);
    }

    #[test]
    fn test_success_status_keeps_listing() {
        let mut h = Harness::full_range();
        h.ready();

        let reference = h.session.fetch_logs();
        let item = |id| LogItem {
            id,
            size: 64,
            modified: 0,
        };
        h.deliver(Packet::LogList {
            reference,
            page: LogListPage {
                items: (0..5).map(item).collect(),
                complete: false,
            },
        });
        h.deliver(Packet::Status {
            reference,
            status: StatusCode::OK,
        });
        h.deliver(Packet::LogList {
            reference,
            page: LogListPage {
                items: (5..8).map(item).collect(),
                complete: true,
            },
        });

        let completed = h.events().into_iter().find_map(|e| match e {
            SensorEvent::LogListCompleted { items, .. } => Some(items),
            _ => None,
        });
        assert_eq!(completed, Some((0..8).map(item).collect()));
    }

    #[test]
    fn test_success_status_ends_idle_request() {
        let mut h = Harness::full_range();
        h.ready();

        let reference = h.session.erase_logs();
        assert_eq!(h.session.pending_requests(), 1);
        h.deliver(Packet::Status {
            reference,
            status: StatusCode::OK,
        });
        assert_eq!(h.session.pending_requests(), 0);
    }

    #[test]
    fn test_handshake_reply_must_match_reference() {
        let mut h = Harness::full_range();
        let handshake = h.open();
        h.events();

        h.deliver(Packet::Handshake {
            reference: handshake + 7,
            version: ProtocolVersion::new(1, 2),
        });
        assert!(h.events().is_empty());
        assert!(h.peer.drain_packets().is_empty());
        assert_eq!(h.session.version(), None);

        h.deliver(Packet::Handshake {
            reference: handshake,
            version: ProtocolVersion::new(1, 2),
        });
        assert_eq!(
            h.events(),
            vec![SensorEvent::VersionNegotiated(ProtocolVersion::new(1, 2))]
        );
        assert_eq!(h.peer.drain_packets().len(), 2);
    }

    #[test]
    fn test_failed_bootstrap_config_disconnects() {
        let mut h = Harness::full_range();
        let handshake = h.open();
        h.deliver(Packet::Handshake {
            reference: handshake,
            version: ProtocolVersion::new(1, 0),
        });
        h.peer.drain();
        h.events();

        // Time is 2, ReadConfig is 3.
        h.deliver(Packet::Status {
            reference: 3,
            status: StatusCode(500),
        });

        assert_eq!(h.session.state(), ConnectionState::Disconnected);
        assert!(!h.session.is_writable());
        assert_eq!(h.peer.drain(), vec![TransportCall::Disconnect]);
        let events = h.events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SensorEvent::Error(ErrorKind::ControllerError(_)))));
        assert_eq!(
            events.last(),
            Some(&SensorEvent::StateChanged(ConnectionState::Disconnected))
        );
    }

    #[test]
    fn test_bootstrap_config_timeout_disconnects() {
        let mut h = Harness::full_range();
        let handshake = h.open();
        h.deliver(Packet::Handshake {
            reference: handshake,
            version: ProtocolVersion::new(1, 0),
        });
        h.events();

        h.session
            .expire_stale(Instant::now() + DEFAULT_REQUEST_TIMEOUT + Duration::from_secs(1));

        let events = h.events();
        assert_eq!(
            events[0],
            SensorEvent::RequestTimedOut {
                reference: 3,
                kind: RequestKind::Config
            }
        );
        assert_eq!(h.session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_handshake_write_failure_disconnects() {
        let mut h = Harness::full_range();
        h.session.connect().unwrap();
        h.session.handle_transport_event(TransportEvent::Connected);
        h.peer.set_fail_writes(true);
        h.session
            .handle_transport_event(TransportEvent::ServicesDiscovered(GattProfile::sensor()));

        assert_eq!(h.session.state(), ConnectionState::Disconnected);
        let events = h.events();
        assert!(events.contains(&SensorEvent::Error(ErrorKind::WriteFailed { reference: 1 })));
        assert!(events
            .iter()
            .any(|e| matches!(e, SensorEvent::Error(ErrorKind::ControllerError(_)))));
    }
}
