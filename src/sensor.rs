//! Async sensor handle backed by a dedicated session task.
//!
//! The [`Session`] is owned by one tokio task. Transport callbacks and
//! caller requests reach it through a single channel, so they are handled
//! strictly in arrival order and the session needs no lock.
//!
//! # Architecture
//!
//! ```text
//! BLE backend ──deliver()──┐
//! Sensor (clone 1) ────────┼─► mpsc::UnboundedSender<Input> ─► Session task ─► Transport
//! Sensor (clone N) ────────┘                                        │
//!                                                                   └─► SensorEvent channel
//! ```
//!
//! The handle allocates request references itself and checks the shared
//! "writable" flag, so every operation returns its reference immediately.
//!
//! # Example
//!
//! ```
//! use sensorlink::{Sensor, INVALID_REF};
//! use sensorlink::transport::MemoryTransport;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> sensorlink::Result<()> {
//! let (transport, _peer) = MemoryTransport::new();
//! let (sensor, _events) = Sensor::builder()
//!     .reference_range(1, 99)
//!     .spawn(transport)?;
//!
//! // Nothing is writable before the link is up.
//! assert_eq!(sensor.fetch_logs(), INVALID_REF);
//! sensor.connect().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::error::{Result, SensorError};
use crate::event::{event_channel, EventReceiver};
use crate::protocol::{Command, ProtocolVersion, SensorConfig, INVALID_REF, LOG_STREAM_REF};
use crate::reference::ReferenceAllocator;
use crate::session::{is_stream_command, Outgoing, Session, SessionConfig};
use crate::transport::{Transport, TransportEvent};

/// Message to the session task.
#[derive(Debug)]
enum Input {
    Transport(TransportEvent),
    Connect(oneshot::Sender<Result<()>>),
    Disconnect,
    Submit { reference: u8, request: Outgoing },
    Shutdown,
}

/// Builder for a [`Sensor`].
#[derive(Debug, Clone, Default)]
pub struct SensorBuilder {
    config: SessionConfig,
}

impl SensorBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all settings, e.g. with ones loaded from JSON.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Inclusive range request references are drawn from.
    pub fn reference_range(mut self, start: u8, end: u8) -> Self {
        self.config.reference_start = start;
        self.config.reference_end = end;
        self
    }

    /// Idle time after which a request is abandoned. `None` disables timeouts.
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.request_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    /// Firmware version from which the last-fault log is read on connect.
    pub fn min_fault_log_version(mut self, version: ProtocolVersion) -> Self {
        self.config.min_fault_log_version = version;
        self
    }

    /// Largest Data transfer accepted.
    pub fn max_transfer_size(mut self, bytes: u32) -> Self {
        self.config.max_transfer_size = bytes;
        self
    }

    /// How often timed-out requests are looked for.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Start the session task on the current tokio runtime.
    ///
    /// Returns the handle and the receiver for all session events.
    pub fn spawn<T: Transport>(self, transport: T) -> Result<(Sensor, EventReceiver)> {
        let (events_tx, events_rx) = event_channel();
        let sweep = self.config.sweep_interval();
        let session = Session::new(transport, events_tx, self.config)?;
        let (refs, writable) = session.shared_handles();

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_session(session, rx, sweep));

        let sensor = Sensor {
            tx,
            refs,
            writable,
            task: Arc::new(task),
        };
        Ok((sensor, events_rx))
    }
}

/// Handle to a running session task.
///
/// Cheap to clone; all clones talk to the same session.
#[derive(Clone)]
pub struct Sensor {
    tx: mpsc::UnboundedSender<Input>,
    refs: Arc<ReferenceAllocator>,
    writable: Arc<AtomicBool>,
    task: Arc<JoinHandle<()>>,
}

impl Sensor {
    /// Create a new sensor builder.
    pub fn builder() -> SensorBuilder {
        SensorBuilder::new()
    }

    /// Start connecting. Resolves once the request reached the transport.
    pub async fn connect(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Input::Connect(reply_tx))?;
        reply_rx.await.map_err(|_| SensorError::ConnectionClosed)?
    }

    /// Close the connection.
    pub fn disconnect(&self) -> Result<()> {
        self.send(Input::Disconnect)
    }

    /// Feed a transport callback into the session.
    ///
    /// This is the entry point for the BLE backend.
    pub fn deliver(&self, event: TransportEvent) -> Result<()> {
        self.send(Input::Transport(event))
    }

    /// Whether outgoing packets can currently be written.
    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::Acquire)
    }

    /// Whether the session task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the session task. The link is closed first.
    pub fn shutdown(&self) -> Result<()> {
        self.send(Input::Shutdown)
    }

    /// Write a configuration to the device.
    pub fn send_config(&self, config: SensorConfig) -> u8 {
        self.submit(Outgoing::Config(config))
    }

    /// Send a command. Debug-stream commands use `LOG_STREAM_REF`.
    pub fn send_command(&self, command: Command) -> u8 {
        self.submit(Outgoing::Command(command))
    }

    /// Send the host clock.
    pub fn sync_time(&self) -> u8 {
        self.submit(Outgoing::Time)
    }

    /// Announce our protocol version.
    pub fn handshake(&self) -> u8 {
        self.submit(Outgoing::Handshake)
    }

    /// Ask the device for its configuration.
    pub fn read_config(&self) -> u8 {
        self.send_command(Command::ReadConfig)
    }

    /// List recorded logs.
    pub fn fetch_logs(&self) -> u8 {
        self.send_command(Command::ListLogs)
    }

    /// Download the log at `index`.
    pub fn download_log(&self, index: u16) -> u8 {
        self.send_command(Command::ReadLog { index })
    }

    /// Erase all recorded logs.
    pub fn erase_logs(&self) -> u8 {
        self.send_command(Command::ClearLogs)
    }

    /// Read the last-fault blob.
    pub fn read_last_fault(&self) -> u8 {
        self.send_command(Command::ReadLastFault)
    }

    /// Start the debug-log stream.
    pub fn start_debug_stream(&self, level: u8, source_mask: u32) -> bool {
        self.send_command(Command::StartDebugLog { level, source_mask }) != INVALID_REF
    }

    /// Stop the debug-log stream.
    pub fn stop_debug_stream(&self) -> bool {
        self.send_command(Command::StopDebugLog) != INVALID_REF
    }

    fn submit(&self, request: Outgoing) -> u8 {
        if !self.is_writable() {
            return INVALID_REF;
        }
        let reference = match &request {
            Outgoing::Command(command) if is_stream_command(command) => LOG_STREAM_REF,
            _ => self.refs.next(),
        };
        match self.send(Input::Submit { reference, request }) {
            Ok(()) => reference,
            Err(_) => INVALID_REF,
        }
    }

    fn send(&self, input: Input) -> Result<()> {
        self.tx.send(input).map_err(|_| SensorError::ConnectionClosed)
    }
}

impl std::fmt::Debug for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("writable", &self.is_writable())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Session task: processes inputs in order and sweeps for timeouts.
async fn run_session<T: Transport>(
    mut session: Session<T>,
    mut rx: mpsc::UnboundedReceiver<Input>,
    sweep: Duration,
) {
    let mut ticker = tokio::time::interval(sweep);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            input = rx.recv() => match input {
                Some(Input::Shutdown) | None => break,
                Some(input) => handle_input(&mut session, input),
            },
            _ = ticker.tick() => session.expire_stale(Instant::now()),
        }
    }

    session.disconnect();
    debug!("Session task stopped");
}

fn handle_input<T: Transport>(session: &mut Session<T>, input: Input) {
    match input {
        Input::Transport(event) => session.handle_transport_event(event),
        Input::Connect(reply) => {
            let _ = reply.send(session.connect());
        }
        Input::Disconnect => session.disconnect(),
        Input::Submit { reference, request } => {
            session.submit(reference, request);
        }
        Input::Shutdown => {}
    }
}
