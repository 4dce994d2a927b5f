//! In-memory transport that records every call.
//!
//! Used to drive a session without a radio: the test or demo plays the
//! device by reading recorded calls from the [`MemoryPeer`] and feeding
//! [`TransportEvent`](super::TransportEvent)s back into the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::Transport;
use crate::error::{Result, SensorError};
use crate::protocol::Packet;

/// A call made on a [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect,
    Disconnect,
    DiscoverServices,
    EnableNotifications,
    Write(Bytes),
}

/// Transport that forwards calls to a [`MemoryPeer`].
#[derive(Debug)]
pub struct MemoryTransport {
    calls: mpsc::UnboundedSender<TransportCall>,
    fail_writes: Arc<AtomicBool>,
}

/// Observer side of a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryPeer {
    calls: mpsc::UnboundedReceiver<TransportCall>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Create a transport and the peer observing it.
    pub fn new() -> (Self, MemoryPeer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let fail_writes = Arc::new(AtomicBool::new(false));
        (
            Self {
                calls: tx,
                fail_writes: fail_writes.clone(),
            },
            MemoryPeer {
                calls: rx,
                fail_writes,
            },
        )
    }

    fn record(&self, call: TransportCall) {
        // The peer may have been dropped; calls then go nowhere.
        let _ = self.calls.send(call);
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self) -> Result<()> {
        self.record(TransportCall::Connect);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.record(TransportCall::Disconnect);
        Ok(())
    }

    fn discover_services(&mut self) -> Result<()> {
        self.record(TransportCall::DiscoverServices);
        Ok(())
    }

    fn enable_notifications(&mut self) -> Result<()> {
        self.record(TransportCall::EnableNotifications);
        Ok(())
    }

    fn write(&mut self, packet: Bytes) -> Result<()> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(SensorError::Transport("write rejected".into()));
        }
        self.record(TransportCall::Write(packet));
        Ok(())
    }
}

impl MemoryPeer {
    /// Make subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Next recorded call, if one is queued.
    pub fn try_next(&mut self) -> Option<TransportCall> {
        self.calls.try_recv().ok()
    }

    /// Wait for the next recorded call. `None` once the transport is gone.
    pub async fn next(&mut self) -> Option<TransportCall> {
        self.calls.recv().await
    }

    /// Wait for the next write and decode it.
    ///
    /// Non-write calls are skipped. Returns `None` once the transport is
    /// gone or a write does not decode.
    pub async fn next_packet(&mut self) -> Option<Packet> {
        while let Some(call) = self.calls.recv().await {
            if let TransportCall::Write(bytes) = call {
                return Packet::decode(&bytes).ok();
            }
        }
        None
    }

    /// Drain all queued calls.
    pub fn drain(&mut self) -> Vec<TransportCall> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Drain all queued calls and decode the writes among them.
    pub fn drain_packets(&mut self) -> Vec<Packet> {
        self.drain()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Write(bytes) => Packet::decode(&bytes).ok(),
                _ => None,
            })
            .collect()
    }
}
