//! Reassembly of chunked Data transfers.
//!
//! A transfer is identified by its request reference. The first chunk
//! allocates a zero-filled buffer of the announced total size; every chunk
//! is copied at its offset. Chunks may arrive in any order.
//!
//! An entry leaves the table exactly when the transfer completes, is found
//! corrupted, or is aborted.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

/// Default upper bound for a single transfer (16 MiB).
pub const DEFAULT_MAX_TRANSFER_SIZE: u32 = 16 * 1024 * 1024;

/// Outcome of feeding one chunk into the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// Chunk stored, more bytes outstanding.
    Progress {
        reference: u8,
        received: u32,
        total: u32,
    },
    /// All bytes received. The entry has been removed.
    Completed { reference: u8, data: Bytes },
    /// Chunk violated the transfer bounds. The entry has been removed.
    Corrupted { reference: u8 },
}

#[derive(Debug)]
struct Transfer {
    total: u32,
    received: u32,
    buffer: BytesMut,
}

/// Transfers in flight, keyed by reference.
#[derive(Debug)]
pub struct TransferTable {
    transfers: HashMap<u8, Transfer>,
    max_transfer_size: u32,
}

impl Default for TransferTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRANSFER_SIZE)
    }
}

impl TransferTable {
    /// Create an empty table accepting transfers up to `max_transfer_size`.
    pub fn new(max_transfer_size: u32) -> Self {
        Self {
            transfers: HashMap::new(),
            max_transfer_size,
        }
    }

    /// Feed one chunk.
    ///
    /// # Example
    ///
    /// ```
    /// use sensorlink::reassembly::{TransferEvent, TransferTable};
    ///
    /// let mut table = TransferTable::default();
    /// table.on_chunk(3, 2, 4, b"cd");
    /// match table.on_chunk(3, 0, 4, b"ab") {
    ///     TransferEvent::Completed { data, .. } => assert_eq!(&data[..], b"abcd"),
    ///     other => panic!("unexpected {:?}", other),
    /// }
    /// ```
    pub fn on_chunk(&mut self, reference: u8, offset: u32, total: u32, payload: &[u8]) -> TransferEvent {
        let corrupted = || TransferEvent::Corrupted { reference };

        match self.transfers.get(&reference).map(|t| t.total) {
            Some(expected) if expected != total => {
                warn!(reference, expected, got = total, "Transfer total changed mid-stream");
                self.transfers.remove(&reference);
                return corrupted();
            }
            Some(_) => {}
            None => {
                if total > self.max_transfer_size {
                    warn!(reference, total, max = self.max_transfer_size, "Transfer too large");
                    return corrupted();
                }
                debug!(reference, total, "Starting transfer");
                self.transfers.insert(
                    reference,
                    Transfer {
                        total,
                        received: 0,
                        buffer: BytesMut::zeroed(total as usize),
                    },
                );
            }
        }

        let Some(transfer) = self.transfers.get_mut(&reference) else {
            return corrupted();
        };

        let len = payload.len() as u64;
        let end = u64::from(offset) + len;
        let received = u64::from(transfer.received) + len;
        if end > u64::from(total) || received > u64::from(total) {
            warn!(reference, offset, len, total, "Corrupted data packet");
            self.transfers.remove(&reference);
            return corrupted();
        }

        let start = offset as usize;
        transfer.buffer[start..start + payload.len()].copy_from_slice(payload);
        transfer.received = received as u32;

        if transfer.received < total {
            return TransferEvent::Progress {
                reference,
                received: transfer.received,
                total,
            };
        }

        match self.transfers.remove(&reference) {
            Some(done) => {
                debug!(reference, total, "Transfer complete");
                TransferEvent::Completed {
                    reference,
                    data: done.buffer.freeze(),
                }
            }
            None => corrupted(),
        }
    }

    /// Drop the transfer for `reference`. Returns whether one existed.
    pub fn abort(&mut self, reference: u8) -> bool {
        self.transfers.remove(&reference).is_some()
    }

    /// Drop every transfer.
    pub fn clear(&mut self) {
        if !self.transfers.is_empty() {
            debug!(count = self.transfers.len(), "Dropping unfinished transfers");
        }
        self.transfers.clear();
    }

    /// Number of transfers in flight.
    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    /// Whether no transfer is in flight.
    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Whether a transfer for `reference` is in flight.
    pub fn contains(&self, reference: u8) -> bool {
        self.transfers.contains_key(&reference)
    }
}
