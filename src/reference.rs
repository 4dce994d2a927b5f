//! Cyclic request reference allocation.
//!
//! References correlate replies with requests. They are issued from an
//! inclusive range and wrap back to the range start after the maximum.
//! The allocator is lock-free so the async handle and the session task can
//! both draw from it.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{Result, SensorError};
use crate::protocol::{INVALID_REF, LOG_STREAM_REF};

/// Default first reference.
pub const DEFAULT_REF_START: u8 = 100;

/// Default last reference.
pub const DEFAULT_REF_END: u8 = 199;

/// Issues request references from a fixed inclusive range.
///
/// # Example
///
/// ```
/// use sensorlink::ReferenceAllocator;
///
/// let refs = ReferenceAllocator::new(1, 3).unwrap();
/// let issued: Vec<u8> = (0..4).map(|_| refs.next()).collect();
/// assert_eq!(issued, vec![1, 2, 3, 1]);
/// ```
#[derive(Debug)]
pub struct ReferenceAllocator {
    start: u8,
    end: u8,
    /// Next value to hand out.
    next: AtomicU8,
}

impl ReferenceAllocator {
    /// Create an allocator over `start..=end`.
    ///
    /// The range must not contain the invalid reference or the debug-stream
    /// reference, and must not be empty.
    pub fn new(start: u8, end: u8) -> Result<Self> {
        if start > end {
            return Err(SensorError::InvalidConfig(format!(
                "reference range {}..={} is empty",
                start, end
            )));
        }
        let range = start..=end;
        if range.contains(&INVALID_REF) || range.contains(&LOG_STREAM_REF) {
            return Err(SensorError::InvalidConfig(format!(
                "reference range {}..={} overlaps reserved references",
                start, end
            )));
        }
        Ok(Self {
            start,
            end,
            next: AtomicU8::new(start),
        })
    }

    /// Range references are drawn from.
    pub fn range(&self) -> RangeInclusive<u8> {
        self.start..=self.end
    }

    /// Issue the next reference. Never returns `INVALID_REF`.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> u8 {
        let mut current = self.next.load(Ordering::Relaxed);
        loop {
            let following = if current >= self.end {
                self.start
            } else {
                current + 1
            };
            match self.next.compare_exchange_weak(
                current,
                following,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(issued) => return issued,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for ReferenceAllocator {
    fn default() -> Self {
        Self {
            start: DEFAULT_REF_START,
            end: DEFAULT_REF_END,
            next: AtomicU8::new(DEFAULT_REF_START),
        }
    }
}
