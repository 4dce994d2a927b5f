//! Transport module - the boundary to the BLE stack.
//!
//! The session never touches the radio. A backend implements [`Transport`]
//! for the outgoing primitives and reports what happens on the link as
//! [`TransportEvent`]s. All primitives are fire-and-forget: a call returns
//! once the request is queued, outcomes arrive as events.

mod memory;

pub use memory::{MemoryPeer, MemoryTransport, TransportCall};

use bytes::Bytes;
use uuid::Uuid;

use crate::error::Result;

/// Sensor GATT service.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000b001_0000_1000_8000_00805f9b34fb);

/// Characteristic the device notifies on (device to host).
pub const NOTIFY_CHAR_UUID: Uuid = Uuid::from_u128(0x0000b002_0000_1000_8000_00805f9b34fb);

/// Characteristic the host writes to (host to device).
pub const WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x0000b003_0000_1000_8000_00805f9b34fb);

/// Services and characteristics found on the peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GattProfile {
    /// Discovered service UUIDs.
    pub services: Vec<Uuid>,
    /// Discovered characteristic UUIDs across all services.
    pub characteristics: Vec<Uuid>,
}

impl GattProfile {
    /// Profile of a genuine sensor.
    pub fn sensor() -> Self {
        Self {
            services: vec![SERVICE_UUID],
            characteristics: vec![NOTIFY_CHAR_UUID, WRITE_CHAR_UUID],
        }
    }

    /// Whether the sensor service and both of its characteristics exist.
    pub fn is_supported(&self) -> bool {
        self.services.contains(&SERVICE_UUID)
            && self.characteristics.contains(&NOTIFY_CHAR_UUID)
            && self.characteristics.contains(&WRITE_CHAR_UUID)
    }
}

/// Something that happened on the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Link established.
    Connected,
    /// Link lost or closed.
    Disconnected,
    /// Service discovery finished.
    ServicesDiscovered(GattProfile),
    /// One notification from the inbound characteristic.
    Notification(Bytes),
    /// A queued write failed.
    WriteError(String),
    /// Connecting or discovering failed.
    DiscoveryError(String),
}

/// Outgoing link primitives.
///
/// Errors returned here mean the request could not even be queued.
pub trait Transport: Send + 'static {
    /// Start connecting to the peer.
    fn connect(&mut self) -> Result<()>;

    /// Close the link.
    fn disconnect(&mut self) -> Result<()>;

    /// Start service discovery.
    fn discover_services(&mut self) -> Result<()>;

    /// Subscribe to the inbound characteristic.
    fn enable_notifications(&mut self) -> Result<()>;

    /// Write one packet to the outbound characteristic.
    fn write(&mut self, packet: Bytes) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn disconnect(&mut self) -> Result<()> {
        (**self).disconnect()
    }

    fn discover_services(&mut self) -> Result<()> {
        (**self).discover_services()
    }

    fn enable_notifications(&mut self) -> Result<()> {
        (**self).enable_notifications()
    }

    fn write(&mut self, packet: Bytes) -> Result<()> {
        (**self).write(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_strings() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "0000b001-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            NOTIFY_CHAR_UUID.to_string(),
            "0000b002-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            WRITE_CHAR_UUID.to_string(),
            "0000b003-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_profile_support() {
        assert!(GattProfile::sensor().is_supported());
        assert!(!GattProfile::default().is_supported());

        let missing_write = GattProfile {
            services: vec![SERVICE_UUID],
            characteristics: vec![NOTIFY_CHAR_UUID],
        };
        assert!(!missing_write.is_supported());
    }
}
