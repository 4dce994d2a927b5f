//! # sensorlink
//!
//! Host-side driver for wearable sensors reachable over a Bluetooth Low
//! Energy GATT link.
//!
//! The device speaks a small binary protocol over two characteristics: the
//! host writes packets to one and receives notifications on the other.
//! This crate implements that protocol and the connection lifecycle around
//! it. The radio itself stays outside: a BLE backend implements
//! [`transport::Transport`] and forwards what happens on the link.
//!
//! ## Architecture
//!
//! - **Protocol** ([`protocol`]): packet encode/decode, one codec per
//!   protocol generation
//! - **Session** ([`Session`]): handshake, time sync, fault-log and config
//!   bootstrap, request correlation, transfer reassembly, timeouts
//! - **Sensor** ([`Sensor`]): async handle to a session running in its own
//!   tokio task
//!
//! Everything the session learns is reported as a [`SensorEvent`] on an
//! unbounded channel.
//!
//! ## Logging
//!
//! The crate logs through `tracing` and never installs a subscriber.
//!
//! ## Example
//!
//! ```ignore
//! use sensorlink::{Sensor, SensorEvent};
//!
//! #[tokio::main]
//! async fn main() -> sensorlink::Result<()> {
//!     let transport = my_ble_backend::connect_to("AA:BB:CC:DD:EE:FF");
//!     let (sensor, mut events) = Sensor::builder().spawn(transport)?;
//!     sensor.connect().await?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let SensorEvent::ConfigUpdated { config, .. } = event {
//!             println!("{:?}", config);
//!             sensor.fetch_logs();
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod event;
pub mod protocol;
pub mod reassembly;
pub mod reference;
pub mod session;
pub mod transport;

mod sensor;

pub use error::{DecodeError, Result, SensorError};
pub use event::{ConnectionState, ErrorKind, EventReceiver, RequestKind, SensorEvent};
pub use protocol::{Command, ProtocolVersion, SensorConfig, INVALID_REF, LOG_STREAM_REF};
pub use reference::ReferenceAllocator;
pub use sensor::{Sensor, SensorBuilder};
pub use session::{Session, SessionConfig};
