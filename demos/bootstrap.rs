//! Bootstrap demo - a sensor session against a simulated device.
//!
//! This demo shows:
//! - Spawning a sensor with `Sensor::builder()`
//! - Playing the device side with `MemoryTransport`
//! - The bootstrap: handshake, time sync, fault log, configuration
//! - Listing and downloading a recorded log
//!
//! # Running
//!
//! ```text
//! cargo run --example bootstrap
//! ```

use std::time::Duration;

use sensorlink::protocol::{
    chunk_payload, Channel, LogItem, LogListPage, Packet, SampleRates, StatusCode,
    WakeUpBehavior, MAX_LOG_ITEMS, MAX_PACKET_SIZE,
};
use sensorlink::transport::{GattProfile, MemoryPeer, TransportCall, TransportEvent};
use sensorlink::{Command, ProtocolVersion, Sensor, SensorConfig, SensorEvent};

/// Recorded logs held by the simulated device.
fn recorded_logs() -> Vec<(LogItem, Vec<u8>)> {
    (0..12u32)
        .map(|id| {
            let data: Vec<u8> = (0..(id + 1) * 64).map(|b| (b % 251) as u8).collect();
            let item = LogItem {
                id,
                size: data.len() as u32,
                modified: 1_700_000_000 + u64::from(id) * 3600,
            };
            (item, data)
        })
        .collect()
}

/// Answer every request the host makes, the way the firmware would.
async fn simulate_device(mut peer: MemoryPeer, sensor: Sensor) {
    let logs = recorded_logs();
    let mut config = SensorConfig {
        wakeup_behavior: WakeUpBehavior::DoubleTap,
        sample_rates: SampleRates::default()
            .with(Channel::Ecg, 250)
            .with(Channel::Acceleration, 52),
        sleep_delay: 600,
    };

    let reply = |packet: Packet| sensor.deliver(TransportEvent::Notification(packet.encode()));

    while let Some(call) = peer.next().await {
        let result = match call {
            TransportCall::Connect => sensor.deliver(TransportEvent::Connected),
            TransportCall::DiscoverServices => {
                sensor.deliver(TransportEvent::ServicesDiscovered(GattProfile::sensor()))
            }
            TransportCall::EnableNotifications => Ok(()),
            TransportCall::Disconnect => sensor.deliver(TransportEvent::Disconnected),
            TransportCall::Write(bytes) => match Packet::decode(&bytes) {
                Ok(packet) => answer(packet, &logs, &mut config)
                    .into_iter()
                    .try_for_each(&reply),
                Err(e) => {
                    eprintln!("device: bad packet: {}", e);
                    Ok(())
                }
            },
        };
        if result.is_err() {
            break;
        }
    }
}

fn answer(packet: Packet, logs: &[(LogItem, Vec<u8>)], config: &mut SensorConfig) -> Vec<Packet> {
    let reference = packet.reference();
    let ok = Packet::Status {
        reference,
        status: StatusCode::OK,
    };

    match packet {
        Packet::Handshake { .. } => vec![Packet::Handshake {
            reference,
            version: ProtocolVersion::new(1, 2),
        }],
        Packet::Time { .. } => vec![ok],
        Packet::Config { config: new, .. } => {
            *config = new;
            vec![Packet::Config {
                reference,
                config: new,
            }]
        }
        Packet::Command { command, .. } => match command {
            Command::ReadConfig => vec![Packet::Config {
                reference,
                config: *config,
            }],
            Command::ReadLastFault => {
                let mut blob = 0x1234u64.to_le_bytes().to_vec();
                blob.extend_from_slice(b"HardFault in sensor_task\0lr=0x08004f21\0");
                chunk_payload(reference, &blob, MAX_PACKET_SIZE)
            }
            Command::ListLogs => {
                let items: Vec<LogItem> = logs.iter().map(|(item, _)| *item).collect();
                let pages: Vec<_> = items.chunks(MAX_LOG_ITEMS).collect();
                pages
                    .iter()
                    .enumerate()
                    .map(|(i, page)| Packet::LogList {
                        reference,
                        page: LogListPage {
                            items: page.to_vec(),
                            complete: i + 1 == pages.len(),
                        },
                    })
                    .collect()
            }
            Command::ReadLog { index } => match logs.get(usize::from(index)) {
                Some((_, data)) => chunk_payload(reference, data, MAX_PACKET_SIZE),
                None => vec![Packet::Status {
                    reference,
                    status: StatusCode(404),
                }],
            },
            _ => vec![ok],
        },
        _ => vec![],
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (transport, peer) = sensorlink::transport::MemoryTransport::new();
    let (sensor, mut events) = Sensor::builder()
        .request_timeout(Some(Duration::from_secs(5)))
        .spawn(transport)?;

    tokio::spawn(simulate_device(peer, sensor.clone()));
    sensor.connect().await?;

    let mut download = None;
    while let Some(event) = events.recv().await {
        match event {
            SensorEvent::StateChanged(state) => println!("state: {:?}", state),
            SensorEvent::VersionNegotiated(version) => println!("protocol {}", version),
            SensorEvent::FaultReport {
                reset_marker,
                lines,
            } => {
                println!("last fault ({:#x}):", reset_marker);
                for line in lines {
                    println!("  {}", line);
                }
            }
            SensorEvent::ConfigUpdated { config, .. } => {
                println!("config: {}", config.to_json()?);
                if download.is_none() {
                    sensor.fetch_logs();
                }
            }
            SensorEvent::LogListCompleted { items, .. } => {
                println!("{} logs on device", items.len());
                if let Some(last) = items.last() {
                    download = Some(sensor.download_log(last.id as u16));
                }
            }
            SensorEvent::TransferProgress {
                received, total, ..
            } => println!("  {}/{} bytes", received, total),
            SensorEvent::TransferCompleted { reference, data } if Some(reference) == download => {
                println!("downloaded {} bytes", data.len());
                sensor.shutdown()?;
            }
            SensorEvent::Error(kind) => eprintln!("error: {:?}", kind),
            _ => {}
        }
    }

    Ok(())
}
