//! Device configuration block.
//!
//! Layout (15 bytes, Little Endian):
//! ```text
//! ┌─────────┬──────────────────────────────────────────┬─────────────┐
//! │ Wake-up │ Sample rates: ECG HR ACC GYRO MAGN TEMP  │ Sleep delay │
//! │ 1 byte  │ 6 × uint16                               │ uint16      │
//! └─────────┴──────────────────────────────────────────┴─────────────┘
//! ```

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

/// Size of the encoded config body.
pub const CONFIG_BODY_SIZE: usize = 1 + 2 * Channel::COUNT + 2;

/// Sample rate value meaning "channel disabled".
pub const RATE_OFF: u16 = 0;

/// Sample rate value meaning "enabled" for on/off channels.
pub const RATE_ON: u16 = 1;

/// Rates accepted for the ECG channel (Hz).
pub const ECG_SAMPLE_RATES: &[u16] = &[RATE_OFF, 125, 128, 200, 250, 256, 500, 512];

/// Rates accepted for the motion channels (Hz).
pub const IMU_SAMPLE_RATES: &[u16] = &[RATE_OFF, 13, 26, 52, 104, 208, 416, 833, 1666];

/// Values accepted for on/off channels.
pub const ON_OFF_RATES: &[u16] = &[RATE_OFF, RATE_ON];

/// Auto-sleep delay of the factory configuration (30 minutes).
pub const DEFAULT_SLEEP_DELAY_SECS: u16 = 30 * 60;

/// When the device leaves its low-power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeUpBehavior {
    /// Never sleeps.
    AlwaysOn,
    /// Wakes when attached to the connector.
    Connected,
    /// Wakes on movement.
    Movement,
    /// Wakes on a single tap.
    SingleTap,
    /// Wakes on a double tap.
    DoubleTap,
    /// Value unknown to this host, preserved as received.
    Unknown(u8),
}

impl From<u8> for WakeUpBehavior {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::AlwaysOn,
            1 => Self::Connected,
            2 => Self::Movement,
            3 => Self::SingleTap,
            4 => Self::DoubleTap,
            other => Self::Unknown(other),
        }
    }
}

impl From<WakeUpBehavior> for u8 {
    fn from(value: WakeUpBehavior) -> Self {
        match value {
            WakeUpBehavior::AlwaysOn => 0,
            WakeUpBehavior::Connected => 1,
            WakeUpBehavior::Movement => 2,
            WakeUpBehavior::SingleTap => 3,
            WakeUpBehavior::DoubleTap => 4,
            WakeUpBehavior::Unknown(raw) => raw,
        }
    }
}

/// Measurement channels in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Ecg,
    HeartRate,
    Acceleration,
    Gyroscope,
    Magnetometer,
    Temperature,
}

impl Channel {
    /// Number of channels.
    pub const COUNT: usize = 6;

    /// All channels in wire order.
    pub const ALL: [Channel; Self::COUNT] = [
        Self::Ecg,
        Self::HeartRate,
        Self::Acceleration,
        Self::Gyroscope,
        Self::Magnetometer,
        Self::Temperature,
    ];

    /// Rates the firmware accepts for this channel.
    pub fn supported_rates(self) -> &'static [u16] {
        match self {
            Self::Ecg => ECG_SAMPLE_RATES,
            Self::Acceleration | Self::Gyroscope | Self::Magnetometer => IMU_SAMPLE_RATES,
            Self::HeartRate | Self::Temperature => ON_OFF_RATES,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Per-channel sample rates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRates([u16; Channel::COUNT]);

impl SampleRates {
    /// Rate configured for `channel`.
    pub fn get(&self, channel: Channel) -> u16 {
        self.0[channel.index()]
    }

    /// Set the rate for `channel`.
    pub fn set(&mut self, channel: Channel, rate: u16) {
        self.0[channel.index()] = rate;
    }

    /// Builder-style variant of [`SampleRates::set`].
    pub fn with(mut self, channel: Channel, rate: u16) -> Self {
        self.set(channel, rate);
        self
    }

    /// Raw values in wire order.
    pub fn as_array(&self) -> &[u16; Channel::COUNT] {
        &self.0
    }
}

/// Device configuration as read from and written to the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Wake-up trigger.
    pub wakeup_behavior: WakeUpBehavior,
    /// Sample rate per channel.
    pub sample_rates: SampleRates,
    /// Idle seconds before the device sleeps (0 = never).
    pub sleep_delay: u16,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            wakeup_behavior: WakeUpBehavior::AlwaysOn,
            sample_rates: SampleRates::default(),
            sleep_delay: 0,
        }
    }
}

impl SensorConfig {
    /// Configuration the device ships with: wake on connector, all
    /// channels off, sleep after 30 minutes.
    pub fn factory_default() -> Self {
        Self {
            wakeup_behavior: WakeUpBehavior::Connected,
            sample_rates: SampleRates::default(),
            sleep_delay: DEFAULT_SLEEP_DELAY_SECS,
        }
    }

    /// Channels whose configured rate is not in their supported table.
    pub fn unsupported_channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| !c.supported_rates().contains(&self.sample_rates.get(*c)))
            .collect()
    }

    /// Parse a configuration preset from JSON.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the configuration as a JSON preset.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub(crate) fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.wakeup_behavior.into());
        for rate in self.sample_rates.as_array() {
            buf.put_u16_le(*rate);
        }
        buf.put_u16_le(self.sleep_delay);
    }

    /// Read the body. Caller guarantees `CONFIG_BODY_SIZE` bytes remain.
    pub(crate) fn read_from(buf: &mut impl Buf) -> Self {
        let wakeup_behavior = WakeUpBehavior::from(buf.get_u8());
        let mut rates = [0u16; Channel::COUNT];
        for rate in &mut rates {
            *rate = buf.get_u16_le();
        }
        Self {
            wakeup_behavior,
            sample_rates: SampleRates(rates),
            sleep_delay: buf.get_u16_le(),
        }
    }
}
