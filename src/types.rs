//! Sample types produced by a headset and buffered for upload.
//!
//! Every type here is immutable once produced and serialises with the field
//! names the data endpoint stores (`electrode`, `samples`, `ppgChannel`, …).

use serde::{Deserialize, Serialize};

/// One EEG notification from a single electrode.
///
/// Classic firmware sends 12 samples per notification at 256 Hz
/// (≈ 46.9 ms of signal), scaled to µV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EegReading {
    /// Packet index emitted by the headset (wraps at 0xFFFF).
    pub index: u16,
    /// Electrode index in [`crate::protocol::EEG_CHANNEL_NAMES`] order.
    pub electrode: usize,
    /// Device-clock timestamp of the first sample, ms since Unix epoch.
    pub timestamp: f64,
    /// Voltage samples in µV.
    pub samples: Vec<f64>,
}

/// One PPG notification from a single optical channel (Muse 2 / Muse S).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PpgReading {
    pub index: u16,
    /// 0 = ambient, 1 = infrared, 2 = red.
    pub ppg_channel: usize,
    pub timestamp: f64,
    /// Raw 24-bit ADC values, 6 per notification at 64 Hz.
    pub samples: Vec<u32>,
}

/// Battery and housekeeping packet, roughly once per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryData {
    pub sequence_id: u16,
    /// State of charge in percent.
    pub battery_level: f32,
    /// Fuel-gauge terminal voltage in mV.
    pub fuel_gauge_voltage: f32,
    /// Raw ADC temperature.
    pub temperature: u16,
}

/// A single 3-axis inertial measurement (g for accel, °/s for gyro).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct XyzSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Three consecutive inertial samples from one notification (~52 Hz).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImuData {
    pub sequence_id: u16,
    /// Index 0 is the oldest sample.
    pub samples: [XyzSample; 3],
}

impl ImuData {
    /// The most recent of the three samples.
    pub fn latest(&self) -> XyzSample {
        self.samples[2]
    }
}

/// Any sample a headset can deliver, tagged by the channel it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Eeg(EegReading),
    Ppg(PpgReading),
    Accel(ImuData),
    Gyro(ImuData),
    Telemetry(TelemetryData),
}

impl Sample {
    /// Short channel label used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Sample::Eeg(_) => "eeg",
            Sample::Ppg(_) => "ppg",
            Sample::Accel(_) => "accel",
            Sample::Gyro(_) => "gyro",
            Sample::Telemetry(_) => "telemetry",
        }
    }
}

/// Link state published on a source's connection-status channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}
