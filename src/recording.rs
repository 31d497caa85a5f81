//! Recording state and the per-device session buffer.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::types::{EegReading, ImuData, PpgReading, Sample};

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// The process-wide recording toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
}

impl RecordingState {
    pub fn toggled(self) -> Self {
        match self {
            RecordingState::Idle => RecordingState::Recording,
            RecordingState::Recording => RecordingState::Idle,
        }
    }
}

/// Read-only view of the coordinator's state handed to each device session.
#[derive(Debug, Clone)]
pub struct RecordingFlag {
    rx: watch::Receiver<RecordingState>,
}

impl RecordingFlag {
    pub(crate) fn new(rx: watch::Receiver<RecordingState>) -> Self {
        Self { rx }
    }

    pub fn state(&self) -> RecordingState {
        *self.rx.borrow()
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecordingState::Recording
    }
}

/// Snapshot of who and what produced a session, copied into every buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetadata {
    /// Name reported by the hardware; the device identity.
    pub device: String,
    /// Owning user as supplied by the session gateway.
    pub username: String,
    pub eeg_channels: Vec<String>,
    pub ppg_channels: Vec<String>,
    /// Device-info reply (`hw`, `fw`, `bn`, …) when the headset answered.
    #[serde(default)]
    pub info: serde_json::Map<String, serde_json::Value>,
}

/// Everything one device buffered across one Idle → Recording → Idle cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingSession {
    pub start_ts: Option<u64>,
    pub end_ts: Option<u64>,
    pub metadata: DeviceMetadata,
    /// EEG readings grouped by electrode index, arrival order within each.
    pub eeg: Vec<Vec<EegReading>>,
    pub ppg: Vec<PpgReading>,
    pub accel: Vec<ImuData>,
    pub gyro: Vec<ImuData>,
}

/// Number of readings held per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferCounts {
    pub eeg: usize,
    pub ppg: usize,
    pub accel: usize,
    pub gyro: usize,
}

impl BufferCounts {
    pub fn total(&self) -> usize {
        self.eeg + self.ppg + self.accel + self.gyro
    }
}

impl RecordingSession {
    /// An empty buffer with one EEG group per named channel.
    pub fn new(metadata: DeviceMetadata) -> Self {
        Self {
            eeg: vec![Vec::new(); metadata.eeg_channels.len()],
            metadata,
            ..Default::default()
        }
    }

    /// Empty buffer for the same device, ready for the next cycle.
    pub fn fresh(&self) -> Self {
        Self::new(self.metadata.clone())
    }

    /// Append a sample under its channel. Telemetry is display-only and is
    /// not buffered; returns whether anything was stored.
    pub fn append(&mut self, sample: &Sample) -> bool {
        match sample {
            Sample::Eeg(r) => {
                if self.eeg.len() <= r.electrode {
                    self.eeg.resize_with(r.electrode + 1, Vec::new);
                }
                self.eeg[r.electrode].push(r.clone());
            }
            Sample::Ppg(r) => self.ppg.push(r.clone()),
            Sample::Accel(a) => self.accel.push(a.clone()),
            Sample::Gyro(g) => self.gyro.push(g.clone()),
            Sample::Telemetry(_) => return false,
        }
        true
    }

    pub fn counts(&self) -> BufferCounts {
        BufferCounts {
            eeg: self.eeg.iter().map(Vec::len).sum(),
            ppg: self.ppg.len(),
            accel: self.accel.len(),
            gyro: self.gyro.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts().total() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TelemetryData, XyzSample};

    fn metadata() -> DeviceMetadata {
        DeviceMetadata {
            device: "Muse-1A2B".into(),
            username: "alice".into(),
            eeg_channels: vec!["TP9".into(), "AF7".into(), "AF8".into(), "TP10".into()],
            ppg_channels: vec![],
            info: Default::default(),
        }
    }

    fn eeg(electrode: usize) -> Sample {
        Sample::Eeg(EegReading {
            index: 0,
            electrode,
            timestamp: 0.0,
            samples: vec![1.0],
        })
    }

    #[test]
    fn toggled_flips_between_the_two_states() {
        assert_eq!(RecordingState::default(), RecordingState::Idle);
        assert_eq!(RecordingState::Idle.toggled(), RecordingState::Recording);
        assert_eq!(RecordingState::Recording.toggled(), RecordingState::Idle);
    }

    #[test]
    fn new_session_has_one_group_per_electrode() {
        let s = RecordingSession::new(metadata());
        assert_eq!(s.eeg.len(), 4);
        assert!(s.is_empty());
        assert_eq!(s.start_ts, None);
    }

    #[test]
    fn append_routes_by_channel() {
        let mut s = RecordingSession::new(metadata());
        assert!(s.append(&eeg(2)));
        assert!(s.append(&eeg(4)));
        let imu = ImuData {
            sequence_id: 1,
            samples: [XyzSample::default(); 3],
        };
        assert!(s.append(&Sample::Gyro(imu.clone())));
        assert!(s.append(&Sample::Accel(imu)));
        assert!(!s.append(&Sample::Telemetry(TelemetryData {
            sequence_id: 0,
            battery_level: 50.0,
            fuel_gauge_voltage: 0.0,
            temperature: 0,
        })));
        assert_eq!(s.eeg[2].len(), 1);
        assert_eq!(s.eeg.len(), 5);
        assert_eq!(
            s.counts(),
            BufferCounts {
                eeg: 2,
                ppg: 0,
                accel: 1,
                gyro: 1
            }
        );
    }

    #[test]
    fn fresh_keeps_metadata_only() {
        let mut s = RecordingSession::new(metadata());
        s.start_ts = Some(10);
        s.append(&eeg(0));
        let next = s.fresh();
        assert!(next.is_empty());
        assert_eq!(next.start_ts, None);
        assert_eq!(next.metadata, s.metadata);
    }

    #[test]
    fn serialises_with_wire_field_names() {
        let mut s = RecordingSession::new(metadata());
        s.start_ts = Some(1);
        s.append(&eeg(1));
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["start_ts"], 1);
        assert!(json["end_ts"].is_null());
        assert_eq!(json["metadata"]["eegChannels"][1], "AF7");
        assert_eq!(json["eeg"][1][0]["electrode"], 1);
        assert!(json["gyro"].as_array().unwrap().is_empty());
    }
}
