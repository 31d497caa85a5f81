//! Display bindings and the UI status line.
//!
//! A [`DisplaySurface`] receives the live metrics a device session derives
//! from each sample. A [`StatusSink`] receives the coarse user-facing status
//! messages (recording started, upload outcome, …).

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::metrics::BlinkState;
use crate::types::{ConnectionStatus, EegReading, XyzSample};

/// Live-metric outputs for one device.
///
/// Methods are called from the sample path and must return promptly.
pub trait DisplaySurface: Send + Sync {
    fn eeg_rms(&self, electrode: usize, rms: f64);
    fn blink(&self, state: BlinkState);
    fn frame_rate(&self, fps: f64);
    fn battery(&self, percent: f32);
    fn ppg_level(&self, channel: usize, level: f64);
    fn accel(&self, sample: XyzSample);
    fn gyro(&self, sample: XyzSample);
    fn connection(&self, status: ConnectionStatus);

    /// Raw reference-electrode reading, for waveform plots.
    fn eeg_reading(&self, _reading: &EegReading) {}
}

// ── Status line ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Recording,
    RecordingStopped,
    Saved { device: String },
    SaveFailed { device: String, error: String },
    Connected { device: String },
    Disconnected { device: String },
    /// Blocking notice, e.g. a rejected duplicate connection.
    Notice(String),
}

impl StatusUpdate {
    pub fn is_failure(&self) -> bool {
        matches!(self, StatusUpdate::SaveFailed { .. } | StatusUpdate::Notice(_))
    }
}

impl fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusUpdate::Recording => f.write_str("Recording"),
            StatusUpdate::RecordingStopped => f.write_str("Recording stopped"),
            StatusUpdate::Saved { device } => write!(f, "{device}: Data saved to server"),
            StatusUpdate::SaveFailed { device, error } => {
                write!(f, "{device}: ERROR: Data not saved ({error})")
            }
            StatusUpdate::Connected { device } => write!(f, "{device}: connected"),
            StatusUpdate::Disconnected { device } => write!(f, "{device}: disconnected"),
            StatusUpdate::Notice(text) => f.write_str(text),
        }
    }
}

pub trait StatusSink: Send + Sync {
    fn report(&self, update: StatusUpdate);
}

const STATUS_HISTORY: usize = 64;

/// Keeps recent status updates and mirrors each to the log.
#[derive(Debug, Default)]
pub struct StatusLine {
    history: Mutex<VecDeque<StatusUpdate>>,
}

impl StatusLine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn latest(&self) -> Option<StatusUpdate> {
        self.history.lock().back().cloned()
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<StatusUpdate> {
        self.history.lock().iter().cloned().collect()
    }
}

impl StatusSink for StatusLine {
    fn report(&self, update: StatusUpdate) {
        if update.is_failure() {
            warn!("{update}");
        } else {
            info!("{update}");
        }
        let mut history = self.history.lock();
        if history.len() == STATUS_HISTORY {
            history.pop_front();
        }
        history.push_back(update);
    }
}

// ── DeviceView ───────────────────────────────────────────────────────────────

/// Reference-electrode samples kept for the waveform (2 s at 256 Hz).
pub const WAVEFORM_LEN: usize = 512;

/// Latest metric values for one device, as last reported.
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    pub rms: Vec<f64>,
    pub blink: Option<BlinkState>,
    pub frame_rate: Option<f64>,
    pub battery: Option<f32>,
    pub ppg: Vec<f64>,
    pub accel: Option<XyzSample>,
    pub gyro: Option<XyzSample>,
    pub connected: bool,
    pub waveform: VecDeque<f64>,
}

fn set_slot(values: &mut Vec<f64>, index: usize, value: f64) {
    if values.len() <= index {
        values.resize(index + 1, 0.0);
    }
    values[index] = value;
}

/// A [`DisplaySurface`] that stores what it is shown, for a UI to poll.
#[derive(Debug, Default)]
pub struct DeviceView {
    snapshot: Mutex<DeviceSnapshot>,
}

impl DeviceView {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.snapshot.lock().clone()
    }
}

impl DisplaySurface for DeviceView {
    fn eeg_rms(&self, electrode: usize, rms: f64) {
        set_slot(&mut self.snapshot.lock().rms, electrode, rms);
    }

    fn blink(&self, state: BlinkState) {
        self.snapshot.lock().blink = Some(state);
    }

    fn frame_rate(&self, fps: f64) {
        self.snapshot.lock().frame_rate = Some(fps);
    }

    fn battery(&self, percent: f32) {
        self.snapshot.lock().battery = Some(percent);
    }

    fn ppg_level(&self, channel: usize, level: f64) {
        set_slot(&mut self.snapshot.lock().ppg, channel, level);
    }

    fn accel(&self, sample: XyzSample) {
        self.snapshot.lock().accel = Some(sample);
    }

    fn gyro(&self, sample: XyzSample) {
        self.snapshot.lock().gyro = Some(sample);
    }

    fn connection(&self, status: ConnectionStatus) {
        self.snapshot.lock().connected = status == ConnectionStatus::Connected;
    }

    fn eeg_reading(&self, reading: &EegReading) {
        let mut snap = self.snapshot.lock();
        snap.waveform.extend(reading.samples.iter().copied());
        let excess = snap.waveform.len().saturating_sub(WAVEFORM_LEN);
        snap.waveform.drain(..excess);
    }
}

// ── LogDisplay ───────────────────────────────────────────────────────────────

/// A [`DisplaySurface`] for headless runs: blink and connection changes at
/// `info`, periodic metrics at `debug`.
#[derive(Debug)]
pub struct LogDisplay {
    device: String,
    last_blink: Mutex<Option<BlinkState>>,
}

impl LogDisplay {
    pub fn new(device: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            device: device.into(),
            last_blink: Mutex::new(None),
        })
    }
}

impl DisplaySurface for LogDisplay {
    fn eeg_rms(&self, _electrode: usize, _rms: f64) {}

    fn blink(&self, state: BlinkState) {
        let mut last = self.last_blink.lock();
        if *last != Some(state) {
            info!("{}: {state}", self.device);
            *last = Some(state);
        }
    }

    fn frame_rate(&self, fps: f64) {
        debug!("{}: {fps:.1} fps", self.device);
    }

    fn battery(&self, percent: f32) {
        debug!("{}: battery {percent:.1}%", self.device);
    }

    fn ppg_level(&self, _channel: usize, _level: f64) {}

    fn accel(&self, _sample: XyzSample) {}

    fn gyro(&self, _sample: XyzSample) {}

    fn connection(&self, status: ConnectionStatus) {
        info!("{}: {status:?}", self.device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_texts() {
        assert_eq!(StatusUpdate::Recording.to_string(), "Recording");
        assert_eq!(StatusUpdate::RecordingStopped.to_string(), "Recording stopped");
        let failed = StatusUpdate::SaveFailed {
            device: "Muse-1".into(),
            error: "server answered 500: boom".into(),
        };
        assert_eq!(
            failed.to_string(),
            "Muse-1: ERROR: Data not saved (server answered 500: boom)"
        );
        assert!(failed.is_failure());
    }

    #[test]
    fn status_line_keeps_bounded_history() {
        let line = StatusLine::new();
        for _ in 0..STATUS_HISTORY + 5 {
            line.report(StatusUpdate::Recording);
        }
        line.report(StatusUpdate::RecordingStopped);
        assert_eq!(line.history().len(), STATUS_HISTORY);
        assert_eq!(line.latest(), Some(StatusUpdate::RecordingStopped));
    }

    #[test]
    fn device_view_tracks_latest_values() {
        let view = DeviceView::new();
        view.eeg_rms(2, 7.5);
        view.ppg_level(1, 3.0);
        view.connection(ConnectionStatus::Connected);
        view.eeg_reading(&EegReading {
            index: 0,
            electrode: 1,
            timestamp: 0.0,
            samples: vec![1.0; WAVEFORM_LEN + 10],
        });
        let snap = view.snapshot();
        assert_eq!(snap.rms, vec![0.0, 0.0, 7.5]);
        assert_eq!(snap.ppg, vec![0.0, 3.0]);
        assert!(snap.connected);
        assert_eq!(snap.waveform.len(), WAVEFORM_LEN);
    }
}
