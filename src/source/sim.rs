//! Sources that need no hardware.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::info;
use tokio::task::JoinHandle;

use super::{sample_channels, SampleSenders, SampleSource, SampleStreams};
use crate::error::SourceError;
use crate::protocol::{
    EEG_CHANNELS, EEG_CHANNEL_NAMES, EEG_FREQUENCY, EEG_SAMPLES_PER_READING, IMU_FREQUENCY,
    PPG_CHANNEL_NAMES, PPG_FREQUENCY, PPG_SAMPLES_PER_READING, REFERENCE_ELECTRODE,
};
use crate::recording::now_ms;
use crate::types::{EegReading, ImuData, PpgReading, TelemetryData, XyzSample};

fn eeg_names() -> Vec<String> {
    EEG_CHANNEL_NAMES[..EEG_CHANNELS]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn ppg_names() -> Vec<String> {
    PPG_CHANNEL_NAMES.iter().map(|s| s.to_string()).collect()
}

// ── ManualSource ──────────────────────────────────────────────────────────────

/// A source whose samples are pushed explicitly through a [`ManualFeed`].
///
/// ```
/// # use muse_recorder::source::{ManualSource, SampleSource};
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (mut source, feed) = ManualSource::new("Muse-TEST");
/// assert_eq!(source.connect().await.unwrap(), "Muse-TEST");
/// let mut streams = source.subscribe().unwrap();
/// feed.eeg(0, vec![1.0, 2.0]).await;
/// assert_eq!(streams.eeg.recv().await.unwrap().samples, vec![1.0, 2.0]);
/// # }
/// ```
pub struct ManualSource {
    name: String,
    connect_error: Option<SourceError>,
    streams: Option<SampleStreams>,
    senders: SampleSenders,
    driver: Arc<AtomicBool>,
    info: serde_json::Map<String, serde_json::Value>,
}

/// Handle for pushing samples into a [`ManualSource`].
#[derive(Clone)]
pub struct ManualFeed {
    senders: SampleSenders,
    driver: Arc<AtomicBool>,
    index: Arc<AtomicU16>,
}

impl ManualSource {
    pub fn new(name: impl Into<String>) -> (Self, ManualFeed) {
        let (senders, streams) = sample_channels();
        let driver = Arc::new(AtomicBool::new(false));
        let feed = ManualFeed {
            senders: senders.clone(),
            driver: Arc::clone(&driver),
            index: Arc::new(AtomicU16::new(0)),
        };
        let source = Self {
            name: name.into(),
            connect_error: None,
            streams: Some(streams),
            senders,
            driver,
            info: Default::default(),
        };
        (source, feed)
    }

    /// Make `connect` fail with `err`.
    pub fn failing_with(mut self, err: SourceError) -> Self {
        self.connect_error = Some(err);
        self
    }

    /// Device-info reply returned by `device_info`.
    pub fn with_info(mut self, info: serde_json::Map<String, serde_json::Value>) -> Self {
        self.info = info;
        self
    }
}

#[async_trait]
impl SampleSource for ManualSource {
    async fn connect(&mut self) -> Result<String, SourceError> {
        if let Some(err) = self.connect_error.clone() {
            return Err(err);
        }
        self.driver.store(true, Ordering::SeqCst);
        Ok(self.name.clone())
    }

    fn subscribe(&mut self) -> Result<SampleStreams, SourceError> {
        self.streams.take().ok_or(SourceError::AlreadySubscribed)
    }

    async fn start(&mut self) -> Result<(), SourceError> {
        if !self.driver.load(Ordering::SeqCst) {
            return Err(SourceError::NotConnected);
        }
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SourceError> {
        if self.driver.swap(false, Ordering::SeqCst) {
            self.senders.disconnected();
        }
        Ok(())
    }

    async fn device_info(
        &mut self,
    ) -> Result<serde_json::Map<String, serde_json::Value>, SourceError> {
        Ok(self.info.clone())
    }

    fn eeg_channel_names(&self) -> Vec<String> {
        eeg_names()
    }

    fn ppg_channel_names(&self) -> Vec<String> {
        ppg_names()
    }
}

impl ManualFeed {
    fn next_index(&self) -> u16 {
        self.index.fetch_add(1, Ordering::Relaxed)
    }

    /// Push one EEG reading; `false` once the session stopped listening.
    pub async fn eeg(&self, electrode: usize, samples: Vec<f64>) -> bool {
        let reading = EegReading {
            index: self.next_index(),
            electrode,
            timestamp: now_ms() as f64,
            samples,
        };
        self.senders.eeg.send(reading).await.is_ok()
    }

    pub async fn ppg(&self, ppg_channel: usize, samples: Vec<u32>) -> bool {
        let reading = PpgReading {
            index: self.next_index(),
            ppg_channel,
            timestamp: now_ms() as f64,
            samples,
        };
        self.senders.ppg.send(reading).await.is_ok()
    }

    pub async fn accel(&self, samples: [XyzSample; 3]) -> bool {
        let data = ImuData {
            sequence_id: self.next_index(),
            samples,
        };
        self.senders.accel.send(data).await.is_ok()
    }

    pub async fn gyro(&self, samples: [XyzSample; 3]) -> bool {
        let data = ImuData {
            sequence_id: self.next_index(),
            samples,
        };
        self.senders.gyro.send(data).await.is_ok()
    }

    pub async fn telemetry(&self, battery_level: f32) -> bool {
        let data = TelemetryData {
            sequence_id: self.next_index(),
            battery_level,
            fuel_gauge_voltage: 0.0,
            temperature: 0,
        };
        self.senders.telemetry.send(data).await.is_ok()
    }

    /// Simulate the link dropping.
    pub fn drop_link(&self) {
        self.driver.store(false, Ordering::SeqCst);
        self.senders.disconnected();
    }

    /// Whether the source currently holds its driver handle.
    pub fn driver_connected(&self) -> bool {
        self.driver.load(Ordering::SeqCst)
    }
}

// ── SimulatedSource ───────────────────────────────────────────────────────────

/// Seconds between synthetic blink artefacts on the reference electrode.
const BLINK_PERIOD_SECS: f64 = 4.0;
const BLINK_WIDTH_SECS: f64 = 0.25;

/// Synthetic EEG value at time `t` (s) for electrode `ch`.
///
/// Alpha (10 Hz, ±20 µV), beta (22 Hz, ±6 µV) and theta (6 Hz, ±10 µV)
/// plus a small deterministic noise floor; the reference electrode also
/// carries a ~150 µV half-sine blink every [`BLINK_PERIOD_SECS`].
fn sim_eeg(t: f64, ch: usize) -> f64 {
    let phi = ch as f64 * PI / 2.5;
    let alpha = 20.0 * (2.0 * PI * 10.0 * t + phi).sin();
    let beta = 6.0 * (2.0 * PI * 22.0 * t + phi * 1.7).sin();
    let theta = 10.0 * (2.0 * PI * 6.0 * t + phi * 0.9).sin();
    let nx = t * 1000.7 + ch as f64 * 137.508;
    let noise = ((nx.sin() * 9973.1).fract() - 0.5) * 8.0;
    let phase = t % BLINK_PERIOD_SECS;
    let blink = if ch == REFERENCE_ELECTRODE && phase < BLINK_WIDTH_SECS {
        150.0 * (PI * phase / BLINK_WIDTH_SECS).sin()
    } else {
        0.0
    };
    alpha + beta + theta + noise + blink
}

/// A fake headset emitting all five channels at Muse rates.
pub struct SimulatedSource {
    name: String,
    senders: SampleSenders,
    streams: Option<SampleStreams>,
    paused: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    connected: bool,
}

impl SimulatedSource {
    pub fn new(name: impl Into<String>) -> Self {
        let (senders, streams) = sample_channels();
        Self {
            name: name.into(),
            senders,
            streams: Some(streams),
            paused: Arc::new(AtomicBool::new(false)),
            task: None,
            connected: false,
        }
    }
}

#[async_trait]
impl SampleSource for SimulatedSource {
    async fn connect(&mut self) -> Result<String, SourceError> {
        self.connected = true;
        info!("{}: simulated headset connected", self.name);
        Ok(self.name.clone())
    }

    fn subscribe(&mut self) -> Result<SampleStreams, SourceError> {
        self.streams.take().ok_or(SourceError::AlreadySubscribed)
    }

    async fn start(&mut self) -> Result<(), SourceError> {
        if !self.connected {
            return Err(SourceError::NotConnected);
        }
        if self.task.is_none() {
            self.task = Some(tokio::spawn(generate(
                self.senders.clone(),
                Arc::clone(&self.paused),
            )));
        }
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), SourceError> {
        self.paused.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), SourceError> {
        self.paused.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SourceError> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if std::mem::take(&mut self.connected) {
            self.senders.disconnected();
            info!("{}: simulated headset disconnected", self.name);
        }
        Ok(())
    }

    async fn device_info(
        &mut self,
    ) -> Result<serde_json::Map<String, serde_json::Value>, SourceError> {
        let mut info = serde_json::Map::new();
        info.insert("hw".into(), "simulated".into());
        info.insert("fw".into(), env!("CARGO_PKG_VERSION").into());
        info.insert("hn".into(), self.name.clone().into());
        Ok(info)
    }

    fn eeg_channel_names(&self) -> Vec<String> {
        eeg_names()
    }

    fn ppg_channel_names(&self) -> Vec<String> {
        ppg_names()
    }
}

/// Generator loop: one timer per channel family, each at its device rate.
async fn generate(tx: SampleSenders, paused: Arc<AtomicBool>) {
    let eeg_period = EEG_SAMPLES_PER_READING as f64 / EEG_FREQUENCY;
    let ppg_period = PPG_SAMPLES_PER_READING as f64 / PPG_FREQUENCY;
    let imu_period = 3.0 / IMU_FREQUENCY;

    let mut eeg_tick = tokio::time::interval(Duration::from_secs_f64(eeg_period));
    let mut ppg_tick = tokio::time::interval(Duration::from_secs_f64(ppg_period));
    let mut imu_tick = tokio::time::interval(Duration::from_secs_f64(imu_period));
    let mut telemetry_tick = tokio::time::interval(Duration::from_secs(1));

    let mut eeg_index: u16 = 0;
    let mut ppg_index: u16 = 0;
    let mut imu_seq: u16 = 0;
    let mut telemetry_seq: u16 = 0;
    let t0 = now_ms() as f64;

    loop {
        tokio::select! {
            _ = eeg_tick.tick() => {
                let t = f64::from(eeg_index) * eeg_period;
                eeg_index = eeg_index.wrapping_add(1);
                if paused.load(Ordering::Relaxed) {
                    continue;
                }
                for electrode in 0..EEG_CHANNELS {
                    let samples = (0..EEG_SAMPLES_PER_READING)
                        .map(|i| sim_eeg(t + i as f64 / EEG_FREQUENCY, electrode))
                        .collect();
                    let reading = EegReading {
                        index: eeg_index,
                        electrode,
                        timestamp: t0 + t * 1000.0,
                        samples,
                    };
                    let _ = tx.eeg.send(reading).await;
                }
            }
            _ = ppg_tick.tick() => {
                ppg_index = ppg_index.wrapping_add(1);
                if paused.load(Ordering::Relaxed) {
                    continue;
                }
                let t = f64::from(ppg_index) * ppg_period;
                for ppg_channel in 0..PPG_CHANNEL_NAMES.len() {
                    let samples = (0..PPG_SAMPLES_PER_READING)
                        .map(|i| {
                            let ts = t + i as f64 / PPG_FREQUENCY;
                            let pulse = (2.0 * PI * 1.2 * ts).sin();
                            (200_000.0 + 8_000.0 * (ppg_channel as f64 + 1.0) * pulse) as u32
                        })
                        .collect();
                    let reading = PpgReading {
                        index: ppg_index,
                        ppg_channel,
                        timestamp: t0 + t * 1000.0,
                        samples,
                    };
                    let _ = tx.ppg.send(reading).await;
                }
            }
            _ = imu_tick.tick() => {
                imu_seq = imu_seq.wrapping_add(1);
                if paused.load(Ordering::Relaxed) {
                    continue;
                }
                let t = f64::from(imu_seq) * imu_period;
                let accel = XyzSample {
                    x: (0.01 * (2.0 * PI * 0.3 * t).sin()) as f32,
                    y: (0.02 * (2.0 * PI * 0.5 * t).cos()) as f32,
                    z: (-1.0 + 0.005 * (2.0 * PI * 0.1 * t).sin()) as f32,
                };
                let gyro = XyzSample {
                    x: (0.12 * (2.0 * PI * 0.2 * t).sin()) as f32,
                    y: (0.08 * (2.0 * PI * 0.3 * t).cos()) as f32,
                    z: (0.05 * (2.0 * PI * 0.1 * t).sin()) as f32,
                };
                let _ = tx.accel.send(ImuData { sequence_id: imu_seq, samples: [accel; 3] }).await;
                let _ = tx.gyro.send(ImuData { sequence_id: imu_seq, samples: [gyro; 3] }).await;
            }
            _ = telemetry_tick.tick() => {
                telemetry_seq = telemetry_seq.wrapping_add(1);
                let battery_level = (95.0 - f32::from(telemetry_seq) / 300.0).clamp(0.0, 100.0);
                let _ = tx.telemetry.send(TelemetryData {
                    sequence_id: telemetry_seq,
                    battery_level,
                    fuel_gauge_voltage: 3_900.0,
                    temperature: 0,
                }).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_blink_crosses_threshold_on_reference_only() {
        let peak = |ch| {
            (0..64)
                .map(|i| sim_eeg(i as f64 / EEG_FREQUENCY, ch))
                .fold(0.0_f64, |m, v| m.max(v.abs()))
        };
        assert!(peak(REFERENCE_ELECTRODE) >= crate::metrics::BLINK_THRESHOLD);
        assert!(peak(0) < crate::metrics::BLINK_THRESHOLD);
    }

    #[tokio::test]
    async fn manual_source_subscribes_once() {
        let (mut source, _feed) = ManualSource::new("Muse-X");
        assert!(source.subscribe().is_ok());
        assert_eq!(source.subscribe().unwrap_err(), SourceError::AlreadySubscribed);
    }

    #[tokio::test]
    async fn manual_source_reports_configured_failure() {
        let (source, feed) = ManualSource::new("Muse-X");
        let mut source = source.failing_with(SourceError::Cancelled);
        assert_eq!(source.connect().await.unwrap_err(), SourceError::Cancelled);
        assert!(!feed.driver_connected());
    }

    #[tokio::test]
    async fn simulated_source_streams_every_channel() {
        let mut source = SimulatedSource::new("Muse-SIM");
        source.connect().await.unwrap();
        let mut streams = source.subscribe().unwrap();
        source.start().await.unwrap();
        let eeg = streams.eeg.recv().await.unwrap();
        assert_eq!(eeg.samples.len(), EEG_SAMPLES_PER_READING);
        assert_eq!(streams.ppg.recv().await.unwrap().samples.len(), PPG_SAMPLES_PER_READING);
        assert!(streams.accel.recv().await.is_some());
        assert!(streams.gyro.recv().await.is_some());
        assert!(streams.telemetry.recv().await.unwrap().battery_level > 0.0);
        source.disconnect().await.unwrap();
        assert_eq!(
            *streams.status.borrow(),
            crate::types::ConnectionStatus::Disconnected
        );
    }
}
