//! The sample-stream capability a device session consumes.
//!
//! A source owns the driver connection for one headset and exposes five
//! independent sample channels plus a connection-status channel. Each
//! channel preserves arrival order; nothing aligns samples across channels.
//!
//! Implementations:
//! - [`MuseSource`]: Muse headsets over Bluetooth LE
//! - [`SimulatedSource`]: synthetic headset driven by timers
//! - [`ManualSource`]: caller-fed source, used by tests and demos

mod ble;
mod sim;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::SourceError;
use crate::types::{ConnectionStatus, EegReading, ImuData, PpgReading, TelemetryData};

pub use ble::{first_device, DeviceChooser, FoundDevice, MuseSource, MuseSourceConfig};
pub use sim::{ManualFeed, ManualSource, SimulatedSource};

/// Capacity of every per-channel queue.
pub const CHANNEL_CAPACITY: usize = 256;

/// Receiving ends of a source's channels, handed out once by
/// [`SampleSource::subscribe`].
#[derive(Debug)]
pub struct SampleStreams {
    pub eeg: mpsc::Receiver<EegReading>,
    pub ppg: mpsc::Receiver<PpgReading>,
    pub accel: mpsc::Receiver<ImuData>,
    pub gyro: mpsc::Receiver<ImuData>,
    pub telemetry: mpsc::Receiver<TelemetryData>,
    pub status: watch::Receiver<ConnectionStatus>,
}

/// Sending ends matching a [`SampleStreams`]; kept by the source.
#[derive(Debug, Clone)]
pub struct SampleSenders {
    pub eeg: mpsc::Sender<EegReading>,
    pub ppg: mpsc::Sender<PpgReading>,
    pub accel: mpsc::Sender<ImuData>,
    pub gyro: mpsc::Sender<ImuData>,
    pub telemetry: mpsc::Sender<TelemetryData>,
    pub status: std::sync::Arc<watch::Sender<ConnectionStatus>>,
}

impl SampleSenders {
    pub fn disconnected(&self) {
        self.status.send_replace(ConnectionStatus::Disconnected);
    }
}

/// Create a connected pair of channel ends.
pub fn sample_channels() -> (SampleSenders, SampleStreams) {
    let (eeg_tx, eeg) = mpsc::channel(CHANNEL_CAPACITY);
    let (ppg_tx, ppg) = mpsc::channel(CHANNEL_CAPACITY);
    let (accel_tx, accel) = mpsc::channel(CHANNEL_CAPACITY);
    let (gyro_tx, gyro) = mpsc::channel(CHANNEL_CAPACITY);
    let (telemetry_tx, telemetry) = mpsc::channel(CHANNEL_CAPACITY);
    let (status_tx, status) = watch::channel(ConnectionStatus::Connected);
    (
        SampleSenders {
            eeg: eeg_tx,
            ppg: ppg_tx,
            accel: accel_tx,
            gyro: gyro_tx,
            telemetry: telemetry_tx,
            status: std::sync::Arc::new(status_tx),
        },
        SampleStreams {
            eeg,
            ppg,
            accel,
            gyro,
            telemetry,
            status,
        },
    )
}

/// Driver-facing contract for one headset.
///
/// Lifecycle: `connect` → `subscribe` → `start` → (`pause`/`resume`)* →
/// `disconnect`. Every suspending call may fail; none of them time out.
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Acquire the driver handle and return the device name.
    ///
    /// Fails with [`SourceError::Cancelled`] when the user declines device
    /// selection.
    async fn connect(&mut self) -> Result<String, SourceError>;

    /// Take the channel receivers. Only the first call succeeds.
    fn subscribe(&mut self) -> Result<SampleStreams, SourceError>;

    /// Begin sample flow.
    async fn start(&mut self) -> Result<(), SourceError>;

    async fn pause(&mut self) -> Result<(), SourceError>;

    async fn resume(&mut self) -> Result<(), SourceError>;

    /// Release the driver handle. Calling it twice is harmless.
    async fn disconnect(&mut self) -> Result<(), SourceError>;

    /// Hardware description (`hw`, `fw`, …) if the device reports one.
    async fn device_info(&mut self)
        -> Result<serde_json::Map<String, serde_json::Value>, SourceError>;

    /// Names of the EEG electrodes this source emits, in index order.
    fn eeg_channel_names(&self) -> Vec<String>;

    /// Names of the PPG channels this source emits (empty if none).
    fn ppg_channel_names(&self) -> Vec<String>;
}
