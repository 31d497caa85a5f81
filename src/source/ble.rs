//! Muse headsets over Bluetooth LE (Classic firmware).

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{sample_channels, SampleSenders, SampleSource, SampleStreams};
use crate::error::SourceError;
use crate::parse::{
    decode_eeg_samples, packet_index, parse_accelerometer, parse_gyroscope, parse_ppg_reading,
    parse_telemetry, ControlAccumulator,
};
use crate::protocol::{
    decode_response, encode_command, ACCELEROMETER_CHARACTERISTIC, CONTROL_CHARACTERISTIC,
    EEG_CHANNELS, EEG_CHANNEL_NAMES, EEG_CHARACTERISTICS, EEG_FREQUENCY, EEG_SAMPLES_PER_READING,
    GYROSCOPE_CHARACTERISTIC, PPG_CHANNEL_NAMES, PPG_CHARACTERISTICS, PPG_FREQUENCY,
    PPG_SAMPLES_PER_READING, TELEMETRY_CHARACTERISTIC,
};
use crate::recording::now_ms;
use crate::types::{ConnectionStatus, EegReading};

type InfoMap = serde_json::Map<String, serde_json::Value>;

// ── Packet timestamps ─────────────────────────────────────────────────────────

/// Wall-clock stamps for one channel, extrapolated from the packet index.
///
/// The first packet anchors at `now − one reading`; later packets advance
/// the anchor by whole readings. A packet behind the anchor is back-dated
/// without moving it. A backward jump larger than 0x1000 is taken as a
/// 16-bit wrap.
#[derive(Debug, Default)]
struct TimestampTracker {
    anchor: Option<(u16, f64)>,
}

impl TimestampTracker {
    fn stamp(&mut self, index: u16, samples_per_reading: usize, frequency: f64) -> f64 {
        let reading_ms = 1000.0 * samples_per_reading as f64 / frequency;
        let (last, ts) = *self
            .anchor
            .get_or_insert((index, now_ms() as f64 - reading_ms));

        let last = i32::from(last);
        let mut idx = i32::from(index);
        while last - idx > 0x1000 {
            idx += 0x10000;
        }

        if idx > last {
            let next = ts + reading_ms * f64::from(idx - last);
            self.anchor = Some((index, next));
            next
        } else {
            ts - reading_ms * f64::from(last - idx)
        }
    }
}

// ── Configuration ────────────────────────────────────────────────────────────

/// Scan and streaming options for [`MuseSource`].
#[derive(Debug, Clone)]
pub struct MuseSourceConfig {
    /// Also stream the fifth (AUX) electrode; selects preset `p20`.
    pub enable_aux: bool,
    /// Stream the three PPG channels; selects preset `p50`.
    pub enable_ppg: bool,
    /// How long a scan listens before offering the chooser its results.
    pub scan_timeout_secs: u64,
    /// Advertised-name prefix a peripheral must carry to be offered.
    pub name_prefix: String,
}

impl Default for MuseSourceConfig {
    fn default() -> Self {
        Self {
            enable_aux: false,
            enable_ppg: false,
            scan_timeout_secs: 15,
            name_prefix: "Muse".into(),
        }
    }
}

impl MuseSourceConfig {
    fn eeg_channels(&self) -> usize {
        if self.enable_aux {
            EEG_CHANNEL_NAMES.len()
        } else {
            EEG_CHANNELS
        }
    }

    fn preset(&self) -> &'static str {
        if self.enable_ppg {
            "p50"
        } else if self.enable_aux {
            "p20"
        } else {
            "p21"
        }
    }
}

/// A headset seen during a scan.
#[derive(Debug, Clone)]
pub struct FoundDevice {
    /// Advertised name, e.g. `Muse-AB12`.
    pub name: String,
    /// Platform identifier: a UUID on macOS/Windows, a MAC address on Linux.
    pub id: String,
    peripheral: Peripheral,
    adapter: Adapter,
}

/// Picks one of the scanned devices, or `None` to cancel.
///
/// Runs on a blocking thread, so it may prompt on a terminal.
pub type DeviceChooser = Arc<dyn Fn(&[FoundDevice]) -> Option<usize> + Send + Sync>;

/// Chooser that takes the first device found.
pub fn first_device() -> DeviceChooser {
    Arc::new(|devices: &[FoundDevice]| (!devices.is_empty()).then_some(0))
}

// ── MuseSource ───────────────────────────────────────────────────────────────

struct Link {
    peripheral: Peripheral,
    control: Characteristic,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Link {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// [`SampleSource`] backed by a Muse headset.
///
/// `connect` scans, hands the results to the [`DeviceChooser`], then
/// connects and subscribes to every enabled characteristic. Notifications
/// are decoded and routed to the per-channel queues as they arrive.
pub struct MuseSource {
    config: MuseSourceConfig,
    chooser: DeviceChooser,
    senders: SampleSenders,
    streams: Option<SampleStreams>,
    info: Arc<watch::Sender<Option<InfoMap>>>,
    link: Option<Link>,
}

impl MuseSource {
    pub fn new(config: MuseSourceConfig, chooser: DeviceChooser) -> Self {
        let (senders, streams) = sample_channels();
        let (info, _) = watch::channel(None);
        Self {
            config,
            chooser,
            senders,
            streams: Some(streams),
            info: Arc::new(info),
            link: None,
        }
    }

    /// Listen for `scan_timeout_secs` and return every matching headset.
    pub async fn scan(&self) -> Result<Vec<FoundDevice>, SourceError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::Driver("no Bluetooth adapter found".into()))?;

        // CoreBluetooth ignores scan requests until the central is PoweredOn.
        #[cfg(target_os = "macos")]
        {
            use btleplug::api::CentralState;

            for _ in 0..15 {
                match adapter.adapter_state().await {
                    Ok(CentralState::PoweredOn) => break,
                    Ok(state) => debug!("adapter state {state:?}, waiting"),
                    Err(e) => {
                        warn!("adapter_state: {e}");
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }

        info!("scanning for {} s", self.config.scan_timeout_secs);
        adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(Duration::from_secs(self.config.scan_timeout_secs)).await;
        adapter.stop_scan().await.ok();

        let mut found = vec![];
        for peripheral in adapter.peripherals().await? {
            let Ok(Some(props)) = peripheral.properties().await else {
                continue;
            };
            let Some(name) = props.local_name else {
                continue;
            };
            if name.starts_with(&self.config.name_prefix) {
                let id = peripheral.id().to_string();
                info!("found {name} id={id}");
                found.push(FoundDevice {
                    name,
                    id,
                    peripheral,
                    adapter: adapter.clone(),
                });
            }
        }
        Ok(found)
    }

    async fn send_command(&self, cmd: &str) -> Result<(), SourceError> {
        let link = self.link.as_ref().ok_or(SourceError::NotConnected)?;
        link.peripheral
            .write(&link.control, &encode_command(cmd), WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn open_link(&mut self, device: FoundDevice) -> Result<(), SourceError> {
        let FoundDevice {
            name,
            peripheral,
            adapter,
            ..
        } = device;

        peripheral.connect().await?;
        // BlueZ reports the link before its GATT cache is filled.
        #[cfg(target_os = "linux")]
        tokio::time::sleep(Duration::from_millis(600)).await;
        peripheral.discover_services().await?;
        info!("{name}: connected, services discovered");

        let chars: BTreeSet<Characteristic> = peripheral.characteristics();
        let find = |uuid: Uuid| {
            chars
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or_else(|| SourceError::Driver(format!("characteristic {uuid} not found")))
        };

        let control = find(CONTROL_CHARACTERISTIC)?;
        peripheral.subscribe(&control).await?;
        for uuid in [
            TELEMETRY_CHARACTERISTIC,
            ACCELEROMETER_CHARACTERISTIC,
            GYROSCOPE_CHARACTERISTIC,
        ] {
            peripheral.subscribe(&find(uuid)?).await?;
        }
        let eeg_channels = self.config.eeg_channels();
        for &uuid in &EEG_CHARACTERISTICS[..eeg_channels] {
            match find(uuid) {
                Ok(c) => peripheral.subscribe(&c).await?,
                Err(e) => warn!("{name}: {e}"),
            }
        }
        if self.config.enable_ppg {
            for &uuid in &PPG_CHARACTERISTICS {
                match find(uuid) {
                    Ok(c) => peripheral.subscribe(&c).await?,
                    Err(e) => warn!("{name}: {e}"),
                }
            }
        }

        let notifications = tokio::spawn(dispatch_notifications(
            peripheral.clone(),
            self.senders.clone(),
            Arc::clone(&self.info),
            eeg_channels,
            self.config.enable_ppg,
        ));
        let watcher = tokio::spawn(watch_link(adapter, peripheral.clone(), self.senders.clone()));

        self.link = Some(Link {
            peripheral,
            control,
            tasks: vec![notifications, watcher],
        });
        Ok(())
    }
}

#[async_trait]
impl SampleSource for MuseSource {
    async fn connect(&mut self) -> Result<String, SourceError> {
        let found = self.scan().await?;
        let chooser = Arc::clone(&self.chooser);
        let offered = found.clone();
        let choice = tokio::task::spawn_blocking(move || chooser(&offered))
            .await
            .map_err(|e| SourceError::Driver(e.to_string()))?;
        let device = choice
            .and_then(|i| found.into_iter().nth(i))
            .ok_or(SourceError::Cancelled)?;
        let name = device.name.clone();
        self.open_link(device).await?;
        Ok(name)
    }

    fn subscribe(&mut self) -> Result<SampleStreams, SourceError> {
        self.streams.take().ok_or(SourceError::AlreadySubscribed)
    }

    /// `h` → `s` → preset → `d`.
    async fn start(&mut self) -> Result<(), SourceError> {
        self.send_command("h").await?;
        self.send_command("s").await?;
        self.send_command(self.config.preset()).await?;
        self.send_command("d").await
    }

    async fn pause(&mut self) -> Result<(), SourceError> {
        self.send_command("h").await
    }

    async fn resume(&mut self) -> Result<(), SourceError> {
        self.send_command("d").await
    }

    async fn disconnect(&mut self) -> Result<(), SourceError> {
        let Some(link) = self.link.take() else {
            return Ok(());
        };
        let peripheral = link.peripheral.clone();
        drop(link);
        self.senders.disconnected();
        peripheral.disconnect().await?;
        Ok(())
    }

    /// Sends `v1` and waits for the reply carrying `fw`/`hw`, or for the
    /// link to drop.
    async fn device_info(&mut self) -> Result<InfoMap, SourceError> {
        let mut rx = self.info.subscribe();
        let mut status = self.senders.status.subscribe();
        self.info.send_replace(None);
        self.send_command("v1").await?;
        let reply = async { rx.wait_for(Option::is_some).await.map(|r| r.clone()) };
        tokio::select! {
            reply = reply => Ok(reply
                .map_err(|_| SourceError::NotConnected)?
                .unwrap_or_default()),
            _ = status.wait_for(|s| *s == ConnectionStatus::Disconnected) => {
                Err(SourceError::NotConnected)
            }
        }
    }

    fn eeg_channel_names(&self) -> Vec<String> {
        EEG_CHANNEL_NAMES[..self.config.eeg_channels()]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn ppg_channel_names(&self) -> Vec<String> {
        if !self.config.enable_ppg {
            return vec![];
        }
        PPG_CHANNEL_NAMES.iter().map(|s| s.to_string()).collect()
    }
}

// ── Background tasks ─────────────────────────────────────────────────────────

async fn dispatch_notifications(
    peripheral: Peripheral,
    tx: SampleSenders,
    info: Arc<watch::Sender<Option<InfoMap>>>,
    eeg_channels: usize,
    enable_ppg: bool,
) {
    let mut notifications = match peripheral.notifications().await {
        Ok(n) => n,
        Err(e) => {
            warn!("notification stream unavailable: {e}");
            tx.disconnected();
            return;
        }
    };
    let mut eeg_ts: Vec<TimestampTracker> =
        (0..eeg_channels).map(|_| TimestampTracker::default()).collect();
    let mut ppg_ts: Vec<TimestampTracker> = (0..PPG_CHARACTERISTICS.len())
        .map(|_| TimestampTracker::default())
        .collect();
    let mut control = ControlAccumulator::default();

    while let Some(notif) = notifications.next().await {
        let data = notif.value.as_slice();
        let uuid = notif.uuid;

        if uuid == CONTROL_CHARACTERISTIC {
            let fragment = decode_response(data);
            let Some(json) = control.push(&fragment) else {
                continue;
            };
            match serde_json::from_str::<serde_json::Value>(&json) {
                Ok(serde_json::Value::Object(map))
                    if map.contains_key("fw") || map.contains_key("hw") =>
                {
                    info.send_replace(Some(map));
                }
                Ok(other) => debug!("control reply {other}"),
                Err(e) => warn!("control reply is not JSON: {e} | {json}"),
            }
        } else if uuid == TELEMETRY_CHARACTERISTIC {
            if let Some(t) = parse_telemetry(data) {
                let _ = tx.telemetry.send(t).await;
            }
        } else if uuid == ACCELEROMETER_CHARACTERISTIC {
            if let Some(a) = parse_accelerometer(data) {
                let _ = tx.accel.send(a).await;
            }
        } else if uuid == GYROSCOPE_CHARACTERISTIC {
            if let Some(g) = parse_gyroscope(data) {
                let _ = tx.gyro.send(g).await;
            }
        } else if let Some(electrode) = EEG_CHARACTERISTICS[..eeg_channels]
            .iter()
            .position(|&u| u == uuid)
        {
            let Some(index) = packet_index(data) else {
                continue;
            };
            let reading = EegReading {
                index,
                electrode,
                timestamp: eeg_ts[electrode].stamp(index, EEG_SAMPLES_PER_READING, EEG_FREQUENCY),
                samples: decode_eeg_samples(&data[2..]),
            };
            let _ = tx.eeg.send(reading).await;
        } else if let Some(channel) = PPG_CHARACTERISTICS
            .iter()
            .position(|&u| u == uuid)
            .filter(|_| enable_ppg)
        {
            let Some(index) = packet_index(data) else {
                continue;
            };
            let ts = ppg_ts[channel].stamp(index, PPG_SAMPLES_PER_READING, PPG_FREQUENCY);
            if let Some(reading) = parse_ppg_reading(data, channel, ts) {
                let _ = tx.ppg.send(reading).await;
            }
        } else {
            debug!("unhandled notification from {uuid}");
        }
    }

    info!("notification stream ended");
    tx.disconnected();
}

/// Adapter-level disconnect events often land before the notification stream
/// closes.
async fn watch_link(adapter: Adapter, peripheral: Peripheral, tx: SampleSenders) {
    let id = peripheral.id();
    let mut events = match adapter.events().await {
        Ok(events) => events,
        Err(e) => {
            warn!("could not subscribe to adapter events: {e}");
            return;
        }
    };
    while let Some(event) = events.next().await {
        if matches!(&event, CentralEvent::DeviceDisconnected(gone) if *gone == id) {
            info!("link to {id:?} lost");
            tx.disconnected();
            break;
        }
    }
}
