//! One connected headset: its source, live metrics, and recording buffer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::display::DisplaySurface;
use crate::error::{ConnectError, MetricsError, SourceError};
use crate::metrics::{average, rms, BlinkState, FrameRateEstimator};
use crate::protocol::REFERENCE_ELECTRODE;
use crate::recording::{
    now_ms, BufferCounts, DeviceMetadata, RecordingFlag, RecordingSession,
};
use crate::source::{SampleSource, SampleStreams};
use crate::types::{ConnectionStatus, Sample};

/// Log the first few samples and then every N-th.
const SAMPLE_LOG_EVERY: u64 = 2_000;

/// State touched from the per-channel tasks.
struct Shared {
    name: String,
    flag: RecordingFlag,
    buffer: Mutex<RecordingSession>,
    frame_rate: Mutex<FrameRateEstimator>,
    displays: Mutex<Vec<Arc<dyn DisplaySurface>>>,
    connected: AtomicBool,
    received: AtomicU64,
}

impl Shared {
    fn each_display(&self, f: impl Fn(&dyn DisplaySurface)) {
        for display in self.displays.lock().iter() {
            f(display.as_ref());
        }
    }

    /// Project `sample` onto the displays, then buffer it if recording.
    fn on_sample(&self, sample: Sample) {
        let n = self.received.fetch_add(1, Ordering::Relaxed) + 1;
        if n <= 3 || n % SAMPLE_LOG_EVERY == 0 {
            debug!("{}: sample #{n} ({})", self.name, sample.kind());
        }

        if let Err(e) = self.show(&sample) {
            warn!("{}: {} metric skipped: {e}", self.name, sample.kind());
        }

        // The flag is read under the buffer lock; the coordinator flips it
        // before draining, so a toggle never lands mid-append.
        let mut buffer = self.buffer.lock();
        if self.flag.is_recording() {
            buffer.start_ts.get_or_insert_with(now_ms);
            buffer.append(&sample);
        }
    }

    fn show(&self, sample: &Sample) -> Result<(), MetricsError> {
        match sample {
            Sample::Eeg(r) => {
                let value = rms(&r.samples)?;
                self.each_display(|d| d.eeg_rms(r.electrode, value));
                if r.electrode == REFERENCE_ELECTRODE {
                    let blink = BlinkState::classify(&r.samples)?;
                    let fps = self.frame_rate.lock().record(Instant::now());
                    self.each_display(|d| {
                        d.blink(blink);
                        d.eeg_reading(r);
                        if let Some(fps) = fps {
                            d.frame_rate(fps);
                        }
                    });
                }
            }
            Sample::Ppg(r) => {
                let level = average(&r.samples)?;
                self.each_display(|d| d.ppg_level(r.ppg_channel, level));
            }
            Sample::Accel(a) => self.each_display(|d| d.accel(a.latest())),
            Sample::Gyro(g) => self.each_display(|d| d.gyro(g.latest())),
            Sample::Telemetry(t) => self.each_display(|d| d.battery(t.battery_level)),
        }
        Ok(())
    }

    fn on_status(&self, status: ConnectionStatus) {
        let was = self
            .connected
            .swap(status == ConnectionStatus::Connected, Ordering::SeqCst);
        if was && status == ConnectionStatus::Disconnected {
            info!("{}: link lost", self.name);
        }
        self.each_display(|d| d.connection(status));
    }
}

/// Forward every item of `rx` into the session as a [`Sample`].
fn pump<T: Send + 'static>(
    shared: &Arc<Shared>,
    mut rx: mpsc::Receiver<T>,
    wrap: fn(T) -> Sample,
) -> JoinHandle<()> {
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            shared.on_sample(wrap(item));
        }
    })
}

/// Live connection and state for one physical headset.
///
/// Created by [`DeviceSession::connect`], normally via
/// [`crate::registry::DeviceRegistry::connect`]. Each of the five sample
/// channels and the status channel is drained by its own task, started by
/// [`DeviceSession::start`] and aborted by [`DeviceSession::disconnect`].
pub struct DeviceSession {
    shared: Arc<Shared>,
    source: tokio::sync::Mutex<Box<dyn SampleSource>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DeviceSession {
    /// Connect `source` and snapshot its metadata for `owner`.
    pub async fn connect(
        mut source: Box<dyn SampleSource>,
        flag: RecordingFlag,
        owner: &str,
    ) -> Result<Self, ConnectError> {
        let name = source.connect().await?;
        let info = match source.device_info().await {
            Ok(info) => info,
            Err(e) => {
                warn!("{name}: no device info: {e}");
                Default::default()
            }
        };
        let metadata = DeviceMetadata {
            device: name.clone(),
            username: owner.to_string(),
            eeg_channels: source.eeg_channel_names(),
            ppg_channels: source.ppg_channel_names(),
            info,
        };
        info!("{name}: connected for {owner}");

        Ok(Self {
            shared: Arc::new(Shared {
                name,
                flag,
                buffer: Mutex::new(RecordingSession::new(metadata)),
                frame_rate: Mutex::new(FrameRateEstimator::new()),
                displays: Mutex::new(Vec::new()),
                connected: AtomicBool::new(true),
                received: AtomicU64::new(0),
            }),
            source: tokio::sync::Mutex::new(source),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn metadata(&self) -> DeviceMetadata {
        self.shared.buffer.lock().metadata.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Samples handled since connect, recorded or not.
    pub fn samples_received(&self) -> u64 {
        self.shared.received.load(Ordering::Relaxed)
    }

    /// Bind a display. Binding the same surface twice has no effect; returns
    /// whether it was newly added.
    pub fn register_display(&self, display: Arc<dyn DisplaySurface>) -> bool {
        let mut displays = self.shared.displays.lock();
        if displays.iter().any(|d| Arc::ptr_eq(d, &display)) {
            return false;
        }
        display.connection(if self.is_connected() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        });
        displays.push(display);
        true
    }

    /// Subscribe to every channel and begin sample flow.
    pub async fn start(&self) -> Result<(), ConnectError> {
        let mut source = self.source.lock().await;
        let streams = source.subscribe()?;
        source.start().await?;

        if self.shared.flag.is_recording() {
            self.shared.buffer.lock().start_ts.get_or_insert_with(now_ms);
        }

        let SampleStreams {
            eeg,
            ppg,
            accel,
            gyro,
            telemetry,
            mut status,
        } = streams;
        let shared = &self.shared;
        let status_task = {
            let shared = Arc::clone(shared);
            tokio::spawn(async move {
                loop {
                    let current = *status.borrow_and_update();
                    shared.on_status(current);
                    if current == ConnectionStatus::Disconnected || status.changed().await.is_err()
                    {
                        break;
                    }
                }
            })
        };
        self.tasks.lock().extend([
            pump(shared, eeg, Sample::Eeg),
            pump(shared, ppg, Sample::Ppg),
            pump(shared, accel, Sample::Accel),
            pump(shared, gyro, Sample::Gyro),
            pump(shared, telemetry, Sample::Telemetry),
            status_task,
        ]);
        info!("{}: streaming", self.name());
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), SourceError> {
        self.source.lock().await.pause().await
    }

    pub async fn resume(&self) -> Result<(), SourceError> {
        self.source.lock().await.resume().await
    }

    /// Stop the channel tasks and release the driver. Repeat calls are
    /// harmless. Uploads already dispatched are unaffected.
    pub async fn disconnect(&self) -> Result<(), SourceError> {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in &tasks {
            task.abort();
        }
        let result = self.source.lock().await.disconnect().await;
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            info!("{}: disconnected", self.name());
            self.shared
                .each_display(|d| d.connection(ConnectionStatus::Disconnected));
        }
        result
    }

    /// Replace the buffer with an empty one starting at `start_ts`.
    pub fn begin_recording(&self, start_ts: u64) {
        let mut buffer = self.shared.buffer.lock();
        *buffer = buffer.fresh();
        buffer.start_ts = Some(start_ts);
    }

    /// Whether the buffer belongs to a recording that has not been drained.
    pub fn has_open_recording(&self) -> bool {
        self.shared.buffer.lock().start_ts.is_some()
    }

    /// Take the buffered session, stamped with `end_ts`, leaving an empty one.
    pub fn finish_recording(&self, end_ts: u64) -> RecordingSession {
        let mut buffer = self.shared.buffer.lock();
        let next = buffer.fresh();
        let mut done = std::mem::replace(&mut *buffer, next);
        done.end_ts = Some(end_ts);
        done
    }

    pub fn buffered(&self) -> BufferCounts {
        self.shared.buffer.lock().counts()
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("name", &self.shared.name)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}
