//! # muse-recorder
//!
//! Record sessions from one or more [Interaxon Muse](https://choosemuse.com/)
//! headsets at once and upload each device's buffered session to a data
//! server when recording stops.
//!
//! ## How it fits together
//!
//! | Piece | Role |
//! |---|---|
//! | [`source::SampleSource`] | per-device driver: five sample channels plus link status |
//! | [`session::DeviceSession`] | drains one source, feeds live metrics to displays, buffers while recording |
//! | [`registry::DeviceRegistry`] | connected sessions, at most one per device name |
//! | [`coordinator::RecordingCoordinator`] | the single Idle/Recording toggle; dispatches uploads on stop |
//! | [`upload::UploadClient`] | one `POST /data` per device per recording |
//! | [`store::DataStore`] / `server` | per-user session files behind `/data` |
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use muse_recorder::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gateway = StaticGateway { username: "alice".into(), csrf_token: None };
//!     let uploader = UploadClient::new("http://localhost:3000", Arc::new(gateway))?;
//!     let status = StatusLine::new();
//!     let coordinator = RecordingCoordinator::new(Arc::new(uploader), status.clone());
//!     let registry = DeviceRegistry::new(coordinator.flag(), "alice");
//!
//!     let source = MuseSource::new(MuseSourceConfig::default(), first_device());
//!     registry.connect(Box::new(source), None).await?;
//!
//!     coordinator.toggle(&registry); // start
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!     for upload in coordinator.toggle(&registry).uploads {
//!         upload.handle.await??;
//!     }
//!     registry.disconnect_all().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! | Feature | Default | Enables |
//! |---|---|---|
//! | `tui` | yes | the ratatui dashboard binary |
//! | `server` | yes | [`server`] router and the `data-server` binary |

pub mod config;
pub mod coordinator;
pub mod display;
pub mod error;
pub mod metrics;
pub mod parse;
pub mod protocol;
pub mod recording;
pub mod registry;
#[cfg(feature = "server")]
pub mod server;
pub mod session;
pub mod source;
pub mod store;
pub mod types;
pub mod upload;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Everything needed to wire sources, sessions, the toggle and uploads.
pub mod prelude {
    pub use crate::coordinator::{PendingUpload, RecordingCoordinator, Toggle};
    pub use crate::display::{
        DeviceSnapshot, DeviceView, DisplaySurface, LogDisplay, StatusLine, StatusSink,
        StatusUpdate,
    };
    pub use crate::error::{ConnectError, MetricsError, SourceError, StoreError, UploadError};
    pub use crate::metrics::{average, rms, BlinkState, FrameRateEstimator};
    pub use crate::recording::{DeviceMetadata, RecordingSession, RecordingState};
    pub use crate::registry::DeviceRegistry;
    pub use crate::session::DeviceSession;
    pub use crate::source::{
        first_device, DeviceChooser, FoundDevice, ManualFeed, ManualSource, MuseSource,
        MuseSourceConfig, SampleSource, SimulatedSource,
    };
    pub use crate::store::DataStore;
    pub use crate::types::{
        ConnectionStatus, EegReading, ImuData, PpgReading, Sample, TelemetryData, XyzSample,
    };
    pub use crate::upload::{
        SessionGateway, SessionUploader, StaticGateway, UploadClient, UploadPayload,
    };
}
