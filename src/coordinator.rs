//! The single recording toggle shared by every connected device.

use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::display::{StatusSink, StatusUpdate};
use crate::error::UploadError;
use crate::recording::{now_ms, RecordingFlag, RecordingState};
use crate::registry::DeviceRegistry;
use crate::upload::{SessionUploader, UploadPayload};

/// An upload dispatched by a stop transition.
#[derive(Debug)]
pub struct PendingUpload {
    pub device: String,
    pub handle: JoinHandle<Result<(), UploadError>>,
}

/// Outcome of one [`RecordingCoordinator::toggle`].
#[derive(Debug)]
pub struct Toggle {
    /// State after the transition.
    pub state: RecordingState,
    /// One per session that was stopped; empty when recording started.
    pub uploads: Vec<PendingUpload>,
}

/// Owner of the process-wide [`RecordingState`].
///
/// `Idle → Recording` stamps a fresh buffer on every registered session and
/// then raises the flag. `Recording → Idle` lowers the flag first, then
/// takes each buffer and hands it to the uploader on its own task. That
/// includes sessions that disconnected or lost their link mid-recording.
/// Buffers are reset whatever the upload's outcome.
pub struct RecordingCoordinator {
    state: watch::Sender<RecordingState>,
    transition: Mutex<()>,
    uploader: Arc<dyn SessionUploader>,
    status: Arc<dyn StatusSink>,
}

impl RecordingCoordinator {
    pub fn new(uploader: Arc<dyn SessionUploader>, status: Arc<dyn StatusSink>) -> Self {
        let (state, _) = watch::channel(RecordingState::Idle);
        Self {
            state,
            transition: Mutex::new(()),
            uploader,
            status,
        }
    }

    /// Read-only view handed to device sessions.
    pub fn flag(&self) -> RecordingFlag {
        RecordingFlag::new(self.state.subscribe())
    }

    pub fn state(&self) -> RecordingState {
        *self.state.borrow()
    }

    /// Flip the state. Must be called inside a Tokio runtime, since a stop
    /// spawns the uploads.
    pub fn toggle(&self, registry: &DeviceRegistry) -> Toggle {
        let _guard = self.transition.lock();
        match self.state().toggled() {
            RecordingState::Recording => {
                let start_ts = now_ms();
                registry.clear_retired();
                let sessions = registry.sessions();
                for session in &sessions {
                    session.begin_recording(start_ts);
                }
                self.state.send_replace(RecordingState::Recording);
                info!("recording started on {} device(s)", sessions.len());
                self.status.report(StatusUpdate::Recording);
                Toggle {
                    state: RecordingState::Recording,
                    uploads: vec![],
                }
            }
            RecordingState::Idle => {
                self.state.send_replace(RecordingState::Idle);
                let end_ts = now_ms();
                self.status.report(StatusUpdate::RecordingStopped);
                let uploads: Vec<PendingUpload> = registry
                    .recorded_sessions()
                    .iter()
                    .map(|session| {
                        let data = session.finish_recording(end_ts);
                        info!(
                            "{}: recording stopped with {} readings",
                            session.name(),
                            data.counts().total()
                        );
                        self.dispatch(UploadPayload {
                            device: session.name().to_string(),
                            data,
                        })
                    })
                    .collect();
                Toggle {
                    state: RecordingState::Idle,
                    uploads,
                }
            }
        }
    }

    fn dispatch(&self, payload: UploadPayload) -> PendingUpload {
        let device = payload.device.clone();
        let uploader = Arc::clone(&self.uploader);
        let status = Arc::clone(&self.status);
        let name = device.clone();
        let handle = tokio::spawn(async move {
            let result = uploader.upload(payload).await;
            match &result {
                Ok(()) => status.report(StatusUpdate::Saved { device: name }),
                Err(e) => {
                    warn!("{name}: upload failed: {e}");
                    status.report(StatusUpdate::SaveFailed {
                        device: name,
                        error: e.to_string(),
                    });
                }
            }
            result
        });
        PendingUpload { device, handle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::StatusLine;

    struct Discard;

    #[async_trait::async_trait]
    impl SessionUploader for Discard {
        async fn upload(&self, _payload: UploadPayload) -> Result<(), UploadError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn toggle_alternates_and_reports() {
        let status = StatusLine::new();
        let coordinator = RecordingCoordinator::new(Arc::new(Discard), status.clone());
        let registry = DeviceRegistry::new(coordinator.flag(), "alice");
        let flag = coordinator.flag();

        let on = coordinator.toggle(&registry);
        assert_eq!(on.state, RecordingState::Recording);
        assert!(flag.is_recording());
        assert_eq!(status.latest(), Some(StatusUpdate::Recording));

        let off = coordinator.toggle(&registry);
        assert_eq!(off.state, RecordingState::Idle);
        assert!(off.uploads.is_empty());
        assert_eq!(coordinator.state(), RecordingState::Idle);
        assert_eq!(status.latest(), Some(StatusUpdate::RecordingStopped));
    }
}
