//! The set of connected device sessions.

use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::display::DisplaySurface;
use crate::error::{ConnectError, SourceError};
use crate::recording::RecordingFlag;
use crate::session::DeviceSession;
use crate::source::SampleSource;

#[derive(Default)]
struct Sessions {
    /// Connected, in connection order, at most one per device name.
    active: Vec<Arc<DeviceSession>>,
    /// Gone mid-recording; held until the next stop drains their buffers.
    retired: Vec<Arc<DeviceSession>>,
}

impl Sessions {
    fn take(&mut self, name: &str) -> Option<Arc<DeviceSession>> {
        let pos = self.active.iter().position(|s| s.name() == name)?;
        Some(self.active.remove(pos))
    }

    /// Keep `session` for the next stop if it still holds recorded data.
    fn retire(&mut self, session: &Arc<DeviceSession>) {
        if session.has_open_recording() {
            warn!(
                "{}: left during recording, {} buffered readings kept for upload",
                session.name(),
                session.buffered().total()
            );
            self.retired.push(Arc::clone(session));
        }
    }
}

/// Connected sessions, at most one per device name.
///
/// A session that disconnects or loses its link while its buffer holds an
/// undrained recording stays reachable through
/// [`DeviceRegistry::recorded_sessions`] until the coordinator stops.
pub struct DeviceRegistry {
    flag: RecordingFlag,
    owner: String,
    sessions: Mutex<Sessions>,
}

impl DeviceRegistry {
    /// Sessions created here read `flag` and are owned by `owner`.
    pub fn new(flag: RecordingFlag, owner: impl Into<String>) -> Self {
        Self {
            flag,
            owner: owner.into(),
            sessions: Mutex::new(Sessions::default()),
        }
    }

    /// Connect `source`, register it and start streaming.
    ///
    /// The name is only known once the driver connects, so the duplicate
    /// check happens afterwards. A rejected duplicate is dropped without
    /// releasing its driver handle, which may be the one the existing session
    /// is using.
    pub async fn connect(
        &self,
        source: Box<dyn SampleSource>,
        display: Option<Arc<dyn DisplaySurface>>,
    ) -> Result<Arc<DeviceSession>, ConnectError> {
        let session = DeviceSession::connect(source, self.flag.clone(), &self.owner).await?;
        let session = Arc::new(session);
        {
            let mut sessions = self.sessions.lock();
            if sessions.active.iter().any(|s| s.name() == session.name()) {
                warn!("{}: already connected, rejecting", session.name());
                return Err(ConnectError::DuplicateDevice(session.name().to_string()));
            }
            if let Some(display) = display {
                session.register_display(display);
            }
            sessions.active.push(Arc::clone(&session));
        }

        if let Err(e) = session.start().await {
            warn!("{}: start failed: {e}", session.name());
            self.remove(session.name());
            if let Err(e) = session.disconnect().await {
                warn!("{}: disconnect after failed start: {e}", session.name());
            }
            return Err(e);
        }
        Ok(session)
    }

    pub fn get(&self, name: &str) -> Option<Arc<DeviceSession>> {
        self.sessions
            .lock()
            .active
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    /// Forget a session without touching its driver or its buffer.
    pub fn remove(&self, name: &str) -> Option<Arc<DeviceSession>> {
        self.sessions.lock().take(name)
    }

    /// Remove and disconnect `name`; `Ok(false)` if it was not registered.
    /// A recording in progress keeps its buffer for the next stop.
    pub async fn disconnect(&self, name: &str) -> Result<bool, SourceError> {
        let session = {
            let mut sessions = self.sessions.lock();
            let Some(session) = sessions.take(name) else {
                return Ok(false);
            };
            sessions.retire(&session);
            session
        };
        session.disconnect().await?;
        Ok(true)
    }

    pub async fn disconnect_all(&self) {
        let sessions = std::mem::take(&mut *self.sessions.lock());
        for session in sessions.active {
            if let Err(e) = session.disconnect().await {
                warn!("{}: disconnect failed: {e}", session.name());
            }
        }
    }

    /// Drop sessions whose link went away; returns their names. Those
    /// holding an undrained recording are kept for the next stop.
    pub fn prune(&self) -> Vec<String> {
        let mut sessions = self.sessions.lock();
        let (lost, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut sessions.active)
            .into_iter()
            .partition(|s| !s.is_connected());
        sessions.active = kept;
        for session in &lost {
            info!("{}: removed after link loss", session.name());
            sessions.retire(session);
        }
        lost.iter().map(|s| s.name().to_string()).collect()
    }

    /// Snapshot of the connected sessions.
    pub fn sessions(&self) -> Vec<Arc<DeviceSession>> {
        self.sessions.lock().active.clone()
    }

    /// Every session whose buffer a stop must drain: the connected ones plus
    /// those that left during the recording. The latter are released.
    pub fn recorded_sessions(&self) -> Vec<Arc<DeviceSession>> {
        let mut sessions = self.sessions.lock();
        let mut all = sessions.active.clone();
        all.append(&mut sessions.retired);
        all
    }

    /// Release sessions retired after the last stop had already drained them.
    pub fn clear_retired(&self) {
        let stale = std::mem::take(&mut self.sessions.lock().retired);
        for session in stale {
            debug!("{}: released", session.name());
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.sessions
            .lock()
            .active
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingState;
    use crate::source::ManualSource;
    use tokio::sync::watch;

    fn registry() -> (DeviceRegistry, watch::Sender<RecordingState>) {
        let (tx, rx) = watch::channel(RecordingState::Idle);
        (DeviceRegistry::new(RecordingFlag::new(rx), "alice"), tx)
    }

    #[tokio::test]
    async fn cancelled_connect_registers_nothing() {
        let (registry, _tx) = registry();
        let (source, _feed) = ManualSource::new("Muse-A");
        let source = source.failing_with(SourceError::Cancelled);
        let err = registry.connect(Box::new(source), None).await.unwrap_err();
        assert_eq!(err, ConnectError::Cancelled);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn driver_failure_is_a_connection_error() {
        let (registry, _tx) = registry();
        let (source, _feed) = ManualSource::new("Muse-A");
        let source = source.failing_with(SourceError::Driver("adapter off".into()));
        assert!(matches!(
            registry.connect(Box::new(source), None).await,
            Err(ConnectError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn disconnect_and_prune() {
        let (registry, _tx) = registry();
        let (a, _fa) = ManualSource::new("Muse-A");
        let (b, fb) = ManualSource::new("Muse-B");
        registry.connect(Box::new(a), None).await.unwrap();
        registry.connect(Box::new(b), None).await.unwrap();
        assert_eq!(registry.names(), ["Muse-A", "Muse-B"]);

        assert!(registry.disconnect("Muse-A").await.unwrap());
        assert!(!registry.disconnect("Muse-A").await.unwrap());

        fb.drop_link();
        let session = registry.get("Muse-B").unwrap();
        while session.is_connected() {
            tokio::task::yield_now().await;
        }
        assert_eq!(registry.prune(), ["Muse-B"]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn lost_session_with_recording_is_kept_for_the_stop() {
        let (registry, tx) = registry();
        let (a, fa) = ManualSource::new("Muse-A");
        let (b, _fb) = ManualSource::new("Muse-B");
        let a = registry.connect(Box::new(a), None).await.unwrap();
        registry.connect(Box::new(b), None).await.unwrap();

        tx.send_replace(RecordingState::Recording);
        a.begin_recording(1);
        fa.drop_link();
        while a.is_connected() {
            tokio::task::yield_now().await;
        }
        assert_eq!(registry.prune(), ["Muse-A"]);
        assert_eq!(registry.names(), ["Muse-B"]);

        let drained: Vec<String> = registry
            .recorded_sessions()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(drained, ["Muse-B", "Muse-A"]);
        assert_eq!(registry.recorded_sessions().len(), 1);
    }

    #[tokio::test]
    async fn idle_disconnect_keeps_nothing() {
        let (registry, _tx) = registry();
        let (a, _fa) = ManualSource::new("Muse-A");
        registry.connect(Box::new(a), None).await.unwrap();
        assert!(registry.disconnect("Muse-A").await.unwrap());
        assert!(registry.recorded_sessions().is_empty());
    }
}
