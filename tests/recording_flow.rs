//! End-to-end recording cycles over scripted headsets.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use muse_recorder::prelude::*;

/// Keeps every payload it is handed; optionally answers like a failing server.
#[derive(Default)]
struct Capture {
    payloads: Mutex<Vec<UploadPayload>>,
    fail: Mutex<bool>,
}

#[async_trait]
impl SessionUploader for Capture {
    async fn upload(&self, payload: UploadPayload) -> Result<(), UploadError> {
        self.payloads.lock().push(payload);
        if *self.fail.lock() {
            return Err(UploadError::Status {
                status: 500,
                body: "boom".into(),
            });
        }
        Ok(())
    }
}

struct Rig {
    capture: Arc<Capture>,
    status: Arc<StatusLine>,
    coordinator: RecordingCoordinator,
    registry: DeviceRegistry,
}

fn rig() -> Rig {
    let capture = Arc::new(Capture::default());
    let status = StatusLine::new();
    let coordinator = RecordingCoordinator::new(capture.clone(), status.clone());
    let registry = DeviceRegistry::new(coordinator.flag(), "alice");
    Rig {
        capture,
        status,
        coordinator,
        registry,
    }
}

async fn attach(registry: &DeviceRegistry, name: &str) -> (Arc<DeviceSession>, ManualFeed) {
    let (source, feed) = ManualSource::new(name);
    let session = registry.connect(Box::new(source), None).await.unwrap();
    (session, feed)
}

/// Wait until the session has processed `n` samples in total.
async fn settle(session: &DeviceSession, n: u64) {
    for _ in 0..500 {
        if session.samples_received() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!(
        "{} processed {} of {n} samples",
        session.name(),
        session.samples_received()
    );
}

async fn stop(rig: &Rig) -> Vec<Result<(), UploadError>> {
    let toggle = rig.coordinator.toggle(&rig.registry);
    assert_eq!(toggle.state, RecordingState::Idle);
    let mut results = vec![];
    for upload in toggle.uploads {
        results.push(upload.handle.await.unwrap());
    }
    results
}

#[tokio::test]
async fn eeg_readings_reach_the_upload_in_order() {
    let rig = rig();
    let (session, feed) = attach(&rig.registry, "Muse-A").await;

    rig.coordinator.toggle(&rig.registry);
    for samples in [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]] {
        assert!(feed.eeg(0, samples.to_vec()).await);
    }
    settle(&session, 3).await;

    let results = stop(&rig).await;
    assert_eq!(results.len(), 1);
    assert!(results[0].is_ok());

    let payloads = rig.capture.payloads.lock();
    let payload = &payloads[0];
    assert_eq!(payload.device, "Muse-A");
    assert_eq!(payload.data.metadata.username, "alice");
    let got: Vec<Vec<f64>> = payload.data.eeg[0].iter().map(|r| r.samples.clone()).collect();
    assert_eq!(
        got,
        vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0], vec![7.0, 8.0, 9.0]]
    );
    let (start, end) = (payload.data.start_ts.unwrap(), payload.data.end_ts.unwrap());
    assert!(start <= end);

    assert_eq!(session.buffered().total(), 0);
    assert_eq!(
        rig.status.latest(),
        Some(StatusUpdate::Saved {
            device: "Muse-A".into()
        })
    );
}

#[tokio::test]
async fn idle_samples_are_shown_but_not_buffered() {
    let rig = rig();
    let (session, feed) = attach(&rig.registry, "Muse-A").await;
    let view = DeviceView::new();
    session.register_display(view.clone());

    feed.eeg(1, vec![10.0, -10.0]).await;
    feed.accel([XyzSample::default(); 3]).await;
    feed.telemetry(87.0).await;
    settle(&session, 3).await;

    assert_eq!(session.buffered().total(), 0);
    let snap = view.snapshot();
    assert!((snap.rms[1] - 10.0).abs() < 1e-9);
    assert_eq!(snap.battery, Some(87.0));
}

#[tokio::test]
async fn empty_recording_still_uploads() {
    let rig = rig();
    attach(&rig.registry, "Muse-A").await;

    rig.coordinator.toggle(&rig.registry);
    let results = stop(&rig).await;
    assert_eq!(results.len(), 1);

    let payloads = rig.capture.payloads.lock();
    assert_eq!(payloads.len(), 1);
    assert!(payloads[0].data.is_empty());
    assert!(payloads[0].data.start_ts.is_some());
    assert!(payloads[0].data.end_ts.is_some());
}

#[tokio::test]
async fn duplicate_is_rejected_without_touching_the_original() {
    let rig = rig();
    let (session, feed) = attach(&rig.registry, "Muse-A").await;

    rig.coordinator.toggle(&rig.registry);
    feed.eeg(0, vec![1.0]).await;
    settle(&session, 1).await;

    let (dup, _dup_feed) = ManualSource::new("Muse-A");
    let err = rig.registry.connect(Box::new(dup), None).await.unwrap_err();
    assert!(matches!(err, ConnectError::DuplicateDevice(ref name) if name == "Muse-A"));

    assert_eq!(rig.registry.len(), 1);
    assert!(feed.driver_connected());
    assert!(session.is_connected());
    assert_eq!(session.buffered().eeg, 1);

    // The original keeps streaming into its buffer.
    feed.eeg(0, vec![2.0]).await;
    settle(&session, 2).await;
    assert_eq!(session.buffered().eeg, 2);
    stop(&rig).await;
}

#[tokio::test]
async fn devices_keep_separate_buffers() {
    let rig = rig();
    let (a, feed_a) = attach(&rig.registry, "Muse-A").await;
    let (b, feed_b) = attach(&rig.registry, "Muse-B").await;

    rig.coordinator.toggle(&rig.registry);
    feed_a.eeg(0, vec![1.0]).await;
    feed_a.eeg(0, vec![1.5]).await;
    feed_b.eeg(2, vec![2.0]).await;
    feed_b.ppg(0, vec![100, 200]).await;
    settle(&a, 2).await;
    settle(&b, 2).await;

    let results = stop(&rig).await;
    assert_eq!(results.len(), 2);

    let payloads = rig.capture.payloads.lock();
    let find = |name: &str| {
        payloads
            .iter()
            .find(|p| p.device == name)
            .unwrap_or_else(|| panic!("no upload for {name}"))
    };
    let pa = find("Muse-A");
    let pb = find("Muse-B");
    assert_eq!(pa.data.metadata.device, "Muse-A");
    assert_eq!(pa.data.counts().eeg, 2);
    assert_eq!(pa.data.counts().ppg, 0);
    assert_eq!(pb.data.metadata.device, "Muse-B");
    assert_eq!(pb.data.eeg[2].len(), 1);
    assert_eq!(pb.data.counts().ppg, 1);
}

#[tokio::test]
async fn failed_upload_is_reported_and_toggle_keeps_working() {
    let rig = rig();
    let (session, feed) = attach(&rig.registry, "Muse-A").await;
    *rig.capture.fail.lock() = true;

    rig.coordinator.toggle(&rig.registry);
    feed.eeg(0, vec![1.0]).await;
    settle(&session, 1).await;
    let results = stop(&rig).await;
    assert!(matches!(
        results[0],
        Err(UploadError::Status { status: 500, .. })
    ));

    let latest = rig.status.latest().unwrap();
    assert!(latest.is_failure());
    assert!(latest.to_string().starts_with("Muse-A: ERROR: Data not saved"));
    // The data is gone; the buffer starts over.
    assert_eq!(session.buffered().total(), 0);

    *rig.capture.fail.lock() = false;
    rig.coordinator.toggle(&rig.registry);
    assert_eq!(rig.coordinator.state(), RecordingState::Recording);
    feed.eeg(0, vec![3.0]).await;
    settle(&session, 2).await;
    let results = stop(&rig).await;
    assert!(results[0].is_ok());

    let payloads = rig.capture.payloads.lock();
    assert_eq!(payloads.len(), 2);
    assert_eq!(payloads[1].data.eeg[0][0].samples, vec![3.0]);
}

#[tokio::test]
async fn lost_link_is_pruned() {
    let rig = rig();
    let (session, feed) = attach(&rig.registry, "Muse-A").await;
    assert!(session.is_connected());

    feed.drop_link();
    for _ in 0..500 {
        if !session.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(rig.registry.prune(), vec!["Muse-A".to_string()]);
    assert!(rig.registry.is_empty());
}

#[tokio::test]
async fn link_lost_mid_recording_still_uploads() {
    let rig = rig();
    let (session, feed) = attach(&rig.registry, "Muse-A").await;

    rig.coordinator.toggle(&rig.registry);
    for samples in [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]] {
        assert!(feed.eeg(0, samples.to_vec()).await);
    }
    settle(&session, 3).await;

    feed.drop_link();
    for _ in 0..500 {
        if !session.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(rig.registry.prune(), vec!["Muse-A".to_string()]);
    assert!(rig.registry.is_empty());

    let results = stop(&rig).await;
    assert_eq!(results.len(), 1);
    assert!(results[0].is_ok());
    {
        let payloads = rig.capture.payloads.lock();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].device, "Muse-A");
        assert_eq!(payloads[0].data.eeg[0].len(), 3);
    }
    assert_eq!(
        rig.status.latest(),
        Some(StatusUpdate::Saved {
            device: "Muse-A".into()
        })
    );

    // Drained once; the next cycle has nothing to send.
    rig.coordinator.toggle(&rig.registry);
    assert!(stop(&rig).await.is_empty());
}

#[tokio::test]
async fn reconnect_mid_recording_uploads_both_sessions() {
    let rig = rig();
    let (first, feed) = attach(&rig.registry, "Muse-A").await;

    rig.coordinator.toggle(&rig.registry);
    feed.eeg(0, vec![1.0]).await;
    settle(&first, 1).await;
    assert!(rig.registry.disconnect("Muse-A").await.unwrap());

    let (second, feed) = attach(&rig.registry, "Muse-A").await;
    feed.eeg(0, vec![2.0]).await;
    settle(&second, 1).await;

    let results = stop(&rig).await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(Result::is_ok));

    let payloads = rig.capture.payloads.lock();
    let mut firsts: Vec<f64> = payloads
        .iter()
        .map(|p| {
            assert_eq!(p.device, "Muse-A");
            assert_eq!(p.data.eeg[0].len(), 1);
            p.data.eeg[0][0].samples[0]
        })
        .collect();
    firsts.sort_by(f64::total_cmp);
    assert_eq!(firsts, vec![1.0, 2.0]);
}
