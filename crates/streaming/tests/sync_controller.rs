use std::sync::{Arc, mpsc};

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use runtime::metrics::{
    CYCLES_COMPLETED, MARKERS_LIVE, RECORDS_REJECTED, RENDERER_FAILURES, SNAPSHOTS_RECEIVED,
    TRANSPORT_ERRORS,
};
use runtime::MarkerEvent;
use scene::MarkerState;
use serde_json::json;
use streaming::{
    ChannelSource, ControllerState, MarkerRenderer, RecordingRenderer, SyncConfig, SyncController,
    SyncHandle, TransportError,
};

fn start(config: &SyncConfig, renderer: Arc<dyn MarkerRenderer>) -> (ChannelSource, SyncHandle) {
    let source = ChannelSource::new();
    let handle = SyncController::new(config, renderer)
        .unwrap()
        .start(Box::new(source.clone()))
        .unwrap();
    (source, handle)
}

fn kinds(events: &[MarkerEvent]) -> Vec<(&'static str, String)> {
    events
        .iter()
        .map(|e| (e.kind(), e.id().to_string()))
        .collect()
}

fn ids(markers: &[MarkerState]) -> Vec<&str> {
    markers.iter().map(|m| m.id.as_str()).collect()
}

#[tokio::test]
async fn create_update_remove_cycle() {
    let renderer = Arc::new(RecordingRenderer::new());
    let (source, handle) = start(&SyncConfig::default(), renderer.clone());

    source.push(json!({"A": {"lat": 10, "lon": 20, "category": "fire"}}));
    handle.synced().await;
    assert_eq!(kinds(&renderer.drain()), vec![("created", "A".to_string())]);

    source.push(json!({"A": {"lat": 10, "lon": 20, "category": "flood"}}));
    handle.synced().await;
    let events = renderer.drain();
    assert_eq!(kinds(&events), vec![("updated", "A".to_string())]);
    match &events[0] {
        MarkerEvent::Updated { marker, .. } => assert_eq!(marker.record.category, "flood"),
        other => panic!("unexpected event {other:?}"),
    }

    source.push(json!({}));
    handle.synced().await;
    assert_eq!(kinds(&renderer.drain()), vec![("removed", "A".to_string())]);
    assert!(handle.markers().is_empty());

    let metrics = handle.metrics();
    assert_eq!(metrics.counter(CYCLES_COMPLETED), 3);
    assert_eq!(metrics.gauge(MARKERS_LIVE), Some(0));

    handle.stop().await;
}

#[tokio::test]
async fn invalid_entries_are_skipped() {
    let renderer = Arc::new(RecordingRenderer::new());
    let (source, handle) = start(&SyncConfig::default(), renderer.clone());

    source.push(json!({
        "A": {"lat": 10, "lon": 20, "category": "fire"},
        "B": {"lat": 5, "category": "volunteer"},
        "C": {"lat": "12.5", "lon": 30, "category": "brigade"}
    }));
    handle.synced().await;

    assert_eq!(ids(&handle.markers()), vec!["A", "C"]);
    assert_eq!(handle.marker("C").unwrap().record.lat, 12.5);
    assert_eq!(handle.metrics().counter(RECORDS_REJECTED), 1);
    assert_eq!(
        kinds(&renderer.events()),
        vec![("created", "A".to_string()), ("created", "C".to_string())]
    );

    handle.stop().await;
}

#[tokio::test]
async fn identical_snapshot_emits_nothing() {
    let renderer = Arc::new(RecordingRenderer::new());
    let (source, handle) = start(&SyncConfig::default(), renderer.clone());
    let snapshot = json!({"A": {"lat": 1, "lon": 1, "category": "plane"}});

    source.push(snapshot.clone());
    handle.synced().await;
    renderer.drain();

    source.push(snapshot);
    handle.synced().await;
    assert!(renderer.is_empty());
    assert_eq!(handle.markers().len(), 1);

    handle.stop().await;
}

#[tokio::test]
async fn null_snapshot_clears_markers() {
    let renderer = Arc::new(RecordingRenderer::new());
    let (source, handle) = start(&SyncConfig::default(), renderer.clone());

    source.push(json!({
        "A": {"lat": 1, "lon": 1, "category": "fire"},
        "B": {"lat": 2, "lon": 2, "category": "fire"}
    }));
    handle.synced().await;
    renderer.drain();

    source.push(serde_json::Value::Null);
    handle.synced().await;
    assert_eq!(
        kinds(&renderer.drain()),
        vec![("removed", "A".to_string()), ("removed", "B".to_string())]
    );

    handle.stop().await;
}

#[tokio::test]
async fn transport_errors_leave_state_alone() {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = errors.clone();
    let renderer = Arc::new(RecordingRenderer::new());
    let source = ChannelSource::new();
    let handle = SyncController::new(&SyncConfig::default(), renderer.clone())
        .unwrap()
        .with_error_observer(move |err: &TransportError| seen.lock().push(err.clone()))
        .start(Box::new(source.clone()))
        .unwrap();

    source.push(json!({"A": {"lat": 1, "lon": 1, "category": "fire"}}));
    handle.synced().await;
    renderer.drain();

    source.push_error(TransportError::Upstream("permission denied".to_string()));
    source.push(json!("garbage"));
    handle.synced().await;

    assert_eq!(handle.state(), ControllerState::Listening);
    assert_eq!(ids(&handle.markers()), vec!["A"]);
    assert!(renderer.is_empty());
    assert_eq!(handle.metrics().counter(TRANSPORT_ERRORS), 2);

    let errors = errors.lock();
    assert_eq!(
        errors[0],
        TransportError::Upstream("permission denied".to_string())
    );
    assert!(matches!(errors[1], TransportError::MalformedSnapshot(_)));
    drop(errors);

    handle.stop().await;
}

#[tokio::test]
async fn nothing_is_delivered_after_stop() {
    let renderer = Arc::new(RecordingRenderer::new());
    let (source, handle) = start(&SyncConfig::default(), renderer.clone());
    let feed = handle.feed();

    source.push(json!({"A": {"lat": 1, "lon": 1, "category": "fire"}}));
    handle.synced().await;
    assert_eq!(renderer.len(), 1);

    // Queued but never picked up: stop drops it.
    source.push(json!({"B": {"lat": 1, "lon": 1, "category": "fire"}}));
    handle.stop().await;

    assert!(!source.is_attached());
    assert!(!source.push(json!({"C": {"lat": 1, "lon": 1, "category": "fire"}})));
    assert!(!feed.is_live());
    feed.on_snapshot(json!({"D": {"lat": 1, "lon": 1, "category": "fire"}}));

    tokio::task::yield_now().await;
    assert_eq!(kinds(&renderer.events()), vec![("created", "A".to_string())]);
}

#[tokio::test]
async fn dropping_handle_detaches_source() {
    let (source, handle) = start(&SyncConfig::default(), Arc::new(RecordingRenderer::new()));
    assert!(source.is_attached());
    drop(handle);
    assert!(!source.is_attached());
}

struct FlakyRenderer {
    seen: Mutex<Vec<String>>,
}

impl MarkerRenderer for FlakyRenderer {
    fn on_marker_created(&self, marker: &MarkerState) {
        if marker.id == "boom" {
            panic!("renderer failure");
        }
        self.seen.lock().push(marker.id.clone());
    }

    fn on_marker_updated(&self, marker: &MarkerState) {
        self.seen.lock().push(marker.id.clone());
    }

    fn on_marker_removed(&self, id: &str) {
        self.seen.lock().push(id.to_string());
    }
}

#[tokio::test]
async fn renderer_panic_does_not_corrupt_state() {
    let renderer = Arc::new(FlakyRenderer {
        seen: Mutex::new(Vec::new()),
    });
    let (source, handle) = start(&SyncConfig::default(), renderer.clone());

    source.push(json!({
        "boom": {"lat": 1, "lon": 1, "category": "fire"},
        "ok": {"lat": 2, "lon": 2, "category": "fire"}
    }));
    handle.synced().await;

    assert_eq!(ids(&handle.markers()), vec!["boom", "ok"]);
    assert_eq!(*renderer.seen.lock(), vec!["ok".to_string()]);
    assert_eq!(handle.metrics().counter(RENDERER_FAILURES), 1);

    source.push(json!({"ok": {"lat": 2, "lon": 2, "category": "fire"}}));
    handle.synced().await;
    assert_eq!(ids(&handle.markers()), vec!["ok"]);
    assert_eq!(
        *renderer.seen.lock(),
        vec!["ok".to_string(), "boom".to_string()]
    );
    assert_eq!(handle.state(), ControllerState::Listening);

    handle.stop().await;
}

#[tokio::test]
async fn nearby_markers_share_a_cluster() {
    let config = SyncConfig::from_json_str(r#"{"clustering": {"enabled": true, "radius": 1.0}}"#)
        .unwrap();
    let renderer = Arc::new(RecordingRenderer::new());
    let (source, handle) = start(&config, renderer.clone());

    source.push(json!({
        "A": {"lat": 0.0, "lon": 0.0, "category": "fire"},
        "B": {"lat": 0.5, "lon": 0.5, "category": "fire"},
        "C": {"lat": 40.0, "lon": 40.0, "category": "brigade"}
    }));
    handle.synced().await;

    let a = handle.marker("A").unwrap();
    let b = handle.marker("B").unwrap();
    assert!(a.cluster_id.is_some());
    assert_eq!(a.cluster_id, b.cluster_id);
    assert_eq!(handle.marker("C").unwrap().cluster_id, None);
    renderer.drain();

    // B leaves the group, so A's cluster assignment changes too.
    source.push(json!({
        "A": {"lat": 0.0, "lon": 0.0, "category": "fire"},
        "B": {"lat": 20.0, "lon": 20.0, "category": "fire"},
        "C": {"lat": 40.0, "lon": 40.0, "category": "brigade"}
    }));
    handle.synced().await;
    assert_eq!(
        kinds(&renderer.drain()),
        vec![("updated", "A".to_string()), ("updated", "B".to_string())]
    );
    assert!(handle.markers().iter().all(|m| m.cluster_id.is_none()));

    handle.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_pushes_converge_on_latest() {
    let renderer = Arc::new(RecordingRenderer::new());
    let (source, handle) = start(&SyncConfig::default(), renderer.clone());

    let pusher = source.clone();
    std::thread::spawn(move || {
        for i in 0..50 {
            pusher.push(json!({
                format!("m{i}"): {"lat": 1.0, "lon": i as f64, "category": "fire"}
            }));
        }
    })
    .join()
    .unwrap();

    handle.synced().await;
    assert_eq!(ids(&handle.markers()), vec!["m49"]);

    let metrics = handle.metrics();
    assert_eq!(metrics.counter(SNAPSHOTS_RECEIVED), 50);
    assert!(metrics.counter(CYCLES_COMPLETED) <= 50);

    handle.stop().await;
}

#[tokio::test]
async fn degenerate_cluster_radius_keeps_syncing() {
    let config =
        SyncConfig::from_json_str(r#"{"clustering": {"enabled": true, "radius": 1e-20}}"#)
            .unwrap();
    let (source, handle) = start(&config, Arc::new(RecordingRenderer::new()));

    source.push(json!({
        "A": {"lat": 0.0, "lon": 170.0, "category": "fire"},
        "B": {"lat": 0.0, "lon": 171.0, "category": "fire"}
    }));
    handle.synced().await;
    assert_eq!(handle.state(), ControllerState::Listening);
    assert_eq!(ids(&handle.markers()), vec!["A", "B"]);
    assert!(handle.markers().iter().all(|m| m.cluster_id.is_none()));

    source.push(json!({}));
    handle.synced().await;
    assert!(handle.markers().is_empty());

    handle.stop().await;
}

/// Records like [`RecordingRenderer`], but parks inside the first
/// `on_marker_created` until released.
struct GatedRenderer {
    inner: RecordingRenderer,
    entered: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl MarkerRenderer for GatedRenderer {
    fn begin_cycle(&self, cycle: u64) {
        self.inner.begin_cycle(cycle);
    }

    fn on_marker_created(&self, marker: &MarkerState) {
        self.inner.on_marker_created(marker);
        let entered = self.entered.lock().take();
        if let Some(entered) = entered {
            let _ = entered.send(());
            let _ = self.release.lock().recv();
        }
    }

    fn on_marker_updated(&self, marker: &MarkerState) {
        self.inner.on_marker_updated(marker);
    }

    fn on_marker_removed(&self, id: &str) {
        self.inner.on_marker_removed(id);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_during_notifications_cuts_them_off() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let renderer = Arc::new(GatedRenderer {
        inner: RecordingRenderer::new(),
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(release_rx),
    });
    let (source, handle) = start(&SyncConfig::default(), renderer.clone());
    let feed = handle.feed();

    source.push(json!({
        "A": {"lat": 1, "lon": 1, "category": "fire"},
        "B": {"lat": 2, "lon": 2, "category": "fire"},
        "C": {"lat": 3, "lon": 3, "category": "fire"}
    }));
    entered_rx.recv().unwrap();

    let stopping = tokio::spawn(handle.stop());
    while feed.is_live() {
        std::thread::yield_now();
    }
    release_tx.send(()).unwrap();
    stopping.await.unwrap();

    assert_eq!(
        kinds(&renderer.inner.events()),
        vec![("created", "A".to_string())]
    );
    assert!(!source.is_attached());
    assert!(!source.push(json!({"D": {"lat": 4, "lon": 4, "category": "fire"}})));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn readers_never_see_a_mix_of_snapshots() {
    let (source, handle) = start(&SyncConfig::default(), Arc::new(RecordingRenderer::new()));

    let odd = json!({
        "a1": {"lat": 1, "lon": 1, "category": "fire"},
        "a2": {"lat": 2, "lon": 2, "category": "fire"},
        "a3": {"lat": 3, "lon": 3, "category": "fire"}
    });
    let even = json!({
        "b1": {"lat": 1, "lon": 1, "category": "flood"},
        "b2": {"lat": 2, "lon": 2, "category": "flood"}
    });

    let pusher = source.clone();
    let pushing = std::thread::spawn(move || {
        for i in 0..200 {
            let snapshot = if i % 2 == 0 { even.clone() } else { odd.clone() };
            pusher.push(snapshot);
        }
    });

    let allowed: [Vec<&str>; 3] = [vec![], vec!["a1", "a2", "a3"], vec!["b1", "b2"]];
    while !pushing.is_finished() {
        let markers = handle.markers();
        let seen = ids(&markers);
        assert!(allowed.contains(&seen), "mixed state: {seen:?}");
    }
    pushing.join().unwrap();

    handle.synced().await;
    assert_eq!(ids(&handle.markers()), vec!["a1", "a2", "a3"]);

    handle.stop().await;
}
