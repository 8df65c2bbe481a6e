use parking_lot::Mutex;
use runtime::{EventLog, MarkerEvent};
use scene::MarkerState;
use tracing::info;

/// Consumer of marker lifecycle notifications.
///
/// Calls arrive after the registry has committed the cycle they describe and
/// are fire-and-forget: a panicking renderer is logged and skipped, it never
/// affects marker state.
pub trait MarkerRenderer: Send + Sync {
    /// Called once before the notifications of a committed cycle.
    fn begin_cycle(&self, _cycle: u64) {}

    fn on_marker_created(&self, marker: &MarkerState);

    fn on_marker_updated(&self, marker: &MarkerState);

    fn on_marker_removed(&self, id: &str);

    /// Called once after the last notification of a cycle.
    fn end_cycle(&self, _cycle: u64) {}
}

/// Renderer that keeps every notification in an [`EventLog`].
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    inner: Mutex<Recording>,
}

#[derive(Debug, Default)]
struct Recording {
    cycle: u64,
    log: EventLog,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MarkerEvent> {
        self.inner.lock().log.events().to_vec()
    }

    pub fn drain(&self) -> Vec<MarkerEvent> {
        self.inner.lock().log.drain()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().log.is_empty()
    }
}

impl MarkerRenderer for RecordingRenderer {
    fn begin_cycle(&self, cycle: u64) {
        self.inner.lock().cycle = cycle;
    }

    fn on_marker_created(&self, marker: &MarkerState) {
        let mut inner = self.inner.lock();
        let cycle = inner.cycle;
        inner.log.push(MarkerEvent::Created {
            cycle,
            marker: marker.clone(),
        });
    }

    fn on_marker_updated(&self, marker: &MarkerState) {
        let mut inner = self.inner.lock();
        let cycle = inner.cycle;
        inner.log.push(MarkerEvent::Updated {
            cycle,
            marker: marker.clone(),
        });
    }

    fn on_marker_removed(&self, id: &str) {
        let mut inner = self.inner.lock();
        let cycle = inner.cycle;
        inner.log.push(MarkerEvent::Removed {
            cycle,
            id: id.to_string(),
        });
    }
}

/// Renderer that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRenderer;

impl MarkerRenderer for TracingRenderer {
    fn on_marker_created(&self, marker: &MarkerState) {
        info!(
            id = %marker.id,
            category = %marker.record.category,
            lat = marker.record.lat,
            lon = marker.record.lon,
            cluster = ?marker.cluster_id,
            "marker created"
        );
    }

    fn on_marker_updated(&self, marker: &MarkerState) {
        info!(
            id = %marker.id,
            category = %marker.record.category,
            lat = marker.record.lat,
            lon = marker.record.lon,
            cluster = ?marker.cluster_id,
            "marker updated"
        );
    }

    fn on_marker_removed(&self, id: &str) {
        info!(id, "marker removed");
    }
}
