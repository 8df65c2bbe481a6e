//! Upstream push sources.
//!
//! The controller does not know how snapshots travel. A source is handed a
//! [`SnapshotFeed`] on subscribe and pushes every full snapshot (or a
//! transport failure) into it from whatever thread or task it runs on.

use std::sync::Arc;

use formats::PayloadError;
use parking_lot::Mutex;
use serde_json::Value;

use crate::controller::SnapshotFeed;

/// Failure reported by, or about, the upstream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Disconnected(String),
    Upstream(String),
    MalformedSnapshot(PayloadError),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Disconnected(msg) => write!(f, "upstream disconnected: {msg}"),
            TransportError::Upstream(msg) => write!(f, "upstream error: {msg}"),
            TransportError::MalformedSnapshot(err) => write!(f, "malformed snapshot: {err}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::MalformedSnapshot(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PayloadError> for TransportError {
    fn from(err: PayloadError) -> Self {
        TransportError::MalformedSnapshot(err)
    }
}

/// A push source of full snapshots.
///
/// `subscribe` attaches the feed; `unsubscribe` must detach it so no further
/// pushes reach the controller. Reconnecting is the source's own concern.
pub trait SnapshotSource: Send {
    fn subscribe(&mut self, feed: SnapshotFeed) -> Result<(), TransportError>;

    fn unsubscribe(&mut self);
}

/// In-process source that forwards whatever its owner pushes.
///
/// Clones share the same attachment, so one clone can be handed to the
/// controller while another keeps pushing.
#[derive(Clone, Default)]
pub struct ChannelSource {
    feed: Arc<Mutex<Option<SnapshotFeed>>>,
}

impl ChannelSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attached(&self) -> bool {
        self.feed.lock().is_some()
    }

    /// Pushes one snapshot. Returns `false` when no controller is attached.
    pub fn push(&self, snapshot: Value) -> bool {
        match self.attached() {
            Some(feed) => {
                feed.on_snapshot(snapshot);
                true
            }
            None => false,
        }
    }

    /// Reports a transport failure. Returns `false` when detached.
    pub fn push_error(&self, err: TransportError) -> bool {
        match self.attached() {
            Some(feed) => {
                feed.on_transport_error(err);
                true
            }
            None => false,
        }
    }

    /// The feed is cloned out so callbacks never run under the lock.
    fn attached(&self) -> Option<SnapshotFeed> {
        self.feed.lock().clone()
    }
}

impl SnapshotSource for ChannelSource {
    fn subscribe(&mut self, feed: SnapshotFeed) -> Result<(), TransportError> {
        *self.feed.lock() = Some(feed);
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.feed.lock().take();
    }
}

impl std::fmt::Debug for ChannelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSource")
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{ChannelSource, TransportError};
    use crate::config::SyncConfig;
    use crate::controller::SyncController;
    use crate::renderer::RecordingRenderer;
    use runtime::metrics::TRANSPORT_ERRORS;
    use serde_json::json;

    #[tokio::test]
    async fn error_observer_can_push_into_its_source() {
        let source = ChannelSource::new();
        let retry = source.clone();
        let handle = SyncController::new(&SyncConfig::default(), Arc::new(RecordingRenderer::new()))
            .unwrap()
            .with_error_observer(move |_| {
                retry.push(json!({"A": {"lat": 1, "lon": 1, "category": "fire"}}));
            })
            .start(Box::new(source.clone()))
            .unwrap();

        assert!(source.push_error(TransportError::Disconnected("reset".to_string())));
        handle.synced().await;

        assert_eq!(handle.markers().len(), 1);
        assert_eq!(handle.metrics().counter(TRANSPORT_ERRORS), 1);
        handle.stop().await;
    }

    #[test]
    fn detached_source_refuses_pushes() {
        let source = ChannelSource::new();
        assert!(!source.is_attached());
        assert!(!source.push(json!({})));
        assert!(!source.push_error(TransportError::Upstream("x".to_string())));
    }
}
