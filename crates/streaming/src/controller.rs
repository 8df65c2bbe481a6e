//! Snapshot reconciliation controller.
//!
//! Lifecycle:
//!
//! ```text
//! Uninitialized -> Subscribing -> Listening <-> Reconciling
//!                       |             |              |
//!                       +-------------+--------------+--> Unsubscribed
//! ```
//!
//! Pushes land in a single-slot mailbox (`tokio::sync::watch`): a newer
//! snapshot replaces one that has not been picked up yet, so only the latest
//! is guaranteed to be processed. One worker task drains the slot, which
//! keeps at most one reconciliation in flight. The worker holds the registry
//! write lock for the whole reconcile, so readers observe either the previous
//! or the next committed state and never a mix.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use formats::SnapshotPayload;
use foundation::ConfigurationError;
use foundation::math::CoordinateMapper;
use parking_lot::{Mutex, RwLock};
use runtime::metrics::{
    CYCLES_DISCARDED, CYCLES_FAILED, RECORDS_REJECTED, RENDERER_FAILURES, SNAPSHOTS_COALESCED,
    SNAPSHOTS_RECEIVED, TRANSPORT_ERRORS,
};
use runtime::SyncMetrics;
use scene::{ClusterPolicy, DiffResult, MarkerRegistry, MarkerState};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::renderer::MarkerRenderer;
use crate::source::{SnapshotSource, TransportError};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ControllerState {
    Uninitialized,
    Subscribing,
    Listening,
    Reconciling,
    Unsubscribed,
}

type ErrorObserver = Arc<dyn Fn(&TransportError) + Send + Sync>;

/// Configured but not yet subscribed controller.
pub struct SyncController {
    mapper: CoordinateMapper,
    policy: Option<ClusterPolicy>,
    renderer: Arc<dyn MarkerRenderer>,
    error_observer: Option<ErrorObserver>,
}

impl SyncController {
    /// Validates `config`. Configuration errors are fatal here, before any
    /// subscription exists.
    pub fn new(
        config: &SyncConfig,
        renderer: Arc<dyn MarkerRenderer>,
    ) -> Result<Self, ConfigurationError> {
        let (mapper, policy) = config.build()?;
        Ok(Self {
            mapper,
            policy,
            renderer,
            error_observer: None,
        })
    }

    /// Registers a callback for every transport error.
    pub fn with_error_observer(
        mut self,
        observer: impl Fn(&TransportError) + Send + Sync + 'static,
    ) -> Self {
        self.error_observer = Some(Arc::new(observer));
        self
    }

    pub fn state(&self) -> ControllerState {
        ControllerState::Uninitialized
    }

    /// Subscribes to `source` and spawns the reconciliation worker on the
    /// current tokio runtime.
    ///
    /// Snapshots pushed while subscribing are queued and processed once the
    /// controller is listening. On failure the source is left detached.
    pub fn start(
        self,
        mut source: Box<dyn SnapshotSource>,
    ) -> Result<SyncHandle, TransportError> {
        let (pending_tx, pending_rx) = watch::channel(None);
        let (progress_tx, _) = watch::channel(Progress::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            state: Mutex::new(ControllerState::Subscribing),
            registry: RwLock::new(MarkerRegistry::new()),
            metrics: Mutex::new(SyncMetrics::new()),
            pending: pending_tx,
            progress: progress_tx,
            submitted: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
            mapper: self.mapper,
            policy: self.policy,
            renderer: self.renderer,
            error_observer: self.error_observer,
        });

        let feed = SnapshotFeed {
            shared: Arc::downgrade(&shared),
        };
        if let Err(err) = source.subscribe(feed) {
            error!("subscription failed: {err}");
            source.unsubscribe();
            shared.close();
            return Err(err);
        }

        *shared.state.lock() = ControllerState::Listening;
        info!("sync controller listening");

        let worker = tokio::spawn(run_worker(shared.clone(), pending_rx, shutdown_rx));

        Ok(SyncHandle {
            shared,
            source: Some(source),
            shutdown: shutdown_tx,
            worker: Some(worker),
        })
    }
}

/// Cloneable push entry point handed to a [`SnapshotSource`].
///
/// Holds only a weak reference, so a source that outlives its controller
/// pushes into nothing.
#[derive(Clone)]
pub struct SnapshotFeed {
    shared: Weak<Shared>,
}

impl SnapshotFeed {
    /// Queues a full snapshot. Never blocks; replaces any snapshot that has
    /// not been picked up yet.
    pub fn on_snapshot(&self, snapshot: Value) {
        if let Some(shared) = self.shared.upgrade() {
            shared.submit(snapshot);
        }
    }

    pub fn on_transport_error(&self, err: TransportError) {
        if let Some(shared) = self.shared.upgrade() {
            shared.report_transport_error(&err);
        }
    }

    pub fn is_live(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|s| *s.state.lock() != ControllerState::Unsubscribed)
    }
}

impl std::fmt::Debug for SnapshotFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotFeed")
            .field("live", &self.is_live())
            .finish()
    }
}

/// Running controller. Dropping it tears down the subscription without
/// waiting for the worker; prefer [`SyncHandle::stop`].
pub struct SyncHandle {
    shared: Arc<Shared>,
    source: Option<Box<dyn SnapshotSource>>,
    shutdown: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn state(&self) -> ControllerState {
        *self.shared.state.lock()
    }

    pub fn feed(&self) -> SnapshotFeed {
        SnapshotFeed {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn on_snapshot(&self, snapshot: Value) {
        self.shared.submit(snapshot);
    }

    pub fn on_transport_error(&self, err: TransportError) {
        self.shared.report_transport_error(&err);
    }

    /// Sorted copy of the last committed marker state.
    pub fn markers(&self) -> Vec<MarkerState> {
        self.shared.registry.read().markers()
    }

    pub fn marker(&self, id: &str) -> Option<MarkerState> {
        self.shared.registry.read().get(id).cloned()
    }

    pub fn metrics(&self) -> SyncMetrics {
        self.shared.metrics.lock().clone()
    }

    /// Resolves once every snapshot submitted before this call has been
    /// processed or superseded, or the controller has shut down.
    pub async fn synced(&self) {
        let target = self.shared.submitted.load(Ordering::SeqCst);
        let mut rx = self.shared.progress.subscribe();
        let _ = rx.wait_for(|p| p.closed || p.completed >= target).await;
    }

    /// Detaches the source, drops queued snapshots and waits for the worker.
    ///
    /// After this resolves no renderer notification is emitted. Safe to call
    /// while a reconciliation is running; its result is discarded if it has
    /// not committed yet.
    pub async fn stop(mut self) {
        self.teardown();
        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.await {
                error!("sync worker ended abnormally: {err}");
            }
        }
        info!("sync controller stopped");
    }

    fn teardown(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.unsubscribe();
        }
        self.shared.close();
        let _ = self.shutdown.send(true);
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
struct Progress {
    completed: u64,
    closed: bool,
}

struct Pending {
    seq: u64,
    payload: Value,
}

struct Shared {
    state: Mutex<ControllerState>,
    registry: RwLock<MarkerRegistry>,
    metrics: Mutex<SyncMetrics>,
    pending: watch::Sender<Option<Pending>>,
    progress: watch::Sender<Progress>,
    submitted: AtomicU64,
    cycles: AtomicU64,
    mapper: CoordinateMapper,
    policy: Option<ClusterPolicy>,
    renderer: Arc<dyn MarkerRenderer>,
    error_observer: Option<ErrorObserver>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        *self.state.lock() == ControllerState::Unsubscribed
    }

    fn submit(&self, payload: Value) {
        if self.is_closed() {
            debug!("dropping snapshot pushed after teardown");
            return;
        }
        let seq = self.submitted.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.lock().inc_counter(SNAPSHOTS_RECEIVED, 1);

        let mut superseded = None;
        self.pending.send_modify(|slot| {
            superseded = slot.replace(Pending { seq, payload }).map(|p| p.seq);
        });
        if let Some(old) = superseded {
            debug!(old, new = seq, "coalesced pending snapshot");
            self.metrics.lock().inc_counter(SNAPSHOTS_COALESCED, 1);
        }
    }

    fn take_pending(&self) -> Option<Pending> {
        let mut taken = None;
        self.pending.send_if_modified(|slot| {
            taken = slot.take();
            false
        });
        taken
    }

    fn report_transport_error(&self, err: &TransportError) {
        error!("{err}");
        self.metrics.lock().inc_counter(TRANSPORT_ERRORS, 1);
        if let Some(observer) = &self.error_observer {
            observer(err);
        }
    }

    /// Moves to `Unsubscribed` and drops anything still queued.
    fn close(&self) {
        *self.state.lock() = ControllerState::Unsubscribed;
        if let Some(dropped) = self.take_pending() {
            debug!(seq = dropped.seq, "discarded queued snapshot on teardown");
        }
        self.progress.send_modify(|p| p.closed = true);
    }

    fn mark_completed(&self, seq: u64) {
        self.progress.send_modify(|p| p.completed = p.completed.max(seq));
    }

    /// `Listening -> Reconciling`. Fails if the controller is not listening.
    fn begin_reconciling(&self) -> bool {
        let mut state = self.state.lock();
        if *state != ControllerState::Listening {
            return false;
        }
        *state = ControllerState::Reconciling;
        true
    }

    fn finish_reconciling(&self) {
        let mut state = self.state.lock();
        if *state == ControllerState::Reconciling {
            *state = ControllerState::Listening;
        }
    }

    fn run_cycle(&self, pending: Pending) {
        let Pending { seq, payload } = pending;
        self.run_guarded(seq, || self.reconcile(payload));
    }

    /// Runs one cycle in `Reconciling`. A panicking cycle leaves the
    /// registry at its last commit and the controller listening.
    fn run_guarded(&self, seq: u64, cycle: impl FnOnce()) {
        if !self.begin_reconciling() {
            debug!(seq, "controller not listening, snapshot dropped");
            return;
        }
        if catch_unwind(AssertUnwindSafe(cycle)).is_err() {
            error!(seq, "reconciliation panicked; keeping last committed state");
            self.metrics.lock().inc_counter(CYCLES_FAILED, 1);
        }
        self.finish_reconciling();
        self.mark_completed(seq);
    }

    fn reconcile(&self, payload: Value) {
        let payload = match SnapshotPayload::from_value(payload) {
            Ok(payload) => payload,
            Err(err) => {
                self.report_transport_error(&TransportError::MalformedSnapshot(err));
                return;
            }
        };

        let validated = payload.validate();
        for rejected in &validated.rejected {
            warn!(id = %rejected.id, "skipping invalid record: {}", rejected.error);
        }
        let rejected = validated.rejected.len();

        let (cycle, diff, live) = {
            let mut registry = self.registry.write();
            // Results of a cycle that raced teardown are not committed.
            if self.is_closed() {
                self.metrics.lock().inc_counter(CYCLES_DISCARDED, 1);
                return;
            }
            let diff =
                registry.reconcile_clustered(validated.records, &self.mapper, self.policy.as_ref());
            let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
            (cycle, diff, registry.len())
        };

        {
            let mut metrics = self.metrics.lock();
            metrics.inc_counter(RECORDS_REJECTED, rejected as u64);
            metrics.record_cycle(&diff, live);
        }
        info!(
            cycle,
            created = diff.created.len(),
            updated = diff.updated.len(),
            removed = diff.removed.len(),
            changes = diff.len(),
            rejected,
            live,
            "reconciled snapshot"
        );

        self.notify(cycle, &diff);
    }

    fn notify(&self, cycle: u64, diff: &DiffResult) {
        if diff.is_empty() || self.is_closed() {
            return;
        }
        let renderer = self.renderer.as_ref();
        self.guard(|| renderer.begin_cycle(cycle));
        for marker in &diff.created {
            if self.is_closed() {
                return;
            }
            self.guard(|| renderer.on_marker_created(marker));
        }
        for marker in &diff.updated {
            if self.is_closed() {
                return;
            }
            self.guard(|| renderer.on_marker_updated(marker));
        }
        for id in &diff.removed {
            if self.is_closed() {
                return;
            }
            self.guard(|| renderer.on_marker_removed(id));
        }
        self.guard(|| renderer.end_cycle(cycle));
    }

    fn guard(&self, call: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(call)).is_err() {
            warn!("renderer panicked; marker state is unaffected");
            self.metrics.lock().inc_counter(RENDERER_FAILURES, 1);
        }
    }
}

async fn run_worker(
    shared: Arc<Shared>,
    mut pending: watch::Receiver<Option<Pending>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            changed = pending.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }
        if let Some(next) = shared.take_pending() {
            shared.run_cycle(next);
        }
    }
    debug!("sync worker exiting");
}
