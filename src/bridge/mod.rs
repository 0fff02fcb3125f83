//! Reliable bridge between an upstream producer and one downstream
//! subscription.
//!
//! The bridge decouples the lifetime, recovery timing, and checkpoint
//! content of a dynamically created sub-computation from its parent: the
//! upstream producer can begin emitting before the downstream subscription
//! exists, and the two sides are checkpointed independently. Events arriving
//! before the first downstream start are buffered in an in-memory replay
//! queue; each delivered event advances the low watermark by exactly one.
//! Delivery and its acknowledgment are committed together in the same
//! checkpoint, so no separate acknowledgment protocol exists at this level.

mod state;
mod subscription;

pub use state::{BridgeState, BridgeVersion};
pub use subscription::BridgeSubscription;

use crate::checkpoint::{StateReader, StateWriter};
use crate::error::{EngineError, Result};
use crate::service::{ObservableDefinition, ReactiveService};
use crate::types::{Observer, SequenceId, Uri};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct BridgeCore<T> {
    /// Replay queue of events seen before any downstream start, with their
    /// assigned sequence ids. Invariant: `Some` exactly until the first
    /// downstream subscription completes its start.
    queue: Option<VecDeque<(SequenceId, T)>>,
    /// Label for the next queued event. Counts arrivals from the beginning
    /// of the upstream sequence and is not touched by `load_state`, so
    /// events queued before and after a state load carry consistent ids.
    queue_seq: SequenceId,
    /// Next sequence id to assign/expect. Advances forward only.
    low_watermark: SequenceId,
    pending_error: Option<Arc<EngineError>>,
    pending_completed: bool,
    /// A terminal notification has been delivered downstream.
    completion_notified: bool,
    downstream: Option<Arc<dyn Observer<T>>>,
    upstream_subscription: Option<Uri>,
    /// Only recorded by v1 bridges (and v1-era checkpoints).
    upstream_observable: Option<Uri>,
}

/// Reliable decoupling subject. One per higher-order invocation.
pub struct Bridge<T> {
    uri: Uri,
    definition: ObservableDefinition,
    service: Arc<dyn ReactiveService<T>>,
    version: BridgeVersion,
    core: Mutex<BridgeCore<T>>,
    /// At most one downstream subscription object exists at a time.
    claimed: AtomicBool,
    disposed: AtomicBool,
    state_changed: AtomicBool,
}

impl<T: Send + 'static> Bridge<T> {
    pub fn new(
        uri: Uri,
        definition: ObservableDefinition,
        service: Arc<dyn ReactiveService<T>>,
    ) -> Arc<Self> {
        Self::with_version(uri, definition, service, BridgeVersion::V2)
    }

    pub fn with_version(
        uri: Uri,
        definition: ObservableDefinition,
        service: Arc<dyn ReactiveService<T>>,
        version: BridgeVersion,
    ) -> Arc<Self> {
        Arc::new(Bridge {
            uri,
            definition,
            service,
            version,
            core: Mutex::new(BridgeCore {
                queue: Some(VecDeque::new()),
                queue_seq: SequenceId::ZERO,
                low_watermark: SequenceId::ZERO,
                pending_error: None,
                pending_completed: false,
                completion_notified: false,
                downstream: None,
                upstream_subscription: None,
                upstream_observable: None,
            }),
            claimed: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            state_changed: AtomicBool::new(false),
        })
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Whether the bridge has unsaved watermark/notification changes.
    pub fn state_changed(&self) -> bool {
        self.state_changed.load(Ordering::SeqCst)
    }

    /// The low watermark: next sequence id to assign/expect.
    pub fn low_watermark(&self) -> SequenceId {
        self.core.lock().low_watermark
    }

    /// Create the downstream subscription.
    ///
    /// At most one downstream subscription object may exist; a concurrent
    /// second call loses the claim and is rejected.
    pub fn subscribe(
        self: &Arc<Self>,
        downstream: Arc<dyn Observer<T>>,
    ) -> Result<Arc<BridgeSubscription<T>>> {
        if self.is_disposed() {
            return Err(EngineError::BridgeDisposed(self.uri.to_string()));
        }
        if self
            .claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::AlreadySubscribed(self.uri.to_string()));
        }
        Ok(BridgeSubscription::new(self.clone(), downstream))
    }

    /// Bind to the upstream producer via the reactive service. Called by the
    /// downstream subscription's first successful start.
    pub(crate) fn connect_upstream(self: &Arc<Self>) -> Result<()> {
        let observer: Arc<dyn Observer<T>> = self.clone();
        match self.version {
            BridgeVersion::V1 => {
                let observable = self.service.materialize_observable(&self.definition)?;
                let subscription = self
                    .service
                    .subscribe_observable(&observable, observer)
                    .map_err(|e| {
                        // Don't leak the materialized observable on a failed
                        // subscribe; a cleanup failure joins the report.
                        match self.service.undefine_observable(&observable) {
                            Ok(()) => e,
                            Err(cleanup) => EngineError::Aggregate(vec![e, cleanup]),
                        }
                    })?;
                let mut core = self.core.lock();
                core.upstream_observable = Some(observable);
                core.upstream_subscription = Some(subscription);
            }
            BridgeVersion::V2 => {
                let subscription = self
                    .service
                    .subscribe_definition(&self.definition, observer)?;
                self.core.lock().upstream_subscription = Some(subscription);
            }
        }
        self.state_changed.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Attach the downstream observer and replay the queue from the
    /// requested sequence id, forwarding any already-pending terminal
    /// notification. The queue is discarded afterwards; its absence marks
    /// the bridge as started.
    pub(crate) fn attach_downstream(&self, downstream: Arc<dyn Observer<T>>, from: SequenceId) {
        let mut core = self.core.lock();
        let queue = core.queue.take();
        core.downstream = Some(downstream.clone());

        if let Some(queue) = queue {
            for (seq, value) in queue {
                if seq >= from {
                    downstream.on_next(value);
                    core.low_watermark = seq.next();
                    self.state_changed.store(true, Ordering::SeqCst);
                }
            }
        }

        if let Some(error) = core.pending_error.take() {
            downstream.on_error(error);
            core.completion_notified = true;
            self.state_changed.store(true, Ordering::SeqCst);
        } else if core.pending_completed {
            core.pending_completed = false;
            downstream.on_completed();
            core.completion_notified = true;
            self.state_changed.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) fn release_downstream(&self) {
        self.core.lock().downstream = None;
    }

    /// Tear down upstream dependencies via the collaborator. Individual
    /// failures are collected and surfaced together after every reachable
    /// resource has been released. Idempotent.
    pub fn try_dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        {
            let mut core = self.core.lock();
            core.queue = None;
            core.downstream = None;
        }

        if let Err(error) = self.teardown_upstream() {
            tracing::warn!(uri = %self.uri, %error, "bridge teardown failures");
            return Err(error);
        }
        Ok(())
    }

    /// Release the recorded upstream subscription and (v1) observable.
    /// Callable after the disposed flag is set, for upstream bindings
    /// created by a start that lost a race with dispose.
    pub(crate) fn teardown_upstream(&self) -> Result<()> {
        let (subscription, observable) = {
            let mut core = self.core.lock();
            (
                core.upstream_subscription.take(),
                core.upstream_observable.take(),
            )
        };

        let mut failures = Vec::new();
        if let Some(subscription) = subscription {
            if let Err(e) = self.service.dispose_subscription(&subscription) {
                failures.push(EngineError::Service(format!(
                    "disposing upstream subscription {}: {}",
                    subscription, e
                )));
            }
        }
        if let Some(observable) = observable {
            if let Err(e) = self.service.undefine_observable(&observable) {
                failures.push(EngineError::Service(format!(
                    "undefining upstream observable {}: {}",
                    observable, e
                )));
            }
        }

        match EngineError::aggregate(failures) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Persist the bridge's fields. A bridge holding a materialized upstream
    /// observable writes the v1 layout so the id survives recovery until
    /// teardown; all other saves are v2.
    pub fn save_state(&self, writer: &mut StateWriter) -> Result<()> {
        let core = self.core.lock();
        let version = if core.upstream_observable.is_some() { 1 } else { 2 };
        let state = BridgeState {
            version,
            upstream_subscription: core.upstream_subscription.clone(),
            upstream_observable: core.upstream_observable.clone(),
            completion_notified: core.completion_notified,
            low_watermark: core.low_watermark,
        };
        writer.write(&state)
    }

    /// Restore from a persisted record (v1 or v2). Runs between context
    /// attachment and start, so the subsequent start replays from the
    /// recovered watermark.
    pub fn load_state(&self, reader: &mut StateReader) -> Result<()> {
        let state: BridgeState = reader.read()?;
        state.validate()?;

        let mut core = self.core.lock();
        core.low_watermark = state.low_watermark;
        core.completion_notified = state.completion_notified;
        core.upstream_subscription = state.upstream_subscription;
        core.upstream_observable = state.upstream_observable;
        Ok(())
    }

    pub fn on_state_saved(&self) {
        self.state_changed.store(false, Ordering::SeqCst);
    }
}

impl<T: Send + 'static> Observer<T> for Bridge<T> {
    fn on_next(&self, value: T) {
        if self.is_disposed() {
            tracing::debug!(uri = %self.uri, "event on disposed bridge, dropping");
            return;
        }
        let mut core = self.core.lock();
        let core = &mut *core;
        if let Some(queue) = core.queue.as_mut() {
            // No bound on the pre-start queue: dropping a delivery would
            // break the watermark contract. A producer far ahead of a
            // downstream that never starts grows this without limit.
            let seq = core.queue_seq;
            core.queue_seq = seq.next();
            queue.push_back((seq, value));
        } else if let Some(downstream) = core.downstream.clone() {
            // Delivery stays under the core lock to keep upstream order
            // exact with respect to replay completion.
            downstream.on_next(value);
            core.low_watermark = core.low_watermark.next();
            self.state_changed.store(true, Ordering::SeqCst);
        }
    }

    fn on_error(&self, error: Arc<EngineError>) {
        if self.is_disposed() {
            return;
        }
        let mut core = self.core.lock();
        if core.completion_notified || core.pending_error.is_some() || core.pending_completed {
            return;
        }
        if core.queue.is_some() {
            core.pending_error = Some(error);
        } else if let Some(downstream) = core.downstream.clone() {
            downstream.on_error(error);
            core.completion_notified = true;
            self.state_changed.store(true, Ordering::SeqCst);
        }
    }

    fn on_completed(&self) {
        if self.is_disposed() {
            return;
        }
        let mut core = self.core.lock();
        if core.completion_notified || core.pending_error.is_some() || core.pending_completed {
            return;
        }
        if core.queue.is_some() {
            core.pending_completed = true;
        } else if let Some(downstream) = core.downstream.clone() {
            downstream.on_completed();
            core.completion_notified = true;
            self.state_changed.store(true, Ordering::SeqCst);
        }
    }
}
