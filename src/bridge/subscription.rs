//! The bridge's downstream subscription and its start/dispose state machine.

use crate::bridge::Bridge;
use crate::checkpoint::{StateReader, StateWriter};
use crate::error::{EngineError, Result};
use crate::subscription::{OperatorNode, Subscription, SubscriptionVisitor};
use crate::types::Observer;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

// State machine: Created -> Starting -> {Started | StartFailed};
// DisposeRequested is reachable from Starting (the starting thread finishes
// the dispose); Disposed is terminal and reachable from every non-terminal
// state. All transitions are CAS; no blocking lock.
const CREATED: u8 = 0;
const STARTING: u8 = 1;
const STARTED: u8 = 2;
const START_FAILED: u8 = 3;
const DISPOSE_REQUESTED: u8 = 4;
const DISPOSED: u8 = 5;

/// Spin iterations before falling back to yielding the thread.
const SPIN_LIMIT: u32 = 64;

/// The single volatile downstream subscription of a [`Bridge`].
///
/// One instance exists per downstream subscription object; the bridge's
/// construction-time claim guarantees at most one at a time.
pub struct BridgeSubscription<T> {
    bridge: Arc<Bridge<T>>,
    downstream: Arc<dyn Observer<T>>,
    state: AtomicU8,
}

impl<T: Send + 'static> BridgeSubscription<T> {
    pub(crate) fn new(bridge: Arc<Bridge<T>>, downstream: Arc<dyn Observer<T>>) -> Arc<Self> {
        Arc::new(BridgeSubscription {
            bridge,
            downstream,
            state: AtomicU8::new(CREATED),
        })
    }

    pub fn is_started(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STARTED
    }

    /// Execute the start protocol at most once.
    ///
    /// The winner of the Created->Starting transition binds the upstream,
    /// replays the queue, and forwards pending terminal notifications. A
    /// concurrent caller busy-waits until the in-flight start resolves and
    /// returns without repeating the work. The wait assumes the in-flight
    /// start completes in bounded time; a start side effect that re-enters
    /// `start` on this same subscription would spin against itself.
    pub fn start(&self) -> Result<()> {
        if let Err(observed) =
            self.state
                .compare_exchange(CREATED, STARTING, Ordering::SeqCst, Ordering::SeqCst)
        {
            return self.await_concurrent_start(observed);
        }

        let result = self.do_start();
        match &result {
            Ok(()) => self.resolve_starting(STARTED),
            Err(_) => self.resolve_starting(START_FAILED),
        }
        result
    }

    fn do_start(&self) -> Result<()> {
        if self.bridge.is_disposed() {
            return Err(EngineError::BridgeDisposed(self.bridge.uri().to_string()));
        }
        tracing::debug!(uri = %self.bridge.uri(), "starting bridge subscription");
        // Subscribe upstream first: anything it emits from here lands in
        // the replay queue and is drained in order below.
        self.bridge.connect_upstream()?;
        if self.bridge.is_disposed() {
            // Dispose won the race and its teardown already ran; the
            // binding created above is released on this path instead.
            if let Err(error) = self.bridge.teardown_upstream() {
                tracing::warn!(
                    uri = %self.bridge.uri(), %error,
                    "releasing upstream after disposed start failed"
                );
            }
            return Err(EngineError::BridgeDisposed(self.bridge.uri().to_string()));
        }
        let from = self.bridge.low_watermark();
        self.bridge.attach_downstream(self.downstream.clone(), from);
        Ok(())
    }

    /// Leave the Starting state. If a dispose arrived while starting, the
    /// deferred teardown runs here, on the starting thread.
    fn resolve_starting(&self, next: u8) {
        if self
            .state
            .compare_exchange(STARTING, next, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.state.store(DISPOSED, Ordering::SeqCst);
            self.bridge.release_downstream();
            if let Err(error) = self.bridge.try_dispose() {
                tracing::warn!(uri = %self.bridge.uri(), %error, "deferred dispose failed");
            }
        }
    }

    fn await_concurrent_start(&self, mut observed: u8) -> Result<()> {
        let mut spins = 0u32;
        while observed == STARTING || observed == DISPOSE_REQUESTED {
            if spins < SPIN_LIMIT {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
            spins = spins.saturating_add(1);
            observed = self.state.load(Ordering::SeqCst);
        }
        match observed {
            STARTED => Ok(()),
            START_FAILED => Err(EngineError::StartFailed(format!(
                "concurrent start of {} failed",
                self.bridge.uri()
            ))),
            _ => Err(EngineError::BridgeDisposed(self.bridge.uri().to_string())),
        }
    }
}

impl<T: Send + 'static> Subscription for BridgeSubscription<T> {
    fn accept(&self, visitor: &mut dyn SubscriptionVisitor) {
        visitor.visit_node(self);
    }

    fn dispose(&self) {
        loop {
            let current = self.state.load(Ordering::SeqCst);
            match current {
                DISPOSED | DISPOSE_REQUESTED => return,
                STARTING => {
                    // Defer to the starting thread; it completes the dispose
                    // once starting resolves.
                    if self
                        .state
                        .compare_exchange(
                            STARTING,
                            DISPOSE_REQUESTED,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                        .is_ok()
                    {
                        return;
                    }
                }
                _ => {
                    if self
                        .state
                        .compare_exchange(current, DISPOSED, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        self.bridge.release_downstream();
                        if let Err(error) = self.bridge.try_dispose() {
                            tracing::warn!(
                                uri = %self.bridge.uri(), %error,
                                "bridge dispose reported failures"
                            );
                        }
                        return;
                    }
                }
            }
        }
    }
}

impl<T: Send + 'static> OperatorNode for BridgeSubscription<T> {
    fn inputs(&self) -> Vec<Arc<dyn Subscription>> {
        vec![]
    }

    fn start_core(&self) -> Result<()> {
        self.start()
    }

    fn has_state(&self) -> bool {
        true
    }

    fn state_changed(&self) -> bool {
        self.bridge.state_changed()
    }

    fn save_state(&self, writer: &mut StateWriter) -> Result<()> {
        self.bridge.save_state(writer)
    }

    fn load_state(&self, reader: &mut StateReader) -> Result<()> {
        self.bridge.load_state(reader)
    }

    fn on_state_saved(&self) {
        self.bridge.on_state_saved();
    }
}
