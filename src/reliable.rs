//! Reliable-to-volatile input adapters.
//!
//! A reliable source delivers sequenced events and retains them until they
//! are acknowledged. The adapters here convert that into the ordinary push
//! model used inside the engine: values are forwarded without their ids,
//! the last seen id is tracked as the volatile high watermark, and the
//! checkpoint watermark is committed/acknowledged through the state
//! management passes. Upstream truncation is driven entirely by those
//! acknowledgments.

use crate::checkpoint::{StateReader, StateWriter};
use crate::error::{EngineError, Result};
use crate::scheduler::Scheduler;
use crate::subscription::{OperatorNode, Subscription, SubscriptionVisitor};
use crate::types::{Observer, SequenceId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Consumer of a sequenced event stream.
pub trait ReliableObserver<T>: Send + Sync {
    /// Deliver the value carrying `sequence`. Ids are strictly
    /// non-decreasing from a well-behaved source.
    fn on_next(&self, value: T, sequence: SequenceId);

    fn on_error(&self, error: Arc<EngineError>);

    fn on_completed(&self);
}

/// A sequenced, acknowledgeable source.
pub trait ReliableObservable<T>: Send + Sync {
    fn subscribe(&self, observer: Arc<dyn ReliableObserver<T>>) -> Arc<dyn ReliableSubscription>;
}

/// Handle to a reliable source subscription.
pub trait ReliableSubscription: Send + Sync {
    /// Begin (re)delivery from `from`.
    fn start(&self, from: SequenceId);

    /// Confirm every id up to and including `up_to` as durably
    /// checkpointed, permitting upstream retention/truncation.
    fn acknowledge(&self, up_to: SequenceId);

    fn dispose(&self);
}

struct Watermarks {
    /// Last sequence id seen. Volatile.
    high: Option<SequenceId>,
    /// Last sequence id committed to a checkpoint. Never ahead of `high`.
    checkpoint: Option<SequenceId>,
}

/// Direct adapter: events are processed on whatever thread the source
/// calls on.
pub struct ReliableInput<T> {
    source: Arc<dyn ReliableObservable<T>>,
    downstream: Arc<dyn Observer<T>>,
    subscription: Mutex<Option<Arc<dyn ReliableSubscription>>>,
    watermarks: Mutex<Watermarks>,
    changed: AtomicBool,
    disposed: AtomicBool,
    weak_self: Weak<ReliableInput<T>>,
}

impl<T: Send + Sync + 'static> ReliableInput<T> {
    pub fn new(
        source: Arc<dyn ReliableObservable<T>>,
        downstream: Arc<dyn Observer<T>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| ReliableInput {
            source,
            downstream,
            subscription: Mutex::new(None),
            watermarks: Mutex::new(Watermarks {
                high: None,
                checkpoint: None,
            }),
            changed: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        })
    }

    /// Last sequence id seen from the source.
    pub fn high_watermark(&self) -> Option<SequenceId> {
        self.watermarks.lock().high
    }

    /// Last sequence id committed to a checkpoint.
    pub fn checkpoint_watermark(&self) -> Option<SequenceId> {
        self.watermarks.lock().checkpoint
    }

    /// Subscribe `observer` to the source on this adapter's behalf. Used by
    /// the scheduled variant to interpose its own delivery context.
    fn bind(&self, observer: Arc<dyn ReliableObserver<T>>) -> Result<()> {
        let subscription = self.source.subscribe(observer);
        *self.subscription.lock() = Some(subscription);
        Ok(())
    }

    fn start_from_checkpoint(&self) -> Result<()> {
        let from = self
            .checkpoint_watermark()
            .map(SequenceId::next)
            .unwrap_or(SequenceId::ZERO);
        match self.subscription.lock().as_ref() {
            Some(subscription) => {
                subscription.start(from);
                Ok(())
            }
            None => Err(EngineError::StartFailed(
                "reliable input started before subscribe".into(),
            )),
        }
    }

    pub(crate) fn deliver(&self, value: T, sequence: SequenceId) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        self.downstream.on_next(value);
        self.watermarks.lock().high = Some(sequence);
        self.changed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn deliver_error(&self, error: Arc<EngineError>) {
        if !self.disposed.load(Ordering::SeqCst) {
            self.downstream.on_error(error);
        }
    }

    pub(crate) fn deliver_completed(&self) {
        if !self.disposed.load(Ordering::SeqCst) {
            self.downstream.on_completed();
        }
    }
}

impl<T: Send + Sync + 'static> ReliableObserver<T> for ReliableInput<T> {
    fn on_next(&self, value: T, sequence: SequenceId) {
        self.deliver(value, sequence);
    }

    fn on_error(&self, error: Arc<EngineError>) {
        self.deliver_error(error);
    }

    fn on_completed(&self) {
        self.deliver_completed();
    }
}

impl<T: Send + Sync + 'static> Subscription for ReliableInput<T> {
    fn accept(&self, visitor: &mut dyn SubscriptionVisitor) {
        visitor.visit_node(self);
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            if let Some(subscription) = self.subscription.lock().take() {
                subscription.dispose();
            }
        }
    }
}

impl<T: Send + Sync + 'static> OperatorNode for ReliableInput<T> {
    fn inputs(&self) -> Vec<Arc<dyn Subscription>> {
        vec![]
    }

    fn subscribe_core(&self) -> Result<()> {
        let this = self
            .weak_self
            .upgrade()
            .ok_or_else(|| EngineError::StartFailed("adapter already dropped".into()))?;
        self.bind(this)
    }

    fn start_core(&self) -> Result<()> {
        self.start_from_checkpoint()
    }

    fn has_state(&self) -> bool {
        true
    }

    fn state_changed(&self) -> bool {
        self.changed.load(Ordering::SeqCst)
    }

    /// Commit the checkpoint watermark to the current high watermark. The
    /// acknowledgment is deferred to `on_state_saved`, once the checkpoint
    /// is durable.
    fn save_state(&self, writer: &mut StateWriter) -> Result<()> {
        let mut watermarks = self.watermarks.lock();
        watermarks.checkpoint = watermarks.high;
        writer.write(&watermarks.checkpoint)
    }

    fn load_state(&self, reader: &mut StateReader) -> Result<()> {
        let checkpoint: Option<SequenceId> = reader.read()?;
        let mut watermarks = self.watermarks.lock();
        watermarks.checkpoint = checkpoint;
        watermarks.high = checkpoint;
        Ok(())
    }

    fn on_state_saved(&self) {
        let committed = self.checkpoint_watermark();
        if let Some(up_to) = committed {
            if let Some(subscription) = self.subscription.lock().as_ref() {
                subscription.acknowledge(up_to);
            }
        }
        self.changed.store(false, Ordering::SeqCst);
    }
}

/// Context-switched adapter: identical protocol, but every event is
/// redispatched onto the engine's scheduling boundary before forwarding.
pub struct ScheduledReliableInput<T> {
    inner: Arc<ReliableInput<T>>,
    scheduler: Scheduler,
    weak_self: Weak<ScheduledReliableInput<T>>,
}

impl<T: Send + Sync + 'static> ScheduledReliableInput<T> {
    pub fn new(
        source: Arc<dyn ReliableObservable<T>>,
        downstream: Arc<dyn Observer<T>>,
        scheduler: Scheduler,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| ScheduledReliableInput {
            inner: ReliableInput::new(source, downstream),
            scheduler,
            weak_self: weak_self.clone(),
        })
    }

    pub fn high_watermark(&self) -> Option<SequenceId> {
        self.inner.high_watermark()
    }

    pub fn checkpoint_watermark(&self) -> Option<SequenceId> {
        self.inner.checkpoint_watermark()
    }
}

impl<T: Send + Sync + 'static> ReliableObserver<T> for ScheduledReliableInput<T> {
    fn on_next(&self, value: T, sequence: SequenceId) {
        let inner = self.inner.clone();
        self.scheduler
            .schedule(move || inner.deliver(value, sequence));
    }

    fn on_error(&self, error: Arc<EngineError>) {
        let inner = self.inner.clone();
        self.scheduler.schedule(move || inner.deliver_error(error));
    }

    fn on_completed(&self) {
        let inner = self.inner.clone();
        self.scheduler.schedule(move || inner.deliver_completed());
    }
}

impl<T: Send + Sync + 'static> Subscription for ScheduledReliableInput<T> {
    fn accept(&self, visitor: &mut dyn SubscriptionVisitor) {
        visitor.visit_node(self);
    }

    fn dispose(&self) {
        self.inner.dispose();
    }
}

impl<T: Send + Sync + 'static> OperatorNode for ScheduledReliableInput<T> {
    fn inputs(&self) -> Vec<Arc<dyn Subscription>> {
        vec![]
    }

    fn subscribe_core(&self) -> Result<()> {
        let this = self
            .weak_self
            .upgrade()
            .ok_or_else(|| EngineError::StartFailed("adapter already dropped".into()))?;
        self.inner.bind(this)
    }

    fn start_core(&self) -> Result<()> {
        self.inner.start_from_checkpoint()
    }

    fn has_state(&self) -> bool {
        true
    }

    fn state_changed(&self) -> bool {
        self.inner.state_changed()
    }

    fn save_state(&self, writer: &mut StateWriter) -> Result<()> {
        self.inner.save_state(writer)
    }

    fn load_state(&self, reader: &mut StateReader) -> Result<()> {
        self.inner.load_state(reader)
    }

    fn on_state_saved(&self) {
        self.inner.on_state_saved();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    struct TestSource {
        observer: PlMutex<Option<Arc<dyn ReliableObserver<i64>>>>,
        starts: PlMutex<Vec<SequenceId>>,
        acks: PlMutex<Vec<SequenceId>>,
        disposals: AtomicBool,
    }

    impl TestSource {
        fn new() -> Arc<Self> {
            Arc::new(TestSource {
                observer: PlMutex::new(None),
                starts: PlMutex::new(Vec::new()),
                acks: PlMutex::new(Vec::new()),
                disposals: AtomicBool::new(false),
            })
        }

        fn emit(&self, value: i64, sequence: SequenceId) {
            let observer = self.observer.lock().clone().expect("subscribed");
            observer.on_next(value, sequence);
        }
    }

    struct TestSourceSubscription {
        source: Arc<TestSource>,
    }

    impl ReliableSubscription for TestSourceSubscription {
        fn start(&self, from: SequenceId) {
            self.source.starts.lock().push(from);
        }

        fn acknowledge(&self, up_to: SequenceId) {
            self.source.acks.lock().push(up_to);
        }

        fn dispose(&self) {
            self.source.disposals.store(true, Ordering::SeqCst);
        }
    }

    /// Trait-object front for the source; keeps the `Arc` needed by the
    /// subscription handle.
    struct SourceHandle(Arc<TestSource>);

    impl ReliableObservable<i64> for SourceHandle {
        fn subscribe(
            &self,
            observer: Arc<dyn ReliableObserver<i64>>,
        ) -> Arc<dyn ReliableSubscription> {
            *self.0.observer.lock() = Some(observer);
            Arc::new(TestSourceSubscription {
                source: self.0.clone(),
            })
        }
    }

    struct Collecting {
        values: PlMutex<Vec<i64>>,
    }

    impl Collecting {
        fn new() -> Arc<Self> {
            Arc::new(Collecting {
                values: PlMutex::new(Vec::new()),
            })
        }
    }

    impl Observer<i64> for Collecting {
        fn on_next(&self, value: i64) {
            self.values.lock().push(value);
        }
        fn on_error(&self, _error: Arc<EngineError>) {}
        fn on_completed(&self) {}
    }

    fn direct_input(
        source: &Arc<TestSource>,
        downstream: &Arc<Collecting>,
    ) -> Arc<ReliableInput<i64>> {
        ReliableInput::new(
            Arc::new(SourceHandle(source.clone())) as Arc<dyn ReliableObservable<i64>>,
            downstream.clone(),
        )
    }

    #[test]
    fn test_fresh_start_from_zero() {
        let source = TestSource::new();
        let downstream = Collecting::new();
        let input = direct_input(&source, &downstream);

        input.subscribe_core().unwrap();
        input.start_core().unwrap();

        assert_eq!(*source.starts.lock(), vec![SequenceId::ZERO]);
    }

    #[test]
    fn test_start_before_subscribe_fails() {
        let source = TestSource::new();
        let downstream = Collecting::new();
        let input = direct_input(&source, &downstream);

        assert!(matches!(
            input.start_core(),
            Err(EngineError::StartFailed(_))
        ));
    }

    #[test]
    fn test_delivery_advances_high_watermark() {
        let source = TestSource::new();
        let downstream = Collecting::new();
        let input = direct_input(&source, &downstream);

        input.subscribe_core().unwrap();
        input.start_core().unwrap();

        source.emit(10, SequenceId(0));
        source.emit(11, SequenceId(1));

        assert_eq!(*downstream.values.lock(), vec![10, 11]);
        assert_eq!(input.high_watermark(), Some(SequenceId(1)));
        assert_eq!(input.checkpoint_watermark(), None);
        assert!(input.state_changed());
    }

    #[test]
    fn test_save_commits_and_saved_acknowledges() {
        let source = TestSource::new();
        let downstream = Collecting::new();
        let input = direct_input(&source, &downstream);

        input.subscribe_core().unwrap();
        input.start_core().unwrap();
        source.emit(10, SequenceId(0));
        source.emit(11, SequenceId(1));

        let mut writer = StateWriter::new();
        input.save_state(&mut writer).unwrap();
        assert_eq!(input.checkpoint_watermark(), Some(SequenceId(1)));

        // No acknowledgment until the checkpoint is reported durable.
        assert!(source.acks.lock().is_empty());
        input.on_state_saved();
        assert_eq!(*source.acks.lock(), vec![SequenceId(1)]);
        assert!(!input.state_changed());
    }

    #[test]
    fn test_recovery_starts_past_checkpoint() {
        let source = TestSource::new();
        let downstream = Collecting::new();

        let mut writer = StateWriter::new();
        writer.write(&Some(SequenceId(4))).unwrap();

        let input = direct_input(&source, &downstream);
        input.subscribe_core().unwrap();
        let mut reader = StateReader::new(writer.into_bytes()).unwrap();
        input.load_state(&mut reader).unwrap();
        input.start_core().unwrap();

        assert_eq!(*source.starts.lock(), vec![SequenceId(5)]);
        // The recovered high watermark matches the checkpoint.
        assert_eq!(input.high_watermark(), Some(SequenceId(4)));
    }

    #[test]
    fn test_dispose_releases_source() {
        let source = TestSource::new();
        let downstream = Collecting::new();
        let input = direct_input(&source, &downstream);

        input.subscribe_core().unwrap();
        input.dispose();
        assert!(source.disposals.load(Ordering::SeqCst));

        // Events after disposal are not forwarded.
        source.emit(1, SequenceId(0));
        assert!(downstream.values.lock().is_empty());
    }

    #[test]
    fn test_scheduled_variant_preserves_order() {
        let source = TestSource::new();
        let downstream = Collecting::new();
        let scheduler = Scheduler::new();
        let input = ScheduledReliableInput::new(
            Arc::new(SourceHandle(source.clone())) as Arc<dyn ReliableObservable<i64>>,
            downstream.clone(),
            scheduler.clone(),
        );

        input.subscribe_core().unwrap();
        input.start_core().unwrap();

        for i in 0..50 {
            source.emit(i, SequenceId(i as u64));
        }
        scheduler.flush();

        assert_eq!(*downstream.values.lock(), (0..50).collect::<Vec<_>>());
        assert_eq!(input.high_watermark(), Some(SequenceId(49)));
    }
}
