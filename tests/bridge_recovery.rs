//! Bridge recovery scenarios driven through the public lifecycle passes:
//! checkpoint, crash, rebuild, resume.

use parking_lot::Mutex;
use rivulet::{
    Bridge, BridgeState, EngineError, InitializeVisitor, ObservableDefinition, Observer,
    OperatorContext, ReactiveService, RefCountSubject, Result, Scheduler, SequenceId, StateReader,
    StateVisitor, StateWriter, Subscription, Uri,
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Service stand-in shared across "process restarts": it survives the
/// bridges that connect through it and lets tests push events upstream.
struct HostService {
    next_id: AtomicU64,
    upstream: Mutex<Option<Arc<dyn Observer<i64>>>>,
    disposed: Mutex<Vec<Uri>>,
    undefined: Mutex<Vec<Uri>>,
}

impl HostService {
    fn new() -> Arc<Self> {
        Arc::new(HostService {
            next_id: AtomicU64::new(1),
            upstream: Mutex::new(None),
            disposed: Mutex::new(Vec::new()),
            undefined: Mutex::new(Vec::new()),
        })
    }

    fn fresh_uri(&self, kind: &str) -> Uri {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Uri::new(format!("rv://{}/{}", kind, id))
    }

    fn push(&self, value: i64) {
        if let Some(observer) = self.upstream.lock().clone() {
            observer.on_next(value);
        }
    }
}

impl ReactiveService<i64> for HostService {
    fn materialize_observable(&self, _definition: &ObservableDefinition) -> Result<Uri> {
        Ok(self.fresh_uri("observable"))
    }

    fn subscribe_observable(
        &self,
        _observable: &Uri,
        observer: Arc<dyn Observer<i64>>,
    ) -> Result<Uri> {
        *self.upstream.lock() = Some(observer);
        Ok(self.fresh_uri("subscription"))
    }

    fn subscribe_definition(
        &self,
        _definition: &ObservableDefinition,
        observer: Arc<dyn Observer<i64>>,
    ) -> Result<Uri> {
        *self.upstream.lock() = Some(observer);
        Ok(self.fresh_uri("subscription"))
    }

    fn observer(&self, uri: &Uri) -> Result<Arc<dyn Observer<i64>>> {
        Err(EngineError::Service(format!("unknown observer {}", uri)))
    }

    fn dispose_subscription(&self, uri: &Uri) -> Result<()> {
        self.disposed.lock().push(uri.clone());
        Ok(())
    }

    fn undefine_observable(&self, uri: &Uri) -> Result<()> {
        self.undefined.lock().push(uri.clone());
        Ok(())
    }
}

struct Collecting {
    values: Mutex<Vec<i64>>,
    completions: AtomicUsize,
}

impl Collecting {
    fn new() -> Arc<Self> {
        Arc::new(Collecting {
            values: Mutex::new(Vec::new()),
            completions: AtomicUsize::new(0),
        })
    }
}

impl Observer<i64> for Collecting {
    fn on_next(&self, value: i64) {
        self.values.lock().push(value);
    }
    fn on_error(&self, _error: Arc<EngineError>) {}
    fn on_completed(&self) {
        self.completions.fetch_add(1, Ordering::SeqCst);
    }
}

fn context() -> OperatorContext {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    OperatorContext::new(Uri::new("rv://instance/recovery"), Scheduler::new())
}

fn bridge_for(service: &Arc<HostService>) -> Arc<Bridge<i64>> {
    Bridge::new(
        Uri::new("rv://bridge/recovery"),
        ObservableDefinition::new(b"upstream-query".to_vec()),
        service.clone() as Arc<dyn ReactiveService<i64>>,
    )
}

#[test]
fn test_full_cycle_checkpoint_and_resume() {
    let service = HostService::new();

    // First epoch: producer runs ahead of the downstream, the downstream
    // starts and drains the queue, then a checkpoint commits watermark 3.
    let blob = {
        let bridge = bridge_for(&service);
        bridge.on_next(1);
        bridge.on_next(2);

        let downstream = Collecting::new();
        let subscription = bridge.subscribe(downstream.clone()).unwrap();
        InitializeVisitor::initialize(subscription.as_ref(), &context()).unwrap();

        service.push(3);
        assert_eq!(*downstream.values.lock(), vec![1, 2, 3]);
        assert!(StateVisitor::has_state_changed(subscription.as_ref()));

        let mut writer = StateWriter::new();
        StateVisitor::save_state(subscription.as_ref(), &mut writer).unwrap();
        StateVisitor::on_state_saved(subscription.as_ref());
        assert!(!StateVisitor::has_state_changed(subscription.as_ref()));
        writer.into_bytes()
    };

    // Second epoch: a fresh bridge over the same service recovers the
    // checkpoint. The producer replays from the beginning, as a reliable
    // upstream would after a crash.
    let bridge = bridge_for(&service);
    bridge.on_next(1);
    bridge.on_next(2);
    bridge.on_next(3);
    bridge.on_next(4);

    let downstream = Collecting::new();
    let subscription = bridge.subscribe(downstream.clone()).unwrap();
    let mut reader = StateReader::new(blob).unwrap();
    InitializeVisitor::initialize_with_state(subscription.as_ref(), &context(), &mut reader)
        .unwrap();

    // Ids 0..2 fall below the recovered watermark; only the fourth event
    // reaches the downstream.
    assert_eq!(*downstream.values.lock(), vec![4]);
    assert_eq!(bridge.low_watermark(), SequenceId(4));
}

#[test]
fn test_v1_checkpoint_keeps_observable_until_teardown() {
    let service = HostService::new();

    // A checkpoint produced by a v1-era bridge carries the materialized
    // observable's identity.
    let mut writer = StateWriter::new();
    writer
        .write(&BridgeState {
            version: 1,
            upstream_subscription: Some(Uri::new("rv://subscription/old")),
            upstream_observable: Some(Uri::new("rv://observable/old")),
            completion_notified: false,
            low_watermark: SequenceId(5),
        })
        .unwrap();

    let bridge = bridge_for(&service);
    let mut reader = StateReader::new(writer.into_bytes()).unwrap();
    bridge.load_state(&mut reader).unwrap();
    assert_eq!(bridge.low_watermark(), SequenceId(5));

    // A resave keeps the v1 layout while the observable is held, so the
    // id survives any number of save/recover cycles.
    let mut rewrite = StateWriter::new();
    bridge.save_state(&mut rewrite).unwrap();
    let mut reread = StateReader::new(rewrite.into_bytes()).unwrap();
    let state: BridgeState = reread.read().unwrap();
    assert_eq!(state.version, 1);
    assert_eq!(
        state.upstream_observable,
        Some(Uri::new("rv://observable/old"))
    );
    assert_eq!(state.low_watermark, SequenceId(5));

    // The recovered observable is released at teardown; a save past that
    // point has nothing v1 left to carry.
    bridge.try_dispose().unwrap();
    assert_eq!(
        *service.undefined.lock(),
        vec![Uri::new("rv://observable/old")]
    );
    let mut after = StateWriter::new();
    bridge.save_state(&mut after).unwrap();
    let mut reread = StateReader::new(after.into_bytes()).unwrap();
    let state: BridgeState = reread.read().unwrap();
    assert_eq!(state.version, 2);
    assert!(state.upstream_observable.is_none());
}

#[test]
fn test_completion_survives_checkpoint() {
    let service = HostService::new();

    let blob = {
        let bridge = bridge_for(&service);
        bridge.on_next(1);
        bridge.on_completed();

        let downstream = Collecting::new();
        let subscription = bridge.subscribe(downstream.clone()).unwrap();
        InitializeVisitor::initialize(subscription.as_ref(), &context()).unwrap();
        assert_eq!(downstream.completions.load(Ordering::SeqCst), 1);

        let mut writer = StateWriter::new();
        StateVisitor::save_state(subscription.as_ref(), &mut writer).unwrap();
        writer.into_bytes()
    };

    let bridge = bridge_for(&service);
    let mut reader = StateReader::new(blob).unwrap();
    bridge.load_state(&mut reader).unwrap();

    // The terminal notification was already delivered in the previous
    // epoch; it is not repeated after recovery.
    let downstream = Collecting::new();
    let subscription = bridge.subscribe(downstream.clone()).unwrap();
    subscription.start().unwrap();
    service.push(2);

    assert_eq!(downstream.completions.load(Ordering::SeqCst), 0);
    assert_eq!(*downstream.values.lock(), vec![2]);
}

#[test]
fn test_bridge_feeding_recovered_subject() {
    struct NullLog;
    impl Observer<bool> for NullLog {
        fn on_next(&self, _value: bool) {}
        fn on_error(&self, _error: Arc<EngineError>) {}
        fn on_completed(&self) {}
    }
    impl Observer<Uri> for NullLog {
        fn on_next(&self, _value: Uri) {}
        fn on_error(&self, _error: Arc<EngineError>) {}
        fn on_completed(&self) {}
    }

    let service = HostService::new();
    let bridge = bridge_for(&service);

    // A group-by output recovered with one consumer expected back.
    let subject = Arc::new(RefCountSubject::<i64>::with_expected_reattach(
        Uri::new("rv://group/recovered"),
        1,
        Arc::new(NullLog),
        Arc::new(NullLog),
    ));

    let consumer = Collecting::new();
    let attachment = subject.reattach(consumer.clone()).unwrap();

    let subscription = bridge.subscribe(subject.clone()).unwrap();
    InitializeVisitor::initialize(subscription.as_ref(), &context()).unwrap();

    service.push(10);
    service.push(11);
    assert_eq!(*consumer.values.lock(), vec![10, 11]);

    // Sealing after the reattachment arrives takes effect immediately.
    subject.seal();
    assert!(subject.subscribe(Collecting::new()).is_err());
    attachment.dispose();
    assert_eq!(subject.subscriber_count(), 0);
}
