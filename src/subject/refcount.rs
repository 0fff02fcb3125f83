//! Reference-counted sealable subject with side-channel notifications.
//!
//! A subject shared by multiple downstream consumers (group-by/window
//! outputs) needs its consumers counted across process boundaries: the
//! activity stream carries one boolean per attach (`true`) and release
//! (`false`), and the collector receives the subject's identity exactly once
//! when it self-deletes, letting the owning operator reclaim it.

use crate::error::Result;
use crate::subject::inner::{InnerSubject, SubjectSubscription};
use crate::types::{Observer, Uri};
use std::sync::Arc;

/// Sealable multicast subject that reports attach/release activity and its
/// own deletion.
pub struct RefCountSubject<T> {
    subject: Arc<InnerSubject<T>>,
}

impl<T> RefCountSubject<T> {
    /// `activity` receives one `true` per subscribe and one `false` per
    /// unsubscribe (reattachments during recovery are silent). `collector`
    /// receives the subject's URI once, when the sealed subject loses its
    /// last subscriber.
    pub fn new(
        uri: Uri,
        activity: Arc<dyn Observer<bool>>,
        collector: Arc<dyn Observer<Uri>>,
    ) -> Self {
        Self::with_expected_reattach(uri, 0, activity, collector)
    }

    /// Recovery constructor: sealing is deferred until `expected_reattach`
    /// subscriptions have reattached.
    pub fn with_expected_reattach(
        uri: Uri,
        expected_reattach: usize,
        activity: Arc<dyn Observer<bool>>,
        collector: Arc<dyn Observer<Uri>>,
    ) -> Self {
        let subject = InnerSubject::with_hooks(
            uri,
            expected_reattach,
            Some(activity),
            Some(Box::new(move |uri| {
                collector.on_next(uri);
                collector.on_completed();
            })),
        );
        RefCountSubject { subject }
    }

    pub fn uri(&self) -> &Uri {
        self.subject.uri()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subject.subscriber_count()
    }

    pub fn is_sealed(&self) -> bool {
        self.subject.is_sealed()
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Result<SubjectSubscription<T>>
    where
        T: Send + Sync + 'static,
    {
        self.subject.subscribe(observer)
    }

    pub fn reattach(&self, observer: Arc<dyn Observer<T>>) -> Result<SubjectSubscription<T>>
    where
        T: Send + Sync + 'static,
    {
        self.subject.reattach(observer)
    }

    pub fn seal(&self) {
        self.subject.seal();
    }
}

impl<T: Clone> Observer<T> for RefCountSubject<T> {
    fn on_next(&self, value: T) {
        self.subject.on_next(value);
    }

    fn on_error(&self, error: Arc<crate::error::EngineError>) {
        self.subject.on_error(error);
    }

    fn on_completed(&self) {
        self.subject.on_completed();
    }
}
