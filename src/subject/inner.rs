//! Sealable multicast subject for dynamically spawned sub-sequences.
//!
//! Higher-order operators (group, window, flatten) create one subject per
//! sub-sequence at runtime. The subject starts with zero observers, holds a
//! single subscriber directly, and only promotes to an array-backed fan-out
//! when a second subscriber arrives. Sealing permanently forbids further
//! subscriptions; once sealed and empty, the subject self-deletes exactly
//! once.

use crate::error::{EngineError, Result};
use crate::subscription::{Subscription, SubscriptionVisitor};
use crate::types::{Observer, Uri};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct Entry<T> {
    token: u64,
    observer: Arc<dyn Observer<T>>,
}

/// Current fan-out shape: none, one held directly, or many.
enum FanOut<T> {
    Empty,
    Single(Entry<T>),
    Many(Vec<Entry<T>>),
}

struct SubjectCore<T> {
    observers: FanOut<T>,
    count: usize,
    next_token: u64,
    sealed: bool,
    /// Seal was requested while reattachments were still outstanding.
    seal_requested: bool,
    /// Subscriptions still expected to reattach during recovery.
    pending_reattach: usize,
    deleted: bool,
}

type DeleteHook = Box<dyn FnOnce(Uri) + Send>;

/// Refcounted, sealable fan-out point for one dynamically created
/// sub-sequence.
pub struct InnerSubject<T> {
    uri: Uri,
    core: Mutex<SubjectCore<T>>,
    activity: Option<Arc<dyn Observer<bool>>>,
    on_deleted: Mutex<Option<DeleteHook>>,
}

impl<T> InnerSubject<T> {
    pub fn new(uri: Uri) -> Arc<Self> {
        Self::with_hooks(uri, 0, None, None)
    }

    /// Subject under recovery: sealing is deferred until `expected_reattach`
    /// subscriptions have reattached, so the subject is not deleted while
    /// subscribers are still being reconnected.
    pub fn recovering(uri: Uri, expected_reattach: usize) -> Arc<Self> {
        Self::with_hooks(uri, expected_reattach, None, None)
    }

    pub(crate) fn with_hooks(
        uri: Uri,
        expected_reattach: usize,
        activity: Option<Arc<dyn Observer<bool>>>,
        on_deleted: Option<DeleteHook>,
    ) -> Arc<Self> {
        Arc::new(InnerSubject {
            uri,
            core: Mutex::new(SubjectCore {
                observers: FanOut::Empty,
                count: 0,
                next_token: 0,
                sealed: false,
                seal_requested: false,
                pending_reattach: expected_reattach,
                deleted: false,
            }),
            activity,
            on_deleted: Mutex::new(on_deleted),
        })
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn subscriber_count(&self) -> usize {
        self.core.lock().count
    }

    pub fn is_sealed(&self) -> bool {
        let core = self.core.lock();
        core.sealed || core.seal_requested
    }

    /// Attach an observer. Fails once the subject has been sealed.
    pub fn subscribe(
        self: &Arc<Self>,
        observer: Arc<dyn Observer<T>>,
    ) -> Result<SubjectSubscription<T>>
    where
        T: Send + Sync + 'static,
    {
        let token = self.attach(observer, false)?;
        if let Some(activity) = &self.activity {
            activity.on_next(true);
        }
        Ok(SubjectSubscription {
            subject: self.clone(),
            token,
            disposed: AtomicBool::new(false),
        })
    }

    /// Reattach an observer during recovery. Counts against the expected
    /// reattachment total and emits no activity event.
    pub fn reattach(
        self: &Arc<Self>,
        observer: Arc<dyn Observer<T>>,
    ) -> Result<SubjectSubscription<T>>
    where
        T: Send + Sync + 'static,
    {
        let token = self.attach(observer, true)?;
        Ok(SubjectSubscription {
            subject: self.clone(),
            token,
            disposed: AtomicBool::new(false),
        })
    }

    fn attach(&self, observer: Arc<dyn Observer<T>>, reattaching: bool) -> Result<u64> {
        let mut core = self.core.lock();
        if core.sealed || (core.seal_requested && !reattaching) {
            return Err(EngineError::Sealed(self.uri.to_string()));
        }

        let token = core.next_token;
        core.next_token += 1;
        let entry = Entry { token, observer };

        core.observers = match std::mem::replace(&mut core.observers, FanOut::Empty) {
            FanOut::Empty => FanOut::Single(entry),
            // Second subscriber promotes to array-backed fan-out.
            FanOut::Single(existing) => FanOut::Many(vec![existing, entry]),
            FanOut::Many(mut entries) => {
                entries.push(entry);
                FanOut::Many(entries)
            }
        };
        core.count += 1;

        if reattaching && core.pending_reattach > 0 {
            core.pending_reattach -= 1;
            if core.pending_reattach == 0 && core.seal_requested {
                core.seal_requested = false;
                core.sealed = true;
            }
        }

        Ok(token)
    }

    /// Permanently forbid further subscriptions. If no subscribers remain,
    /// the subject self-deletes now; otherwise deletion is deferred until
    /// the count reaches zero. During recovery, sealing itself is deferred
    /// until all expected reattachments have arrived.
    pub fn seal(&self) {
        let delete_now = {
            let mut core = self.core.lock();
            if core.pending_reattach > 0 {
                core.seal_requested = true;
                false
            } else {
                core.sealed = true;
                if core.count == 0 && !core.deleted {
                    core.deleted = true;
                    true
                } else {
                    false
                }
            }
        };
        if delete_now {
            self.delete();
        }
    }

    fn unsubscribe(&self, token: u64) {
        let (was_removed, delete_now) = {
            let mut core = self.core.lock();
            let removed = match std::mem::replace(&mut core.observers, FanOut::Empty) {
                FanOut::Empty => {
                    core.observers = FanOut::Empty;
                    false
                }
                FanOut::Single(entry) => {
                    if entry.token == token {
                        true
                    } else {
                        core.observers = FanOut::Single(entry);
                        false
                    }
                }
                FanOut::Many(mut entries) => {
                    let before = entries.len();
                    entries.retain(|e| e.token != token);
                    let removed = entries.len() < before;
                    // Dropping back to one subscriber demotes to direct
                    // holding.
                    core.observers = if entries.len() == 1 {
                        FanOut::Single(entries.pop().expect("one entry remains"))
                    } else {
                        FanOut::Many(entries)
                    };
                    removed
                }
            };
            if !removed {
                (false, false)
            } else {
                core.count -= 1;
                if core.sealed && core.count == 0 && !core.deleted {
                    core.deleted = true;
                    (true, true)
                } else {
                    (true, false)
                }
            }
        };

        if was_removed {
            if let Some(activity) = &self.activity {
                activity.on_next(false);
            }
        }
        if delete_now {
            self.delete();
        }
    }

    fn delete(&self) {
        tracing::debug!(uri = %self.uri, "sealed subject drained, self-deleting");
        if let Some(hook) = self.on_deleted.lock().take() {
            hook(self.uri.clone());
        }
    }
}

impl<T: Clone> Observer<T> for InnerSubject<T> {
    // Delivery happens under the subject's lock so per-event ordering stays
    // consistent with concurrent subscribe/unsubscribe.
    fn on_next(&self, value: T) {
        let core = self.core.lock();
        match &core.observers {
            FanOut::Empty => {}
            FanOut::Single(entry) => entry.observer.on_next(value),
            FanOut::Many(entries) => {
                for entry in entries {
                    entry.observer.on_next(value.clone());
                }
            }
        }
    }

    fn on_error(&self, error: Arc<EngineError>) {
        let core = self.core.lock();
        match &core.observers {
            FanOut::Empty => {}
            FanOut::Single(entry) => entry.observer.on_error(error),
            FanOut::Many(entries) => {
                for entry in entries {
                    entry.observer.on_error(error.clone());
                }
            }
        }
    }

    fn on_completed(&self) {
        let core = self.core.lock();
        match &core.observers {
            FanOut::Empty => {}
            FanOut::Single(entry) => entry.observer.on_completed(),
            FanOut::Many(entries) => {
                for entry in entries {
                    entry.observer.on_completed();
                }
            }
        }
    }
}

/// Handle for one attachment to an [`InnerSubject`]. Disposal detaches the
/// observer; once a sealed subject loses its last attachment, the subject
/// self-deletes.
pub struct SubjectSubscription<T> {
    subject: Arc<InnerSubject<T>>,
    token: u64,
    disposed: AtomicBool,
}

impl<T: Send + Sync + 'static> Subscription for SubjectSubscription<T> {
    fn accept(&self, _visitor: &mut dyn SubscriptionVisitor) {}

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.subject.unsubscribe(self.token);
        }
    }
}
