//! Future-binding subscription holders.
//!
//! Used when a child subscription is only known after its parent operator is
//! constructed: the holder takes the child's place in the tree and binds it
//! later. As everywhere else, child disposal happens outside the holder's
//! lock.

use crate::error::{EngineError, Result};
use crate::subscription::node::{Subscription, SubscriptionVisitor};
use parking_lot::Mutex;
use std::sync::Arc;

struct SerialInner {
    current: Option<Arc<dyn Subscription>>,
    disposed: bool,
}

/// Reassignable holder: at most one active child at a time; assigning a new
/// child disposes the previous one.
pub struct SerialSubscription {
    inner: Mutex<SerialInner>,
}

impl SerialSubscription {
    pub fn new() -> Self {
        SerialSubscription {
            inner: Mutex::new(SerialInner {
                current: None,
                disposed: false,
            }),
        }
    }

    /// Bind a child, disposing the previously bound one. A child assigned
    /// after the holder itself was disposed is disposed immediately.
    pub fn set(&self, subscription: Arc<dyn Subscription>) {
        let to_dispose = {
            let mut inner = self.inner.lock();
            if inner.disposed {
                Some(subscription)
            } else {
                inner.current.replace(subscription)
            }
        };
        if let Some(previous) = to_dispose {
            previous.dispose();
        }
    }

    /// The currently bound child, if any.
    pub fn get(&self) -> Option<Arc<dyn Subscription>> {
        self.inner.lock().current.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }
}

impl Default for SerialSubscription {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscription for SerialSubscription {
    fn accept(&self, visitor: &mut dyn SubscriptionVisitor) {
        if let Some(current) = self.get() {
            current.accept(visitor);
        }
    }

    fn dispose(&self) {
        let child = {
            let mut inner = self.inner.lock();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            inner.current.take()
        };
        if let Some(child) = child {
            child.dispose();
        }
    }
}

/// Slot state for the single-assignment holder. An explicit three-state
/// enum distinguishes "never assigned" from "disposed": the disposed state
/// remembers the child it disposed so a late `accept` still reaches it.
enum Slot {
    Unset,
    Bound(Arc<dyn Subscription>),
    Disposed(Option<Arc<dyn Subscription>>),
}

/// Holder accepting exactly one real assignment over its lifetime.
pub struct SingleAssignmentSubscription {
    slot: Mutex<Slot>,
}

impl SingleAssignmentSubscription {
    pub fn new() -> Self {
        SingleAssignmentSubscription {
            slot: Mutex::new(Slot::Unset),
        }
    }

    /// Bind the child. A second assignment while the first is still the
    /// active value is a protocol violation and disposes neither value.
    /// Assignment after the holder was disposed disposes the child
    /// immediately and succeeds.
    pub fn set(&self, subscription: Arc<dyn Subscription>) -> Result<()> {
        let to_dispose = {
            let mut slot = self.slot.lock();
            match &*slot {
                Slot::Unset => {
                    *slot = Slot::Bound(subscription);
                    None
                }
                Slot::Bound(_) => return Err(EngineError::AlreadyAssigned),
                Slot::Disposed(_) => Some(subscription),
            }
        };
        if let Some(subscription) = to_dispose {
            subscription.dispose();
        }
        Ok(())
    }

    /// The bound child, live or already disposed.
    pub fn get(&self) -> Option<Arc<dyn Subscription>> {
        match &*self.slot.lock() {
            Slot::Unset => None,
            Slot::Bound(s) => Some(s.clone()),
            Slot::Disposed(s) => s.clone(),
        }
    }

    pub fn is_disposed(&self) -> bool {
        matches!(&*self.slot.lock(), Slot::Disposed(_))
    }
}

impl Default for SingleAssignmentSubscription {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscription for SingleAssignmentSubscription {
    fn accept(&self, visitor: &mut dyn SubscriptionVisitor) {
        if let Some(child) = self.get() {
            child.accept(visitor);
        }
    }

    fn dispose(&self) {
        let child = {
            let mut slot = self.slot.lock();
            match std::mem::replace(&mut *slot, Slot::Disposed(None)) {
                Slot::Bound(child) => {
                    *slot = Slot::Disposed(Some(child.clone()));
                    Some(child)
                }
                Slot::Disposed(previous) => {
                    *slot = Slot::Disposed(previous);
                    None
                }
                Slot::Unset => None,
            }
        };
        if let Some(child) = child {
            child.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLeaf {
        disposals: AtomicUsize,
    }

    impl CountingLeaf {
        fn new() -> Arc<Self> {
            Arc::new(CountingLeaf {
                disposals: AtomicUsize::new(0),
            })
        }

        fn disposals(&self) -> usize {
            self.disposals.load(Ordering::SeqCst)
        }
    }

    impl Subscription for CountingLeaf {
        fn accept(&self, _visitor: &mut dyn SubscriptionVisitor) {}

        fn dispose(&self) {
            self.disposals.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_serial_replacement_disposes_previous() {
        let holder = SerialSubscription::new();
        let a = CountingLeaf::new();
        let b = CountingLeaf::new();

        holder.set(a.clone());
        holder.set(b.clone());

        assert_eq!(a.disposals(), 1);
        assert_eq!(b.disposals(), 0);

        holder.dispose();
        assert_eq!(b.disposals(), 1);
    }

    #[test]
    fn test_serial_set_after_dispose() {
        let holder = SerialSubscription::new();
        holder.dispose();

        let late = CountingLeaf::new();
        holder.set(late.clone());
        assert_eq!(late.disposals(), 1);
        assert!(holder.get().is_none());
    }

    #[test]
    fn test_single_assignment_double_set_fails() {
        let holder = SingleAssignmentSubscription::new();
        let a = CountingLeaf::new();
        let b = CountingLeaf::new();

        holder.set(a.clone()).unwrap();
        let result = holder.set(b.clone());
        assert!(matches!(result, Err(EngineError::AlreadyAssigned)));

        // Neither value was disposed by the violation.
        assert_eq!(a.disposals(), 0);
        assert_eq!(b.disposals(), 0);
    }

    #[test]
    fn test_single_assignment_set_after_dispose() {
        let holder = SingleAssignmentSubscription::new();
        let a = CountingLeaf::new();

        holder.set(a.clone()).unwrap();
        holder.dispose();
        assert_eq!(a.disposals(), 1);

        // A post-disposal assignment succeeds but the child is disposed
        // immediately; the original child stays reachable.
        let b = CountingLeaf::new();
        holder.set(b.clone()).unwrap();
        assert_eq!(b.disposals(), 1);
        assert!(Arc::ptr_eq(
            &holder.get().unwrap(),
            &(a.clone() as Arc<dyn Subscription>)
        ));
    }

    #[test]
    fn test_single_assignment_dispose_idempotent() {
        let holder = SingleAssignmentSubscription::new();
        let a = CountingLeaf::new();
        holder.set(a.clone()).unwrap();

        holder.dispose();
        holder.dispose();
        assert_eq!(a.disposals(), 1);
    }

    #[test]
    fn test_single_assignment_dispose_before_set() {
        let holder = SingleAssignmentSubscription::new();
        holder.dispose();
        assert!(holder.is_disposed());
        assert!(holder.get().is_none());
    }
}
