//! Composite subscription containers.
//!
//! Three variants trade mutation frequency against iteration cost. All of
//! them hand traversals an immutable snapshot, so a concurrent add or remove
//! never corrupts or blocks an `accept` in progress, and all of them dispose
//! every remaining child exactly once on their own (idempotent) disposal.
//! Child disposal always happens outside the container's lock.

use crate::error::{EngineError, Result};
use crate::subscription::node::{Subscription, SubscriptionVisitor};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Capacity floor below which the dynamic container never compacts.
const SHRINK_CAPACITY_FLOOR: usize = 64;

// --- Dynamic ---

struct DynamicInner {
    /// Growable slot list. Removal tombstones a slot rather than shifting,
    /// keeping indices stable for concurrent readers of a snapshot.
    slots: Vec<Option<Arc<dyn Subscription>>>,
    live: usize,
    disposed: bool,
}

/// Mutable multiset of subscriptions, optimized for frequent add/remove.
pub struct CompositeSubscription {
    inner: Mutex<DynamicInner>,
}

impl CompositeSubscription {
    pub fn new() -> Self {
        CompositeSubscription {
            inner: Mutex::new(DynamicInner {
                slots: Vec::new(),
                live: 0,
                disposed: false,
            }),
        }
    }

    /// Add a child. If the container is already disposed, the child is
    /// disposed immediately instead of being retained.
    pub fn add(&self, subscription: Arc<dyn Subscription>) {
        let reject = {
            let mut inner = self.inner.lock();
            if inner.disposed {
                Some(subscription)
            } else {
                // Reuse a tombstoned slot if one exists.
                match inner.slots.iter_mut().find(|slot| slot.is_none()) {
                    Some(slot) => *slot = Some(subscription),
                    None => inner.slots.push(Some(subscription)),
                }
                inner.live += 1;
                None
            }
        };
        if let Some(subscription) = reject {
            subscription.dispose();
        }
    }

    /// Remove a child by identity, disposing it. Returns whether it was
    /// present.
    pub fn remove(&self, subscription: &Arc<dyn Subscription>) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            let found = inner
                .slots
                .iter()
                .position(|slot| matches!(slot, Some(s) if Arc::ptr_eq(s, subscription)));
            match found {
                Some(index) => {
                    let removed = inner.slots[index].take();
                    inner.live -= 1;
                    Self::maybe_shrink(&mut inner);
                    removed
                }
                None => None,
            }
        };
        match removed {
            Some(removed) => {
                removed.dispose();
                true
            }
            None => false,
        }
    }

    /// Compact when capacity exceeds the floor and the live count has
    /// dropped below half of it.
    fn maybe_shrink(inner: &mut DynamicInner) {
        if inner.slots.len() > SHRINK_CAPACITY_FLOOR && inner.live < inner.slots.len() / 2 {
            inner.slots.retain(|slot| slot.is_some());
            inner.slots.shrink_to_fit();
        }
    }

    /// Number of live children.
    pub fn len(&self) -> usize {
        self.inner.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    fn snapshot(&self) -> Vec<Arc<dyn Subscription>> {
        self.inner
            .lock()
            .slots
            .iter()
            .filter_map(|slot| slot.clone())
            .collect()
    }
}

impl Default for CompositeSubscription {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscription for CompositeSubscription {
    fn accept(&self, visitor: &mut dyn SubscriptionVisitor) {
        for child in self.snapshot() {
            child.accept(visitor);
        }
    }

    fn dispose(&self) {
        let children = {
            let mut inner = self.inner.lock();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            inner.live = 0;
            std::mem::take(&mut inner.slots)
        };
        for child in children.into_iter().flatten() {
            child.dispose();
        }
    }
}

// --- Stable ---

struct StableInner {
    children: Arc<[Arc<dyn Subscription>]>,
    disposed: bool,
}

/// Copy-on-write container: every add/remove rebuilds the backing array, so
/// `accept` iterates the shared snapshot without copying. Optimal when
/// mutation is rare and traversal is frequent.
pub struct StableCompositeSubscription {
    inner: RwLock<StableInner>,
}

impl StableCompositeSubscription {
    pub fn new() -> Self {
        StableCompositeSubscription {
            inner: RwLock::new(StableInner {
                children: Arc::from(Vec::new()),
                disposed: false,
            }),
        }
    }

    pub fn add(&self, subscription: Arc<dyn Subscription>) {
        let reject = {
            let mut inner = self.inner.write();
            if inner.disposed {
                Some(subscription)
            } else {
                let mut next: Vec<_> = inner.children.iter().cloned().collect();
                next.push(subscription);
                inner.children = Arc::from(next);
                None
            }
        };
        if let Some(subscription) = reject {
            subscription.dispose();
        }
    }

    pub fn remove(&self, subscription: &Arc<dyn Subscription>) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            let found = inner
                .children
                .iter()
                .position(|s| Arc::ptr_eq(s, subscription));
            match found {
                Some(index) => {
                    let mut next: Vec<_> = inner.children.iter().cloned().collect();
                    let removed = next.remove(index);
                    inner.children = Arc::from(next);
                    Some(removed)
                }
                None => None,
            }
        };
        match removed {
            Some(removed) => {
                removed.dispose();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Arc<[Arc<dyn Subscription>]> {
        self.inner.read().children.clone()
    }
}

impl Default for StableCompositeSubscription {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscription for StableCompositeSubscription {
    fn accept(&self, visitor: &mut dyn SubscriptionVisitor) {
        for child in self.snapshot().iter() {
            child.accept(visitor);
        }
    }

    fn dispose(&self) {
        let children = {
            let mut inner = self.inner.write();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            std::mem::replace(&mut inner.children, Arc::from(Vec::new()))
        };
        for child in children.iter() {
            child.dispose();
        }
    }
}

// --- Static ---

/// Immutable container fixed at construction. Mutation attempts are
/// rejected; the set of children never changes until disposal.
pub struct StaticCompositeSubscription {
    children: Box<[Arc<dyn Subscription>]>,
    disposed: AtomicBool,
}

impl StaticCompositeSubscription {
    pub fn new(children: Vec<Arc<dyn Subscription>>) -> Self {
        StaticCompositeSubscription {
            children: children.into_boxed_slice(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Always fails: the container is read-only.
    pub fn add(&self, _subscription: Arc<dyn Subscription>) -> Result<()> {
        Err(EngineError::ReadOnlyComposite)
    }

    /// Always fails: the container is read-only.
    pub fn remove(&self, _subscription: &Arc<dyn Subscription>) -> Result<bool> {
        Err(EngineError::ReadOnlyComposite)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl Subscription for StaticCompositeSubscription {
    fn accept(&self, visitor: &mut dyn SubscriptionVisitor) {
        for child in self.children.iter() {
            child.accept(visitor);
        }
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            for child in self.children.iter() {
                child.dispose();
            }
        }
    }
}

/// Two-element static composite for the common binary-composition case,
/// avoiding the array allocation.
pub struct BinaryCompositeSubscription {
    left: Arc<dyn Subscription>,
    right: Arc<dyn Subscription>,
    disposed: AtomicBool,
}

impl BinaryCompositeSubscription {
    pub fn new(left: Arc<dyn Subscription>, right: Arc<dyn Subscription>) -> Self {
        BinaryCompositeSubscription {
            left,
            right,
            disposed: AtomicBool::new(false),
        }
    }
}

impl Subscription for BinaryCompositeSubscription {
    fn accept(&self, visitor: &mut dyn SubscriptionVisitor) {
        self.left.accept(visitor);
        self.right.accept(visitor);
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.left.dispose();
            self.right.dispose();
        }
    }
}
