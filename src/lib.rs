//! # Rivulet
//!
//! Runtime core of a checkpointable, recoverable reactive query engine:
//! live subscription trees whose lifecycle survives process restarts, and
//! the reliable bridging subjects that let dynamically created
//! sub-computations be checkpointed independently of their parents.
//!
//! ## Core Concepts
//!
//! - **Subscription trees**: operator instances wired together, traversed
//!   by visitors for lifecycle (subscribe → attach context → start) and
//!   state management (detect, save, load, acknowledge)
//! - **Bridges**: reliable decoupling points between an upstream producer
//!   and one volatile downstream subscription, with replay buffering and a
//!   persisted watermark
//! - **Sealable subjects**: refcounted fan-out points for sub-sequences
//!   spawned by higher-order operators (flatten, group)
//! - **Reliable inputs**: adapters from sequenced, acknowledgeable sources
//!   to the engine's ordinary push model
//!
//! ## Example
//!
//! ```ignore
//! use rivulet::{Bridge, InitializeVisitor, ObservableDefinition, OperatorContext};
//!
//! let bridge = Bridge::new("rv://bridge/1".into(), definition, service);
//! bridge.on_next(1); // buffered until the downstream starts
//!
//! let subscription = bridge.subscribe(downstream)?;
//! InitializeVisitor::initialize(subscription.as_ref(), &context)?;
//! ```
//!
//! Query binding, expression codecs, and the registry that resolves named
//! artifacts are external collaborators, reached through the
//! [`service::ReactiveService`] boundary.

pub mod bridge;
pub mod checkpoint;
pub mod error;
pub mod reliable;
pub mod scheduler;
pub mod service;
pub mod subject;
pub mod subscription;
pub mod types;

// Re-exports
pub use bridge::{Bridge, BridgeState, BridgeSubscription, BridgeVersion};
pub use checkpoint::{StateReader, StateWriter};
pub use error::{EngineError, Result};
pub use reliable::{
    ReliableInput, ReliableObservable, ReliableObserver, ReliableSubscription,
    ScheduledReliableInput,
};
pub use scheduler::Scheduler;
pub use service::{ObservableDefinition, ReactiveService};
pub use subject::{InnerSubject, RefCountSubject, SubjectSubscription};
pub use subscription::{
    BinaryCompositeSubscription, CompositeSubscription, InitializeVisitor, OperatorContext,
    OperatorNode, SerialSubscription, SingleAssignmentSubscription, StableCompositeSubscription,
    StateVisitor, StaticCompositeSubscription, Subscription, SubscriptionVisitor, TraversalVisitor,
};
pub use types::{Notification, Observer, SequenceId, Uri};
