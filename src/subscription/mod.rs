//! Subscription trees: the node protocol, containers, holders, and the
//! traversal passes that drive lifecycle and state management.
//!
//! A live query is a tree of [`Subscription`] nodes. Operator instances
//! implement [`OperatorNode`]; composites and holders are structural glue
//! that forward traversals to their children. All cross-cutting passes go
//! through [`Subscription::accept`].

mod composite;
mod holder;
mod node;
mod visitor;

pub use composite::{
    BinaryCompositeSubscription, CompositeSubscription, StableCompositeSubscription,
    StaticCompositeSubscription,
};
pub use holder::{SerialSubscription, SingleAssignmentSubscription};
pub use node::{OperatorContext, OperatorNode, Subscription, SubscriptionVisitor};
pub use visitor::{InitializeVisitor, StateVisitor, TraversalVisitor};
