//! The subscription/operator node protocol.
//!
//! Every live computation in the engine is a tree of [`Subscription`] nodes.
//! Cross-cutting passes (lifecycle initialization, state management) never
//! call node methods directly from the outside; they traverse the tree
//! through [`Subscription::accept`], so new passes can be added without
//! changing node types.

use crate::checkpoint::{StateReader, StateWriter};
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::types::Uri;
use std::sync::Arc;

/// A node in a live subscription tree.
///
/// Nodes are owned by their parent composite or holder and destroyed on
/// disposal. Disposal is idempotent and transitively disposes the node's
/// inputs exactly once each.
pub trait Subscription: Send + Sync {
    /// Dispatch this node to a traversal pass.
    ///
    /// Containers and holders forward to a snapshot of their children;
    /// operator nodes present themselves to the visitor, which recurses
    /// into their inputs.
    fn accept(&self, visitor: &mut dyn SubscriptionVisitor);

    /// Release this node and everything it owns. Idempotent.
    fn dispose(&self);
}

/// A traversal pass over a subscription tree.
///
/// Traversal is depth-first, pre-order, and deterministic for a fixed tree
/// snapshot: the visitor applies its per-pass action to a node, then recurses
/// into the node's inputs in order.
pub trait SubscriptionVisitor {
    /// Visit one operator node.
    fn visit_node(&mut self, node: &dyn OperatorNode);
}

/// An operator instance participating in the lifecycle and state protocols.
///
/// The lifecycle is strictly ordered: `subscribe_core` runs to completion
/// over the whole tree before `set_context`, which completes before
/// `start_core`. When recovering, state load is inserted between context
/// attachment and start. Callers violating this order break a precondition;
/// nodes are not required to detect it.
pub trait OperatorNode: Subscription {
    /// Input subscriptions of this operator, in traversal order.
    fn inputs(&self) -> Vec<Arc<dyn Subscription>>;

    /// Resolve inputs. First lifecycle step.
    fn subscribe_core(&self) -> Result<()> {
        Ok(())
    }

    /// Attach the engine-supplied operator context. Second lifecycle step.
    fn set_context(&self, _context: &OperatorContext) {}

    /// Begin producing/consuming events. Final lifecycle step.
    fn start_core(&self) -> Result<()> {
        Ok(())
    }

    /// Whether this node holds operator state. Nodes answering `false` are
    /// skipped by the state-management dispatch below.
    fn has_state(&self) -> bool {
        false
    }

    /// Whether this node has unsaved mutations since the last checkpoint.
    fn state_changed(&self) -> bool {
        false
    }

    /// Persist this node's state. Only called when `has_state()`.
    fn save_state(&self, _writer: &mut StateWriter) -> Result<()> {
        Ok(())
    }

    /// Restore this node's state. Only called when `has_state()`.
    fn load_state(&self, _reader: &mut StateReader) -> Result<()> {
        Ok(())
    }

    /// Post-commit notification: the checkpoint containing this node's
    /// saved state is durable. Acknowledgments are issued from here.
    fn on_state_saved(&self) {}
}

/// Engine-supplied context attached to every node during the second
/// lifecycle step. Borrowed by nodes for the duration of operation; the
/// context is owned by the engine, not the subscription.
#[derive(Clone)]
pub struct OperatorContext {
    instance_id: Uri,
    scheduler: Scheduler,
}

impl OperatorContext {
    pub fn new(instance_id: Uri, scheduler: Scheduler) -> Self {
        OperatorContext {
            instance_id,
            scheduler,
        }
    }

    /// Identity of the query instance this tree belongs to.
    pub fn instance_id(&self) -> &Uri {
        &self.instance_id
    }

    /// The engine's scheduling boundary.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}
