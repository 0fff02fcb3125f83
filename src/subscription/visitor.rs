//! Traversal passes over subscription trees.
//!
//! Two concrete passes are composed from a generic depth-first traversal:
//! lifecycle initialization (subscribe, attach context, start, optionally
//! with a state load inserted when recovering) and state management
//! (changed-detection, save, load, post-save notification).

use crate::checkpoint::{StateReader, StateWriter};
use crate::error::{EngineError, Result};
use crate::subscription::node::{
    OperatorContext, OperatorNode, Subscription, SubscriptionVisitor,
};

/// Generic depth-first pre-order traversal applying a fallible action at
/// every operator node. Stops recursing once the action fails; the first
/// error is reported to the caller.
pub struct TraversalVisitor<F>
where
    F: FnMut(&dyn OperatorNode) -> Result<()>,
{
    action: F,
    error: Option<EngineError>,
}

impl<F> TraversalVisitor<F>
where
    F: FnMut(&dyn OperatorNode) -> Result<()>,
{
    pub fn new(action: F) -> Self {
        TraversalVisitor {
            action,
            error: None,
        }
    }

    /// Run the pass over the tree rooted at `root`.
    pub fn run(mut self, root: &dyn Subscription) -> Result<()> {
        root.accept(&mut self);
        match self.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl<F> SubscriptionVisitor for TraversalVisitor<F>
where
    F: FnMut(&dyn OperatorNode) -> Result<()>,
{
    fn visit_node(&mut self, node: &dyn OperatorNode) {
        if self.error.is_some() {
            return;
        }
        if let Err(error) = (self.action)(node) {
            self.error = Some(error);
            return;
        }
        for input in node.inputs() {
            if self.error.is_some() {
                return;
            }
            input.accept(self);
        }
    }
}

/// Lifecycle initialization passes.
///
/// Each pass runs over the entire tree before the next begins; interleaving
/// them per-node would let a started operator observe an unsubscribed input.
pub struct InitializeVisitor;

impl InitializeVisitor {
    /// First pass: resolve every node's inputs.
    pub fn subscribe(root: &dyn Subscription) -> Result<()> {
        TraversalVisitor::new(|node| node.subscribe_core()).run(root)
    }

    /// Second pass: attach the operator context to every node.
    pub fn set_context(root: &dyn Subscription, context: &OperatorContext) {
        // Infallible; the traversal error slot stays empty.
        let _ = TraversalVisitor::new(|node| {
            node.set_context(context);
            Ok(())
        })
        .run(root);
    }

    /// Final pass: start every node.
    pub fn start(root: &dyn Subscription) -> Result<()> {
        TraversalVisitor::new(|node| node.start_core()).run(root)
    }

    /// Fresh start: subscribe, attach context, start.
    pub fn initialize(root: &dyn Subscription, context: &OperatorContext) -> Result<()> {
        Self::subscribe(root)?;
        Self::set_context(root, context);
        Self::start(root)
    }

    /// Recovery start: state load is inserted between context attachment
    /// and start, so nodes start from their recovered watermarks.
    pub fn initialize_with_state(
        root: &dyn Subscription,
        context: &OperatorContext,
        reader: &mut StateReader,
    ) -> Result<()> {
        Self::subscribe(root)?;
        Self::set_context(root, context);
        StateVisitor::load_state(root, reader)?;
        Self::start(root)
    }
}

/// State management passes.
///
/// Stateful dispatch only reaches nodes whose `has_state()` capability is
/// set; all other nodes are no-ops for save/load.
pub struct StateVisitor;

impl StateVisitor {
    /// Whether any node in the tree has unsaved state. Short-circuits the
    /// traversal once the first changed node is found.
    pub fn has_state_changed(root: &dyn Subscription) -> bool {
        let mut detector = ChangeDetector { changed: false };
        root.accept(&mut detector);
        detector.changed
    }

    /// Persist every stateful node, in traversal order.
    pub fn save_state(root: &dyn Subscription, writer: &mut StateWriter) -> Result<()> {
        TraversalVisitor::new(|node| {
            if node.has_state() {
                node.save_state(writer)?;
            }
            Ok(())
        })
        .run(root)
    }

    /// Restore every stateful node, in traversal order. The tree shape must
    /// match the one that produced the blob; frames are positional.
    pub fn load_state(root: &dyn Subscription, reader: &mut StateReader) -> Result<()> {
        TraversalVisitor::new(|node| {
            if node.has_state() {
                node.load_state(reader)?;
            }
            Ok(())
        })
        .run(root)
    }

    /// Post-commit notification after a successful checkpoint.
    pub fn on_state_saved(root: &dyn Subscription) {
        let _ = TraversalVisitor::new(|node| {
            if node.has_state() {
                node.on_state_saved();
            }
            Ok(())
        })
        .run(root);
    }
}

struct ChangeDetector {
    changed: bool,
}

impl SubscriptionVisitor for ChangeDetector {
    fn visit_node(&mut self, node: &dyn OperatorNode) {
        if self.changed {
            return;
        }
        if node.has_state() && node.state_changed() {
            self.changed = true;
            return;
        }
        for input in node.inputs() {
            if self.changed {
                return;
            }
            input.accept(self);
        }
    }
}
