//! Running confidence scoring for traversal paths.
//!
//! Each visited node contributes `base * weight`, where `base` starts at 1.0
//! and is reduced by the `confidence_adjustment` declared on action nodes.
//! The aggregate is the product of per-step contributions. Both the
//! contribution and the running value are clamped to [0,1] at every step, so
//! the aggregate never increases along a path regardless of node weights.

use crate::node::DecisionNode;

/// Tracks the running confidence of a single traversal.
#[derive(Debug, Clone)]
pub struct ConfidenceTracker {
    running: f64,
}

impl ConfidenceTracker {
    /// Start a new path at the given initial confidence, clamped to [0,1].
    pub fn new(initial: f64) -> Self {
        Self {
            running: initial.clamp(0.0, 1.0),
        }
    }

    /// The current aggregate confidence, in [0,1].
    pub fn value(&self) -> f64 {
        self.running
    }

    /// Apply a node's contribution and return the new aggregate.
    pub fn step(&mut self, node: &DecisionNode) -> f64 {
        let base = 1.0 - node.confidence_adjustment();
        let contribution = (base * node.weight).clamp(0.0, 1.0);
        self.running = (self.running * contribution).clamp(0.0, 1.0);
        self.running
    }

    /// Whether the running confidence clears the node's floor.
    pub fn check(&self, node: &DecisionNode) -> bool {
        self.running >= node.min_confidence
    }
}

impl Default for ConfidenceTracker {
    fn default() -> Self {
        Self::new(1.0)
    }
}
