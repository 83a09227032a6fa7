//! # dtt-core
//!
//! Decision-graph execution engine for troubleshooting playbooks.
//!
//! A [`DecisionTree`] is, despite the name, a directed graph of *condition*
//! nodes (questions that branch on answers) and *action* nodes (terminal
//! steps). The engine walks the graph against a caller-supplied context,
//! tracking a running confidence score and routing through fallback edges
//! when answers or context fall short. Cycles are permitted in the data and
//! guarded against at execution and render time, so both are bounded by the
//! node count.
//!
//! ## Core Components
//!
//! - **Node Store** ([`DecisionTree`], [`DecisionNode`]): graph CRUD with
//!   permissive removal semantics
//! - **Confidence Model** ([`ConfidenceTracker`]): monotone running score
//!   in [0,1]
//! - **Traversal Engine** ([`traverse`], [`ExecutionResult`]): the state
//!   machine that executes a graph
//! - **Renderer** ([`render`]): cycle-safe ASCII, Mermaid, and DOT export
//!
//! ## Example
//!
//! ```rust,ignore
//! use dtt_core::{traverse, DecisionTree};
//! use serde_json::json;
//!
//! let mut tree = DecisionTree::new("Support playbook");
//! let root = tree.add_condition("issue_type");
//! let restart = tree.add_action("Restart", "Guide customer through restart");
//! let escalate = tree.add_action("Escalate", "Transfer to human agent");
//! tree.link(&root, "technical", &restart)?;
//! tree.set_fallback(&root, &escalate, "Unknown issue type")?;
//!
//! let context = [("issue_type".to_string(), json!("technical"))].into();
//! let result = traverse(&tree, &root, &context)?;
//! assert_eq!(result.action.as_deref(), Some("Guide customer through restart"));
//! ```

pub mod confidence;
pub mod error;
pub mod node;
pub mod render;
pub mod traverse;
pub mod tree;

#[cfg(test)]
mod proptest;

// Re-exports for convenience
pub use confidence::ConfidenceTracker;
pub use error::{Error, Result};
pub use node::{ContextValidator, DecisionNode, NodeId, NodeKind, ValueType};
pub use render::{render, RenderFormat};
pub use traverse::{
    traverse, traverse_with, AbortReason, Context, ExecutionResult, FallbackUse,
    LowConfidencePolicy, PathStep, TraversalOptions,
};
pub use tree::{DecisionTree, RobustnessReport};
