//! Error types for dtt-core.
//!
//! Only structural problems surface as `Err`: a missing node id at an entry
//! point, linking out of an action node, or a malformed validator rule.
//! Conditions that arise *during* traversal (missing context, unmatched
//! answers, low confidence, cycles) are captured in the
//! [`ExecutionResult`](crate::traverse::ExecutionResult) so callers can
//! inspect the path history instead of catching errors.

use thiserror::Error;

/// Result type alias using dtt-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during decision-graph operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A referenced node id does not exist in the graph.
    #[error("node not found: {id}")]
    NodeNotFound { id: String },

    /// An operation that requires a condition node was given an action node.
    #[error("node {id} is an action node and cannot have branches")]
    NotACondition { id: String },

    /// A context validator rule could not be parsed.
    #[error("invalid validator rule: {rule}")]
    InvalidValidator { rule: String },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a node-not-found error.
    pub fn node_not_found(id: impl Into<String>) -> Self {
        Self::NodeNotFound { id: id.into() }
    }

    /// Create a not-a-condition error.
    pub fn not_a_condition(id: impl Into<String>) -> Self {
        Self::NotACondition { id: id.into() }
    }

    /// Create an invalid-validator error.
    pub fn invalid_validator(rule: impl Into<String>) -> Self {
        Self::InvalidValidator { rule: rule.into() }
    }
}
