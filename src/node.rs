//! Type definitions for decision-graph nodes.
//!
//! A node is either a *condition* (poses a question and branches on the
//! observed answer) or an *action* (a step with an associated action string,
//! terminal for traversal). The branch map lives inside the condition
//! variant so every traversal step can match on the kind exhaustively.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for a node within a decision graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Generate a new random node ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from string.
    pub fn parse(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Expected value type for a `type:` validator rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Number,
    String,
    Boolean,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number => write!(f, "number"),
            Self::String => write!(f, "string"),
            Self::Boolean => write!(f, "boolean"),
        }
    }
}

/// A predicate a context value must satisfy before a node is evaluated.
///
/// Rules use the compact syntax of the persisted document form:
/// `type:number`, `type:string`, `type:boolean`, `min:<n>`, `max:<n>`,
/// `regex:<pattern>`. The enum serializes as that string so documents
/// round-trip byte-identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ContextValidator {
    /// Value must be of the given JSON type.
    Type(ValueType),
    /// Numeric value must be at least this.
    Min(f64),
    /// Numeric value must be at most this.
    Max(f64),
    /// String value must match this regex.
    Pattern(String),
}

impl ContextValidator {
    /// Parse a compact rule string such as `type:number` or `min:0.5`.
    pub fn parse(rule: &str) -> Result<Self> {
        if let Some(ty) = rule.strip_prefix("type:") {
            let ty = match ty {
                "number" => ValueType::Number,
                "string" => ValueType::String,
                "boolean" => ValueType::Boolean,
                _ => return Err(Error::invalid_validator(rule)),
            };
            return Ok(Self::Type(ty));
        }
        if let Some(n) = rule.strip_prefix("min:") {
            let n: f64 = n.parse().map_err(|_| Error::invalid_validator(rule))?;
            return Ok(Self::Min(n));
        }
        if let Some(n) = rule.strip_prefix("max:") {
            let n: f64 = n.parse().map_err(|_| Error::invalid_validator(rule))?;
            return Ok(Self::Max(n));
        }
        if let Some(pat) = rule.strip_prefix("regex:") {
            Regex::new(pat).map_err(|_| Error::invalid_validator(rule))?;
            return Ok(Self::Pattern(pat.to_string()));
        }
        Err(Error::invalid_validator(rule))
    }

    /// Check a context value against this rule.
    pub fn check(&self, value: &Value) -> bool {
        match self {
            Self::Type(ValueType::Number) => value.is_number(),
            Self::Type(ValueType::String) => value.is_string(),
            Self::Type(ValueType::Boolean) => value.is_boolean(),
            Self::Min(min) => value.as_f64().map(|v| v >= *min).unwrap_or(false),
            Self::Max(max) => value.as_f64().map(|v| v <= *max).unwrap_or(false),
            Self::Pattern(pat) => match (Regex::new(pat), value.as_str()) {
                (Ok(re), Some(s)) => re.is_match(s),
                _ => false,
            },
        }
    }
}

impl std::fmt::Display for ContextValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Type(ty) => write!(f, "type:{}", ty),
            Self::Min(n) => write!(f, "min:{}", n),
            Self::Max(n) => write!(f, "max:{}", n),
            Self::Pattern(pat) => write!(f, "regex:{}", pat),
        }
    }
}

impl From<ContextValidator> for String {
    fn from(v: ContextValidator) -> String {
        v.to_string()
    }
}

impl TryFrom<String> for ContextValidator {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

/// Kind-specific payload of a node.
///
/// Conditions own the branch map (answer label to target id); actions own
/// the action string and an optional confidence adjustment applied when the
/// action is reached during traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Poses a question and branches by answer.
    Condition {
        /// Mapping from answer label to target node id.
        #[serde(default)]
        children: HashMap<String, NodeId>,
    },
    /// A step with an associated action string; terminal for traversal.
    Action {
        /// The action to take when this node is reached.
        action: String,
        /// Reduction applied to the step's base confidence, in [0,1].
        #[serde(default)]
        confidence_adjustment: f64,
    },
}

fn default_weight() -> f64 {
    1.0
}

fn is_default_weight(w: &f64) -> bool {
    *w == 1.0
}

fn is_zero(v: &f64) -> bool {
    *v == 0.0
}

/// A node in a decision graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionNode {
    /// Unique identifier for this node.
    pub id: NodeId,

    /// Question text for conditions; a short label for actions.
    pub question: String,

    /// Kind-specific payload.
    #[serde(flatten)]
    pub kind: NodeKind,

    /// Node followed when the observed answer matches no branch, or when
    /// context prerequisites fail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_node: Option<NodeId>,

    /// Why the fallback exists, surfaced in traversal bookkeeping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,

    /// Context keys that must be present before this node is evaluated.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub required_context: BTreeSet<String>,

    /// Predicates on context values, keyed by context key.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context_validators: HashMap<String, ContextValidator>,

    /// Positive multiplier for this node's confidence contribution.
    #[serde(default = "default_weight", skip_serializing_if = "is_default_weight")]
    pub weight: f64,

    /// Running confidence must be at least this when the node is evaluated.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub min_confidence: f64,

    /// Additional metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,

    /// When this node was created.
    pub created_at: DateTime<Utc>,
}

impl DecisionNode {
    fn new(question: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(),
            question: question.into(),
            kind,
            fallback_node: None,
            fallback_reason: None,
            required_context: BTreeSet::new(),
            context_validators: HashMap::new(),
            weight: 1.0,
            min_confidence: 0.0,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    /// Create a condition node with an empty branch map.
    pub fn condition(question: impl Into<String>) -> Self {
        Self::new(
            question,
            NodeKind::Condition {
                children: HashMap::new(),
            },
        )
    }

    /// Create an action node.
    pub fn action(label: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(
            label,
            NodeKind::Action {
                action: action.into(),
                confidence_adjustment: 0.0,
            },
        )
    }

    /// Set the fallback node and reason.
    pub fn with_fallback(mut self, node: NodeId, reason: impl Into<String>) -> Self {
        self.fallback_node = Some(node);
        self.fallback_reason = Some(reason.into());
        self
    }

    /// Require a context key before evaluation.
    pub fn with_required_context(mut self, key: impl Into<String>) -> Self {
        self.required_context.insert(key.into());
        self
    }

    /// Attach a validator rule to a context key.
    pub fn with_validator(mut self, key: impl Into<String>, rule: ContextValidator) -> Self {
        self.context_validators.insert(key.into(), rule);
        self
    }

    /// Set the confidence weight. Values at or below zero are rejected by
    /// resetting to 1.0.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = if weight > 0.0 { weight } else { 1.0 };
        self
    }

    /// Set the minimum running confidence, clamped to [0,1].
    pub fn with_min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = min.clamp(0.0, 1.0);
        self
    }

    /// Set the confidence adjustment on an action node. No effect on
    /// condition nodes.
    pub fn with_confidence_adjustment(mut self, adjustment: f64) -> Self {
        if let NodeKind::Action {
            confidence_adjustment,
            ..
        } = &mut self.kind
        {
            *confidence_adjustment = adjustment.clamp(0.0, 1.0);
        }
        self
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Whether this is an action node.
    pub fn is_action(&self) -> bool {
        matches!(self.kind, NodeKind::Action { .. })
    }

    /// The action string, if this is an action node.
    pub fn action_text(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Action { action, .. } => Some(action),
            NodeKind::Condition { .. } => None,
        }
    }

    /// The branch map, if this is a condition node.
    pub fn children(&self) -> Option<&HashMap<String, NodeId>> {
        match &self.kind {
            NodeKind::Condition { children } => Some(children),
            NodeKind::Action { .. } => None,
        }
    }

    /// The confidence adjustment declared on this node (0.0 for conditions).
    pub fn confidence_adjustment(&self) -> f64 {
        match &self.kind {
            NodeKind::Action {
                confidence_adjustment,
                ..
            } => *confidence_adjustment,
            NodeKind::Condition { .. } => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_id_roundtrip() {
        let id = NodeId::new();
        let parsed = NodeId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_condition_builder() {
        let node = DecisionNode::condition("issue_type")
            .with_required_context("customer_id")
            .with_validator("customer_id", ContextValidator::Type(ValueType::String))
            .with_weight(0.9)
            .with_min_confidence(0.5);

        assert!(!node.is_action());
        assert!(node.children().unwrap().is_empty());
        assert!(node.required_context.contains("customer_id"));
        assert_eq!(node.weight, 0.9);
        assert_eq!(node.min_confidence, 0.5);
    }

    #[test]
    fn test_action_builder() {
        let node = DecisionNode::action("Escalate", "Transfer to human agent")
            .with_confidence_adjustment(0.3)
            .with_metadata("team", "support");

        assert!(node.is_action());
        assert_eq!(node.action_text(), Some("Transfer to human agent"));
        assert_eq!(node.confidence_adjustment(), 0.3);
        assert!(node.children().is_none());
    }

    #[test]
    fn test_confidence_adjustment_ignored_on_condition() {
        let node = DecisionNode::condition("q").with_confidence_adjustment(0.5);
        assert_eq!(node.confidence_adjustment(), 0.0);
    }

    #[test]
    fn test_validator_parse_and_display() {
        for rule in ["type:number", "type:string", "type:boolean", "min:0.5", "max:10", "regex:^E\\d+$"] {
            let v = ContextValidator::parse(rule).unwrap();
            assert_eq!(v.to_string(), rule);
        }
        assert!(ContextValidator::parse("type:list").is_err());
        assert!(ContextValidator::parse("min:abc").is_err());
        assert!(ContextValidator::parse("regex:(unclosed").is_err());
        assert!(ContextValidator::parse("shape:round").is_err());
    }

    #[test]
    fn test_validator_check() {
        assert!(ContextValidator::Type(ValueType::Number).check(&json!(3)));
        assert!(!ContextValidator::Type(ValueType::Number).check(&json!("3")));
        assert!(ContextValidator::Type(ValueType::String).check(&json!("x")));
        assert!(ContextValidator::Type(ValueType::Boolean).check(&json!(true)));
        assert!(ContextValidator::Min(2.0).check(&json!(2)));
        assert!(!ContextValidator::Min(2.0).check(&json!(1.5)));
        assert!(ContextValidator::Max(2.0).check(&json!(1.5)));
        assert!(!ContextValidator::Max(2.0).check(&json!(3)));
        assert!(ContextValidator::Pattern("^E\\d+$".into()).check(&json!("E501")));
        assert!(!ContextValidator::Pattern("^E\\d+$".into()).check(&json!("X501")));
        // Non-string values never match a pattern
        assert!(!ContextValidator::Pattern("^\\d+$".into()).check(&json!(42)));
    }

    #[test]
    fn test_kind_serde_tag() {
        let node = DecisionNode::action("Restart", "Guide customer through restart");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"], "action");
        assert_eq!(json["action"], "Guide customer through restart");

        let cond = DecisionNode::condition("ok?");
        let json = serde_json::to_value(&cond).unwrap();
        assert_eq!(json["kind"], "condition");
    }

    #[test]
    fn test_validator_serde_compact_form() {
        let node = DecisionNode::condition("q")
            .with_validator("cpu", ContextValidator::parse("min:0").unwrap());
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["context_validators"]["cpu"], "min:0");

        let back: DecisionNode = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
    }
}
