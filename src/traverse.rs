//! Traversal engine: executes a decision graph against a context mapping.
//!
//! Traversal is a state machine. Each step evaluates one node:
//!
//! 1. required context keys must be present, else fallback or abort;
//! 2. validators on present keys must hold, else fallback or abort;
//! 3. the running confidence is refreshed and checked against the node's
//!    `min_confidence`, aborting or flagging per the configured policy;
//! 4. an action node completes the traversal;
//! 5. a condition node resolves the observed answer through the matching
//!    ladder (exact, case-insensitive, `regex:` branch patterns, substring),
//!    then fallback, else aborts with no matching branch.
//!
//! The engine tracks every node id visited during the execution; a
//! transition into an already-visited node aborts with `CycleDetected`, so
//! traversal terminates in at most `nodes.len()` steps even on cyclic
//! graphs. Traversal-time conditions are captured in the returned
//! [`ExecutionResult`], never raised; only a missing entry-point id is an
//! `Err`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace, warn};

use crate::confidence::ConfidenceTracker;
use crate::error::{Error, Result};
use crate::node::{DecisionNode, NodeId, NodeKind};
use crate::tree::DecisionTree;

/// Caller-supplied facts and answers, keyed by question text or node id.
pub type Context = HashMap<String, Value>;

/// Why a traversal stopped short of an action node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    /// A required context key was absent and no fallback could absorb it.
    MissingContext { node: NodeId, key: String },

    /// A context validator failed and no fallback could absorb it.
    ValidatorFailed {
        node: NodeId,
        key: String,
        rule: String,
    },

    /// The observed answer matched no branch and no fallback was set.
    NoMatchingBranch {
        node: NodeId,
        answer: Option<String>,
    },

    /// Running confidence fell below the node's floor.
    LowConfidence {
        node: NodeId,
        confidence: f64,
        required: f64,
    },

    /// A transition would revisit a node already seen in this execution.
    CycleDetected { node: NodeId },
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingContext { node, key } => {
                write!(f, "missing context '{}' at node {}", key, node)
            }
            Self::ValidatorFailed { node, key, rule } => {
                write!(f, "context '{}' failed rule '{}' at node {}", key, rule, node)
            }
            Self::NoMatchingBranch { node, answer } => match answer {
                Some(a) => write!(f, "no branch matches '{}' at node {}", a, node),
                None => write!(f, "no answer and no fallback at node {}", node),
            },
            Self::LowConfidence {
                node,
                confidence,
                required,
            } => write!(
                f,
                "confidence {:.2} below minimum {:.2} at node {}",
                confidence, required, node
            ),
            Self::CycleDetected { node } => write!(f, "cycle detected at node {}", node),
        }
    }
}

/// What to do when running confidence falls below a node's floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowConfidencePolicy {
    /// Abort the traversal with `LowConfidence`.
    #[default]
    Abort,
    /// Flag the node in the result and keep going.
    Escalate,
}

/// Traversal configuration.
#[derive(Debug, Clone)]
pub struct TraversalOptions {
    /// Policy for confidence-floor violations.
    pub low_confidence: LowConfidencePolicy,

    /// Confidence the path starts with, clamped to [0,1].
    pub initial_confidence: f64,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            low_confidence: LowConfidencePolicy::Abort,
            initial_confidence: 1.0,
        }
    }
}

impl TraversalOptions {
    /// Flag low-confidence nodes instead of aborting.
    pub fn escalate_on_low_confidence(mut self) -> Self {
        self.low_confidence = LowConfidencePolicy::Escalate;
        self
    }

    /// Set the initial confidence.
    pub fn with_initial_confidence(mut self, initial: f64) -> Self {
        self.initial_confidence = initial;
        self
    }
}

/// One entry in the traversal history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStep {
    /// Node evaluated at this step.
    pub node: NodeId,

    /// The node's question text.
    pub question: String,

    /// The answer used to leave this node, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,

    /// Running confidence after this step.
    pub confidence: f64,
}

/// A fallback edge taken during traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackUse {
    /// Node whose fallback was followed.
    pub from: NodeId,

    /// The fallback target.
    pub to: NodeId,

    /// Why the fallback was taken.
    pub reason: String,
}

/// Outcome of executing a decision graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Node ids actually visited, in order.
    pub path: Vec<NodeId>,

    /// Per-step history: node, answer used, confidence at that step.
    pub path_history: Vec<PathStep>,

    /// Final aggregate confidence, in [0,1].
    pub confidence: f64,

    /// Action string of the terminal node, if one was reached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Why traversal stopped, if it did not complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<AbortReason>,

    /// Fallback edges taken along the way.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallbacks_used: Vec<FallbackUse>,

    /// Nodes flagged by the escalation policy instead of aborting.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flagged_nodes: Vec<NodeId>,

    /// Non-fatal notes, e.g. dangling branch targets that were skipped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ExecutionResult {
    /// Whether traversal reached an action node.
    pub fn completed(&self) -> bool {
        self.aborted.is_none() && self.action.is_some()
    }
}

/// Execute a graph from `root` with default options.
pub fn traverse(tree: &DecisionTree, root: &NodeId, context: &Context) -> Result<ExecutionResult> {
    traverse_with(tree, root, context, &TraversalOptions::default())
}

/// Execute a graph from `root` with explicit options.
///
/// Returns `Err` only if `root` does not exist in the graph. Everything a
/// traversal can run into — missing context, failed validators, unmatched
/// answers, low confidence, cycles — lands in the result's `aborted` field
/// with the full path history preserved.
pub fn traverse_with(
    tree: &DecisionTree,
    root: &NodeId,
    context: &Context,
    options: &TraversalOptions,
) -> Result<ExecutionResult> {
    if tree.get_node(root).is_none() {
        return Err(Error::node_not_found(root.to_string()));
    }

    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut tracker = ConfidenceTracker::new(options.initial_confidence);
    let mut path = Vec::new();
    let mut history = Vec::new();
    let mut fallbacks_used = Vec::new();
    let mut flagged_nodes = Vec::new();
    let mut warnings = Vec::new();

    let mut action = None;
    let mut aborted = None;
    let mut current = root.clone();

    loop {
        if visited.contains(&current) {
            warn!(node = %current, "cycle detected, aborting");
            aborted = Some(AbortReason::CycleDetected { node: current });
            break;
        }
        let Some(node) = tree.get_node(&current) else {
            // Only reachable on the first iteration; later transitions are
            // verified before they are taken.
            return Err(Error::node_not_found(current.to_string()));
        };
        visited.insert(current.clone());
        path.push(current.clone());
        trace!(node = %current, question = %node.question, "evaluating");

        // 1. Required context.
        if let Some(key) = node
            .required_context
            .iter()
            .find(|k| !context.contains_key(k.as_str()))
        {
            match fallback_target(tree, node) {
                Some(next) => {
                    let reason = fallback_reason(node, format!("missing context '{}'", key));
                    record_fallback(&mut fallbacks_used, node, &next, reason);
                    record_step(&mut history, node, None, tracker.value());
                    current = next;
                    continue;
                }
                None => {
                    aborted = Some(AbortReason::MissingContext {
                        node: current.clone(),
                        key: key.clone(),
                    });
                    record_step(&mut history, node, None, tracker.value());
                    break;
                }
            }
        }

        // 2. Context validators, on present keys only.
        let mut validator_keys: Vec<&String> = node.context_validators.keys().collect();
        validator_keys.sort();
        let failed = validator_keys.into_iter().find(|key| {
            context
                .get(key.as_str())
                .map(|v| !node.context_validators[key.as_str()].check(v))
                .unwrap_or(false)
        });
        if let Some(key) = failed {
            let rule = node.context_validators[key.as_str()].to_string();
            match fallback_target(tree, node) {
                Some(next) => {
                    let reason =
                        fallback_reason(node, format!("context '{}' failed rule '{}'", key, rule));
                    record_fallback(&mut fallbacks_used, node, &next, reason);
                    record_step(&mut history, node, None, tracker.value());
                    current = next;
                    continue;
                }
                None => {
                    aborted = Some(AbortReason::ValidatorFailed {
                        node: current.clone(),
                        key: key.clone(),
                        rule,
                    });
                    record_step(&mut history, node, None, tracker.value());
                    break;
                }
            }
        }

        // 3. Refresh confidence and gate against the node's floor.
        let confidence = tracker.step(node);
        if !tracker.check(node) {
            match options.low_confidence {
                LowConfidencePolicy::Abort => {
                    warn!(node = %current, confidence, required = node.min_confidence,
                        "confidence below floor, aborting");
                    aborted = Some(AbortReason::LowConfidence {
                        node: current.clone(),
                        confidence,
                        required: node.min_confidence,
                    });
                    record_step(&mut history, node, None, confidence);
                    break;
                }
                LowConfidencePolicy::Escalate => {
                    debug!(node = %current, confidence, "confidence below floor, flagged");
                    flagged_nodes.push(current.clone());
                    warnings.push(format!(
                        "confidence {:.2} below minimum {:.2} at node {}",
                        confidence, node.min_confidence, current
                    ));
                }
            }
        }

        // 4. Action nodes complete the traversal.
        match &node.kind {
            NodeKind::Action { action: text, .. } => {
                debug!(node = %current, action = %text, "completed");
                action = Some(text.clone());
                record_step(&mut history, node, None, confidence);
                break;
            }
            NodeKind::Condition { .. } => {}
        }

        // 5. Resolve the observed answer to a branch.
        let answer = answer_for(node, context);
        let matched = answer
            .as_deref()
            .and_then(|a| match_branch(tree, node, a, &mut warnings));
        match matched {
            Some((label, next)) => {
                debug!(node = %current, answer = %label, next = %next, "branch taken");
                record_step(&mut history, node, Some(label), confidence);
                current = next;
            }
            None => match fallback_target(tree, node) {
                Some(next) => {
                    let why = match &answer {
                        Some(a) => format!("no branch matches '{}'", a),
                        None => "no answer provided".to_string(),
                    };
                    let reason = fallback_reason(node, why);
                    debug!(node = %current, next = %next, %reason, "fallback taken");
                    record_fallback(&mut fallbacks_used, node, &next, reason);
                    record_step(&mut history, node, answer, confidence);
                    current = next;
                }
                None => {
                    warn!(node = %current, ?answer, "dead end, aborting");
                    aborted = Some(AbortReason::NoMatchingBranch {
                        node: current.clone(),
                        answer: answer.clone(),
                    });
                    record_step(&mut history, node, answer, confidence);
                    break;
                }
            },
        }
    }

    Ok(ExecutionResult {
        path,
        path_history: history,
        confidence: tracker.value(),
        action,
        aborted,
        fallbacks_used,
        flagged_nodes,
        warnings,
    })
}

/// Look up the answer for a condition node: by question text first, then by
/// node id.
fn answer_for(node: &DecisionNode, context: &Context) -> Option<String> {
    context
        .get(&node.question)
        .or_else(|| context.get(&node.id.to_string()))
        .map(value_to_answer)
}

fn value_to_answer(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve an answer against a condition node's branch map.
///
/// Matching ladder: exact, case-insensitive, `regex:` branch patterns
/// (anchored at the start), substring in either direction. Within a stage,
/// labels are tried in sorted order so matching is deterministic. Branches
/// whose target no longer exists are skipped with a warning.
fn match_branch(
    tree: &DecisionTree,
    node: &DecisionNode,
    answer: &str,
    warnings: &mut Vec<String>,
) -> Option<(String, NodeId)> {
    let children = node.children()?;

    let mut labels: Vec<&String> = children.keys().collect();
    labels.sort();

    let resolve = |label: &String, warnings: &mut Vec<String>| -> Option<NodeId> {
        let target = &children[label.as_str()];
        if tree.get_node(target).is_some() {
            Some(target.clone())
        } else {
            warnings.push(format!(
                "branch '{}' of node {} points at missing node {}",
                label, node.id, target
            ));
            None
        }
    };

    // Exact match.
    for &label in &labels {
        if label.as_str() == answer {
            if let Some(target) = resolve(label, warnings) {
                return Some((label.clone(), target));
            }
        }
    }

    // Case-insensitive match.
    let answer_lower = answer.to_lowercase();
    for &label in &labels {
        if label.to_lowercase() == answer_lower {
            if let Some(target) = resolve(label, warnings) {
                return Some((label.clone(), target));
            }
        }
    }

    // Regex branch patterns, anchored at the start.
    for &label in &labels {
        let Some(pattern) = label.strip_prefix("regex:") else {
            continue;
        };
        match Regex::new(&format!("^(?:{})", pattern)) {
            Ok(re) if re.is_match(answer) => {
                if let Some(target) = resolve(label, warnings) {
                    return Some((label.clone(), target));
                }
            }
            Ok(_) => {}
            Err(_) => {
                warnings.push(format!(
                    "branch '{}' of node {} has an invalid pattern",
                    label, node.id
                ));
            }
        }
    }

    // Substring match in either direction, skipping regex branches.
    for &label in &labels {
        if label.starts_with("regex:") {
            continue;
        }
        let label_lower = label.to_lowercase();
        if answer_lower.contains(&label_lower) || label_lower.contains(&answer_lower) {
            if let Some(target) = resolve(label, warnings) {
                return Some((label.clone(), target));
            }
        }
    }

    None
}

/// The node's fallback target, if set and still present in the graph.
fn fallback_target(tree: &DecisionTree, node: &DecisionNode) -> Option<NodeId> {
    let target = node.fallback_node.as_ref()?;
    if tree.get_node(target).is_some() {
        Some(target.clone())
    } else {
        None
    }
}

fn fallback_reason(node: &DecisionNode, default: String) -> String {
    node.fallback_reason.clone().unwrap_or(default)
}

fn record_fallback(used: &mut Vec<FallbackUse>, node: &DecisionNode, to: &NodeId, reason: String) {
    used.push(FallbackUse {
        from: node.id.clone(),
        to: to.clone(),
        reason,
    });
}

fn record_step(
    history: &mut Vec<PathStep>,
    node: &DecisionNode,
    answer: Option<String>,
    confidence: f64,
) {
    history.push(PathStep {
        node: node.id.clone(),
        question: node.question.clone(),
        answer,
        confidence,
    });
}
