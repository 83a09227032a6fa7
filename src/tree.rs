//! Decision graph container and CRUD operations.
//!
//! Despite the name, a [`DecisionTree`] is a general directed graph: branch
//! and fallback edges may form cycles, and nothing here enforces acyclicity.
//! Termination is the responsibility of the traversal engine and renderer,
//! both of which carry explicit cycle guards.
//!
//! Removal is permissive: `remove_node` deletes the node only. References to
//! it left in other nodes' branch maps or fallback slots become dangling and
//! are treated as "edge absent" by every consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::{Error, Result};
use crate::node::{DecisionNode, NodeId, NodeKind};

/// A decision graph: named node store plus free-form metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    /// Human-readable name.
    pub name: String,

    /// Optional description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Free-form key/value metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,

    /// All nodes by id.
    pub nodes: HashMap<NodeId, DecisionNode>,

    /// The default entry point. Set to the first node added.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<NodeId>,

    /// When this graph was created.
    pub created_at: DateTime<Utc>,

    /// When this graph was last modified.
    pub updated_at: DateTime<Utc>,
}

impl DecisionTree {
    /// Create an empty graph.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: String::new(),
            metadata: None,
            nodes: HashMap::new(),
            root: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add graph-level metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    // ==================== Node Operations ====================

    /// Add a node to the graph, returning its id.
    ///
    /// The first node added becomes the root.
    pub fn add_node(&mut self, node: DecisionNode) -> NodeId {
        let id = node.id.clone();
        debug!(node = %id, question = %node.question, "adding node");
        self.nodes.insert(id.clone(), node);
        if self.root.is_none() {
            self.root = Some(id.clone());
        }
        self.touch();
        id
    }

    /// Add a condition node with the given question.
    pub fn add_condition(&mut self, question: impl Into<String>) -> NodeId {
        self.add_node(DecisionNode::condition(question))
    }

    /// Add an action node with the given label and action string.
    pub fn add_action(&mut self, label: impl Into<String>, action: impl Into<String>) -> NodeId {
        self.add_node(DecisionNode::action(label, action))
    }

    /// Get a node by id.
    pub fn get_node(&self, id: &NodeId) -> Option<&DecisionNode> {
        self.nodes.get(id)
    }

    /// Get a mutable node by id.
    pub fn get_node_mut(&mut self, id: &NodeId) -> Option<&mut DecisionNode> {
        self.nodes.get_mut(id)
    }

    /// Get the root node.
    pub fn root_node(&self) -> Option<&DecisionNode> {
        self.root.as_ref().and_then(|id| self.nodes.get(id))
    }

    /// Remove a node from the graph, returning it.
    ///
    /// Does not cascade: branch and fallback references to the removed id in
    /// other nodes are left dangling and treated as "edge absent" by the
    /// traversal engine and renderer. The root pointer is cleared if it
    /// referred to the removed node.
    pub fn remove_node(&mut self, id: &NodeId) -> Result<DecisionNode> {
        let node = self
            .nodes
            .remove(id)
            .ok_or_else(|| Error::node_not_found(id.to_string()))?;
        if self.root.as_ref() == Some(id) {
            self.root = None;
        }
        debug!(node = %id, "removed node, references left dangling");
        self.touch();
        Ok(node)
    }

    // ==================== Edge Operations ====================

    /// Insert or overwrite a branch `parent --answer--> child`.
    ///
    /// Linking the same answer label twice silently replaces the previous
    /// target (last write wins).
    pub fn link(
        &mut self,
        parent: &NodeId,
        answer: impl Into<String>,
        child: &NodeId,
    ) -> Result<()> {
        if !self.nodes.contains_key(child) {
            return Err(Error::node_not_found(child.to_string()));
        }
        let parent_node = self
            .nodes
            .get_mut(parent)
            .ok_or_else(|| Error::node_not_found(parent.to_string()))?;
        let answer = answer.into();
        match &mut parent_node.kind {
            NodeKind::Condition { children } => {
                if let Some(previous) = children.insert(answer.clone(), child.clone()) {
                    debug!(parent = %parent, %answer, %previous, new = %child, "branch replaced");
                } else {
                    debug!(parent = %parent, %answer, child = %child, "branch added");
                }
            }
            NodeKind::Action { .. } => {
                return Err(Error::not_a_condition(parent.to_string()));
            }
        }
        self.touch();
        Ok(())
    }

    /// Set the fallback edge of a node.
    pub fn set_fallback(
        &mut self,
        node: &NodeId,
        fallback: &NodeId,
        reason: impl Into<String>,
    ) -> Result<()> {
        if !self.nodes.contains_key(fallback) {
            return Err(Error::node_not_found(fallback.to_string()));
        }
        let n = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| Error::node_not_found(node.to_string()))?;
        n.fallback_node = Some(fallback.clone());
        n.fallback_reason = Some(reason.into());
        self.touch();
        Ok(())
    }

    /// Add a shared escalation action and wire it as the fallback of every
    /// dead-end condition node (no branches and no fallback).
    ///
    /// The new action carries a heavy confidence adjustment, so any path
    /// that lands on it reports low trust. Returns its id.
    pub fn add_global_fallback(&mut self, action: impl Into<String>) -> NodeId {
        let fallback = self.add_node(
            DecisionNode::action("Global Fallback", action)
                .with_confidence_adjustment(0.7)
                .with_metadata("is_global_fallback", true),
        );
        let dead_ends: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, node)| {
                node.fallback_node.is_none()
                    && node.children().map(|c| c.is_empty()).unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &dead_ends {
            if let Some(node) = self.nodes.get_mut(id) {
                node.fallback_node = Some(fallback.clone());
                node.fallback_reason = Some("Global fallback - no specific match".to_string());
            }
        }
        debug!(fallback = %fallback, dead_ends = dead_ends.len(), "global fallback wired");
        self.touch();
        fallback
    }

    // ==================== Analysis ====================

    /// Enumerate every root-to-leaf path, cycle-safe.
    ///
    /// Each path is the sequence of question texts, with `-> action` appended
    /// at action leaves and a loop marker where a branch re-enters a node
    /// already on the current path. Dangling branch targets are skipped.
    pub fn all_paths(&self) -> Vec<Vec<String>> {
        let Some(root) = self.root.clone() else {
            return Vec::new();
        };
        let mut paths = Vec::new();
        let mut on_path = HashSet::new();
        self.collect_paths(&root, &mut Vec::new(), &mut on_path, &mut paths);
        paths
    }

    fn collect_paths(
        &self,
        id: &NodeId,
        current: &mut Vec<String>,
        on_path: &mut HashSet<NodeId>,
        paths: &mut Vec<Vec<String>>,
    ) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        if on_path.contains(id) {
            let mut path = current.clone();
            path.push(format!("(loops back to {})", node.question));
            paths.push(path);
            return;
        }
        current.push(node.question.clone());
        match &node.kind {
            NodeKind::Action { action, .. } => {
                let mut path = current.clone();
                path.push(format!("-> {}", action));
                paths.push(path);
            }
            NodeKind::Condition { children } => {
                on_path.insert(id.clone());
                let mut live_branches = 0;
                for (answer, child) in children {
                    if self.nodes.contains_key(child) {
                        live_branches += 1;
                        current.push(format!("[{}]", answer));
                        self.collect_paths(child, current, on_path, paths);
                        current.pop();
                    }
                }
                if live_branches == 0 {
                    paths.push(current.clone());
                }
                on_path.remove(id);
            }
        }
        current.pop();
    }

    /// Analyze robustness: fallback and validation coverage, dead ends, and
    /// nodes demanding a high confidence floor.
    pub fn analyze_robustness(&self) -> RobustnessReport {
        let mut report = RobustnessReport {
            total_nodes: self.nodes.len(),
            ..Default::default()
        };

        for (id, node) in &self.nodes {
            if node.fallback_node.is_some() {
                report.nodes_with_fallback += 1;
            } else if let Some(children) = node.children() {
                if children.is_empty() {
                    report.dead_ends.push(id.clone());
                }
            }

            if !node.required_context.is_empty() || !node.context_validators.is_empty() {
                report.nodes_with_validation += 1;
            }

            if node.min_confidence > 0.7 {
                report
                    .high_threshold_nodes
                    .push((id.clone(), node.min_confidence));
            }
        }

        if report.total_nodes > 0 {
            let fallback = report.nodes_with_fallback as f64 / report.total_nodes as f64;
            let validation = report.nodes_with_validation as f64 / report.total_nodes as f64;
            report.coverage_score = (fallback + validation) / 2.0;
        }

        report
    }

    // ==================== Persistence ====================

    /// Export as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Import from JSON produced by [`to_json`](Self::to_json).
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Structural robustness summary of a graph.
#[derive(Debug, Clone, Default)]
pub struct RobustnessReport {
    /// Total number of nodes.
    pub total_nodes: usize,

    /// Nodes with a fallback edge.
    pub nodes_with_fallback: usize,

    /// Nodes with required context or validators.
    pub nodes_with_validation: usize,

    /// Condition nodes with no branches and no fallback.
    pub dead_ends: Vec<NodeId>,

    /// Nodes with `min_confidence` above 0.7, with the threshold.
    pub high_threshold_nodes: Vec<(NodeId, f64)>,

    /// Mean of fallback and validation coverage, in [0,1].
    pub coverage_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ContextValidator;

    #[test]
    fn test_first_node_becomes_root() {
        let mut tree = DecisionTree::new("Support");
        let root = tree.add_condition("issue_type");
        tree.add_action("Escalate", "Transfer to human agent");
        assert_eq!(tree.root, Some(root));
    }

    #[test]
    fn test_link_and_overwrite() {
        let mut tree = DecisionTree::new("t");
        let root = tree.add_condition("ok?");
        let a = tree.add_action("A", "continue");
        let b = tree.add_action("B", "escalate");

        tree.link(&root, "yes", &a).unwrap();
        assert_eq!(tree.get_node(&root).unwrap().children().unwrap()["yes"], a);

        // Last write wins
        tree.link(&root, "yes", &b).unwrap();
        assert_eq!(tree.get_node(&root).unwrap().children().unwrap()["yes"], b);
    }

    #[test]
    fn test_link_missing_node() {
        let mut tree = DecisionTree::new("t");
        let root = tree.add_condition("q");
        let ghost = NodeId::new();
        assert!(matches!(
            tree.link(&root, "yes", &ghost),
            Err(Error::NodeNotFound { .. })
        ));
        assert!(matches!(
            tree.link(&ghost, "yes", &root),
            Err(Error::NodeNotFound { .. })
        ));
    }

    #[test]
    fn test_link_from_action_rejected() {
        let mut tree = DecisionTree::new("t");
        let act = tree.add_action("A", "done");
        let other = tree.add_condition("q");
        assert!(matches!(
            tree.link(&act, "yes", &other),
            Err(Error::NotACondition { .. })
        ));
    }

    #[test]
    fn test_remove_leaves_dangling_reference() {
        let mut tree = DecisionTree::new("t");
        let root = tree.add_condition("q");
        let child = tree.add_action("A", "done");
        tree.link(&root, "yes", &child).unwrap();

        tree.remove_node(&child).unwrap();

        // The branch entry survives but points at nothing.
        let children = tree.get_node(&root).unwrap().children().unwrap();
        assert_eq!(children["yes"], child);
        assert!(tree.get_node(&child).is_none());
    }

    #[test]
    fn test_remove_root_clears_root_pointer() {
        let mut tree = DecisionTree::new("t");
        let root = tree.add_condition("q");
        tree.remove_node(&root).unwrap();
        assert!(tree.root.is_none());
    }

    #[test]
    fn test_remove_missing_node() {
        let mut tree = DecisionTree::new("t");
        assert!(matches!(
            tree.remove_node(&NodeId::new()),
            Err(Error::NodeNotFound { .. })
        ));
    }

    #[test]
    fn test_set_fallback() {
        let mut tree = DecisionTree::new("t");
        let root = tree.add_condition("q");
        let esc = tree.add_action("Escalate", "escalate");
        tree.set_fallback(&root, &esc, "Unknown issue type").unwrap();

        let node = tree.get_node(&root).unwrap();
        assert_eq!(node.fallback_node, Some(esc));
        assert_eq!(node.fallback_reason.as_deref(), Some("Unknown issue type"));
    }

    #[test]
    fn test_global_fallback_wires_dead_ends() {
        let mut tree = DecisionTree::new("t");
        let root = tree.add_condition("q1");
        let dead = tree.add_condition("q2");
        let covered = tree.add_condition("q3");
        let esc = tree.add_action("Escalate", "escalate");
        tree.link(&root, "next", &dead).unwrap();
        tree.link(&root, "other", &covered).unwrap();
        tree.set_fallback(&covered, &esc, "already covered").unwrap();

        let global = tree.add_global_fallback("Contact support");

        // Only the uncovered dead end is rewired.
        let node = tree.get_node(&dead).unwrap();
        assert_eq!(node.fallback_node, Some(global.clone()));
        assert_eq!(
            node.fallback_reason.as_deref(),
            Some("Global fallback - no specific match")
        );
        assert_eq!(
            tree.get_node(&covered).unwrap().fallback_node,
            Some(esc.clone())
        );
        assert!(tree.get_node(&root).unwrap().fallback_node.is_none());

        let fallback = tree.get_node(&global).unwrap();
        assert_eq!(fallback.action_text(), Some("Contact support"));
        assert_eq!(fallback.confidence_adjustment(), 0.7);
        assert!(tree.analyze_robustness().dead_ends.is_empty());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut tree = DecisionTree::new("Support")
            .with_description("Customer support playbook")
            .with_metadata("team", "tier-1");
        let root = tree.add_node(
            DecisionNode::condition("issue_type")
                .with_required_context("customer_id")
                .with_validator("customer_id", ContextValidator::parse("type:string").unwrap())
                .with_weight(0.9)
                .with_min_confidence(0.2),
        );
        let esc = tree.add_node(
            DecisionNode::action("Escalate", "Transfer to human agent")
                .with_confidence_adjustment(0.3),
        );
        tree.link(&root, "technical", &esc).unwrap();
        tree.set_fallback(&root, &esc, "Unknown issue").unwrap();

        let json = tree.to_json().unwrap();
        let back = DecisionTree::from_json(&json).unwrap();
        assert_eq!(back, tree);
    }

    #[test]
    fn test_all_paths_with_cycle() {
        let mut tree = DecisionTree::new("t");
        let root = tree.add_condition("start");
        let x = tree.add_condition("middle");
        let done = tree.add_action("Done", "finish");
        tree.link(&root, "go", &x).unwrap();
        tree.link(&x, "back", &root).unwrap();
        tree.link(&x, "end", &done).unwrap();

        let paths = tree.all_paths();
        assert_eq!(paths.len(), 2);
        assert!(paths
            .iter()
            .any(|p| p.last().unwrap().contains("loops back to start")));
        assert!(paths.iter().any(|p| p.last().unwrap() == "-> finish"));
    }

    #[test]
    fn test_robustness_report() {
        let mut tree = DecisionTree::new("t");
        let root = tree.add_node(
            DecisionNode::condition("q1").with_required_context("cpu"),
        );
        let dead = tree.add_condition("q2");
        let strict = tree.add_node(DecisionNode::condition("q3").with_min_confidence(0.9));
        let esc = tree.add_action("Escalate", "escalate");
        tree.link(&root, "next", &dead).unwrap();
        tree.link(&root, "strict", &strict).unwrap();
        tree.set_fallback(&strict, &esc, "low confidence").unwrap();

        let report = tree.analyze_robustness();
        assert_eq!(report.total_nodes, 4);
        assert_eq!(report.nodes_with_fallback, 1);
        assert_eq!(report.nodes_with_validation, 1);
        assert_eq!(report.dead_ends, vec![dead]);
        assert_eq!(report.high_threshold_nodes.len(), 1);
        assert!(report.coverage_score > 0.0);
    }
}
