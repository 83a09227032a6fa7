//! Cycle-safe rendering of decision graphs.
//!
//! All three formats (ASCII tree, Mermaid, DOT) walk the graph depth-first
//! with an explicit "currently on path" set. A branch that re-enters a node
//! already on the recursion path emits a loop marker instead of recursing,
//! so rendering terminates on any graph. Convergent re-visits from sibling
//! branches are allowed: in ASCII the shared subtree is drawn again, in
//! Mermaid and DOT only the connecting edge is re-emitted.
//!
//! Branch targets that no longer exist in the graph are skipped.

use std::collections::HashSet;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::node::{DecisionNode, NodeId, NodeKind};
use crate::tree::DecisionTree;

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderFormat {
    /// Indented tree for terminal display.
    Ascii,
    /// Mermaid `graph TD` diagram.
    Mermaid,
    /// Graphviz DOT digraph.
    Dot,
}

impl FromStr for RenderFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ascii" => Ok(Self::Ascii),
            "mermaid" => Ok(Self::Mermaid),
            "dot" => Ok(Self::Dot),
            other => Err(format!("unsupported render format: {}", other)),
        }
    }
}

impl std::fmt::Display for RenderFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ascii => write!(f, "ascii"),
            Self::Mermaid => write!(f, "mermaid"),
            Self::Dot => write!(f, "dot"),
        }
    }
}

/// Render a graph from `root` in the given format.
///
/// Fails only if `root` is not present in the graph; cyclic input always
/// renders completely, with loop markers where back-edges were cut.
pub fn render(tree: &DecisionTree, format: RenderFormat, root: &NodeId) -> Result<String> {
    if tree.get_node(root).is_none() {
        return Err(Error::node_not_found(root.to_string()));
    }
    Ok(match format {
        RenderFormat::Ascii => render_ascii(tree, root),
        RenderFormat::Mermaid => render_mermaid(tree, root),
        RenderFormat::Dot => render_dot(tree, root),
    })
}

fn sorted_children<'a>(node: &'a DecisionNode) -> Vec<(&'a String, &'a NodeId)> {
    let mut entries: Vec<_> = match &node.kind {
        NodeKind::Condition { children } => children.iter().collect(),
        NodeKind::Action { .. } => Vec::new(),
    };
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

// ==================== ASCII ====================

fn render_ascii(tree: &DecisionTree, root: &NodeId) -> String {
    let mut lines = vec![format!("Tree: {}", tree.name)];
    if !tree.description.is_empty() {
        lines.push(format!("  {}", tree.description));
    }
    lines.push(String::new());

    let root_node = &tree.nodes[root];
    lines.push(format!("Root: {}", ascii_node_text(root_node)));

    let mut on_path = HashSet::new();
    on_path.insert(root.clone());
    let children = sorted_children(root_node);
    let count = children.len();
    for (i, (answer, child)) in children.into_iter().enumerate() {
        let is_last = i == count - 1;
        draw_ascii(tree, child, "", is_last, answer, &mut on_path, &mut lines);
    }

    lines.join("\n")
}

fn ascii_node_text(node: &DecisionNode) -> String {
    let question = truncate(&node.question, 40);
    match &node.kind {
        NodeKind::Action { action, .. } => format!("{} -> {}", question, truncate(action, 40)),
        NodeKind::Condition { .. } => question,
    }
}

fn draw_ascii(
    tree: &DecisionTree,
    id: &NodeId,
    prefix: &str,
    is_last: bool,
    answer: &str,
    on_path: &mut HashSet<NodeId>,
    lines: &mut Vec<String>,
) {
    let Some(node) = tree.get_node(id) else {
        return;
    };
    let connector = if is_last { "`-- " } else { "|-- " };

    if on_path.contains(id) {
        lines.push(format!(
            "{}{}[{}] (loops back to: {})",
            prefix,
            connector,
            answer,
            truncate(&node.question, 40)
        ));
        return;
    }

    lines.push(format!(
        "{}{}[{}] {}",
        prefix,
        connector,
        answer,
        ascii_node_text(node)
    ));

    on_path.insert(id.clone());
    let extension = if is_last { "    " } else { "|   " };
    let child_prefix = format!("{}{}", prefix, extension);
    let children = sorted_children(node);
    let count = children.len();
    for (i, (child_answer, child)) in children.into_iter().enumerate() {
        let last = i == count - 1;
        draw_ascii(tree, child, &child_prefix, last, child_answer, on_path, lines);
    }
    on_path.remove(id);
}

// ==================== Mermaid ====================

fn mermaid_id(id: &NodeId) -> String {
    format!("{}", id.0.as_simple())
}

fn mermaid_label(text: &str) -> String {
    truncate(text, 50).replace('"', "'").replace('\n', " ")
}

fn render_mermaid(tree: &DecisionTree, root: &NodeId) -> String {
    let mut defs = Vec::new();
    let mut edges = Vec::new();
    let mut emitted_order = Vec::new();
    let mut emitted = HashSet::new();
    let mut on_path = HashSet::new();

    walk_mermaid(
        tree,
        root,
        &mut on_path,
        &mut emitted,
        &mut emitted_order,
        &mut defs,
        &mut edges,
    );

    let mut out = String::from("graph TD\n");
    for def in &defs {
        out.push_str(def);
        out.push('\n');
    }
    out.push('\n');
    for edge in &edges {
        out.push_str(edge);
        out.push('\n');
    }

    out.push_str("\n    classDef condition fill:#87CEEB\n");
    out.push_str("    classDef action fill:#90EE90\n");
    for id in &emitted_order {
        let class = if tree.nodes[id].is_action() {
            "action"
        } else {
            "condition"
        };
        out.push_str(&format!("    class {} {}\n", mermaid_id(id), class));
    }
    out
}

fn walk_mermaid(
    tree: &DecisionTree,
    id: &NodeId,
    on_path: &mut HashSet<NodeId>,
    emitted: &mut HashSet<NodeId>,
    emitted_order: &mut Vec<NodeId>,
    defs: &mut Vec<String>,
    edges: &mut Vec<String>,
) {
    let Some(node) = tree.get_node(id) else {
        return;
    };
    if emitted.insert(id.clone()) {
        emitted_order.push(id.clone());
        let def = match &node.kind {
            NodeKind::Condition { .. } => format!(
                "    {}{{\"{}\"}}",
                mermaid_id(id),
                mermaid_label(&node.question)
            ),
            NodeKind::Action { action, .. } => format!(
                "    {}[\"{}: {}\"]",
                mermaid_id(id),
                mermaid_label(&node.question),
                mermaid_label(action)
            ),
        };
        defs.push(def);
    }

    on_path.insert(id.clone());
    for (answer, child) in sorted_children(node) {
        if tree.get_node(child).is_none() {
            continue;
        }
        let label = mermaid_label(answer);
        if on_path.contains(child) {
            // Back-edge: dashed, marked as a cycle, never recursed into.
            edges.push(format!(
                "    {} -.->|cycle: {}| {}",
                mermaid_id(id),
                label,
                mermaid_id(child)
            ));
        } else {
            edges.push(format!(
                "    {} -->|{}| {}",
                mermaid_id(id),
                label,
                mermaid_id(child)
            ));
            if !emitted.contains(child) {
                walk_mermaid(tree, child, on_path, emitted, emitted_order, defs, edges);
            }
        }
    }
    on_path.remove(id);
}

// ==================== DOT ====================

fn dot_id(id: &NodeId) -> String {
    format!("n{}", id.0.as_simple())
}

fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn render_dot(tree: &DecisionTree, root: &NodeId) -> String {
    let mut defs = Vec::new();
    let mut edges = Vec::new();
    let mut emitted = HashSet::new();
    let mut on_path = HashSet::new();

    walk_dot(tree, root, &mut on_path, &mut emitted, &mut defs, &mut edges);

    let mut out = String::from("digraph DecisionTree {\n");
    out.push_str("    rankdir=TB;\n");
    out.push_str("    node [fontname=\"Helvetica\", fontsize=12, style=filled];\n");
    out.push_str("    edge [fontname=\"Helvetica\", fontsize=10];\n");
    out.push('\n');
    for def in &defs {
        out.push_str(def);
        out.push('\n');
    }
    out.push('\n');
    for edge in &edges {
        out.push_str(edge);
        out.push('\n');
    }
    out.push_str("}\n");
    out
}

fn walk_dot(
    tree: &DecisionTree,
    id: &NodeId,
    on_path: &mut HashSet<NodeId>,
    emitted: &mut HashSet<NodeId>,
    defs: &mut Vec<String>,
    edges: &mut Vec<String>,
) {
    let Some(node) = tree.get_node(id) else {
        return;
    };
    if emitted.insert(id.clone()) {
        let def = match &node.kind {
            NodeKind::Condition { .. } => format!(
                "    {} [label=\"{}\", shape=diamond, fillcolor=\"#87CEEB\"];",
                dot_id(id),
                escape_dot(&truncate(&node.question, 40))
            ),
            NodeKind::Action { action, .. } => format!(
                "    {} [label=\"{}\\n-> {}\", shape=box, fillcolor=\"#90EE90\"];",
                dot_id(id),
                escape_dot(&truncate(&node.question, 40)),
                escape_dot(&truncate(action, 40))
            ),
        };
        defs.push(def);
    }

    on_path.insert(id.clone());
    for (answer, child) in sorted_children(node) {
        if tree.get_node(child).is_none() {
            continue;
        }
        let label = escape_dot(answer);
        if on_path.contains(child) {
            edges.push(format!(
                "    {} -> {} [label=\"{}\", style=dashed, color=\"#DC143C\", xlabel=\"cycle\"];",
                dot_id(id),
                dot_id(child),
                label
            ));
        } else {
            edges.push(format!(
                "    {} -> {} [label=\"{}\"];",
                dot_id(id),
                dot_id(child),
                label
            ));
            if !emitted.contains(child) {
                walk_dot(tree, child, on_path, emitted, defs, edges);
            }
        }
    }
    on_path.remove(id);
}
