//! Property-based tests for the decision-graph engine using proptest.
//!
//! These validate the engine's universal guarantees:
//!
//! - Traversal visits at most `nodes.len()` nodes, even on fully cyclic
//!   graphs (the cycle guard bounds execution).
//! - Rendering terminates on cyclic graphs in every format.
//! - Aggregate confidence never increases along a path.
//! - A fallback edge always absorbs unmatched answers.
//! - Graph structure survives a JSON round-trip.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use crate::node::{DecisionNode, NodeId};
    use crate::render::{render, RenderFormat};
    use crate::traverse::{traverse, Context};
    use crate::tree::DecisionTree;

    /// A ring of n condition nodes, each answering "next" into the next one.
    fn ring(n: usize) -> (DecisionTree, Vec<NodeId>) {
        let mut tree = DecisionTree::new("ring");
        let ids: Vec<NodeId> = (0..n)
            .map(|i| tree.add_condition(format!("q{}", i)))
            .collect();
        for i in 0..n {
            tree.link(&ids[i], "next", &ids[(i + 1) % n]).unwrap();
        }
        (tree, ids)
    }

    fn ring_context(n: usize) -> Context {
        (0..n).map(|i| (format!("q{}", i), json!("next"))).collect()
    }

    proptest! {
        /// Cycle guard: traversal of a fully cyclic graph visits every node
        /// at most once and never loops.
        #[test]
        fn traversal_bounded_by_node_count(n in 1usize..40) {
            let (tree, ids) = ring(n);
            let result = traverse(&tree, &ids[0], &ring_context(n)).unwrap();

            prop_assert!(result.path.len() <= n);
            prop_assert!(!result.completed());
            // Every visited id is distinct.
            let mut seen = std::collections::HashSet::new();
            for id in &result.path {
                prop_assert!(seen.insert(id.clone()));
            }
        }

        /// Rendering always terminates on cyclic input, in every format.
        #[test]
        fn render_terminates_on_cycles(n in 1usize..25) {
            let (tree, ids) = ring(n);
            for format in [RenderFormat::Ascii, RenderFormat::Mermaid, RenderFormat::Dot] {
                let out = render(&tree, format, &ids[0]).unwrap();
                prop_assert!(!out.is_empty());
            }
        }

        /// Confidence monotonicity: the running score recorded at step n+1
        /// is never above the score at step n, whatever the weights.
        #[test]
        fn confidence_never_increases(
            weights in prop::collection::vec(0.1f64..2.0, 1..12)
        ) {
            let mut tree = DecisionTree::new("chain");
            let ids: Vec<NodeId> = weights
                .iter()
                .enumerate()
                .map(|(i, w)| {
                    tree.add_node(DecisionNode::condition(format!("s{}", i)).with_weight(*w))
                })
                .collect();
            let done = tree.add_action("Done", "finish");
            for i in 0..ids.len() {
                let next = ids.get(i + 1).unwrap_or(&done);
                tree.link(&ids[i], "next", next).unwrap();
            }
            let context: Context = (0..ids.len())
                .map(|i| (format!("s{}", i), json!("next")))
                .collect();

            let result = traverse(&tree, &ids[0], &context).unwrap();
            prop_assert!(result.completed());
            for pair in result.path_history.windows(2) {
                prop_assert!(pair[1].confidence <= pair[0].confidence + 1e-12);
            }
            prop_assert!((0.0..=1.0).contains(&result.confidence));
        }

        /// Fallback precedence: an answer matching no branch always routes
        /// through the fallback, never aborting with NoMatchingBranch.
        #[test]
        fn fallback_absorbs_unmatched_answers(answer in "[0-9]{3}") {
            let mut tree = DecisionTree::new("t");
            let root = tree.add_condition("q");
            let a = tree.add_action("A", "alpha-path");
            let b = tree.add_action("B", "beta-path");
            let esc = tree.add_action("Escalate", "escalate");
            tree.link(&root, "alpha", &a).unwrap();
            tree.link(&root, "beta", &b).unwrap();
            tree.set_fallback(&root, &esc, "unmatched").unwrap();

            let context: Context = [("q".to_string(), json!(answer))].into_iter().collect();
            let result = traverse(&tree, &root, &context).unwrap();

            prop_assert!(result.completed());
            prop_assert_eq!(result.action.as_deref(), Some("escalate"));
            prop_assert!(result.aborted.is_none());
        }

        /// Graph structure survives serialize/deserialize unchanged.
        #[test]
        fn json_roundtrip_preserves_structure(
            questions in prop::collection::vec("[a-z]{1,8}", 1..8),
            weight in 0.1f64..1.5,
            min_confidence in 0.0f64..1.0,
        ) {
            let mut tree = DecisionTree::new("rt");
            let ids: Vec<NodeId> = questions
                .iter()
                .map(|q| {
                    tree.add_node(
                        DecisionNode::condition(q.clone())
                            .with_weight(weight)
                            .with_min_confidence(min_confidence)
                            .with_required_context("cpu"),
                    )
                })
                .collect();
            let done = tree.add_action("Done", "finish");
            for i in 0..ids.len() {
                let next = ids.get(i + 1).unwrap_or(&done);
                tree.link(&ids[i], "next", next).unwrap();
            }
            tree.set_fallback(&ids[0], &done, "bail").unwrap();

            let json = tree.to_json().unwrap();
            let back = DecisionTree::from_json(&json).unwrap();
            prop_assert_eq!(back, tree);
        }
    }
}
