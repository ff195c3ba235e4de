//! Bounded breadth-first traversal over the relationship graph.

use std::collections::HashSet;
use std::future::Future;

use crate::errors::KnowledgeResult;
use crate::models::KnowledgeNode;

/// Collect the distinct nodes reachable from `root_id` within `depth` hops.
///
/// `load_neighbors` returns the nodes adjacent to a given id. The root is
/// never part of the result and every node appears at most once, in
/// breadth-first order, so cycles terminate.
pub async fn expand_related<F, Fut>(
    root_id: &str,
    depth: u8,
    mut load_neighbors: F,
) -> KnowledgeResult<Vec<KnowledgeNode>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = KnowledgeResult<Vec<KnowledgeNode>>>,
{
    let mut visited = HashSet::new();
    visited.insert(root_id.to_string());
    let mut frontier = vec![root_id.to_string()];
    let mut results = Vec::new();
    let mut remaining_depth = depth;

    while remaining_depth > 0 && !frontier.is_empty() {
        let mut next_frontier = Vec::new();
        for node_id in frontier {
            for neighbor in load_neighbors(node_id).await? {
                if visited.insert(neighbor.id.clone()) {
                    next_frontier.push(neighbor.id.clone());
                    results.push(neighbor);
                }
            }
        }
        frontier = next_frontier;
        remaining_depth -= 1;
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::models::{KnowledgeType, NewKnowledgeNode};

    fn node(id: &str) -> KnowledgeNode {
        let mut node = NewKnowledgeNode::new(id, KnowledgeType::Disease)
            .into_node(None)
            .unwrap();
        node.id = id.to_string();
        node
    }

    /// a - b - c - d, plus a cycle c - a
    fn adjacency() -> HashMap<&'static str, Vec<&'static str>> {
        HashMap::from([
            ("a", vec!["b", "c"]),
            ("b", vec!["a", "c"]),
            ("c", vec!["b", "d", "a"]),
            ("d", vec!["c"]),
        ])
    }

    async fn run(root: &str, depth: u8) -> Vec<String> {
        let graph = adjacency();
        expand_related(root, depth, |id| {
            let neighbors: Vec<KnowledgeNode> = graph
                .get(id.as_str())
                .map(|ids| ids.iter().map(|n| node(n)).collect())
                .unwrap_or_default();
            async move { Ok(neighbors) }
        })
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect()
    }

    #[tokio::test]
    async fn test_depth_bounds_traversal() {
        assert_eq!(run("d", 1).await, vec!["c"]);
        assert_eq!(run("d", 2).await, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_cycles_visit_each_node_once_and_skip_root() {
        let reached = run("a", 5).await;
        assert_eq!(reached, vec!["b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_zero_depth_returns_nothing() {
        assert!(run("a", 0).await.is_empty());
    }
}
