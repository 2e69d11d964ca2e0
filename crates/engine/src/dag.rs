//! DSL validation (spec §3), run at publish time and again before a run
//! starts. v2 only needs unique node ids; v3 additionally validates its
//! edge set: endpoints exist, no cycles, every node reachable from the
//! entry set (nodes with no incoming edge), and conditional edges only
//! originate from `condition` nodes.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::{EdgeKind, Workflow};
use crate::EngineError;

/// Validate a workflow's DSL. Returns the v2 execution order (index order)
/// for `v2` workflows; for `v3` the order is meaningless (the graph stepper
/// computes ready sets itself) and an empty vec is returned.
pub fn validate_dag(workflow: &Workflow) -> Result<Vec<String>, EngineError> {
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &workflow.definition.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            return Err(EngineError::DuplicateNodeId(node.id.clone()));
        }
    }

    match workflow.dsl_version {
        crate::models::DslVersion::V2 => Ok(workflow.definition.nodes.iter().map(|n| n.id.clone()).collect()),
        crate::models::DslVersion::V3 => {
            validate_v3_edges(workflow)?;
            Ok(Vec::new())
        }
    }
}

fn validate_v3_edges(workflow: &Workflow) -> Result<(), EngineError> {
    let nodes = &workflow.definition.nodes;
    let node_set: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let node_type: HashMap<&str, &str> = nodes.iter().map(|n| (n.id.as_str(), n.node_type.as_str())).collect();

    for edge in &workflow.definition.edges {
        if !node_set.contains(edge.from.as_str()) {
            return Err(EngineError::UnknownNodeReference { node_id: edge.from.clone(), side: "from" });
        }
        if !node_set.contains(edge.to.as_str()) {
            return Err(EngineError::UnknownNodeReference { node_id: edge.to.clone(), side: "to" });
        }
        if matches!(edge.kind, EdgeKind::CondTrue | EdgeKind::CondFalse) && node_type.get(edge.from.as_str()) != Some(&"condition") {
            return Err(EngineError::ConditionalEdgeFromNonCondition(edge.from.clone()));
        }
    }

    // Cycle check via Kahn's algorithm.
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    for node in nodes {
        adjacency.entry(node.id.as_str()).or_default();
        in_degree.entry(node.id.as_str()).or_insert(0);
    }
    for edge in &workflow.definition.edges {
        adjacency.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
        *in_degree.entry(edge.to.as_str()).or_insert(0) += 1;
    }

    let mut queue: VecDeque<&str> = in_degree.iter().filter(|(_, &d)| d == 0).map(|(&id, _)| id).collect();
    let entry: HashSet<&str> = queue.iter().copied().collect();
    let mut visited: HashSet<&str> = HashSet::new();

    while let Some(node_id) = queue.pop_front() {
        visited.insert(node_id);
        if let Some(neighbours) = adjacency.get(node_id) {
            for &neighbour in neighbours {
                let deg = in_degree.entry(neighbour).or_insert(0);
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(neighbour);
                }
            }
        }
    }

    if visited.len() != nodes.len() {
        return Err(EngineError::CycleDetected);
    }

    if entry.is_empty() && !nodes.is_empty() {
        return Err(EngineError::CycleDetected);
    }

    // Reachability from the entry set (already implied by the topological
    // visit above reaching every node, but kept as an explicit named check
    // per spec's "every node reachable from entry" invariant).
    let mut reachable: HashSet<&str> = HashSet::new();
    let mut frontier: VecDeque<&str> = entry.iter().copied().collect();
    while let Some(node_id) = frontier.pop_front() {
        if !reachable.insert(node_id) {
            continue;
        }
        if let Some(neighbours) = adjacency.get(node_id) {
            for &neighbour in neighbours {
                frontier.push_back(neighbour);
            }
        }
    }
    if let Some(unreachable) = nodes.iter().find(|n| !reachable.contains(n.id.as_str())) {
        return Err(EngineError::UnreachableNode(unreachable.id.clone()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DslVersion, GraphEdge, NodeDefinition, Trigger, WorkflowDefinition, WorkflowStatus};
    use chrono::Utc;
    use uuid::Uuid;

    fn node(id: &str, node_type: &str) -> NodeDefinition {
        NodeDefinition { id: id.to_string(), node_type: node_type.to_string(), config: serde_json::Value::Null }
    }

    fn workflow(dsl_version: DslVersion, nodes: Vec<NodeDefinition>, edges: Vec<GraphEdge>) -> Workflow {
        Workflow {
            id: Uuid::new_v4(),
            workflow_key: Uuid::new_v4(),
            name: "test".into(),
            version: 1,
            dsl_version,
            status: WorkflowStatus::Published,
            definition: WorkflowDefinition { trigger: Trigger::Manual, nodes, edges },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn v2_linear_order_is_index_order() {
        let wf = workflow(DslVersion::V2, vec![node("a", "http.request"), node("b", "shell.run")], vec![]);
        let order = validate_dag(&wf).unwrap();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn v3_valid_diamond() {
        let wf = workflow(
            DslVersion::V3,
            vec![node("a", "condition"), node("b", "http.request"), node("c", "http.request"), node("d", "parallel.join")],
            vec![
                GraphEdge { from: "a".into(), to: "b".into(), kind: EdgeKind::CondTrue },
                GraphEdge { from: "a".into(), to: "c".into(), kind: EdgeKind::CondFalse },
                GraphEdge { from: "b".into(), to: "d".into(), kind: EdgeKind::Always },
                GraphEdge { from: "c".into(), to: "d".into(), kind: EdgeKind::Always },
            ],
        );
        assert!(validate_dag(&wf).is_ok());
    }

    #[test]
    fn v3_conditional_edge_from_non_condition_is_rejected() {
        let wf = workflow(
            DslVersion::V3,
            vec![node("a", "http.request"), node("b", "http.request")],
            vec![GraphEdge { from: "a".into(), to: "b".into(), kind: EdgeKind::CondTrue }],
        );
        assert!(matches!(validate_dag(&wf), Err(EngineError::ConditionalEdgeFromNonCondition(id)) if id == "a"));
    }

    #[test]
    fn v3_cycle_is_detected() {
        let wf = workflow(
            DslVersion::V3,
            vec![node("a", "http.request"), node("b", "http.request")],
            vec![
                GraphEdge { from: "a".into(), to: "b".into(), kind: EdgeKind::Always },
                GraphEdge { from: "b".into(), to: "a".into(), kind: EdgeKind::Always },
            ],
        );
        assert!(matches!(validate_dag(&wf), Err(EngineError::CycleDetected)));
    }

    #[test]
    fn v3_disconnected_root_is_its_own_entry_and_still_valid() {
        // `orphan` has no incoming edge, so it's part of the entry set and
        // valid on its own even though nothing connects it to `a`/`b`.
        let wf = workflow(
            DslVersion::V3,
            vec![node("a", "http.request"), node("b", "http.request"), node("orphan", "http.request")],
            vec![GraphEdge { from: "a".into(), to: "b".into(), kind: EdgeKind::Always }],
        );
        assert!(validate_dag(&wf).is_ok());
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let wf = workflow(DslVersion::V2, vec![node("a", "http.request"), node("a", "http.request")], vec![]);
        assert!(matches!(validate_dag(&wf), Err(EngineError::DuplicateNodeId(id)) if id == "a"));
    }
}
