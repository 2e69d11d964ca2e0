//! v3 graph execution support (spec §4.4.2): ready-set computation and the
//! final `skipped` classification.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{EdgeKind, GraphEdge, Workflow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    Succeeded,
    Failed,
}

/// Everything the ready-set computation needs: which nodes have completed
/// (and how), and the boolean result of every `condition` node evaluated so
/// far. Persisted as `runtime.graphV3` between stepper invocations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphState {
    pub completed: HashMap<String, NodeRunStatus>,
    pub condition_results: HashMap<String, bool>,
}

fn incoming_index(edges: &[GraphEdge]) -> HashMap<&str, Vec<&GraphEdge>> {
    let mut incoming: HashMap<&str, Vec<&GraphEdge>> = HashMap::new();
    for edge in edges {
        incoming.entry(edge.to.as_str()).or_default().push(edge);
    }
    incoming
}

fn edge_satisfied(edge: &GraphEdge, state: &GraphState) -> bool {
    match state.completed.get(&edge.from) {
        Some(NodeRunStatus::Succeeded) => match edge.kind {
            EdgeKind::Always => true,
            EdgeKind::CondTrue => state.condition_results.get(&edge.from) == Some(&true),
            EdgeKind::CondFalse => state.condition_results.get(&edge.from) == Some(&false),
        },
        _ => false,
    }
}

/// The ids of `node_id`'s upstream predecessors whose edge is currently
/// satisfied, i.e. the branches a `parallel.join` has actually seen arrive.
/// Empty for a node with no incoming edges.
pub fn satisfied_incoming(workflow: &Workflow, node_id: &str, state: &GraphState) -> Vec<String> {
    let incoming = incoming_index(&workflow.definition.edges);
    incoming
        .get(node_id)
        .map(|edges| edges.iter().filter(|e| edge_satisfied(e, state)).map(|e| e.from.clone()).collect())
        .unwrap_or_default()
}

/// Nodes with every incoming edge satisfied and not yet completed, sorted
/// lexicographically by id (the stepper's deterministic tie-break).
pub fn ready_nodes(workflow: &Workflow, state: &GraphState) -> Vec<String> {
    let incoming = incoming_index(&workflow.definition.edges);
    let mut ready: Vec<String> = workflow
        .definition
        .nodes
        .iter()
        .filter(|node| !state.completed.contains_key(&node.id))
        .filter(|node| match incoming.get(node.id.as_str()) {
            None => true,
            Some(edges) => edges.iter().all(|e| edge_satisfied(e, state)),
        })
        .map(|node| node.id.clone())
        .collect();
    ready.sort();
    ready
}

/// Stable reason codes for a node that never ran once the graph settles.
/// `CONDITION_NOT_MET` refines `DEPENDENCIES_NOT_SATISFIED` for the common
/// single-branch case so it matches the condition-pruning scenario in the
/// testable-properties section verbatim; joins with multiple unsatisfied
/// incoming edges fall back to the general code.
pub fn classify_skipped(workflow: &Workflow, state: &GraphState) -> HashMap<String, &'static str> {
    let incoming = incoming_index(&workflow.definition.edges);
    workflow
        .definition
        .nodes
        .iter()
        .filter(|node| !state.completed.contains_key(&node.id))
        .map(|node| {
            let reason = match incoming.get(node.id.as_str()) {
                None => "NOT_REACHED",
                Some(edges) => {
                    let all_upstream_completed = edges.iter().all(|e| state.completed.contains_key(&e.from));
                    if !all_upstream_completed {
                        "NOT_REACHED"
                    } else if edges.len() == 1 && matches!(edges[0].kind, EdgeKind::CondTrue | EdgeKind::CondFalse) {
                        "CONDITION_NOT_MET"
                    } else {
                        "DEPENDENCIES_NOT_SATISFIED"
                    }
                }
            };
            (node.id.clone(), reason)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DslVersion, NodeDefinition, Trigger, WorkflowDefinition, WorkflowStatus};
    use chrono::Utc;
    use uuid::Uuid;

    fn node(id: &str, node_type: &str) -> NodeDefinition {
        NodeDefinition { id: id.to_string(), node_type: node_type.to_string(), config: serde_json::Value::Null }
    }

    fn workflow(nodes: Vec<NodeDefinition>, edges: Vec<GraphEdge>) -> Workflow {
        Workflow {
            id: Uuid::new_v4(),
            workflow_key: Uuid::new_v4(),
            name: "test".into(),
            version: 1,
            dsl_version: DslVersion::V3,
            status: WorkflowStatus::Published,
            definition: WorkflowDefinition { trigger: Trigger::Manual, nodes, edges },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn entry_nodes_are_ready_immediately() {
        let wf = workflow(vec![node("a", "condition"), node("b", "http.request")], vec![]);
        let ready = ready_nodes(&wf, &GraphState::default());
        assert_eq!(ready, vec!["a", "b"]);
    }

    #[test]
    fn condition_pruning_marks_false_branch_skipped() {
        let wf = workflow(
            vec![node("cond", "condition"), node("a", "http.request"), node("b", "http.request")],
            vec![
                GraphEdge { from: "cond".into(), to: "a".into(), kind: EdgeKind::CondTrue },
                GraphEdge { from: "cond".into(), to: "b".into(), kind: EdgeKind::CondFalse },
            ],
        );
        let mut state = GraphState::default();
        state.completed.insert("cond".to_string(), NodeRunStatus::Succeeded);
        state.condition_results.insert("cond".to_string(), true);

        let ready = ready_nodes(&wf, &state);
        assert_eq!(ready, vec!["a"]);

        state.completed.insert("a".to_string(), NodeRunStatus::Succeeded);
        let skipped = classify_skipped(&wf, &state);
        assert_eq!(skipped.get("b"), Some(&"CONDITION_NOT_MET"));
    }

    #[test]
    fn join_waits_for_all_incoming_edges() {
        let wf = workflow(
            vec![node("a", "http.request"), node("b", "http.request"), node("join", "parallel.join")],
            vec![
                GraphEdge { from: "a".into(), to: "join".into(), kind: EdgeKind::Always },
                GraphEdge { from: "b".into(), to: "join".into(), kind: EdgeKind::Always },
            ],
        );
        let mut state = GraphState::default();
        state.completed.insert("a".to_string(), NodeRunStatus::Succeeded);
        assert!(ready_nodes(&wf, &state).iter().all(|id| id != "join"));

        state.completed.insert("b".to_string(), NodeRunStatus::Succeeded);
        assert!(ready_nodes(&wf, &state).contains(&"join".to_string()));
    }

    #[test]
    fn satisfied_incoming_lists_only_arrived_branches() {
        let wf = workflow(
            vec![node("a", "http.request"), node("b", "http.request"), node("join", "parallel.join")],
            vec![
                GraphEdge { from: "a".into(), to: "join".into(), kind: EdgeKind::Always },
                GraphEdge { from: "b".into(), to: "join".into(), kind: EdgeKind::Always },
            ],
        );
        let mut state = GraphState::default();
        assert!(satisfied_incoming(&wf, "join", &state).is_empty());

        state.completed.insert("a".to_string(), NodeRunStatus::Succeeded);
        assert_eq!(satisfied_incoming(&wf, "join", &state), vec!["a".to_string()]);

        state.completed.insert("b".to_string(), NodeRunStatus::Succeeded);
        let mut both = satisfied_incoming(&wf, "join", &state);
        both.sort();
        assert_eq!(both, vec!["a".to_string(), "b".to_string()]);
    }
}
