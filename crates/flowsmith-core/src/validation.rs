use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::catalog::NodeTypeDescription;
use crate::graph::{Connection, WorkflowGraph, is_trigger_type};
use crate::merge::{ProposedGraph, normalize};
use crate::ports::{ServiceKind, ServicePortContract};

pub const SUGGEST_FIX_ERRORS: &str = "Fix the errors above and call validate_workflow again.";
pub const SUGGEST_ADDRESS_WARNINGS: &str =
    "Address the warnings, then call build_workflow to finalize.";
pub const SUGGEST_FINALIZE: &str = "The workflow is valid. Call build_workflow to finalize.";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationIssue {
    #[error("No workflow provided. Pass the candidate graph in the 'graph' argument.")]
    NoWorkflow,

    #[error("Workflow must be a JSON object with 'nodes' and 'connections' arrays")]
    NotAnObject,

    #[error("Workflow is missing a '{0}' array")]
    MissingArray(&'static str),

    #[error("Malformed entry: {0}")]
    Malformed(String),

    #[error("Duplicate node id '{0}'")]
    DuplicateNodeId(String),

    #[error("Workflow has no trigger node. Add a trigger (manual, schedule or webhook) to start it")]
    NoTrigger,

    #[error("Connection {connection} references unknown node '{node_id}'")]
    UnknownNode { connection: String, node_id: String },

    #[error("Connection {connection}: sourceOutput must be '{expected}' (found '{found}')")]
    SourcePortMismatch {
        connection: String,
        expected: ServiceKind,
        found: String,
    },

    #[error("Connection {connection}: targetInput must be '{expected}' (found '{found}')")]
    TargetPortMismatch {
        connection: String,
        expected: ServiceKind,
        found: String,
    },

    #[error("Connection {connection}: node '{node}' does not accept '{service}' inputs")]
    ServiceNotAccepted {
        connection: String,
        node: String,
        service: ServiceKind,
    },

    #[error("Node '{node}' is missing required input '{input}'")]
    MissingServiceInput { node: String, input: ServiceKind },

    #[error("Node '{node}' is missing required parameter '{parameter}'")]
    MissingParameter { node: String, parameter: String },

    #[error("Node '{0}' is not connected to any other node")]
    Orphan(String),

    #[error("Connection {0} is duplicated")]
    DuplicateConnection(String),
}

impl ValidationIssue {
    /// Warnings do not block finalizing the workflow.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            ValidationIssue::Orphan(_) | ValidationIssue::DuplicateConnection(_)
        )
    }
}

/// Findings fed back to the model. Always carries at least one suggestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ValidationReport {
    fn from_issues(issues: &[ValidationIssue]) -> Self {
        let (warnings, errors): (Vec<_>, Vec<_>) = issues.iter().partition(|i| i.is_warning());
        let errors: Vec<String> = errors.iter().map(|i| i.to_string()).collect();
        let warnings: Vec<String> = warnings.iter().map(|i| i.to_string()).collect();

        let suggestion = if !errors.is_empty() {
            SUGGEST_FIX_ERRORS
        } else if !warnings.is_empty() {
            SUGGEST_ADDRESS_WARNINGS
        } else {
            SUGGEST_FINALIZE
        };

        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
            suggestions: vec![suggestion.to_string()],
        }
    }
}

/// Validate a model-proposed graph given as raw JSON.
///
/// Runs, in order: shape check (short-circuits), trigger presence, connection
/// type checking, orphan detection and, when `catalog` is available, required
/// parameters. The result is a pure function of its inputs.
pub fn validate_proposal(
    graph: Option<&Value>,
    contract: &ServicePortContract,
    catalog: Option<&[NodeTypeDescription]>,
) -> ValidationReport {
    let Some(graph) = graph.filter(|g| !g.is_null()) else {
        return ValidationReport::from_issues(&[ValidationIssue::NoWorkflow]);
    };
    if let Some(issue) = shape_issue(graph) {
        return ValidationReport::from_issues(&[issue]);
    }

    let (proposed, parse_warnings) = match ProposedGraph::from_value(graph) {
        Ok(parsed) => parsed,
        Err(_) => return ValidationReport::from_issues(&[ValidationIssue::NotAnObject]),
    };

    let mut issues: Vec<ValidationIssue> = parse_warnings
        .into_iter()
        .map(ValidationIssue::Malformed)
        .collect();
    issues.extend(check_graph(&normalize(&proposed), contract, catalog));
    ValidationReport::from_issues(&issues)
}

fn shape_issue(graph: &Value) -> Option<ValidationIssue> {
    let Some(obj) = graph.as_object() else {
        return Some(ValidationIssue::NotAnObject);
    };
    for key in ["nodes", "connections"] {
        if !obj.get(key).is_some_and(Value::is_array) {
            return Some(ValidationIssue::MissingArray(key));
        }
    }
    None
}

fn check_graph(
    graph: &WorkflowGraph,
    contract: &ServicePortContract,
    catalog: Option<&[NodeTypeDescription]>,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let mut seen = HashSet::new();
    for node in &graph.nodes {
        if !seen.insert(node.id.as_str()) {
            issues.push(ValidationIssue::DuplicateNodeId(node.id.clone()));
        }
    }

    if !graph.nodes.iter().any(|n| is_trigger_type(&n.node_type)) {
        issues.push(ValidationIssue::NoTrigger);
    }

    issues.extend(check_connections(graph, contract));

    for node in &graph.nodes {
        if !is_trigger_type(&node.node_type) && graph.degree(&node.id) == 0 {
            issues.push(ValidationIssue::Orphan(node.name.clone()));
        }
    }

    for (i, conn) in graph.connections.iter().enumerate() {
        if graph.connections[..i].iter().any(|c| c.same_ports(conn)) {
            issues.push(ValidationIssue::DuplicateConnection(connection_label(
                graph, conn,
            )));
        }
    }

    if let Some(types) = catalog {
        issues.extend(check_required_parameters(graph, types));
    }

    issues
}

fn connection_label(graph: &WorkflowGraph, conn: &Connection) -> String {
    format!(
        "'{}' -> '{}'",
        graph.display_name(&conn.source_node_id),
        graph.display_name(&conn.target_node_id)
    )
}

/// Type-check every connection against the service port contract, then make
/// sure each consumer has its required service inputs wired.
pub fn check_connections(
    graph: &WorkflowGraph,
    contract: &ServicePortContract,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    for conn in &graph.connections {
        let label = connection_label(graph, conn);
        let source = graph.find_node(&conn.source_node_id);
        let target = graph.find_node(&conn.target_node_id);

        for (id, node) in [(&conn.source_node_id, source), (&conn.target_node_id, target)] {
            if node.is_none() {
                issues.push(ValidationIssue::UnknownNode {
                    connection: label.clone(),
                    node_id: id.clone(),
                });
            }
        }
        let (Some(source), Some(target)) = (source, target) else {
            continue;
        };

        if let Some(service) = contract.service_output(&source.node_type) {
            if conn.source_output != service.port_name() {
                issues.push(ValidationIssue::SourcePortMismatch {
                    connection: label.clone(),
                    expected: service,
                    found: conn.source_output.clone(),
                });
            }
            if conn.target_input != service.port_name() {
                issues.push(ValidationIssue::TargetPortMismatch {
                    connection: label.clone(),
                    expected: service,
                    found: conn.target_input.clone(),
                });
            }
        }

        if let Some(service) = ServiceKind::from_port_name(&conn.target_input) {
            let accepted = contract
                .service_inputs(&target.node_type)
                .is_some_and(|inputs| inputs.accepts(service));
            if !accepted {
                issues.push(ValidationIssue::ServiceNotAccepted {
                    connection: label,
                    node: target.name.clone(),
                    service,
                });
            }
        }
    }

    for node in &graph.nodes {
        let Some(inputs) = contract.service_inputs(&node.node_type) else {
            continue;
        };
        for required in &inputs.required {
            let wired = graph
                .incoming(&node.id)
                .any(|c| c.target_input == required.port_name());
            if !wired {
                issues.push(ValidationIssue::MissingServiceInput {
                    node: node.name.clone(),
                    input: *required,
                });
            }
        }
    }

    issues
}

fn check_required_parameters(
    graph: &WorkflowGraph,
    types: &[NodeTypeDescription],
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for node in &graph.nodes {
        let Some(description) = types.iter().find(|t| t.identifier == node.node_type) else {
            continue;
        };
        for property in description.properties.iter().filter(|p| p.must_be_set()) {
            let set = match node.parameters.get(&property.name) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.trim().is_empty(),
                Some(_) => true,
            };
            if !set {
                issues.push(ValidationIssue::MissingParameter {
                    node: node.name.clone(),
                    parameter: property.name.clone(),
                });
            }
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NodeProperty;
    use serde_json::json;

    fn validate(graph: Value) -> ValidationReport {
        validate_proposal(Some(&graph), &ServicePortContract::builtin(), None)
    }

    fn agent_graph(extra_connections: Vec<Value>) -> Value {
        let mut connections = vec![json!({"source": "trigger", "target": "agent"})];
        connections.extend(extra_connections);
        json!({
            "nodes": [
                {"id": "trigger", "type": "core.manualTrigger", "name": "Start"},
                {"id": "agent", "type": "ai.agent", "name": "Support Agent"},
                {"id": "model", "type": "ai.lmChatOpenAi", "name": "GPT"}
            ],
            "connections": connections
        })
    }

    #[test]
    fn missing_graph_short_circuits() {
        let report = validate_proposal(None, &ServicePortContract::builtin(), None);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("No workflow provided"));
        assert_eq!(report.suggestions, vec![SUGGEST_FIX_ERRORS]);
    }

    #[test]
    fn missing_connections_array_returns_only_shape_error() {
        let report = validate(json!({"nodes": [{"id": "a", "type": "ai.agent", "name": "A"}]}));
        assert_eq!(report.errors, vec!["Workflow is missing a 'connections' array"]);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn missing_trigger_is_an_error() {
        let report = validate(json!({
            "nodes": [{"id": "a", "type": "core.set", "name": "Set"}],
            "connections": []
        }));
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("no trigger")));
    }

    #[test]
    fn agent_without_model_names_node_and_input() {
        let report = validate(agent_graph(vec![]));
        let expected = "Node 'Support Agent' is missing required input 'modelService'";
        assert!(report.errors.iter().any(|e| e == expected), "{:?}", report.errors);
    }

    #[test]
    fn wiring_the_model_clears_the_missing_input_error() {
        let report = validate(agent_graph(vec![json!({
            "source": "model",
            "target": "agent",
            "sourceOutput": "modelService",
            "targetInput": "modelService"
        })]));
        assert!(report.valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty());
        assert_eq!(report.suggestions, vec![SUGGEST_FINALIZE]);
    }

    #[test]
    fn service_connection_on_main_port_names_expected_value() {
        let report = validate(agent_graph(vec![json!({"source": "model", "target": "agent"})]));
        assert!(report.errors.iter().any(|e| e
            == "Connection 'GPT' -> 'Support Agent': sourceOutput must be 'modelService' (found 'main')"));
        assert!(report.errors.iter().any(|e| e
            == "Connection 'GPT' -> 'Support Agent': targetInput must be 'modelService' (found 'main')"));
    }

    #[test]
    fn tool_output_cannot_satisfy_memory_input() {
        let report = validate(json!({
            "nodes": [
                {"id": "t", "type": "core.manualTrigger", "name": "Start"},
                {"id": "agent", "type": "ai.agent", "name": "Agent"},
                {"id": "model", "type": "ai.lmChatOpenAi", "name": "GPT"},
                {"id": "http", "type": "core.httpRequestTool", "name": "Fetch"}
            ],
            "connections": [
                {"source": "t", "target": "agent"},
                {"source": "model", "target": "agent", "sourceOutput": "modelService", "targetInput": "modelService"},
                {"source": "http", "target": "agent", "sourceOutput": "toolService", "targetInput": "memoryService"}
            ]
        }));
        assert!(report.errors.iter().any(|e| e.contains("targetInput must be 'toolService'")));
    }

    #[test]
    fn service_into_non_consumer_is_rejected() {
        let report = validate(json!({
            "nodes": [
                {"id": "t", "type": "core.manualTrigger", "name": "Start"},
                {"id": "set", "type": "core.set", "name": "Set"},
                {"id": "model", "type": "ai.lmChatOpenAi", "name": "GPT"}
            ],
            "connections": [
                {"source": "t", "target": "set"},
                {"source": "model", "target": "set", "sourceOutput": "modelService", "targetInput": "modelService"}
            ]
        }));
        assert!(report.errors.iter().any(|e| e.contains("does not accept 'modelService'")));
    }

    #[test]
    fn dangling_connection_is_an_error() {
        let report = validate(json!({
            "nodes": [{"id": "t", "type": "core.manualTrigger", "name": "Start"}],
            "connections": [{"source": "t", "target": "ghost"}]
        }));
        assert!(report.errors.iter().any(|e| e.contains("unknown node 'ghost'")));
    }

    #[test]
    fn orphan_is_a_warning_only() {
        let report = validate(json!({
            "nodes": [
                {"id": "t", "type": "core.manualTrigger", "name": "Start"},
                {"id": "a", "type": "core.set", "name": "Lonely"}
            ],
            "connections": []
        }));
        assert!(report.valid);
        assert_eq!(report.warnings, vec!["Node 'Lonely' is not connected to any other node"]);
        assert_eq!(report.suggestions, vec![SUGGEST_ADDRESS_WARNINGS]);
    }

    #[test]
    fn duplicate_connection_is_reported_not_removed() {
        let report = validate(json!({
            "nodes": [
                {"id": "t", "type": "core.manualTrigger", "name": "Start"},
                {"id": "a", "type": "core.set", "name": "Set"}
            ],
            "connections": [
                {"source": "t", "target": "a"},
                {"sourceNodeId": "t", "targetNodeId": "a", "sourceOutput": "main", "targetInput": "main"}
            ]
        }));
        assert!(report.valid);
        assert_eq!(report.warnings, vec!["Connection 'Start' -> 'Set' is duplicated"]);
    }

    #[test]
    fn required_parameters_checked_against_catalog() {
        let catalog = vec![NodeTypeDescription {
            identifier: "core.httpRequest".to_string(),
            display_name: "HTTP Request".to_string(),
            description: None,
            properties: vec![
                NodeProperty {
                    name: "url".to_string(),
                    required: true,
                    default: None,
                },
                NodeProperty {
                    name: "method".to_string(),
                    required: true,
                    default: Some(json!("GET")),
                },
            ],
        }];
        let graph = json!({
            "nodes": [
                {"id": "t", "type": "core.manualTrigger", "name": "Start"},
                {"id": "h", "type": "core.httpRequest", "name": "Fetch", "parameters": {"url": "  "}}
            ],
            "connections": [{"source": "t", "target": "h"}]
        });
        let report = validate_proposal(Some(&graph), &ServicePortContract::builtin(), Some(&catalog));
        assert_eq!(report.errors, vec!["Node 'Fetch' is missing required parameter 'url'"]);

        let skipped = validate_proposal(Some(&graph), &ServicePortContract::builtin(), None);
        assert!(skipped.valid);
    }

    #[test]
    fn revalidation_is_idempotent() {
        let graph = agent_graph(vec![json!({"source": "model", "target": "agent"})]);
        let first = validate(graph.clone());
        let second = validate(graph);
        assert_eq!(first, second);
    }
}
