use flowsmith_core::WorkflowGraph;
use flowsmith_core::catalog::NodeTypeDescription;
use flowsmith_core::ports::ServicePortContract;

/// Build the agent system prompt.
///
/// `node_types` is `None` when the node-type registry could not be reached;
/// the prompt then says so instead of listing types.
pub(crate) fn agent_system_prompt(
    node_types: Option<&[NodeTypeDescription]>,
    contract: &ServicePortContract,
) -> String {
    let mut prompt = String::from(
        r#"You are a workflow builder assistant. You turn the user's request into a workflow graph of nodes and connections, or answer their question.

Every turn you MUST call exactly one tool:
- `validate_workflow`: check a candidate graph. Fix every error it reports and validate again.
- `build_workflow`: finalize. Pass the COMPLETE graph (keep existing nodes you are not removing) and a short message for the user.
- `advise_user`: reply without changing the workflow (questions, explanations, missing details).
- `get_latest_execution_logs`: read the errors of the latest run when the user reports a failure.

Graph format:
```json
{
  "nodes": [{"id": "<stable id>", "type": "<node type>", "name": "<label>", "parameters": {...}}],
  "connections": [{"sourceNodeId": "<id>", "sourceOutput": "main", "targetNodeId": "<id>", "targetInput": "main"}]
}
```

Rules:
1. Every workflow starts with a trigger node (a type ending in `Trigger`, or a webhook).
2. Keep the ids of existing nodes unchanged. Do not send positions for existing nodes; they are preserved.
3. Data flows through `main` ports. Service nodes (models, memories, tools) connect to their consumer through a service port: BOTH `sourceOutput` and `targetInput` must be the service name (e.g. `modelService`).
4. Node types ending in `Tool` provide a `toolService`.
5. Use only node types from the list below when possible."#,
    );

    prompt.push_str("\n\nService producers:\n");
    for (node_type, service) in contract.producers() {
        prompt.push_str(&format!("- {} → {}\n", node_type, service));
    }

    prompt.push_str("\nService consumers:\n");
    for (node_type, inputs) in contract.consumers() {
        let join = |kinds: &[flowsmith_core::ports::ServiceKind]| {
            kinds
                .iter()
                .map(|k| k.port_name())
                .collect::<Vec<_>>()
                .join(", ")
        };
        prompt.push_str(&format!(
            "- {} requires [{}], accepts [{}]\n",
            node_type,
            join(&inputs.required),
            join(&inputs.optional)
        ));
    }

    prompt.push_str("\nAvailable node types:\n");
    match node_types {
        Some(types) if !types.is_empty() => prompt.push_str(&node_type_summary(types)),
        Some(_) => prompt.push_str("(none installed)\n"),
        None => prompt.push_str("(node type registry unavailable; use well-known types)\n"),
    }

    prompt
}

/// One line per node type: identifier, display name, description, required parameters.
pub(crate) fn node_type_summary(types: &[NodeTypeDescription]) -> String {
    types
        .iter()
        .map(|t| {
            let mut line = format!("- {} ({})", t.identifier, t.display_name);
            if let Some(desc) = t.description.as_deref().filter(|d| !d.is_empty()) {
                line.push_str(&format!(": {}", desc));
            }
            let required: Vec<&str> = t
                .properties
                .iter()
                .filter(|p| p.must_be_set())
                .map(|p| p.name.as_str())
                .collect();
            if !required.is_empty() {
                line.push_str(&format!(" [required: {}]", required.join(", ")));
            }
            line.push('\n');
            line
        })
        .collect()
}

/// The user turn: the request, followed by the current workflow when editing.
pub(crate) fn user_request_message(request: &str, existing: Option<&WorkflowGraph>) -> String {
    let Some(graph) = existing.filter(|g| !g.nodes.is_empty()) else {
        return request.to_string();
    };
    let graph_json = serde_json::to_string_pretty(graph).unwrap_or_default();
    format!(
        "{}\n\nCurrent workflow:\n```json\n{}\n```",
        request, graph_json
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsmith_core::Node;
    use flowsmith_core::catalog::NodeProperty;

    #[test]
    fn prompt_lists_contract_and_node_types() {
        let types = vec![NodeTypeDescription {
            identifier: "core.httpRequest".to_string(),
            display_name: "HTTP Request".to_string(),
            description: Some("Call an API".to_string()),
            properties: vec![NodeProperty {
                name: "url".to_string(),
                required: true,
                default: None,
            }],
        }];
        let prompt = agent_system_prompt(Some(&types), &ServicePortContract::builtin());
        assert!(prompt.contains("- ai.lmChatOpenAi → modelService"));
        assert!(prompt.contains("- ai.agent requires [modelService]"));
        assert!(prompt.contains("- core.httpRequest (HTTP Request): Call an API [required: url]"));
    }

    #[test]
    fn prompt_notes_unavailable_registry() {
        let prompt = agent_system_prompt(None, &ServicePortContract::builtin());
        assert!(prompt.contains("registry unavailable"));
    }

    #[test]
    fn user_message_embeds_existing_graph() {
        let graph = WorkflowGraph::new(vec![Node::new("a", "core.manualTrigger", "Start")], vec![]);
        let msg = user_request_message("add a step", Some(&graph));
        assert!(msg.starts_with("add a step"));
        assert!(msg.contains("\"id\": \"a\""));
        assert_eq!(user_request_message("hello", None), "hello");
        assert_eq!(
            user_request_message("hello", Some(&WorkflowGraph::default())),
            "hello"
        );
    }
}
