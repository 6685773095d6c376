use std::collections::{BTreeSet, HashSet};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::WorkflowGraph;

/// An installable node type as described by the node-type registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTypeDescription {
    pub identifier: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: Vec<NodeProperty>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeProperty {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl NodeProperty {
    /// Required and without a default the runtime could fall back to.
    pub fn must_be_set(&self) -> bool {
        self.required && self.default.as_ref().is_none_or(Value::is_null)
    }
}

/// Source of installed node types. May be unreachable; callers degrade.
#[async_trait]
pub trait NodeTypeCatalog: Send + Sync {
    async fn list_node_types(&self) -> Result<Vec<NodeTypeDescription>>;
}

/// Fixed list of node types, e.g. loaded from a JSON file at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticNodeTypeCatalog {
    types: Vec<NodeTypeDescription>,
}

impl StaticNodeTypeCatalog {
    pub fn new(types: Vec<NodeTypeDescription>) -> Self {
        Self { types }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(Self::new(serde_json::from_str(text)?))
    }
}

#[async_trait]
impl NodeTypeCatalog for StaticNodeTypeCatalog {
    async fn list_node_types(&self) -> Result<Vec<NodeTypeDescription>> {
        Ok(self.types.clone())
    }
}

/// Catalog that is never reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableCatalog;

#[async_trait]
impl NodeTypeCatalog for UnavailableCatalog {
    async fn list_node_types(&self) -> Result<Vec<NodeTypeDescription>> {
        Err(anyhow!("node type registry is not configured"))
    }
}

/// Node types used by `graph` that the registry does not know, sorted and unique.
pub fn missing_node_types(graph: &WorkflowGraph, known: &[NodeTypeDescription]) -> Vec<String> {
    let installed: HashSet<&str> = known.iter().map(|t| t.identifier.as_str()).collect();
    graph
        .nodes
        .iter()
        .map(|n| n.node_type.as_str())
        .filter(|t| !installed.contains(t))
        .map(String::from)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;
    use serde_json::json;

    fn description(identifier: &str) -> NodeTypeDescription {
        NodeTypeDescription {
            identifier: identifier.to_string(),
            display_name: identifier.to_string(),
            description: None,
            properties: vec![],
        }
    }

    #[test]
    fn missing_types_are_sorted_and_unique() {
        let graph = WorkflowGraph::new(
            vec![
                Node::new("1", "custom.zeta", "Z"),
                Node::new("2", "core.set", "Set"),
                Node::new("3", "custom.alpha", "A"),
                Node::new("4", "custom.zeta", "Z2"),
            ],
            vec![],
        );
        let missing = missing_node_types(&graph, &[description("core.set")]);
        assert_eq!(missing, vec!["custom.alpha", "custom.zeta"]);
    }

    #[test]
    fn property_with_default_need_not_be_set() {
        let with_default: NodeProperty =
            serde_json::from_value(json!({"name": "method", "required": true, "default": "GET"}))
                .unwrap();
        let without: NodeProperty =
            serde_json::from_value(json!({"name": "url", "required": true})).unwrap();
        let null_default: NodeProperty =
            serde_json::from_value(json!({"name": "body", "required": true, "default": null}))
                .unwrap();
        assert!(!with_default.must_be_set());
        assert!(without.must_be_set());
        assert!(null_default.must_be_set());
    }

    #[tokio::test]
    async fn static_catalog_parses_json() {
        let catalog = StaticNodeTypeCatalog::from_json(
            r#"[{"identifier": "core.set", "displayName": "Set", "properties": []}]"#,
        )
        .unwrap();
        let types = catalog.list_node_types().await.unwrap();
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].display_name, "Set");
        assert!(UnavailableCatalog.list_node_types().await.is_err());
    }
}
