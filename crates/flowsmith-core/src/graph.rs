use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Port name used by plain data connections.
pub const MAIN_PORT: &str = "main";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub source_node_id: String,
    pub source_output: String,
    pub target_node_id: String,
    pub target_input: String,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: name.into(),
            parameters: Map::new(),
            disabled: false,
            position: None,
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Some(Position { x, y });
        self
    }
}

impl Connection {
    /// A `main` → `main` data connection.
    pub fn main(
        id: impl Into<String>,
        source_node_id: impl Into<String>,
        target_node_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_node_id: source_node_id.into(),
            source_output: MAIN_PORT.to_string(),
            target_node_id: target_node_id.into(),
            target_input: MAIN_PORT.to_string(),
        }
    }

    /// Two connections are duplicates when they join the same ports of the same nodes.
    pub fn same_ports(&self, other: &Connection) -> bool {
        self.source_node_id == other.source_node_id
            && self.source_output == other.source_output
            && self.target_node_id == other.target_node_id
            && self.target_input == other.target_input
    }
}

impl WorkflowGraph {
    pub fn new(nodes: Vec<Node>, connections: Vec<Connection>) -> Self {
        Self { nodes, connections }
    }

    pub fn find_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn incoming<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Connection> {
        self.connections
            .iter()
            .filter(move |c| c.target_node_id == node_id)
    }

    /// Number of connections touching `node_id` on either end.
    pub fn degree(&self, node_id: &str) -> usize {
        self.connections
            .iter()
            .filter(|c| c.source_node_id == node_id || c.target_node_id == node_id)
            .count()
    }

    /// Node name for display, falling back to the raw id.
    pub fn display_name<'a>(&'a self, node_id: &'a str) -> &'a str {
        self.find_node(node_id)
            .map(|n| n.name.as_str())
            .unwrap_or(node_id)
    }
}

/// Whether a node type starts a workflow run.
///
/// Trigger-class types are recognised by name: the last dotted segment either
/// ends in `Trigger` or is `webhook`.
pub fn is_trigger_type(node_type: &str) -> bool {
    let segment = node_type.rsplit('.').next().unwrap_or(node_type);
    let lower = segment.to_ascii_lowercase();
    lower.ends_with("trigger") || lower == "webhook"
}

/// Outcome of a terminal tool with respect to the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphChange {
    NoChange,
    Mutated { graph: WorkflowGraph },
}

impl GraphChange {
    pub fn graph(&self) -> Option<&WorkflowGraph> {
        match self {
            GraphChange::NoChange => None,
            GraphChange::Mutated { graph } => Some(graph),
        }
    }

    pub fn is_no_change(&self) -> bool {
        matches!(self, GraphChange::NoChange)
    }
}
