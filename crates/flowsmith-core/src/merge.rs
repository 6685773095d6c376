//! Reconciles a model-proposed graph with the graph the user already has.
//!
//! Nodes the user already placed keep their position no matter what the
//! model proposes. New nodes without a position are laid out to the right of
//! the existing graph: regular nodes on a row at the average existing height,
//! service nodes (model, memory, tools, ...) on a row beneath them.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::graph::{Connection, MAIN_PORT, Node, Position, WorkflowGraph};
use crate::ports::ServicePortContract;

pub const REGULAR_X_OFFSET: f64 = 300.0;
pub const REGULAR_X_SPACING: f64 = 300.0;
pub const SERVICE_X_OFFSET: f64 = 150.0;
pub const SERVICE_X_SPACING: f64 = 200.0;
pub const SERVICE_Y_OFFSET: f64 = 200.0;
/// Row height used when there is no existing positioned node to average.
pub const DEFAULT_ROW_Y: f64 = 200.0;

#[derive(Debug, Error)]
pub enum ProposalError {
    #[error("Graph must be a JSON object")]
    NotAnObject,

    #[error("Graph has no 'nodes' array")]
    MissingNodes,

    #[error("Graph 'connections' must be an array")]
    ConnectionsNotArray,
}

/// A node as the model wrote it. Everything but `id` and `type` is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
    #[serde(default)]
    pub disabled: Option<bool>,
    #[serde(default)]
    pub position: Option<ProposedPosition>,
}

/// Models emit either `{x, y}` (possibly partial) or an `[x, y]` pair.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProposedPosition {
    Point {
        #[serde(default)]
        x: Option<f64>,
        #[serde(default)]
        y: Option<f64>,
    },
    Pair(Vec<f64>),
}

impl ProposedPosition {
    /// The position, if both coordinates are present.
    pub fn complete(&self) -> Option<Position> {
        match self {
            ProposedPosition::Point {
                x: Some(x),
                y: Some(y),
            } => Some(Position { x: *x, y: *y }),
            ProposedPosition::Pair(coords) if coords.len() == 2 => Some(Position {
                x: coords[0],
                y: coords[1],
            }),
            _ => None,
        }
    }
}

/// A connection in either `{source, target}` or `{sourceNodeId, targetNodeId}` shape.
/// Both spellings may appear together as long as they name the same node.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawConnection")]
pub struct ProposedConnection {
    pub id: Option<String>,
    pub source_node_id: String,
    pub source_output: Option<String>,
    pub target_node_id: String,
    pub target_input: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConnection {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    source_node_id: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    source_output: Option<String>,
    #[serde(default)]
    target_node_id: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    target_input: Option<String>,
}

fn endpoint(
    canonical: Option<String>,
    short: Option<String>,
    canonical_key: &str,
    short_key: &str,
) -> Result<String, String> {
    match (canonical, short) {
        (Some(a), Some(b)) if a != b => Err(format!(
            "'{}' ({}) and '{}' ({}) disagree",
            canonical_key, a, short_key, b
        )),
        (Some(a), _) | (None, Some(a)) => Ok(a),
        (None, None) => Err(format!("missing field `{}`", canonical_key)),
    }
}

impl TryFrom<RawConnection> for ProposedConnection {
    type Error = String;

    fn try_from(raw: RawConnection) -> Result<Self, Self::Error> {
        Ok(Self {
            id: raw.id,
            source_node_id: endpoint(raw.source_node_id, raw.source, "sourceNodeId", "source")?,
            source_output: raw.source_output,
            target_node_id: endpoint(raw.target_node_id, raw.target, "targetNodeId", "target")?,
            target_input: raw.target_input,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProposedGraph {
    pub nodes: Vec<ProposedNode>,
    pub connections: Vec<ProposedConnection>,
}

/// Parse a slice of raw JSON values into typed items, skipping malformed
/// entries with warnings. Uses the `"id"` field (if present) to label
/// warnings; falls back to the array index.
pub fn parse_lenient<T: serde::de::DeserializeOwned>(raw: &[Value]) -> (Vec<T>, Vec<String>) {
    let mut items = Vec::new();
    let mut warnings = Vec::new();
    for (i, val) in raw.iter().enumerate() {
        match serde_json::from_value::<T>(val.clone()) {
            Ok(item) => items.push(item),
            Err(e) => {
                let label = val
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .unwrap_or_else(|| format!("#{}", i));
                warnings.push(format!("'{}' skipped (malformed): {}", label, e));
            }
        }
    }
    (items, warnings)
}

impl ProposedGraph {
    /// Parse a model-authored graph. A missing `connections` array is treated
    /// as empty; malformed entries are skipped and reported.
    pub fn from_value(value: &Value) -> Result<(Self, Vec<String>), ProposalError> {
        let obj = value.as_object().ok_or(ProposalError::NotAnObject)?;
        let raw_nodes = obj
            .get("nodes")
            .and_then(Value::as_array)
            .ok_or(ProposalError::MissingNodes)?;
        let raw_connections = match obj.get("connections") {
            None | Some(Value::Null) => &[][..],
            Some(Value::Array(items)) => &items[..],
            Some(_) => return Err(ProposalError::ConnectionsNotArray),
        };

        let (nodes, mut warnings) = parse_lenient::<ProposedNode>(raw_nodes);
        let (connections, connection_warnings) =
            parse_lenient::<ProposedConnection>(raw_connections);
        warnings.extend(
            connection_warnings
                .into_iter()
                .map(|w| format!("Connection {}", w)),
        );

        Ok((Self { nodes, connections }, warnings))
    }
}

/// Fill node defaults. The position is left as proposed; layout decides later.
pub fn normalize_node(node: &ProposedNode) -> Node {
    Node {
        id: node.id.clone(),
        node_type: node.node_type.clone(),
        name: node
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| node.id.clone()),
        parameters: node.parameters.clone().unwrap_or_default(),
        disabled: node.disabled.unwrap_or(false),
        position: node.position.as_ref().and_then(ProposedPosition::complete),
    }
}

/// Canonicalize a connection: generated id when absent, `main` for missing ports.
pub fn normalize_connection(connection: &ProposedConnection) -> Connection {
    let port = |p: &Option<String>| {
        p.clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| MAIN_PORT.to_string())
    };
    Connection {
        id: connection
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        source_node_id: connection.source_node_id.clone(),
        source_output: port(&connection.source_output),
        target_node_id: connection.target_node_id.clone(),
        target_input: port(&connection.target_input),
    }
}

/// Normalize a proposal without touching positions.
pub fn normalize(proposed: &ProposedGraph) -> WorkflowGraph {
    WorkflowGraph {
        nodes: proposed.nodes.iter().map(normalize_node).collect(),
        connections: proposed
            .connections
            .iter()
            .map(normalize_connection)
            .collect(),
    }
}

/// Anchor for new-node placement, derived from the existing graph.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LayoutAnchor {
    max_x: f64,
    avg_y: f64,
}

impl LayoutAnchor {
    fn from_existing(existing: Option<&WorkflowGraph>) -> Self {
        let positions: Vec<Position> = existing
            .map(|g| g.nodes.iter().filter_map(|n| n.position).collect())
            .unwrap_or_default();

        if positions.is_empty() {
            return Self {
                max_x: 0.0,
                avg_y: DEFAULT_ROW_Y,
            };
        }

        let max_x = positions
            .iter()
            .map(|p| p.x)
            .fold(f64::NEG_INFINITY, f64::max);
        let avg_y = positions.iter().map(|p| p.y).sum::<f64>() / positions.len() as f64;
        Self { max_x, avg_y }
    }
}

/// Merge a proposal into the existing graph and assign every node a position.
pub fn merge_graphs(
    proposed: &ProposedGraph,
    existing: Option<&WorkflowGraph>,
    contract: &ServicePortContract,
) -> WorkflowGraph {
    let existing_positions: HashMap<&str, Position> = existing
        .map(|g| {
            g.nodes
                .iter()
                .filter_map(|n| n.position.map(|p| (n.id.as_str(), p)))
                .collect()
        })
        .unwrap_or_default();

    let anchor = LayoutAnchor::from_existing(existing);
    let mut regular_placed = 0usize;
    let mut service_placed = 0usize;

    let nodes = proposed
        .nodes
        .iter()
        .map(|proposed_node| {
            let mut node = normalize_node(proposed_node);
            node.position = Some(if let Some(pos) = existing_positions.get(node.id.as_str()) {
                *pos
            } else if let Some(pos) = node.position {
                pos
            } else if contract.is_service_node(&node.node_type) {
                let k = service_placed as f64;
                service_placed += 1;
                Position {
                    x: anchor.max_x + SERVICE_X_OFFSET + SERVICE_X_SPACING * k,
                    y: anchor.avg_y + SERVICE_Y_OFFSET,
                }
            } else {
                let k = regular_placed as f64;
                regular_placed += 1;
                Position {
                    x: anchor.max_x + REGULAR_X_OFFSET + REGULAR_X_SPACING * k,
                    y: anchor.avg_y,
                }
            });
            node
        })
        .collect();

    WorkflowGraph {
        nodes,
        connections: proposed
            .connections
            .iter()
            .map(normalize_connection)
            .collect(),
    }
}
