use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Suffix that marks a node type as a tool provider for agent nodes.
pub const TOOL_TYPE_SUFFIX: &str = "Tool";

/// A non-data dependency one node hands to another (a model handle, a memory, ...).
///
/// The serialized name doubles as the port name on both ends of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceKind {
    #[serde(rename = "modelService")]
    Model,
    #[serde(rename = "memoryService")]
    Memory,
    #[serde(rename = "toolService")]
    Tool,
    #[serde(rename = "embeddingService")]
    Embedding,
    #[serde(rename = "vectorStoreService")]
    VectorStore,
    #[serde(rename = "outputParserService")]
    OutputParser,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 6] = [
        ServiceKind::Model,
        ServiceKind::Memory,
        ServiceKind::Tool,
        ServiceKind::Embedding,
        ServiceKind::VectorStore,
        ServiceKind::OutputParser,
    ];

    pub fn port_name(&self) -> &'static str {
        match self {
            ServiceKind::Model => "modelService",
            ServiceKind::Memory => "memoryService",
            ServiceKind::Tool => "toolService",
            ServiceKind::Embedding => "embeddingService",
            ServiceKind::VectorStore => "vectorStoreService",
            ServiceKind::OutputParser => "outputParserService",
        }
    }

    pub fn from_port_name(port: &str) -> Option<ServiceKind> {
        Self::ALL.into_iter().find(|k| k.port_name() == port)
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.port_name())
    }
}

/// Service inputs a consumer node type declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceInputs {
    pub required: Vec<ServiceKind>,
    pub optional: Vec<ServiceKind>,
}

impl ServiceInputs {
    pub fn accepts(&self, kind: ServiceKind) -> bool {
        self.required.contains(&kind) || self.optional.contains(&kind)
    }
}

/// Static producer/consumer table for service ports.
#[derive(Debug, Clone, Default)]
pub struct ServicePortContract {
    producers: HashMap<String, ServiceKind>,
    consumers: HashMap<String, ServiceInputs>,
}

impl ServicePortContract {
    pub fn new() -> Self {
        Self::default()
    }

    /// The table shipped with the built-in AI node pack.
    pub fn builtin() -> Self {
        use ServiceKind::*;

        Self::new()
            .with_producer("ai.lmChatOpenAi", Model)
            .with_producer("ai.lmChatAnthropic", Model)
            .with_producer("ai.lmChatOllama", Model)
            .with_producer("ai.memoryBufferWindow", Memory)
            .with_producer("ai.memoryPostgresChat", Memory)
            .with_producer("ai.toolCalculator", Tool)
            .with_producer("ai.toolCode", Tool)
            .with_producer("ai.embeddingsOpenAi", Embedding)
            .with_producer("ai.vectorStoreInMemory", VectorStore)
            .with_producer("ai.outputParserStructured", OutputParser)
            .with_consumer("ai.agent", &[Model], &[Memory, Tool, OutputParser])
            .with_consumer("ai.chainLlm", &[Model], &[OutputParser])
            .with_consumer("ai.chainRetrievalQa", &[Model, VectorStore], &[])
            .with_consumer("ai.vectorStoreInMemory", &[Embedding], &[])
    }

    pub fn with_producer(mut self, node_type: impl Into<String>, kind: ServiceKind) -> Self {
        self.producers.insert(node_type.into(), kind);
        self
    }

    pub fn with_consumer(
        mut self,
        node_type: impl Into<String>,
        required: &[ServiceKind],
        optional: &[ServiceKind],
    ) -> Self {
        self.consumers.insert(
            node_type.into(),
            ServiceInputs {
                required: required.to_vec(),
                optional: optional.to_vec(),
            },
        );
        self
    }

    /// Service output a node type produces: exact table entry first, then the
    /// `Tool` suffix rule.
    pub fn service_output(&self, node_type: &str) -> Option<ServiceKind> {
        if let Some(kind) = self.producers.get(node_type) {
            return Some(*kind);
        }
        if node_type.ends_with(TOOL_TYPE_SUFFIX) {
            return Some(ServiceKind::Tool);
        }
        None
    }

    pub fn is_service_node(&self, node_type: &str) -> bool {
        self.service_output(node_type).is_some()
    }

    pub fn service_inputs(&self, node_type: &str) -> Option<&ServiceInputs> {
        self.consumers.get(node_type)
    }

    /// Producer entries sorted by node type.
    pub fn producers(&self) -> Vec<(&str, ServiceKind)> {
        let mut entries: Vec<_> = self
            .producers
            .iter()
            .map(|(t, k)| (t.as_str(), *k))
            .collect();
        entries.sort();
        entries
    }

    /// Consumer entries sorted by node type.
    pub fn consumers(&self) -> Vec<(&str, &ServiceInputs)> {
        let mut entries: Vec<_> = self
            .consumers
            .iter()
            .map(|(t, inputs)| (t.as_str(), inputs))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_entry_wins_over_suffix() {
        let contract = ServicePortContract::builtin();
        assert_eq!(
            contract.service_output("ai.lmChatOpenAi"),
            Some(ServiceKind::Model)
        );
        assert_eq!(
            contract.service_output("ai.memoryBufferWindow"),
            Some(ServiceKind::Memory)
        );
    }

    #[test]
    fn tool_suffix_produces_tool_service() {
        let contract = ServicePortContract::builtin();
        assert_eq!(
            contract.service_output("core.httpRequestTool"),
            Some(ServiceKind::Tool)
        );
        assert_eq!(contract.service_output("core.httpRequest"), None);
        assert!(!contract.is_service_node("core.manualTrigger"));
    }

    #[test]
    fn agent_requires_model_and_accepts_memory() {
        let contract = ServicePortContract::builtin();
        let inputs = contract.service_inputs("ai.agent").unwrap();
        assert_eq!(inputs.required, vec![ServiceKind::Model]);
        assert!(inputs.accepts(ServiceKind::Memory));
        assert!(inputs.accepts(ServiceKind::Tool));
        assert!(!inputs.accepts(ServiceKind::Embedding));
    }

    #[test]
    fn port_names_round_trip_through_serde() {
        for kind in ServiceKind::ALL {
            let encoded = serde_json::to_value(kind).unwrap();
            assert_eq!(encoded, kind.port_name());
            assert_eq!(ServiceKind::from_port_name(kind.port_name()), Some(kind));
        }
        assert_eq!(ServiceKind::from_port_name("main"), None);
    }
}
