use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::{
    flow::{FlowNode, NodeFactory},
    node::NodeType,
    nodes::{ConditionalNode, DataTransformNode, EchoNode, GreetingNode, RandomNumberNode},
};

#[derive(Clone)]
struct Entry {
    type_name: String,
    factory: NodeFactory,
}

/// Maps the `type` names used in flow files to node factories.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    entries: Arc<DashMap<String, Entry>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in nodes:
    /// `echo`, `greeting`, `random_number`, `data_transform`, `conditional`.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register::<EchoNode>("echo");
        registry.register::<GreetingNode>("greeting");
        registry.register::<RandomNumberNode>("random_number");
        registry.register::<DataTransformNode>("data_transform");
        registry.register::<ConditionalNode>("conditional");
        registry
    }

    /// Registers a `Default`-constructible node type. Re-registering a name
    /// replaces the previous entry.
    pub fn register<N>(&self, name: impl Into<String>)
    where
        N: NodeType + Default + 'static,
    {
        let type_name = N::default().type_name();
        self.register_factory(name, type_name, || Box::new(N::default()) as Box<dyn NodeType>);
    }

    pub fn register_factory<F>(
        &self,
        name: impl Into<String>,
        type_name: impl Into<String>,
        factory: F,
    ) where
        F: Fn() -> Box<dyn NodeType> + Send + Sync + 'static,
    {
        let name = name.into();
        let entry = Entry {
            type_name: type_name.into(),
            factory: Arc::new(factory),
        };
        if self.entries.insert(name.clone(), entry).is_some() {
            info!("Replaced node type: {}", name);
        }
    }

    /// A flow entry for the registered name, with no transitions yet.
    pub fn flow_node(&self, name: &str) -> Option<FlowNode> {
        self.entries
            .get(name)
            .map(|e| FlowNode::from_shared(e.type_name.clone(), e.factory.clone()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry").field("names", &self.names()).finish()
    }
}
