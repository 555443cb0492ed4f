// src/flow.rs

use std::{
    collections::{HashMap, HashSet},
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    node::{Node, NodeType, panic_message},
    state::{ERROR_ACTION, Store},
};

/// Id of the node every run begins at.
pub const START: &str = "start";
/// Reserved terminal id; never a real node.
pub const END: &str = "end";
/// Action used when a node sets none, and the fallback transition key.
pub const DEFAULT_ACTION: &str = "default";
pub const DEFAULT_MAX_STEPS: usize = 100;

/// Builds a fresh node instance; called once per step.
pub type NodeFactory = Arc<dyn Fn() -> Box<dyn NodeType> + Send + Sync>;

/// One entry of a flow definition: which node to instantiate and where
/// each action leads.
#[derive(Clone)]
pub struct FlowNode {
    type_name: String,
    factory: NodeFactory,
    transitions: Vec<(String, String)>,
}

impl FlowNode {
    /// Binds a node type constructed through `Default`.
    pub fn of<N>() -> Self
    where
        N: NodeType + Default + 'static,
    {
        let full = std::any::type_name::<N>();
        let short = full.rsplit("::").next().unwrap_or(full);
        Self::from_factory(short, || Box::new(N::default()) as Box<dyn NodeType>)
    }

    pub fn from_factory<F>(type_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn NodeType> + Send + Sync + 'static,
    {
        Self {
            type_name: type_name.into(),
            factory: Arc::new(factory),
            transitions: Vec::new(),
        }
    }

    pub fn from_shared(type_name: impl Into<String>, factory: NodeFactory) -> Self {
        Self {
            type_name: type_name.into(),
            factory,
            transitions: Vec::new(),
        }
    }

    /// Adds or replaces the transition for `action`.
    pub fn on(mut self, action: impl Into<String>, target: impl Into<String>) -> Self {
        let action = action.into();
        let target = target.into();
        match self.transitions.iter_mut().find(|(a, _)| *a == action) {
            Some(entry) => entry.1 = target,
            None => self.transitions.push((action, target)),
        }
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Transitions in declaration order.
    pub fn transitions(&self) -> &[(String, String)] {
        &self.transitions
    }

    pub fn target(&self, action: &str) -> Option<&str> {
        self.transitions
            .iter()
            .find(|(a, _)| a == action)
            .map(|(_, t)| t.as_str())
    }

    /// Where `action` leads: its own edge, else the `default` edge, else `end`.
    pub fn next(&self, action: &str) -> &str {
        self.target(action)
            .or_else(|| self.target(DEFAULT_ACTION))
            .unwrap_or(END)
    }

    pub fn instantiate(&self) -> Box<dyn NodeType> {
        (self.factory)()
    }
}

impl fmt::Debug for FlowNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowNode")
            .field("type_name", &self.type_name)
            .field("transitions", &self.transitions)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("Flow must have a 'start' node")]
    MissingStart,
    #[error("Node '{node}' has transition '{action}' pointing to unknown node '{target}'")]
    UnknownTarget {
        node: String,
        action: String,
        target: String,
    },
}

/// Why the interpreter loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    ReachedEnd,
    Aborted,
    BudgetExhausted,
}

/// A validated, immutable flow definition and the interpreter over it.
///
/// Safe to share between threads; each run gets its own store and fresh
/// node instances.
#[derive(Debug, Clone)]
pub struct Flow {
    name: String,
    nodes: Vec<(String, FlowNode)>,
    index_of: HashMap<String, usize>,
}

impl Flow {
    /// Validates the definition up front; a returned `Flow` is always runnable.
    ///
    /// Later entries with an id already seen replace the earlier one.
    pub fn new<I, K>(name: impl Into<String>, definition: I) -> Result<Self, FlowError>
    where
        I: IntoIterator<Item = (K, FlowNode)>,
        K: Into<String>,
    {
        let mut nodes: Vec<(String, FlowNode)> = Vec::new();
        let mut index_of: HashMap<String, usize> = HashMap::new();
        for (id, node) in definition {
            let id = id.into();
            match index_of.get(&id) {
                Some(&i) => nodes[i].1 = node,
                None => {
                    index_of.insert(id.clone(), nodes.len());
                    nodes.push((id, node));
                }
            }
        }

        let flow = Self {
            name: name.into(),
            nodes,
            index_of,
        };
        flow.validate()?;
        Ok(flow)
    }

    fn validate(&self) -> Result<(), FlowError> {
        if !self.index_of.contains_key(START) {
            return Err(FlowError::MissingStart);
        }

        let mut known: HashSet<&str> = self.index_of.keys().map(String::as_str).collect();
        known.insert(END);

        for (id, node) in &self.nodes {
            for (action, target) in node.transitions() {
                if !known.contains(target.as_str()) {
                    return Err(FlowError::UnknownTarget {
                        node: id.clone(),
                        action: action.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node ids in definition order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|(id, _)| id.as_str())
    }

    pub fn get(&self, id: &str) -> Option<&FlowNode> {
        self.index_of.get(id).map(|&i| &self.nodes[i].1)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index_of.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn run_default(&self, initial: Option<Store>) -> Store {
        self.run(initial, DEFAULT_MAX_STEPS)
    }

    /// Walks the flow from `start` until `end`, an abort, or `max_steps`
    /// node executions. Never fails: the outcome is recorded in the
    /// returned store (completion flag plus error fields).
    #[tracing::instrument(name = "flow_run", skip(self, initial), fields(flow = %self.name))]
    pub fn run(&self, initial: Option<Store>, max_steps: usize) -> Store {
        let mut store = initial.unwrap_or_default();
        store.begin_run(&self.name);

        let mut current = START.to_string();
        let mut steps = 0;
        let mut exit = Exit::BudgetExhausted;

        info!("Starting flow: {}", self.name);

        while current != END && steps < max_steps {
            steps += 1;
            store.record_visit(&current);

            let Some(config) = self.get(&current) else {
                error!("Unknown node: {}", current);
                store.fail(format!("Unknown node: {current}"));
                exit = Exit::Aborted;
                break;
            };

            info!("Executing node: {}", current);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut node = Node::with_id(current.as_str(), config.instantiate());
                node.run(&mut store);
            }));
            if let Err(payload) = outcome {
                let message = panic_message(payload.as_ref());
                error!("Error in node {}: {}", current, message);
                store.fail_at(current.as_str(), message);
                exit = Exit::Aborted;
                break;
            }

            let action = store.action().unwrap_or(DEFAULT_ACTION).to_string();

            if action == ERROR_ACTION && config.target(ERROR_ACTION).is_none() {
                error!("Error in node {}, stopping flow", current);
                exit = Exit::Aborted;
                break;
            }

            let next = config.next(&action).to_string();
            info!("Transition: {} --[{}]--> {}", current, action, next);
            current = next;
        }

        if current == END {
            exit = Exit::ReachedEnd;
        }

        if exit == Exit::BudgetExhausted {
            warn!("Flow exceeded maximum steps ({})", max_steps);
            store.fail(format!("Flow exceeded maximum steps ({max_steps})"));
        }

        let completed = exit == Exit::ReachedEnd;
        store.finish_run(steps, completed);

        info!(
            "Flow completed: {} (steps: {}, completed: {})",
            self.name, steps, completed
        );
        store
    }

    /// Text rendering of the transition table, in definition order.
    pub fn visualize(&self) -> String {
        let mut lines = vec![
            format!("Flow: {}", self.name),
            "=".repeat(self.name.chars().count() + 6),
            String::new(),
        ];

        for (id, node) in &self.nodes {
            lines.push(format!("{} ({}):", id, node.type_name()));
            for (action, target) in node.transitions() {
                lines.push(format!("  --[{}]--> {}", action, target));
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeError;

    #[derive(Debug, Default)]
    struct EchoNode;

    impl NodeType for EchoNode {
        fn type_name(&self) -> String {
            "EchoNode".to_string()
        }

        fn execute(&mut self, _store: &mut Store) -> Result<(), NodeError> {
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct SuccessNode;

    impl NodeType for SuccessNode {
        fn type_name(&self) -> String {
            "SuccessNode".to_string()
        }

        fn execute(&mut self, store: &mut Store) -> Result<(), NodeError> {
            store.set_action("success");
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct ErrorNode;

    impl NodeType for ErrorNode {
        fn type_name(&self) -> String {
            "ErrorNode".to_string()
        }

        fn execute(&mut self, _store: &mut Store) -> Result<(), NodeError> {
            Err(NodeError::ExecutionFailed("Test error".to_string()))
        }
    }

    fn echo_flow() -> Flow {
        Flow::new("Echo", [(START, FlowNode::of::<EchoNode>().on(DEFAULT_ACTION, END))]).unwrap()
    }

    #[test]
    fn test_missing_start_is_rejected() {
        let err = Flow::new("Bad", [("middle", FlowNode::of::<EchoNode>().on("success", END))])
            .unwrap_err();
        assert_eq!(err, FlowError::MissingStart);
        assert_eq!(err.to_string(), "Flow must have a 'start' node");
    }

    #[test]
    fn test_dangling_target_is_rejected() {
        let err = Flow::new(
            "Bad",
            [(START, FlowNode::of::<EchoNode>().on("success", "nonexistent_node"))],
        )
        .unwrap_err();
        assert!(err.to_string().contains("pointing to unknown node"));
        assert_eq!(
            err,
            FlowError::UnknownTarget {
                node: START.into(),
                action: "success".into(),
                target: "nonexistent_node".into(),
            }
        );
    }

    #[test]
    fn test_unreachable_nodes_and_cycles_are_legal() {
        let flow = Flow::new(
            "Loose",
            [
                (START, FlowNode::of::<EchoNode>().on(DEFAULT_ACTION, START)),
                ("island", FlowNode::of::<EchoNode>()),
            ],
        );
        assert!(flow.is_ok());
    }

    #[test]
    fn test_echo_scenario() {
        let result = echo_flow().run_default(Some(Store::new().with("x", 1)));

        assert_eq!(result.flow_path(), ["start"]);
        assert_eq!(result.steps(), 1);
        assert!(result.completed());
        assert_eq!(result.get_number("x"), Some(1.0));
        assert_eq!(result.flow_name(), Some("Echo"));
        assert_eq!(result.action(), None);
    }

    #[test]
    fn test_linear_success_chain() {
        let flow = Flow::new(
            "Chain",
            [
                (START, FlowNode::of::<SuccessNode>().on("success", "b")),
                ("b", FlowNode::of::<SuccessNode>().on("success", END)),
            ],
        )
        .unwrap();

        let result = flow.run_default(None);
        assert_eq!(result.flow_path(), ["start", "b"]);
        assert_eq!(result.steps(), 2);
        assert!(result.completed());
    }

    #[test]
    fn test_missing_action_edge_falls_back_to_default_then_end() {
        let flow = Flow::new(
            "Fallback",
            [
                (START, FlowNode::of::<SuccessNode>().on(DEFAULT_ACTION, "b")),
                ("b", FlowNode::of::<SuccessNode>()),
            ],
        )
        .unwrap();

        let result = flow.run_default(None);
        assert_eq!(result.flow_path(), ["start", "b"]);
        assert!(result.completed());
    }

    #[test]
    fn test_self_loop_exhausts_step_budget() {
        let flow =
            Flow::new("Loop", [(START, FlowNode::of::<EchoNode>().on(DEFAULT_ACTION, START))])
                .unwrap();

        let result = flow.run(None, 5);
        assert_eq!(result.steps(), 5);
        assert_eq!(result.flow_path().len(), 5);
        assert!(!result.completed());
        assert!(result.is_error());
        assert!(result.error().unwrap().contains("exceeded maximum steps"));
    }

    #[test]
    fn test_reaching_end_on_last_step_is_not_an_overrun() {
        let result = echo_flow().run(None, 1);
        assert!(result.completed());
        assert!(!result.is_error());
    }

    #[test]
    fn test_zero_budget_runs_nothing() {
        let result = echo_flow().run(None, 0);
        assert_eq!(result.steps(), 0);
        assert!(result.flow_path().is_empty());
        assert!(!result.completed());
        assert!(result.error().unwrap().contains("(0)"));
    }

    #[test]
    fn test_error_with_edge_continues() {
        let flow = Flow::new(
            "Recover",
            [(START, FlowNode::of::<ErrorNode>().on("success", END).on(ERROR_ACTION, END))],
        )
        .unwrap();

        let result = flow.run_default(None);
        assert!(result.completed());
        assert_eq!(result.action(), Some(ERROR_ACTION));
        assert!(result.error().unwrap().contains("Test error"));
        assert_eq!(result.error_node(), Some(START));
    }

    #[test]
    fn test_error_without_edge_halts() {
        let flow =
            Flow::new("Halt", [(START, FlowNode::of::<ErrorNode>().on("success", END))]).unwrap();

        let result = flow.run_default(None);
        assert!(!result.completed());
        assert_eq!(result.action(), Some(ERROR_ACTION));
        assert!(result.error().unwrap().contains("Test error"));
        assert_eq!(result.flow_path(), ["start"]);
        assert_eq!(result.steps(), 1);
    }

    /// Consumes an incoming error action so its own execute runs.
    #[derive(Debug, Default)]
    struct RecoverNode;

    impl NodeType for RecoverNode {
        fn type_name(&self) -> String {
            "RecoverNode".to_string()
        }

        fn prepare(&mut self, store: &mut Store) -> Result<(), NodeError> {
            store.clear_action();
            Ok(())
        }

        fn execute(&mut self, store: &mut Store) -> Result<(), NodeError> {
            store.set("recovered", true);
            store.set_action("success");
            Ok(())
        }
    }

    #[test]
    fn test_error_edge_routes_to_handler() {
        let flow = Flow::new(
            "Handler",
            [
                (START, FlowNode::of::<ErrorNode>().on(ERROR_ACTION, "handler")),
                ("handler", FlowNode::of::<RecoverNode>().on("success", END)),
            ],
        )
        .unwrap();

        let result = flow.run_default(None);
        assert_eq!(result.flow_path(), ["start", "handler"]);
        assert!(result.completed());
        assert_eq!(result.action(), Some("success"));
        assert!(result.contains("recovered"));
        // the handler does not clear the recorded failure
        assert_eq!(result.error_node(), Some(START));
    }

    #[test]
    fn test_handler_that_keeps_error_action_skips_execute_and_halts() {
        let flow = Flow::new(
            "Handler",
            [
                (START, FlowNode::of::<ErrorNode>().on(ERROR_ACTION, "handler")),
                ("handler", FlowNode::of::<SuccessNode>().on("success", END)),
            ],
        )
        .unwrap();

        let result = flow.run_default(None);
        assert_eq!(result.flow_path(), ["start", "handler"]);
        assert!(!result.completed());
        assert_eq!(result.action(), Some(ERROR_ACTION));
    }

    #[test]
    fn test_panicking_factory_is_contained() {
        let flow = Flow::new(
            "Broken",
            [(
                START,
                FlowNode::from_factory("Broken", || -> Box<dyn NodeType> {
                    panic!("factory exploded")
                })
                .on(ERROR_ACTION, END),
            )],
        )
        .unwrap();

        let result = flow.run_default(None);
        assert!(!result.completed());
        assert_eq!(result.error_node(), Some(START));
        assert!(result.error().unwrap().contains("factory exploded"));
    }

    #[test]
    fn test_initial_store_keeps_user_data_and_resets_run_record() {
        let flow = echo_flow();
        let first = flow.run_default(Some(Store::new().with("custom_data", "test")));
        let second = flow.run_default(Some(first));

        assert_eq!(second.get_str("custom_data"), Some("test"));
        assert_eq!(second.flow_path(), ["start"]);
        assert_eq!(second.steps(), 1);
    }

    #[test]
    fn test_same_definition_builds_independent_flows() {
        let build = || {
            Flow::new(
                "Twin",
                [
                    (START, FlowNode::of::<SuccessNode>().on("success", "b")),
                    ("b", FlowNode::of::<EchoNode>()),
                ],
            )
            .unwrap()
        };
        let a = build();
        let b = build();

        let ra = a.run_default(None);
        let rb = b.run_default(None);
        assert_eq!(ra.flow_path(), rb.flow_path());
        assert_eq!(ra.completed(), rb.completed());
    }

    /// Counts its own executions; a reused instance would report more than one.
    #[derive(Debug, Default)]
    struct CounterNode {
        calls: usize,
    }

    impl NodeType for CounterNode {
        fn type_name(&self) -> String {
            "CounterNode".to_string()
        }

        fn execute(&mut self, store: &mut Store) -> Result<(), NodeError> {
            self.calls += 1;
            let step = store.flow_path().len();
            store.set(format!("calls_{step}"), self.calls);
            store.set_action("again");
            Ok(())
        }
    }

    #[test]
    fn test_each_step_gets_a_fresh_node_instance() {
        let counter = FlowNode::of::<CounterNode>().on("again", START);
        let flow = Flow::new("Counter", [(START, counter)]).unwrap();

        let result = flow.run(None, 3);
        assert_eq!(result.steps(), 3);
        for step in 1..=3 {
            assert_eq!(result.get_number(&format!("calls_{step}")), Some(1.0));
        }
    }

    #[test]
    fn test_duplicate_id_replaces_earlier_definition_in_place() {
        let flow = Flow::new(
            "Dup",
            [
                (START, FlowNode::of::<EchoNode>().on(DEFAULT_ACTION, "b")),
                ("b", FlowNode::of::<ErrorNode>()),
                ("b", FlowNode::of::<SuccessNode>().on("success", END)),
            ],
        )
        .unwrap();

        assert_eq!(flow.len(), 2);
        assert_eq!(flow.node_ids().collect::<Vec<_>>(), vec![START, "b"]);
        assert_eq!(flow.get("b").unwrap().type_name(), "SuccessNode");
        assert!(flow.run(None, 10).completed());
    }

    #[test]
    fn test_duplicate_transition_replaces_previous_target() {
        let node = FlowNode::of::<EchoNode>().on("go", "a").on("go", END);
        assert_eq!(node.transitions().len(), 1);
        assert_eq!(node.target("go"), Some(END));
    }

    #[test]
    fn test_visualize() {
        let flow = Flow::new(
            "Demo",
            [
                (START, FlowNode::of::<SuccessNode>().on("success", "b").on(ERROR_ACTION, END)),
                ("b", FlowNode::of::<EchoNode>().on(DEFAULT_ACTION, END)),
            ],
        )
        .unwrap();

        let expected = "Flow: Demo\n\
                        ==========\n\
                        \n\
                        start (SuccessNode):\n  \
                        --[success]--> b\n  \
                        --[error]--> end\n\
                        \n\
                        b (EchoNode):\n  \
                        --[default]--> end\n";
        assert_eq!(flow.visualize(), expected);
    }
}
