// tests/flow_test.rs
use std::path::PathBuf;

use pocketflow::daemon::{DaemonConfig, FlowDaemon};
use pocketflow::flow::{Flow, FlowError, FlowNode};
use pocketflow::flow_file::{FlowFile, load_flow, load_flows_from_dir};
use pocketflow::node::{NodeError, NodeType};
use pocketflow::nodes::{EchoNode, GreetingNode};
use pocketflow::registry::NodeRegistry;
use pocketflow::state::{ERROR_ACTION, StateValue, Store};
use serde_json::json;
use tempfile::TempDir;

fn demo(file: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos/flows").join(file)
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
struct ExplodingNode;

impl NodeType for ExplodingNode {
    fn type_name(&self) -> String {
        "ExplodingNode".to_string()
    }

    fn execute(&mut self, _store: &mut Store) -> Result<(), NodeError> {
        Err(NodeError::ExecutionFailed("disk on fire".to_string()))
    }
}

#[test]
fn test_echo_scenario() {
    let flow = Flow::new("Echo", [("start", FlowNode::of::<EchoNode>().on("default", "end"))]).unwrap();
    let store = flow.run_default(Some(Store::new().with("x", 1)));

    assert_eq!(store.flow_path(), ["start"]);
    assert_eq!(store.steps(), 1);
    assert!(store.completed());
    assert_eq!(store.get_number("x"), Some(1.0));
}

#[test]
fn test_two_node_success_chain() {
    let flow = Flow::new(
        "Chain",
        [
            ("start", FlowNode::of::<SuccessNode>().on("success", "B")),
            ("B", FlowNode::of::<SuccessNode>().on("success", "end")),
        ],
    )
    .unwrap();
    // `start` stands in for A
    let store = flow.run_default(None);

    assert_eq!(store.flow_path(), ["start", "B"]);
    assert_eq!(store.steps(), 2);
    assert!(store.completed());
}

#[test]
fn test_construction_rejects_bad_definitions() {
    let err = Flow::new("NoStart", [("a", FlowNode::of::<EchoNode>())]).unwrap_err();
    assert_eq!(err, FlowError::MissingStart);

    let err = Flow::new("Dangling", [("start", FlowNode::of::<EchoNode>().on("go", "nowhere"))]).unwrap_err();
    assert!(matches!(err, FlowError::UnknownTarget { target, .. } if target == "nowhere"));
}

#[test]
fn test_same_definition_builds_independent_flows() {
    let definition = || [("start", FlowNode::of::<SuccessNode>().on("success", "end"))];
    let first = Flow::new("Twice", definition()).unwrap();
    let second = Flow::new("Twice", definition()).unwrap();

    let a = first.run_default(None);
    let b = second.run_default(None);
    assert_eq!(a.flow_path(), b.flow_path());
    assert_eq!(a.completed(), b.completed());
    assert_eq!(a.to_json(), b.to_json());
}

#[test]
fn test_self_loop_exhausts_budget() {
    let flow = Flow::new("Loop", [("start", FlowNode::of::<SuccessNode>().on("success", "start"))]).unwrap();
    let store = flow.run(None, 5);

    assert_eq!(store.steps(), 5);
    assert!(!store.completed());
    assert!(store.error().unwrap().contains("exceeded maximum steps"));
}

#[test]
fn test_error_edge_to_end_completes() {
    let flow = Flow::new("Handled", [("start", FlowNode::of::<ExplodingNode>().on(ERROR_ACTION, "end"))]).unwrap();
    let store = flow.run_default(None);

    assert!(store.completed());
    assert_eq!(store.action(), Some(ERROR_ACTION));
    assert!(store.error().unwrap().contains("disk on fire"));
    assert_eq!(store.error_node(), Some("start"));
}

#[test]
fn test_error_without_edge_halts_at_node() {
    let flow = Flow::new("Unhandled", [("start", FlowNode::of::<ExplodingNode>().on("success", "end"))]).unwrap();
    let store = flow.run_default(None);

    assert!(!store.completed());
    assert_eq!(store.action(), Some(ERROR_ACTION));
    assert!(store.error().unwrap().contains("disk on fire"));
    assert_eq!(store.flow_path().len(), 1);
}

#[test]
fn test_prepare_failure_never_executes() {
    let flow = Flow::new("Greet", [("start", FlowNode::of::<GreetingNode>())]).unwrap();
    let store = flow.run_default(None);

    assert!(!store.contains("greeting"));
    assert_eq!(store.error(), Some("Missing required fields: name"));
    assert!(!store.completed());
}

#[test]
fn test_every_run_reports_metadata() {
    let flow = load_flow(demo("greeting.yaml"), &NodeRegistry::with_builtins()).unwrap();
    let json = flow.run_default(None).to_json();

    assert_eq!(json["_flow_name"], "GreetingFlow");
    assert!(json["_flow_path"].is_array());
    assert!(json["_flow_steps"].is_number());
    assert!(json["_flow_completed"].is_boolean());
}

#[test]
fn test_greeting_demo() {
    let flow = load_flow(demo("greeting.yaml"), &NodeRegistry::with_builtins()).unwrap();
    let input = Store::from_json(json!({"name": "world", "time_of_day": "evening"})).unwrap();
    let store = flow.run_default(Some(input));

    assert!(store.completed());
    assert_eq!(store.get_str("greeting"), Some("Good evening, World! 🌙"));
}

#[test]
fn test_data_pipeline_demo() {
    let registry = NodeRegistry::with_builtins();
    let flow = load_flow(demo("data_pipeline.json"), &registry).unwrap();

    let ok = flow.run_default(Some(Store::new().with("input_data", vec!["a", "b"])));
    assert!(ok.completed());
    assert_eq!(ok.flow_path(), ["start", "second_transform", "final_transform"]);
    assert_eq!(ok.get("transformed_data"), Some(&StateValue::from(vec!["A", "B"])));

    // missing input routes to the handler, which carries the error through
    let failed = flow.run_default(Some(Store::new().with("name", "ops")));
    assert!(failed.completed());
    assert_eq!(failed.flow_path(), ["start", "error_handler"]);
    assert_eq!(failed.error_node(), None);
    assert_eq!(failed.error(), Some("Missing required fields: input_data"));
}

#[test]
fn test_random_conditional_demo_paths() {
    let flow = load_flow(demo("random_conditional.yaml"), &NodeRegistry::with_builtins()).unwrap();

    for _ in 0..10 {
        let input = Store::new()
            .with("threshold", 50)
            .with("input_data", vec!["x"]);
        // ConditionalNode reads `value`, which the random node never writes
        let store = flow.run_default(Some(input));
        assert!(store.completed());
        assert_eq!(store.flow_path(), ["start", "check_threshold", "low_value_handler"]);
        assert!(store.contains("random_number"));
    }

    let store = flow.run_default(Some(Store::new().with("min_value", 10).with("max_value", 5)));
    assert!(store.completed());
    assert_eq!(store.flow_path(), ["start"]);
    assert_eq!(store.error(), Some("min_value must be less than max_value"));
}

#[test]
fn test_demo_visualization_is_lossless() {
    let file = FlowFile::load(demo("random_conditional.yaml")).unwrap();
    let flow = file.build(&NodeRegistry::with_builtins()).unwrap();
    let text = flow.visualize();

    assert!(text.starts_with("Flow: RandomConditionalFlow\n"));
    for entry in &file.nodes {
        for (action, target) in &entry.transitions {
            assert!(text.contains(&format!("--[{action}]--> {target}")));
        }
    }
    assert!(text.contains("check_threshold (ConditionalNode):"));
}

#[tokio::test]
async fn test_daemon_serves_demo_directory() {
    let tmp = TempDir::new().unwrap();
    for file in ["greeting.yaml", "data_pipeline.json", "random_conditional.yaml"] {
        std::fs::copy(demo(file), tmp.path().join(file)).unwrap();
    }
    assert_eq!(load_flows_from_dir(tmp.path(), &NodeRegistry::with_builtins()).unwrap().len(), 3);

    let daemon = FlowDaemon::new(DaemonConfig::default()).with_flow_dir(tmp.path(), NodeRegistry::with_builtins());
    daemon.start().await.unwrap();
    assert_eq!(
        daemon.list(),
        vec!["DataPipelineFlow", "GreetingFlow", "RandomConditionalFlow"]
    );

    let store = daemon
        .execute_flow("GreetingFlow", Some(Store::new().with("name", "daemon")))
        .await
        .unwrap();
    assert_eq!(store.get_str("greeting"), Some("Hello, Daemon! 👋"));

    daemon.stop().await;
    assert!(!daemon.is_running());
}
