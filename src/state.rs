use std::{collections::HashMap, fmt};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Action token that marks a failed node.
pub const ERROR_ACTION: &str = "error";

pub const FLOW_NAME_KEY: &str = "_flow_name";
pub const FLOW_PATH_KEY: &str = "_flow_path";
pub const FLOW_STEPS_KEY: &str = "_flow_steps";
pub const FLOW_COMPLETED_KEY: &str = "_flow_completed";
pub const ACTION_KEY: &str = "action";
pub const ERROR_KEY: &str = "error";
pub const ERROR_NODE_KEY: &str = "error_node";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(untagged)]
pub enum StateValue {
    String(String),
    Number(f64),
    Boolean(bool),
    List(Vec<StateValue>),
    Map(HashMap<String, StateValue>),
    Null,
}

/// The shape of a `StateValue`, used by field validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Number,
    Boolean,
    List,
    Map,
    Null,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::String => "string",
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::List => "list",
            ValueKind::Map => "map",
            ValueKind::Null => "null",
        };
        f.write_str(name)
    }
}

impl StateValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            StateValue::String(_) => ValueKind::String,
            StateValue::Number(_) => ValueKind::Number,
            StateValue::Boolean(_) => ValueKind::Boolean,
            StateValue::List(_) => ValueKind::List,
            StateValue::Map(_) => ValueKind::Map,
            StateValue::Null => ValueKind::Null,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let StateValue::String(s) = self {
            Some(s)
        } else {
            None
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        if let StateValue::Number(n) = self {
            Some(*n)
        } else {
            None
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        if let StateValue::Boolean(b) = self {
            Some(*b)
        } else {
            None
        }
    }

    pub fn as_list(&self) -> Option<&Vec<StateValue>> {
        if let StateValue::List(l) = self {
            Some(l)
        } else {
            None
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, StateValue>> {
        if let StateValue::Map(m) = self {
            Some(m)
        } else {
            None
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            StateValue::String(s) => json!(s),
            StateValue::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                json!(*n as i64)
            }
            StateValue::Number(n) => json!(n),
            StateValue::Boolean(b) => json!(b),
            StateValue::List(l) => json!(l.iter().map(|v| v.to_json()).collect::<Vec<_>>()),
            StateValue::Map(m) => {
                Value::Object(m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
            StateValue::Null => Value::Null,
        }
    }
}

/// Renders the value the way a user would write it: strings unquoted,
/// integral numbers without a fractional part.
impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::String(s) => f.write_str(s),
            StateValue::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                write!(f, "{}", *n as i64)
            }
            StateValue::Number(n) => write!(f, "{n}"),
            StateValue::Boolean(b) => write!(f, "{b}"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<Value> for StateValue {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => StateValue::String(s),
            Value::Number(n) => StateValue::Number(n.as_f64().unwrap_or_default()),
            Value::Bool(b) => StateValue::Boolean(b),
            Value::Array(a) => StateValue::List(a.into_iter().map(StateValue::from).collect()),
            Value::Object(o) => {
                StateValue::Map(o.into_iter().map(|(k, v)| (k, StateValue::from(v))).collect())
            }
            Value::Null => StateValue::Null,
        }
    }
}

impl From<&str> for StateValue {
    fn from(s: &str) -> Self {
        StateValue::String(s.to_string())
    }
}

impl From<String> for StateValue {
    fn from(s: String) -> Self {
        StateValue::String(s)
    }
}

impl From<f64> for StateValue {
    fn from(n: f64) -> Self {
        StateValue::Number(n)
    }
}

impl From<i64> for StateValue {
    fn from(n: i64) -> Self {
        StateValue::Number(n as f64)
    }
}

impl From<i32> for StateValue {
    fn from(n: i32) -> Self {
        StateValue::Number(f64::from(n))
    }
}

impl From<usize> for StateValue {
    fn from(n: usize) -> Self {
        StateValue::Number(n as f64)
    }
}

impl From<bool> for StateValue {
    fn from(b: bool) -> Self {
        StateValue::Boolean(b)
    }
}

impl<T: Into<StateValue>> From<Vec<T>> for StateValue {
    fn from(items: Vec<T>) -> Self {
        StateValue::List(items.into_iter().map(Into::into).collect())
    }
}

/// Bookkeeping the interpreter keeps about the current run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunMetadata {
    pub flow_name: Option<String>,
    /// Visited node ids in order; repeats when the flow loops.
    pub path: Vec<String>,
    pub steps: usize,
    pub completed: bool,
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("initial state must be a JSON object, got {0}")]
    NotAnObject(String),
}

/// The shared context threaded through one flow run.
///
/// Node data lives in an open string-keyed map; the keys the interpreter
/// reserves (action, error, error node and the run record) are explicit
/// fields so nodes cannot clobber them by accident.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Store {
    values: HashMap<String, StateValue>,
    action: Option<String>,
    error: Option<String>,
    error_node: Option<String>,
    run: RunMetadata,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for seeding a run.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(StateValue::as_str)
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(StateValue::as_number)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<StateValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<StateValue> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn values(&self) -> &HashMap<String, StateValue> {
        &self.values
    }

    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub fn set_action(&mut self, action: impl Into<String>) {
        self.action = Some(action.into());
    }

    pub fn clear_action(&mut self) {
        self.action = None;
    }

    pub fn is_error(&self) -> bool {
        self.action.as_deref() == Some(ERROR_ACTION)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn error_node(&self) -> Option<&str> {
        self.error_node.as_deref()
    }

    /// Signals a validation failure: action becomes the error token.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.action = Some(ERROR_ACTION.to_string());
        self.error = Some(message.into());
    }

    /// Like [`Store::fail`], also tagging the node that failed.
    pub fn fail_at(&mut self, node_id: impl Into<String>, message: impl Into<String>) {
        self.fail(message);
        self.error_node = Some(node_id.into());
    }

    pub fn run(&self) -> &RunMetadata {
        &self.run
    }

    pub fn flow_name(&self) -> Option<&str> {
        self.run.flow_name.as_deref()
    }

    pub fn flow_path(&self) -> &[String] {
        &self.run.path
    }

    pub fn steps(&self) -> usize {
        self.run.steps
    }

    pub fn completed(&self) -> bool {
        self.run.completed
    }

    pub(crate) fn begin_run(&mut self, flow_name: &str) {
        self.run.flow_name = Some(flow_name.to_string());
        self.run.path.clear();
        self.run.steps = 0;
        self.run.completed = false;
    }

    pub(crate) fn record_visit(&mut self, node_id: &str) {
        self.run.path.push(node_id.to_string());
    }

    pub(crate) fn finish_run(&mut self, steps: usize, completed: bool) {
        self.run.steps = steps;
        self.run.completed = completed;
    }

    /// Reads a JSON object into a store. `action`, `error` and
    /// `error_node` land in the reserved fields; `_flow_*` keys are
    /// interpreter output and are dropped.
    pub fn from_json(value: Value) -> Result<Self, StateError> {
        let map = match value {
            Value::Object(map) => map,
            other => return Err(StateError::NotAnObject(other.to_string())),
        };
        let mut store = Store::new();
        for (key, value) in map {
            match key.as_str() {
                ACTION_KEY => store.action = value.as_str().map(str::to_string),
                ERROR_KEY => store.error = value.as_str().map(str::to_string),
                ERROR_NODE_KEY => store.error_node = value.as_str().map(str::to_string),
                k if k.starts_with("_flow_") => {}
                _ => {
                    store.values.insert(key, StateValue::from(value));
                }
            }
        }
        Ok(store)
    }

    /// Flat JSON view with the reserved fields under their conventional keys.
    pub fn to_json(&self) -> Value {
        let mut map: Map<String, Value> =
            self.values.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
        if let Some(action) = &self.action {
            map.insert(ACTION_KEY.into(), json!(action));
        }
        if let Some(error) = &self.error {
            map.insert(ERROR_KEY.into(), json!(error));
        }
        if let Some(node) = &self.error_node {
            map.insert(ERROR_NODE_KEY.into(), json!(node));
        }
        if let Some(name) = &self.run.flow_name {
            map.insert(FLOW_NAME_KEY.into(), json!(name));
            map.insert(FLOW_PATH_KEY.into(), json!(self.run.path));
            map.insert(FLOW_STEPS_KEY.into(), json!(self.run.steps));
            map.insert(FLOW_COMPLETED_KEY.into(), json!(self.run.completed));
        }
        Value::Object(map)
    }
}
