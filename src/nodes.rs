//! Built-in demonstration nodes, registered under short names by
//! [`NodeRegistry::with_builtins`](crate::registry::NodeRegistry::with_builtins).

use std::{cmp::Ordering, collections::HashMap};

use rand::Rng;

use crate::{
    node::{NodeError, NodeType},
    state::{StateValue, Store, ValueKind},
    validation::{check, require_fields, require_kinds},
};

const SUCCESS: &str = "success";

/// Leaves the store untouched and sets no action.
#[derive(Debug, Default)]
pub struct EchoNode;

impl NodeType for EchoNode {
    fn type_name(&self) -> String {
        "EchoNode".to_string()
    }

    fn execute(&mut self, _store: &mut Store) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Builds a greeting for `name`, aware of `time_of_day`.
#[derive(Debug, Default)]
pub struct GreetingNode;

impl NodeType for GreetingNode {
    fn type_name(&self) -> String {
        "GreetingNode".to_string()
    }

    fn prepare(&mut self, store: &mut Store) -> Result<(), NodeError> {
        let valid = require_fields(store, &["name"])
            .and_then(|_| require_kinds(store, &[("name", ValueKind::String)]));
        if !check(store, valid) {
            return Ok(());
        }

        let name = store.get_str("name").map(|n| title_case(n.trim()));
        if let Some(name) = name {
            store.set("name", name);
        }
        Ok(())
    }

    fn execute(&mut self, store: &mut Store) -> Result<(), NodeError> {
        let name = store
            .get_str("name")
            .ok_or_else(|| NodeError::InvalidInput("name must be a string".to_string()))?
            .to_string();

        let greeting = match store.get_str("time_of_day").unwrap_or("day") {
            "morning" => format!("Good morning, {name}! ☀️"),
            "afternoon" => format!("Good afternoon, {name}! 🌤️"),
            "evening" => format!("Good evening, {name}! 🌙"),
            _ => format!("Hello, {name}! 👋"),
        };

        store.set("greeting", greeting);
        store.set_action(SUCCESS);
        Ok(())
    }

    fn finalize(&mut self, store: &mut Store) -> Result<(), NodeError> {
        if store.action() != Some(SUCCESS) {
            return Ok(());
        }
        let length = store.get_str("greeting").map(|g| g.chars().count()).unwrap_or_default();
        let time_aware = matches!(store.get("time_of_day"), Some(v) if *v != StateValue::Null);

        let metadata = HashMap::from([
            ("length".to_string(), StateValue::from(length)),
            ("personalized".to_string(), StateValue::from(true)),
            ("time_aware".to_string(), StateValue::from(time_aware)),
        ]);
        store.set("greeting_metadata", StateValue::Map(metadata));
        Ok(())
    }
}

/// Draws an integer from `min_value..=max_value` (defaults 1 and 100).
#[derive(Debug, Default)]
pub struct RandomNumberNode;

impl NodeType for RandomNumberNode {
    fn type_name(&self) -> String {
        "RandomNumberNode".to_string()
    }

    fn prepare(&mut self, store: &mut Store) -> Result<(), NodeError> {
        if !store.contains("min_value") {
            store.set("min_value", 1);
        }
        if !store.contains("max_value") {
            store.set("max_value", 100);
        }

        let kinds = require_kinds(
            store,
            &[("min_value", ValueKind::Number), ("max_value", ValueKind::Number)],
        );
        if !check(store, kinds) {
            return Ok(());
        }

        let (min, max) = bounds(store);
        if min >= max {
            store.fail("min_value must be less than max_value");
        }
        Ok(())
    }

    fn execute(&mut self, store: &mut Store) -> Result<(), NodeError> {
        let (min, max) = bounds(store);
        let (low, high) = (min.ceil() as i64, max.floor() as i64);
        if low > high {
            return Err(NodeError::InvalidInput(format!(
                "no integer between min_value {min} and max_value {max}"
            )));
        }
        let value = rand::rng().random_range(low..=high);

        store.set("random_number", value);
        store.set_action(SUCCESS);
        Ok(())
    }
}

fn bounds(store: &Store) -> (f64, f64) {
    (
        store.get_number("min_value").unwrap_or(1.0),
        store.get_number("max_value").unwrap_or(100.0),
    )
}

/// Transforms the list in `input_data` according to `transform_type`
/// (`uppercase`, `reverse` or `sort`; default `uppercase`).
#[derive(Debug, Default)]
pub struct DataTransformNode;

impl DataTransformNode {
    fn transform_type(store: &Store) -> String {
        store.get_str("transform_type").unwrap_or("uppercase").to_string()
    }
}

impl NodeType for DataTransformNode {
    fn type_name(&self) -> String {
        "DataTransformNode".to_string()
    }

    fn prepare(&mut self, store: &mut Store) -> Result<(), NodeError> {
        let valid = require_fields(store, &["input_data"])
            .and_then(|_| require_kinds(store, &[("input_data", ValueKind::List)]));
        check(store, valid);
        Ok(())
    }

    fn execute(&mut self, store: &mut Store) -> Result<(), NodeError> {
        let input = store
            .get("input_data")
            .and_then(StateValue::as_list)
            .cloned()
            .unwrap_or_default();

        let transform = Self::transform_type(store);
        let transformed: Vec<StateValue> = match transform.as_str() {
            "uppercase" => input
                .iter()
                .map(|item| StateValue::from(item.to_string().to_uppercase()))
                .collect(),
            "reverse" => input.into_iter().rev().collect(),
            "sort" => sorted(input)?,
            other => {
                store.fail(format!("Unknown transform type: {other}"));
                return Ok(());
            }
        };

        store.set("transformed_data", StateValue::List(transformed));
        store.set_action(SUCCESS);
        Ok(())
    }

    fn finalize(&mut self, store: &mut Store) -> Result<(), NodeError> {
        if store.action() != Some(SUCCESS) {
            return Ok(());
        }
        let count = |key: &str| store.get(key).and_then(StateValue::as_list).map_or(0, Vec::len);

        let stats = HashMap::from([
            ("input_count".to_string(), StateValue::from(count("input_data"))),
            ("output_count".to_string(), StateValue::from(count("transformed_data"))),
            ("transform_type".to_string(), StateValue::from(Self::transform_type(store))),
        ]);
        store.set("transform_stats", StateValue::Map(stats));
        Ok(())
    }
}

/// Sorts a homogeneous list of strings or numbers.
fn sorted(mut items: Vec<StateValue>) -> Result<Vec<StateValue>, NodeError> {
    let kinds: Vec<ValueKind> = items.iter().map(StateValue::kind).collect();
    let homogeneous = kinds.windows(2).all(|w| w[0] == w[1]);
    let sortable = kinds
        .first()
        .is_none_or(|k| matches!(k, ValueKind::String | ValueKind::Number));
    if !homogeneous || !sortable {
        return Err(NodeError::ExecutionFailed(
            "sort needs a list of only strings or only numbers".to_string(),
        ));
    }

    items.sort_by(|a, b| match (a, b) {
        (StateValue::Number(x), StateValue::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (StateValue::String(x), StateValue::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    });
    Ok(items)
}

/// Branches on `value` against `threshold` (defaults 0 and 50).
#[derive(Debug, Default)]
pub struct ConditionalNode;

impl NodeType for ConditionalNode {
    fn type_name(&self) -> String {
        "ConditionalNode".to_string()
    }

    fn execute(&mut self, store: &mut Store) -> Result<(), NodeError> {
        let value = store.get_number("value").unwrap_or(0.0);
        let threshold = store.get_number("threshold").unwrap_or(50.0);
        let (v, t) = (StateValue::from(value), StateValue::from(threshold));

        let (action, message) = match value.partial_cmp(&threshold) {
            Some(Ordering::Greater) => ("above_threshold", format!("Value {v} is above threshold {t}")),
            Some(Ordering::Less) => ("below_threshold", format!("Value {v} is below threshold {t}")),
            _ => ("at_threshold", format!("Value {v} equals threshold {t}")),
        };

        store.set_action(action);
        store.set("message", message);
        Ok(())
    }
}

/// Upper-cases the first letter of every word and lower-cases the rest.
fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut at_word_start = true;
    for c in input.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}
