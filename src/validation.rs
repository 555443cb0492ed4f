//! Checks shared by node implementations.

use crate::{
    node::NodeError,
    state::{Store, ValueKind},
};

/// Every field must be present in the store.
pub fn require_fields(store: &Store, fields: &[&str]) -> Result<(), NodeError> {
    let missing: Vec<&str> = fields.iter().copied().filter(|f| !store.contains(f)).collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(NodeError::InvalidInput(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )))
    }
}

/// Fields that are present must have the expected kind. Absent fields pass;
/// combine with [`require_fields`] when they are mandatory.
pub fn require_kinds(store: &Store, kinds: &[(&str, ValueKind)]) -> Result<(), NodeError> {
    for (field, expected) in kinds {
        if let Some(value) = store.get(field) {
            let actual = value.kind();
            if actual != *expected {
                return Err(NodeError::InvalidInput(format!(
                    "Field '{field}' must be {expected}, got {actual}"
                )));
            }
        }
    }
    Ok(())
}

/// Runs a check and turns a failure into a validation error on the store,
/// returning whether the check passed. Meant for `prepare`, where a failed
/// check should skip `execute` without aborting `finalize`.
pub fn check(store: &mut Store, result: Result<(), NodeError>) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            store.fail(err.to_string());
            false
        }
    }
}
