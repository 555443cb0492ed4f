use std::{
    any::Any,
    fmt::{self, Debug},
    panic::{self, AssertUnwindSafe},
};

use thiserror::Error;
use tracing::{debug, error, info};

use crate::state::Store;

/// One unit of work with a three-phase lifecycle over the shared store.
///
/// Only [`NodeType::execute`] is required. Phases mutate the store in
/// place; returning an error from any phase aborts the remaining phases
/// and is recorded in the store by [`Node::run`].
pub trait NodeType: Send + Debug {
    fn type_name(&self) -> String;

    /// Validate and normalise inputs. A node may call [`Store::fail`]
    /// here instead of returning an error; `execute` is then skipped.
    fn prepare(&mut self, _store: &mut Store) -> Result<(), NodeError> {
        Ok(())
    }

    fn execute(&mut self, store: &mut Store) -> Result<(), NodeError>;

    /// Post-processing, runs whether or not `execute` did.
    fn finalize(&mut self, _store: &mut Store) -> Result<(), NodeError> {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Runs a node's lifecycle and is the failure boundary around it:
/// nothing a phase does, error or panic, escapes [`Node::run`].
pub struct Node {
    id: String,
    inner: Box<dyn NodeType>,
}

impl Node {
    pub fn new(inner: Box<dyn NodeType>) -> Self {
        let id = inner.type_name();
        Self { id, inner }
    }

    /// The id is what gets recorded as `error_node` on failure.
    pub fn with_id(id: impl Into<String>, inner: Box<dyn NodeType>) -> Self {
        Self { id: id.into(), inner }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn type_name(&self) -> String {
        self.inner.type_name()
    }

    #[tracing::instrument(name = "node_run", skip(self, store), fields(node = %self.id))]
    pub fn run(&mut self, store: &mut Store) {
        info!("Running {}", self.id);

        let inner = &mut self.inner;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_phases(inner.as_mut(), store)));

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(payload) => Some(format!("node panicked: {}", panic_message(payload.as_ref()))),
        };

        match failure {
            None => info!(
                "Completed {} with action: {}",
                self.id,
                store.action().unwrap_or("none")
            ),
            Some(message) => {
                error!("Error in {}: {}", self.id, message);
                store.fail_at(self.id.clone(), message);
            }
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Node").field(&self.id).field(&self.inner).finish()
    }
}

fn run_phases(node: &mut dyn NodeType, store: &mut Store) -> Result<(), NodeError> {
    debug!("prepare");
    node.prepare(store)?;

    if store.is_error() {
        debug!("prepare signalled an error, skipping execute");
    } else {
        debug!("execute");
        node.execute(store)?;
    }

    debug!("finalize");
    node.finalize(store)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
