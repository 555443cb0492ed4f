// src/flow_file.rs

use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};

use crate::{
    flow::{Flow, FlowError},
    registry::NodeRegistry,
};

/// A declarative flow definition, as stored in a `.json`, `.yaml` or `.yml` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FlowFile {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Nodes in declaration order; one of them must have id `start`.
    pub nodes: Vec<NodeEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NodeEntry {
    pub id: String,

    /// Name the node type is registered under, e.g. `greeting`.
    #[serde(rename = "type")]
    pub node_type: String,

    /// action → target node id. Unmatched actions fall back to `default`,
    /// then to `end`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub transitions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowFormat {
    Json,
    Yaml,
}

impl FlowFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path
            .extension()
            .and_then(|os| os.to_str())
            .unwrap_or_default()
            .to_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FlowFileError {
    #[error("read error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml_bw::Error),
    #[error("unsupported extension for {0} (expected .json, .yaml or .yml)")]
    UnsupportedExtension(PathBuf),
    #[error("Node '{node}' has unknown type '{node_type}'")]
    UnknownNodeType { node: String, node_type: String },
    #[error("Duplicate node id '{0}'")]
    DuplicateNode(String),
    #[error(transparent)]
    Flow(#[from] FlowError),
}

impl FlowFile {
    pub fn parse(text: &str, format: FlowFormat) -> Result<Self, FlowFileError> {
        let file = match format {
            FlowFormat::Json => serde_json::from_str(text)?,
            FlowFormat::Yaml => serde_yaml_bw::from_str(text)?,
        };
        Ok(file)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, FlowFileError> {
        let path = path.as_ref();
        let format = FlowFormat::from_path(path)
            .ok_or_else(|| FlowFileError::UnsupportedExtension(path.to_path_buf()))?;
        let contents = fs::read_to_string(path).map_err(|source| FlowFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, format)
    }

    /// Resolves every node type through `registry` and validates the result.
    pub fn build(&self, registry: &NodeRegistry) -> Result<Flow, FlowFileError> {
        let mut seen = HashSet::new();
        let mut definition = Vec::with_capacity(self.nodes.len());

        for entry in &self.nodes {
            if !seen.insert(entry.id.as_str()) {
                return Err(FlowFileError::DuplicateNode(entry.id.clone()));
            }
            let node = registry.flow_node(&entry.node_type).ok_or_else(|| {
                FlowFileError::UnknownNodeType {
                    node: entry.id.clone(),
                    node_type: entry.node_type.clone(),
                }
            })?;
            let node = entry
                .transitions
                .iter()
                .fold(node, |node, (action, target)| node.on(action, target));
            definition.push((entry.id.clone(), node));
        }

        Ok(Flow::new(self.name.clone(), definition)?)
    }
}

pub fn load_flow(path: impl AsRef<Path>, registry: &NodeRegistry) -> Result<Flow, FlowFileError> {
    FlowFile::load(path)?.build(registry)
}

/// Loads every flow file in `dir`, creating the directory if needed.
/// Files that fail to load are logged and skipped.
pub fn load_flows_from_dir(dir: &Path, registry: &NodeRegistry) -> Result<Vec<Flow>, FlowFileError> {
    let io_err = |source: std::io::Error| FlowFileError::Io {
        path: dir.to_path_buf(),
        source,
    };
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(io_err)?;
    }

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && FlowFormat::from_path(&path).is_some() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut flows = Vec::with_capacity(paths.len());
    for path in paths {
        match load_flow(&path, registry) {
            Ok(flow) => {
                info!("Loaded flow {} from {}", flow.name(), path.display());
                flows.push(flow);
            }
            Err(e) => error!("Failed to load {}: {}", path.display(), e),
        }
    }
    Ok(flows)
}

/// JSON schema of the flow file format.
pub fn flow_schema() -> Value {
    schema_for!(FlowFile).to_value()
}
