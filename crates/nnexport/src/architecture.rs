//! The architecture document accepted by the exporter
//!
//! An architecture is a flat, ordered list of layer records. Records refer to
//! each other by name; turning those references into edges is the job of
//! [`crate::layer_graph::LayerGraph::link`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::FxIndexMap;

/// Layer parameters, in the order they were submitted
pub type Params = FxIndexMap<String, Value>;

/// A single layer as submitted, before linking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRecord {
    /// Identifier, unique within one architecture
    pub name: String,
    /// Layer kind, resolved against a [`crate::layer_types::LayerTypeRegistry`]
    #[serde(rename = "type")]
    pub layer_type: String,
    #[serde(default)]
    pub params: Params,
    /// Names of the layers feeding this one, in call order
    #[serde(default)]
    pub inputs: Vec<String>,
}

impl LayerRecord {
    pub fn new(name: impl Into<String>, layer_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layer_type: layer_type.into(),
            params: Params::default(),
            inputs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(inputs.into_iter().map(Into::into));
        self
    }
}

/// A complete architecture submission with its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub date_created: Option<String>,
    /// Model name, passed to the generated model constructor
    #[serde(default = "default_model_name")]
    pub name: String,
    pub layers: Vec<LayerRecord>,
}

fn default_model_name() -> String {
    "Model".to_owned()
}

impl Architecture {
    pub fn new(name: impl Into<String>, layers: Vec<LayerRecord>) -> Self {
        Self {
            id: None,
            date_created: None,
            name: name.into(),
            layers,
        }
    }

    /// Parse an architecture from its JSON representation
    pub fn from_json(source: &str) -> serde_json::Result<Self> {
        serde_json::from_str(source)
    }
}
