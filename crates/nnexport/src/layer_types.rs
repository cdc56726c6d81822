//! Registry of supported layer types
//!
//! Layer kinds are an open set: the built-in table covers the layers the
//! exporter has always understood, and configuration can register more
//! without recompiling. Each kind carries the parameters a record of that
//! kind must provide.

use serde::{Deserialize, Serialize};

use crate::{
    architecture::LayerRecord,
    error::{ExportError, Result},
    types::FxIndexMap,
};

/// Type name of the layer that introduces model inputs
pub const INPUT_LAYER: &str = "Input";

/// What the exporter knows about one layer type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayerTypeSchema {
    /// Parameters every record of this type must carry
    pub required: Vec<String>,
}

impl LayerTypeSchema {
    pub fn requiring<I, S>(params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: params.into_iter().map(Into::into).collect(),
        }
    }
}

/// String-keyed table of layer types
#[derive(Debug, Clone)]
pub struct LayerTypeRegistry {
    types: FxIndexMap<String, LayerTypeSchema>,
}

impl Default for LayerTypeRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("Dense", LayerTypeSchema::default());
        registry.register(INPUT_LAYER, LayerTypeSchema::requiring(["shape"]));
        registry.register("BatchNormalization", LayerTypeSchema::default());
        registry.register("Dropout", LayerTypeSchema::default());
        registry.register("Flatten", LayerTypeSchema::default());
        registry
    }
}

impl LayerTypeRegistry {
    /// A registry that knows no layer types at all
    pub fn empty() -> Self {
        Self {
            types: FxIndexMap::default(),
        }
    }

    /// Add or replace a layer type
    pub fn register(&mut self, name: impl Into<String>, schema: LayerTypeSchema) {
        self.types.insert(name.into(), schema);
    }

    pub fn get(&self, name: &str) -> Option<&LayerTypeSchema> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Check that every record has a known type and its required parameters
    pub fn validate(&self, records: &[LayerRecord]) -> Result<()> {
        for record in records {
            let Some(schema) = self.get(&record.layer_type) else {
                return Err(ExportError::UnknownLayerType {
                    layer: record.name.clone(),
                    layer_type: record.layer_type.clone(),
                    known: self.names().map(str::to_owned).collect(),
                });
            };

            if let Some(param) = schema
                .required
                .iter()
                .find(|param| !record.params.contains_key(param.as_str()))
            {
                return Err(ExportError::MissingParameter {
                    layer: record.name.clone(),
                    layer_type: record.layer_type.clone(),
                    param: param.clone(),
                });
            }
        }

        log::debug!("Validated {} layer records", records.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_builtin_types() {
        let registry = LayerTypeRegistry::default();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(
            names,
            ["Dense", "Input", "BatchNormalization", "Dropout", "Flatten"]
        );
        assert_eq!(
            registry.get(INPUT_LAYER).unwrap().required,
            vec!["shape".to_owned()]
        );
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let registry = LayerTypeRegistry::default();
        let records = vec![LayerRecord::new("conv", "Conv2D")];

        let err = registry.validate(&records).unwrap_err();
        assert!(matches!(
            err,
            ExportError::UnknownLayerType { ref layer_type, .. } if layer_type == "Conv2D"
        ));
    }

    #[test]
    fn test_registered_type_is_accepted() {
        let mut registry = LayerTypeRegistry::default();
        registry.register("Conv2D", LayerTypeSchema::requiring(["filters"]));

        let ok = vec![LayerRecord::new("conv", "Conv2D").with_param("filters", json!(32))];
        assert!(registry.validate(&ok).is_ok());

        let missing = vec![LayerRecord::new("conv", "Conv2D")];
        assert_eq!(
            registry.validate(&missing).unwrap_err(),
            ExportError::MissingParameter {
                layer: "conv".into(),
                layer_type: "Conv2D".into(),
                param: "filters".into(),
            }
        );
    }

    #[test]
    fn test_input_requires_shape() {
        let registry = LayerTypeRegistry::default();
        let records = vec![LayerRecord::new("in", INPUT_LAYER)];
        assert!(matches!(
            registry.validate(&records),
            Err(ExportError::MissingParameter { ref param, .. }) if param == "shape"
        ));
    }
}
