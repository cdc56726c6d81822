//! Error taxonomy for architecture exporting
//!
//! Every failure is terminal for one export call. [`ErrorKind`] groups the
//! variants so callers (an HTTP layer, the CLI) can map them to responses
//! without matching on every variant.

use thiserror::Error;

/// Result type alias for export operations
pub type Result<T> = std::result::Result<T, ExportError>;

/// Coarse classification of an [`ExportError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The submitted architecture is malformed
    Structural,
    /// An unknown framework, formatting or emitter option was requested
    Selection,
    /// An emitter was asked to handle a graph it does not support
    Precondition,
    /// The generator produced something it should not have
    Internal,
}

/// Errors raised while linking, validating or emitting an architecture
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExportError {
    #[error("Layer '{layer}' references unknown input layer '{missing}'")]
    UnresolvedReference { layer: String, missing: String },

    #[error("Architecture contains a cycle through layers: {}", .layers.join(", "))]
    CyclicGraph { layers: Vec<String> },

    #[error("Architecture has no layers")]
    EmptyArchitecture,

    #[error("Architecture has no input layers")]
    NoInputLayers,

    #[error("Layer '{layer}' of type {layer_type} is missing required parameter '{param}'")]
    MissingParameter {
        layer: String,
        layer_type: String,
        param: String,
    },

    #[error("Parameter '{param}' of layer '{layer}' is not a valid keyword argument name")]
    InvalidParameterName { layer: String, param: String },

    #[error(
        "Parameter '{param}' of layer '{layer}' must be an object with optional 'l1' and 'l2' \
         weights"
    )]
    InvalidRegularizer { layer: String, param: String },

    #[error("Layer '{layer}' has unknown type '{layer_type}', known types are: {}", .known.join(", "))]
    UnknownLayerType {
        layer: String,
        layer_type: String,
        known: Vec<String>,
    },

    #[error("Input layer '{layer}' cannot consume other layers")]
    InvalidInputLayer { layer: String },

    #[error("Unknown {option} '{value}', known {option}s are: {}", .known.join(", "))]
    UnknownOption {
        option: String,
        value: String,
        known: Vec<String>,
    },

    #[error("Model is not sequential: {reason}")]
    NotSequential { reason: String },

    #[error("Generated code is not valid Python: {message}")]
    InvalidGeneratedCode { message: String },
}

impl ExportError {
    /// Build an [`ExportError::UnknownOption`] from any list of known names
    pub fn unknown_option<I, S>(option: &str, value: &str, known: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::UnknownOption {
            option: option.to_owned(),
            value: value.to_owned(),
            known: known.into_iter().map(Into::into).collect(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnresolvedReference { .. }
            | Self::CyclicGraph { .. }
            | Self::EmptyArchitecture
            | Self::NoInputLayers
            | Self::MissingParameter { .. }
            | Self::InvalidParameterName { .. }
            | Self::InvalidRegularizer { .. }
            | Self::UnknownLayerType { .. }
            | Self::InvalidInputLayer { .. } => ErrorKind::Structural,
            Self::UnknownOption { .. } => ErrorKind::Selection,
            Self::NotSequential { .. } => ErrorKind::Precondition,
            Self::InvalidGeneratedCode { .. } => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_option_lists_choices() {
        let err = ExportError::unknown_option("framework", "torch", ["keras"]);
        assert_eq!(
            err.to_string(),
            "Unknown framework 'torch', known frameworks are: keras"
        );
        assert_eq!(err.kind(), ErrorKind::Selection);
    }

    #[test]
    fn test_reference_error_names_missing_layer() {
        let err = ExportError::UnresolvedReference {
            layer: "dense".into(),
            missing: "nope".into(),
        };
        assert!(err.to_string().contains("'nope'"));
        assert_eq!(err.kind(), ErrorKind::Structural);
    }

    #[test]
    fn test_cycle_message_lists_layers() {
        let err = ExportError::CyclicGraph {
            layers: vec!["a".into(), "b".into()],
        };
        assert_eq!(
            err.to_string(),
            "Architecture contains a cycle through layers: a, b"
        );
    }
}
