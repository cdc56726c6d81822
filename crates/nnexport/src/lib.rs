//! Keras source generation from declarative layer graphs
//!
//! An [`Architecture`] is a flat list of named layer records that reference
//! their inputs by name. Exporting links the records into a [`LayerGraph`],
//! rejects malformed graphs, picks an emitter and returns the program text:
//!
//! ```
//! use nnexport::{Architecture, ExportOptions, LayerTypeRegistry, export_architecture};
//!
//! let architecture = Architecture::from_json(
//!     r#"{"name": "Model", "layers": [
//!         {"name": "in1", "type": "Input", "params": {"shape": [28, 28]}},
//!         {"name": "d1", "type": "Dense", "params": {"units": 10}, "inputs": ["in1"]}
//!     ]}"#,
//! )
//! .unwrap();
//!
//! let result = export_architecture(
//!     &architecture,
//!     &ExportOptions::default(),
//!     &LayerTypeRegistry::default(),
//! )
//! .unwrap();
//! assert!(result.source_code.contains("dense_0 = Dense(units=10, name=\"d1\")(input_0)"));
//! ```

pub mod architecture;
pub mod code_builder;
pub mod config;
pub mod error;
pub mod exporting;
pub mod format;
pub mod layer_graph;
pub mod layer_types;
pub mod types;

pub use architecture::{Architecture, LayerRecord, Params};
pub use error::{ErrorKind, ExportError, Result};
pub use exporting::{
    EmitterKind, EmitterOptions, ExportOptions, ExportResult, FrameworkRegistry, GeneratedCode,
    export, export_architecture,
};
pub use format::{FormatOptions, Indent, LineBreak};
pub use layer_graph::{LayerGraph, LayerNode, NodeId};
pub use layer_types::{LayerTypeRegistry, LayerTypeSchema};
