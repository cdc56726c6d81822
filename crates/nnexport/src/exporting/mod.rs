//! Export dispatcher
//!
//! Maps a framework name to its code emitter, runs the structural checks every
//! emitter relies on (non-empty, acyclic) and verifies that what comes back is
//! a well-formed Python module. Nothing is returned unless the whole program
//! was generated.

pub mod keras;

use cow_utils::CowUtils;
use log::{debug, info};
use ruff_python_parser::parse_module;
use serde::Serialize;

use crate::{
    architecture::Architecture,
    code_builder::CodeBuilder,
    error::{ExportError, Result},
    format::FormatOptions,
    layer_graph::LayerGraph,
    layer_types::LayerTypeRegistry,
    types::FxIndexMap,
};

/// Separator between lines of the topology rendering in [`ExportResult`]
pub const TOPOLOGY_SEPARATOR: &str = "<br>";

/// Framework used when none is configured
pub const DEFAULT_FRAMEWORK: &str = "keras";

/// Which emission strategy produced a program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmitterKind {
    /// A single chain of `model.add(...)` calls
    Sequential,
    /// One tensor variable per layer, assembled into a model at the end
    Functional,
}

/// Output of a framework emitter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCode {
    pub emitter: EmitterKind,
    pub source: String,
}

/// Framework-specific options, forwarded to the emitter as given
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmitterOptions(FxIndexMap<String, String>);

impl EmitterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read a boolean option; absent options are `None`
    pub fn flag(&self, key: &str) -> Result<Option<bool>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        match value.cow_to_ascii_lowercase().as_ref() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ExportError::unknown_option(key, value, ["true", "false"])),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EmitterOptions {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// Options recognised by the export entry points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    pub framework: String,
    pub format: FormatOptions,
    pub prefer_sequential: bool,
    pub emitter_options: EmitterOptions,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            framework: DEFAULT_FRAMEWORK.to_owned(),
            format: FormatOptions::default(),
            prefer_sequential: false,
            emitter_options: EmitterOptions::default(),
        }
    }
}

/// Everything an emitter gets to see
#[derive(Debug, Clone, Copy)]
pub struct ExportRequest<'a> {
    pub graph: &'a LayerGraph,
    pub model_name: &'a str,
    pub prefer_sequential: bool,
    pub options: &'a EmitterOptions,
}

/// Emitter entry point of one framework
pub type EmitFn = fn(&ExportRequest<'_>, &mut CodeBuilder) -> Result<GeneratedCode>;

/// Export summary handed back to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportResult {
    pub id: Option<String>,
    pub name: String,
    pub num_layers: usize,
    /// Topology rendering, one line per layer
    pub model: String,
    pub emitter: EmitterKind,
    pub source_code: String,
}

/// Table of frameworks code can be generated for
#[derive(Debug, Clone)]
pub struct FrameworkRegistry {
    emitters: FxIndexMap<String, EmitFn>,
}

impl Default for FrameworkRegistry {
    fn default() -> Self {
        let mut registry = Self {
            emitters: FxIndexMap::default(),
        };
        registry.register(DEFAULT_FRAMEWORK, keras::export_keras);
        registry
    }
}

impl FrameworkRegistry {
    /// Add or replace a framework; names are matched case-insensitively
    pub fn register(&mut self, name: &str, emit: EmitFn) {
        self.emitters
            .insert(name.cow_to_ascii_lowercase().into_owned(), emit);
    }

    pub fn known_frameworks(&self) -> Vec<String> {
        self.emitters.keys().cloned().collect()
    }

    /// Generate source code for an already linked graph
    pub fn export(
        &self,
        graph: &LayerGraph,
        model_name: &str,
        options: &ExportOptions,
    ) -> Result<GeneratedCode> {
        let framework = options.framework.cow_to_ascii_lowercase();
        let Some(emit) = self.emitters.get(framework.as_ref()) else {
            return Err(ExportError::unknown_option(
                "framework",
                &options.framework,
                self.known_frameworks(),
            ));
        };

        if graph.is_empty() {
            return Err(ExportError::EmptyArchitecture);
        }
        graph.ensure_acyclic()?;

        let request = ExportRequest {
            graph,
            model_name,
            prefer_sequential: options.prefer_sequential,
            options: &options.emitter_options,
        };
        let mut cg = CodeBuilder::new(options.format);
        let generated = emit(&request, &mut cg)?;

        ensure_valid_python(&generated.source)?;
        debug!(
            "Generated {} bytes of {} code for '{}'",
            generated.source.len(),
            framework,
            model_name
        );
        Ok(generated)
    }

    /// Validate, link and export a submitted architecture
    pub fn export_architecture(
        &self,
        architecture: &Architecture,
        options: &ExportOptions,
        layer_types: &LayerTypeRegistry,
    ) -> Result<ExportResult> {
        layer_types.validate(&architecture.layers)?;
        let graph = LayerGraph::link(&architecture.layers)?;
        let generated = self.export(&graph, &architecture.name, options)?;

        info!(
            "Exported '{}' ({} layers) with the {:?} emitter",
            architecture.name,
            graph.len(),
            generated.emitter
        );
        Ok(ExportResult {
            id: architecture.id.clone(),
            name: architecture.name.clone(),
            num_layers: graph.len(),
            model: graph.render_topology(TOPOLOGY_SEPARATOR),
            emitter: generated.emitter,
            source_code: generated.source,
        })
    }
}

/// Generate code for a linked graph with the built-in frameworks
pub fn export(
    graph: &LayerGraph,
    model_name: &str,
    options: &ExportOptions,
) -> Result<GeneratedCode> {
    FrameworkRegistry::default().export(graph, model_name, options)
}

/// Validate, link and export an architecture with the built-in frameworks
pub fn export_architecture(
    architecture: &Architecture,
    options: &ExportOptions,
    layer_types: &LayerTypeRegistry,
) -> Result<ExportResult> {
    FrameworkRegistry::default().export_architecture(architecture, options, layer_types)
}

fn ensure_valid_python(source: &str) -> Result<()> {
    parse_module(source)
        .map(|_| ())
        .map_err(|err| ExportError::InvalidGeneratedCode {
            message: err.to_string(),
        })
}
