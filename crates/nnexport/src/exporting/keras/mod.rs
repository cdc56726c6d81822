//! Keras code generation
//!
//! Two emitters share the parameter rendering and program layout in this
//! module:
//! - [`sequential`] writes a `Sequential` model for graphs that are one chain
//! - [`functional`] writes the functional API for any acyclic graph
//!
//! Each emitter first plans a [`Program`] (the statements of the model body
//! plus what needs importing), then [`write_program`] lays it out.

mod functional;
mod sequential;

pub use functional::Traversal;
use log::{debug, info, warn};
use ruff_python_stdlib::{identifiers::is_identifier, keyword::is_keyword};
use serde_json::Value;

use super::{EmitterKind, ExportRequest, GeneratedCode};
use crate::{
    architecture::Params,
    code_builder::{CodeBuilder, call, par, quote, sequence, wrap_literal},
    error::{ExportError, Result},
    types::{FxIndexMap, FxIndexSet},
};

/// Emitter option: try the `Sequential` API first
pub const PREFER_SEQUENTIAL_OPTION: &str = "keras_prefer_sequential";
/// Emitter option: graph traversal of the functional emitter
pub const TRAVERSAL_OPTION: &str = "keras_traversal";
/// Emitter option: wrap model construction in a `build_model()` function
pub const BUILD_FUNCTION_OPTION: &str = "keras_build_function";

const KNOWN_OPTIONS: [&str; 3] = [
    PREFER_SEQUENTIAL_OPTION,
    TRAVERSAL_OPTION,
    BUILD_FUNCTION_OPTION,
];

const BUILD_FUNCTION: &str = "build_model";
const REGULARIZER_SUFFIX: &str = "regularizer";
const PRINT_SHAPES: &str =
    r#"print("INPUT: {}, OUTPUT: {}".format(model.input_shape, model.output_shape))"#;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct KerasSettings {
    prefer_sequential: bool,
    traversal: Traversal,
    build_function: bool,
}

impl KerasSettings {
    fn from_request(request: &ExportRequest<'_>) -> Result<Self> {
        let options = request.options;
        for key in options.keys().filter(|key| !KNOWN_OPTIONS.contains(key)) {
            warn!("Ignoring unknown keras option '{key}'");
        }

        Ok(Self {
            prefer_sequential: request.prefer_sequential
                || options.flag(PREFER_SEQUENTIAL_OPTION)?.unwrap_or(false),
            traversal: options
                .get(TRAVERSAL_OPTION)
                .map(str::parse::<Traversal>)
                .transpose()?
                .unwrap_or_default(),
            build_function: options.flag(BUILD_FUNCTION_OPTION)?.unwrap_or(false),
        })
    }
}

/// Framework entry point registered as `keras`
pub fn export_keras(request: &ExportRequest<'_>, cg: &mut CodeBuilder) -> Result<GeneratedCode> {
    let settings = KerasSettings::from_request(request)?;
    let graph = request.graph;

    if let Some(id) = graph
        .ids()
        .find(|&id| graph.node(id).is_input_layer() && !graph.node(id).is_source())
    {
        return Err(ExportError::InvalidInputLayer {
            layer: graph.node(id).name.clone(),
        });
    }

    let (emitter, program) = if settings.prefer_sequential && sequential::is_applicable(graph) {
        debug!("Using the Sequential API for '{}'", request.model_name);
        (
            EmitterKind::Sequential,
            sequential::plan(graph, request.model_name)?,
        )
    } else {
        if settings.prefer_sequential {
            info!(
                "Model '{}' is not sequential, using the functional API instead",
                request.model_name
            );
        }
        (
            EmitterKind::Functional,
            functional::plan(graph, request.model_name, settings.traversal)?,
        )
    };

    let mut scope = cg.scope();
    write_program(&mut scope, &program, settings.build_function);
    Ok(GeneratedCode {
        emitter,
        source: scope.finish(),
    })
}

/// Statements of a model body and the imports they need
#[derive(Debug)]
struct Program {
    model_class: &'static str,
    layer_types: FxIndexSet<String>,
    uses_regularizers: bool,
    /// Body lines; an empty line is a blank line
    body: Vec<String>,
}

impl Program {
    fn new(model_class: &'static str) -> Self {
        Self {
            model_class,
            layer_types: FxIndexSet::default(),
            uses_regularizers: false,
            body: Vec::new(),
        }
    }

    /// Record the imports a layer needs
    fn note_layer(&mut self, layer_type: &str, params: &Params) {
        if !self.layer_types.contains(layer_type) {
            self.layer_types.insert(layer_type.to_owned());
        }
        self.uses_regularizers |= params.keys().any(|key| is_regularizer(key));
    }

    fn push(&mut self, line: String) {
        self.body.push(line);
    }

    fn blank(&mut self) {
        self.body.push(String::new());
    }
}

fn write_program(cg: &mut CodeBuilder, program: &Program, build_function: bool) {
    cg.add_line(&format!("from keras.models import {}", program.model_class));
    cg.add_line(&format!(
        "from keras.layers import {}",
        par(&sequence(&program.layer_types))
    ));
    if program.uses_regularizers {
        cg.add_line("from keras.regularizers import l1_l2");
    }
    cg.blank_line();

    if build_function {
        cg.add_line(&format!("def {BUILD_FUNCTION}():"));
        cg.indent_in();
        for line in &program.body {
            cg.add_line(line);
        }
        cg.add_line("return model");
        cg.indent_out();
        cg.blank_line();
        cg.blank_line();
        cg.add_line(&format!("model = {BUILD_FUNCTION}()"));
    } else {
        for line in &program.body {
            cg.add_line(line);
        }
    }

    cg.blank_line();
    cg.add_line(PRINT_SHAPES);
    cg.add_line("model.summary()");
}

fn is_regularizer(key: &str) -> bool {
    key.ends_with(REGULARIZER_SUFFIX)
}

/// Render layer parameters as keyword argument values
///
/// Values go through [`wrap_literal`], except regularizer parameters which
/// become `l1_l2(...)` calls. The layer name is appended as `name`.
pub fn render_params(layer: &str, params: &Params) -> Result<FxIndexMap<String, String>> {
    let mut rendered = FxIndexMap::default();
    for (key, value) in params {
        if !is_identifier(key) || is_keyword(key) {
            return Err(ExportError::InvalidParameterName {
                layer: layer.to_owned(),
                param: key.clone(),
            });
        }

        let text = if is_regularizer(key) {
            render_regularizer(layer, key, value)?
        } else {
            wrap_literal(&value_text(value))
        };
        rendered.insert(key.clone(), text);
    }
    rendered.insert("name".to_owned(), wrap_literal(layer));
    Ok(rendered)
}

fn render_regularizer(layer: &str, key: &str, value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok("None".to_owned()),
        Value::Object(weights) => {
            let weight = |name: &str| {
                weights
                    .get(name)
                    .map_or_else(|| "0.0".to_owned(), |w| wrap_literal(&value_text(w)))
            };
            let (l1, l2) = (weight("l1"), weight("l2"));
            Ok(call("l1_l2", &[], &[("l1", &l1), ("l2", &l2)]))
        }
        _ => Err(ExportError::InvalidRegularizer {
            layer: layer.to_owned(),
            param: key.to_owned(),
        }),
    }
}

/// `LayerType(kw=value, ...)`
fn layer_call(layer_type: &str, rendered: &FxIndexMap<String, String>) -> String {
    let keywords: Vec<(&str, &str)> = rendered
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    call(layer_type, &[], &keywords)
}

/// Text of a parameter value before literal wrapping
///
/// Top-level strings stay raw so [`wrap_literal`] decides whether they are
/// literals; everything else is written as the equivalent Python literal.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        _ => python_literal(value),
    }
}

fn python_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_owned(),
        Value::Bool(true) => "True".to_owned(),
        Value::Bool(false) => "False".to_owned(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => quote(text),
        Value::Array(items) => format!("[{}]", sequence(items.iter().map(python_literal))),
        Value::Object(entries) => format!(
            "{{{}}}",
            sequence(
                entries
                    .iter()
                    .map(|(key, value)| format!("{}: {}", quote(key), python_literal(value)))
            )
        ),
    }
}
