//! Functional API emitter for arbitrary acyclic graphs
//!
//! Every non-`Input` source first gets a synthetic `Input` layer built from
//! its `input_shape`. Layers are then emitted in a traversal where a layer is
//! written only after all of its inputs have a tensor variable.

use std::{collections::VecDeque, str::FromStr};

use cow_utils::CowUtils;
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use super::{Program, layer_call, render_params};
use crate::{
    architecture::Params,
    code_builder::{call, list, sequence, wrap_literal},
    error::{ExportError, Result},
    layer_graph::{LayerGraph, LayerNode, NodeId},
    layer_types::INPUT_LAYER,
    types::FxIndexSet,
};

/// Order in which the functional emitter writes layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Traversal {
    /// Follow each branch as deep as it goes before the next one
    #[default]
    DepthFirst,
    /// Write all layers of one level before the next level
    LevelOrder,
}

impl Traversal {
    pub const NAMES: [&'static str; 2] = ["depth_first", "level_order"];

    pub const fn name(self) -> &'static str {
        match self {
            Self::DepthFirst => "depth_first",
            Self::LevelOrder => "level_order",
        }
    }
}

impl FromStr for Traversal {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.cow_to_ascii_lowercase().as_ref() {
            "depth_first" => Ok(Self::DepthFirst),
            "level_order" => Ok(Self::LevelOrder),
            _ => Err(ExportError::unknown_option(
                super::TRAVERSAL_OPTION,
                s,
                Self::NAMES,
            )),
        }
    }
}

pub(super) fn plan(graph: &LayerGraph, model_name: &str, traversal: Traversal) -> Result<Program> {
    let graph = with_input_layers(graph)?;

    let inputs = graph.input_layers();
    if inputs.is_empty() {
        return Err(ExportError::NoInputLayers);
    }
    for &id in &inputs {
        let node = graph.node(id);
        if !node.params.contains_key("shape") {
            return Err(missing_parameter(node, "shape"));
        }
    }

    debug!(
        "Emitting {} layers from {} inputs in {} order",
        graph.len(),
        inputs.len(),
        traversal.name()
    );

    let mut emitter = FunctionalEmitter::new(&graph);
    match traversal {
        Traversal::DepthFirst => emitter.depth_first(&inputs)?,
        Traversal::LevelOrder => emitter.level_order(&inputs)?,
    }
    Ok(emitter.finish(&inputs, model_name))
}

/// Give every non-`Input` source a synthetic `Input` layer
///
/// The source's `input_shape` parameter moves to the new layer as `shape`.
fn with_input_layers(graph: &LayerGraph) -> Result<LayerGraph> {
    let mut graph = graph.clone();
    let sources: Vec<NodeId> = graph
        .sources()
        .into_iter()
        .filter(|&id| !graph.node(id).is_input_layer())
        .collect();

    for id in sources {
        let Some(shape) = graph.node_mut(id).params.shift_remove("input_shape") else {
            return Err(missing_parameter(graph.node(id), "input_shape"));
        };

        let name = graph.unique_name(&format!("{}_input", graph.node(id).name));
        debug!("Adding input layer '{name}'");
        let mut params = Params::default();
        params.insert("shape".to_owned(), shape);
        graph.attach_input(id, LayerNode::new(name, INPUT_LAYER, params));
    }
    Ok(graph)
}

fn missing_parameter(node: &LayerNode, param: &str) -> ExportError {
    ExportError::MissingParameter {
        layer: node.name.clone(),
        layer_type: node.layer_type.clone(),
        param: param.to_owned(),
    }
}

struct FunctionalEmitter<'g> {
    graph: &'g LayerGraph,
    program: Program,
    /// Tensor variable of every emitted layer
    tensors: FxHashMap<NodeId, String>,
    counters: FxHashMap<String, usize>,
    taken: FxHashSet<String>,
}

impl<'g> FunctionalEmitter<'g> {
    fn new(graph: &'g LayerGraph) -> Self {
        Self {
            graph,
            program: Program::new("Model"),
            tensors: FxHashMap::default(),
            counters: FxHashMap::default(),
            taken: FxHashSet::default(),
        }
    }

    fn is_emitted(&self, id: NodeId) -> bool {
        self.tensors.contains_key(&id)
    }

    fn is_ready(&self, id: NodeId) -> bool {
        self.graph
            .node(id)
            .inputs
            .iter()
            .all(|input| self.is_emitted(*input))
    }

    /// Each input starts a group; a layer whose inputs are not all written yet
    /// is skipped and picked up again from the branch that completes it.
    fn depth_first(&mut self, inputs: &[NodeId]) -> Result<()> {
        let graph = self.graph;
        for &start in inputs {
            self.emit(start, None)?;

            let mut frontier: VecDeque<NodeId> =
                graph.node(start).outputs.iter().copied().collect();
            while let Some(id) = frontier.pop_front() {
                if self.is_emitted(id) || !self.is_ready(id) {
                    continue;
                }
                self.emit(id, None)?;
                for &output in graph.node(id).outputs.iter().rev() {
                    frontier.push_front(output);
                }
            }
            self.program.blank();
        }
        Ok(())
    }

    /// Inputs form level 0; level `n + 1` holds the layers that became ready
    /// once level `n` was written.
    fn level_order(&mut self, inputs: &[NodeId]) -> Result<()> {
        let graph = self.graph;
        let mut level: FxIndexSet<NodeId> = inputs.iter().copied().collect();
        let mut depth = 0;

        while !level.is_empty() {
            for &id in &level {
                self.emit(id, Some(depth))?;
            }
            self.program.blank();

            let next: FxIndexSet<NodeId> = level
                .iter()
                .flat_map(|&id| graph.node(id).outputs.iter().copied())
                .filter(|&id| !self.is_emitted(id) && self.is_ready(id))
                .collect();
            level = next;
            depth += 1;
        }
        Ok(())
    }

    /// Fresh variable name: `dense_0`, or `dense_2_0` with a level
    fn variable_name(&mut self, layer_type: &str, level: Option<usize>) -> String {
        let base = layer_type.cow_to_ascii_lowercase();
        let prefix = match level {
            Some(level) => format!("{base}_{level}"),
            None => base.into_owned(),
        };

        let counter = self.counters.entry(prefix.clone()).or_default();
        loop {
            let name = format!("{prefix}_{counter}");
            *counter += 1;
            if self.taken.insert(name.clone()) {
                return name;
            }
        }
    }

    fn emit(&mut self, id: NodeId, level: Option<usize>) -> Result<()> {
        let graph = self.graph;
        let node = graph.node(id);
        self.program.note_layer(&node.layer_type, &node.params);
        let rendered = render_params(&node.name, &node.params)?;

        let variable = self.variable_name(&node.layer_type, level);
        let mut line = format!("{variable} = {}", layer_call(&node.layer_type, &rendered));
        if !node.inputs.is_empty() {
            let tensors: Vec<&str> = node
                .inputs
                .iter()
                .map(|input| self.tensors[input].as_str())
                .collect();
            line.push_str(&call("", &[&tensor_argument(&tensors)], &[]));
        }

        self.program.push(line);
        self.tensors.insert(id, variable);
        Ok(())
    }

    /// Tensor argument for the layers in `ids`
    fn tensors_of(&self, ids: &[NodeId]) -> String {
        let tensors: Vec<&str> = ids
            .iter()
            .filter_map(|id| self.tensors.get(id).map(String::as_str))
            .collect();
        tensor_argument(&tensors)
    }

    fn finish(mut self, inputs: &[NodeId], model_name: &str) -> Program {
        let model_inputs = self.tensors_of(inputs);
        let model_outputs = self.tensors_of(&self.graph.sinks());
        let name = wrap_literal(model_name);

        let line = format!(
            "model = {}",
            call(
                "Model",
                &[],
                &[
                    ("inputs", &model_inputs),
                    ("outputs", &model_outputs),
                    ("name", &name),
                ]
            )
        );
        self.program.push(line);
        self.program
    }
}

/// A lone tensor as is, several as a list
fn tensor_argument(tensors: &[&str]) -> String {
    match tensors {
        [tensor] => (*tensor).to_owned(),
        _ => list(&sequence(tensors)),
    }
}
