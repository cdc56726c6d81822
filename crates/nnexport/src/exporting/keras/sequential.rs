//! `Sequential` emitter for single-chain graphs
//!
//! A `Sequential` container infers its input from the first real layer, so a
//! leading `Input` layer is folded away: its `shape` becomes the
//! `input_shape` of the layer after it.

use super::{Program, layer_call, render_params};
use crate::{
    code_builder::{call, par, wrap_literal},
    error::{ExportError, Result},
    layer_graph::{LayerGraph, NodeId},
};

/// Whether [`plan`] can handle the graph
///
/// The graph must be one chain with at least one layer besides a leading
/// `Input`.
pub(super) fn is_applicable(graph: &LayerGraph) -> bool {
    graph.is_sequential_compatible()
        && !(graph.len() == 1 && graph.nodes().all(|node| node.is_input_layer()))
}

/// Walk the chain from its single source
fn chain(graph: &LayerGraph) -> Result<Vec<NodeId>> {
    if !graph.is_sequential_compatible() {
        return Err(ExportError::NotSequential {
            reason: "layers must form a single chain".to_owned(),
        });
    }

    let mut chain = Vec::with_capacity(graph.len());
    let mut next = graph.sources().first().copied();
    while let Some(id) = next {
        chain.push(id);
        next = graph.node(id).outputs.first().copied();
    }
    Ok(chain)
}

pub(super) fn plan(graph: &LayerGraph, model_name: &str) -> Result<Program> {
    let mut chain = chain(graph)?;

    let mut input_shape = None;
    if let Some(&first) = chain.first()
        && graph.node(first).is_input_layer()
    {
        let input = graph.node(first);
        let Some(shape) = input.params.get("shape") else {
            return Err(ExportError::MissingParameter {
                layer: input.name.clone(),
                layer_type: input.layer_type.clone(),
                param: "shape".to_owned(),
            });
        };
        if chain.len() == 1 {
            return Err(ExportError::NotSequential {
                reason: format!("input layer '{}' feeds no other layer", input.name),
            });
        }
        input_shape = Some(shape.clone());
        chain.remove(0);
    } else if let Some(&first) = chain.first()
        && !graph.node(first).params.contains_key("input_shape")
    {
        let node = graph.node(first);
        return Err(ExportError::MissingParameter {
            layer: node.name.clone(),
            layer_type: node.layer_type.clone(),
            param: "input_shape".to_owned(),
        });
    }

    let mut program = Program::new("Sequential");
    let name = wrap_literal(model_name);
    program.push(format!(
        "model = {}",
        call("Sequential", &[], &[("name", &name)])
    ));

    for id in chain {
        let node = graph.node(id);
        let mut params = node.params.clone();
        if let Some(shape) = input_shape.take() {
            params.insert("input_shape".to_owned(), shape);
        }

        program.note_layer(&node.layer_type, &params);
        let rendered = render_params(&node.name, &params)?;
        program.push(format!(
            "model.add{}",
            par(&layer_call(&node.layer_type, &rendered))
        ));
    }

    Ok(program)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::architecture::LayerRecord;

    fn link(records: &[LayerRecord]) -> LayerGraph {
        LayerGraph::link(records).unwrap()
    }

    #[test]
    fn test_input_layer_is_folded_into_first_layer() {
        let graph = link(&[
            LayerRecord::new("in1", "Input").with_param("shape", json!([28, 28])),
            LayerRecord::new("flat", "Flatten").with_inputs(["in1"]),
            LayerRecord::new("d1", "Dense")
                .with_param("units", json!(10))
                .with_inputs(["flat"]),
        ]);

        let program = plan(&graph, "Model").unwrap();
        assert_eq!(
            program.body,
            [
                "model = Sequential(name=\"Model\")",
                "model.add(Flatten(input_shape=[28, 28], name=\"flat\"))",
                "model.add(Dense(units=10, name=\"d1\"))",
            ]
        );
        let types: Vec<&str> = program.layer_types.iter().map(String::as_str).collect();
        assert_eq!(types, ["Flatten", "Dense"]);
    }

    #[test]
    fn test_headless_chain_is_emitted_as_is() {
        let graph = link(&[
            LayerRecord::new("d1", "Dense")
                .with_param("units", json!(4))
                .with_param("input_shape", json!([8])),
            LayerRecord::new("drop", "Dropout")
                .with_param("rate", json!(0.5))
                .with_inputs(["d1"]),
        ]);

        let program = plan(&graph, "Net").unwrap();
        assert_eq!(
            program.body,
            [
                "model = Sequential(name=\"Net\")",
                "model.add(Dense(units=4, input_shape=[8], name=\"d1\"))",
                "model.add(Dropout(rate=0.5, name=\"drop\"))",
            ]
        );
    }

    #[test]
    fn test_headless_chain_needs_input_shape() {
        let graph = link(&[
            LayerRecord::new("d1", "Dense").with_param("units", json!(3)),
            LayerRecord::new("d2", "Dense").with_inputs(["d1"]),
        ]);

        assert!(is_applicable(&graph));
        assert_eq!(
            plan(&graph, "Model").unwrap_err(),
            ExportError::MissingParameter {
                layer: "d1".into(),
                layer_type: "Dense".into(),
                param: "input_shape".into(),
            }
        );
    }

    #[test]
    fn test_existing_input_shape_is_overridden_in_place() {
        let graph = link(&[
            LayerRecord::new("in", "Input").with_param("shape", json!([3])),
            LayerRecord::new("d", "Dense")
                .with_param("input_shape", json!([99]))
                .with_param("units", json!(1))
                .with_inputs(["in"]),
        ]);

        let program = plan(&graph, "Model").unwrap();
        assert_eq!(
            program.body[1],
            "model.add(Dense(input_shape=[3], units=1, name=\"d\"))"
        );
    }

    #[test]
    fn test_branching_graph_is_not_sequential() {
        let graph = link(&[
            LayerRecord::new("in", "Input").with_param("shape", json!([3])),
            LayerRecord::new("a", "Dense").with_inputs(["in"]),
            LayerRecord::new("b", "Dense").with_inputs(["in"]),
        ]);

        assert!(!is_applicable(&graph));
        assert!(matches!(
            plan(&graph, "Model"),
            Err(ExportError::NotSequential { .. })
        ));
    }

    #[test]
    fn test_lone_input_is_not_applicable() {
        let graph = link(&[LayerRecord::new("in", "Input").with_param("shape", json!([3]))]);
        assert!(!is_applicable(&graph));
        assert!(matches!(
            plan(&graph, "Model"),
            Err(ExportError::NotSequential { .. })
        ));
    }

    #[test]
    fn test_input_without_shape() {
        let graph = link(&[
            LayerRecord::new("in", "Input"),
            LayerRecord::new("d", "Dense").with_inputs(["in"]),
        ]);
        assert_eq!(
            plan(&graph, "Model").unwrap_err(),
            ExportError::MissingParameter {
                layer: "in".into(),
                layer_type: "Input".into(),
                param: "shape".into(),
            }
        );
    }
}
