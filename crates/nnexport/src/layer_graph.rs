//! Layer graph: linking, cycle detection and topology rendering
//!
//! Layer records reference their inputs by name. [`LayerGraph::link`] resolves
//! those names into an arena of [`LayerNode`]s addressed by [`NodeId`], with
//! every edge stored on both ends:
//! - `inputs` lists the producers a node is called on, in declared order
//! - `outputs` lists the consumers of a node, in linking order
//!
//! Nodes never own each other, so a cyclic submission is representable and can
//! be reported by [`LayerGraph::ensure_acyclic`] instead of corrupting the
//! emitters.

use std::collections::VecDeque;

use log::{debug, trace};
use petgraph::{algo::tarjan_scc, graph::DiGraph};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    architecture::{LayerRecord, Params},
    error::{ExportError, Result},
    layer_types::INPUT_LAYER,
    types::FxIndexMap,
};

/// Index of a node inside its [`LayerGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Position of the node in the graph arena
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A linked layer
#[derive(Debug, Clone, PartialEq)]
pub struct LayerNode {
    pub name: String,
    pub layer_type: String,
    pub params: Params,
    /// Producers this layer is called on, in declared order
    pub inputs: Vec<NodeId>,
    /// Consumers of this layer's output
    pub outputs: Vec<NodeId>,
}

impl LayerNode {
    pub fn new(name: impl Into<String>, layer_type: impl Into<String>, params: Params) -> Self {
        Self {
            name: name.into(),
            layer_type: layer_type.into(),
            params,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    fn from_record(record: &LayerRecord) -> Self {
        Self::new(&record.name, &record.layer_type, record.params.clone())
    }

    /// A node without inputs consumes external data
    pub fn is_source(&self) -> bool {
        self.inputs.is_empty()
    }

    /// A node without outputs produces model output
    pub fn is_sink(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn is_input_layer(&self) -> bool {
        self.layer_type == INPUT_LAYER
    }
}

/// Arena of linked layers
///
/// `order` is the reverse of the order in which linking discovered the nodes,
/// so producers tend to come before their consumers. Emitters use it as a
/// stable secondary ordering, never as a topological sort.
#[derive(Debug, Clone, Default)]
pub struct LayerGraph {
    nodes: Vec<LayerNode>,
    order: Vec<NodeId>,
    by_name: FxHashMap<String, NodeId>,
}

impl LayerGraph {
    /// Resolve name references into a doubly linked graph
    ///
    /// Linking walks breadth-first from the sink records (records no other
    /// record names as an input). Records that share a name are coalesced: the
    /// first one wins and later ones are ignored. A name that resolves to no
    /// record is an [`ExportError::UnresolvedReference`].
    pub fn link(records: &[LayerRecord]) -> Result<Self> {
        let mut lookup: FxIndexMap<&str, &LayerRecord> = FxIndexMap::default();
        for record in records {
            if lookup.contains_key(record.name.as_str()) {
                debug!("Ignoring duplicate layer record '{}'", record.name);
                continue;
            }
            lookup.insert(record.name.as_str(), record);
        }

        let referenced: FxHashSet<&str> = lookup
            .values()
            .flat_map(|record| record.inputs.iter().map(String::as_str))
            .collect();

        let mut queue: VecDeque<&LayerRecord> = lookup
            .values()
            .copied()
            .filter(|record| !referenced.contains(record.name.as_str()))
            .collect();
        debug!(
            "Linking {} layer records starting from {} sinks",
            lookup.len(),
            queue.len()
        );

        let mut graph = Self::default();
        let mut discovered = Vec::with_capacity(lookup.len());
        let mut unvisited = lookup.values().copied();

        loop {
            while let Some(record) = queue.pop_front() {
                let node = graph.materialize(record, &mut discovered);

                for input_name in &record.inputs {
                    let Some(&input_record) = lookup.get(input_name.as_str()) else {
                        return Err(ExportError::UnresolvedReference {
                            layer: record.name.clone(),
                            missing: input_name.clone(),
                        });
                    };

                    let input = match graph.by_name.get(input_name) {
                        Some(&id) => id,
                        None => {
                            queue.push_back(input_record);
                            graph.materialize(input_record, &mut discovered)
                        }
                    };

                    trace!("Linking '{}' -> '{}'", input_name, record.name);
                    graph.nodes[input.index()].outputs.push(node);
                    graph.nodes[node.index()].inputs.push(input);
                }
            }

            // Records never reached from a sink sit on, or feed into, a cycle
            match unvisited.find(|record| !graph.by_name.contains_key(record.name.as_str())) {
                Some(record) => queue.push_back(record),
                None => break,
            }
        }

        graph.order = discovered.into_iter().rev().collect();
        Ok(graph)
    }

    fn materialize(&mut self, record: &LayerRecord, discovered: &mut Vec<NodeId>) -> NodeId {
        if let Some(&id) = self.by_name.get(&record.name) {
            return id;
        }
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(LayerNode::from_record(record));
        self.by_name.insert(record.name.clone(), id);
        discovered.push(id);
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &LayerNode {
        &self.nodes[id.index()]
    }

    /// Look a node up by layer name
    pub fn get(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    /// Node ids in graph order
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.order.iter().copied()
    }

    /// Nodes in graph order
    pub fn nodes(&self) -> impl Iterator<Item = &LayerNode> + '_ {
        self.ids().map(|id| self.node(id))
    }

    pub fn sources(&self) -> Vec<NodeId> {
        self.ids().filter(|&id| self.node(id).is_source()).collect()
    }

    pub fn sinks(&self) -> Vec<NodeId> {
        self.ids().filter(|&id| self.node(id).is_sink()).collect()
    }

    /// Nodes of the `Input` layer type, in graph order
    pub fn input_layers(&self) -> Vec<NodeId> {
        self.ids()
            .filter(|&id| self.node(id).is_input_layer())
            .collect()
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut LayerNode {
        &mut self.nodes[id.index()]
    }

    /// Add `input` as the sole input of the source node `target`
    pub(crate) fn attach_input(&mut self, target: NodeId, mut input: LayerNode) -> NodeId {
        debug_assert!(self.node(target).is_source());
        let id = NodeId::new(self.nodes.len());
        input.inputs.clear();
        input.outputs = vec![target];
        self.by_name.insert(input.name.clone(), id);
        self.nodes.push(input);
        self.order.push(id);
        self.node_mut(target).inputs.push(id);
        id
    }

    /// `base`, or `base_1`, `base_2`, ... whichever is not taken yet
    pub(crate) fn unique_name(&self, base: &str) -> String {
        if !self.by_name.contains_key(base) {
            return base.to_owned();
        }
        (1..)
            .map(|n| format!("{base}_{n}"))
            .find(|candidate| !self.by_name.contains_key(candidate))
            .unwrap_or_else(|| base.to_owned())
    }

    /// Whether the graph is free of cycles
    ///
    /// Peels sinks off a scratch copy of the `outputs` lists: a popped node is
    /// removed from its inputs' outputs, and an input whose outputs run empty
    /// becomes a sink in turn. The graph is acyclic exactly when every node
    /// gets peeled. The graph itself is never modified.
    pub fn is_acyclic(&self) -> bool {
        let mut outputs: Vec<Vec<NodeId>> =
            self.nodes.iter().map(|node| node.outputs.clone()).collect();
        let mut queue: VecDeque<NodeId> = self
            .ids()
            .filter(|id| outputs[id.index()].is_empty())
            .collect();

        if queue.is_empty() {
            return self.is_empty();
        }

        let mut resolved = 0;
        while let Some(id) = queue.pop_front() {
            resolved += 1;
            for &input in &self.node(id).inputs {
                let remaining = &mut outputs[input.index()];
                if let Some(position) = remaining.iter().position(|&output| output == id) {
                    remaining.remove(position);
                    if remaining.is_empty() {
                        queue.push_back(input);
                    }
                }
            }
        }

        trace!("Peeled {} of {} nodes", resolved, self.len());
        resolved == self.len()
    }

    /// Fail with [`ExportError::CyclicGraph`] naming the layers on cycles
    pub fn ensure_acyclic(&self) -> Result<()> {
        if self.is_acyclic() {
            return Ok(());
        }
        Err(ExportError::CyclicGraph {
            layers: self.cyclic_layers(),
        })
    }

    fn cyclic_layers(&self) -> Vec<String> {
        let mut graph = DiGraph::<NodeId, ()>::with_capacity(self.len(), self.len());
        let indices: Vec<_> = (0..self.len())
            .map(|index| graph.add_node(NodeId::new(index)))
            .collect();
        for (index, node) in self.nodes.iter().enumerate() {
            for output in &node.outputs {
                graph.add_edge(indices[index], indices[output.index()], ());
            }
        }

        let on_cycle: FxHashSet<NodeId> = tarjan_scc(&graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1 || graph.contains_edge(component[0], component[0])
            })
            .flatten()
            .map(|index| graph[index])
            .collect();

        self.ids()
            .filter(|id| on_cycle.contains(id))
            .map(|id| self.node(id).name.clone())
            .collect()
    }

    /// Whether the graph is one simple chain
    ///
    /// Requires a single source and at most one input and one output per node.
    pub fn is_sequential_compatible(&self) -> bool {
        !self.is_empty()
            && self
                .nodes
                .iter()
                .all(|node| node.inputs.len() <= 1 && node.outputs.len() <= 1)
            && self.sources().len() == 1
    }

    /// One `"in1, in2 -> node -> out1, out2"` line per node, in graph order
    pub fn render_topology(&self, separator: &str) -> String {
        let lines: Vec<String> = self
            .nodes()
            .map(|node| {
                let mut line = String::new();
                if !node.inputs.is_empty() {
                    line.push_str(&self.joined_names(&node.inputs));
                    line.push_str(" -> ");
                }
                line.push_str(&node.name);
                if !node.outputs.is_empty() {
                    line.push_str(" -> ");
                    line.push_str(&self.joined_names(&node.outputs));
                }
                line
            })
            .collect();
        lines.join(separator)
    }

    fn joined_names(&self, ids: &[NodeId]) -> String {
        ids.iter()
            .map(|&id| self.node(id).name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn record(name: &str, inputs: &[&str]) -> LayerRecord {
        LayerRecord::new(name, "Dense").with_inputs(inputs.iter().copied())
    }

    fn names(graph: &LayerGraph, ids: &[NodeId]) -> Vec<String> {
        ids.iter().map(|&id| graph.node(id).name.clone()).collect()
    }

    fn order(graph: &LayerGraph) -> Vec<String> {
        graph.nodes().map(|node| node.name.clone()).collect()
    }

    fn ring(size: usize) -> Vec<LayerRecord> {
        (0..size)
            .map(|i| {
                let previous = format!("r{}", (i + size - 1) % size);
                LayerRecord::new(format!("r{i}"), "Dense").with_inputs([previous])
            })
            .collect()
    }

    #[test]
    fn test_link_chain_in_reverse_discovery_order() {
        let records = vec![
            LayerRecord::new("Input_1", "Input").with_param("shape", json!([28, 28])),
            record("Flatten_1", &["Input_1"]),
            record("Dense_1", &["Flatten_1"]),
            record("Dense_2", &["Dense_1"]),
        ];

        let graph = LayerGraph::link(&records).unwrap();
        assert_eq!(order(&graph), ["Input_1", "Flatten_1", "Dense_1", "Dense_2"]);
        assert_eq!(names(&graph, &graph.sources()), ["Input_1"]);
        assert_eq!(names(&graph, &graph.sinks()), ["Dense_2"]);
        assert_eq!(names(&graph, &graph.input_layers()), ["Input_1"]);

        let input = graph.node(graph.get("Input_1").unwrap());
        assert_eq!(input.params["shape"], json!([28, 28]));
    }

    #[test]
    fn test_edges_are_structural_inverses() {
        let records = vec![
            record("a", &[]),
            record("b", &["a"]),
            record("c", &["a"]),
            record("d", &["b", "c"]),
            record("e", &["a", "d"]),
        ];
        let graph = LayerGraph::link(&records).unwrap();

        for id in graph.ids() {
            let node = graph.node(id);
            for &input in &node.inputs {
                let forward = graph.node(input).outputs.iter().filter(|&&o| o == id).count();
                let backward = node.inputs.iter().filter(|&&i| i == input).count();
                assert_eq!(forward, backward);
            }
            for &output in &node.outputs {
                assert!(graph.node(output).inputs.contains(&id));
            }
        }

        let d = graph.node(graph.get("d").unwrap());
        assert_eq!(names(&graph, &d.inputs), ["b", "c"]);
    }

    #[test]
    fn test_dangling_reference_is_reported() {
        let records = vec![record("a", &[]), record("b", &["a", "ghost"])];
        let err = LayerGraph::link(&records).unwrap_err();
        assert_eq!(
            err,
            ExportError::UnresolvedReference {
                layer: "b".into(),
                missing: "ghost".into(),
            }
        );
    }

    #[test]
    fn test_dangling_reference_behind_sink_is_reported() {
        let records = vec![record("a", &["missing"]), record("b", &["a"])];
        assert!(matches!(
            LayerGraph::link(&records),
            Err(ExportError::UnresolvedReference { ref missing, .. }) if missing == "missing"
        ));
    }

    #[test]
    fn test_duplicate_names_coalesce() {
        let records = vec![
            record("a", &[]),
            record("b", &["a"]),
            record("b", &["a"]),
            record("c", &["b"]),
        ];
        let graph = LayerGraph::link(&records).unwrap();

        assert_eq!(graph.len(), 3);
        let a = graph.node(graph.get("a").unwrap());
        assert_eq!(a.outputs.len(), 1);
        let b = graph.node(graph.get("b").unwrap());
        assert_eq!(b.inputs.len(), 1);
        assert_eq!(b.outputs.len(), 1);
    }

    #[test]
    fn test_empty_records_give_empty_graph() {
        let graph = LayerGraph::link(&[]).unwrap();
        assert!(graph.is_empty());
        assert!(graph.is_acyclic());
        assert!(!graph.is_sequential_compatible());
    }

    #[test]
    fn test_rings_are_cyclic() {
        for size in 1..=5 {
            let graph = LayerGraph::link(&ring(size)).unwrap();
            assert_eq!(graph.len(), size, "ring of {size} must link every record");
            assert!(!graph.is_acyclic(), "ring of {size} must be cyclic");
        }
    }

    #[test]
    fn test_self_loop_has_no_sink() {
        let graph = LayerGraph::link(&[record("a", &["a"])]).unwrap();
        assert!(graph.sinks().is_empty());
        assert!(!graph.is_acyclic());
        assert_eq!(
            graph.ensure_acyclic().unwrap_err(),
            ExportError::CyclicGraph {
                layers: vec!["a".into()]
            }
        );
    }

    #[test]
    fn test_cycle_upstream_of_sink() {
        let records = vec![
            record("a", &["b"]),
            record("b", &["a"]),
            record("c", &["b"]),
            record("d", &["c"]),
        ];
        let graph = LayerGraph::link(&records).unwrap();
        assert_eq!(graph.len(), 4);
        assert!(!graph.is_acyclic());

        let Err(ExportError::CyclicGraph { mut layers }) = graph.ensure_acyclic() else {
            panic!("expected a cycle error");
        };
        layers.sort();
        assert_eq!(layers, ["a", "b"]);
    }

    #[test]
    fn test_dags_are_acyclic() {
        let diamond = vec![
            record("a", &[]),
            record("b", &["a"]),
            record("c", &["a"]),
            record("d", &["b", "c"]),
        ];
        let graph = LayerGraph::link(&diamond).unwrap();
        assert!(graph.is_acyclic());
        assert!(graph.ensure_acyclic().is_ok());

        let repeated_input = vec![record("a", &[]), record("b", &["a", "a"])];
        assert!(LayerGraph::link(&repeated_input).unwrap().is_acyclic());
    }

    #[test]
    fn test_cycle_check_leaves_graph_untouched() {
        let records = vec![record("a", &[]), record("b", &["a"]), record("c", &["b"])];
        let graph = LayerGraph::link(&records).unwrap();
        let before: Vec<Vec<NodeId>> = graph.nodes().map(|n| n.outputs.clone()).collect();

        assert!(graph.is_acyclic());

        let after: Vec<Vec<NodeId>> = graph.nodes().map(|n| n.outputs.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_sequential_compatibility() {
        let chain = vec![record("a", &[]), record("b", &["a"]), record("c", &["b"])];
        assert!(LayerGraph::link(&chain).unwrap().is_sequential_compatible());

        let branching = vec![record("a", &[]), record("b", &["a"]), record("c", &["a"])];
        assert!(!LayerGraph::link(&branching).unwrap().is_sequential_compatible());

        let merging = vec![record("a", &[]), record("b", &[]), record("c", &["a", "b"])];
        assert!(!LayerGraph::link(&merging).unwrap().is_sequential_compatible());

        let two_chains = vec![record("a", &[]), record("b", &["a"]), record("c", &[])];
        assert!(!LayerGraph::link(&two_chains).unwrap().is_sequential_compatible());
    }

    #[test]
    fn test_topology_rendering() {
        let records = vec![
            LayerRecord::new("Input_1", "Input"),
            record("Flatten_1", &["Input_1"]),
            record("Dense_1", &["Flatten_1"]),
            record("Dense_2", &["Dense_1"]),
        ];
        let graph = LayerGraph::link(&records).unwrap();

        assert_eq!(
            graph.render_topology("<br>"),
            "Input_1 -> Flatten_1<br>\
             Input_1 -> Flatten_1 -> Dense_1<br>\
             Flatten_1 -> Dense_1 -> Dense_2<br>\
             Dense_1 -> Dense_2"
        );
    }

    #[test]
    fn test_topology_reproduces_adjacency() {
        let records = vec![
            record("a", &[]),
            record("b", &[]),
            record("c", &["a", "b"]),
            record("d", &["a"]),
            record("e", &["c", "d"]),
            record("f", &["c"]),
        ];
        let graph = LayerGraph::link(&records).unwrap();
        let rendered = graph.render_topology("\n");

        let mut incoming = Vec::new();
        let mut outgoing = Vec::new();
        for (line, node) in rendered.lines().zip(graph.nodes()) {
            let parts: Vec<&str> = line.split(" -> ").collect();
            let (inputs, name, outputs) = match parts.as_slice() {
                [name] => ("", *name, ""),
                [first, second] if *first == node.name => ("", *first, *second),
                [first, second] => (*first, *second, ""),
                [first, second, third] => (*first, *second, *third),
                _ => panic!("malformed line {line}"),
            };
            for input in inputs.split(", ").filter(|s| !s.is_empty()) {
                incoming.push((input.to_owned(), name.to_owned()));
            }
            for output in outputs.split(", ").filter(|s| !s.is_empty()) {
                outgoing.push((name.to_owned(), output.to_owned()));
            }
        }

        let mut expected: Vec<(String, String)> = records
            .iter()
            .flat_map(|r| r.inputs.iter().map(|i| (i.clone(), r.name.clone())))
            .collect();
        expected.sort();
        incoming.sort();
        outgoing.sort();
        assert_eq!(incoming, expected);
        assert_eq!(outgoing, expected);
    }

    #[test]
    fn test_attach_input_and_unique_name() {
        let records = vec![record("a", &[]), record("a_input", &["a"])];
        let mut graph = LayerGraph::link(&records).unwrap();
        let a = graph.get("a").unwrap();

        let name = graph.unique_name("a_input");
        assert_eq!(name, "a_input_1");

        let input = graph.attach_input(a, LayerNode::new(name, INPUT_LAYER, Params::default()));
        assert_eq!(graph.node(a).inputs, vec![input]);
        assert_eq!(graph.node(input).outputs, vec![a]);
        assert_eq!(graph.get("a_input_1"), Some(input));
        assert!(graph.is_acyclic());
    }
}
