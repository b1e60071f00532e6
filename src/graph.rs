//! The operator graph and its execution.
//!
//! A [`Graph`] is constructed with a [`GraphBuilder`] and is immutable
//! afterwards. It is executed by an [`ExecutionContext`], which holds the
//! values produced while a graph runs.

use rustc_hash::FxHashMap;

mod builder;
mod execution;
mod node;
mod run_error;
mod tensor_store;


pub use builder::{BuildError, GraphBuilder};
pub use execution::{ExecutionContext, ExecutionStats, RunOptions};
pub use node::{Constant, Dimension, GraphInput, GraphOutput, Layer, ValueSource};
pub use run_error::{RunError, RunErrorKind};
pub use tensor_store::TensorStore;

use crate::value::Value;

/// A graph of operators, together with its inputs, constants and outputs.
///
/// Layers are stored in topological order. Graphs are created using
/// [`GraphBuilder`] and are read-only afterwards, so they can be shared
/// between threads which each run the graph using their own
/// [`ExecutionContext`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(into = "GraphDef", try_from = "GraphDef")
)]
pub struct Graph {
    inputs: Vec<GraphInput>,
    constants: Vec<Constant>,
    layers: Vec<Layer>,
    outputs: Vec<GraphOutput>,

    /// Map from value name to producer.
    sources: FxHashMap<String, ValueSource>,

    /// Names of values which are no longer needed after each layer runs.
    release_plan: Vec<Vec<String>>,
}

impl Graph {
    pub fn inputs(&self) -> &[GraphInput] {
        &self.inputs
    }

    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn outputs(&self) -> &[GraphOutput] {
        &self.outputs
    }

    /// Return where the value with a given name comes from.
    pub fn source(&self, name: &str) -> Option<ValueSource> {
        self.sources.get(name).copied()
    }

    /// Return the value of the constant with a given name.
    pub fn constant(&self, name: &str) -> Option<&Value> {
        match self.source(name)? {
            ValueSource::Constant(index) => self.constants.get(index).map(|c| &c.value),
            _ => None,
        }
    }

    /// Return the names of values which can be freed after the layer at
    /// `index` has run.
    pub fn released_after(&self, index: usize) -> &[String] {
        self.release_plan
            .get(index)
            .map(|names| names.as_slice())
            .unwrap_or_default()
    }

    /// Run the graph with the default backends.
    ///
    /// See [`ExecutionContext::run`].
    pub fn run(&self, inputs: Vec<(&str, Value)>, opts: RunOptions) -> Result<Vec<Value>, RunError> {
        ExecutionContext::new(self).run(inputs, opts)
    }
}

/// Serialized form of a [`Graph`].
///
/// Only the parts supplied to [`GraphBuilder`] are serialized. The rest is
/// recomputed when the graph is deserialized.
#[cfg(feature = "serde")]
#[derive(serde::Serialize, serde::Deserialize)]
struct GraphDef {
    inputs: Vec<GraphInput>,
    constants: Vec<Constant>,
    layers: Vec<Layer>,
    outputs: Vec<String>,
}

#[cfg(feature = "serde")]
impl From<Graph> for GraphDef {
    fn from(graph: Graph) -> GraphDef {
        GraphDef {
            outputs: graph.outputs.into_iter().map(|o| o.name).collect(),
            inputs: graph.inputs,
            constants: graph.constants,
            layers: graph.layers,
        }
    }
}

#[cfg(feature = "serde")]
impl TryFrom<GraphDef> for Graph {
    type Error = BuildError;

    fn try_from(def: GraphDef) -> Result<Graph, BuildError> {
        let mut builder = GraphBuilder::new();
        for input in def.inputs {
            builder.add_input(&input.name, input.dtype, input.shape.as_deref());
        }
        for constant in def.constants {
            builder.add_constant(&constant.name, constant.value);
        }
        for layer in def.layers {
            builder.push_layer(layer);
        }
        for output in &def.outputs {
            builder.add_output(output);
        }
        builder.build()
    }
}
