use infergraph_shape_inference::{SymbolicDim, SymbolicShape};
use infergraph_tensor::DataType;

use crate::ops::Op;
use crate::value::Value;

/// Represents the size of a dimension of a graph input.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Dimension {
    /// A dimension whose expected size is fixed and specified as part of the
    /// graph.
    Fixed(usize),

    /// A dimension whose size is determined at runtime. The symbol provides
    /// a name to identify when different values share a size.
    Symbolic(String),

    /// A dimension about which nothing is known.
    Unknown,
}

impl Dimension {
    pub fn to_symbolic(&self) -> SymbolicDim {
        match self {
            Dimension::Fixed(size) => SymbolicDim::Value(*size as i64),
            Dimension::Symbolic(name) => SymbolicDim::param(name),
            Dimension::Unknown => SymbolicDim::Unknown,
        }
    }
}

/// A value which is supplied by the caller when the graph is run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GraphInput {
    pub name: String,
    pub dtype: DataType,

    /// Expected shape of the input, or `None` if not even the rank is
    /// known.
    pub shape: Option<Vec<Dimension>>,
}

impl GraphInput {
    /// Return the expected shape as a symbolic shape.
    pub fn symbolic_shape(&self) -> SymbolicShape {
        match &self.shape {
            Some(dims) => SymbolicShape::from_dims(dims.iter().map(|d| d.to_symbolic())),
            None => SymbolicShape::unknown(),
        }
    }
}

/// A named tensor whose value is part of the graph.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Constant {
    pub name: String,
    pub value: Value,
}

/// A graph node which runs an operator.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Layer {
    pub op: Op,

    /// Names of input values. `None` entries are optional inputs which are
    /// not provided.
    pub inputs: Vec<Option<String>>,

    /// Names of the values this layer produces.
    pub outputs: Vec<String>,
}

impl Layer {
    /// Return the layer's name, which is the name of its first output.
    pub fn name(&self) -> &str {
        self.outputs.first().map(|s| s.as_str()).unwrap_or_default()
    }

    /// Iterate over the names of the layer's inputs, skipping absent
    /// optional inputs.
    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().filter_map(|name| name.as_deref())
    }
}

/// Identifies where the value for a name in a graph comes from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueSource {
    /// Index into [`Graph::inputs`](super::Graph::inputs).
    Input(usize),

    /// Index into [`Graph::constants`](super::Graph::constants).
    Constant(usize),

    /// Output `output` of the layer at index `layer` in
    /// [`Graph::layers`](super::Graph::layers).
    Layer { layer: usize, output: usize },
}

/// A value which is returned to the caller when the graph is run.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphOutput {
    pub name: String,
    pub source: ValueSource,
}
