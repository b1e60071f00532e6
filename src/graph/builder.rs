use std::error::Error;
use std::fmt;

use infergraph_tensor::DataType;
use rustc_hash::{FxHashMap, FxHashSet};

use super::node::{Constant, Dimension, GraphInput, GraphOutput, Layer, ValueSource};
use super::Graph;
use crate::ops::Op;
use crate::value::Value;

/// Errors when constructing a [`Graph`].
#[derive(Clone, Debug, PartialEq)]
pub enum BuildError {
    /// More than one input, constant or layer output has the same name.
    DuplicateName(String),

    /// A layer references a value which is not a graph input, a constant or
    /// the output of an earlier layer.
    UndefinedValue { layer: String, name: String },

    /// A graph output references a value which does not exist.
    UndefinedOutput(String),

    /// The same value is declared as a graph output more than once.
    DuplicateOutput(String),

    /// A layer's output names do not match the number of outputs its
    /// operator produces.
    IncorrectOutputCount {
        layer: String,
        expected: usize,
        actual: usize,
    },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateName(name) => write!(f, "value \"{}\" is defined more than once", name),
            Self::UndefinedValue { layer, name } => write!(
                f,
                "layer \"{}\" input \"{}\" is not produced by an earlier layer",
                layer, name
            ),
            Self::UndefinedOutput(name) => write!(f, "graph output \"{}\" is not defined", name),
            Self::DuplicateOutput(name) => {
                write!(f, "graph output \"{}\" is declared more than once", name)
            }
            Self::IncorrectOutputCount {
                layer,
                expected,
                actual,
            } => write!(
                f,
                "layer \"{}\" has {} outputs but its operator produces {}",
                layer, actual, expected
            ),
        }
    }
}

impl Error for BuildError {}

/// Assembles the inputs, constants, layers and outputs of a [`Graph`].
///
/// Layers must be added in topological order, so that each layer's inputs
/// are graph inputs, constants or outputs of layers added before it.
/// [`GraphBuilder::build`] validates the graph and computes when each
/// intermediate value can be freed during execution.
///
/// ```
/// use infergraph::{DataType, Dimension, GraphBuilder};
/// use infergraph::ops::UnaryOp;
///
/// let mut builder = GraphBuilder::new();
/// builder
///     .add_input("x", DataType::Float, Some(&[Dimension::Symbolic("batch".into())]))
///     .add_layer(UnaryOp::Relu, &[Some("x")], &["y"])
///     .add_output("y");
/// let graph = builder.build().unwrap();
/// assert_eq!(graph.layers().len(), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct GraphBuilder {
    inputs: Vec<GraphInput>,
    constants: Vec<Constant>,
    layers: Vec<Layer>,
    outputs: Vec<String>,
}

impl GraphBuilder {
    pub fn new() -> GraphBuilder {
        GraphBuilder::default()
    }

    /// Declare a value which is supplied by the caller when the graph is
    /// run. `shape` is `None` if the rank of the input is unknown.
    pub fn add_input(
        &mut self,
        name: &str,
        dtype: DataType,
        shape: Option<&[Dimension]>,
    ) -> &mut Self {
        self.inputs.push(GraphInput {
            name: name.to_string(),
            dtype,
            shape: shape.map(|dims| dims.to_vec()),
        });
        self
    }

    pub fn add_constant(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.constants.push(Constant {
            name: name.to_string(),
            value: value.into(),
        });
        self
    }

    /// Add a layer which runs `op` on the named `inputs` and produces the
    /// named `outputs`. `None` inputs are optional inputs which are not
    /// provided.
    pub fn add_layer(
        &mut self,
        op: impl Into<Op>,
        inputs: &[Option<&str>],
        outputs: &[&str],
    ) -> &mut Self {
        self.push_layer(Layer {
            op: op.into(),
            inputs: inputs.iter().map(|name| name.map(String::from)).collect(),
            outputs: outputs.iter().map(|name| name.to_string()).collect(),
        })
    }

    pub fn push_layer(&mut self, layer: Layer) -> &mut Self {
        self.layers.push(layer);
        self
    }

    /// Declare a value which is returned when the graph is run. Outputs are
    /// returned in the order they are declared.
    pub fn add_output(&mut self, name: &str) -> &mut Self {
        self.outputs.push(name.to_string());
        self
    }

    /// Validate the graph and compute its execution plan.
    pub fn build(self) -> Result<Graph, BuildError> {
        let GraphBuilder {
            inputs,
            constants,
            layers,
            outputs,
        } = self;

        let mut sources: FxHashMap<String, ValueSource> = FxHashMap::default();
        let mut define = |name: &str, source: ValueSource| {
            if sources.insert(name.to_string(), source).is_some() {
                return Err(BuildError::DuplicateName(name.to_string()));
            }
            Ok(())
        };

        for (index, input) in inputs.iter().enumerate() {
            define(&input.name, ValueSource::Input(index))?;
        }
        for (index, constant) in constants.iter().enumerate() {
            define(&constant.name, ValueSource::Constant(index))?;
        }

        // Index of the last layer which reads or writes each value stored
        // during execution.
        let mut last_use: FxHashMap<&str, usize> = FxHashMap::default();

        for (layer_index, layer) in layers.iter().enumerate() {
            let expected = layer.op.as_operator().num_outputs();
            if layer.outputs.len() != expected {
                return Err(BuildError::IncorrectOutputCount {
                    layer: layer.name().to_string(),
                    expected,
                    actual: layer.outputs.len(),
                });
            }

            for name in layer.input_names() {
                if !sources.contains_key(name) {
                    return Err(BuildError::UndefinedValue {
                        layer: layer.name().to_string(),
                        name: name.to_string(),
                    });
                }
                last_use.insert(name, layer_index);
            }

            for (output, name) in layer.outputs.iter().enumerate() {
                let source = ValueSource::Layer {
                    layer: layer_index,
                    output,
                };
                if sources.insert(name.clone(), source).is_some() {
                    return Err(BuildError::DuplicateName(name.clone()));
                }
                last_use.insert(name, layer_index);
            }
        }

        let mut graph_outputs = Vec::with_capacity(outputs.len());
        let mut output_names = FxHashSet::default();
        for name in &outputs {
            let Some(source) = sources.get(name.as_str()) else {
                return Err(BuildError::UndefinedOutput(name.clone()));
            };
            if !output_names.insert(name.as_str()) {
                return Err(BuildError::DuplicateOutput(name.clone()));
            }
            graph_outputs.push(GraphOutput {
                name: name.clone(),
                source: *source,
            });
        }

        // Values are released after the last layer which uses them. Graph
        // outputs are kept until the run completes, and constants are never
        // stored.
        let mut release_plan = vec![Vec::new(); layers.len()];
        for (name, layer_index) in last_use {
            let is_constant = matches!(sources.get(name), Some(ValueSource::Constant(_)));
            if is_constant || output_names.contains(name) {
                continue;
            }
            release_plan[layer_index].push(name.to_string());
        }
        for names in &mut release_plan {
            names.sort();
        }

        Ok(Graph {
            inputs,
            constants,
            layers,
            outputs: graph_outputs,
            sources,
            release_plan,
        })
    }
}

impl From<&Graph> for GraphBuilder {
    fn from(graph: &Graph) -> GraphBuilder {
        GraphBuilder {
            inputs: graph.inputs().to_vec(),
            constants: graph.constants().to_vec(),
            layers: graph.layers().to_vec(),
            outputs: graph.outputs().iter().map(|o| o.name.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use infergraph_tensor::{DataType, Tensor};

    use super::{BuildError, GraphBuilder};
    use crate::graph::ValueSource;
    use crate::ops::{BinaryOp, Split, UnaryOp};

    fn builder() -> GraphBuilder {
        let mut builder = GraphBuilder::new();
        builder
            .add_input("x", DataType::Float, None)
            .add_constant("one", Tensor::from_scalar(1.0f32));
        builder
    }

    #[test]
    fn test_build() {
        let mut builder = builder();
        builder
            .add_layer(BinaryOp::Add, &[Some("x"), Some("one")], &["sum"])
            .add_layer(UnaryOp::Relu, &[Some("sum")], &["relu"])
            .add_layer(BinaryOp::Mul, &[Some("relu"), Some("x")], &["out"])
            .add_output("out")
            .add_output("one");
        let graph = builder.build().unwrap();

        assert_eq!(graph.layers().len(), 3);
        assert_eq!(graph.source("x"), Some(ValueSource::Input(0)));
        assert_eq!(graph.source("one"), Some(ValueSource::Constant(0)));
        assert_eq!(
            graph.source("relu"),
            Some(ValueSource::Layer {
                layer: 1,
                output: 0
            })
        );
        assert_eq!(graph.outputs()[1].source, ValueSource::Constant(0));

        assert_eq!(graph.released_after(0), &[] as &[String]);
        assert_eq!(graph.released_after(1), &["sum"]);
        assert_eq!(graph.released_after(2), &["relu", "x"]);
    }

    #[test]
    fn test_unused_output_is_released_immediately() {
        let mut builder = builder();
        builder
            .add_layer(
                Split {
                    axis: 0,
                    num_outputs: 2,
                },
                &[Some("x")],
                &["a", "b"],
            )
            .add_layer(UnaryOp::Neg, &[Some("a")], &["out"])
            .add_output("out");
        let graph = builder.build().unwrap();
        assert_eq!(graph.released_after(0), &["b", "x"]);
        assert_eq!(graph.released_after(1), &["a"]);
    }

    #[test]
    fn test_build_errors() {
        let mut undefined = builder();
        undefined
            .add_layer(UnaryOp::Neg, &[Some("y")], &["out"])
            .add_layer(UnaryOp::Neg, &[Some("x")], &["y"]);
        assert_eq!(
            undefined.build().err(),
            Some(BuildError::UndefinedValue {
                layer: "out".into(),
                name: "y".into()
            })
        );

        let mut duplicate = builder();
        duplicate.add_layer(UnaryOp::Neg, &[Some("x")], &["one"]);
        assert_eq!(
            duplicate.build().err(),
            Some(BuildError::DuplicateName("one".into()))
        );

        let mut self_loop = builder();
        self_loop.add_layer(BinaryOp::Add, &[Some("x"), Some("out")], &["out"]);
        assert!(matches!(
            self_loop.build(),
            Err(BuildError::UndefinedValue { .. })
        ));

        let mut missing_output = builder();
        missing_output.add_output("nope");
        assert_eq!(
            missing_output.build().err(),
            Some(BuildError::UndefinedOutput("nope".into()))
        );

        let mut repeated_output = builder();
        repeated_output.add_output("x").add_output("x");
        assert_eq!(
            repeated_output.build().err(),
            Some(BuildError::DuplicateOutput("x".into()))
        );

        let mut output_count = builder();
        output_count.add_layer(UnaryOp::Neg, &[Some("x")], &["a", "b"]);
        assert_eq!(
            output_count.build().err(),
            Some(BuildError::IncorrectOutputCount {
                layer: "a".into(),
                expected: 1,
                actual: 2
            })
        );
    }
}
