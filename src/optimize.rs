//! Graph optimizations.

use std::error::Error;
use std::fmt;

use rustc_hash::FxHashSet;

use crate::graph::{BuildError, Graph, GraphBuilder, Layer};
use crate::infer_shapes::ShapeInfo;
use crate::operator::ValueInference;
use crate::value::Value;

/// Errors that occur while applying graph optimizations.
#[derive(Clone, Debug, PartialEq)]
pub enum OptimizeError {
    /// The optimized graph could not be constructed.
    BuildFailed(BuildError),
}

impl fmt::Display for OptimizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuildFailed(err) => write!(f, "failed to build optimized graph: {}", err),
        }
    }
}

impl Error for OptimizeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::BuildFailed(err) => Some(err),
        }
    }
}

impl From<BuildError> for OptimizeError {
    fn from(err: BuildError) -> Self {
        Self::BuildFailed(err)
    }
}

/// Applies optimizations to a [`Graph`] to make inference more efficient.
#[derive(Default)]
pub struct GraphOptimizer {}

impl GraphOptimizer {
    pub fn new() -> Self {
        GraphOptimizer {}
    }

    /// Replace layers whose outputs are fully known from shape inference
    /// with constants, then remove layers which are no longer needed.
    ///
    /// Graph inputs are kept even if nothing uses them, and graph outputs
    /// keep their names.
    pub fn fold_constants(&self, graph: &Graph, info: &ShapeInfo) -> Result<Graph, OptimizeError> {
        let mut layers: Vec<&Layer> = Vec::new();
        let mut folded: Vec<(&str, Value)> = Vec::new();

        for layer in graph.layers() {
            match fold_layer(layer, info) {
                Some(values) => {
                    folded.extend(layer.outputs.iter().map(|s| s.as_str()).zip(values));
                }
                None => layers.push(layer),
            }
        }

        // Walk backwards from the graph outputs to find which values are
        // needed.
        let mut needed: FxHashSet<&str> = graph.outputs().iter().map(|o| o.name.as_str()).collect();
        let mut live = vec![false; layers.len()];
        for (index, layer) in layers.iter().enumerate().rev() {
            if layer.outputs.iter().any(|name| needed.contains(name.as_str())) {
                live[index] = true;
                needed.extend(layer.input_names());
            }
        }

        let mut builder = GraphBuilder::new();
        for input in graph.inputs() {
            builder.add_input(&input.name, input.dtype, input.shape.as_deref());
        }
        for constant in graph.constants() {
            if needed.contains(constant.name.as_str()) {
                builder.add_constant(&constant.name, constant.value.clone());
            }
        }
        for (name, value) in folded {
            if needed.contains(name) {
                builder.add_constant(name, value);
            }
        }
        for (layer, live) in layers.into_iter().zip(live) {
            if live {
                builder.push_layer(layer.clone());
            }
        }
        for output in graph.outputs() {
            builder.add_output(&output.name);
        }

        builder.build().map_err(OptimizeError::from)
    }
}

/// Return the values of a layer's outputs if they can be computed ahead of
/// time.
fn fold_layer(layer: &Layer, info: &ShapeInfo) -> Option<Vec<Value>> {
    if layer.op.value_inference() != ValueInference::Fold {
        return None;
    }
    layer
        .outputs
        .iter()
        .map(|name| info.get(name).and_then(Value::from_partial))
        .collect()
}

#[cfg(test)]
mod tests {
    use infergraph_tensor::{DataType, Tensor};

    use super::GraphOptimizer;
    use crate::graph::{Dimension, GraphBuilder, RunOptions, ValueSource};
    use crate::infer_shapes::ShapeInference;
    use crate::ops::{BinaryOp, Concat, Reshape, Shape, UnaryOp};
    use crate::value::Value;

    #[test]
    fn test_fold_constants() {
        let mut builder = GraphBuilder::new();
        builder
            .add_input(
                "x",
                DataType::Float,
                Some(&[Dimension::Symbolic("batch".into()), Dimension::Fixed(4), Dimension::Fixed(2)]),
            )
            .add_constant("minus_one", Tensor::from_vec(vec![-1i64]))
            .add_constant("unused", Tensor::from_scalar(1.0f32))
            .add_layer(Shape { start: Some(1), end: None }, &[Some("x")], &["tail"])
            .add_layer(
                BinaryOp::Mul,
                &[Some("tail"), Some("minus_one")],
                &["neg_tail"],
            )
            .add_layer(
                Concat { axis: 0 },
                &[Some("minus_one"), Some("tail")],
                &["new_shape"],
            )
            .add_layer(
                Reshape::default(),
                &[Some("x"), Some("new_shape")],
                &["reshaped"],
            )
            .add_layer(UnaryOp::Relu, &[Some("reshaped")], &["out"])
            .add_output("out")
            .add_output("tail");
        let graph = builder.build().unwrap();
        let info = ShapeInference::new(&graph).run().unwrap();

        let optimized = GraphOptimizer::new().fold_constants(&graph, &info).unwrap();

        let ops: Vec<_> = optimized.layers().iter().map(|l| l.op.name()).collect();
        assert_eq!(ops, ["Reshape", "Relu"]);

        // Folded values which are still used become constants. Unused
        // layers and constants are removed.
        assert_eq!(
            optimized.constant("new_shape"),
            Some(&Value::from(Tensor::from_vec(vec![-1i64, 4, 2])))
        );
        assert!(optimized.constant("neg_tail").is_none());
        assert!(optimized.constant("unused").is_none());
        assert!(optimized.constant("minus_one").is_none());

        // Graph outputs keep their names even if they become constants.
        assert_eq!(optimized.outputs()[0].name, "out");
        assert!(matches!(optimized.outputs()[0].source, ValueSource::Layer { .. }));
        assert_eq!(optimized.outputs()[1].name, "tail");
        assert!(matches!(optimized.outputs()[1].source, ValueSource::Constant(_)));

        let x = Value::from(Tensor::from_data(&[3, 4, 2], (0..24).map(|i| i as f32 - 12.).collect()));
        let expected = graph.run(vec![("x", x.clone())], RunOptions::default()).unwrap();
        let actual = optimized.run(vec![("x", x)], RunOptions::default()).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_fold_constants_keeps_inputs() {
        let mut builder = GraphBuilder::new();
        builder
            .add_input("x", DataType::Float, None)
            .add_constant("c", Tensor::from_vec(vec![1i64, 2]))
            .add_layer(UnaryOp::Neg, &[Some("c")], &["out"])
            .add_output("out");
        let graph = builder.build().unwrap();
        let info = ShapeInference::new(&graph).run().unwrap();

        let optimized = GraphOptimizer::new().fold_constants(&graph, &info).unwrap();
        assert!(optimized.layers().is_empty());
        assert_eq!(optimized.inputs().len(), 1);
        assert_eq!(
            optimized.constant("out"),
            Some(&Value::from(Tensor::from_vec(vec![-1i64, -2])))
        );
    }
}
