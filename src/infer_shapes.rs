//! Shape inference over a whole graph.
//!
//! [`ShapeInference`] walks the layers of a [`Graph`] in order, applying
//! each operator's [`InferShapes`] rule to the partially known values of its
//! inputs. The result is a [`ShapeInfo`] describing the data type, shape and
//! for small tensors the element values of every value in the graph.
//!
//! Element values are only kept for operators whose entry in
//! [`Op::value_inference`](crate::ops::Op::value_inference) is
//! [`Fold`](ValueInference::Fold).

use std::error::Error;
use std::fmt;

use infergraph_shape_inference::{ErrorKind, InferInputs, InferShapesError, PartialTensor};
use rustc_hash::FxHashMap;

use crate::graph::{Graph, Layer, ValueSource};
use crate::operator::{check_arity, ValueInference};

/// Error when shape inference finds that a graph cannot run successfully.
#[derive(Clone, Debug, PartialEq)]
pub struct InferError {
    /// Name of the layer where the error occurred.
    pub layer: String,

    /// Name of the layer's operator.
    pub op: String,

    pub error: InferShapesError,
}

impl InferError {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    fn in_layer(layer: &Layer, error: InferShapesError) -> InferError {
        InferError {
            layer: layer.name().to_string(),
            op: layer.op.name().to_string(),
            error,
        }
    }
}

impl fmt::Display for InferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer \"{}\" ({}): {}", self.layer, self.op, self.error)
    }
}

impl Error for InferError {}

/// Results of shape inference for a graph.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShapeInfo {
    values: FxHashMap<String, PartialTensor>,
}

impl ShapeInfo {
    /// Return what is known about the value with a given name.
    pub fn get(&self, name: &str) -> Option<&PartialTensor> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PartialTensor)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Runs shape inference for a graph.
///
/// Inference can be run to completion with [`run`](Self::run), or one
/// layer at a time with [`infer_next`](Self::infer_next).
pub struct ShapeInference<'a> {
    graph: &'a Graph,
    info: ShapeInfo,

    /// Index of the next layer to process.
    next_layer: usize,
}

impl<'a> ShapeInference<'a> {
    /// Prepare to run shape inference, using the declared shapes of graph
    /// inputs and the values of constants.
    pub fn new(graph: &'a Graph) -> ShapeInference<'a> {
        let mut values = FxHashMap::default();
        for input in graph.inputs() {
            values.insert(
                input.name.clone(),
                PartialTensor::new(input.dtype, input.symbolic_shape()),
            );
        }
        for constant in graph.constants() {
            values.insert(constant.name.clone(), constant.value.to_partial());
        }
        ShapeInference {
            graph,
            info: ShapeInfo { values },
            next_layer: 0,
        }
    }

    /// Specialize what is known about a graph input.
    ///
    /// This can be used to infer shapes for a concrete batch size, for
    /// example. `value` is combined with the input's declared shape, and
    /// must be consistent with it.
    pub fn with_input(mut self, name: &str, value: PartialTensor) -> Result<Self, InferError> {
        let input_error = |error| InferError {
            layer: name.to_string(),
            op: "Input".to_string(),
            error,
        };

        let Some(ValueSource::Input(index)) = self.graph.source(name) else {
            return Err(input_error(InferShapesError::InvalidValue(
                "not an input of the graph",
            )));
        };
        let input = &self.graph.inputs()[index];
        if value.dtype() != input.dtype {
            return Err(input_error(InferShapesError::IncorrectType(
                "type does not match declared input type",
            )));
        }
        let shape = value
            .shape()
            .refine(&input.symbolic_shape())
            .map_err(input_error)?;
        self.info
            .values
            .insert(name.to_string(), value.reshaped(shape));
        Ok(self)
    }

    /// Return the results gathered so far.
    pub fn info(&self) -> &ShapeInfo {
        &self.info
    }

    /// Return true if every layer has been processed.
    pub fn is_done(&self) -> bool {
        self.next_layer >= self.graph.layers().len()
    }

    /// Run inference for the next layer.
    ///
    /// Returns `Ok(false)` if there are no more layers.
    pub fn infer_next(&mut self) -> Result<bool, InferError> {
        let Some(layer) = self.graph.layers().get(self.next_layer) else {
            return Ok(false);
        };
        let op = layer.op.as_operator();

        let inputs: Vec<Option<PartialTensor>> = layer
            .inputs
            .iter()
            .enumerate()
            .map(|(index, name)| match name {
                None => Ok(None),
                Some(name) => self
                    .info
                    .get(name)
                    .cloned()
                    .map(Some)
                    .ok_or(InferShapesError::MissingInput(index)),
            })
            .collect::<Result<_, _>>()
            .map_err(|err| InferError::in_layer(layer, err))?;

        check_arity(op, inputs.len()).map_err(|err| InferError::in_layer(layer, err))?;

        let mut outputs = op
            .infer_shapes(InferInputs::new(&inputs))
            .map_err(|err| InferError::in_layer(layer, err))?;
        if outputs.len() != layer.outputs.len() {
            return Err(InferError::in_layer(
                layer,
                InferShapesError::InvalidValue("operator produced wrong number of outputs"),
            ));
        }

        if layer.op.value_inference() == ValueInference::ShapeOnly {
            for output in &mut outputs {
                output.clear_values();
            }
        }

        for (name, output) in layer.outputs.iter().zip(outputs) {
            self.info.values.insert(name.clone(), output);
        }
        self.next_layer += 1;

        Ok(true)
    }

    /// Run inference for all remaining layers and return the results.
    pub fn run(mut self) -> Result<ShapeInfo, InferError> {
        while self.infer_next()? {}
        Ok(self.info)
    }
}

#[cfg(test)]
mod tests {
    use infergraph_shape_inference::{
        sym_shape, ErrorKind, InferShapesError, PartialTensor, SymbolicDim,
    };
    use infergraph_tensor::{DataType, Tensor};

    use super::ShapeInference;
    use crate::graph::{Dimension, GraphBuilder};
    use crate::ops::{BinaryOp, Gather, MatMul, Reshape, Shape, UnaryOp};

    fn sym(name: &str) -> Dimension {
        Dimension::Symbolic(name.into())
    }

    #[test]
    fn test_infer_symbolic_shapes() {
        let mut builder = GraphBuilder::new();
        builder
            .add_input(
                "x",
                DataType::Float,
                Some(&[sym("batch"), Dimension::Fixed(3), Dimension::Fixed(4)]),
            )
            .add_constant("w", Tensor::<f32>::zeros(&[4, 8]))
            .add_constant("index", Tensor::from_scalar(0i64))
            .add_layer(MatMul {}, &[Some("x"), Some("w")], &["mm"])
            .add_layer(UnaryOp::Exp, &[Some("mm")], &["exp"])
            .add_layer(Shape::default(), &[Some("exp")], &["shape"])
            .add_layer(Gather { axis: 0 }, &[Some("shape"), Some("index")], &["batch_size"])
            .add_output("exp")
            .add_output("batch_size");
        let graph = builder.build().unwrap();

        let info = ShapeInference::new(&graph).run().unwrap();
        assert_eq!(info.get("mm").unwrap().shape(), &sym_shape!("batch", 3, 8));
        assert_eq!(info.get("exp").unwrap().shape(), &sym_shape!("batch", 3, 8));

        let shape = info.get("shape").unwrap();
        assert_eq!(shape.dtype(), DataType::Int);
        assert_eq!(shape.get(1).as_int(), Some(3));
        assert_eq!(shape.get(0).to_dim(), SymbolicDim::param("batch"));

        let batch_size = info.get("batch_size").unwrap();
        assert_eq!(batch_size.single_element().map(|e| e.to_dim()), Some(SymbolicDim::param("batch")));
    }

    #[test]
    fn test_infer_incrementally() {
        let mut builder = GraphBuilder::new();
        builder
            .add_input("x", DataType::Float, Some(&[sym("n")]))
            .add_layer(UnaryOp::Neg, &[Some("x")], &["a"])
            .add_layer(UnaryOp::Relu, &[Some("a")], &["b"]);
        let graph = builder.build().unwrap();

        let mut inference = ShapeInference::new(&graph);
        assert_eq!(inference.infer_next(), Ok(true));
        assert!(inference.info().get("a").is_some());
        assert!(inference.info().get("b").is_none());
        assert!(!inference.is_done());
        assert_eq!(inference.infer_next(), Ok(true));
        assert_eq!(inference.infer_next(), Ok(false));
        assert!(inference.is_done());
        assert_eq!(inference.info().len(), 3);
    }

    #[test]
    fn test_with_input() {
        let mut builder = GraphBuilder::new();
        builder
            .add_input("x", DataType::Float, Some(&[sym("batch"), Dimension::Fixed(2)]))
            .add_layer(Shape::default(), &[Some("x")], &["shape"])
            .add_output("shape");
        let graph = builder.build().unwrap();

        let specialized = PartialTensor::new(DataType::Float, sym_shape!(5, SymbolicDim::Unknown));
        let info = ShapeInference::new(&graph)
            .with_input("x", specialized)
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(info.get("x").unwrap().shape(), &sym_shape!(5, 2));
        assert_eq!(info.get("shape").unwrap().to_ints(), Some(vec![5, 2]));

        let wrong_size = PartialTensor::new(DataType::Float, sym_shape!(5, 3));
        let err = ShapeInference::new(&graph)
            .with_input("x", wrong_size)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Shape);

        let not_input = PartialTensor::new(DataType::Int, sym_shape!(2));
        assert!(ShapeInference::new(&graph)
            .with_input("shape", not_input)
            .is_err());
    }

    #[test]
    fn test_shape_only_ops_discard_values() {
        let mut builder = GraphBuilder::new();
        builder
            .add_constant("x", Tensor::from_vec(vec![1.0f32, 2.0]))
            .add_layer(UnaryOp::Neg, &[Some("x")], &["neg"])
            .add_layer(UnaryOp::Exp, &[Some("x")], &["exp"]);
        let graph = builder.build().unwrap();
        let info = ShapeInference::new(&graph).run().unwrap();

        assert_eq!(info.get("neg").unwrap().to_floats(), Some(vec![-1.0, -2.0]));

        let exp = info.get("exp").unwrap();
        assert_eq!(exp.shape(), &sym_shape!(2));
        assert!(!exp.has_known_values());
    }

    #[test]
    fn test_infer_errors() {
        let mut builder = GraphBuilder::new();
        builder
            .add_input("a", DataType::Float, Some(&[Dimension::Fixed(2), Dimension::Fixed(3)]))
            .add_input("b", DataType::Float, Some(&[Dimension::Fixed(4)]))
            .add_layer(BinaryOp::Add, &[Some("a"), Some("b")], &["sum"]);
        let graph = builder.build().unwrap();
        let err = ShapeInference::new(&graph).run().err().unwrap();
        assert_eq!(err.layer, "sum");
        assert_eq!(err.op, "Add");
        assert_eq!(err.kind(), ErrorKind::Shape);

        let mut builder = GraphBuilder::new();
        builder
            .add_input("a", DataType::Float, None)
            .add_layer(BinaryOp::Add, &[Some("a")], &["sum"]);
        let graph = builder.build().unwrap();
        let err = ShapeInference::new(&graph).run().err().unwrap();
        assert_eq!(err.error, InferShapesError::IncorrectInputCount);

        let mut builder = GraphBuilder::new();
        builder
            .add_input("a", DataType::Float, Some(&[Dimension::Fixed(6)]))
            .add_constant("shape", Tensor::from_vec(vec![-1i64, -1]))
            .add_layer(Reshape::default(), &[Some("a"), Some("shape")], &["out"]);
        let graph = builder.build().unwrap();
        let err = ShapeInference::new(&graph).run().err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Value);
    }
}
