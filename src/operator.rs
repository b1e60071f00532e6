use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display};

use infergraph_shape_inference::{
    ErrorKind, InferInputs, InferShapes, InferShapesError, PartialTensor,
};
use infergraph_tensor::{DataType, Shape};

use crate::backend::{Backend, Dispatch};
use crate::value::{CastError, Value};

/// Possible reasons why an operator may fail on a given input.
#[derive(Eq, PartialEq, Clone, Debug)]
pub enum OpError {
    /// Casting an input to an expected type or rank failed.
    InputCastFailed { index: usize, error: CastError },

    /// A tensor has an unsupported type.
    UnsupportedType,

    /// Input tensor shapes are not compatible with each other or operator
    /// attributes.
    IncompatibleInputShapes(&'static str),

    /// An input's rank does not match the rank required by the operator, or
    /// an axis is out of range.
    IncorrectRank(&'static str),

    /// The number of inputs was less than the required number.
    MissingInputs,

    /// The number of inputs is outside the range accepted by the operator.
    IncorrectInputCount,

    /// An input has a value that is incorrect.
    InvalidValue(&'static str),

    /// An input or attribute has a value that is valid, but not currently supported.
    UnsupportedValue(&'static str),
}

impl OpError {
    /// Return the general category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IncompatibleInputShapes(_) | Self::MissingInputs | Self::IncorrectInputCount => {
                ErrorKind::Shape
            }
            Self::IncorrectRank(_) => ErrorKind::Rank,
            Self::InputCastFailed { .. } | Self::InvalidValue(_) | Self::UnsupportedValue(_) => {
                ErrorKind::Value
            }
            Self::UnsupportedType => ErrorKind::NotSupported,
        }
    }
}

impl From<InferShapesError> for OpError {
    fn from(err: InferShapesError) -> OpError {
        match err {
            InferShapesError::IncorrectInputCount => OpError::IncorrectInputCount,
            InferShapesError::MissingInput(_) => OpError::MissingInputs,
            InferShapesError::IncompatibleShapes(details) => {
                OpError::IncompatibleInputShapes(details)
            }
            InferShapesError::IncorrectRank(details) => OpError::IncorrectRank(details),
            InferShapesError::InvalidValue(details) => OpError::InvalidValue(details),
            InferShapesError::IncorrectType(details) => OpError::UnsupportedValue(details),
        }
    }
}

impl Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpError::InputCastFailed { index, error } => {
                write!(f, "conversion error for input {}: {}", index, error)
            }
            OpError::IncompatibleInputShapes(details) => {
                write!(f, "incompatible input shapes: {}", details)
            }
            OpError::IncorrectRank(details) => write!(f, "incorrect rank: {}", details),
            OpError::MissingInputs => write!(f, "required inputs were missing"),
            OpError::IncorrectInputCount => write!(f, "incorrect number of inputs"),
            OpError::InvalidValue(details) => {
                write!(f, "input or attribute has invalid value: {}", details)
            }
            OpError::UnsupportedValue(details) => {
                write!(f, "unsupported input or attribute value: {}", details)
            }
            OpError::UnsupportedType => {
                write!(f, "unsupported input type")
            }
        }
    }
}

impl Error for OpError {}

/// List of inputs for an operator evaluation.
///
/// `None` entries are optional inputs that were not provided.
#[derive(Clone, Copy)]
pub struct InputList<'a> {
    inputs: &'a [Option<&'a Value>],
}

impl<'a> InputList<'a> {
    pub fn new(inputs: &'a [Option<&'a Value>]) -> InputList<'a> {
        InputList { inputs }
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Get an optional input.
    pub fn get(&self, index: usize) -> Option<&'a Value> {
        self.inputs.get(index).copied().flatten()
    }

    /// Get a required input.
    pub fn require(&self, index: usize) -> Result<&'a Value, OpError> {
        self.get(index).ok_or(OpError::MissingInputs)
    }

    /// Get an optional input as a specific tensor type.
    pub fn get_as<T>(&self, index: usize) -> Result<Option<T>, OpError>
    where
        T: TryFrom<&'a Value, Error = CastError>,
    {
        self.get(index)
            .map(|input| {
                T::try_from(input).map_err(|error| OpError::InputCastFailed { index, error })
            })
            .transpose()
    }

    /// Get a required input as a specific tensor type.
    pub fn require_as<T>(&self, index: usize) -> Result<T, OpError>
    where
        T: TryFrom<&'a Value, Error = CastError>,
    {
        self.get_as(index)?.ok_or(OpError::MissingInputs)
    }

    /// Get the elements of an optional int scalar or vector input.
    pub fn get_ints(&self, index: usize) -> Result<Option<Vec<i64>>, OpError> {
        self.get(index)
            .map(|input| {
                input
                    .to_int_vec()
                    .map_err(|error| OpError::InputCastFailed { index, error })
            })
            .transpose()
    }

    /// Get the elements of a required int scalar or vector input.
    pub fn require_ints(&self, index: usize) -> Result<Vec<i64>, OpError> {
        self.get_ints(index)?.ok_or(OpError::MissingInputs)
    }

    /// Get the value of an optional single-element int input.
    pub fn get_int_scalar(&self, index: usize) -> Result<Option<i64>, OpError> {
        match self.get_ints(index)?.as_deref() {
            None => Ok(None),
            Some([value]) => Ok(Some(*value)),
            Some(_) => Err(OpError::InvalidValue("expected a single-element tensor")),
        }
    }

    /// Iterate over inputs, including absent optional inputs.
    pub fn iter(&self) -> impl Iterator<Item = Option<&'a Value>> + 'a {
        self.inputs.iter().copied()
    }
}

/// Data type and shape of an operator output.
pub type OutputMeta = (DataType, Shape);

/// Whether shape inference computes the element values of an operator's
/// outputs, or only their shapes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueInference {
    /// Output values are computed when inputs are known.
    Fold,

    /// Only output shapes are computed. Any element values produced by the
    /// shape inference rule are discarded.
    ShapeOnly,
}

/// An Operator performs a computation step when executing a data flow graph.
///
/// Operators take zero or more dynamic input values, plus a set of static
/// attributes, and produce one or more output values. Output shapes are
/// computed by the [`InferShapes`] impl, which is used both ahead of time
/// with partially known inputs and at runtime with fully known inputs.
pub trait Operator: InferShapes + Debug {
    /// Return a display name for the operator.
    fn name(&self) -> &str;

    /// Return the minimum and maximum number of inputs, including absent
    /// optional inputs. A maximum of `None` means there is no upper limit.
    fn input_arity(&self) -> (usize, Option<usize>);

    /// Return the number of outputs this operator produces.
    fn num_outputs(&self) -> usize {
        1
    }

    /// Return the indices of inputs whose element values, rather than just
    /// their shapes, are needed to compute output shapes.
    fn value_inputs(&self) -> &'static [usize] {
        &[]
    }

    /// Return false if the operator's outputs may differ between runs with
    /// the same inputs.
    fn is_deterministic(&self) -> bool {
        true
    }

    /// Compute output shapes for operators whose output shape depends on the
    /// values of inputs which are too large for shape inference to track.
    ///
    /// Returns `None` if output shapes can be computed by [`InferShapes`].
    fn data_dependent_shapes(
        &self,
        _inputs: &InputList,
    ) -> Option<Result<Vec<OutputMeta>, OpError>> {
        None
    }

    /// Run the operator using `backend`, writing results into `outputs`.
    ///
    /// The outputs are pre-allocated with the shapes returned by shape
    /// inference. If the backend does not implement the operator for the
    /// given inputs, this returns [`Dispatch::Unsupported`].
    fn dispatch(
        &self,
        backend: &dyn Backend,
        inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError>;
}

/// Check the input count against an operator's arity.
pub fn check_arity(op: &dyn Operator, count: usize) -> Result<(), InferShapesError> {
    let (min, max) = op.input_arity();
    if count < min || max.is_some_and(|max| count > max) {
        return Err(InferShapesError::IncorrectInputCount);
    }
    Ok(())
}

/// Compute the data types and concrete shapes of an operator's outputs for a
/// given set of inputs.
///
/// This applies the operator's shape inference rule to the input shapes, plus
/// the values of inputs listed in [`Operator::value_inputs`].
pub fn output_metas(op: &dyn Operator, inputs: &InputList) -> Result<Vec<OutputMeta>, OpError> {
    if let Some(metas) = op.data_dependent_shapes(inputs) {
        return metas;
    }

    let value_inputs = op.value_inputs();
    let partial_inputs: Vec<Option<PartialTensor>> = inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            input.map(|value| {
                if value_inputs.contains(&index) {
                    value.to_partial_exact()
                } else {
                    value.to_partial_shape()
                }
            })
        })
        .collect();

    let outputs = op.infer_shapes(InferInputs::new(&partial_inputs))?;
    if outputs.len() != op.num_outputs() {
        return Err(OpError::InvalidValue("operator produced wrong number of outputs"));
    }
    outputs
        .iter()
        .map(|output| {
            let shape = output
                .shape()
                .to_fixed()
                .ok_or(OpError::InvalidValue("output shape could not be determined"))?;
            Ok((output.dtype(), shape))
        })
        .collect()
}

/// Return the single output of an operator which produces one output.
pub(crate) fn single_output(outputs: &mut [Value]) -> Result<&mut Value, OpError> {
    match outputs {
        [output] => Ok(output),
        _ => Err(OpError::InvalidValue("expected a single output")),
    }
}
