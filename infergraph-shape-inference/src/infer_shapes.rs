//! Traits for shape inference and common implementations.

use std::error::Error;
use std::fmt;

use infergraph_tensor::DataType;
use smallvec::SmallVec;

use crate::partial_tensor::PartialTensor;
use crate::sym_dim::SymbolicDim;
use crate::sym_shape::{broadcast_shapes, SymbolicShape};

/// Broad categories of errors reported by shape inference and execution.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// An axis or rank does not match a statically required rank.
    Rank,

    /// Shapes are not broadcastable or otherwise incompatible.
    Shape,

    /// An attribute or input value is invalid or self-inconsistent.
    Value,

    /// No backend implements an operator for the given data types.
    NotSupported,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Rank => "rank error",
            ErrorKind::Shape => "shape error",
            ErrorKind::Value => "value error",
            ErrorKind::NotSupported => "not supported",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum InferShapesError {
    /// Too many or too few inputs were provided for this operator.
    IncorrectInputCount,

    /// A required input was absent.
    MissingInput(usize),

    /// The input shapes are incompatible.
    ///
    /// Operator execution will fail if given inputs with these shapes.
    IncompatibleShapes(&'static str),

    /// An input's rank does not match that expected by the operator, or an
    /// axis is out of range.
    IncorrectRank(&'static str),

    /// An operator input or attribute has an invalid value.
    InvalidValue(&'static str),

    /// An input has a data type the operator does not accept.
    IncorrectType(&'static str),
}

impl InferShapesError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IncorrectInputCount | Self::MissingInput(_) | Self::IncompatibleShapes(_) => {
                ErrorKind::Shape
            }
            Self::IncorrectRank(_) => ErrorKind::Rank,
            Self::InvalidValue(_) | Self::IncorrectType(_) => ErrorKind::Value,
        }
    }
}

impl fmt::Display for InferShapesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncorrectInputCount => write!(f, "incorrect input count"),
            Self::MissingInput(index) => write!(f, "required input {} is missing", index),
            Self::IncompatibleShapes(details) => write!(f, "incompatible shapes: {}", details),
            Self::IncorrectRank(details) => write!(f, "incorrect rank: {}", details),
            Self::InvalidValue(details) => write!(f, "invalid value: {}", details),
            Self::IncorrectType(details) => write!(f, "incorrect type: {}", details),
        }
    }
}

impl Error for InferShapesError {}

/// Abstract values of an operator's inputs.
///
/// `None` entries are optional inputs that were not provided.
#[derive(Clone, Copy)]
pub struct InferInputs<'a> {
    inputs: &'a [Option<PartialTensor>],
}

impl<'a> InferInputs<'a> {
    pub fn new(inputs: &'a [Option<PartialTensor>]) -> InferInputs<'a> {
        InferInputs { inputs }
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Get an optional input.
    pub fn get(&self, index: usize) -> Option<&'a PartialTensor> {
        self.inputs.get(index).and_then(|x| x.as_ref())
    }

    /// Get a required input.
    pub fn require(&self, index: usize) -> Result<&'a PartialTensor, InferShapesError> {
        self.get(index).ok_or(InferShapesError::MissingInput(index))
    }

    /// Iterate over provided inputs.
    pub fn iter(&self) -> impl Iterator<Item = &'a PartialTensor> + 'a {
        self.inputs.iter().flatten()
    }
}

/// Infer the shapes and, where possible, the values of an operator's outputs
/// given its inputs.
pub trait InferShapes {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError>;
}

/// Resolve a possibly negative axis against a rank.
pub fn resolve_axis(rank: usize, axis: i64) -> Result<usize, InferShapesError> {
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    if resolved < 0 || resolved >= rank as i64 {
        return Err(InferShapesError::IncorrectRank("axis is out of range"));
    }
    Ok(resolved as usize)
}

/// Resolve a possibly negative index into a range of `len` positions, such
/// as the insertion position for `Unsqueeze`.
pub fn resolve_index(len: usize, index: i64) -> Result<usize, InferShapesError> {
    resolve_axis(len, index)
}

/// Resolve a list of axes against a rank, sorting and checking for
/// duplicates.
pub fn resolve_axes(
    rank: usize,
    axes: impl IntoIterator<Item = i64>,
) -> Result<SmallVec<[usize; 4]>, InferShapesError> {
    let mut resolved: SmallVec<[usize; 4]> = axes
        .into_iter()
        .map(|axis| resolve_axis(rank, axis))
        .collect::<Result<_, _>>()?;
    resolved.sort_unstable();
    let len = resolved.len();
    resolved.dedup();
    if resolved.len() != len {
        return Err(InferShapesError::InvalidValue("axes contain duplicates"));
    }
    Ok(resolved)
}

/// Shape inference for operators whose output has the same shape as the
/// first input.
///
/// Additional inputs (eg. min/max parameters for `Clip`) do not affect the
/// output shape.
pub fn unary_output(input: &PartialTensor, dtype: DataType) -> PartialTensor {
    PartialTensor::new(dtype, input.shape().clone())
}

/// Shape inference for broadcasting operators.
pub fn broadcast_output(
    inputs: &[&PartialTensor],
    dtype: DataType,
) -> Result<PartialTensor, InferShapesError> {
    let shapes: SmallVec<[&SymbolicShape; 4]> = inputs.iter().map(|x| x.shape()).collect();
    let shape = broadcast_shapes(&shapes)?;
    Ok(PartialTensor::new(dtype, shape))
}

/// Compute the output shape of a reduction over `axes`.
///
/// If `axes` is `None`, all dimensions are reduced.
pub fn reduce_shape(
    shape: &SymbolicShape,
    axes: Option<&[i64]>,
    keep_dims: bool,
) -> Result<SymbolicShape, InferShapesError> {
    let Some(dims) = shape.dims() else {
        return Ok(if !keep_dims && axes.is_none() {
            SymbolicShape::scalar()
        } else {
            SymbolicShape::unknown()
        });
    };

    let axes = match axes {
        Some(axes) => resolve_axes(dims.len(), axes.iter().copied())?,
        None => (0..dims.len()).collect(),
    };

    let out_dims = dims.iter().enumerate().filter_map(|(i, dim)| {
        if !axes.contains(&i) {
            Some(dim.clone())
        } else if keep_dims {
            Some(SymbolicDim::Value(1))
        } else {
            None
        }
    });
    Ok(SymbolicShape::from_dims(out_dims))
}

#[cfg(test)]
mod tests {
    use infergraph_tensor::DataType;
    use infergraph_testing::TestCases;

    use super::{
        broadcast_output, reduce_shape, resolve_axes, resolve_axis, unary_output, ErrorKind,
        InferInputs, InferShapesError,
    };
    use crate::partial_tensor::PartialTensor;
    use crate::sym_shape;
    use crate::sym_shape::SymbolicShape;

    #[test]
    fn test_resolve_axis() {
        assert_eq!(resolve_axis(3, -1), Ok(2));
        assert_eq!(resolve_axis(3, 2), Ok(2));
        assert!(resolve_axis(3, 3).is_err());
        assert!(resolve_axis(0, 0).is_err());
        assert_eq!(
            resolve_axis(2, -3).err().map(|e| e.kind()),
            Some(ErrorKind::Rank)
        );
    }

    #[test]
    fn test_resolve_axes() {
        assert_eq!(resolve_axes(4, [-1, 0]).unwrap().as_slice(), &[0, 3]);
        assert!(resolve_axes(4, [1, -3]).is_err());
    }

    #[test]
    fn test_infer_inputs() {
        let inputs = [Some(PartialTensor::from_int(3)), None];
        let inputs = InferInputs::new(&inputs);
        assert_eq!(inputs.len(), 2);
        assert!(inputs.require(0).is_ok());
        assert_eq!(inputs.get(1), None);
        assert_eq!(inputs.require(1), Err(InferShapesError::MissingInput(1)));
        assert_eq!(inputs.iter().count(), 1);
    }

    #[test]
    fn test_unary_and_broadcast_output() {
        let x = PartialTensor::new(DataType::Float, sym_shape!(3, 1));
        let y = PartialTensor::new(DataType::Float, sym_shape!(1, 4));

        assert_eq!(unary_output(&x, DataType::Int).shape(), &sym_shape!(3, 1));

        let out = broadcast_output(&[&x, &y], DataType::Float).unwrap();
        assert_eq!(out.shape(), &sym_shape!(3, 4));
        assert_eq!(out.dtype(), DataType::Float);

        let z = PartialTensor::new(DataType::Float, sym_shape!(2, 5));
        let err = broadcast_output(&[&x, &z], DataType::Float).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Shape);
    }

    #[test]
    fn test_reduce_shape() {
        #[derive(Debug)]
        struct Case {
            shape: SymbolicShape,
            axes: Option<Vec<i64>>,
            keep_dims: bool,
            expected: SymbolicShape,
        }

        let cases = [
            Case {
                shape: sym_shape!("n", 3, 4),
                axes: Some(vec![-1]),
                keep_dims: false,
                expected: sym_shape!("n", 3),
            },
            Case {
                shape: sym_shape!("n", 3, 4),
                axes: Some(vec![1]),
                keep_dims: true,
                expected: sym_shape!("n", 1, 4),
            },
            Case {
                shape: sym_shape!(2, 0, 5),
                axes: None,
                keep_dims: false,
                expected: SymbolicShape::scalar(),
            },
            Case {
                shape: sym_shape!(2, 0, 5),
                axes: Some(vec![1]),
                keep_dims: true,
                expected: sym_shape!(2, 1, 5),
            },
            Case {
                shape: SymbolicShape::unknown(),
                axes: None,
                keep_dims: false,
                expected: SymbolicShape::scalar(),
            },
        ];

        cases.test_each(|case| {
            let shape = reduce_shape(&case.shape, case.axes.as_deref(), case.keep_dims).unwrap();
            assert_eq!(shape, case.expected);
        })
    }
}
