//! Value types used for operator inputs and outputs.

use std::error::Error;
use std::fmt;
use std::fmt::Display;

use infergraph_shape_inference::{PartialTensor, PartialTensorElement, SymbolicShape};
use infergraph_tensor::{DataType, DataTypeOf, Tensor};

/// Metadata about a tensor.
///
/// This is used in logging and errors which need to contain metadata about
/// a tensor but not the content.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValueMeta {
    pub dtype: DataType,
    pub shape: Vec<usize>,
}

impl Display for ValueMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Produces strings such as "f32 [1, 16, 256]"
        write!(f, "{} {:?}", self.dtype, self.shape)
    }
}

/// Errors when casting a [`Value`] to a tensor of a specific type or rank.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CastError {
    /// The number of dimensions does not match.
    WrongRank { actual: usize, expected: usize },

    /// The data type of elements does not match.
    WrongType {
        actual: DataType,
        expected: DataType,
    },
}

impl Display for CastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongRank { actual, expected } => {
                write!(
                    f,
                    "expected tensor with {} dims but has {} dims",
                    expected, actual
                )
            }
            Self::WrongType { actual, expected } => {
                write!(
                    f,
                    "expected tensor with type {} but has type {}",
                    expected, actual
                )
            }
        }
    }
}

impl Error for CastError {}

/// A scalar attribute value, such as the fill value of `ConstantOfShape`.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Scalar {
    Int(i64),
    Float(f32),
}

impl Scalar {
    pub fn dtype(&self) -> DataType {
        match self {
            Scalar::Int(_) => DataType::Int,
            Scalar::Float(_) => DataType::Float,
        }
    }

    pub fn to_element(self) -> PartialTensorElement {
        match self {
            Scalar::Int(x) => PartialTensorElement::IntValue(x),
            Scalar::Float(x) => PartialTensorElement::FloatValue(x),
        }
    }
}

impl Default for Scalar {
    fn default() -> Self {
        Scalar::Float(0.)
    }
}

impl From<i64> for Scalar {
    fn from(x: i64) -> Scalar {
        Scalar::Int(x)
    }
}

impl From<f32> for Scalar {
    fn from(x: f32) -> Scalar {
        Scalar::Float(x)
    }
}

/// An owned tensor of one of the supported data types.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    FloatTensor(Tensor<f32>),
    IntTensor(Tensor<i64>),
}

impl Value {
    /// Create a zero-filled tensor with a given data type and shape.
    pub fn zeros(dtype: DataType, shape: &[usize]) -> Value {
        match dtype {
            DataType::Float => Value::FloatTensor(Tensor::zeros(shape)),
            DataType::Int => Value::IntTensor(Tensor::zeros(shape)),
        }
    }

    pub fn dtype(&self) -> DataType {
        match self {
            Value::FloatTensor(_) => DataType::Float,
            Value::IntTensor(_) => DataType::Int,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Value::FloatTensor(t) => t.shape(),
            Value::IntTensor(t) => t.shape(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Return the number of elements.
    pub fn len(&self) -> usize {
        match self {
            Value::FloatTensor(t) => t.len(),
            Value::IntTensor(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the size of the tensor's elements in bytes.
    pub fn bytes(&self) -> usize {
        self.len() * self.dtype().size() as usize
    }

    /// Return the data type and shape of this value.
    pub fn to_meta(&self) -> ValueMeta {
        ValueMeta {
            dtype: self.dtype(),
            shape: self.shape().to_vec(),
        }
    }

    /// Return a reference to the float tensor, or `None` if this is an int
    /// tensor.
    pub fn as_float(&self) -> Option<&Tensor<f32>> {
        match self {
            Value::FloatTensor(t) => Some(t),
            _ => None,
        }
    }

    /// Return a reference to the int tensor, or `None` if this is a float
    /// tensor.
    pub fn as_int(&self) -> Option<&Tensor<i64>> {
        match self {
            Value::IntTensor(t) => Some(t),
            _ => None,
        }
    }

    /// Return the elements of a scalar or vector int tensor.
    pub fn to_int_vec(&self) -> Result<Vec<i64>, CastError> {
        let tensor = self.as_int().ok_or(CastError::WrongType {
            actual: self.dtype(),
            expected: DataType::Int,
        })?;
        if tensor.ndim() > 1 {
            return Err(CastError::WrongRank {
                actual: tensor.ndim(),
                expected: 1,
            });
        }
        Ok(tensor.to_vec())
    }

    /// Return the value of a single-element tensor as an `f32`, converting
    /// int elements.
    pub fn to_f32_scalar(&self) -> Option<f32> {
        match self {
            Value::FloatTensor(t) => t.item().copied(),
            Value::IntTensor(t) => t.item().map(|x| *x as f32),
        }
    }

    /// Describe this value's data type and shape as a partial tensor.
    ///
    /// Element values are not included.
    pub fn to_partial_shape(&self) -> PartialTensor {
        PartialTensor::new(self.dtype(), SymbolicShape::from_fixed(self.shape()))
    }

    /// Convert this value to a partial tensor.
    ///
    /// Element values are kept if the tensor is small enough for them to be
    /// tracked during shape inference.
    pub fn to_partial(&self) -> PartialTensor {
        match self {
            Value::FloatTensor(t) => PartialTensor::from_tensor(t),
            Value::IntTensor(t) => PartialTensor::from_tensor(t),
        }
    }

    /// Convert this value to a partial tensor which keeps the element values
    /// of scalars and vectors of any length.
    pub fn to_partial_exact(&self) -> PartialTensor {
        match self {
            Value::FloatTensor(t) => PartialTensor::from_tensor_exact(t),
            Value::IntTensor(t) => PartialTensor::from_tensor_exact(t),
        }
    }

    /// Materialize a partial tensor whose shape and values are fully known.
    ///
    /// Returns `None` if any part of the value is unknown.
    pub fn from_partial(partial: &PartialTensor) -> Option<Value> {
        if !partial.is_fully_known() {
            return None;
        }
        let shape = partial.shape().to_fixed()?;
        match partial.dtype() {
            DataType::Float => {
                let data = partial.to_floats()?;
                Tensor::try_from_data(&shape, data).ok().map(Value::from)
            }
            DataType::Int => {
                let data = partial.to_ints()?;
                Tensor::try_from_data(&shape, data).ok().map(Value::from)
            }
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_meta())
    }
}

/// Declare conversions between `Value` and `Tensor<T>`.
macro_rules! impl_value_conversions {
    ($variant:ident, $element_type:ty) => {
        // T => Value
        impl From<$element_type> for Value {
            fn from(scalar: $element_type) -> Value {
                Value::$variant(Tensor::from_scalar(scalar))
            }
        }

        // Tensor<T> => Value
        impl From<Tensor<$element_type>> for Value {
            fn from(t: Tensor<$element_type>) -> Value {
                Value::$variant(t)
            }
        }

        // Value => Tensor<T>
        impl TryFrom<Value> for Tensor<$element_type> {
            type Error = CastError;

            fn try_from(o: Value) -> Result<Tensor<$element_type>, Self::Error> {
                let dtype = o.dtype();
                match o {
                    Value::$variant(t) => Ok(t),
                    _ => Err(CastError::WrongType {
                        actual: dtype,
                        expected: <$element_type as DataTypeOf>::dtype_of(),
                    }),
                }
            }
        }

        // &Value => &Tensor<T>
        impl<'a> TryFrom<&'a Value> for &'a Tensor<$element_type> {
            type Error = CastError;

            fn try_from(o: &'a Value) -> Result<&'a Tensor<$element_type>, Self::Error> {
                match o {
                    Value::$variant(t) => Ok(t),
                    _ => Err(CastError::WrongType {
                        actual: o.dtype(),
                        expected: <$element_type as DataTypeOf>::dtype_of(),
                    }),
                }
            }
        }
    };
}

impl_value_conversions!(FloatTensor, f32);
impl_value_conversions!(IntTensor, i64);
