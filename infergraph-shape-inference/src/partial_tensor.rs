use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::sync::Arc;

use infergraph_tensor::{DataType, DataTypeOf, Tensor};

use crate::sym_dim::SymbolicDim;
use crate::sym_shape::SymbolicShape;

/// Abstract value of a single tensor element.
///
/// `Param` elements come from named dimensions, eg. the output of a `Shape`
/// operator applied to an input with a "batch" dimension, and only appear
/// in integer tensors.
#[derive(Clone, Debug, PartialEq)]
pub enum PartialTensorElement {
    Unknown,
    Param(Arc<str>),
    IntValue(i64),
    FloatValue(f32),
}

use PartialTensorElement as Elem;

impl PartialTensorElement {
    /// Return true if the element has a concrete value.
    pub fn is_known(&self) -> bool {
        matches!(self, Elem::IntValue(_) | Elem::FloatValue(_))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Elem::IntValue(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Elem::FloatValue(v) => Some(*v),
            _ => None,
        }
    }

    /// Lattice join of two elements.
    pub fn merge(&self, other: &PartialTensorElement) -> PartialTensorElement {
        match (self, other) {
            (Elem::IntValue(a), Elem::IntValue(b)) if a == b => self.clone(),
            // Compare bit patterns so that identical NaNs merge to themselves.
            (Elem::FloatValue(a), Elem::FloatValue(b)) if a.to_bits() == b.to_bits() => {
                self.clone()
            }
            (Elem::Param(a), Elem::Param(b)) if a == b => self.clone(),
            _ => Elem::Unknown,
        }
    }

    /// Interpret this element as a dimension size.
    pub fn to_dim(&self) -> SymbolicDim {
        match self {
            Elem::IntValue(v) => SymbolicDim::Value(*v),
            Elem::Param(name) => SymbolicDim::Param(name.clone()),
            Elem::Unknown | Elem::FloatValue(_) => SymbolicDim::Unknown,
        }
    }

    pub fn from_dim(dim: &SymbolicDim) -> PartialTensorElement {
        match dim {
            SymbolicDim::Value(v) => Elem::IntValue(*v),
            SymbolicDim::Param(name) => Elem::Param(name.clone()),
            SymbolicDim::Unknown => Elem::Unknown,
        }
    }
}

impl fmt::Display for PartialTensorElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Elem::Unknown => write!(f, "?"),
            Elem::Param(name) => write!(f, "{}", name),
            Elem::IntValue(v) => write!(f, "{}", v),
            Elem::FloatValue(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for PartialTensorElement {
    fn from(val: i64) -> Self {
        Elem::IntValue(val)
    }
}

impl From<f32> for PartialTensorElement {
    fn from(val: f32) -> Self {
        Elem::FloatValue(val)
    }
}

// Elementwise arithmetic. Integer arithmetic wraps on overflow and division
// truncates towards zero, matching the reference CPU kernels.

impl Add for PartialTensorElement {
    type Output = PartialTensorElement;

    fn add(self, rhs: Self) -> Self {
        match (self, rhs) {
            (Elem::IntValue(a), Elem::IntValue(b)) => Elem::IntValue(a.wrapping_add(b)),
            (Elem::FloatValue(a), Elem::FloatValue(b)) => Elem::FloatValue(a + b),
            (x, Elem::IntValue(0)) | (Elem::IntValue(0), x) => x,
            _ => Elem::Unknown,
        }
    }
}

impl Sub for PartialTensorElement {
    type Output = PartialTensorElement;

    fn sub(self, rhs: Self) -> Self {
        match (self, rhs) {
            (Elem::IntValue(a), Elem::IntValue(b)) => Elem::IntValue(a.wrapping_sub(b)),
            (Elem::FloatValue(a), Elem::FloatValue(b)) => Elem::FloatValue(a - b),
            (x, Elem::IntValue(0)) => x,
            (Elem::Param(a), Elem::Param(b)) if a == b => Elem::IntValue(0),
            _ => Elem::Unknown,
        }
    }
}

impl Mul for PartialTensorElement {
    type Output = PartialTensorElement;

    fn mul(self, rhs: Self) -> Self {
        match (self, rhs) {
            (Elem::IntValue(a), Elem::IntValue(b)) => Elem::IntValue(a.wrapping_mul(b)),
            (Elem::FloatValue(a), Elem::FloatValue(b)) => Elem::FloatValue(a * b),
            (x, Elem::IntValue(1)) | (Elem::IntValue(1), x) => x,
            (_, Elem::IntValue(0)) | (Elem::IntValue(0), _) => Elem::IntValue(0),
            _ => Elem::Unknown,
        }
    }
}

impl Div for PartialTensorElement {
    type Output = PartialTensorElement;

    fn div(self, rhs: Self) -> Self {
        match (self, rhs) {
            (Elem::IntValue(_), Elem::IntValue(0)) => Elem::Unknown,
            (Elem::IntValue(a), Elem::IntValue(b)) => Elem::IntValue(a.wrapping_div(b)),
            (Elem::FloatValue(a), Elem::FloatValue(b)) => Elem::FloatValue(a / b),
            (x, Elem::IntValue(1)) => x,
            _ => Elem::Unknown,
        }
    }
}

/// Element types which can be converted into known partial elements.
pub trait KnownElement: Copy + DataTypeOf {
    fn to_element(self) -> PartialTensorElement;
}

impl KnownElement for i64 {
    fn to_element(self) -> PartialTensorElement {
        Elem::IntValue(self)
    }
}

impl KnownElement for f32 {
    fn to_element(self) -> PartialTensorElement {
        Elem::FloatValue(self)
    }
}

/// Abstract value of a tensor.
///
/// The data type is always known. The shape may be partially known. Element
/// values are tracked only for small tensors whose shape is fully known, as
/// these are the tensors (shapes, axes, scalars) which matter for inferring
/// the shapes of downstream operators.
#[derive(Clone, Debug, PartialEq)]
pub struct PartialTensor {
    dtype: DataType,
    shape: SymbolicShape,

    /// Element values in row-major order. If present, the length matches the
    /// element count of `shape`.
    elements: Option<Vec<PartialTensorElement>>,
}

impl PartialTensor {
    /// Maximum number of elements for which values are tracked.
    pub const MAX_ELEMENTS: usize = 16;

    /// Maximum rank of tensors for which values are tracked.
    pub const MAX_RANK: usize = 1;

    /// Create a tensor with a given shape and unknown element values.
    ///
    /// If the shape is small enough for values to be tracked, the element
    /// array is created with every element `Unknown`.
    pub fn new(dtype: DataType, shape: SymbolicShape) -> PartialTensor {
        let elements = Self::tracked_len(&shape).map(|len| vec![Elem::Unknown; len]);
        PartialTensor {
            dtype,
            shape,
            elements,
        }
    }

    /// Create a tensor with unknown rank.
    pub fn unknown(dtype: DataType) -> PartialTensor {
        PartialTensor {
            dtype,
            shape: SymbolicShape::unknown(),
            elements: None,
        }
    }

    /// Create a tensor with a fully known shape and known elements.
    ///
    /// Element values are dropped if the shape is too large for values to be
    /// tracked. Panics if the element count does not match the shape.
    pub fn from_elements(
        dtype: DataType,
        shape: SymbolicShape,
        elements: Vec<PartialTensorElement>,
    ) -> PartialTensor {
        assert_eq!(
            shape.num_elements(),
            SymbolicDim::from(elements.len()),
            "element count does not match shape {}",
            shape
        );
        let tracked = Self::tracked_len(&shape).is_some();
        PartialTensor {
            dtype,
            shape,
            elements: tracked.then_some(elements),
        }
    }

    /// Create a 1D tensor from elements.
    pub fn vector(dtype: DataType, elements: Vec<PartialTensorElement>) -> PartialTensor {
        let shape = SymbolicShape::from_fixed(&[elements.len()]);
        Self::from_elements(dtype, shape, elements)
    }

    /// Create a scalar tensor from an element.
    pub fn scalar(dtype: DataType, element: PartialTensorElement) -> PartialTensor {
        Self::from_elements(dtype, SymbolicShape::scalar(), vec![element])
    }

    /// Create a fully known 1D integer tensor.
    pub fn from_ints(values: &[i64]) -> PartialTensor {
        Self::vector(DataType::Int, values.iter().map(|&v| Elem::IntValue(v)).collect())
    }

    /// Create a fully known integer scalar.
    pub fn from_int(value: i64) -> PartialTensor {
        Self::scalar(DataType::Int, Elem::IntValue(value))
    }

    /// Create a fully known float scalar.
    pub fn from_float(value: f32) -> PartialTensor {
        Self::scalar(DataType::Float, Elem::FloatValue(value))
    }

    /// Create a 1D integer tensor whose elements are the dims of `shape`.
    ///
    /// This is the abstract value of a `Shape` operator's output.
    pub fn from_shape(shape: &SymbolicShape) -> PartialTensor {
        match shape.dims() {
            Some(dims) => {
                Self::vector(DataType::Int, dims.iter().map(Elem::from_dim).collect())
            }
            None => PartialTensor::new(
                DataType::Int,
                SymbolicShape::from_dims([SymbolicDim::Unknown]),
            ),
        }
    }

    /// Create a partial tensor from a concrete tensor.
    ///
    /// The shape is always fully known. Element values are kept only if the
    /// tensor is small enough for values to be tracked.
    pub fn from_tensor<T: KnownElement>(tensor: &Tensor<T>) -> PartialTensor {
        let shape = SymbolicShape::from_fixed(tensor.shape());
        if Self::tracked_len(&shape).is_some() {
            let elements = tensor.iter().map(|x| x.to_element()).collect();
            Self::from_elements(T::dtype_of(), shape, elements)
        } else {
            Self::new(T::dtype_of(), shape)
        }
    }

    /// Create a partial tensor from a concrete tensor, keeping the element
    /// values of vectors and scalars regardless of their length.
    ///
    /// This is used when computing concrete output shapes, where inputs such
    /// as a `Reshape` target shape must be fully visible to the shape rule.
    pub fn from_tensor_exact<T: KnownElement>(tensor: &Tensor<T>) -> PartialTensor {
        let shape = SymbolicShape::from_fixed(tensor.shape());
        let elements = (tensor.ndim() <= Self::MAX_RANK)
            .then(|| tensor.iter().map(|x| x.to_element()).collect());
        PartialTensor {
            dtype: T::dtype_of(),
            shape,
            elements,
        }
    }

    /// Return the number of elements that would be tracked for a tensor of
    /// a given shape, or `None` if values are not tracked for this shape.
    fn tracked_len(shape: &SymbolicShape) -> Option<usize> {
        let rank = shape.rank()?;
        if rank > Self::MAX_RANK {
            return None;
        }
        let len = shape.to_fixed()?.iter().product();
        (len <= Self::MAX_ELEMENTS).then_some(len)
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn shape(&self) -> &SymbolicShape {
        &self.shape
    }

    pub fn rank(&self) -> Option<usize> {
        self.shape.rank()
    }

    /// Return the tracked element values, if any.
    pub fn elements(&self) -> Option<&[PartialTensorElement]> {
        self.elements.as_deref()
    }

    /// Return element `index` in row-major order.
    ///
    /// Returns `Unknown` if values are not tracked or the index is out of
    /// range.
    pub fn get(&self, index: usize) -> PartialTensorElement {
        self.elements
            .as_ref()
            .and_then(|elems| elems.get(index))
            .cloned()
            .unwrap_or(Elem::Unknown)
    }

    /// Set element `index`. Has no effect if values are not tracked.
    pub fn set(&mut self, index: usize, element: PartialTensorElement) {
        if let Some(slot) = self.elements.as_mut().and_then(|e| e.get_mut(index)) {
            *slot = element;
        }
    }

    /// Return true if the shape and every element value are known.
    pub fn is_fully_known(&self) -> bool {
        self.elements
            .as_ref()
            .is_some_and(|elems| elems.iter().all(|e| e.is_known()))
    }

    /// Return true if any element value is known.
    pub fn has_known_values(&self) -> bool {
        self.elements
            .as_ref()
            .is_some_and(|elems| elems.iter().any(|e| e.is_known()))
    }

    /// Return all elements as integers, if they are all known.
    pub fn to_ints(&self) -> Option<Vec<i64>> {
        self.elements.as_ref()?.iter().map(|e| e.as_int()).collect()
    }

    /// Return all elements as floats, if they are all known.
    pub fn to_floats(&self) -> Option<Vec<f32>> {
        self.elements.as_ref()?.iter().map(|e| e.as_float()).collect()
    }

    /// Return the value of a single-element integer tensor.
    pub fn to_int_scalar(&self) -> Option<i64> {
        match self.elements.as_deref() {
            Some([elem]) => elem.as_int(),
            _ => None,
        }
    }

    /// Return the value of a single-element float tensor.
    pub fn to_float_scalar(&self) -> Option<f32> {
        match self.elements.as_deref() {
            Some([elem]) => elem.as_float(),
            _ => None,
        }
    }

    /// Return the only element of a tensor that is known to have exactly
    /// one element, known or not.
    pub fn single_element(&self) -> Option<PartialTensorElement> {
        match self.elements.as_deref() {
            Some([elem]) => Some(elem.clone()),
            _ => None,
        }
    }

    /// Interpret a 1D integer tensor as a shape.
    ///
    /// If the tensor's length is known the result has that rank, with a
    /// dimension for each element. Otherwise the result has unknown rank.
    pub fn to_symbolic_shape(&self) -> SymbolicShape {
        if let Some(elements) = &self.elements {
            return SymbolicShape::from_dims(elements.iter().map(|e| e.to_dim()));
        }
        match self.shape.dims() {
            Some([SymbolicDim::Value(len)]) if *len >= 0 => SymbolicShape::of_rank(*len as usize),
            _ => SymbolicShape::unknown(),
        }
    }

    /// Return a copy of this tensor with a new shape and the same elements.
    ///
    /// Element values are kept if they are tracked for both shapes.
    pub fn reshaped(&self, shape: SymbolicShape) -> PartialTensor {
        match (&self.elements, Self::tracked_len(&shape)) {
            (Some(elements), Some(len)) if len == elements.len() => PartialTensor {
                dtype: self.dtype,
                shape,
                elements: Some(elements.clone()),
            },
            _ => PartialTensor::new(self.dtype, shape),
        }
    }

    /// Return a copy with the same shape but a different data type, mapping
    /// each tracked element through `f`.
    pub fn map_elements<F>(&self, dtype: DataType, f: F) -> PartialTensor
    where
        F: Fn(&PartialTensorElement) -> PartialTensorElement,
    {
        PartialTensor {
            dtype,
            shape: self.shape.clone(),
            elements: self.elements.as_ref().map(|e| e.iter().map(f).collect()),
        }
    }

    /// Forget all element values, keeping the dtype and shape.
    pub fn clear_values(&mut self) {
        if let Some(elements) = self.elements.as_mut() {
            elements.fill(Elem::Unknown);
        }
    }

    /// Lattice join of two tensors.
    pub fn merge(&self, other: &PartialTensor) -> PartialTensor {
        let shape = self.shape.merge(&other.shape);
        let mut merged = PartialTensor::new(self.dtype, shape);
        let (Some(a), Some(b)) = (&self.elements, &other.elements) else {
            return merged;
        };
        if let Some(out) = merged.elements.as_mut().filter(|out| out.len() == a.len()) {
            for ((out, a), b) in out.iter_mut().zip(a).zip(b) {
                *out = a.merge(b);
            }
        }
        merged
    }
}

impl fmt::Display for PartialTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.dtype, self.shape)?;
        if let Some(elements) = &self.elements {
            if elements.iter().any(|e| *e != Elem::Unknown) {
                write!(f, " = [")?;
                for (i, elem) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", elem)?;
                }
                write!(f, "]")?;
            }
        }
        Ok(())
    }
}
