use std::ops::Add;

use infergraph_shape_inference::{
    InferInputs, InferShapes, InferShapesError, PartialTensor, PartialTensorElement, SymbolicDim,
    SymbolicShape,
};
use infergraph_tensor::{DataType, Tensor};

use crate::backend::{Backend, Dispatch};
use crate::operator::{single_output, InputList, OpError, Operator};
use crate::value::{Scalar, Value};

/// Create a tensor filled with a constant, with a shape given by an int
/// vector input.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConstantOfShape {
    pub value: Scalar,
}

impl InferShapes for ConstantOfShape {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let shape = inputs.require(0)?;
        if shape.dtype() != DataType::Int {
            return Err(InferShapesError::IncorrectType("shape must be an int tensor"));
        }
        let shape = shape.to_symbolic_shape();
        if let Some(dims) = shape.dims() {
            if dims.iter().any(|d| d.value().is_some_and(|d| d < 0)) {
                return Err(InferShapesError::InvalidValue("shape must be non-negative"));
            }
        }

        let mut output = PartialTensor::new(self.value.dtype(), shape);
        let len = output.elements().map(|e| e.len()).unwrap_or(0);
        for i in 0..len {
            output.set(i, self.value.to_element());
        }
        Ok(vec![output])
    }
}

impl Operator for ConstantOfShape {
    fn name(&self) -> &str {
        "ConstantOfShape"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn value_inputs(&self) -> &'static [usize] {
        &[0]
    }

    fn dispatch(
        &self,
        backend: &dyn Backend,
        _inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError> {
        backend.fill(self.value, single_output(outputs)?)
    }
}

/// Number of elements in `start..limit` with a step of `delta`.
fn range_len_int(start: i64, limit: i64, delta: i64) -> Result<usize, InferShapesError> {
    if delta == 0 {
        return Err(InferShapesError::InvalidValue("delta must be non-zero"));
    }
    let span = limit.saturating_sub(start);
    let len = span.saturating_add(delta - delta.signum()) / delta;
    Ok(len.max(0) as usize)
}

fn range_len_float(start: f32, limit: f32, delta: f32) -> Result<usize, InferShapesError> {
    if delta == 0. {
        return Err(InferShapesError::InvalidValue("delta must be non-zero"));
    }
    let len = ((limit - start) / delta).ceil();
    Ok(if len > 0. { len as usize } else { 0 })
}

/// Generate a 1D sequence `start, start + delta, ...` up to, but not
/// including, `limit`.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Range {}

impl InferShapes for Range {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let start = inputs.require(0)?;
        let limit = inputs.require(1)?;
        let delta = inputs.require(2)?;
        let dtype = start.dtype();
        if limit.dtype() != dtype || delta.dtype() != dtype {
            return Err(InferShapesError::IncorrectType(
                "range inputs must have the same type",
            ));
        }
        for input in [start, limit, delta] {
            if input.shape().num_elements().value().is_some_and(|n| n != 1) {
                return Err(InferShapesError::InvalidValue(
                    "range inputs must be single-element tensors",
                ));
            }
        }

        use PartialTensorElement::{FloatValue, IntValue};
        let elements = (
            start.single_element(),
            limit.single_element(),
            delta.single_element(),
        );
        let (len, step): (Option<usize>, Option<(PartialTensorElement, PartialTensorElement)>) =
            match elements {
                (Some(IntValue(start)), Some(IntValue(limit)), Some(IntValue(delta))) => (
                    Some(range_len_int(start, limit, delta)?),
                    Some((IntValue(start), IntValue(delta))),
                ),
                (Some(FloatValue(start)), Some(FloatValue(limit)), Some(FloatValue(delta))) => (
                    Some(range_len_float(start, limit, delta)?),
                    Some((FloatValue(start), FloatValue(delta))),
                ),
                (_, _, Some(IntValue(0))) => {
                    return Err(InferShapesError::InvalidValue("delta must be non-zero"))
                }
                _ => (None, None),
            };

        let len = len.map(SymbolicDim::from).unwrap_or(SymbolicDim::Unknown);
        let mut output = PartialTensor::new(dtype, SymbolicShape::from_dims([len]));
        // Elements accumulate in the same order as the kernel.
        let mut next = step.as_ref().map(|(start, _)| start.clone());
        let tracked = output.elements().map(|e| e.len()).unwrap_or(0);
        for i in 0..tracked {
            let element = match (&next, &step) {
                (Some(IntValue(value)), Some((_, IntValue(delta)))) => {
                    let element = IntValue(*value);
                    // The last element may be close to `i64::MAX`.
                    next = value.checked_add(*delta).map(IntValue);
                    element
                }
                (Some(FloatValue(value)), Some((_, FloatValue(delta)))) => {
                    let element = FloatValue(*value);
                    next = (i + 1 < tracked).then(|| FloatValue(value + delta));
                    element
                }
                _ => PartialTensorElement::Unknown,
            };
            output.set(i, element);
        }
        Ok(vec![output])
    }
}

impl Operator for Range {
    fn name(&self) -> &str {
        "Range"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (3, Some(3))
    }

    fn value_inputs(&self) -> &'static [usize] {
        &[0, 1, 2]
    }

    fn dispatch(
        &self,
        backend: &dyn Backend,
        inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError> {
        let start = inputs.require(0)?;
        let delta = inputs.require(2)?;
        backend.range(start, delta, single_output(outputs)?)
    }
}

pub fn range<T: Copy + Add<Output = T>>(start: T, delta: T, out: &mut Tensor<T>) {
    let mut value = start;
    let mut elements = out.iter_mut();
    if let Some(first) = elements.next() {
        *first = value;
    }
    // Step only between elements, so a range ending near the type's max
    // does not overflow.
    for y in elements {
        value = value + delta;
        *y = value;
    }
}

/// Create a matrix with ones on a diagonal, with the shape of the input.
///
/// `k` offsets the diagonal. Positive values select a diagonal above the
/// main one. The output has type `dtype`, or the input's type if not set.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EyeLike {
    pub k: i64,
    pub dtype: Option<DataType>,
}

impl InferShapes for EyeLike {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let shape = x.shape().clone().with_rank(2)?;
        Ok(vec![PartialTensor::new(self.dtype.unwrap_or(x.dtype()), shape)])
    }
}

impl Operator for EyeLike {
    fn name(&self) -> &str {
        "EyeLike"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn dispatch(
        &self,
        backend: &dyn Backend,
        _inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError> {
        backend.eye_like(self.k, single_output(outputs)?)
    }
}

pub fn eye_like<T: Copy>(k: i64, [zero, one]: [T; 2], out: &mut Tensor<T>) {
    let cols = out.size(1);
    for (i, y) in out.iter_mut().enumerate() {
        let (row, col) = (i / cols, i % cols);
        *y = if col as i64 - row as i64 == k { one } else { zero };
    }
}

#[cfg(test)]
mod tests {
    use infergraph_shape_inference::{InferInputs, InferShapes, PartialTensor};
    use infergraph_tensor::{DataType, Tensor};

    use super::{ConstantOfShape, EyeLike, Range};
    use crate::operator::OpError;
    use crate::ops::tests::{assert_folds, run_op};
    use crate::value::{Scalar, Value};

    #[test]
    fn test_constant_of_shape() {
        let shape: Value = Tensor::from_vec(vec![2i64, 3]).into();
        let op = ConstantOfShape {
            value: Scalar::Int(7),
        };
        let result = run_op(&op, &[Some(&shape)]).unwrap();
        assert_eq!(result[0], Value::from(Tensor::full(&[2, 3], 7i64)));

        let vector: Value = Tensor::from_vec(vec![4i64]).into();
        assert_folds(&op, &[&vector]);

        let negative: Value = Tensor::from_vec(vec![-1i64]).into();
        let result = run_op(&op, &[Some(&negative)]);
        assert!(matches!(result, Err(OpError::InvalidValue(_))));
    }

    #[test]
    fn test_range() {
        let cases = [
            ((0i64, 5i64, 2i64), vec![0i64, 2, 4]),
            ((5, 0, -2), vec![5, 3, 1]),
            ((0, 4, 2), vec![0, 2]),
            ((3, 0, 1), vec![]),
            ((i64::MAX - 5, i64::MAX, 10), vec![i64::MAX - 5]),
            ((i64::MAX - 5, i64::MAX, 2), vec![i64::MAX - 5, i64::MAX - 3, i64::MAX - 1]),
        ];
        for ((start, limit, delta), expected) in cases {
            let inputs = [Value::from(start), Value::from(limit), Value::from(delta)];
            let result = run_op(
                &Range {},
                &[Some(&inputs[0]), Some(&inputs[1]), Some(&inputs[2])],
            )
            .unwrap();
            assert_eq!(result[0], Value::from(Tensor::from_vec(expected)));
            assert_folds(&Range {}, &[&inputs[0], &inputs[1], &inputs[2]]);
        }

        let float_inputs = [Value::from(0.), Value::from(1.), Value::from(0.25)];
        let result = run_op(
            &Range {},
            &[
                Some(&float_inputs[0]),
                Some(&float_inputs[1]),
                Some(&float_inputs[2]),
            ],
        )
        .unwrap();
        assert_eq!(
            result[0],
            Value::from(Tensor::from_vec(vec![0., 0.25, 0.5, 0.75]))
        );

        let zero = Value::from(0i64);
        let result = run_op(&Range {}, &[Some(&zero), Some(&zero), Some(&zero)]);
        assert!(matches!(result, Err(OpError::InvalidValue(_))));
    }

    #[test]
    fn test_range_unknown_limit() {
        let inputs = [
            Some(PartialTensor::from_int(0)),
            Some(PartialTensor::new(
                DataType::Int,
                infergraph_shape_inference::SymbolicShape::scalar(),
            )),
            Some(PartialTensor::from_int(1)),
        ];
        let result = Range {}.infer_shapes(InferInputs::new(&inputs)).unwrap();
        assert_eq!(result[0].rank(), Some(1));
        assert!(result[0].shape().dim(0).is_unknown());
    }

    #[test]
    fn test_eye_like() {
        let x: Value = Tensor::<f32>::zeros(&[2, 3]).into();
        let op = EyeLike {
            k: 1,
            dtype: Some(DataType::Int),
        };
        let result = run_op(&op, &[Some(&x)]).unwrap();
        assert_eq!(
            result[0],
            Value::from(Tensor::from_data(&[2, 3], vec![0, 1, 0, 0, 0, 1i64]))
        );

        let vector: Value = Tensor::<f32>::zeros(&[3]).into();
        let result = run_op(&EyeLike::default(), &[Some(&vector)]);
        assert!(matches!(result, Err(OpError::IncorrectRank(_))));
    }
}
