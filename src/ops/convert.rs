use infergraph_shape_inference::{
    InferInputs, InferShapes, InferShapesError, PartialTensor, PartialTensorElement,
};
use infergraph_tensor::{DataType, Tensor};

use crate::backend::{Backend, Dispatch};
use crate::operator::{single_output, InputList, OpError, Operator};
use crate::value::Value;

/// Element conversion used by the cast operators.
///
/// Float to int conversion truncates toward zero and saturates at the limits
/// of `i64`. NaN converts to zero.
pub trait CastElement<U> {
    fn cast_element(self) -> U;
}

impl CastElement<f32> for f32 {
    fn cast_element(self) -> f32 {
        self
    }
}

impl CastElement<i64> for i64 {
    fn cast_element(self) -> i64 {
        self
    }
}

impl CastElement<i64> for f32 {
    fn cast_element(self) -> i64 {
        self as i64
    }
}

impl CastElement<f32> for i64 {
    fn cast_element(self) -> f32 {
        self as f32
    }
}

fn cast_partial_element(elem: &PartialTensorElement, to: DataType) -> PartialTensorElement {
    use PartialTensorElement as Elem;
    match (elem, to) {
        (Elem::IntValue(x), DataType::Float) => Elem::FloatValue(x.cast_element()),
        (Elem::FloatValue(x), DataType::Int) => Elem::IntValue(x.cast_element()),
        (Elem::Param(_), DataType::Float) => Elem::Unknown,
        _ => elem.clone(),
    }
}

fn cast_output(x: &PartialTensor, to: DataType) -> PartialTensor {
    x.map_elements(to, |elem| cast_partial_element(elem, to))
}

/// Convert the input to a given data type.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cast {
    pub to: DataType,
}

impl InferShapes for Cast {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        Ok(vec![cast_output(x, self.to)])
    }
}

impl Operator for Cast {
    fn name(&self) -> &str {
        "Cast"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn dispatch(
        &self,
        backend: &dyn Backend,
        inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError> {
        backend.cast(inputs.require(0)?, single_output(outputs)?)
    }
}

/// Convert the first input to the data type of the second.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CastLike {}

impl InferShapes for CastLike {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let like = inputs.require(1)?;
        Ok(vec![cast_output(x, like.dtype())])
    }
}

impl Operator for CastLike {
    fn name(&self) -> &str {
        "CastLike"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (2, Some(2))
    }

    fn dispatch(
        &self,
        backend: &dyn Backend,
        inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError> {
        backend.cast(inputs.require(0)?, single_output(outputs)?)
    }
}

pub fn cast<T: Copy + CastElement<U>, U>(x: &Tensor<T>, out: &mut Tensor<U>) {
    for (y, x) in out.iter_mut().zip(x.iter()) {
        *y = x.cast_element();
    }
}

#[cfg(test)]
mod tests {
    use infergraph_shape_inference::{
        InferInputs, InferShapes, PartialTensor, PartialTensorElement,
    };
    use infergraph_tensor::{DataType, Tensor};

    use super::{Cast, CastLike};
    use crate::ops::tests::{assert_folds, run_op};
    use crate::value::Value;

    #[test]
    fn test_cast() {
        let x: Value = Tensor::from_vec(vec![1.5, -2.7, f32::NAN, 1e20]).into();
        let result = run_op(&Cast { to: DataType::Int }, &[Some(&x)]).unwrap();
        assert_eq!(
            result[0],
            Value::from(Tensor::from_vec(vec![1i64, -2, 0, i64::MAX]))
        );

        let x: Value = Tensor::from_vec(vec![3i64, -1]).into();
        let result = run_op(
            &Cast {
                to: DataType::Float,
            },
            &[Some(&x)],
        )
        .unwrap();
        assert_eq!(result[0], Value::from(Tensor::from_vec(vec![3., -1.])));

        assert_folds(
            &Cast {
                to: DataType::Float,
            },
            &[&x],
        );
        assert_folds(&Cast { to: DataType::Int }, &[&x]);
    }

    #[test]
    fn test_cast_like() {
        let x: Value = Tensor::from_vec(vec![0.5, 2.5]).into();
        let like: Value = Tensor::<i64>::zeros(&[]).into();
        let result = run_op(&CastLike {}, &[Some(&x), Some(&like)]).unwrap();
        assert_eq!(result[0], Value::from(Tensor::from_vec(vec![0i64, 2])));
        assert_folds(&CastLike {}, &[&x, &like]);
    }

    #[test]
    fn test_cast_symbolic() {
        let x = PartialTensor::vector(
            DataType::Int,
            vec![PartialTensorElement::Param("batch".into()), 4i64.into()],
        );
        let inputs = [Some(x)];

        let result = Cast { to: DataType::Int }
            .infer_shapes(InferInputs::new(&inputs))
            .unwrap();
        assert_eq!(result[0].get(0), PartialTensorElement::Param("batch".into()));

        let result = Cast {
            to: DataType::Float,
        }
        .infer_shapes(InferInputs::new(&inputs))
        .unwrap();
        assert_eq!(result[0].get(0), PartialTensorElement::Unknown);
        assert_eq!(result[0].get(1), PartialTensorElement::FloatValue(4.));
    }
}
