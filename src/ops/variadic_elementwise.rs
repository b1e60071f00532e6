use infergraph_shape_inference::{
    broadcast_output, InferInputs, InferShapes, InferShapesError, PartialTensor,
};
use infergraph_tensor::{DataType, Tensor};

use crate::backend::{Backend, Dispatch};
use crate::operator::{single_output, InputList, OpError, Operator};
use crate::ops::binary_elementwise::fold_broadcast;
use crate::ops::BinaryOp;
use crate::value::Value;

/// Elementwise operators with one or more broadcast inputs.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VariadicOp {
    Sum,
    Mean,
    Max,
    Min,
}

impl VariadicOp {
    /// Return the binary operator used to combine pairs of inputs.
    pub fn binary_op(&self) -> BinaryOp {
        match self {
            VariadicOp::Sum | VariadicOp::Mean => BinaryOp::Add,
            VariadicOp::Max => BinaryOp::Max,
            VariadicOp::Min => BinaryOp::Min,
        }
    }

    pub fn supports(&self, dtype: DataType) -> bool {
        match self {
            VariadicOp::Mean => dtype == DataType::Float,
            _ => true,
        }
    }

    pub fn can_fold(&self) -> bool {
        !matches!(self, VariadicOp::Mean)
    }
}

impl InferShapes for VariadicOp {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let first = inputs.require(0)?;
        let args: Vec<&PartialTensor> = inputs.iter().collect();
        if args.iter().any(|x| x.dtype() != first.dtype()) {
            return Err(InferShapesError::IncorrectType(
                "inputs must have the same type",
            ));
        }

        let mut output = broadcast_output(&args, first.dtype())?;
        if self.can_fold() {
            let op = self.binary_op();
            fold_broadcast(&mut output, &args, |elems| {
                let mut acc = elems[0].clone();
                for elem in &elems[1..] {
                    acc = op.apply_element(&acc, elem);
                }
                acc
            });
        }
        Ok(vec![output])
    }
}

impl Operator for VariadicOp {
    fn name(&self) -> &str {
        match self {
            VariadicOp::Sum => "Sum",
            VariadicOp::Mean => "Mean",
            VariadicOp::Max => "Max",
            VariadicOp::Min => "Min",
        }
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (1, None)
    }

    fn dispatch(
        &self,
        backend: &dyn Backend,
        inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError> {
        let values: Vec<&Value> = inputs
            .iter()
            .map(|x| x.ok_or(OpError::MissingInputs))
            .collect::<Result<_, _>>()?;
        backend.variadic(self, &values, single_output(outputs)?)
    }
}

/// Combine broadcast inputs elementwise using `f`.
///
/// `out` is first filled with the broadcast first input, then each later
/// input is combined into it.
pub fn fold_inputs<T: Copy>(inputs: &[&Tensor<T>], out: &mut Tensor<T>, f: impl Fn(T, T) -> T) {
    let shape = out.shape().to_vec();
    let Some((first, rest)) = inputs.split_first() else {
        return;
    };
    for (y, &x) in out.iter_mut().zip(first.broadcast_iter(&shape)) {
        *y = x;
    }
    for input in rest {
        for (y, &x) in out.iter_mut().zip(input.broadcast_iter(&shape)) {
            *y = f(*y, x);
        }
    }
}

#[cfg(test)]
mod tests {
    use infergraph_tensor::Tensor;

    use super::VariadicOp;
    use crate::operator::OpError;
    use crate::ops::tests::{assert_folds, run_op};
    use crate::value::Value;

    #[test]
    fn test_variadic_ops() {
        let a: Value = Tensor::from_vec(vec![1., 6., 3.]).into();
        let b: Value = Tensor::from_data(&[2, 1], vec![2., 4.]).into();
        let c: Value = Value::from(3.);

        let sum = run_op(&VariadicOp::Sum, &[Some(&a), Some(&b), Some(&c)]).unwrap();
        assert_eq!(
            sum[0],
            Value::from(Tensor::from_data(&[2, 3], vec![6., 11., 8., 8., 13., 10.]))
        );

        let mean = run_op(&VariadicOp::Mean, &[Some(&a), Some(&c)]).unwrap();
        assert_eq!(mean[0], Value::from(Tensor::from_vec(vec![2., 4.5, 3.])));

        let max = run_op(&VariadicOp::Max, &[Some(&a), Some(&b)]).unwrap();
        assert_eq!(
            max[0],
            Value::from(Tensor::from_data(&[2, 3], vec![2., 6., 3., 4., 6., 4.]))
        );

        let single = run_op(&VariadicOp::Min, &[Some(&a)]).unwrap();
        assert_eq!(single[0], a);
    }

    #[test]
    fn test_mean_int_unsupported() {
        let a: Value = Tensor::from_vec(vec![1i64, 2]).into();
        let result = run_op(&VariadicOp::Mean, &[Some(&a), Some(&a)]);
        assert_eq!(result.err(), Some(OpError::UnsupportedType));
    }

    #[test]
    fn test_fold() {
        let a: Value = Tensor::from_vec(vec![1i64, 8, -3]).into();
        let b: Value = Value::from(2i64);
        let c: Value = Tensor::from_vec(vec![0i64, 9, -5]).into();
        for op in [VariadicOp::Sum, VariadicOp::Max, VariadicOp::Min] {
            assert_folds(&op, &[&a, &b, &c]);
        }
    }
}
