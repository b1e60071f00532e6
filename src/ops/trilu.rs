use infergraph_shape_inference::{
    unary_output, InferInputs, InferShapes, InferShapesError, PartialTensor,
};
use infergraph_tensor::{DataType, Tensor};

use crate::backend::{Backend, Dispatch};
use crate::operator::{single_output, InputList, OpError, Operator};
use crate::value::Value;

/// Keep the upper or lower triangle of the matrices in the last two dims of
/// the input, zeroing other elements.
///
/// The optional second input is a diagonal offset `k`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Trilu {
    pub upper: bool,
}

impl InferShapes for Trilu {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        x.shape().require_min_rank(2)?;
        if let Some(k) = inputs.get(1) {
            if k.dtype() != DataType::Int {
                return Err(InferShapesError::IncorrectType("k must be an int scalar"));
            }
        }
        Ok(vec![unary_output(x, x.dtype())])
    }
}

impl Operator for Trilu {
    fn name(&self) -> &str {
        "Trilu"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (1, Some(2))
    }

    fn dispatch(
        &self,
        backend: &dyn Backend,
        inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError> {
        let x = inputs.require(0)?;
        let k = inputs.get_int_scalar(1)?.unwrap_or(0);
        backend.trilu(self, x, k, single_output(outputs)?)
    }
}

pub fn trilu<T: Copy + Default>(upper: bool, x: &Tensor<T>, k: i64, out: &mut Tensor<T>) {
    let ndim = x.ndim();
    let (rows, cols) = (x.size(ndim - 2), x.size(ndim - 1));
    let matrix_len = rows * cols;
    if matrix_len == 0 {
        return;
    }

    for (x_mat, out_mat) in x
        .data()
        .chunks(matrix_len)
        .zip(out.data_mut().chunks_mut(matrix_len))
    {
        for row in 0..rows {
            for col in 0..cols {
                let offset = col as i64 - row as i64;
                let keep = if upper { offset >= k } else { offset <= k };
                let i = row * cols + col;
                out_mat[i] = if keep { x_mat[i] } else { T::default() };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use infergraph_shape_inference::ErrorKind;
    use infergraph_tensor::Tensor;

    use super::Trilu;
    use crate::ops::tests::run_op;
    use crate::value::Value;

    #[test]
    fn test_trilu() {
        let x: Value = Tensor::from_data(&[3, 3], (1..=9i64).collect()).into();

        let result = run_op(&Trilu { upper: true }, &[Some(&x)]).unwrap();
        assert_eq!(
            result[0],
            Value::from(Tensor::from_data(&[3, 3], vec![1, 2, 3, 0, 5, 6, 0, 0, 9i64]))
        );

        let k = Value::from(-1i64);
        let result = run_op(&Trilu { upper: false }, &[Some(&x), Some(&k)]).unwrap();
        assert_eq!(
            result[0],
            Value::from(Tensor::from_data(&[3, 3], vec![0, 0, 0, 4, 0, 0, 7, 8, 0i64]))
        );
    }

    #[test]
    fn test_trilu_batch() {
        let x: Value = Tensor::from_data(&[2, 1, 2], vec![1., 2., 3., 4.]).into();
        let k = Value::from(1i64);
        let result = run_op(&Trilu { upper: true }, &[Some(&x), Some(&k)]).unwrap();
        assert_eq!(
            result[0],
            Value::from(Tensor::from_data(&[2, 1, 2], vec![0., 2., 0., 4.]))
        );

        let vector: Value = Tensor::from_vec(vec![1., 2.]).into();
        let err = run_op(&Trilu { upper: true }, &[Some(&vector)]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Rank);
    }
}
