use std::ops::{Add, Mul};

use infergraph_shape_inference::{
    broadcast_shapes, InferInputs, InferShapes, InferShapesError, PartialTensor, SymbolicDim,
    SymbolicShape,
};
use infergraph_tensor::layout::{broadcast_shapes as broadcast_fixed, broadcast_strides, offset_of};
use infergraph_tensor::{DataType, Indices, Tensor};
use smallvec::SmallVec;

use crate::backend::{Backend, Dispatch};
use crate::operator::{single_output, InputList, OpError, Operator};
use crate::value::Value;

/// Multiply matrices, with NumPy-style broadcasting of batch dimensions.
///
/// A 1D LHS is treated as a row vector and a 1D RHS as a column vector. The
/// added dimension is removed from the output.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatMul {}

impl InferShapes for MatMul {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let a = inputs.require(0)?;
        let b = inputs.require(1)?;
        if a.dtype() != b.dtype() {
            return Err(InferShapesError::IncorrectType(
                "inputs must have the same type",
            ));
        }

        let (Some(a_dims), Some(b_dims)) = (a.shape().dims(), b.shape().dims()) else {
            return Ok(vec![PartialTensor::unknown(a.dtype())]);
        };
        if a_dims.is_empty() || b_dims.is_empty() {
            return Err(InferShapesError::IncorrectRank(
                "matmul inputs must have at least one dimension",
            ));
        }

        let a_vector = a_dims.len() == 1;
        let b_vector = b_dims.len() == 1;

        let (a_batch, m, a_k) = if a_vector {
            (&[][..], SymbolicDim::Value(1), a_dims[0].clone())
        } else {
            let n = a_dims.len();
            (&a_dims[..n - 2], a_dims[n - 2].clone(), a_dims[n - 1].clone())
        };
        let (b_batch, b_k, n) = if b_vector {
            (&[][..], b_dims[0].clone(), SymbolicDim::Value(1))
        } else {
            let len = b_dims.len();
            (&b_dims[..len - 2], b_dims[len - 2].clone(), b_dims[len - 1].clone())
        };
        a_k.refine(&b_k)?;

        let a_batch = SymbolicShape::from_dims(a_batch.iter().cloned());
        let b_batch = SymbolicShape::from_dims(b_batch.iter().cloned());
        let batch = broadcast_shapes(&[&a_batch, &b_batch])?;

        let mut out_dims: Vec<SymbolicDim> = batch.iter().cloned().collect();
        if !a_vector {
            out_dims.push(m);
        }
        if !b_vector {
            out_dims.push(n);
        }
        Ok(vec![PartialTensor::new(
            a.dtype(),
            SymbolicShape::from_dims(out_dims),
        )])
    }
}

impl Operator for MatMul {
    fn name(&self) -> &str {
        "MatMul"
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
        let a = inputs.require(0)?;
        let b = inputs.require(1)?;
        backend.matmul(a, b, single_output(outputs)?)
    }
}

type Dims = SmallVec<[usize; 4]>;

/// Return the shape of a matmul input with vectors promoted to matrices.
fn promote_matrix(shape: &[usize], is_lhs: bool) -> Dims {
    match shape {
        [k] if is_lhs => [1, *k].into_iter().collect(),
        [k] => [*k, 1].into_iter().collect(),
        _ => shape.iter().copied().collect(),
    }
}

/// Batched matrix multiplication.
///
/// `out` must have the shape computed by shape inference for [`MatMul`].
pub fn matmul<T>(a: &Tensor<T>, b: &Tensor<T>, out: &mut Tensor<T>) -> Result<(), OpError>
where
    T: Copy + Default + Add<Output = T> + Mul<Output = T>,
{
    let a_shape = promote_matrix(a.shape(), true);
    let b_shape = promote_matrix(b.shape(), false);
    if a_shape.len() < 2 || b_shape.len() < 2 {
        return Err(OpError::IncorrectRank(
            "matmul inputs must have at least one dimension",
        ));
    }

    let (a_batch, a_mat) = a_shape.split_at(a_shape.len() - 2);
    let (b_batch, b_mat) = b_shape.split_at(b_shape.len() - 2);
    let [m, k] = [a_mat[0], a_mat[1]];
    let n = b_mat[1];
    if b_mat[0] != k {
        return Err(OpError::IncompatibleInputShapes(
            "matmul inner dimensions do not match",
        ));
    }
    let batch = broadcast_fixed(a_batch, b_batch).ok_or(OpError::IncompatibleInputShapes(
        "matmul batch dimensions cannot be broadcast",
    ))?;

    let a_strides = broadcast_strides(a_batch, &batch);
    let b_strides = broadcast_strides(b_batch, &batch);
    let a_data = a.data();
    let b_data = b.data();
    let out_data = out.data_mut();

    for (batch_idx, index) in Indices::from_shape(&batch).enumerate() {
        let a_mat = &a_data[offset_of(&a_strides, &index) * m * k..][..m * k];
        let b_mat = &b_data[offset_of(&b_strides, &index) * k * n..][..k * n];
        let out_mat = &mut out_data[batch_idx * m * n..][..m * n];
        gemm_kernel(a_mat, b_mat, out_mat, [m, k, n]);
    }
    Ok(())
}

/// Compute `out = a @ b` for row-major `a: [m, k]`, `b: [k, n]`.
fn gemm_kernel<T>(a: &[T], b: &[T], out: &mut [T], [m, k, n]: [usize; 3])
where
    T: Copy + Default + Add<Output = T> + Mul<Output = T>,
{
    for row in 0..m {
        for col in 0..n {
            let mut acc = T::default();
            for i in 0..k {
                acc = acc + a[row * k + i] * b[i * n + col];
            }
            out[row * n + col] = acc;
        }
    }
}

/// General matrix multiplication, `alpha * op(A) @ op(B) + beta * C`, where
/// `op` optionally transposes its argument.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Gemm {
    pub alpha: f32,
    pub beta: f32,
    pub trans_a: bool,
    pub trans_b: bool,
}

impl Default for Gemm {
    fn default() -> Gemm {
        Gemm {
            alpha: 1.,
            beta: 1.,
            trans_a: false,
            trans_b: false,
        }
    }
}

impl InferShapes for Gemm {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let a = inputs.require(0)?;
        let b = inputs.require(1)?;
        if inputs.iter().any(|x| x.dtype() != DataType::Float) {
            return Err(InferShapesError::IncorrectType(
                "gemm inputs must be float tensors",
            ));
        }

        let a_shape = a.shape().clone().with_rank(2)?;
        let b_shape = b.shape().clone().with_rank(2)?;
        let (m, a_k) = if self.trans_a {
            (a_shape.dim(1), a_shape.dim(0))
        } else {
            (a_shape.dim(0), a_shape.dim(1))
        };
        let (b_k, n) = if self.trans_b {
            (b_shape.dim(1), b_shape.dim(0))
        } else {
            (b_shape.dim(0), b_shape.dim(1))
        };
        a_k.refine(&b_k)?;

        let mut out_shape = SymbolicShape::from_dims([m, n]);
        if let Some(c) = inputs.get(2) {
            if c.rank().is_some_and(|rank| rank > 2) {
                return Err(InferShapesError::IncorrectRank("C must have rank <= 2"));
            }
            let broadcast = broadcast_shapes(&[c.shape(), &out_shape])?;
            out_shape = out_shape.refine(&broadcast)?;
        }
        Ok(vec![PartialTensor::new(DataType::Float, out_shape)])
    }
}

impl Operator for Gemm {
    fn name(&self) -> &str {
        "Gemm"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (2, Some(3))
    }

    fn dispatch(
        &self,
        backend: &dyn Backend,
        inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError> {
        let a = inputs.require(0)?;
        let b = inputs.require(1)?;
        backend.gemm(self, a, b, inputs.get(2), single_output(outputs)?)
    }
}

pub fn gemm(
    op: &Gemm,
    a: &Tensor<f32>,
    b: &Tensor<f32>,
    c: Option<&Tensor<f32>>,
    out: &mut Tensor<f32>,
) -> Result<(), OpError> {
    let a = if op.trans_a { a.permuted(&[1, 0]) } else { a.clone() };
    let b = if op.trans_b { b.permuted(&[1, 0]) } else { b.clone() };
    matmul(&a, &b, out)?;

    let out_shape = out.shape().to_vec();
    if op.alpha != 1. {
        out.iter_mut().for_each(|x| *x *= op.alpha);
    }
    if let Some(c) = c {
        if op.beta != 0. {
            for (y, &c) in out.iter_mut().zip(c.broadcast_iter(&out_shape)) {
                *y += op.beta * c;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use infergraph_shape_inference::{
        sym_shape, ErrorKind, InferInputs, InferShapes, PartialTensor,
    };
    use infergraph_tensor::{DataType, Tensor};

    use super::{Gemm, MatMul};
    use crate::ops::tests::run_op;
    use crate::value::Value;

    #[test]
    fn test_matmul() {
        let a: Value = Tensor::from_data(&[2, 3], vec![1., 2., 3., 4., 5., 6.]).into();
        let b: Value = Tensor::from_data(&[3, 2], vec![1., 0., 0., 1., 1., 1.]).into();
        let result = run_op(&MatMul {}, &[Some(&a), Some(&b)]).unwrap();
        assert_eq!(
            result[0],
            Value::from(Tensor::from_data(&[2, 2], vec![4., 5., 10., 11.]))
        );
    }

    #[test]
    fn test_matmul_vectors() {
        let v: Value = Tensor::from_vec(vec![1i64, 2]).into();
        let m: Value = Tensor::from_data(&[2, 2], vec![1i64, 2, 3, 4]).into();

        let result = run_op(&MatMul {}, &[Some(&v), Some(&m)]).unwrap();
        assert_eq!(result[0], Value::from(Tensor::from_vec(vec![7i64, 10])));

        let result = run_op(&MatMul {}, &[Some(&m), Some(&v)]).unwrap();
        assert_eq!(result[0], Value::from(Tensor::from_vec(vec![5i64, 11])));

        let result = run_op(&MatMul {}, &[Some(&v), Some(&v)]).unwrap();
        assert_eq!(result[0], Value::from(Tensor::from_scalar(5i64)));
    }

    #[test]
    fn test_matmul_broadcast_batch() {
        let a: Value = Tensor::from_data(&[2, 1, 2], vec![1., 2., 3., 4.]).into();
        let b: Value = Tensor::from_data(&[2, 1], vec![1., 1.]).into();
        let result = run_op(&MatMul {}, &[Some(&a), Some(&b)]).unwrap();
        assert_eq!(
            result[0],
            Value::from(Tensor::from_data(&[2, 1, 1], vec![3., 7.]))
        );
    }

    #[test]
    fn test_matmul_infer_shapes() {
        let a = PartialTensor::new(DataType::Float, sym_shape!("batch", 4, 8));
        let b = PartialTensor::new(DataType::Float, sym_shape!(8, 16));
        let inputs = [Some(a), Some(b)];
        let result = MatMul {}.infer_shapes(InferInputs::new(&inputs)).unwrap();
        assert_eq!(result[0].shape(), &sym_shape!("batch", 4, 16));

        let a = PartialTensor::new(DataType::Float, sym_shape!(4, 8));
        let b = PartialTensor::new(DataType::Float, sym_shape!(7, 16));
        let inputs = [Some(a), Some(b)];
        let err = MatMul {}.infer_shapes(InferInputs::new(&inputs)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Shape);
    }

    #[test]
    fn test_gemm() {
        let a: Value = Tensor::from_data(&[2, 1], vec![1., 2.]).into();
        let b: Value = Tensor::from_data(&[2, 2], vec![1., 2., 3., 4.]).into();
        let c: Value = Tensor::from_vec(vec![10., 20.]).into();
        let op = Gemm {
            alpha: 2.,
            beta: 0.5,
            trans_a: true,
            trans_b: false,
        };
        let result = run_op(&op, &[Some(&a), Some(&b), Some(&c)]).unwrap();
        // [1, 2] @ [[1, 2], [3, 4]] = [7, 10]
        assert_eq!(
            result[0],
            Value::from(Tensor::from_data(&[1, 2], vec![19., 30.]))
        );
    }
}
