//! Numeric backends which execute operators.
//!
//! A [`Backend`] has one method per family of operators. Each method takes
//! the operator's inputs, attributes which have already been resolved
//! against the input shapes (eg. negative axes converted to positive ones),
//! and pre-allocated outputs whose shapes have been computed by shape
//! inference. A backend either fills the outputs and returns
//! [`Dispatch::Done`], or leaves them untouched and returns
//! [`Dispatch::Unsupported`]. All methods default to `Unsupported`, so a
//! backend only needs to implement the operators and data types it
//! specializes in.
//!
//! Backends are combined into a [`BackendChain`], which tries each backend in
//! order until one handles the operator.

use infergraph_shape_inference::shape_ops::SliceRange;

use crate::operator::{InputList, OpError, Operator};
use crate::ops::{
    ArgReduce, BatchNormalization, BinaryOp, ConvParams, CumSum, DepthToSpace, Gemm,
    InstanceNormalization, LayerNormalization, Lrn, Pad, PoolOp, PoolParams, ReduceOp, Resize,
    ScatterReduction, Softmax, TopK, Trilu, UnaryOp, VariadicOp,
};
use crate::value::{Scalar, Value};

mod cpu;
mod parallel;

pub use cpu::CpuBackend;
pub use parallel::ParallelBackend;

/// Result of asking a backend to run an operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Dispatch {
    /// The backend ran the operator and filled the outputs.
    Done,

    /// The backend does not implement the operator for the given inputs. The
    /// outputs have not been modified.
    Unsupported,
}

/// Declare backend methods which default to returning
/// [`Dispatch::Unsupported`].
macro_rules! backend_methods {
    ($(
        $(#[$meta:meta])*
        fn $name:ident(&self $(, $arg:ident : $arg_ty:ty)* $(,)?);
    )*) => {
        $(
            $(#[$meta])*
            fn $name(&self $(, $arg: $arg_ty)*) -> Result<Dispatch, OpError> {
                $(let _ = $arg;)*
                Ok(Dispatch::Unsupported)
            }
        )*
    };
}

/// Provider of numeric kernels for some operators and data types.
///
/// Backends must not change the shapes of outputs.
pub trait Backend: Send + Sync {
    /// Return a short name for this backend, used in logs and statistics.
    fn name(&self) -> &str;

    backend_methods! {
        /// Elementwise unary operators.
        fn unary(&self, op: &UnaryOp, x: &Value, out: &mut Value);

        /// Clamp values into an optional `[min, max]` range.
        fn clip(&self, x: &Value, min: Option<&Value>, max: Option<&Value>, out: &mut Value);

        /// Elementwise binary operators with broadcasting.
        fn binary(&self, op: &BinaryOp, a: &Value, b: &Value, out: &mut Value);

        /// Select elements from `x` where `cond` is non-zero and `y`
        /// otherwise, with broadcasting.
        fn select(&self, cond: &Value, x: &Value, y: &Value, out: &mut Value);

        /// Elementwise operators over any number of broadcast inputs.
        fn variadic(&self, op: &VariadicOp, inputs: &[&Value], out: &mut Value);

        /// Reduce `x` over `axes`. `axes` is sorted and may be empty.
        fn reduce(&self, op: &ReduceOp, x: &Value, axes: &[usize], out: &mut Value);

        /// Index of the largest or smallest value along an axis.
        fn arg_reduce(&self, op: &ArgReduce, x: &Value, axis: usize, out: &mut Value);

        /// Cumulative sum along an axis.
        fn cum_sum(&self, op: &CumSum, x: &Value, axis: usize, out: &mut Value);

        /// Largest or smallest `k` values along an axis, where `k` is the
        /// size of the outputs along that axis.
        fn top_k(
            &self,
            op: &TopK,
            x: &Value,
            axis: usize,
            values: &mut Value,
            indices: &mut Value,
        );

        /// Softmax, LogSoftmax and Hardmax along an axis.
        fn softmax(&self, op: &Softmax, x: &Value, axis: usize, out: &mut Value);

        /// Batched matrix multiplication with broadcasting.
        fn matmul(&self, a: &Value, b: &Value, out: &mut Value);

        /// General matrix multiplication, `alpha * A @ B + beta * C`.
        fn gemm(&self, op: &Gemm, a: &Value, b: &Value, c: Option<&Value>, out: &mut Value);

        /// Convolution.
        fn conv(
            &self,
            params: &ConvParams,
            x: &Value,
            weight: &Value,
            bias: Option<&Value>,
            out: &mut Value,
        );

        /// Transposed convolution.
        fn conv_transpose(
            &self,
            params: &ConvParams,
            x: &Value,
            weight: &Value,
            bias: Option<&Value>,
            out: &mut Value,
        );

        /// Max or average pooling over spatial windows.
        fn pool(&self, op: PoolOp, params: &PoolParams, x: &Value, out: &mut Value);

        fn batch_norm(
            &self,
            op: &BatchNormalization,
            x: &Value,
            scale: &Value,
            bias: &Value,
            mean: &Value,
            var: &Value,
            out: &mut Value,
        );

        fn instance_norm(
            &self,
            op: &InstanceNormalization,
            x: &Value,
            scale: &Value,
            bias: &Value,
            out: &mut Value,
        );

        /// Layer normalization over the dimensions from `axis` onwards.
        fn layer_norm(
            &self,
            op: &LayerNormalization,
            x: &Value,
            scale: &Value,
            bias: Option<&Value>,
            axis: usize,
            out: &mut Value,
        );

        /// Local response normalization.
        fn lrn(&self, op: &Lrn, x: &Value, out: &mut Value);

        /// Copy elements of `x` into `out`, which has the same number of
        /// elements but possibly a different shape.
        fn copy(&self, x: &Value, out: &mut Value);

        /// Permute the dimensions of `x`.
        fn transpose(&self, x: &Value, perm: &[usize], out: &mut Value);

        /// Broadcast `x` to the shape of `out`.
        fn expand(&self, x: &Value, out: &mut Value);

        fn depth_to_space(&self, op: &DepthToSpace, x: &Value, out: &mut Value);

        fn space_to_depth(&self, block_size: usize, x: &Value, out: &mut Value);

        /// Write dimensions `start..end` of the shape of `x` into `out`.
        fn shape(&self, x: &Value, start: usize, end: usize, out: &mut Value);

        /// Write the number of elements in `x` into `out`.
        fn size(&self, x: &Value, out: &mut Value);

        /// Concatenate inputs along an axis.
        fn concat(&self, inputs: &[&Value], axis: usize, out: &mut Value);

        /// Repeat `x` to fill `out`.
        fn tile(&self, x: &Value, out: &mut Value);

        /// Split `x` along an axis into consecutive chunks, sized according
        /// to the outputs.
        fn split(&self, x: &Value, axis: usize, outputs: &mut [Value]);

        /// Extract a slice, with one range per dimension of `x`.
        fn slice(&self, x: &Value, ranges: &[SliceRange], out: &mut Value);

        /// Pad `x`. `pads` contains the padding at the start of each axis
        /// followed by the padding at the end of each axis.
        fn pad(&self, op: &Pad, x: &Value, pads: &[i64], value: Option<&Value>, out: &mut Value);

        /// Zero the elements above or below the `k`th diagonal.
        fn trilu(&self, op: &Trilu, x: &Value, k: i64, out: &mut Value);

        fn gather(&self, x: &Value, indices: &Value, axis: usize, out: &mut Value);

        fn gather_elements(&self, x: &Value, indices: &Value, axis: usize, out: &mut Value);

        fn gather_nd(&self, x: &Value, indices: &Value, batch_dims: usize, out: &mut Value);

        fn scatter_elements(
            &self,
            reduction: ScatterReduction,
            x: &Value,
            indices: &Value,
            updates: &Value,
            axis: usize,
            out: &mut Value,
        );

        fn scatter_nd(
            &self,
            reduction: ScatterReduction,
            x: &Value,
            indices: &Value,
            updates: &Value,
            out: &mut Value,
        );

        /// One-hot encoding. The depth is the size of `out` along `axis`.
        fn one_hot(&self, indices: &Value, values: &Value, axis: usize, out: &mut Value);

        /// Write the indices of non-zero elements of `x` into `out`.
        fn non_zero(&self, x: &Value, out: &mut Value);

        /// Select slices of `x` along `axis`, or elements of flattened `x`,
        /// where `condition` is non-zero.
        fn compress(&self, x: &Value, condition: &Value, axis: Option<usize>, out: &mut Value);

        /// Fill `out` with a scalar.
        fn fill(&self, value: Scalar, out: &mut Value);

        /// Write `start + i * delta` into each element of `out`.
        fn range(&self, start: &Value, delta: &Value, out: &mut Value);

        /// Write ones on the `k`th diagonal of `out` and zeros elsewhere.
        fn eye_like(&self, k: i64, out: &mut Value);

        /// Convert `x` to the data type of `out`.
        fn cast(&self, x: &Value, out: &mut Value);

        /// Resize spatial dimensions of `x`. `scales` has one entry per
        /// dimension of `x`.
        fn resize(&self, op: &Resize, x: &Value, scales: &[f32], out: &mut Value);
    }

    /// Fill `out` with random values.
    #[cfg(feature = "random")]
    fn random(
        &self,
        op: &crate::ops::RandomOp,
        seed: Option<f32>,
        input: Option<&Value>,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        let _ = (op, seed, input, out);
        Ok(Dispatch::Unsupported)
    }
}

/// Ordered list of backends, tried in turn when running an operator.
pub struct BackendChain {
    backends: Vec<Box<dyn Backend>>,
}

impl BackendChain {
    /// Create a chain which tries each backend in `backends` in order.
    pub fn new(backends: Vec<Box<dyn Backend>>) -> BackendChain {
        BackendChain { backends }
    }

    /// Create a chain which runs large float elementwise operations in
    /// parallel and falls back to the reference CPU backend for everything
    /// else.
    pub fn parallel() -> BackendChain {
        BackendChain::new(vec![
            Box::new(ParallelBackend::default()),
            Box::new(CpuBackend::new()),
        ])
    }

    pub fn backends(&self) -> &[Box<dyn Backend>] {
        &self.backends
    }

    /// Run `op` using the first backend which supports it.
    ///
    /// Returns the index of the backend which ran the operator, or `None` if
    /// no backend supports it.
    pub fn dispatch(
        &self,
        op: &dyn Operator,
        inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Option<usize>, OpError> {
        for (index, backend) in self.backends.iter().enumerate() {
            match op.dispatch(backend.as_ref(), inputs, outputs)? {
                Dispatch::Done => return Ok(Some(index)),
                Dispatch::Unsupported => continue,
            }
        }
        Ok(None)
    }
}

impl Default for BackendChain {
    fn default() -> Self {
        BackendChain::new(vec![Box::new(CpuBackend::new())])
    }
}

#[cfg(test)]
mod tests {
    use infergraph_tensor::Tensor;

    use super::{Backend, BackendChain, Dispatch};
    use crate::operator::{InputList, OpError};
    use crate::ops::{BinaryOp, UnaryOp};
    use crate::value::Value;

    /// Backend which only implements `Neg`, for testing fallback.
    struct NegOnly;

    impl Backend for NegOnly {
        fn name(&self) -> &str {
            "neg-only"
        }

        fn unary(&self, op: &UnaryOp, x: &Value, out: &mut Value) -> Result<Dispatch, OpError> {
            match (op, x, out) {
                (UnaryOp::Neg, Value::FloatTensor(x), Value::FloatTensor(out)) => {
                    for (y, x) in out.iter_mut().zip(x.iter()) {
                        *y = -x;
                    }
                    Ok(Dispatch::Done)
                }
                _ => Ok(Dispatch::Unsupported),
            }
        }
    }

    #[test]
    fn test_chain_falls_back() {
        let chain = BackendChain::new(vec![Box::new(NegOnly), Box::new(super::CpuBackend::new())]);
        let x: Value = Tensor::from_vec(vec![1., -2.]).into();
        let inputs = [Some(&x)];

        let mut outputs = [Value::zeros(x.dtype(), x.shape())];
        let neg = UnaryOp::Neg;
        let backend = chain
            .dispatch(&neg, &InputList::new(&inputs), &mut outputs)
            .unwrap();
        assert_eq!(backend, Some(0));
        assert_eq!(outputs[0], Value::from(Tensor::from_vec(vec![-1., 2.])));

        let abs = UnaryOp::Abs;
        let backend = chain
            .dispatch(&abs, &InputList::new(&inputs), &mut outputs)
            .unwrap();
        assert_eq!(backend, Some(1));
        assert_eq!(outputs[0], Value::from(Tensor::from_vec(vec![1., 2.])));
    }

    #[test]
    fn test_chain_unsupported() {
        let chain = BackendChain::new(vec![Box::new(NegOnly)]);
        let x: Value = Tensor::from_vec(vec![1., -2.]).into();
        let inputs = [Some(&x), Some(&x)];
        let mut outputs = [Value::zeros(x.dtype(), x.shape())];
        let backend = chain
            .dispatch(&BinaryOp::Add, &InputList::new(&inputs), &mut outputs)
            .unwrap();
        assert_eq!(backend, None);
    }
}
