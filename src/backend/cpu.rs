use infergraph_shape_inference::shape_ops::SliceRange;
use infergraph_tensor::Tensor;

use super::{Backend, Dispatch};
use crate::operator::OpError;
use crate::ops::{
    arg_reduce, batch_norm, binary_int, binary_map, cast, clip, compress, concat, conv,
    conv_transpose, cum_sum, depth_to_space, eye_like, fold_inputs, gather, gather_elements,
    gather_nd, gemm, instance_norm, layer_norm, lrn, map_into, matmul, non_zero, one_hot, pad,
    pool, range, reduce, resize, scatter_elements, scatter_nd, select, slice, softmax,
    space_to_depth, split, tile, top_k, trilu, ArgReduce, BatchNormalization, BinaryOp,
    ChannelParams, ConvParams, CumSum, DepthToSpace, Gemm, InstanceNormalization,
    LayerNormalization, Lrn, Pad, PoolOp, PoolParams, ReduceOp, Resize, ScatterReduction, Softmax,
    TopK, Trilu, UnaryOp, VariadicOp,
};
use crate::value::{Scalar, Value};

/// Element types which a [`Value`] can hold.
trait Element: Copy + Default {
    fn tensor(value: &Value) -> Option<&Tensor<Self>>;
    fn tensor_mut(value: &mut Value) -> Option<&mut Tensor<Self>>;
}

impl Element for f32 {
    fn tensor(value: &Value) -> Option<&Tensor<f32>> {
        value.as_float()
    }

    fn tensor_mut(value: &mut Value) -> Option<&mut Tensor<f32>> {
        match value {
            Value::FloatTensor(t) => Some(t),
            _ => None,
        }
    }
}

impl Element for i64 {
    fn tensor(value: &Value) -> Option<&Tensor<i64>> {
        value.as_int()
    }

    fn tensor_mut(value: &mut Value) -> Option<&mut Tensor<i64>> {
        match value {
            Value::IntTensor(t) => Some(t),
            _ => None,
        }
    }
}

/// Get the tensor held by an input that must have element type `T`.
fn typed<T: Element>(value: &Value) -> Result<&Tensor<T>, OpError> {
    T::tensor(value).ok_or(OpError::UnsupportedType)
}

fn typed_mut<T: Element>(value: &mut Value) -> Result<&mut Tensor<T>, OpError> {
    T::tensor_mut(value).ok_or(OpError::UnsupportedType)
}

/// Read the element of an optional single-element input.
fn scalar_input<T: Element>(value: Option<&Value>) -> Result<Option<T>, OpError> {
    let Some(value) = value else {
        return Ok(None);
    };
    typed::<T>(value)?
        .item()
        .copied()
        .map(Some)
        .ok_or(OpError::InvalidValue("expected a single-element tensor"))
}

fn copy_into<T: Copy>(src: &[T], dest: &mut [T]) -> Result<(), OpError> {
    if src.len() != dest.len() {
        return Err(OpError::IncompatibleInputShapes(
            "input and output lengths differ",
        ));
    }
    dest.copy_from_slice(src);
    Ok(())
}

fn expand_into<T: Copy>(x: &Tensor<T>, out: &mut Tensor<T>) {
    let shape = out.shape().to_vec();
    for (y, &x) in out.iter_mut().zip(x.broadcast_iter(&shape)) {
        *y = x;
    }
}

/// Run `$body` with `$x` and `$out` bound to tensors of the same element
/// type. Inputs and outputs of different types are unsupported.
macro_rules! same_type {
    ($x:expr, $out:expr, |$x_t:ident, $out_t:ident| $body:expr) => {
        match ($x, $out) {
            (Value::FloatTensor($x_t), Value::FloatTensor($out_t)) => {
                $body;
                Ok(Dispatch::Done)
            }
            (Value::IntTensor($x_t), Value::IntTensor($out_t)) => {
                $body;
                Ok(Dispatch::Done)
            }
            _ => Ok(Dispatch::Unsupported),
        }
    };
}

/// Run `$body` with `$x` and `$out` bound to float tensors.
macro_rules! float_only {
    ($x:expr, $out:expr, |$x_t:ident, $out_t:ident| $body:expr) => {
        match ($x, $out) {
            (Value::FloatTensor($x_t), Value::FloatTensor($out_t)) => {
                $body;
                Ok(Dispatch::Done)
            }
            _ => Ok(Dispatch::Unsupported),
        }
    };
}

/// Reference backend which implements every operator using simple loops.
///
/// Kernels run on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuBackend {}

impl CpuBackend {
    pub fn new() -> CpuBackend {
        CpuBackend {}
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn unary(&self, op: &UnaryOp, x: &Value, out: &mut Value) -> Result<Dispatch, OpError> {
        if !op.supports(x.dtype()) {
            return Ok(Dispatch::Unsupported);
        }
        match (x, out) {
            (Value::FloatTensor(x), Value::IntTensor(out)) if op.is_predicate() => {
                map_into(x, out, |x| op.apply_predicate(x) as i64)
            }
            (Value::FloatTensor(x), Value::FloatTensor(out)) => {
                map_into(x, out, |x| op.apply_float(x))
            }
            (Value::IntTensor(x), Value::IntTensor(out)) => map_into(x, out, |x| op.apply_int(x)),
            _ => return Ok(Dispatch::Unsupported),
        }
        Ok(Dispatch::Done)
    }

    fn clip(
        &self,
        x: &Value,
        min: Option<&Value>,
        max: Option<&Value>,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        same_type!(x, out, |x, out| clip(
            x,
            scalar_input(min)?,
            scalar_input(max)?,
            out
        ))
    }

    fn binary(
        &self,
        op: &BinaryOp,
        a: &Value,
        b: &Value,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        if !op.supports(a.dtype()) {
            return Ok(Dispatch::Unsupported);
        }
        match (a, b, out) {
            (Value::FloatTensor(a), Value::FloatTensor(b), Value::IntTensor(out))
                if op.is_comparison() =>
            {
                binary_map(a, b, out, |a, b| op.compare_float(a, b) as i64)
            }
            (Value::FloatTensor(a), Value::FloatTensor(b), Value::FloatTensor(out)) => {
                binary_map(a, b, out, |a, b| op.apply_float(a, b))
            }
            (Value::IntTensor(a), Value::IntTensor(b), Value::IntTensor(out)) => {
                binary_int(op, a, b, out)?
            }
            _ => return Ok(Dispatch::Unsupported),
        }
        Ok(Dispatch::Done)
    }

    fn select(
        &self,
        cond: &Value,
        x: &Value,
        y: &Value,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        let Some(cond) = cond.as_int() else {
            return Ok(Dispatch::Unsupported);
        };
        same_type!(x, out, |x, out| select(cond, x, typed(y)?, out))
    }

    fn variadic(
        &self,
        op: &VariadicOp,
        inputs: &[&Value],
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        if !op.supports(out.dtype()) {
            return Ok(Dispatch::Unsupported);
        }
        let combine = op.binary_op();
        match out {
            Value::FloatTensor(out) => {
                let inputs = inputs
                    .iter()
                    .map(|x| typed::<f32>(x))
                    .collect::<Result<Vec<_>, _>>()?;
                fold_inputs(&inputs, out, |a, b| combine.apply_float(a, b));
                if *op == VariadicOp::Mean {
                    let count = inputs.len() as f32;
                    for y in out.iter_mut() {
                        *y /= count;
                    }
                }
            }
            Value::IntTensor(out) => {
                let inputs = inputs
                    .iter()
                    .map(|x| typed::<i64>(x))
                    .collect::<Result<Vec<_>, _>>()?;
                // Sum, Max and Min never fail on ints.
                fold_inputs(&inputs, out, |a, b| combine.apply_int(a, b).unwrap_or(0));
            }
        }
        Ok(Dispatch::Done)
    }

    fn reduce(
        &self,
        op: &ReduceOp,
        x: &Value,
        axes: &[usize],
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        if !op.supports(x.dtype()) {
            return Ok(Dispatch::Unsupported);
        }
        match (x, out) {
            (Value::FloatTensor(x), Value::FloatTensor(out)) => {
                reduce(x, axes, out, |lane| op.reduce_float(lane.iter().copied()))
            }
            (Value::IntTensor(x), Value::IntTensor(out)) => {
                reduce(x, axes, out, |lane| op.reduce_int(lane.iter().copied()))
            }
            _ => return Ok(Dispatch::Unsupported),
        }
        Ok(Dispatch::Done)
    }

    fn arg_reduce(
        &self,
        op: &ArgReduce,
        x: &Value,
        axis: usize,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        let Value::IntTensor(out) = out else {
            return Ok(Dispatch::Unsupported);
        };
        match x {
            Value::FloatTensor(x) => arg_reduce(op, x, axis, out),
            Value::IntTensor(x) => arg_reduce(op, x, axis, out),
        }
        Ok(Dispatch::Done)
    }

    fn cum_sum(
        &self,
        op: &CumSum,
        x: &Value,
        axis: usize,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        match (x, out) {
            (Value::FloatTensor(x), Value::FloatTensor(out)) => {
                cum_sum(op, x, axis, out, |a, b| a + b)
            }
            (Value::IntTensor(x), Value::IntTensor(out)) => {
                cum_sum(op, x, axis, out, i64::wrapping_add)
            }
            _ => return Ok(Dispatch::Unsupported),
        }
        Ok(Dispatch::Done)
    }

    fn top_k(
        &self,
        op: &TopK,
        x: &Value,
        axis: usize,
        values: &mut Value,
        indices: &mut Value,
    ) -> Result<Dispatch, OpError> {
        let Value::IntTensor(indices) = indices else {
            return Ok(Dispatch::Unsupported);
        };
        same_type!(x, values, |x, values| top_k(op, x, axis, values, indices))
    }

    fn softmax(
        &self,
        op: &Softmax,
        x: &Value,
        axis: usize,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        float_only!(x, out, |x, out| softmax(op.op, x, axis, out))
    }

    fn matmul(&self, a: &Value, b: &Value, out: &mut Value) -> Result<Dispatch, OpError> {
        same_type!(a, out, |a, out| matmul(a, typed(b)?, out)?)
    }

    fn gemm(
        &self,
        op: &Gemm,
        a: &Value,
        b: &Value,
        c: Option<&Value>,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        let c = c.map(typed::<f32>).transpose()?;
        float_only!(a, out, |a, out| gemm(op, a, typed(b)?, c, out)?)
    }

    fn conv(
        &self,
        params: &ConvParams,
        x: &Value,
        weight: &Value,
        bias: Option<&Value>,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        let bias = bias.map(typed::<f32>).transpose()?;
        float_only!(x, out, |x, out| conv(params, x, typed(weight)?, bias, out))
    }

    fn conv_transpose(
        &self,
        params: &ConvParams,
        x: &Value,
        weight: &Value,
        bias: Option<&Value>,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        let bias = bias.map(typed::<f32>).transpose()?;
        float_only!(x, out, |x, out| conv_transpose(
            params,
            x,
            typed(weight)?,
            bias,
            out
        ))
    }

    fn pool(
        &self,
        op: PoolOp,
        params: &PoolParams,
        x: &Value,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        float_only!(x, out, |x, out| pool(op, params, x, out))
    }

    fn batch_norm(
        &self,
        op: &BatchNormalization,
        x: &Value,
        scale: &Value,
        bias: &Value,
        mean: &Value,
        var: &Value,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        let params = ChannelParams {
            scale: typed::<f32>(scale)?.data(),
            bias: typed::<f32>(bias)?.data(),
        };
        let mean = typed::<f32>(mean)?.data();
        let var = typed::<f32>(var)?.data();
        float_only!(x, out, |x, out| batch_norm(
            x,
            params,
            mean,
            var,
            op.epsilon,
            out
        )?)
    }

    fn instance_norm(
        &self,
        op: &InstanceNormalization,
        x: &Value,
        scale: &Value,
        bias: &Value,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        let params = ChannelParams {
            scale: typed::<f32>(scale)?.data(),
            bias: typed::<f32>(bias)?.data(),
        };
        float_only!(x, out, |x, out| instance_norm(x, params, op.epsilon, out)?)
    }

    fn layer_norm(
        &self,
        op: &LayerNormalization,
        x: &Value,
        scale: &Value,
        bias: Option<&Value>,
        axis: usize,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        let scale = typed::<f32>(scale)?;
        let bias = bias.map(typed::<f32>).transpose()?;
        float_only!(x, out, |x, out| layer_norm(
            x,
            scale,
            bias,
            axis,
            op.epsilon,
            out
        )?)
    }

    fn lrn(&self, op: &Lrn, x: &Value, out: &mut Value) -> Result<Dispatch, OpError> {
        float_only!(x, out, |x, out| lrn(op, x, out))
    }

    fn copy(&self, x: &Value, out: &mut Value) -> Result<Dispatch, OpError> {
        same_type!(x, out, |x, out| copy_into(x.data(), out.data_mut())?)
    }

    fn transpose(&self, x: &Value, perm: &[usize], out: &mut Value) -> Result<Dispatch, OpError> {
        same_type!(x, out, |x, out| copy_into(
            x.permuted(perm).data(),
            out.data_mut()
        )?)
    }

    fn expand(&self, x: &Value, out: &mut Value) -> Result<Dispatch, OpError> {
        same_type!(x, out, |x, out| expand_into(x, out))
    }

    fn depth_to_space(
        &self,
        op: &DepthToSpace,
        x: &Value,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        same_type!(x, out, |x, out| depth_to_space(op, x, out))
    }

    fn space_to_depth(
        &self,
        block_size: usize,
        x: &Value,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        same_type!(x, out, |x, out| space_to_depth(block_size, x, out))
    }

    fn shape(
        &self,
        x: &Value,
        start: usize,
        end: usize,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        let Value::IntTensor(out) = out else {
            return Ok(Dispatch::Unsupported);
        };
        let dims = x.shape().get(start..end).unwrap_or(&[]);
        for (y, &dim) in out.iter_mut().zip(dims) {
            *y = dim as i64;
        }
        Ok(Dispatch::Done)
    }

    fn size(&self, x: &Value, out: &mut Value) -> Result<Dispatch, OpError> {
        let Value::IntTensor(out) = out else {
            return Ok(Dispatch::Unsupported);
        };
        out.iter_mut().for_each(|y| *y = x.len() as i64);
        Ok(Dispatch::Done)
    }

    fn concat(&self, inputs: &[&Value], axis: usize, out: &mut Value) -> Result<Dispatch, OpError> {
        match out {
            Value::FloatTensor(out) => {
                let inputs = inputs
                    .iter()
                    .map(|x| typed::<f32>(x))
                    .collect::<Result<Vec<_>, _>>()?;
                concat(&inputs, axis, out);
            }
            Value::IntTensor(out) => {
                let inputs = inputs
                    .iter()
                    .map(|x| typed::<i64>(x))
                    .collect::<Result<Vec<_>, _>>()?;
                concat(&inputs, axis, out);
            }
        }
        Ok(Dispatch::Done)
    }

    fn tile(&self, x: &Value, out: &mut Value) -> Result<Dispatch, OpError> {
        same_type!(x, out, |x, out| tile(x, out))
    }

    fn split(&self, x: &Value, axis: usize, outputs: &mut [Value]) -> Result<Dispatch, OpError> {
        match x {
            Value::FloatTensor(x) => {
                let mut outputs = outputs
                    .iter_mut()
                    .map(typed_mut::<f32>)
                    .collect::<Result<Vec<_>, _>>()?;
                split(x, axis, &mut outputs);
            }
            Value::IntTensor(x) => {
                let mut outputs = outputs
                    .iter_mut()
                    .map(typed_mut::<i64>)
                    .collect::<Result<Vec<_>, _>>()?;
                split(x, axis, &mut outputs);
            }
        }
        Ok(Dispatch::Done)
    }

    fn slice(&self, x: &Value, ranges: &[SliceRange], out: &mut Value) -> Result<Dispatch, OpError> {
        same_type!(x, out, |x, out| slice(x, ranges, out))
    }

    fn pad(
        &self,
        op: &Pad,
        x: &Value,
        pads: &[i64],
        value: Option<&Value>,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        same_type!(x, out, |x, out| pad(
            op.mode,
            x,
            pads,
            scalar_input(value)?.unwrap_or_default(),
            out
        ))
    }

    fn trilu(&self, op: &Trilu, x: &Value, k: i64, out: &mut Value) -> Result<Dispatch, OpError> {
        same_type!(x, out, |x, out| trilu(op.upper, x, k, out))
    }

    fn gather(
        &self,
        x: &Value,
        indices: &Value,
        axis: usize,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        let indices = typed::<i64>(indices)?;
        same_type!(x, out, |x, out| gather(x, indices, axis, out)?)
    }

    fn gather_elements(
        &self,
        x: &Value,
        indices: &Value,
        axis: usize,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        let indices = typed::<i64>(indices)?;
        same_type!(x, out, |x, out| gather_elements(x, indices, axis, out)?)
    }

    fn gather_nd(
        &self,
        x: &Value,
        indices: &Value,
        batch_dims: usize,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        let indices = typed::<i64>(indices)?;
        same_type!(x, out, |x, out| gather_nd(x, indices, batch_dims, out)?)
    }

    fn scatter_elements(
        &self,
        reduction: ScatterReduction,
        x: &Value,
        indices: &Value,
        updates: &Value,
        axis: usize,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        let indices = typed::<i64>(indices)?;
        same_type!(x, out, |x, out| scatter_elements(
            reduction,
            x,
            indices,
            typed(updates)?,
            axis,
            out
        )?)
    }

    fn scatter_nd(
        &self,
        reduction: ScatterReduction,
        x: &Value,
        indices: &Value,
        updates: &Value,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        let indices = typed::<i64>(indices)?;
        same_type!(x, out, |x, out| scatter_nd(
            reduction,
            x,
            indices,
            typed(updates)?,
            out
        )?)
    }

    fn one_hot(
        &self,
        indices: &Value,
        values: &Value,
        axis: usize,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        let indices = typed::<i64>(indices)?;
        same_type!(values, out, |values, out| match values.data() {
            &[off, on] => one_hot(indices, [off, on], axis, out),
            _ => return Err(OpError::InvalidValue("values must have two elements")),
        })
    }

    fn non_zero(&self, x: &Value, out: &mut Value) -> Result<Dispatch, OpError> {
        let Value::IntTensor(out) = out else {
            return Ok(Dispatch::Unsupported);
        };
        match x {
            Value::FloatTensor(x) => non_zero(x, out),
            Value::IntTensor(x) => non_zero(x, out),
        }
        Ok(Dispatch::Done)
    }

    fn compress(
        &self,
        x: &Value,
        condition: &Value,
        axis: Option<usize>,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        let condition = typed::<i64>(condition)?;
        same_type!(x, out, |x, out| compress(x, condition, axis, out))
    }

    fn fill(&self, value: Scalar, out: &mut Value) -> Result<Dispatch, OpError> {
        match (value, out) {
            (Scalar::Float(value), Value::FloatTensor(out)) => {
                out.iter_mut().for_each(|y| *y = value)
            }
            (Scalar::Int(value), Value::IntTensor(out)) => out.iter_mut().for_each(|y| *y = value),
            _ => return Ok(Dispatch::Unsupported),
        }
        Ok(Dispatch::Done)
    }

    fn range(&self, start: &Value, delta: &Value, out: &mut Value) -> Result<Dispatch, OpError> {
        let missing = OpError::InvalidValue("range inputs must be single-element tensors");
        match out {
            Value::FloatTensor(out) => {
                let start = scalar_input::<f32>(Some(start))?.ok_or(missing.clone())?;
                let delta = scalar_input::<f32>(Some(delta))?.ok_or(missing)?;
                range(start, delta, out)
            }
            Value::IntTensor(out) => {
                let start = scalar_input::<i64>(Some(start))?.ok_or(missing.clone())?;
                let delta = scalar_input::<i64>(Some(delta))?.ok_or(missing)?;
                range(start, delta, out)
            }
        }
        Ok(Dispatch::Done)
    }

    fn eye_like(&self, k: i64, out: &mut Value) -> Result<Dispatch, OpError> {
        match out {
            Value::FloatTensor(out) => eye_like(k, [0., 1.], out),
            Value::IntTensor(out) => eye_like(k, [0, 1], out),
        }
        Ok(Dispatch::Done)
    }

    fn cast(&self, x: &Value, out: &mut Value) -> Result<Dispatch, OpError> {
        match (x, out) {
            (Value::FloatTensor(x), Value::FloatTensor(out)) => cast(x, out),
            (Value::FloatTensor(x), Value::IntTensor(out)) => cast(x, out),
            (Value::IntTensor(x), Value::FloatTensor(out)) => cast(x, out),
            (Value::IntTensor(x), Value::IntTensor(out)) => cast(x, out),
        }
        Ok(Dispatch::Done)
    }

    fn resize(
        &self,
        op: &Resize,
        x: &Value,
        scales: &[f32],
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        float_only!(x, out, |x, out| resize(op, x, scales, out)?)
    }

    #[cfg(feature = "random")]
    fn random(
        &self,
        op: &crate::ops::RandomOp,
        seed: Option<f32>,
        input: Option<&Value>,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        let Value::FloatTensor(out) = out else {
            return Ok(Dispatch::Unsupported);
        };
        let input = input.map(typed::<f32>).transpose()?;
        crate::ops::random_fill(op, seed, input, out)?;
        Ok(Dispatch::Done)
    }
}

#[cfg(test)]
mod tests {
    use infergraph_tensor::{DataType, Tensor};

    use super::CpuBackend;
    use crate::backend::{Backend, Dispatch};
    use crate::operator::OpError;
    use crate::ops::{BinaryOp, UnaryOp};
    use crate::value::{Scalar, Value};

    #[test]
    fn test_unsupported_dtype() {
        let backend = CpuBackend::new();
        let x: Value = Tensor::from_vec(vec![1i64, 2]).into();
        let mut out = Value::zeros(x.dtype(), x.shape());
        assert_eq!(
            backend.unary(&UnaryOp::Exp, &x, &mut out),
            Ok(Dispatch::Unsupported)
        );
        assert_eq!(
            backend.unary(&UnaryOp::Neg, &x, &mut out),
            Ok(Dispatch::Done)
        );
        assert_eq!(out, Value::from(Tensor::from_vec(vec![-1i64, -2])));
    }

    #[test]
    fn test_mismatched_output_type() {
        let backend = CpuBackend::new();
        let x: Value = Tensor::from_vec(vec![1., 2.]).into();
        let mut out = Value::zeros(DataType::Int, &[2]);
        assert_eq!(backend.copy(&x, &mut out), Ok(Dispatch::Unsupported));
        assert_eq!(
            backend.fill(Scalar::Float(1.), &mut out),
            Ok(Dispatch::Unsupported)
        );
    }

    #[test]
    fn test_int_division_by_zero() {
        let backend = CpuBackend::new();
        let a: Value = Tensor::from_vec(vec![4i64, 5]).into();
        let b: Value = Tensor::from_vec(vec![2i64, 0]).into();
        let mut out = Value::zeros(a.dtype(), a.shape());
        assert_eq!(
            backend.binary(&BinaryOp::Div, &a, &b, &mut out),
            Err(OpError::InvalidValue("division by zero"))
        );
    }

    #[test]
    fn test_copy_length_mismatch() {
        let backend = CpuBackend::new();
        let x: Value = Tensor::from_vec(vec![1., 2., 3.]).into();
        let mut out = Value::zeros(x.dtype(), &[2]);
        assert!(matches!(
            backend.copy(&x, &mut out),
            Err(OpError::IncompatibleInputShapes(_))
        ));
    }
}
