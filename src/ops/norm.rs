use infergraph_shape_inference::{
    resolve_axis, unary_output, InferInputs, InferShapes, InferShapesError, PartialTensor,
};
use infergraph_tensor::{DataType, Indices, Tensor};

use crate::backend::{Backend, Dispatch};
use crate::operator::{single_output, InputList, OpError, Operator};
use crate::value::Value;

/// Check that an input is a float tensor with at least `min_rank` dims.
fn require_float_input(
    x: &PartialTensor,
    min_rank: usize,
) -> Result<PartialTensor, InferShapesError> {
    if x.dtype() != DataType::Float {
        return Err(InferShapesError::IncorrectType("input must be a float tensor"));
    }
    x.shape().require_min_rank(min_rank)?;
    Ok(unary_output(x, DataType::Float))
}

/// Call `f` with the index of the first element of each lane along `axis`.
fn for_each_lane(shape: &[usize], axis: usize, mut f: impl FnMut(&[usize])) {
    let mut starts = shape.to_vec();
    starts[axis] = 1;
    for start in Indices::from_shape(&starts) {
        f(&start);
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SoftmaxOp {
    Softmax,
    LogSoftmax,
    /// Set the first maximum value in each lane to 1 and the rest to 0.
    Hardmax,
}

/// Softmax and related operators, which normalize lanes along an axis.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Softmax {
    pub op: SoftmaxOp,
    pub axis: i64,
}

impl InferShapes for Softmax {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let output = require_float_input(x, 1)?;
        if let Some(rank) = x.rank() {
            resolve_axis(rank, self.axis)?;
        }
        Ok(vec![output])
    }
}

impl Operator for Softmax {
    fn name(&self) -> &str {
        match self.op {
            SoftmaxOp::Softmax => "Softmax",
            SoftmaxOp::LogSoftmax => "LogSoftmax",
            SoftmaxOp::Hardmax => "Hardmax",
        }
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
        let x = inputs.require(0)?;
        let axis = resolve_axis(x.ndim(), self.axis)?;
        backend.softmax(self, x, axis, single_output(outputs)?)
    }
}

pub fn softmax(op: SoftmaxOp, x: &Tensor<f32>, axis: usize, out: &mut Tensor<f32>) {
    let len = x.size(axis);
    let mut lane = Vec::with_capacity(len);

    for_each_lane(x.shape(), axis, |start| {
        let mut index = start.to_vec();
        lane.clear();
        for i in 0..len {
            index[axis] = i;
            lane.push(x.get(&index).copied().unwrap_or(0.));
        }

        let max = lane.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        match op {
            SoftmaxOp::Softmax => {
                let sum: f32 = lane.iter().map(|x| (x - max).exp()).sum();
                for x in lane.iter_mut() {
                    *x = (*x - max).exp() / sum;
                }
            }
            SoftmaxOp::LogSoftmax => {
                let log_sum = lane.iter().map(|x| (x - max).exp()).sum::<f32>().ln();
                for x in lane.iter_mut() {
                    *x = *x - max - log_sum;
                }
            }
            SoftmaxOp::Hardmax => {
                let first_max = lane.iter().position(|&x| x == max);
                for (i, x) in lane.iter_mut().enumerate() {
                    *x = if Some(i) == first_max { 1. } else { 0. };
                }
            }
        }

        for (i, &value) in lane.iter().enumerate() {
            index[axis] = i;
            if let Some(y) = out.get_mut(&index) {
                *y = value;
            }
        }
    });
}

/// Normalize channels of an NCHW-style input using precomputed statistics.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BatchNormalization {
    pub epsilon: f32,
}

impl InferShapes for BatchNormalization {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        for i in 1..5 {
            inputs.require(i)?.shape().clone().with_rank(1)?;
        }
        Ok(vec![require_float_input(x, 2)?])
    }
}

impl Operator for BatchNormalization {
    fn name(&self) -> &str {
        "BatchNormalization"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (5, Some(5))
    }

    fn dispatch(
        &self,
        backend: &dyn Backend,
        inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError> {
        let x = inputs.require(0)?;
        let scale = inputs.require(1)?;
        let bias = inputs.require(2)?;
        let mean = inputs.require(3)?;
        let var = inputs.require(4)?;
        backend.batch_norm(self, x, scale, bias, mean, var, single_output(outputs)?)
    }
}

/// Per-channel parameters of a normalization, as slices of length `C`.
pub struct ChannelParams<'a> {
    pub scale: &'a [f32],
    pub bias: &'a [f32],
}

fn check_channel_params(params: &[&[f32]], channels: usize) -> Result<(), OpError> {
    if params.iter().any(|p| p.len() != channels) {
        return Err(OpError::IncompatibleInputShapes(
            "channel parameters must have one entry per channel",
        ));
    }
    Ok(())
}

pub fn batch_norm(
    x: &Tensor<f32>,
    params: ChannelParams,
    mean: &[f32],
    var: &[f32],
    epsilon: f32,
    out: &mut Tensor<f32>,
) -> Result<(), OpError> {
    let channels = x.size(1);
    check_channel_params(&[params.scale, params.bias, mean, var], channels)?;

    for (index, (y, &value)) in x.indices().zip(out.iter_mut().zip(x.iter())) {
        let c = index[1];
        *y = (value - mean[c]) / (var[c] + epsilon).sqrt() * params.scale[c] + params.bias[c];
    }
    Ok(())
}

/// Normalize each channel of each item in a batch using its own mean and
/// variance.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstanceNormalization {
    pub epsilon: f32,
}

impl InferShapes for InstanceNormalization {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        inputs.require(1)?.shape().clone().with_rank(1)?;
        inputs.require(2)?.shape().clone().with_rank(1)?;
        Ok(vec![require_float_input(x, 3)?])
    }
}

impl Operator for InstanceNormalization {
    fn name(&self) -> &str {
        "InstanceNormalization"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (3, Some(3))
    }

    fn dispatch(
        &self,
        backend: &dyn Backend,
        inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError> {
        let x = inputs.require(0)?;
        let scale = inputs.require(1)?;
        let bias = inputs.require(2)?;
        backend.instance_norm(self, x, scale, bias, single_output(outputs)?)
    }
}

/// Normalize `data` in place to zero mean and unit variance, then apply a
/// scale and bias.
fn normalize_slice(data: &mut [f32], epsilon: f32, scale: impl Fn(usize) -> (f32, f32)) {
    let len = data.len() as f32;
    let mean = data.iter().sum::<f32>() / len;
    let var = data.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / len;
    let inv_std = 1. / (var + epsilon).sqrt();
    for (i, x) in data.iter_mut().enumerate() {
        let (scale, bias) = scale(i);
        *x = (*x - mean) * inv_std * scale + bias;
    }
}

pub fn instance_norm(
    x: &Tensor<f32>,
    params: ChannelParams,
    epsilon: f32,
    out: &mut Tensor<f32>,
) -> Result<(), OpError> {
    let channels = x.size(1);
    check_channel_params(&[params.scale, params.bias], channels)?;

    let spatial_len: usize = x.shape()[2..].iter().product();
    out.data_mut().copy_from_slice(x.data());
    if spatial_len == 0 {
        return Ok(());
    }
    for (i, chunk) in out.data_mut().chunks_mut(spatial_len).enumerate() {
        let c = i % channels;
        normalize_slice(chunk, epsilon, |_| (params.scale[c], params.bias[c]));
    }
    Ok(())
}

/// Normalize over the trailing dimensions of the input, starting at `axis`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LayerNormalization {
    pub axis: i64,
    pub epsilon: f32,
}

impl InferShapes for LayerNormalization {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        inputs.require(1)?;
        let output = require_float_input(x, 1)?;
        if let Some(rank) = x.rank() {
            resolve_axis(rank, self.axis)?;
        }
        Ok(vec![output])
    }
}

impl Operator for LayerNormalization {
    fn name(&self) -> &str {
        "LayerNormalization"
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
        let x = inputs.require(0)?;
        let scale = inputs.require(1)?;
        let axis = resolve_axis(x.ndim(), self.axis)?;
        backend.layer_norm(self, x, scale, inputs.get(2), axis, single_output(outputs)?)
    }
}

/// Layer normalization. `scale` and `bias` are broadcast to the normalized
/// shape `x.shape()[axis..]`.
pub fn layer_norm(
    x: &Tensor<f32>,
    scale: &Tensor<f32>,
    bias: Option<&Tensor<f32>>,
    axis: usize,
    epsilon: f32,
    out: &mut Tensor<f32>,
) -> Result<(), OpError> {
    let norm_shape = &x.shape()[axis..];
    let broadcastable = |t: &Tensor<f32>| infergraph_tensor::layout::can_broadcast_to(t.shape(), norm_shape);
    if !broadcastable(scale) || bias.is_some_and(|b| !broadcastable(b)) {
        return Err(OpError::IncompatibleInputShapes(
            "scale and bias must be broadcastable to the normalized shape",
        ));
    }
    let scale = scale.broadcast_to(norm_shape);
    let bias = bias.map(|b| b.broadcast_to(norm_shape));

    let norm_len = scale.len();
    out.data_mut().copy_from_slice(x.data());
    if norm_len == 0 {
        return Ok(());
    }
    for chunk in out.data_mut().chunks_mut(norm_len) {
        normalize_slice(chunk, epsilon, |i| {
            (scale.data()[i], bias.as_ref().map(|b| b.data()[i]).unwrap_or(0.))
        });
    }
    Ok(())
}

/// Local response normalization across channels.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Lrn {
    pub alpha: f32,
    pub beta: f32,
    pub bias: f32,
    pub size: usize,
}

impl InferShapes for Lrn {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        if self.size == 0 {
            return Err(InferShapesError::InvalidValue("size must be positive"));
        }
        Ok(vec![require_float_input(x, 2)?])
    }
}

impl Operator for Lrn {
    fn name(&self) -> &str {
        "LRN"
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
        let x = inputs.require(0)?;
        backend.lrn(self, x, single_output(outputs)?)
    }
}

pub fn lrn(op: &Lrn, x: &Tensor<f32>, out: &mut Tensor<f32>) {
    let channels = x.size(1);
    let before = (op.size - 1) / 2;
    let after = (op.size - 1).div_ceil(2);

    for (index, y) in x.indices().zip(out.iter_mut()) {
        let c = index[1];
        let start = c.saturating_sub(before);
        let end = (c + after + 1).min(channels);
        let mut neighbor = index.clone();
        let square_sum: f32 = (start..end)
            .filter_map(|i| {
                neighbor[1] = i;
                x.get(&neighbor).map(|x| x * x)
            })
            .sum();
        let value = x.get(&index).copied().unwrap_or(0.);
        *y = value / (op.bias + op.alpha / op.size as f32 * square_sum).powf(op.beta);
    }
}

#[cfg(test)]
mod tests {
    use infergraph_tensor::test_util::expect_equal;
    use infergraph_tensor::Tensor;

    use super::{
        BatchNormalization, InstanceNormalization, LayerNormalization, Lrn, Softmax, SoftmaxOp,
    };
    use crate::ops::tests::run_op;
    use crate::value::Value;

    fn run_float(op: &dyn crate::operator::Operator, inputs: &[&Value]) -> Tensor<f32> {
        let inputs: Vec<_> = inputs.iter().map(|x| Some(*x)).collect();
        let result = run_op(op, &inputs).unwrap();
        result[0].clone().try_into().unwrap()
    }

    #[test]
    fn test_softmax() {
        let x: Value = Tensor::from_data(&[2, 2], vec![1., 2., 3., 3.]).into();

        let softmax = Softmax {
            op: SoftmaxOp::Softmax,
            axis: -1,
        };
        let result = run_float(&softmax, &[&x]);
        expect_equal(
            &result,
            &Tensor::from_data(&[2, 2], vec![0.26894142, 0.7310586, 0.5, 0.5]),
        )
        .unwrap();

        let log_softmax = Softmax {
            op: SoftmaxOp::LogSoftmax,
            axis: 0,
        };
        let result = run_float(&log_softmax, &[&x]);
        expect_equal(
            &result,
            &Tensor::from_data(&[2, 2], vec![-2.126928, -1.3132616, -0.126928, -0.3132617]),
        )
        .unwrap();

        let hardmax = Softmax {
            op: SoftmaxOp::Hardmax,
            axis: 1,
        };
        let result = run_float(&hardmax, &[&x]);
        assert_eq!(result, Tensor::from_data(&[2, 2], vec![0., 1., 1., 0.]));
    }

    #[test]
    fn test_batch_norm() {
        let x: Value = Tensor::from_data(&[1, 2, 2], vec![1., 2., 3., 4.]).into();
        let scale: Value = Tensor::from_vec(vec![1., 2.]).into();
        let bias: Value = Tensor::from_vec(vec![0., 1.]).into();
        let mean: Value = Tensor::from_vec(vec![1., 3.]).into();
        let var: Value = Tensor::from_vec(vec![1., 4.]).into();

        let op = BatchNormalization { epsilon: 0. };
        let result = run_float(&op, &[&x, &scale, &bias, &mean, &var]);
        assert_eq!(result, Tensor::from_data(&[1, 2, 2], vec![0., 1., 1., 2.]));
    }

    #[test]
    fn test_instance_norm() {
        let x: Value = Tensor::from_data(&[1, 2, 2], vec![1., 3., 4., 6.]).into();
        let scale: Value = Tensor::from_vec(vec![1., 1.]).into();
        let bias: Value = Tensor::from_vec(vec![0., 0.5]).into();

        let op = InstanceNormalization { epsilon: 0. };
        let result = run_float(&op, &[&x, &scale, &bias]);
        assert_eq!(result, Tensor::from_data(&[1, 2, 2], vec![-1., 1., -0.5, 1.5]));
    }

    #[test]
    fn test_layer_norm() {
        let x: Value = Tensor::from_data(&[2, 2], vec![1., 3., 2., 6.]).into();
        let scale: Value = Tensor::from_vec(vec![2., 1.]).into();

        let op = LayerNormalization {
            axis: -1,
            epsilon: 0.,
        };
        let result = run_float(&op, &[&x, &scale]);
        assert_eq!(result, Tensor::from_data(&[2, 2], vec![-2., 1., -2., 1.]));
    }

    #[test]
    fn test_lrn() {
        let x: Value = Tensor::from_data(&[1, 2, 1], vec![1., 2.]).into();
        let op = Lrn {
            alpha: 1.,
            beta: 1.,
            bias: 1.,
            size: 2,
        };
        let result = run_float(&op, &[&x]);
        // Channel 0 sees channels 0 and 1, channel 1 sees only itself.
        expect_equal(
            &result,
            &Tensor::from_data(&[1, 2, 1], vec![1. / 3.5, 2. / 3.]),
        )
        .unwrap();
    }
}
