use infergraph_shape_inference::{
    InferInputs, InferShapes, InferShapesError, PartialTensor, SymbolicDim, SymbolicShape,
};
use infergraph_tensor::{DataType, Indices, Tensor};
use smallvec::SmallVec;

use crate::backend::{Backend, Dispatch};
use crate::operator::{single_output, InputList, OpError, Operator};
use crate::ops::conv::{output_size, resolve_pads, spatial_attr, Padding};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PoolOp {
    Max,
    Average,
}

/// Resolved pooling geometry, in terms of concrete input sizes.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolParams {
    pub kernel: Vec<usize>,
    pub strides: Vec<usize>,
    /// Padding as `[starts..., ends...]`.
    pub pads: Vec<usize>,
    /// Whether padding elements count towards the divisor of an average.
    pub count_include_pad: bool,
}

fn pool_input_dims(x: &PartialTensor) -> Result<Option<&[SymbolicDim]>, InferShapesError> {
    if x.dtype() != DataType::Float {
        return Err(InferShapesError::IncorrectType(
            "pooling input must be a float tensor",
        ));
    }
    x.shape().require_min_rank(3)?;
    Ok(x.shape().dims())
}

/// Max or average pooling over windows of the spatial dimensions.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pool {
    pub op: PoolOp,
    pub kernel_shape: Vec<usize>,
    pub strides: Vec<usize>,
    pub padding: Padding,
    pub ceil_mode: bool,
    pub count_include_pad: bool,
}

impl Pool {
    pub fn new(op: PoolOp, kernel_shape: Vec<usize>) -> Pool {
        Pool {
            op,
            kernel_shape,
            strides: Vec::new(),
            padding: Padding::default(),
            ceil_mode: false,
            count_include_pad: false,
        }
    }
}

impl InferShapes for Pool {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let Some(dims) = pool_input_dims(x)? else {
            return Ok(vec![PartialTensor::unknown(DataType::Float)]);
        };

        let spatial_dims = dims.len() - 2;
        if self.kernel_shape.len() != spatial_dims || self.kernel_shape.contains(&0) {
            return Err(InferShapesError::InvalidValue(
                "kernel shape must have one positive entry per spatial dimension",
            ));
        }
        let strides = spatial_attr(&self.strides, spatial_dims, "invalid strides")?;

        let mut out_dims = dims[..2].to_vec();
        for dim in 0..spatial_dims {
            out_dims.push(output_size(
                &dims[2 + dim],
                &SymbolicDim::from(self.kernel_shape[dim]),
                strides[dim],
                1,
                self.padding.dim(dim, spatial_dims)?,
                self.ceil_mode,
            )?);
        }
        Ok(vec![PartialTensor::new(
            DataType::Float,
            SymbolicShape::from_dims(out_dims),
        )])
    }
}

impl Operator for Pool {
    fn name(&self) -> &str {
        match self.op {
            PoolOp::Max => "MaxPool",
            PoolOp::Average => "AveragePool",
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
        let out = single_output(outputs)?;
        let spatial_dims = x.ndim() - 2;
        let strides = spatial_attr(&self.strides, spatial_dims, "invalid strides")?;
        let dilations = vec![1; spatial_dims];
        let pads = resolve_pads(
            &self.padding,
            &x.shape()[2..],
            &out.shape()[2..],
            &self.kernel_shape,
            &strides,
            &dilations,
        )?;
        let params = PoolParams {
            kernel: self.kernel_shape.clone(),
            strides: strides.to_vec(),
            pads,
            count_include_pad: self.count_include_pad,
        };
        backend.pool(self.op, &params, x, out)
    }
}

/// Pooling over the whole of each spatial plane.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GlobalPool {
    pub op: PoolOp,
}

impl InferShapes for GlobalPool {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let Some(dims) = pool_input_dims(x)? else {
            return Ok(vec![PartialTensor::unknown(DataType::Float)]);
        };
        let out_dims = dims[..2]
            .iter()
            .cloned()
            .chain(std::iter::repeat_n(SymbolicDim::Value(1), dims.len() - 2));
        Ok(vec![PartialTensor::new(
            DataType::Float,
            SymbolicShape::from_dims(out_dims),
        )])
    }
}

impl Operator for GlobalPool {
    fn name(&self) -> &str {
        match self.op {
            PoolOp::Max => "GlobalMaxPool",
            PoolOp::Average => "GlobalAveragePool",
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
        let spatial_dims = x.ndim() - 2;
        let params = PoolParams {
            kernel: x.shape()[2..].to_vec(),
            strides: vec![1; spatial_dims],
            pads: vec![0; spatial_dims * 2],
            count_include_pad: false,
        };
        backend.pool(self.op, &params, x, single_output(outputs)?)
    }
}

/// Reference pooling kernel.
///
/// Windows which contain no input elements produce `-inf` for max pooling
/// and zero for average pooling.
pub fn pool(op: PoolOp, params: &PoolParams, x: &Tensor<f32>, out: &mut Tensor<f32>) {
    let spatial_dims = x.ndim() - 2;
    let out_shape = out.shape().to_vec();
    let mut x_index: SmallVec<[usize; 5]> = SmallVec::from_elem(0, x.ndim());

    for (out_index, y) in Indices::from_shape(&out_shape).zip(out.iter_mut()) {
        x_index[0] = out_index[0];
        x_index[1] = out_index[1];

        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.;
        let mut count = 0;
        let mut padded_count = 0;

        'window: for k in Indices::from_shape(&params.kernel) {
            let mut in_padding = false;
            for d in 0..spatial_dims {
                let pos = (out_index[2 + d] * params.strides[d] + k[d]) as isize
                    - params.pads[d] as isize;
                let in_size = x.size(2 + d) as isize;
                let pad_end = params.pads[spatial_dims + d] as isize;
                if pos < -(params.pads[d] as isize) || pos >= in_size + pad_end {
                    // Past the padded input. Only possible in ceil mode.
                    continue 'window;
                }
                if pos < 0 || pos >= in_size {
                    in_padding = true;
                } else {
                    x_index[2 + d] = pos as usize;
                }
            }
            padded_count += 1;
            if in_padding {
                continue;
            }
            if let Some(&value) = x.get(&x_index) {
                max = max.max(value);
                sum += value;
                count += 1;
            }
        }

        *y = match op {
            PoolOp::Max => max,
            PoolOp::Average => {
                let divisor = if params.count_include_pad {
                    padded_count
                } else {
                    count
                };
                if divisor > 0 {
                    sum / divisor as f32
                } else {
                    0.
                }
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use infergraph_shape_inference::{sym_shape, InferInputs, InferShapes, PartialTensor};
    use infergraph_tensor::{DataType, Tensor};

    use super::{GlobalPool, Pool, PoolOp};
    use crate::ops::conv::Padding;
    use crate::ops::tests::run_op;
    use crate::value::Value;

    fn input() -> Value {
        Tensor::from_data(&[1, 1, 3, 3], (1..=9).map(|x| x as f32).collect()).into()
    }

    #[test]
    fn test_max_pool() {
        let x = input();
        let op = Pool::new(PoolOp::Max, vec![2, 2]);
        let result = run_op(&op, &[Some(&x)]).unwrap();
        assert_eq!(
            result[0],
            Value::from(Tensor::from_data(&[1, 1, 2, 2], vec![5., 6., 8., 9.]))
        );
    }

    #[test]
    fn test_average_pool_padding() {
        let x: Value = Tensor::from_data(&[1, 1, 2], vec![2., 4.]).into();

        let mut op = Pool::new(PoolOp::Average, vec![2]);
        op.padding = Padding::Fixed(vec![1, 0]);
        let result = run_op(&op, &[Some(&x)]).unwrap();
        assert_eq!(
            result[0],
            Value::from(Tensor::from_data(&[1, 1, 2], vec![2., 3.]))
        );

        op.count_include_pad = true;
        let result = run_op(&op, &[Some(&x)]).unwrap();
        assert_eq!(
            result[0],
            Value::from(Tensor::from_data(&[1, 1, 2], vec![1., 3.]))
        );
    }

    #[test]
    fn test_pool_ceil_mode() {
        let x = input();
        let mut op = Pool::new(PoolOp::Max, vec![2, 2]);
        op.strides = vec![2, 2];
        let result = run_op(&op, &[Some(&x)]).unwrap();
        assert_eq!(result[0].shape(), &[1, 1, 1, 1]);

        op.ceil_mode = true;
        let result = run_op(&op, &[Some(&x)]).unwrap();
        assert_eq!(
            result[0],
            Value::from(Tensor::from_data(&[1, 1, 2, 2], vec![5., 6., 8., 9.]))
        );
    }

    #[test]
    fn test_global_pool() {
        let x = input();
        let result = run_op(&GlobalPool { op: PoolOp::Average }, &[Some(&x)]).unwrap();
        assert_eq!(
            result[0],
            Value::from(Tensor::from_data(&[1, 1, 1, 1], vec![5.]))
        );

        let partial = PartialTensor::new(DataType::Float, sym_shape!("batch", 16, "h", "w"));
        let inputs = [Some(partial)];
        let result = GlobalPool { op: PoolOp::Max }
            .infer_shapes(InferInputs::new(&inputs))
            .unwrap();
        assert_eq!(result[0].shape(), &sym_shape!("batch", 16, 1, 1));
    }
}
