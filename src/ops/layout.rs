//! Operators which change the shape or layout of a tensor without changing
//! its elements, plus operators which inspect shapes.

use infergraph_shape_inference::shape_ops::reshape_shape;
use infergraph_shape_inference::{
    broadcast_shapes, resolve_axes, InferInputs, InferShapes, InferShapesError,
    PartialTensor, PartialTensorElement, SymbolicDim, SymbolicShape,
};
use infergraph_tensor::layout::is_valid_permutation;
use infergraph_tensor::{DataType, Tensor};

use crate::backend::{Backend, Dispatch};
use crate::operator::{single_output, InputList, OpError, Operator};
use crate::ops::binary_elementwise::fold_broadcast;
use crate::value::Value;

/// Check that an input which describes a shape or list of axes is an int
/// vector.
fn require_int_vector(input: &PartialTensor) -> Result<(), InferShapesError> {
    if input.dtype() != DataType::Int {
        return Err(InferShapesError::IncorrectType("expected an int tensor"));
    }
    input.shape().clone().with_rank(1)?;
    Ok(())
}

/// Implement [`Operator`] for an operator which copies its first input into
/// a differently shaped output.
macro_rules! impl_copy_operator {
    ($op:ty, $name:literal, $arity:expr, $value_inputs:expr) => {
        impl Operator for $op {
            fn name(&self) -> &str {
                $name
            }

            fn input_arity(&self) -> (usize, Option<usize>) {
                $arity
            }

            fn value_inputs(&self) -> &'static [usize] {
                $value_inputs
            }

            fn dispatch(
                &self,
                backend: &dyn Backend,
                inputs: &InputList,
                outputs: &mut [Value],
            ) -> Result<Dispatch, OpError> {
                let x = inputs.require(0)?;
                backend.copy(x, single_output(outputs)?)
            }
        }
    };
}

/// Change the shape of a tensor, keeping its elements in row-major order.
///
/// The target shape may contain one `-1` entry, whose size is inferred. A
/// `0` entry copies the input dim unless `allow_zero` is set.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reshape {
    pub allow_zero: bool,
}

impl InferShapes for Reshape {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let shape = inputs.require(1)?;
        require_int_vector(shape)?;

        let target = shape.to_symbolic_shape();
        let out_shape = reshape_shape(x.shape(), &target, self.allow_zero)?;
        Ok(vec![x.reshaped(out_shape)])
    }
}

impl_copy_operator!(Reshape, "Reshape", (2, Some(2)), &[1]);

/// Flatten a tensor into a matrix, where the first dim is the product of
/// the input dims before `axis`.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Flatten {
    pub axis: i64,
}

impl InferShapes for Flatten {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let Some(dims) = x.shape().dims() else {
            return Ok(vec![PartialTensor::new(x.dtype(), SymbolicShape::of_rank(2))]);
        };
        let rank = dims.len() as i64;
        let axis = if self.axis < 0 { self.axis + rank } else { self.axis };
        if !(0..=rank).contains(&axis) {
            return Err(InferShapesError::IncorrectRank("axis is out of range"));
        }
        let axis = axis as usize;
        let product = |dims: &[SymbolicDim]| {
            dims.iter()
                .cloned()
                .fold(SymbolicDim::Value(1), |acc, dim| acc * dim)
        };
        let out_shape = SymbolicShape::from_dims([product(&dims[..axis]), product(&dims[axis..])]);
        Ok(vec![x.reshaped(out_shape)])
    }
}

impl_copy_operator!(Flatten, "Flatten", (1, Some(1)), &[]);

/// Remove dims of size 1.
///
/// The optional second input lists the axes to remove. If absent, all size-1
/// dims are removed.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Squeeze {}

impl InferShapes for Squeeze {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let Some(dims) = x.shape().dims() else {
            return Ok(vec![PartialTensor::unknown(x.dtype())]);
        };

        let out_shape = match inputs.get(1) {
            None => {
                if dims.iter().all(|d| d.is_value()) {
                    SymbolicShape::from_dims(dims.iter().filter(|d| !d.is(1)).cloned())
                } else {
                    // A symbolic dim might be 1 at runtime.
                    SymbolicShape::unknown()
                }
            }
            Some(axes) => {
                require_int_vector(axes)?;
                match axes.to_ints() {
                    Some(axes) => {
                        let axes = resolve_axes(dims.len(), axes)?;
                        for &axis in &axes {
                            if dims[axis].value().is_some_and(|size| size != 1) {
                                return Err(InferShapesError::IncompatibleShapes(
                                    "squeezed dims must have size 1",
                                ));
                            }
                        }
                        SymbolicShape::from_dims(
                            dims.iter()
                                .enumerate()
                                .filter(|(i, _)| !axes.contains(i))
                                .map(|(_, dim)| dim.clone()),
                        )
                    }
                    None => match axes.shape().dim(0).value() {
                        Some(len) if len as usize <= dims.len() => {
                            SymbolicShape::of_rank(dims.len() - len as usize)
                        }
                        _ => SymbolicShape::unknown(),
                    },
                }
            }
        };
        Ok(vec![x.reshaped(out_shape)])
    }
}

impl_copy_operator!(Squeeze, "Squeeze", (1, Some(2)), &[1]);

/// Insert dims of size 1 at the positions given by the second input.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Unsqueeze {}

impl InferShapes for Unsqueeze {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let axes = inputs.require(1)?;
        require_int_vector(axes)?;

        let out_shape = match (x.shape().dims(), axes.to_ints()) {
            (Some(dims), Some(axes)) => {
                let out_rank = dims.len() + axes.len();
                let axes = resolve_axes(out_rank, axes)?;
                let mut in_dims = dims.iter();
                SymbolicShape::from_dims((0..out_rank).map(|i| {
                    if axes.contains(&i) {
                        SymbolicDim::Value(1)
                    } else {
                        in_dims.next().cloned().unwrap_or(SymbolicDim::Unknown)
                    }
                }))
            }
            (Some(dims), None) => match axes.shape().dim(0).value() {
                Some(len) => SymbolicShape::of_rank(dims.len() + len as usize),
                None => SymbolicShape::unknown(),
            },
            (None, _) => SymbolicShape::unknown(),
        };
        Ok(vec![x.reshaped(out_shape)])
    }
}

impl_copy_operator!(Unsqueeze, "Unsqueeze", (2, Some(2)), &[1]);

/// Return the input unchanged.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Identity {}

impl InferShapes for Identity {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        Ok(vec![inputs.require(0)?.clone()])
    }
}

impl_copy_operator!(Identity, "Identity", (1, Some(1)), &[]);

/// Permute the dims of a tensor. If no permutation is given, the dims are
/// reversed.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Transpose {
    pub perm: Option<Vec<usize>>,
}

impl Transpose {
    fn resolve_perm(&self, ndim: usize) -> Result<Vec<usize>, InferShapesError> {
        match &self.perm {
            Some(perm) if is_valid_permutation(ndim, perm) => Ok(perm.clone()),
            Some(_) => Err(InferShapesError::InvalidValue(
                "permutation is not valid for input rank",
            )),
            None => Ok((0..ndim).rev().collect()),
        }
    }
}

impl InferShapes for Transpose {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let Some(dims) = x.shape().dims() else {
            let shape = match &self.perm {
                Some(perm) => SymbolicShape::of_rank(perm.len()),
                None => SymbolicShape::unknown(),
            };
            return Ok(vec![PartialTensor::new(x.dtype(), shape)]);
        };
        let perm = self.resolve_perm(dims.len())?;
        let out_shape = SymbolicShape::from_dims(perm.iter().map(|&d| dims[d].clone()));

        // Values are only tracked for tensors with at most one dim, whose
        // elements are unchanged by a transpose.
        Ok(vec![x.reshaped(out_shape)])
    }
}

impl Operator for Transpose {
    fn name(&self) -> &str {
        "Transpose"
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
        let perm = self.resolve_perm(x.ndim())?;
        backend.transpose(x, &perm, single_output(outputs)?)
    }
}

/// Broadcast a tensor to a shape given by the second input.
///
/// The output shape is the broadcast of the input shape and the target
/// shape, so target dims of size 1 keep the input's size.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Expand {}

impl InferShapes for Expand {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let shape = inputs.require(1)?;
        require_int_vector(shape)?;

        let target = shape.to_symbolic_shape();
        let out_shape = broadcast_shapes(&[x.shape(), &target])?;
        let mut output = PartialTensor::new(x.dtype(), out_shape);
        fold_broadcast(&mut output, &[x], |elems| elems[0].clone());
        Ok(vec![output])
    }
}

impl Operator for Expand {
    fn name(&self) -> &str {
        "Expand"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (2, Some(2))
    }

    fn value_inputs(&self) -> &'static [usize] {
        &[1]
    }

    fn dispatch(
        &self,
        backend: &dyn Backend,
        inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError> {
        let x = inputs.require(0)?;
        backend.expand(x, single_output(outputs)?)
    }
}

/// Return the shape of a tensor as an int vector, optionally restricted to
/// dims `start..end`.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Shape {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl Shape {
    /// Resolve the range of dims to return for an input of a given rank.
    ///
    /// Negative values count back from the end, and both ends are clamped
    /// to `[0, rank]`.
    fn dim_range(&self, rank: usize) -> (usize, usize) {
        let clamp = |index: i64| {
            let index = if index < 0 { index + rank as i64 } else { index };
            index.clamp(0, rank as i64) as usize
        };
        let start = clamp(self.start.unwrap_or(0));
        let end = clamp(self.end.unwrap_or(rank as i64));
        (start, end.max(start))
    }
}

impl InferShapes for Shape {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let Some(dims) = x.shape().dims() else {
            return Ok(vec![PartialTensor::new(
                DataType::Int,
                SymbolicShape::from_dims([SymbolicDim::Unknown]),
            )]);
        };
        let (start, end) = self.dim_range(dims.len());
        let shape = SymbolicShape::from_dims(dims[start..end].iter().cloned());
        Ok(vec![PartialTensor::from_shape(&shape)])
    }
}

impl Operator for Shape {
    fn name(&self) -> &str {
        "Shape"
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
        let (start, end) = self.dim_range(x.ndim());
        backend.shape(x, start, end, single_output(outputs)?)
    }
}

/// Return the number of elements in a tensor as an int scalar.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Size {}

impl InferShapes for Size {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let len = if x.shape().has_rank() {
            PartialTensorElement::from_dim(&x.shape().num_elements())
        } else {
            PartialTensorElement::Unknown
        };
        Ok(vec![PartialTensor::scalar(DataType::Int, len)])
    }
}

impl Operator for Size {
    fn name(&self) -> &str {
        "Size"
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
        backend.size(x, single_output(outputs)?)
    }
}

/// Order in which `DepthToSpace` reads channels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DepthToSpaceMode {
    /// Depth, column, row.
    #[default]
    DCR,
    /// Column, row, depth.
    CRD,
}

/// Rearrange blocks of channels into spatial blocks.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DepthToSpace {
    pub block_size: usize,
    pub mode: DepthToSpaceMode,
}

/// Check the input of a depth/space rearrangement, returning its dims.
fn block_input_dims(
    x: &PartialTensor,
    block_size: usize,
) -> Result<[SymbolicDim; 4], InferShapesError> {
    if block_size == 0 {
        return Err(InferShapesError::InvalidValue("block size must be positive"));
    }
    let shape = x.shape().clone().with_rank(4)?;
    Ok([shape.dim(0), shape.dim(1), shape.dim(2), shape.dim(3)])
}

fn check_divisible(dim: &SymbolicDim, divisor: usize) -> Result<(), InferShapesError> {
    if dim.value().is_some_and(|size| size % divisor as i64 != 0) {
        return Err(InferShapesError::IncompatibleShapes(
            "dim is not divisible by block size",
        ));
    }
    Ok(())
}

impl InferShapes for DepthToSpace {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let [n, c, h, w] = block_input_dims(x, self.block_size)?;
        let block = self.block_size as i64;
        check_divisible(&c, self.block_size * self.block_size)?;
        let shape = SymbolicShape::from_dims([n, c / (block * block), h * block, w * block]);
        Ok(vec![PartialTensor::new(x.dtype(), shape)])
    }
}

impl Operator for DepthToSpace {
    fn name(&self) -> &str {
        "DepthToSpace"
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
        backend.depth_to_space(self, x, single_output(outputs)?)
    }
}

/// Rearrange spatial blocks into channels. This is the inverse of
/// [`DepthToSpace`] in DCR mode.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpaceToDepth {
    pub block_size: usize,
}

impl InferShapes for SpaceToDepth {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let [n, c, h, w] = block_input_dims(x, self.block_size)?;
        let block = self.block_size as i64;
        check_divisible(&h, self.block_size)?;
        check_divisible(&w, self.block_size)?;
        let shape = SymbolicShape::from_dims([n, c * (block * block), h / block, w / block]);
        Ok(vec![PartialTensor::new(x.dtype(), shape)])
    }
}

impl Operator for SpaceToDepth {
    fn name(&self) -> &str {
        "SpaceToDepth"
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
        backend.space_to_depth(self.block_size, x, single_output(outputs)?)
    }
}

/// Return the channel of the input to `DepthToSpace` which is moved to
/// offset `(i, j)` of the spatial block for output channel `c`.
fn depth_to_space_channel(
    mode: DepthToSpaceMode,
    c: usize,
    [i, j]: [usize; 2],
    block_size: usize,
    out_channels: usize,
) -> usize {
    match mode {
        DepthToSpaceMode::DCR => (i * block_size + j) * out_channels + c,
        DepthToSpaceMode::CRD => c * block_size * block_size + i * block_size + j,
    }
}

pub fn depth_to_space<T: Copy>(op: &DepthToSpace, x: &Tensor<T>, out: &mut Tensor<T>) {
    let block = op.block_size;
    let out_channels = out.size(1);
    let out_shape = out.shape().to_vec();
    for (index, y) in infergraph_tensor::Indices::from_shape(&out_shape).zip(out.iter_mut()) {
        let [n, c, h, w] = [index[0], index[1], index[2], index[3]];
        let in_chan =
            depth_to_space_channel(op.mode, c, [h % block, w % block], block, out_channels);
        if let Some(&value) = x.get(&[n, in_chan, h / block, w / block]) {
            *y = value;
        }
    }
}

pub fn space_to_depth<T: Copy>(block_size: usize, x: &Tensor<T>, out: &mut Tensor<T>) {
    let in_channels = x.size(1);
    for (index, &value) in x.indices().zip(x.iter()) {
        let [n, c, h, w] = [index[0], index[1], index[2], index[3]];
        let out_chan = depth_to_space_channel(
            DepthToSpaceMode::DCR,
            c,
            [h % block_size, w % block_size],
            block_size,
            in_channels,
        );
        if let Some(y) = out.get_mut(&[n, out_chan, h / block_size, w / block_size]) {
            *y = value;
        }
    }
}
