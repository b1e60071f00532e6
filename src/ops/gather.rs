//! Indexing operators: gathers, scatters and operators whose output shape
//! depends on the values of their inputs.

use std::ops::{Add, Mul};

use infergraph_shape_inference::{
    resolve_axis, InferInputs, InferShapes, InferShapesError, PartialTensor,
    PartialTensorElement, SymbolicDim, SymbolicShape,
};
use infergraph_tensor::{DataType, Indices, Shape, Tensor};
use smallvec::SmallVec;

use crate::backend::{Backend, Dispatch};
use crate::operator::{single_output, InputList, OpError, OutputMeta, Operator};
use crate::value::Value;

fn require_int_indices(indices: &PartialTensor) -> Result<(), InferShapesError> {
    if indices.dtype() != DataType::Int {
        return Err(InferShapesError::IncorrectType("indices must be an int tensor"));
    }
    Ok(())
}

/// Resolve a possibly negative index into a dim of size `size`.
fn resolve_index(index: i64, size: usize) -> Result<usize, OpError> {
    let resolved = if index < 0 { index + size as i64 } else { index };
    if resolved < 0 || resolved >= size as i64 {
        return Err(OpError::InvalidValue("index is out of bounds"));
    }
    Ok(resolved as usize)
}

/// Select slices of the input along an axis.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Gather {
    pub axis: i64,
}

impl InferShapes for Gather {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let indices = inputs.require(1)?;
        require_int_indices(indices)?;

        let (Some(dims), Some(index_dims)) = (x.shape().dims(), indices.shape().dims()) else {
            return Ok(vec![PartialTensor::unknown(x.dtype())]);
        };
        let axis = resolve_axis(dims.len(), self.axis)?;
        let out_dims = dims[..axis]
            .iter()
            .chain(index_dims)
            .chain(&dims[axis + 1..])
            .cloned();
        let mut output = PartialTensor::new(x.dtype(), SymbolicShape::from_dims(out_dims));

        // Fold gathers from vectors, such as selecting dims from a shape.
        if let (1, Some(elements), Some(index_elems)) =
            (dims.len(), x.elements(), indices.elements())
        {
            for (i, index) in index_elems.iter().enumerate() {
                let Some(index) = index.as_int() else {
                    continue;
                };
                let index = resolve_index(index, elements.len())
                    .map_err(|_| InferShapesError::InvalidValue("index is out of bounds"))?;
                output.set(i, elements[index].clone());
            }
        }
        Ok(vec![output])
    }
}

impl Operator for Gather {
    fn name(&self) -> &str {
        "Gather"
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
        let x = inputs.require(0)?;
        let indices = inputs.require(1)?;
        let axis = resolve_axis(x.ndim(), self.axis)?;
        backend.gather(x, indices, axis, single_output(outputs)?)
    }
}

pub fn gather<T: Copy>(
    x: &Tensor<T>,
    indices: &Tensor<i64>,
    axis: usize,
    out: &mut Tensor<T>,
) -> Result<(), OpError> {
    let outer: usize = x.shape()[..axis].iter().product();
    let inner: usize = x.shape()[axis + 1..].iter().product();
    let axis_size = x.size(axis);
    let out_data = out.data_mut();

    let mut offset = 0;
    for i in 0..outer {
        for &index in indices.iter() {
            let index = resolve_index(index, axis_size)?;
            let start = (i * axis_size + index) * inner;
            out_data[offset..offset + inner].copy_from_slice(&x.data()[start..start + inner]);
            offset += inner;
        }
    }
    Ok(())
}

/// Gather elements using an index tensor with the same rank as the input.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GatherElements {
    pub axis: i64,
}

impl InferShapes for GatherElements {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let indices = inputs.require(1)?;
        require_int_indices(indices)?;
        if let (Some(rank), Some(index_rank)) = (x.rank(), indices.rank()) {
            if rank != index_rank {
                return Err(InferShapesError::IncorrectRank(
                    "indices must have the same rank as the input",
                ));
            }
            resolve_axis(rank, self.axis)?;
        }
        Ok(vec![PartialTensor::new(x.dtype(), indices.shape().clone())])
    }
}

impl Operator for GatherElements {
    fn name(&self) -> &str {
        "GatherElements"
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
        let x = inputs.require(0)?;
        let indices = inputs.require(1)?;
        let axis = resolve_axis(x.ndim(), self.axis)?;
        backend.gather_elements(x, indices, axis, single_output(outputs)?)
    }
}

pub fn gather_elements<T: Copy>(
    x: &Tensor<T>,
    indices: &Tensor<i64>,
    axis: usize,
    out: &mut Tensor<T>,
) -> Result<(), OpError> {
    let mut x_index: SmallVec<[usize; 4]> = SmallVec::new();
    for ((index, &target), y) in indices.indices().zip(indices.iter()).zip(out.iter_mut()) {
        x_index.clear();
        x_index.extend_from_slice(&index);
        x_index[axis] = resolve_index(target, x.size(axis))?;
        *y = *x
            .get(&x_index)
            .ok_or(OpError::InvalidValue("index is out of bounds"))?;
    }
    Ok(())
}

/// Gather slices using index tuples from the last dim of the indices.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GatherND {
    pub batch_dims: usize,
}

impl InferShapes for GatherND {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let indices = inputs.require(1)?;
        require_int_indices(indices)?;

        let (Some(dims), Some(index_dims)) = (x.shape().dims(), indices.shape().dims()) else {
            return Ok(vec![PartialTensor::unknown(x.dtype())]);
        };
        let b = self.batch_dims;
        if index_dims.is_empty() || b >= index_dims.len() || b >= dims.len() {
            return Err(InferShapesError::IncorrectRank(
                "batch dims must be less than the rank of data and indices",
            ));
        }
        for (x_dim, index_dim) in dims[..b].iter().zip(&index_dims[..b]) {
            x_dim.refine(index_dim)?;
        }
        let Some(tuple_len) = index_dims[index_dims.len() - 1].value() else {
            return Ok(vec![PartialTensor::unknown(x.dtype())]);
        };
        let tuple_len = tuple_len as usize;
        if b + tuple_len > dims.len() {
            return Err(InferShapesError::IncompatibleShapes(
                "index tuples are longer than the data rank",
            ));
        }

        let out_dims = index_dims[..index_dims.len() - 1]
            .iter()
            .chain(&dims[b + tuple_len..])
            .cloned();
        Ok(vec![PartialTensor::new(
            x.dtype(),
            SymbolicShape::from_dims(out_dims),
        )])
    }
}

impl Operator for GatherND {
    fn name(&self) -> &str {
        "GatherND"
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
        let x = inputs.require(0)?;
        let indices = inputs.require(1)?;
        backend.gather_nd(x, indices, self.batch_dims, single_output(outputs)?)
    }
}

pub fn gather_nd<T: Copy>(
    x: &Tensor<T>,
    indices: &Tensor<i64>,
    batch_dims: usize,
    out: &mut Tensor<T>,
) -> Result<(), OpError> {
    let prefix_len = indices.ndim() - 1;
    let tuple_len = indices.size(prefix_len);
    let out_shape = out.shape().to_vec();

    let mut x_index: SmallVec<[usize; 4]> = SmallVec::new();
    let mut tuple_index: SmallVec<[usize; 4]> = SmallVec::new();
    for (out_index, y) in Indices::from_shape(&out_shape).zip(out.iter_mut()) {
        let (prefix, suffix) = out_index.split_at(prefix_len);
        x_index.clear();
        x_index.extend_from_slice(&prefix[..batch_dims]);

        tuple_index.clear();
        tuple_index.extend_from_slice(prefix);
        tuple_index.push(0);
        for i in 0..tuple_len {
            tuple_index[prefix_len] = i;
            let target = indices.get(&tuple_index).copied().unwrap_or(0);
            x_index.push(resolve_index(target, x.size(batch_dims + i))?);
        }
        x_index.extend_from_slice(suffix);
        *y = *x
            .get(&x_index)
            .ok_or(OpError::InvalidValue("index is out of bounds"))?;
    }
    Ok(())
}

/// How a scatter combines updates with existing values.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScatterReduction {
    /// Replace the existing value.
    #[default]
    None,
    Add,
    Mul,
    Min,
    Max,
}

impl ScatterReduction {
    pub fn apply<T>(self, current: T, update: T) -> T
    where
        T: Copy + PartialOrd + Add<Output = T> + Mul<Output = T>,
    {
        match self {
            ScatterReduction::None => update,
            ScatterReduction::Add => current + update,
            ScatterReduction::Mul => current * update,
            ScatterReduction::Min => {
                if update < current {
                    update
                } else {
                    current
                }
            }
            ScatterReduction::Max => {
                if update > current {
                    update
                } else {
                    current
                }
            }
        }
    }
}

fn scatter_output(
    x: &PartialTensor,
    updates: &PartialTensor,
) -> Result<PartialTensor, InferShapesError> {
    if updates.dtype() != x.dtype() {
        return Err(InferShapesError::IncorrectType(
            "updates must have the same type as the data",
        ));
    }
    Ok(PartialTensor::new(x.dtype(), x.shape().clone()))
}

/// Write updates into a copy of the input, at positions given by an index
/// tensor with the same shape as the updates.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScatterElements {
    pub axis: i64,
    pub reduction: ScatterReduction,
}

impl InferShapes for ScatterElements {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let indices = inputs.require(1)?;
        let updates = inputs.require(2)?;
        require_int_indices(indices)?;
        indices.shape().refine(updates.shape())?;
        if let (Some(rank), Some(index_rank)) = (x.rank(), indices.rank()) {
            if rank != index_rank {
                return Err(InferShapesError::IncorrectRank(
                    "indices must have the same rank as the input",
                ));
            }
            resolve_axis(rank, self.axis)?;
        }
        Ok(vec![scatter_output(x, updates)?])
    }
}

impl Operator for ScatterElements {
    fn name(&self) -> &str {
        "ScatterElements"
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
        let indices = inputs.require(1)?;
        let updates = inputs.require(2)?;
        let axis = resolve_axis(x.ndim(), self.axis)?;
        backend.scatter_elements(
            self.reduction,
            x,
            indices,
            updates,
            axis,
            single_output(outputs)?,
        )
    }
}

pub fn scatter_elements<T>(
    reduction: ScatterReduction,
    x: &Tensor<T>,
    indices: &Tensor<i64>,
    updates: &Tensor<T>,
    axis: usize,
    out: &mut Tensor<T>,
) -> Result<(), OpError>
where
    T: Copy + PartialOrd + Add<Output = T> + Mul<Output = T>,
{
    out.data_mut().copy_from_slice(x.data());
    let mut out_index: SmallVec<[usize; 4]> = SmallVec::new();
    for ((index, &target), &update) in indices.indices().zip(indices.iter()).zip(updates.iter()) {
        out_index.clear();
        out_index.extend_from_slice(&index);
        out_index[axis] = resolve_index(target, x.size(axis))?;
        let y = out
            .get_mut(&out_index)
            .ok_or(OpError::InvalidValue("index is out of bounds"))?;
        *y = reduction.apply(*y, update);
    }
    Ok(())
}

/// Write slices of updates into a copy of the input, at positions given by
/// index tuples from the last dim of the indices.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScatterND {
    pub reduction: ScatterReduction,
}

impl InferShapes for ScatterND {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let indices = inputs.require(1)?;
        let updates = inputs.require(2)?;
        require_int_indices(indices)?;

        if let (Some(dims), Some(index_dims), Some(update_dims)) = (
            x.shape().dims(),
            indices.shape().dims(),
            updates.shape().dims(),
        ) {
            let Some((tuple_len, prefix)) = index_dims.split_last() else {
                return Err(InferShapesError::IncorrectRank("indices must not be a scalar"));
            };
            if let Some(tuple_len) = tuple_len.value() {
                let tuple_len = tuple_len as usize;
                if tuple_len > dims.len() {
                    return Err(InferShapesError::IncompatibleShapes(
                        "index tuples are longer than the data rank",
                    ));
                }
                let expected = SymbolicShape::from_dims(
                    prefix.iter().chain(&dims[tuple_len..]).cloned(),
                );
                SymbolicShape::from_dims(update_dims.iter().cloned()).refine(&expected)?;
            }
        }
        Ok(vec![scatter_output(x, updates)?])
    }
}

impl Operator for ScatterND {
    fn name(&self) -> &str {
        "ScatterND"
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
        let indices = inputs.require(1)?;
        let updates = inputs.require(2)?;
        backend.scatter_nd(self.reduction, x, indices, updates, single_output(outputs)?)
    }
}

pub fn scatter_nd<T>(
    reduction: ScatterReduction,
    x: &Tensor<T>,
    indices: &Tensor<i64>,
    updates: &Tensor<T>,
    out: &mut Tensor<T>,
) -> Result<(), OpError>
where
    T: Copy + PartialOrd + Add<Output = T> + Mul<Output = T>,
{
    out.data_mut().copy_from_slice(x.data());
    let prefix_len = indices.ndim() - 1;
    let tuple_len = indices.size(prefix_len);

    let mut out_index: SmallVec<[usize; 4]> = SmallVec::new();
    let mut tuple_index: SmallVec<[usize; 4]> = SmallVec::new();
    for (update_index, &update) in updates.indices().zip(updates.iter()) {
        let (prefix, suffix) = update_index.split_at(prefix_len);
        tuple_index.clear();
        tuple_index.extend_from_slice(prefix);
        tuple_index.push(0);

        out_index.clear();
        for i in 0..tuple_len {
            tuple_index[prefix_len] = i;
            let target = indices.get(&tuple_index).copied().unwrap_or(0);
            out_index.push(resolve_index(target, x.size(i))?);
        }
        out_index.extend_from_slice(suffix);
        let y = out
            .get_mut(&out_index)
            .ok_or(OpError::InvalidValue("index is out of bounds"))?;
        *y = reduction.apply(*y, update);
    }
    Ok(())
}

/// One-hot encode indices.
///
/// Inputs are the indices, a scalar depth and a `[off_value, on_value]`
/// vector. A new dim of size `depth` is inserted into the output at `axis`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OneHot {
    pub axis: i64,
}

impl Default for OneHot {
    fn default() -> OneHot {
        OneHot { axis: -1 }
    }
}

impl OneHot {
    /// Resolve `axis` against the output rank, which is one more than the
    /// rank of the indices.
    fn resolve_axis(&self, index_rank: usize) -> Result<usize, InferShapesError> {
        resolve_axis(index_rank + 1, self.axis)
    }
}

impl InferShapes for OneHot {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let indices = inputs.require(0)?;
        let depth = inputs.require(1)?;
        let values = inputs.require(2)?;
        require_int_indices(indices)?;
        values.shape().clone().with_rank(1)?.dim(0).refine(&SymbolicDim::Value(2))?;

        let depth = match depth.single_element() {
            Some(PartialTensorElement::IntValue(depth)) if depth < 1 => {
                return Err(InferShapesError::InvalidValue("depth must be positive"));
            }
            Some(PartialTensorElement::FloatValue(depth)) => SymbolicDim::Value(depth as i64),
            Some(elem) => elem.to_dim(),
            None => SymbolicDim::Unknown,
        };
        let Some(index_dims) = indices.shape().dims() else {
            return Ok(vec![PartialTensor::unknown(values.dtype())]);
        };
        let axis = self.resolve_axis(index_dims.len())?;
        let mut out_dims = index_dims.to_vec();
        out_dims.insert(axis, depth);
        Ok(vec![PartialTensor::new(
            values.dtype(),
            SymbolicShape::from_dims(out_dims),
        )])
    }
}

impl Operator for OneHot {
    fn name(&self) -> &str {
        "OneHot"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (3, Some(3))
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
        let indices = inputs.require(0)?;
        let values = inputs.require(2)?;
        let axis = self.resolve_axis(indices.ndim())?;
        backend.one_hot(indices, values, axis, single_output(outputs)?)
    }
}

/// One-hot encoding. Indices outside `[-depth, depth)` produce a lane of
/// `off` values.
pub fn one_hot<T: Copy>(indices: &Tensor<i64>, [off, on]: [T; 2], axis: usize, out: &mut Tensor<T>) {
    let depth = out.size(axis) as i64;
    let out_shape = out.shape().to_vec();
    let mut index_pos: SmallVec<[usize; 4]> = SmallVec::new();
    for (out_index, y) in Indices::from_shape(&out_shape).zip(out.iter_mut()) {
        index_pos.clear();
        index_pos.extend_from_slice(&out_index[..axis]);
        index_pos.extend_from_slice(&out_index[axis + 1..]);
        let target = indices.get(&index_pos).copied().unwrap_or(-1);
        let target = if target < 0 { target + depth } else { target };
        *y = if target == out_index[axis] as i64 { on } else { off };
    }
}

fn count_nonzero(value: &Value) -> usize {
    match value {
        Value::FloatTensor(t) => t.iter().filter(|x| **x != 0.).count(),
        Value::IntTensor(t) => t.iter().filter(|x| **x != 0).count(),
    }
}

/// Return the indices of non-zero elements as a `[rank, count]` matrix.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NonZero {}

impl InferShapes for NonZero {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let rank = x.rank().map(SymbolicDim::from).unwrap_or(SymbolicDim::Unknown);
        Ok(vec![PartialTensor::new(
            DataType::Int,
            SymbolicShape::from_dims([rank, SymbolicDim::Unknown]),
        )])
    }
}

impl Operator for NonZero {
    fn name(&self) -> &str {
        "NonZero"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn data_dependent_shapes(
        &self,
        inputs: &InputList,
    ) -> Option<Result<Vec<OutputMeta>, OpError>> {
        let x = match inputs.require(0) {
            Ok(x) => x,
            Err(err) => return Some(Err(err)),
        };
        let shape = [x.ndim(), count_nonzero(x)].into_iter().collect();
        Some(Ok(vec![(DataType::Int, shape)]))
    }

    fn dispatch(
        &self,
        backend: &dyn Backend,
        inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError> {
        let x = inputs.require(0)?;
        backend.non_zero(x, single_output(outputs)?)
    }
}

pub fn non_zero<T: Copy + Default + PartialEq>(x: &Tensor<T>, out: &mut Tensor<i64>) {
    let count = out.size(1);
    let zero = T::default();
    let nonzero = x
        .indices()
        .zip(x.iter())
        .filter(|(_, &value)| value != zero)
        .map(|(index, _)| index);
    let data = out.data_mut();
    for (i, index) in nonzero.enumerate() {
        for (dim, &pos) in index.iter().enumerate() {
            data[dim * count + i] = pos as i64;
        }
    }
}

/// Select slices along an axis where a condition vector is non-zero.
///
/// If no axis is given, the input is flattened first.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Compress {
    pub axis: Option<i64>,
}

impl InferShapes for Compress {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let condition = inputs.require(1)?;
        require_int_indices(condition)?;
        condition.shape().clone().with_rank(1)?;

        let shape = match (self.axis, x.shape().dims()) {
            (None, _) => SymbolicShape::from_dims([SymbolicDim::Unknown]),
            (Some(axis), Some(dims)) => {
                let axis = resolve_axis(dims.len(), axis)?;
                let mut dims = dims.to_vec();
                dims[axis] = SymbolicDim::Unknown;
                SymbolicShape::from_dims(dims)
            }
            (Some(_), None) => SymbolicShape::unknown(),
        };
        Ok(vec![PartialTensor::new(x.dtype(), shape)])
    }
}

impl Compress {
    fn resolve_axis(&self, x: &Value) -> Result<Option<usize>, OpError> {
        self.axis
            .map(|axis| resolve_axis(x.ndim(), axis))
            .transpose()
            .map_err(OpError::from)
    }
}

impl Operator for Compress {
    fn name(&self) -> &str {
        "Compress"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (2, Some(2))
    }

    fn data_dependent_shapes(
        &self,
        inputs: &InputList,
    ) -> Option<Result<Vec<OutputMeta>, OpError>> {
        let compute = || -> Result<Vec<OutputMeta>, OpError> {
            let x = inputs.require(0)?;
            let condition: &Tensor<i64> = inputs.require_as(1)?;
            if condition.ndim() != 1 {
                return Err(OpError::IncorrectRank("condition must be a vector"));
            }
            let axis = self.resolve_axis(x)?;
            let limit = axis.map(|axis| x.shape()[axis]).unwrap_or(x.len());
            if condition.len() > limit {
                return Err(OpError::InvalidValue(
                    "condition is longer than the compressed axis",
                ));
            }
            let count = condition.iter().filter(|c| **c != 0).count();
            let shape = match axis {
                Some(axis) => {
                    let mut shape: Shape = x.shape().iter().copied().collect();
                    shape[axis] = count;
                    shape
                }
                None => [count].into_iter().collect(),
            };
            Ok(vec![(x.dtype(), shape)])
        };
        Some(compute())
    }

    fn dispatch(
        &self,
        backend: &dyn Backend,
        inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError> {
        let x = inputs.require(0)?;
        let condition = inputs.require(1)?;
        let axis = self.resolve_axis(x)?;
        backend.compress(x, condition, axis, single_output(outputs)?)
    }
}

pub fn compress<T: Copy>(
    x: &Tensor<T>,
    condition: &Tensor<i64>,
    axis: Option<usize>,
    out: &mut Tensor<T>,
) {
    let selected: Vec<usize> = condition
        .iter()
        .enumerate()
        .filter(|(_, c)| **c != 0)
        .map(|(i, _)| i)
        .collect();

    let Some(axis) = axis else {
        for (y, &i) in out.iter_mut().zip(&selected) {
            *y = x.data()[i];
        }
        return;
    };

    let outer: usize = x.shape()[..axis].iter().product();
    let inner: usize = x.shape()[axis + 1..].iter().product();
    let axis_size = x.size(axis);
    let out_data = out.data_mut();
    let mut offset = 0;
    for i in 0..outer {
        for &index in &selected {
            let start = (i * axis_size + index) * inner;
            out_data[offset..offset + inner].copy_from_slice(&x.data()[start..start + inner]);
            offset += inner;
        }
    }
}

#[cfg(test)]
mod tests {
    use infergraph_shape_inference::{
        sym_shape, InferInputs, InferShapes, PartialTensor, PartialTensorElement,
    };
    use infergraph_tensor::{DataType, Tensor};

    use super::{
        Compress, Gather, GatherElements, GatherND, NonZero, OneHot, ScatterElements, ScatterND,
        ScatterReduction,
    };
    use crate::operator::OpError;
    use crate::ops::tests::{assert_folds, run_op};
    use crate::value::Value;

    fn ints(shape: &[usize], values: &[i64]) -> Value {
        Tensor::from_data(shape, values.to_vec()).into()
    }

    #[test]
    fn test_gather() {
        let x: Value = Tensor::from_data(&[3, 2], vec![1., 2., 3., 4., 5., 6.]).into();

        let result = run_op(&Gather { axis: 0 }, &[Some(&x), Some(&ints(&[2], &[2, -3]))]).unwrap();
        assert_eq!(
            result[0],
            Value::from(Tensor::from_data(&[2, 2], vec![5., 6., 1., 2.]))
        );

        let result = run_op(&Gather { axis: 1 }, &[Some(&x), Some(&ints(&[], &[1]))]).unwrap();
        assert_eq!(result[0], Value::from(Tensor::from_vec(vec![2., 4., 6.])));

        let result = run_op(&Gather { axis: 0 }, &[Some(&x), Some(&ints(&[1], &[3]))]);
        assert!(matches!(result, Err(OpError::InvalidValue(_))));
    }

    #[test]
    fn test_gather_fold() {
        let shape = ints(&[4], &[1, 3, 224, 224]);
        assert_folds(&Gather { axis: 0 }, &[&shape, &ints(&[], &[0])]);
        assert_folds(&Gather { axis: 0 }, &[&shape, &ints(&[2], &[-1, 1])]);

        // Selecting a symbolic dim from a shape vector.
        let shape = PartialTensor::vector(
            DataType::Int,
            vec![PartialTensorElement::Param("batch".into()), 3i64.into()],
        );
        let inputs = [Some(shape), Some(PartialTensor::from_int(0))];
        let result = Gather { axis: 0 }
            .infer_shapes(InferInputs::new(&inputs))
            .unwrap();
        assert_eq!(
            result[0].single_element(),
            Some(PartialTensorElement::Param("batch".into()))
        );
    }

    #[test]
    fn test_gather_elements() {
        let x: Value = Tensor::from_data(&[2, 2], vec![1, 2, 3, 4i64]).into();
        let indices = ints(&[2, 2], &[0, 0, 1, 0]);
        let result = run_op(&GatherElements { axis: 1 }, &[Some(&x), Some(&indices)]).unwrap();
        assert_eq!(result[0], ints(&[2, 2], &[1, 1, 4, 3]));
    }

    #[test]
    fn test_gather_nd() {
        let x: Value = Tensor::from_data(&[2, 2], vec![0, 1, 2, 3i64]).into();

        let indices = ints(&[2, 2], &[0, 0, 1, 1]);
        let result = run_op(&GatherND::default(), &[Some(&x), Some(&indices)]).unwrap();
        assert_eq!(result[0], ints(&[2], &[0, 3]));

        let indices = ints(&[2, 1], &[1, 0]);
        let result = run_op(&GatherND::default(), &[Some(&x), Some(&indices)]).unwrap();
        assert_eq!(result[0], ints(&[2, 2], &[2, 3, 0, 1]));

        let indices = ints(&[2, 1], &[1, 0]);
        let op = GatherND { batch_dims: 1 };
        let result = run_op(&op, &[Some(&x), Some(&indices)]).unwrap();
        assert_eq!(result[0], ints(&[2], &[1, 2]));
    }

    #[test]
    fn test_scatter_elements() {
        let x: Value = Tensor::<f32>::zeros(&[3]).into();
        let indices = ints(&[2], &[1, 1]);
        let updates: Value = Tensor::from_vec(vec![2., 3.]).into();

        let op = ScatterElements {
            axis: 0,
            reduction: ScatterReduction::Add,
        };
        let result = run_op(&op, &[Some(&x), Some(&indices), Some(&updates)]).unwrap();
        assert_eq!(result[0], Value::from(Tensor::from_vec(vec![0., 5., 0.])));

        let op = ScatterElements::default();
        let result = run_op(&op, &[Some(&x), Some(&indices), Some(&updates)]).unwrap();
        assert_eq!(result[0], Value::from(Tensor::from_vec(vec![0., 3., 0.])));
    }

    #[test]
    fn test_scatter_nd() {
        let x = ints(&[2, 2], &[1, 2, 3, 4]);
        let indices = ints(&[1, 1], &[1]);
        let updates = ints(&[1, 2], &[10, 20]);

        let op = ScatterND {
            reduction: ScatterReduction::Mul,
        };
        let result = run_op(&op, &[Some(&x), Some(&indices), Some(&updates)]).unwrap();
        assert_eq!(result[0], ints(&[2, 2], &[1, 2, 30, 80]));

        let bad_updates = ints(&[1, 3], &[1, 2, 3]);
        let result = run_op(&op, &[Some(&x), Some(&indices), Some(&bad_updates)]);
        assert!(matches!(result, Err(OpError::IncompatibleInputShapes(_))));
    }

    #[test]
    fn test_one_hot() {
        let indices = ints(&[3], &[0, 2, -1]);
        let depth = Value::from(3i64);
        let values = ints(&[2], &[0, 5]);
        let result = run_op(&OneHot::default(), &[Some(&indices), Some(&depth), Some(&values)])
            .unwrap();
        assert_eq!(result[0], ints(&[3, 3], &[5, 0, 0, 0, 0, 5, 0, 0, 5]));

        let result = run_op(
            &OneHot { axis: 0 },
            &[Some(&indices), Some(&depth), Some(&values)],
        )
        .unwrap();
        assert_eq!(result[0], ints(&[3, 3], &[5, 0, 0, 0, 0, 0, 0, 5, 5]));
    }

    #[test]
    fn test_non_zero() {
        let x: Value = Tensor::from_data(&[2, 2], vec![0., 1., 2., 0.]).into();
        let result = run_op(&NonZero {}, &[Some(&x)]).unwrap();
        assert_eq!(result[0], ints(&[2, 2], &[0, 1, 1, 0]));

        let x = PartialTensor::new(DataType::Float, sym_shape!("n", 4));
        let inputs = [Some(x)];
        let result = NonZero {}.infer_shapes(InferInputs::new(&inputs)).unwrap();
        assert_eq!(result[0].shape().dim(0), 2.into());
        assert!(result[0].shape().dim(1).is_unknown());
    }

    #[test]
    fn test_compress() {
        let x: Value = Tensor::from_data(&[2, 3], vec![1., 2., 3., 4., 5., 6.]).into();
        let condition = ints(&[3], &[1, 0, 1]);

        let result = run_op(&Compress { axis: Some(1) }, &[Some(&x), Some(&condition)]).unwrap();
        assert_eq!(
            result[0],
            Value::from(Tensor::from_data(&[2, 2], vec![1., 3., 4., 6.]))
        );

        let result = run_op(&Compress { axis: None }, &[Some(&x), Some(&condition)]).unwrap();
        assert_eq!(result[0], Value::from(Tensor::from_vec(vec![1., 3.])));

        let long = ints(&[3], &[1, 1, 1]);
        let result = run_op(&Compress { axis: Some(0) }, &[Some(&x), Some(&long)]);
        assert!(matches!(result, Err(OpError::InvalidValue(_))));
    }
}
