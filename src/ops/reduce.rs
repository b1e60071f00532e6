use std::cmp::Ordering;
use std::ops::Range;

use infergraph_shape_inference::{
    reduce_shape, resolve_axes, resolve_axis, unary_output, InferInputs, InferShapes, InferShapesError,
    PartialTensor, PartialTensorElement, SymbolicDim, SymbolicShape,
};
use infergraph_tensor::{DataType, Indices, Tensor};
use smallvec::SmallVec;

use crate::backend::{Backend, Dispatch};
use crate::operator::{single_output, InputList, OpError, Operator};
use crate::value::Value;

/// Iterate over the lanes of `shape` along the dims in `axes`.
///
/// Yields one item per output element of a reduction with `keep_dims`, in
/// row-major order. Each item is the list of index ranges covering the input
/// elements which are reduced into that output element.
fn reduction_ranges<'a>(
    shape: &'a [usize],
    axes: &'a [usize],
) -> impl Iterator<Item = SmallVec<[Range<usize>; 4]>> + 'a {
    let out_shape: SmallVec<[usize; 4]> = shape
        .iter()
        .enumerate()
        .map(|(dim, &size)| if axes.contains(&dim) { 1 } else { size })
        .collect();
    Indices::from_shape(&out_shape).map(move |index| {
        index
            .iter()
            .enumerate()
            .map(|(dim, &i)| {
                if axes.contains(&dim) {
                    0..shape[dim]
                } else {
                    i..i + 1
                }
            })
            .collect()
    })
}

/// Reduction operators.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReduceOp {
    L1,
    L2,
    LogSum,
    LogSumExp,
    Max,
    Mean,
    Min,
    Prod,
    Sum,
    SumSquare,
}

impl ReduceOp {
    pub fn supports(&self, dtype: DataType) -> bool {
        match self {
            ReduceOp::L1
            | ReduceOp::Max
            | ReduceOp::Min
            | ReduceOp::Prod
            | ReduceOp::Sum
            | ReduceOp::SumSquare => true,
            ReduceOp::L2 | ReduceOp::LogSum | ReduceOp::LogSumExp | ReduceOp::Mean => {
                dtype == DataType::Float
            }
        }
    }

    /// Reduce a sequence of floats.
    ///
    /// Empty sequences give the identity of the reduction, or NaN for
    /// `Mean`.
    pub fn reduce_float(&self, values: impl Iterator<Item = f32> + Clone) -> f32 {
        match self {
            ReduceOp::L1 => values.map(|x| x.abs()).sum(),
            ReduceOp::L2 => values.map(|x| x * x).sum::<f32>().sqrt(),
            ReduceOp::LogSum => values.sum::<f32>().ln(),
            ReduceOp::LogSumExp => {
                let max = values.clone().fold(f32::NEG_INFINITY, f32::max);
                if max == f32::NEG_INFINITY {
                    return max;
                }
                max + values.map(|x| (x - max).exp()).sum::<f32>().ln()
            }
            ReduceOp::Max => values.fold(f32::NEG_INFINITY, f32::max),
            ReduceOp::Mean => {
                let (sum, count) = values.fold((0., 0), |(sum, count), x| (sum + x, count + 1));
                sum / count as f32
            }
            ReduceOp::Min => values.fold(f32::INFINITY, f32::min),
            ReduceOp::Prod => values.product(),
            ReduceOp::Sum => values.sum(),
            ReduceOp::SumSquare => values.map(|x| x * x).sum(),
        }
    }

    /// Reduce a sequence of ints, wrapping on overflow.
    ///
    /// Operators which do not support ints return zero.
    pub fn reduce_int(&self, values: impl Iterator<Item = i64>) -> i64 {
        match self {
            ReduceOp::L1 => values.fold(0, |acc, x| acc.wrapping_add(x.wrapping_abs())),
            ReduceOp::Max => values.fold(i64::MIN, i64::max),
            ReduceOp::Min => values.fold(i64::MAX, i64::min),
            ReduceOp::Prod => values.fold(1, i64::wrapping_mul),
            ReduceOp::Sum => values.fold(0, i64::wrapping_add),
            ReduceOp::SumSquare => values.fold(0, |acc, x| acc.wrapping_add(x.wrapping_mul(x))),
            ReduceOp::L2 | ReduceOp::LogSum | ReduceOp::LogSumExp | ReduceOp::Mean => 0,
        }
    }

    /// Return true if shape inference computes the values of int
    /// reductions.
    pub fn can_fold(&self) -> bool {
        matches!(
            self,
            ReduceOp::Sum | ReduceOp::Prod | ReduceOp::Max | ReduceOp::Min
        )
    }
}

/// Reduce an input over a set of axes.
///
/// The axes are given either by the `axes` attribute or the optional second
/// input. If neither is present, or the axes are empty, all axes are reduced
/// unless `noop_with_empty_axes` is set, in which case the input is returned
/// unchanged.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reduce {
    pub op: ReduceOp,
    pub axes: Option<Vec<i64>>,
    pub keep_dims: bool,
    pub noop_with_empty_axes: bool,
}

/// Axes selected by a reduction, after combining the attribute and input.
enum ReduceAxes {
    /// The axes are not known.
    Unknown,
    /// The reduction is a no-op.
    Noop,
    /// Reduce all axes.
    All,
    Some(Vec<i64>),
}

impl Reduce {
    fn select_axes(&self, axes_input: Option<Option<Vec<i64>>>) -> ReduceAxes {
        let axes = match (&self.axes, axes_input) {
            (Some(axes), _) => Some(axes.clone()),
            (None, Some(Some(axes))) => Some(axes),
            (None, Some(None)) => return ReduceAxes::Unknown,
            (None, None) => None,
        };
        match axes {
            Some(axes) if !axes.is_empty() => ReduceAxes::Some(axes),
            _ if self.noop_with_empty_axes => ReduceAxes::Noop,
            _ => ReduceAxes::All,
        }
    }
}

impl InferShapes for Reduce {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let axes = self.select_axes(inputs.get(1).map(|axes| axes.to_ints()));

        let shape = match &axes {
            ReduceAxes::Noop => return Ok(vec![x.clone()]),
            ReduceAxes::Unknown => {
                let shape = match x.rank() {
                    Some(rank) if self.keep_dims => SymbolicShape::of_rank(rank),
                    _ => SymbolicShape::unknown(),
                };
                return Ok(vec![PartialTensor::new(x.dtype(), shape)]);
            }
            ReduceAxes::All => reduce_shape(x.shape(), None, self.keep_dims)?,
            ReduceAxes::Some(axes) => reduce_shape(x.shape(), Some(axes), self.keep_dims)?,
        };
        let mut output = PartialTensor::new(x.dtype(), shape);

        // Fold reductions of int vectors over their only axis.
        let reduces_all = match &axes {
            ReduceAxes::All => true,
            ReduceAxes::Some(axes) => x.rank() == Some(1) && axes.len() == 1,
            _ => false,
        };
        if self.op.can_fold() && x.dtype() == DataType::Int && reduces_all {
            if let Some(values) = x.to_ints() {
                let result = self.op.reduce_int(values.into_iter());
                output.set(0, PartialTensorElement::IntValue(result));
            }
        }

        Ok(vec![output])
    }
}

impl Operator for Reduce {
    fn name(&self) -> &str {
        match self.op {
            ReduceOp::L1 => "ReduceL1",
            ReduceOp::L2 => "ReduceL2",
            ReduceOp::LogSum => "ReduceLogSum",
            ReduceOp::LogSumExp => "ReduceLogSumExp",
            ReduceOp::Max => "ReduceMax",
            ReduceOp::Mean => "ReduceMean",
            ReduceOp::Min => "ReduceMin",
            ReduceOp::Prod => "ReduceProd",
            ReduceOp::Sum => "ReduceSum",
            ReduceOp::SumSquare => "ReduceSumSquare",
        }
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (1, Some(2))
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
        let out = single_output(outputs)?;
        let axes = match self.select_axes(inputs.get_ints(1)?.map(Some)) {
            ReduceAxes::Noop => return backend.copy(x, out),
            ReduceAxes::All | ReduceAxes::Unknown => (0..x.ndim()).collect(),
            ReduceAxes::Some(axes) => resolve_axes(x.ndim(), axes)?.to_vec(),
        };
        backend.reduce(&self.op, x, &axes, out)
    }
}

/// Reduce `x` over `axes`, writing one value per output element.
pub fn reduce<T: Copy>(
    x: &Tensor<T>,
    axes: &[usize],
    out: &mut Tensor<T>,
    reduce_lane: impl Fn(&[T]) -> T,
) {
    let mut lane = Vec::new();
    for (y, ranges) in out.iter_mut().zip(reduction_ranges(x.shape(), axes)) {
        lane.clear();
        lane.extend(Indices::from_ranges(&ranges).filter_map(|index| x.get(&index).copied()));
        *y = reduce_lane(&lane);
    }
}

/// Index of the largest or smallest value along an axis.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ArgReduceOp {
    ArgMax,
    ArgMin,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArgReduce {
    pub op: ArgReduceOp,
    pub axis: i64,
    pub keep_dims: bool,

    /// If there are multiple equal extreme values, return the index of the
    /// last rather than the first.
    pub select_last_index: bool,
}

impl InferShapes for ArgReduce {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        if let Some(rank) = x.rank() {
            let axis = resolve_axis(rank, self.axis)?;
            if x.shape().dim(axis).is(0) {
                return Err(InferShapesError::InvalidValue(
                    "cannot reduce an empty axis",
                ));
            }
        }
        let shape = reduce_shape(x.shape(), Some(&[self.axis]), self.keep_dims)?;
        Ok(vec![PartialTensor::new(DataType::Int, shape)])
    }
}

impl Operator for ArgReduce {
    fn name(&self) -> &str {
        match self.op {
            ArgReduceOp::ArgMax => "ArgMax",
            ArgReduceOp::ArgMin => "ArgMin",
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
        backend.arg_reduce(self, x, axis, single_output(outputs)?)
    }
}

/// Write the index of the extreme value of each lane along `axis`.
pub fn arg_reduce<T: Copy + PartialOrd>(
    op: &ArgReduce,
    x: &Tensor<T>,
    axis: usize,
    out: &mut Tensor<i64>,
) {
    let better = |candidate: T, best: T| match op.op {
        ArgReduceOp::ArgMax => candidate > best || (op.select_last_index && candidate == best),
        ArgReduceOp::ArgMin => candidate < best || (op.select_last_index && candidate == best),
    };

    for (y, ranges) in out.iter_mut().zip(reduction_ranges(x.shape(), &[axis])) {
        let mut best: Option<(usize, T)> = None;
        for (i, index) in Indices::from_ranges(&ranges).enumerate() {
            let Some(&value) = x.get(&index) else {
                continue;
            };
            best = match best {
                Some((_, best_value)) if !better(value, best_value) => best,
                _ => Some((i, value)),
            };
        }
        *y = best.map(|(i, _)| i as i64).unwrap_or(0);
    }
}

/// Cumulative sum along an axis given by the second input.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CumSum {
    /// Exclude the current element from each sum.
    pub exclusive: bool,

    /// Sum from the end of the axis towards the start.
    pub reverse: bool,
}

impl InferShapes for CumSum {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let axis = inputs.require(1)?;
        if let (Some(rank), Some(axis)) = (x.rank(), axis.to_int_scalar()) {
            resolve_axis(rank, axis)?;
        }
        Ok(vec![unary_output(x, x.dtype())])
    }
}

impl Operator for CumSum {
    fn name(&self) -> &str {
        "CumSum"
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
        let axis = inputs
            .get_int_scalar(1)?
            .ok_or(OpError::MissingInputs)?;
        let axis = resolve_axis(x.ndim(), axis)?;
        backend.cum_sum(self, x, axis, single_output(outputs)?)
    }
}

/// Compute cumulative sums of each lane along `axis`.
pub fn cum_sum<T: Copy + Default>(
    op: &CumSum,
    x: &Tensor<T>,
    axis: usize,
    out: &mut Tensor<T>,
    add: impl Fn(T, T) -> T,
) {
    let shape = x.shape().to_vec();
    let mut lane_start = shape.clone();
    lane_start[axis] = 1;

    for start in Indices::from_shape(&lane_start) {
        let mut sum = T::default();
        let lane: Vec<usize> = if op.reverse {
            (0..shape[axis]).rev().collect()
        } else {
            (0..shape[axis]).collect()
        };
        for i in lane {
            let mut index = start.clone();
            index[axis] = i;
            let (Some(&value), Some(y)) = (x.get(&index), out.get_mut(&index)) else {
                continue;
            };
            if op.exclusive {
                *y = sum;
                sum = add(sum, value);
            } else {
                sum = add(sum, value);
                *y = sum;
            }
        }
    }
}

/// Select the `k` largest or smallest values along an axis, where `k` is
/// given by the second input.
///
/// Returns the values and their indices.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TopK {
    pub axis: i64,
    pub largest: bool,
    pub sorted: bool,
}

impl InferShapes for TopK {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let k = inputs.require(1)?;

        let k = match k.to_ints().as_deref() {
            Some([k]) if *k < 0 => {
                return Err(InferShapesError::InvalidValue("k must be non-negative"));
            }
            Some([k]) => SymbolicDim::Value(*k),
            Some(_) => {
                return Err(InferShapesError::InvalidValue("k must have one element"));
            }
            None => SymbolicDim::Unknown,
        };

        let mut shape = x.shape().clone();
        if let Some(rank) = shape.rank() {
            let axis = resolve_axis(rank, self.axis)?;
            if let (Some(k), Some(size)) = (k.value(), shape.dim(axis).value()) {
                if k > size {
                    return Err(InferShapesError::InvalidValue(
                        "k is larger than the axis size",
                    ));
                }
            }
            shape.set_dim(axis, k);
        }

        Ok(vec![
            PartialTensor::new(x.dtype(), shape.clone()),
            PartialTensor::new(DataType::Int, shape),
        ])
    }
}

impl Operator for TopK {
    fn name(&self) -> &str {
        "TopK"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (2, Some(2))
    }

    fn num_outputs(&self) -> usize {
        2
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
        let axis = resolve_axis(x.ndim(), self.axis)?;
        let [values, indices] = outputs else {
            return Err(OpError::InvalidValue("expected two outputs"));
        };
        backend.top_k(self, x, axis, values, indices)
    }
}

/// Select the top `k` entries of each lane along `axis`, where `k` is the
/// size of `values` along that axis.
///
/// Ties are broken by preferring the lower index.
pub fn top_k<T: Copy + PartialOrd>(
    op: &TopK,
    x: &Tensor<T>,
    axis: usize,
    values: &mut Tensor<T>,
    indices: &mut Tensor<i64>,
) {
    let k = values.size(axis);
    let mut lane_start = x.shape().to_vec();
    lane_start[axis] = 1;

    let mut lane: Vec<(usize, T)> = Vec::with_capacity(x.size(axis));
    for start in Indices::from_shape(&lane_start) {
        lane.clear();
        for i in 0..x.size(axis) {
            let mut index = start.clone();
            index[axis] = i;
            if let Some(&value) = x.get(&index) {
                lane.push((i, value));
            }
        }

        let order = |a: &(usize, T), b: &(usize, T)| {
            let ord = a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal);
            let ord = if op.largest { ord.reverse() } else { ord };
            ord.then(a.0.cmp(&b.0))
        };
        lane.sort_by(order);
        let n_selected = k.min(lane.len());
        let selected = &mut lane[..n_selected];
        if !op.sorted {
            selected.sort_by_key(|(i, _)| *i);
        }

        for (j, &(i, value)) in selected.iter().enumerate() {
            let mut index = start.clone();
            index[axis] = j;
            if let Some(y) = values.get_mut(&index) {
                *y = value;
            }
            if let Some(y) = indices.get_mut(&index) {
                *y = i as i64;
            }
        }
    }
}
