use infergraph_shape_inference::shape_ops::pad_shape;
use infergraph_shape_inference::{
    resolve_axes, InferInputs, InferShapes, InferShapesError, PartialTensor, SymbolicShape,
};
use infergraph_tensor::{DataType, Indices, Tensor};
use smallvec::SmallVec;

use crate::backend::{Backend, Dispatch};
use crate::operator::{single_output, InputList, OpError, Operator};
use crate::value::Value;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PadMode {
    /// Fill padding with a constant value.
    #[default]
    Constant,
    /// Mirror the input, excluding the edge element.
    Reflect,
    /// Repeat the edge element.
    Edge,
}

/// Pad a tensor.
///
/// Inputs are the data, an int vector of pads (`[starts..., ends...]`), an
/// optional scalar fill value and optional axes which the pads apply to.
/// Negative pads remove elements.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pad {
    pub mode: PadMode,
}

/// Expand pads for a subset of axes to pads for every axis.
fn expand_pads<T: Clone>(pads: &[T], axes: &[usize], rank: usize, zero: T) -> Vec<T> {
    let mut full = vec![zero; rank * 2];
    let n = axes.len();
    for (i, &axis) in axes.iter().enumerate() {
        full[axis] = pads[i].clone();
        full[rank + axis] = pads[n + i].clone();
    }
    full
}

impl InferShapes for Pad {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let pads = inputs.require(1)?;
        if pads.dtype() != DataType::Int {
            return Err(InferShapesError::IncorrectType("pads must be an int tensor"));
        }
        pads.shape().clone().with_rank(1)?;
        if let Some(value) = inputs.get(2) {
            if value.dtype() != x.dtype() {
                return Err(InferShapesError::IncorrectType(
                    "pad value must have the same type as the input",
                ));
            }
        }

        let Some(pad_values) = pads.elements() else {
            let shape = match x.rank() {
                Some(rank) => SymbolicShape::of_rank(rank),
                None => SymbolicShape::unknown(),
            };
            return Ok(vec![PartialTensor::new(x.dtype(), shape)]);
        };
        let pad_values: Vec<Option<i64>> = pad_values.iter().map(|p| p.as_int()).collect();

        let pad_values = match (inputs.get(3), x.rank()) {
            (None, _) => pad_values,
            (Some(axes), Some(rank)) => {
                let Some(axes) = axes.to_ints() else {
                    return Ok(vec![PartialTensor::new(x.dtype(), SymbolicShape::of_rank(rank))]);
                };
                let axes = resolve_axes(rank, axes)?;
                if pad_values.len() != axes.len() * 2 {
                    return Err(InferShapesError::InvalidValue(
                        "pads length must be twice the number of axes",
                    ));
                }
                expand_pads(&pad_values, &axes, rank, Some(0))
            }
            (Some(_), None) => return Ok(vec![PartialTensor::unknown(x.dtype())]),
        };

        let out_shape = pad_shape(x.shape(), &pad_values)?;
        if self.mode != PadMode::Constant {
            if let Some(dims) = x.shape().dims() {
                let rank = dims.len();
                for (i, dim) in dims.iter().enumerate() {
                    let max_pad = pad_values[i].unwrap_or(0).max(pad_values[rank + i].unwrap_or(0));
                    if max_pad > 0 && dim.is(0) {
                        return Err(InferShapesError::InvalidValue(
                            "cannot reflect or extend an empty dim",
                        ));
                    }
                }
            }
        }
        Ok(vec![PartialTensor::new(x.dtype(), out_shape)])
    }
}

impl Pad {
    fn resolve_pads(&self, rank: usize, inputs: &InputList) -> Result<Vec<i64>, OpError> {
        let pads = inputs.require_ints(1)?;
        match inputs.get_ints(3)? {
            None => Ok(pads),
            Some(axes) => {
                let axes = resolve_axes(rank, axes)?;
                Ok(expand_pads(&pads, &axes, rank, 0))
            }
        }
    }
}

impl Operator for Pad {
    fn name(&self) -> &str {
        "Pad"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (2, Some(4))
    }

    fn value_inputs(&self) -> &'static [usize] {
        &[1, 3]
    }

    fn dispatch(
        &self,
        backend: &dyn Backend,
        inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError> {
        let x = inputs.require(0)?;
        let pads = self.resolve_pads(x.ndim(), inputs)?;
        backend.pad(self, x, &pads, inputs.get(2), single_output(outputs)?)
    }
}

/// Map an index into a padded dim of size `size` to an index in the input,
/// or `None` if it falls in constant padding.
fn source_index(mode: PadMode, index: i64, size: i64) -> Option<i64> {
    if (0..size).contains(&index) {
        return Some(index);
    }
    match mode {
        PadMode::Constant => None,
        PadMode::Edge => Some(index.clamp(0, size - 1)),
        PadMode::Reflect => {
            if size == 1 {
                return Some(0);
            }
            let period = 2 * (size - 1);
            let pos = index.rem_euclid(period);
            Some(if pos < size { pos } else { period - pos })
        }
    }
}

pub fn pad<T: Copy>(mode: PadMode, x: &Tensor<T>, pads: &[i64], value: T, out: &mut Tensor<T>) {
    let rank = x.ndim();
    let out_shape = out.shape().to_vec();
    let mut x_index: SmallVec<[usize; 4]> = SmallVec::from_elem(0, rank);

    'outer: for (index, y) in Indices::from_shape(&out_shape).zip(out.iter_mut()) {
        for dim in 0..rank {
            let pos = index[dim] as i64 - pads[dim];
            match source_index(mode, pos, x.size(dim) as i64) {
                Some(pos) => x_index[dim] = pos as usize,
                None => {
                    *y = value;
                    continue 'outer;
                }
            }
        }
        *y = x.get(&x_index).copied().unwrap_or(value);
    }
}
