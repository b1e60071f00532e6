use infergraph_shape_inference::shape_ops::{slice_dim, SliceRange};
use infergraph_shape_inference::{
    resolve_axes, resolve_axis, InferInputs, InferShapes, InferShapesError, PartialTensor,
    SymbolicDim, SymbolicShape,
};
use infergraph_tensor::{DataType, Indices, Tensor};
use smallvec::SmallVec;

use crate::backend::{Backend, Dispatch};
use crate::operator::{single_output, InputList, OpError, Operator};
use crate::value::Value;

/// Return the elements of a 1D int input, where each element may be unknown.
///
/// Returns `None` if the length of the input is unknown.
fn int_elements(input: &PartialTensor) -> Result<Option<Vec<Option<i64>>>, InferShapesError> {
    if input.dtype() != DataType::Int {
        return Err(InferShapesError::IncorrectType(
            "slice parameters must be int tensors",
        ));
    }
    input.shape().clone().with_rank(1)?;
    Ok(input
        .elements()
        .map(|elems| elems.iter().map(|e| e.as_int()).collect()))
}

/// Extract a strided slice of a tensor.
///
/// Inputs are the data, then 1D `starts`, `ends` and optional `axes` and
/// `steps` tensors. Axes which are not listed are not sliced.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Slice {}

impl InferShapes for Slice {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let starts = int_elements(inputs.require(1)?)?;
        let ends = int_elements(inputs.require(2)?)?;
        let axes = inputs.get(3).map(int_elements).transpose()?;
        let steps = inputs.get(4).map(int_elements).transpose()?;

        let Some(dims) = x.shape().dims() else {
            return Ok(vec![PartialTensor::unknown(x.dtype())]);
        };
        let (Some(starts), Some(ends)) = (starts, ends) else {
            return Ok(vec![PartialTensor::new(
                x.dtype(),
                SymbolicShape::of_rank(dims.len()),
            )]);
        };
        if starts.len() != ends.len() {
            return Err(InferShapesError::InvalidValue(
                "starts and ends must have the same length",
            ));
        }

        let axes: Vec<usize> = match axes {
            None => (0..starts.len()).collect(),
            Some(Some(axes)) => {
                let Some(axes) = axes.into_iter().collect::<Option<Vec<i64>>>() else {
                    return Ok(vec![PartialTensor::new(
                        x.dtype(),
                        SymbolicShape::of_rank(dims.len()),
                    )]);
                };
                if axes.len() != starts.len() {
                    return Err(InferShapesError::InvalidValue(
                        "axes must have the same length as starts",
                    ));
                }
                // Check for duplicates, then keep the original order.
                resolve_axes(dims.len(), axes.iter().copied())?;
                axes.iter()
                    .map(|&axis| resolve_axis(dims.len(), axis))
                    .collect::<Result<_, _>>()?
            }
            Some(None) => {
                return Ok(vec![PartialTensor::new(
                    x.dtype(),
                    SymbolicShape::of_rank(dims.len()),
                )])
            }
        };
        if axes.iter().any(|&axis| axis >= dims.len()) {
            return Err(InferShapesError::IncorrectRank("slice axis is out of range"));
        }
        let steps: Vec<Option<i64>> = match steps {
            None => vec![Some(1); starts.len()],
            Some(Some(steps)) if steps.len() == starts.len() => steps,
            Some(Some(_)) => {
                return Err(InferShapesError::InvalidValue(
                    "steps must have the same length as starts",
                ))
            }
            Some(None) => vec![None; starts.len()],
        };

        let mut out_dims: Vec<SymbolicDim> = dims.to_vec();
        let mut ranges: Vec<Option<SliceRange>> = vec![None; dims.len()];
        for (i, &axis) in axes.iter().enumerate() {
            out_dims[axis] = slice_dim(&dims[axis], starts[i], ends[i], steps[i])?;
            if let (Some(size), Some(start), Some(end), Some(step)) =
                (dims[axis].value(), starts[i], ends[i], steps[i])
            {
                ranges[axis] = Some(SliceRange::resolve(size, start, end, step)?);
            }
        }

        let mut output = PartialTensor::new(x.dtype(), SymbolicShape::from_dims(out_dims));
        if let (1, Some(elements)) = (dims.len(), x.elements()) {
            let range = match (&ranges[0], axes.is_empty()) {
                (Some(range), _) => Some(*range),
                (None, true) => Some(SliceRange {
                    start: 0,
                    step: 1,
                    len: elements.len(),
                }),
                (None, false) => None,
            };
            if let Some(range) = range {
                for i in 0..range.len {
                    output.set(i, x.get(range.index(i)));
                }
            }
        }
        Ok(vec![output])
    }
}

impl Slice {
    /// Resolve the slice parameters into one range per dim of `x`.
    fn ranges(&self, x: &[usize], inputs: &InputList) -> Result<Vec<SliceRange>, OpError> {
        let starts = inputs.require_ints(1)?;
        let ends = inputs.require_ints(2)?;
        let axes = inputs
            .get_ints(3)?
            .unwrap_or_else(|| (0..starts.len() as i64).collect());
        let steps = inputs
            .get_ints(4)?
            .unwrap_or_else(|| vec![1; starts.len()]);
        if ends.len() != starts.len() || axes.len() != starts.len() || steps.len() != starts.len()
        {
            return Err(OpError::InvalidValue(
                "slice parameters must have the same length",
            ));
        }

        let mut ranges: Vec<SliceRange> = x
            .iter()
            .map(|&size| SliceRange {
                start: 0,
                step: 1,
                len: size,
            })
            .collect();
        for (i, &axis) in axes.iter().enumerate() {
            let axis = resolve_axis(x.len(), axis)?;
            ranges[axis] = SliceRange::resolve(x[axis] as i64, starts[i], ends[i], steps[i])?;
        }
        Ok(ranges)
    }
}

impl Operator for Slice {
    fn name(&self) -> &str {
        "Slice"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (3, Some(5))
    }

    fn value_inputs(&self) -> &'static [usize] {
        &[1, 2, 3, 4]
    }

    fn dispatch(
        &self,
        backend: &dyn Backend,
        inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError> {
        let x = inputs.require(0)?;
        let ranges = self.ranges(x.shape(), inputs)?;
        backend.slice(x, &ranges, single_output(outputs)?)
    }
}

pub fn slice<T: Copy>(x: &Tensor<T>, ranges: &[SliceRange], out: &mut Tensor<T>) {
    let out_shape = out.shape().to_vec();
    let mut x_index: SmallVec<[usize; 4]> = SmallVec::from_elem(0, x.ndim());
    for (index, y) in Indices::from_shape(&out_shape).zip(out.iter_mut()) {
        for (dim, &i) in index.iter().enumerate() {
            x_index[dim] = ranges[dim].index(i);
        }
        if let Some(&value) = x.get(&x_index) {
            *y = value;
        }
    }
}
