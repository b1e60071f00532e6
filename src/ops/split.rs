use infergraph_shape_inference::{
    resolve_axis, InferInputs, InferShapes, InferShapesError, PartialTensor, SymbolicDim,
    SymbolicShape,
};
use infergraph_tensor::{DataType, Tensor};

use crate::backend::{Backend, Dispatch};
use crate::operator::{InputList, OpError, Operator};
use crate::value::Value;

/// Split a tensor into consecutive chunks along an axis.
///
/// The optional second input gives the size of each chunk. If absent, the
/// axis is split into `num_outputs` chunks of size `ceil(dim / num_outputs)`,
/// with a smaller last chunk if the dim is not evenly divisible.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Split {
    pub axis: i64,
    pub num_outputs: usize,
}

impl Split {
    /// Compute the size of each chunk, given the size of the split axis.
    fn chunk_sizes(
        &self,
        dim: &SymbolicDim,
        split: Option<&PartialTensor>,
    ) -> Result<Vec<SymbolicDim>, InferShapesError> {
        if let Some(split) = split {
            if split.dtype() != DataType::Int {
                return Err(InferShapesError::IncorrectType("split must be an int tensor"));
            }
            let sizes = split.to_symbolic_shape();
            let Some(sizes) = sizes.dims() else {
                return Ok(vec![SymbolicDim::Unknown; self.num_outputs]);
            };
            if sizes.len() != self.num_outputs {
                return Err(InferShapesError::InvalidValue(
                    "split length must match the number of outputs",
                ));
            }
            if sizes.iter().any(|s| s.value().is_some_and(|s| s < 0)) {
                return Err(InferShapesError::InvalidValue("split sizes must be non-negative"));
            }
            let total = sizes
                .iter()
                .cloned()
                .fold(SymbolicDim::Value(0), |acc, size| acc + size);
            if let (Some(total), Some(dim)) = (total.value(), dim.value()) {
                if total != dim {
                    return Err(InferShapesError::IncompatibleShapes(
                        "split sizes must sum to the size of the axis",
                    ));
                }
            }
            return Ok(sizes.to_vec());
        }

        let Some(size) = dim.value() else {
            return Ok(vec![SymbolicDim::Unknown; self.num_outputs]);
        };
        let chunk = (size as usize).div_ceil(self.num_outputs);
        let mut remaining = size as usize;
        Ok((0..self.num_outputs)
            .map(|_| {
                let len = chunk.min(remaining);
                remaining -= len;
                SymbolicDim::from(len)
            })
            .collect())
    }
}

impl InferShapes for Split {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        if self.num_outputs == 0 {
            return Err(InferShapesError::InvalidValue("split must have outputs"));
        }
        let Some(dims) = x.shape().dims() else {
            return Ok(vec![PartialTensor::unknown(x.dtype()); self.num_outputs]);
        };
        let axis = resolve_axis(dims.len(), self.axis)?;
        let sizes = self.chunk_sizes(&dims[axis], inputs.get(1))?;

        let mut start = Some(0usize);
        let outputs = sizes
            .into_iter()
            .map(|size| {
                let mut out_dims = dims.to_vec();
                out_dims[axis] = size.clone();
                let mut output = PartialTensor::new(x.dtype(), SymbolicShape::from_dims(out_dims));

                if let (Some(offset), Some(len)) = (start, size.value()) {
                    if dims.len() == 1 && x.elements().is_some() {
                        for i in 0..len as usize {
                            output.set(i, x.get(offset + i));
                        }
                    }
                    start = Some(offset + len as usize);
                } else {
                    start = None;
                }
                output
            })
            .collect();
        Ok(outputs)
    }
}

impl Operator for Split {
    fn name(&self) -> &str {
        "Split"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (1, Some(2))
    }

    fn num_outputs(&self) -> usize {
        self.num_outputs
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
        backend.split(x, axis, outputs)
    }
}

/// Copy consecutive chunks of `x` along `axis` into `outputs`.
pub fn split<T: Copy>(x: &Tensor<T>, axis: usize, outputs: &mut [&mut Tensor<T>]) {
    let outer: usize = x.shape()[..axis].iter().product();
    let inner: usize = x.shape()[axis + 1..].iter().product();
    let data = x.data();

    let mut offset = 0;
    for i in 0..outer {
        for output in outputs.iter_mut() {
            let chunk_len = output.size(axis) * inner;
            let chunk = &data[offset..offset + chunk_len];
            output.data_mut()[i * chunk_len..][..chunk_len].copy_from_slice(chunk);
            offset += chunk_len;
        }
    }
}
