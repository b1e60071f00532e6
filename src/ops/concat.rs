use infergraph_shape_inference::shape_ops::tile_shape;
use infergraph_shape_inference::{
    resolve_axis, InferInputs, InferShapes, InferShapesError, PartialTensor, SymbolicDim,
    SymbolicShape,
};
use infergraph_tensor::{DataType, Tensor};

use crate::backend::{Backend, Dispatch};
use crate::operator::{single_output, InputList, OpError, Operator};
use crate::value::Value;

/// Join tensors along an axis.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Concat {
    pub axis: i64,
}

impl InferShapes for Concat {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let first = inputs.require(0)?;
        let args: Vec<&PartialTensor> = inputs.iter().collect();
        if args.iter().any(|x| x.dtype() != first.dtype()) {
            return Err(InferShapesError::IncorrectType(
                "inputs must have the same type",
            ));
        }

        let ranked: Vec<&[SymbolicDim]> = args.iter().filter_map(|x| x.shape().dims()).collect();
        let Some(rank) = ranked.first().map(|dims| dims.len()) else {
            return Ok(vec![PartialTensor::unknown(first.dtype())]);
        };
        if ranked.iter().any(|dims| dims.len() != rank) {
            return Err(InferShapesError::IncorrectRank(
                "inputs must have the same rank",
            ));
        }
        let axis = resolve_axis(rank, self.axis)?;

        let mut out_dims: Vec<SymbolicDim> = ranked[0].to_vec();
        for dims in &ranked[1..] {
            for (i, dim) in dims.iter().enumerate() {
                if i != axis {
                    out_dims[i] = out_dims[i].refine(dim)?;
                }
            }
        }
        out_dims[axis] = if ranked.len() == args.len() {
            ranked
                .iter()
                .fold(SymbolicDim::Value(0), |acc, dims| acc + dims[axis].clone())
        } else {
            SymbolicDim::Unknown
        };

        let mut output = PartialTensor::new(first.dtype(), out_dims.into_iter().collect());
        if rank == 1 && args.iter().all(|x| x.elements().is_some()) {
            let elements = args.iter().flat_map(|x| x.elements().into_iter().flatten());
            for (i, elem) in elements.enumerate() {
                output.set(i, elem.clone());
            }
        }
        Ok(vec![output])
    }
}

impl Operator for Concat {
    fn name(&self) -> &str {
        "Concat"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (1, None)
    }

    fn dispatch(
        &self,
        backend: &dyn Backend,
        inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError> {
        let values: Vec<&Value> = inputs
            .iter()
            .map(|x| x.ok_or(OpError::MissingInputs))
            .collect::<Result<_, _>>()?;
        let axis = resolve_axis(values[0].ndim(), self.axis)?;
        backend.concat(&values, axis, single_output(outputs)?)
    }
}

pub fn concat<T: Copy>(inputs: &[&Tensor<T>], axis: usize, out: &mut Tensor<T>) {
    let outer: usize = out.shape()[..axis].iter().product();
    let inner: usize = out.shape()[axis + 1..].iter().product();
    let out_data = out.data_mut();

    let mut offset = 0;
    for i in 0..outer {
        for input in inputs {
            let chunk_len = input.size(axis) * inner;
            let chunk = &input.data()[i * chunk_len..][..chunk_len];
            out_data[offset..offset + chunk_len].copy_from_slice(chunk);
            offset += chunk_len;
        }
    }
}

/// Repeat a tensor along each axis, according to the repeat counts in the
/// second input.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tile {}

impl InferShapes for Tile {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let repeats = inputs.require(1)?;
        if repeats.dtype() != DataType::Int {
            return Err(InferShapesError::IncorrectType("repeats must be an int tensor"));
        }
        let repeats = repeats.to_symbolic_shape();
        let Some(repeats) = repeats.dims() else {
            let shape = match x.rank() {
                Some(rank) => SymbolicShape::of_rank(rank),
                None => SymbolicShape::unknown(),
            };
            return Ok(vec![PartialTensor::new(x.dtype(), shape)]);
        };
        let out_shape = tile_shape(x.shape(), repeats)?;
        Ok(vec![PartialTensor::new(x.dtype(), out_shape)])
    }
}

impl Operator for Tile {
    fn name(&self) -> &str {
        "Tile"
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
        backend.tile(x, single_output(outputs)?)
    }
}

pub fn tile<T: Copy>(x: &Tensor<T>, out: &mut Tensor<T>) {
    let out_shape = out.shape().to_vec();
    let mut x_index = vec![0; x.ndim()];
    for (index, y) in infergraph_tensor::Indices::from_shape(&out_shape).zip(out.iter_mut()) {
        for (dim, &i) in index.iter().enumerate() {
            x_index[dim] = i % x.size(dim);
        }
        if let Some(&value) = x.get(&x_index) {
            *y = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use infergraph_shape_inference::{
        sym_shape, ErrorKind, InferInputs, InferShapes, PartialTensor, PartialTensorElement,
    };
    use infergraph_tensor::{DataType, Tensor};

    use super::{Concat, Tile};
    use crate::ops::tests::{assert_folds, run_op};
    use crate::value::Value;

    #[test]
    fn test_concat() {
        let a: Value = Tensor::from_data(&[2, 1], vec![1., 2.]).into();
        let b: Value = Tensor::from_data(&[2, 2], vec![3., 4., 5., 6.]).into();
        let result = run_op(&Concat { axis: -1 }, &[Some(&a), Some(&b)]).unwrap();
        assert_eq!(
            result[0],
            Value::from(Tensor::from_data(&[2, 3], vec![1., 3., 4., 2., 5., 6.]))
        );

        let err = run_op(&Concat { axis: 0 }, &[Some(&a), Some(&b)])
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Shape);
    }

    #[test]
    fn test_concat_fold() {
        let a: Value = Tensor::from_vec(vec![1i64, 2]).into();
        let b: Value = Tensor::from_vec(vec![3i64]).into();
        assert_folds(&Concat { axis: 0 }, &[&a, &b, &a]);
    }

    #[test]
    fn test_concat_symbolic_shape_vector() {
        // Build the target shape `[batch, -1]` for a reshape.
        let batch = PartialTensor::vector(
            DataType::Int,
            vec![PartialTensorElement::Param("batch".into())],
        );
        let rest = PartialTensor::from_ints(&[-1]);
        let inputs = [Some(batch), Some(rest)];
        let result = Concat { axis: 0 }
            .infer_shapes(InferInputs::new(&inputs))
            .unwrap();
        assert_eq!(
            result[0].elements(),
            Some(
                &[
                    PartialTensorElement::Param("batch".into()),
                    PartialTensorElement::IntValue(-1)
                ][..]
            )
        );
    }

    #[test]
    fn test_tile() {
        let x: Value = Tensor::from_data(&[1, 2], vec![1i64, 2]).into();
        let repeats: Value = Tensor::from_vec(vec![2i64, 2]).into();
        let result = run_op(&Tile {}, &[Some(&x), Some(&repeats)]).unwrap();
        assert_eq!(
            result[0],
            Value::from(Tensor::from_data(&[2, 4], vec![1, 2, 1, 2, 1, 2, 1, 2i64]))
        );

        let x = PartialTensor::new(DataType::Float, sym_shape!("n", 3));
        let inputs = [Some(x), Some(PartialTensor::from_ints(&[1, 2]))];
        let result = Tile {}.infer_shapes(InferInputs::new(&inputs)).unwrap();
        assert_eq!(result[0].shape(), &sym_shape!("n", 6));
    }
}
