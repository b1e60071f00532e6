use infergraph_shape_inference::{
    InferInputs, InferShapes, InferShapesError, PartialTensor, SymbolicDim, SymbolicShape,
};
use infergraph_tensor::{DataType, Tensor};

use crate::backend::{Backend, Dispatch};
use crate::operator::{single_output, InputList, OpError, Operator};
use crate::value::Value;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResizeMode {
    #[default]
    Nearest,
    Linear,
}

/// Specifies how resizing maps output coordinates to input coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CoordTransformMode {
    /// Pixel centers are at half-integer coordinates. This matches how OpenCV
    /// and PyTorch resize images.
    #[default]
    HalfPixel,
    Asymmetric,
    /// The corner pixels of the input and output are aligned.
    AlignCorners,
    /// As `HalfPixel`, except that an output of size 1 maps to coordinate 0.
    PytorchHalfPixel,
}

/// Specifies how resizing with [`ResizeMode::Nearest`] maps a fractional
/// input coordinate to a pixel.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NearestMode {
    Ceil,
    Floor,
    RoundPreferCeil,
    #[default]
    RoundPreferFloor,
}

/// Compute the input coordinate that corresponds to an output coordinate.
fn input_coord(
    dest_coord: usize,
    scale: f32,
    in_size: usize,
    out_size: usize,
    mode: CoordTransformMode,
) -> f32 {
    type Ctm = CoordTransformMode;
    let dest = dest_coord as f32;
    match mode {
        Ctm::HalfPixel => (dest + 0.5) / scale - 0.5,
        Ctm::Asymmetric => dest / scale,
        Ctm::AlignCorners => {
            if out_size > 1 {
                dest * (in_size - 1) as f32 / (out_size - 1) as f32
            } else {
                0.
            }
        }
        Ctm::PytorchHalfPixel => {
            if out_size > 1 {
                (dest + 0.5) / scale - 0.5
            } else {
                0.
            }
        }
    }
}

fn round_coord(coord: f32, mode: NearestMode) -> usize {
    // `f32::round` rounds halfway cases away from zero, so ties are handled
    // separately.
    let rounded = match mode {
        NearestMode::Ceil => coord.ceil(),
        NearestMode::Floor => coord.floor(),
        NearestMode::RoundPreferCeil if coord.fract() == 0.5 => coord.ceil(),
        NearestMode::RoundPreferFloor if coord.fract() == 0.5 => coord.floor(),
        NearestMode::RoundPreferCeil | NearestMode::RoundPreferFloor => coord.round(),
    };
    rounded.max(0.) as usize
}

/// Resize the spatial dimensions of a tensor using nearest neighbor or
/// linear interpolation.
///
/// Inputs are the data, an ignored region of interest, and either a vector
/// of scale factors or a vector of output sizes. Only the last two dims may
/// be resized. Empty `scales` or `sizes` tensors are treated as absent.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Resize {
    pub mode: ResizeMode,
    pub coord_mode: CoordTransformMode,
    pub nearest_mode: NearestMode,
}

/// Return an optional input, treating empty tensors as absent.
fn non_empty(input: Option<&PartialTensor>) -> Option<&PartialTensor> {
    input.filter(|t| !t.shape().num_elements().is(0))
}

impl InferShapes for Resize {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        if x.dtype() != DataType::Float {
            return Err(InferShapesError::IncorrectType("resize input must be float"));
        }
        let scales = non_empty(inputs.get(2));
        let sizes = non_empty(inputs.get(3));

        let shape = match (scales, sizes) {
            (Some(scales), _) => {
                if scales.dtype() != DataType::Float {
                    return Err(InferShapesError::IncorrectType("scales must be float"));
                }
                let Some(dims) = x.shape().dims() else {
                    return Ok(vec![PartialTensor::unknown(x.dtype())]);
                };
                let scales = scales.shape().clone().with_rank(1)?;
                scales.dim(0).refine(&SymbolicDim::from(dims.len()))?;
                let scales = inputs.get(2).and_then(|s| s.elements());
                SymbolicShape::from_dims(dims.iter().enumerate().map(|(i, dim)| {
                    match scales.and_then(|s| s[i].as_float()) {
                        Some(scale) if scale == 1. => dim.clone(),
                        Some(scale) => match dim.value() {
                            Some(size) => SymbolicDim::Value((size as f32 * scale) as i64),
                            None => SymbolicDim::Unknown,
                        },
                        None => SymbolicDim::Unknown,
                    }
                }))
            }
            (None, Some(sizes)) => {
                if sizes.dtype() != DataType::Int {
                    return Err(InferShapesError::IncorrectType("sizes must be int"));
                }
                let shape = sizes.to_symbolic_shape();
                if let (Some(rank), Some(size_len)) = (x.rank(), shape.rank()) {
                    if rank != size_len {
                        return Err(InferShapesError::IncompatibleShapes(
                            "sizes length must equal input rank",
                        ));
                    }
                }
                shape
            }
            (None, None) => return Err(InferShapesError::MissingInput(2)),
        };
        Ok(vec![PartialTensor::new(x.dtype(), shape)])
    }
}

impl Operator for Resize {
    fn name(&self) -> &str {
        "Resize"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (1, Some(4))
    }

    fn value_inputs(&self) -> &'static [usize] {
        &[2, 3]
    }

    fn dispatch(
        &self,
        backend: &dyn Backend,
        inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError> {
        let x = inputs.require(0)?;
        let out = single_output(outputs)?;
        let scales: Vec<f32> = match inputs.get_as::<&Tensor<f32>>(2)? {
            Some(scales) if !scales.is_empty() => scales.to_vec(),
            _ => x
                .shape()
                .iter()
                .zip(out.shape())
                .map(|(&in_size, &out_size)| out_size as f32 / in_size as f32)
                .collect(),
        };
        backend.resize(self, x, &scales, out)
    }
}

/// Resize `x` into `out`. `scales` has one entry per dimension of `x`.
pub fn resize(
    op: &Resize,
    x: &Tensor<f32>,
    scales: &[f32],
    out: &mut Tensor<f32>,
) -> Result<(), OpError> {
    let ndim = x.ndim();
    if ndim < 2 {
        return Err(OpError::UnsupportedValue("resize input must have rank >= 2"));
    }
    let batch_resized = x.shape()[..ndim - 2]
        .iter()
        .zip(out.shape())
        .any(|(in_size, out_size)| in_size != out_size);
    if batch_resized {
        return Err(OpError::UnsupportedValue(
            "only the last two dimensions can be resized",
        ));
    }
    if out.is_empty() {
        return Ok(());
    }

    let (in_h, in_w) = (x.size(ndim - 2), x.size(ndim - 1));
    let (out_h, out_w) = (out.size(ndim - 2), out.size(ndim - 1));
    let (scale_y, scale_x) = (scales[ndim - 2], scales[ndim - 1]);
    if in_h == 0 || in_w == 0 {
        return Err(OpError::InvalidValue("cannot resize an empty image"));
    }

    let coord = |dest, scale, in_size: usize, out_size| {
        input_coord(dest, scale, in_size, out_size, op.coord_mode)
            .clamp(0., in_size as f32 - 1.)
    };

    for (image, out_image) in x
        .data()
        .chunks(in_h * in_w)
        .zip(out.data_mut().chunks_mut(out_h * out_w))
    {
        for y in 0..out_h {
            let in_y = coord(y, scale_y, in_h, out_h);
            for x in 0..out_w {
                let in_x = coord(x, scale_x, in_w, out_w);
                out_image[y * out_w + x] = match op.mode {
                    ResizeMode::Nearest => {
                        let row = round_coord(in_y, op.nearest_mode).min(in_h - 1);
                        let col = round_coord(in_x, op.nearest_mode).min(in_w - 1);
                        image[row * in_w + col]
                    }
                    ResizeMode::Linear => {
                        let (y1, x1) = (in_y as usize, in_x as usize);
                        let (y2, x2) = ((y1 + 1).min(in_h - 1), (x1 + 1).min(in_w - 1));
                        let (wy, wx) = (in_y - y1 as f32, in_x - x1 as f32);

                        let top = (1. - wx) * image[y1 * in_w + x1] + wx * image[y1 * in_w + x2];
                        let bottom =
                            (1. - wx) * image[y2 * in_w + x1] + wx * image[y2 * in_w + x2];
                        (1. - wy) * top + wy * bottom
                    }
                };
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use infergraph_shape_inference::{sym_shape, InferInputs, InferShapes, PartialTensor};
    use infergraph_tensor::test_util::expect_equal;
    use infergraph_tensor::{DataType, Tensor};
    use infergraph_testing::TestCases;

    use super::{CoordTransformMode, NearestMode, Resize, ResizeMode};
    use crate::operator::OpError;
    use crate::ops::tests::run_op;
    use crate::value::Value;

    fn image() -> Value {
        Tensor::from_data(&[1, 1, 2, 2], vec![0.2, 0.7, 0.3, 0.8]).into()
    }

    fn floats(values: &[f32]) -> Value {
        Tensor::from_vec(values.to_vec()).into()
    }

    #[test]
    fn test_resize_nearest() {
        #[derive(Debug)]
        struct Case {
            scales: Vec<f32>,
            expected: Tensor<f32>,
        }

        let cases = [
            Case {
                scales: vec![1., 1., 0., 0.],
                expected: Tensor::from_data(&[1, 1, 0, 0], vec![]),
            },
            Case {
                scales: vec![1., 1., 0.5, 0.5],
                expected: Tensor::from_data(&[1, 1, 1, 1], vec![0.2]),
            },
            Case {
                scales: vec![1., 1., 1., 1.],
                expected: Tensor::from_data(&[1, 1, 2, 2], vec![0.2, 0.7, 0.3, 0.8]),
            },
            Case {
                scales: vec![1., 1., 1., 2.],
                expected: Tensor::from_data(&[1, 1, 2, 4], vec![0.2, 0.2, 0.7, 0.7, 0.3, 0.3, 0.8, 0.8]),
            },
        ];

        cases.test_each(|case| {
            let x = image();
            let scales = floats(&case.scales);
            let result = run_op(&Resize::default(), &[Some(&x), None, Some(&scales)]).unwrap();
            let result: Tensor<f32> = result[0].clone().try_into().unwrap();
            expect_equal(&result, &case.expected).unwrap();
        })
    }

    #[test]
    fn test_resize_linear() {
        let x = image();
        let op = Resize {
            mode: ResizeMode::Linear,
            ..Default::default()
        };
        let sizes: Value = Tensor::from_vec(vec![1i64, 1, 2, 4]).into();
        let empty = floats(&[]);
        let result = run_op(&op, &[Some(&x), None, Some(&empty), Some(&sizes)]).unwrap();
        let result: Tensor<f32> = result[0].clone().try_into().unwrap();
        let expected = Tensor::from_data(
            &[1, 1, 2, 4],
            vec![0.2, 0.325, 0.575, 0.7, 0.3, 0.425, 0.675, 0.8],
        );
        expect_equal(&result, &expected).unwrap();

        let op = Resize {
            mode: ResizeMode::Linear,
            coord_mode: CoordTransformMode::AlignCorners,
            nearest_mode: NearestMode::default(),
        };
        let sizes: Value = Tensor::from_vec(vec![1i64, 1, 1, 3]).into();
        let result = run_op(&op, &[Some(&x), None, None, Some(&sizes)]).unwrap();
        let result: Tensor<f32> = result[0].clone().try_into().unwrap();
        expect_equal(&result, &Tensor::from_data(&[1, 1, 1, 3], vec![0.2, 0.45, 0.7])).unwrap();
    }

    #[test]
    fn test_resize_invalid() {
        let x = image();
        let result = run_op(&Resize::default(), &[Some(&x)]);
        assert_eq!(result.err(), Some(OpError::MissingInputs));

        let scales = floats(&[2., 1., 1., 1.]);
        let result = run_op(&Resize::default(), &[Some(&x), None, Some(&scales)]);
        assert!(matches!(result, Err(OpError::UnsupportedValue(_))));
    }

    #[test]
    fn test_resize_symbolic() {
        let x = PartialTensor::new(DataType::Float, sym_shape!("batch", 3, 32, 32));
        let scales = PartialTensor::vector(
            DataType::Float,
            [1., 1., 2., 0.5].into_iter().map(|s: f32| s.into()).collect(),
        );
        let inputs = [Some(x), None, Some(scales)];
        let result = Resize::default()
            .infer_shapes(InferInputs::new(&inputs))
            .unwrap();
        assert_eq!(result[0].shape(), &sym_shape!("batch", 3, 64, 16));
    }
}
