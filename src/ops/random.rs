use fastrand::Rng;
use infergraph_shape_inference::{
    InferInputs, InferShapes, InferShapesError, PartialTensor, SymbolicShape,
};
use infergraph_tensor::{DataType, Tensor};

use crate::backend::{Backend, Dispatch};
use crate::operator::{single_output, InputList, OpError, Operator};
use crate::value::Value;

/// Distribution sampled by a random operator.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RandomOp {
    Uniform { low: f32, high: f32 },
    Normal { mean: f32, scale: f32 },
    /// Draw 1 with the probability given by the corresponding input element
    /// and 0 otherwise.
    Bernoulli,
}

/// Create a generator from an optional seed.
///
/// Seeds are `f32` values for consistency with ONNX. The same seed always
/// produces the same sequence.
fn new_rng(seed: Option<f32>) -> Rng {
    match seed {
        Some(seed) => Rng::with_seed(seed.to_bits() as u64),
        None => Rng::new(),
    }
}

/// Sample from a normal distribution using the Box-Muller transform.
fn normal(rng: &mut Rng, mean: f32, scale: f32) -> f32 {
    // `1 - u` is in (0, 1], which keeps the log finite.
    let u1 = 1. - rng.f32();
    let u2 = rng.f32();
    let z = (-2. * u1.ln()).sqrt() * (2. * std::f32::consts::PI * u2).cos();
    mean + scale * z
}

/// Fill `out` with samples from `op`.
///
/// `input` supplies the probabilities for [`RandomOp::Bernoulli`] and is
/// ignored otherwise.
pub fn random_fill(
    op: &RandomOp,
    seed: Option<f32>,
    input: Option<&Tensor<f32>>,
    out: &mut Tensor<f32>,
) -> Result<(), OpError> {
    let mut rng = new_rng(seed);
    match *op {
        RandomOp::Uniform { low, high } => {
            for y in out.iter_mut() {
                *y = low + rng.f32() * (high - low);
            }
        }
        RandomOp::Normal { mean, scale } => {
            for y in out.iter_mut() {
                *y = normal(&mut rng, mean, scale);
            }
        }
        RandomOp::Bernoulli => {
            let probs = input.ok_or(OpError::MissingInputs)?;
            for (y, &p) in out.iter_mut().zip(probs.iter()) {
                *y = if rng.f32() < p { 1. } else { 0. };
            }
        }
    }
    Ok(())
}

macro_rules! impl_random_operator {
    ($op:ident, $name:literal, $arity:expr) => {
        impl Operator for $op {
            fn name(&self) -> &str {
                $name
            }

            fn input_arity(&self) -> (usize, Option<usize>) {
                $arity
            }

            fn is_deterministic(&self) -> bool {
                false
            }

            fn dispatch(
                &self,
                backend: &dyn Backend,
                inputs: &InputList,
                outputs: &mut [Value],
            ) -> Result<Dispatch, OpError> {
                backend.random(
                    &self.random_op(),
                    self.seed,
                    inputs.get(0),
                    single_output(outputs)?,
                )
            }
        }
    };
}

/// Output shape of the `*Like` operators and `Bernoulli`.
fn like_output(inputs: &InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
    let input = inputs.require(0)?;
    if input.dtype() != DataType::Float {
        return Err(InferShapesError::IncorrectType("random ops produce float outputs"));
    }
    Ok(vec![PartialTensor::new(DataType::Float, input.shape().clone())])
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RandomUniform {
    pub low: f32,
    pub high: f32,
    pub shape: Vec<usize>,
    pub seed: Option<f32>,
}

impl RandomUniform {
    fn random_op(&self) -> RandomOp {
        RandomOp::Uniform {
            low: self.low,
            high: self.high,
        }
    }
}

impl InferShapes for RandomUniform {
    fn infer_shapes(&self, _inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        Ok(vec![PartialTensor::new(
            DataType::Float,
            SymbolicShape::from_fixed(&self.shape),
        )])
    }
}

impl_random_operator!(RandomUniform, "RandomUniform", (0, Some(0)));

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RandomUniformLike {
    pub low: f32,
    pub high: f32,
    pub seed: Option<f32>,
}

impl RandomUniformLike {
    fn random_op(&self) -> RandomOp {
        RandomOp::Uniform {
            low: self.low,
            high: self.high,
        }
    }
}

impl InferShapes for RandomUniformLike {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        like_output(&inputs)
    }
}

impl_random_operator!(RandomUniformLike, "RandomUniformLike", (1, Some(1)));

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RandomNormal {
    pub mean: f32,
    pub scale: f32,
    pub shape: Vec<usize>,
    pub seed: Option<f32>,
}

impl RandomNormal {
    fn random_op(&self) -> RandomOp {
        RandomOp::Normal {
            mean: self.mean,
            scale: self.scale,
        }
    }
}

impl InferShapes for RandomNormal {
    fn infer_shapes(&self, _inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        Ok(vec![PartialTensor::new(
            DataType::Float,
            SymbolicShape::from_fixed(&self.shape),
        )])
    }
}

impl_random_operator!(RandomNormal, "RandomNormal", (0, Some(0)));

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RandomNormalLike {
    pub mean: f32,
    pub scale: f32,
    pub seed: Option<f32>,
}

impl RandomNormalLike {
    fn random_op(&self) -> RandomOp {
        RandomOp::Normal {
            mean: self.mean,
            scale: self.scale,
        }
    }
}

impl InferShapes for RandomNormalLike {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        like_output(&inputs)
    }
}

impl_random_operator!(RandomNormalLike, "RandomNormalLike", (1, Some(1)));

/// Sample 0 or 1 for each element of the input, which holds probabilities.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bernoulli {
    pub seed: Option<f32>,
}

impl Bernoulli {
    fn random_op(&self) -> RandomOp {
        RandomOp::Bernoulli
    }
}

impl InferShapes for Bernoulli {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        like_output(&inputs)
    }
}

impl_random_operator!(Bernoulli, "Bernoulli", (1, Some(1)));
