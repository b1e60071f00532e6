use std::f32::consts::{FRAC_2_SQRT_PI, SQRT_2};

use infergraph_shape_inference::{
    unary_output, InferInputs, InferShapes, InferShapesError, PartialTensor,
    PartialTensorElement,
};
use infergraph_tensor::{DataType, Tensor};

use crate::backend::{Backend, Dispatch};
use crate::operator::{single_output, InputList, OpError, Operator};
use crate::ops::math::erf;
use crate::value::Value;

/// Apply `f` to each element of `x`, writing the results into `out`.
pub fn map_into<T: Copy, U>(x: &Tensor<T>, out: &mut Tensor<U>, f: impl Fn(T) -> U) {
    for (y, &x) in out.iter_mut().zip(x.iter()) {
        *y = f(x);
    }
}

/// Elementwise operators with a single input.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnaryOp {
    Abs,
    Acos,
    Acosh,
    Asin,
    Asinh,
    Atan,
    Atanh,
    BitwiseNot,
    Ceil,
    Celu { alpha: f32 },
    Cos,
    Cosh,
    Elu { alpha: f32 },
    Erf,
    Exp,
    Floor,
    /// Gaussian error linear unit. If `approximate` is set the tanh
    /// approximation is used.
    Gelu { approximate: bool },
    HardSigmoid { alpha: f32, beta: f32 },
    HardSwish,
    IsInf {
        detect_negative: bool,
        detect_positive: bool,
    },
    IsNaN,
    LeakyRelu { alpha: f32 },
    Log,
    Mish,
    Neg,
    /// Logical not. Inputs are treated as booleans, where zero is false.
    Not,
    Reciprocal,
    Relu,
    /// Round to the nearest integer, with ties rounded to even.
    Round,
    Selu { alpha: f32, gamma: f32 },
    Shrink { bias: f32, lambd: f32 },
    Sigmoid,
    Sign,
    Sin,
    Sinh,
    Softplus,
    Softsign,
    Sqrt,
    Square,
    Swish { alpha: f32 },
    Tan,
    Tanh,
    ThresholdedRelu { alpha: f32 },
}

fn sigmoid(x: f32) -> f32 {
    1. / (1. + (-x).exp())
}

impl UnaryOp {
    /// Return true if this operator accepts inputs of type `dtype`.
    pub fn supports(&self, dtype: DataType) -> bool {
        match self {
            // Operators defined for both types.
            UnaryOp::Abs | UnaryOp::Neg | UnaryOp::Relu | UnaryOp::Sign | UnaryOp::Square => true,

            // Int-only operators.
            UnaryOp::Not | UnaryOp::BitwiseNot => dtype == DataType::Int,

            _ => dtype == DataType::Float,
        }
    }

    /// Return true if this is a predicate which maps floats to 0 or 1.
    pub fn is_predicate(&self) -> bool {
        matches!(self, UnaryOp::IsInf { .. } | UnaryOp::IsNaN)
    }

    /// Return the output type for an input of type `dtype`.
    pub fn output_dtype(&self, dtype: DataType) -> DataType {
        if self.is_predicate() {
            DataType::Int
        } else {
            dtype
        }
    }

    /// Return true if shape inference computes output values for this
    /// operator.
    pub fn can_fold(&self) -> bool {
        matches!(
            self,
            UnaryOp::Abs
                | UnaryOp::Neg
                | UnaryOp::Not
                | UnaryOp::Relu
                | UnaryOp::Sign
                | UnaryOp::Square
        )
    }

    /// Evaluate this operator for a float input.
    ///
    /// Operators which do not support float inputs return `x` unchanged.
    /// Callers should check [`supports`](Self::supports) first.
    pub fn apply_float(&self, x: f32) -> f32 {
        match *self {
            UnaryOp::Abs => x.abs(),
            UnaryOp::Acos => x.acos(),
            UnaryOp::Acosh => x.acosh(),
            UnaryOp::Asin => x.asin(),
            UnaryOp::Asinh => x.asinh(),
            UnaryOp::Atan => x.atan(),
            UnaryOp::Atanh => x.atanh(),
            UnaryOp::Ceil => x.ceil(),
            UnaryOp::Celu { alpha } => x.max(0.) + (alpha * ((x / alpha).exp() - 1.)).min(0.),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Cosh => x.cosh(),
            UnaryOp::Elu { alpha } => {
                if x >= 0. {
                    x
                } else {
                    alpha * (x.exp() - 1.)
                }
            }
            UnaryOp::Erf => erf(x),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Floor => x.floor(),
            UnaryOp::Gelu { approximate: false } => 0.5 * x * (1. + erf(x / SQRT_2)),
            UnaryOp::Gelu { approximate: true } => {
                // sqrt(2 / pi)
                let k = FRAC_2_SQRT_PI / SQRT_2;
                0.5 * x * (1. + (k * (x + 0.044715 * x * x * x)).tanh())
            }
            UnaryOp::HardSigmoid { alpha, beta } => (alpha * x + beta).clamp(0., 1.),
            UnaryOp::HardSwish => x * (x / 6. + 0.5).clamp(0., 1.),
            UnaryOp::LeakyRelu { alpha } => {
                if x < 0. {
                    alpha * x
                } else {
                    x
                }
            }
            UnaryOp::Log => x.ln(),
            UnaryOp::Mish => x * x.exp().ln_1p().tanh(),
            UnaryOp::Neg => -x,
            UnaryOp::Reciprocal => 1. / x,
            UnaryOp::Relu => x.max(0.),
            UnaryOp::Round => x.round_ties_even(),
            UnaryOp::Selu { alpha, gamma } => {
                if x > 0. {
                    gamma * x
                } else {
                    gamma * alpha * (x.exp() - 1.)
                }
            }
            UnaryOp::Shrink { bias, lambd } => {
                if x < -lambd {
                    x + bias
                } else if x > lambd {
                    x - bias
                } else {
                    0.
                }
            }
            UnaryOp::Sigmoid => sigmoid(x),
            UnaryOp::Sign => {
                if x == 0. || x.is_nan() {
                    x
                } else {
                    x.signum()
                }
            }
            UnaryOp::Sin => x.sin(),
            UnaryOp::Sinh => x.sinh(),
            UnaryOp::Softplus => x.exp().ln_1p(),
            UnaryOp::Softsign => x / (1. + x.abs()),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Square => x * x,
            UnaryOp::Swish { alpha } => x * sigmoid(alpha * x),
            UnaryOp::Tan => x.tan(),
            UnaryOp::Tanh => x.tanh(),
            UnaryOp::ThresholdedRelu { alpha } => {
                if x > alpha {
                    x
                } else {
                    0.
                }
            }
            UnaryOp::Not | UnaryOp::BitwiseNot | UnaryOp::IsInf { .. } | UnaryOp::IsNaN => x,
        }
    }

    /// Evaluate a predicate operator for a float input.
    pub fn apply_predicate(&self, x: f32) -> bool {
        match *self {
            UnaryOp::IsInf {
                detect_negative,
                detect_positive,
            } => {
                (detect_positive && x == f32::INFINITY)
                    || (detect_negative && x == f32::NEG_INFINITY)
            }
            UnaryOp::IsNaN => x.is_nan(),
            _ => false,
        }
    }

    /// Evaluate this operator for an int input.
    ///
    /// Operators which do not support int inputs return `x` unchanged.
    /// Arithmetic wraps on overflow.
    pub fn apply_int(&self, x: i64) -> i64 {
        match self {
            UnaryOp::Abs => x.wrapping_abs(),
            UnaryOp::BitwiseNot => !x,
            UnaryOp::Neg => x.wrapping_neg(),
            UnaryOp::Not => (x == 0) as i64,
            UnaryOp::Relu => x.max(0),
            UnaryOp::Sign => x.signum(),
            UnaryOp::Square => x.wrapping_mul(x),
            _ => x,
        }
    }

    /// Apply this operator to an abstract element.
    fn apply_element(&self, x: &PartialTensorElement) -> PartialTensorElement {
        match x {
            PartialTensorElement::IntValue(x) => PartialTensorElement::IntValue(self.apply_int(*x)),
            PartialTensorElement::FloatValue(x) => {
                PartialTensorElement::FloatValue(self.apply_float(*x))
            }
            PartialTensorElement::Param(_) | PartialTensorElement::Unknown => {
                PartialTensorElement::Unknown
            }
        }
    }
}

impl InferShapes for UnaryOp {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        let dtype = self.output_dtype(x.dtype());
        let output = if self.can_fold() && self.supports(x.dtype()) {
            x.map_elements(dtype, |elem| self.apply_element(elem))
        } else {
            unary_output(x, dtype)
        };
        Ok(vec![output])
    }
}

impl Operator for UnaryOp {
    fn name(&self) -> &str {
        match self {
            UnaryOp::Abs => "Abs",
            UnaryOp::Acos => "Acos",
            UnaryOp::Acosh => "Acosh",
            UnaryOp::Asin => "Asin",
            UnaryOp::Asinh => "Asinh",
            UnaryOp::Atan => "Atan",
            UnaryOp::Atanh => "Atanh",
            UnaryOp::BitwiseNot => "BitwiseNot",
            UnaryOp::Ceil => "Ceil",
            UnaryOp::Celu { .. } => "Celu",
            UnaryOp::Cos => "Cos",
            UnaryOp::Cosh => "Cosh",
            UnaryOp::Elu { .. } => "Elu",
            UnaryOp::Erf => "Erf",
            UnaryOp::Exp => "Exp",
            UnaryOp::Floor => "Floor",
            UnaryOp::Gelu { .. } => "Gelu",
            UnaryOp::HardSigmoid { .. } => "HardSigmoid",
            UnaryOp::HardSwish => "HardSwish",
            UnaryOp::IsInf { .. } => "IsInf",
            UnaryOp::IsNaN => "IsNaN",
            UnaryOp::LeakyRelu { .. } => "LeakyRelu",
            UnaryOp::Log => "Log",
            UnaryOp::Mish => "Mish",
            UnaryOp::Neg => "Neg",
            UnaryOp::Not => "Not",
            UnaryOp::Reciprocal => "Reciprocal",
            UnaryOp::Relu => "Relu",
            UnaryOp::Round => "Round",
            UnaryOp::Selu { .. } => "Selu",
            UnaryOp::Shrink { .. } => "Shrink",
            UnaryOp::Sigmoid => "Sigmoid",
            UnaryOp::Sign => "Sign",
            UnaryOp::Sin => "Sin",
            UnaryOp::Sinh => "Sinh",
            UnaryOp::Softplus => "Softplus",
            UnaryOp::Softsign => "Softsign",
            UnaryOp::Sqrt => "Sqrt",
            UnaryOp::Square => "Square",
            UnaryOp::Swish { .. } => "Swish",
            UnaryOp::Tan => "Tan",
            UnaryOp::Tanh => "Tanh",
            UnaryOp::ThresholdedRelu { .. } => "ThresholdedRelu",
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
        backend.unary(self, x, single_output(outputs)?)
    }
}

/// Clamp values to an optional range.
///
/// The `min` and `max` inputs are single-element tensors of the same type as
/// the input.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Clip {}

impl InferShapes for Clip {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let x = inputs.require(0)?;
        for bound in [inputs.get(1), inputs.get(2)].into_iter().flatten() {
            if bound.dtype() != x.dtype() {
                return Err(InferShapesError::IncorrectType(
                    "clip bounds must have the same type as the input",
                ));
            }
        }
        Ok(vec![unary_output(x, x.dtype())])
    }
}

impl Operator for Clip {
    fn name(&self) -> &str {
        "Clip"
    }

    fn input_arity(&self) -> (usize, Option<usize>) {
        (1, Some(3))
    }

    fn dispatch(
        &self,
        backend: &dyn Backend,
        inputs: &InputList,
        outputs: &mut [Value],
    ) -> Result<Dispatch, OpError> {
        let x = inputs.require(0)?;
        backend.clip(x, inputs.get(1), inputs.get(2), single_output(outputs)?)
    }
}

/// Clamp each element of `x` to `[min, max]`.
pub fn clip<T: Copy + PartialOrd>(x: &Tensor<T>, min: Option<T>, max: Option<T>, out: &mut Tensor<T>) {
    map_into(x, out, |x| {
        let x = match min {
            Some(min) if x < min => min,
            _ => x,
        };
        match max {
            Some(max) if x > max => max,
            _ => x,
        }
    })
}

#[cfg(test)]
mod tests {
    use infergraph_shape_inference::{InferInputs, InferShapes, PartialTensor};
    use infergraph_tensor::test_util::expect_equal;
    use infergraph_tensor::{DataType, Tensor};
    use infergraph_testing::TestCases;

    use super::UnaryOp;
    use crate::operator::OpError;
    use crate::ops::tests::{assert_folds, run_op};
    use crate::value::Value;

    #[test]
    fn test_float_ops() {
        #[derive(Debug)]
        struct Case {
            op: UnaryOp,
            input: f32,
            expected: f32,
        }

        let cases = [
            Case {
                op: UnaryOp::Abs,
                input: -2.5,
                expected: 2.5,
            },
            Case {
                op: UnaryOp::Elu { alpha: 1. },
                input: -1.,
                expected: -0.63212055,
            },
            Case {
                op: UnaryOp::Gelu { approximate: false },
                input: 1.,
                expected: 0.8413447,
            },
            Case {
                op: UnaryOp::Gelu { approximate: true },
                input: 1.,
                expected: 0.841192,
            },
            Case {
                op: UnaryOp::HardSigmoid {
                    alpha: 0.2,
                    beta: 0.5,
                },
                input: 1.,
                expected: 0.7,
            },
            Case {
                op: UnaryOp::HardSwish,
                input: 1.,
                expected: 0.6666667,
            },
            Case {
                op: UnaryOp::LeakyRelu { alpha: 0.1 },
                input: -2.,
                expected: -0.2,
            },
            Case {
                op: UnaryOp::Round,
                input: 2.5,
                expected: 2.,
            },
            Case {
                op: UnaryOp::Round,
                input: 3.5,
                expected: 4.,
            },
            Case {
                op: UnaryOp::Shrink {
                    bias: 0.5,
                    lambd: 1.,
                },
                input: 2.,
                expected: 1.5,
            },
            Case {
                op: UnaryOp::Sigmoid,
                input: 0.,
                expected: 0.5,
            },
            Case {
                op: UnaryOp::Sign,
                input: -3.,
                expected: -1.,
            },
            Case {
                op: UnaryOp::Sign,
                input: 0.,
                expected: 0.,
            },
            Case {
                op: UnaryOp::Softplus,
                input: 0.,
                expected: std::f32::consts::LN_2,
            },
            Case {
                op: UnaryOp::Softsign,
                input: 1.,
                expected: 0.5,
            },
            Case {
                op: UnaryOp::ThresholdedRelu { alpha: 1. },
                input: 0.5,
                expected: 0.,
            },
        ];

        cases.test_each(|case| {
            let x: Value = Tensor::from_vec(vec![case.input]).into();
            let result = run_op(&case.op, &[Some(&x)]).unwrap();
            let result: Tensor<f32> = result[0].clone().try_into().unwrap();
            expect_equal(&result, &Tensor::from_vec(vec![case.expected])).unwrap();
        })
    }

    #[test]
    fn test_int_ops() {
        let x: Value = Tensor::from_vec(vec![-3i64, 0, 2]).into();

        let cases = [
            (UnaryOp::Abs, vec![3, 0, 2]),
            (UnaryOp::Neg, vec![3, 0, -2]),
            (UnaryOp::Not, vec![0, 1, 0]),
            (UnaryOp::Relu, vec![0, 0, 2]),
            (UnaryOp::Sign, vec![-1, 0, 1]),
            (UnaryOp::Square, vec![9, 0, 4]),
            (UnaryOp::BitwiseNot, vec![2, -1, -3]),
        ];

        cases.test_each(|(op, expected)| {
            let result = run_op(op, &[Some(&x)]).unwrap();
            assert_eq!(result[0], Value::from(Tensor::from_vec(expected.clone())));
        })
    }

    #[test]
    fn test_predicates() {
        let x: Value = Tensor::from_vec(vec![1., f32::INFINITY, f32::NEG_INFINITY, f32::NAN]).into();

        let is_inf = UnaryOp::IsInf {
            detect_negative: false,
            detect_positive: true,
        };
        let result = run_op(&is_inf, &[Some(&x)]).unwrap();
        assert_eq!(result[0], Value::from(Tensor::from_vec(vec![0i64, 1, 0, 0])));

        let result = run_op(&UnaryOp::IsNaN, &[Some(&x)]).unwrap();
        assert_eq!(result[0], Value::from(Tensor::from_vec(vec![0i64, 0, 0, 1])));
    }

    #[test]
    fn test_unsupported_type() {
        let x: Value = Tensor::from_vec(vec![1i64, 2]).into();
        let result = run_op(&UnaryOp::Exp, &[Some(&x)]);
        assert_eq!(result.err(), Some(OpError::UnsupportedType));
    }

    #[test]
    fn test_fold() {
        let ints: Value = Tensor::from_vec(vec![-4i64, 0, 7]).into();
        let floats: Value = Tensor::from_vec(vec![-1.5f32, 0., 2.]).into();

        for op in [
            UnaryOp::Abs,
            UnaryOp::Neg,
            UnaryOp::Relu,
            UnaryOp::Sign,
            UnaryOp::Square,
        ] {
            assert_folds(&op, &[&ints]);
            assert_folds(&op, &[&floats]);
        }
        assert_folds(&UnaryOp::Not, &[&ints]);
    }

    #[test]
    fn test_shape_only() {
        let x = PartialTensor::from_float(2.);
        let outputs = UnaryOp::Exp
            .infer_shapes(InferInputs::new(&[Some(x)]))
            .unwrap();
        assert_eq!(outputs[0].dtype(), DataType::Float);
        assert!(!outputs[0].has_known_values());
    }
}
