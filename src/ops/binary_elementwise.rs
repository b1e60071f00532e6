use infergraph_shape_inference::{
    broadcast_output, InferInputs, InferShapes, InferShapesError, PartialTensor,
    PartialTensorElement,
};
use infergraph_tensor::{DataType, Tensor};
use smallvec::SmallVec;

use crate::backend::{Backend, Dispatch};
use crate::operator::{single_output, InputList, OpError, Operator};
use crate::value::Value;

/// Compute the elements of a broadcasting operator's output from the
/// elements of its inputs.
///
/// This only has an effect if values are tracked for the output, which
/// implies it has at most one dimension. Each input then has either one
/// element, which is broadcast, or the same number of elements as the output.
pub(crate) fn fold_broadcast<F>(output: &mut PartialTensor, inputs: &[&PartialTensor], f: F)
where
    F: Fn(&[PartialTensorElement]) -> PartialTensorElement,
{
    let Some(len) = output.elements().map(|elems| elems.len()) else {
        return;
    };
    if inputs.iter().any(|x| x.elements().is_none()) {
        return;
    }

    for i in 0..len {
        let args: SmallVec<[PartialTensorElement; 4]> = inputs
            .iter()
            .map(|x| {
                let input_len = x.elements().map(|elems| elems.len()).unwrap_or(0);
                x.get(if input_len == 1 { 0 } else { i })
            })
            .collect();
        output.set(i, f(&args));
    }
}

/// Apply `f` to pairs of elements from `a` and `b`, broadcast to the shape of
/// `out`.
pub fn binary_map<T: Copy, U>(
    a: &Tensor<T>,
    b: &Tensor<T>,
    out: &mut Tensor<U>,
    mut f: impl FnMut(T, T) -> U,
) {
    let shape = out.shape().to_vec();
    for ((y, &a), &b) in out
        .iter_mut()
        .zip(a.broadcast_iter(&shape))
        .zip(b.broadcast_iter(&shape))
    {
        *y = f(a, b);
    }
}

/// Elementwise operators with two broadcast inputs.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// Division. Int division truncates towards zero.
    Div,
    Pow,
    /// Remainder. If `fmod` is set the result has the sign of the dividend,
    /// otherwise it has the sign of the divisor.
    Mod { fmod: bool },
    Min,
    Max,
    And,
    Or,
    Xor,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    Equal,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    /// Leaky ReLU with a slope given by the second input.
    PRelu,
}

impl BinaryOp {
    /// Return true if this operator accepts inputs of type `dtype`.
    pub fn supports(&self, dtype: DataType) -> bool {
        match self {
            BinaryOp::And
            | BinaryOp::Or
            | BinaryOp::Xor
            | BinaryOp::BitwiseAnd
            | BinaryOp::BitwiseOr
            | BinaryOp::BitwiseXor => dtype == DataType::Int,
            _ => true,
        }
    }

    /// Return true if this is a comparison, whose output is 0 or 1.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::Greater
                | BinaryOp::GreaterOrEqual
                | BinaryOp::Less
                | BinaryOp::LessOrEqual
        )
    }

    pub fn output_dtype(&self, dtype: DataType) -> DataType {
        if self.is_comparison() {
            DataType::Int
        } else {
            dtype
        }
    }

    /// Return true if shape inference computes output values for this
    /// operator.
    pub fn can_fold(&self) -> bool {
        !matches!(self, BinaryOp::Pow | BinaryOp::PRelu)
    }

    /// Evaluate this operator for int inputs.
    ///
    /// Arithmetic wraps on overflow. Returns `None` if the divisor of a
    /// `Div` or `Mod` is zero.
    pub fn apply_int(&self, a: i64, b: i64) -> Option<i64> {
        let result = match self {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div => {
                if b == 0 {
                    return None;
                }
                a.wrapping_div(b)
            }
            BinaryOp::Pow => int_pow(a, b),
            BinaryOp::Mod { fmod } => {
                if b == 0 {
                    return None;
                }
                let rem = a.wrapping_rem(b);
                if !fmod && rem != 0 && (rem < 0) != (b < 0) {
                    rem + b
                } else {
                    rem
                }
            }
            BinaryOp::Min => a.min(b),
            BinaryOp::Max => a.max(b),
            BinaryOp::And => (a != 0 && b != 0) as i64,
            BinaryOp::Or => (a != 0 || b != 0) as i64,
            BinaryOp::Xor => ((a != 0) != (b != 0)) as i64,
            BinaryOp::BitwiseAnd => a & b,
            BinaryOp::BitwiseOr => a | b,
            BinaryOp::BitwiseXor => a ^ b,
            BinaryOp::Equal => (a == b) as i64,
            BinaryOp::Greater => (a > b) as i64,
            BinaryOp::GreaterOrEqual => (a >= b) as i64,
            BinaryOp::Less => (a < b) as i64,
            BinaryOp::LessOrEqual => (a <= b) as i64,
            BinaryOp::PRelu => {
                if a < 0 {
                    a.wrapping_mul(b)
                } else {
                    a
                }
            }
        };
        Some(result)
    }

    /// Evaluate a non-comparison operator for float inputs.
    ///
    /// Operators which do not support floats return `a`.
    pub fn apply_float(&self, a: f32, b: f32) -> f32 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
            BinaryOp::Mod { fmod } => {
                let rem = a % b;
                if !fmod && rem != 0. && (rem < 0.) != (b < 0.) {
                    rem + b
                } else {
                    rem
                }
            }
            BinaryOp::Min => a.min(b),
            BinaryOp::Max => a.max(b),
            BinaryOp::PRelu => {
                if a < 0. {
                    a * b
                } else {
                    a
                }
            }
            _ => a,
        }
    }

    /// Evaluate a comparison for float inputs.
    pub fn compare_float(&self, a: f32, b: f32) -> bool {
        match self {
            BinaryOp::Equal => a == b,
            BinaryOp::Greater => a > b,
            BinaryOp::GreaterOrEqual => a >= b,
            BinaryOp::Less => a < b,
            BinaryOp::LessOrEqual => a <= b,
            _ => false,
        }
    }

    /// Apply this operator to abstract elements.
    pub(crate) fn apply_element(
        &self,
        a: &PartialTensorElement,
        b: &PartialTensorElement,
    ) -> PartialTensorElement {
        use PartialTensorElement as Elem;

        match (self, a, b) {
            // Arithmetic on elements knows identities such as `x * 1 = x`,
            // so these are applied even if only one side is known.
            (BinaryOp::Add, _, _) => a.clone() + b.clone(),
            (BinaryOp::Sub, _, _) => a.clone() - b.clone(),
            (BinaryOp::Mul, _, _) => a.clone() * b.clone(),
            (BinaryOp::Div, _, _) => a.clone() / b.clone(),
            (BinaryOp::Equal, Elem::Param(a), Elem::Param(b)) if a == b => Elem::IntValue(1),
            (_, Elem::IntValue(a), Elem::IntValue(b)) => self
                .apply_int(*a, *b)
                .map(Elem::IntValue)
                .unwrap_or(Elem::Unknown),
            (_, Elem::FloatValue(a), Elem::FloatValue(b)) => {
                if self.is_comparison() {
                    Elem::IntValue(self.compare_float(*a, *b) as i64)
                } else {
                    Elem::FloatValue(self.apply_float(*a, *b))
                }
            }
            _ => Elem::Unknown,
        }
    }
}

/// Raise `base` to an int power, wrapping on overflow.
///
/// Negative exponents give the truncated result of `1 / base.pow(-exp)`.
fn int_pow(base: i64, exp: i64) -> i64 {
    if exp < 0 {
        return match base {
            1 => 1,
            -1 if exp % 2 == 0 => 1,
            -1 => -1,
            _ => 0,
        };
    }
    let exp = exp.min(u32::MAX as i64) as u32;
    base.wrapping_pow(exp)
}

impl InferShapes for BinaryOp {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let a = inputs.require(0)?;
        let b = inputs.require(1)?;
        if a.dtype() != b.dtype() {
            return Err(InferShapesError::IncorrectType(
                "inputs must have the same type",
            ));
        }

        let mut output = broadcast_output(&[a, b], self.output_dtype(a.dtype()))?;
        if self.can_fold() && self.supports(a.dtype()) {
            fold_broadcast(&mut output, &[a, b], |args| {
                self.apply_element(&args[0], &args[1])
            });
        }
        Ok(vec![output])
    }
}

impl Operator for BinaryOp {
    fn name(&self) -> &str {
        match self {
            BinaryOp::Add => "Add",
            BinaryOp::Sub => "Sub",
            BinaryOp::Mul => "Mul",
            BinaryOp::Div => "Div",
            BinaryOp::Pow => "Pow",
            BinaryOp::Mod { .. } => "Mod",
            BinaryOp::Min => "Min",
            BinaryOp::Max => "Max",
            BinaryOp::And => "And",
            BinaryOp::Or => "Or",
            BinaryOp::Xor => "Xor",
            BinaryOp::BitwiseAnd => "BitwiseAnd",
            BinaryOp::BitwiseOr => "BitwiseOr",
            BinaryOp::BitwiseXor => "BitwiseXor",
            BinaryOp::Equal => "Equal",
            BinaryOp::Greater => "Greater",
            BinaryOp::GreaterOrEqual => "GreaterOrEqual",
            BinaryOp::Less => "Less",
            BinaryOp::LessOrEqual => "LessOrEqual",
            BinaryOp::PRelu => "PRelu",
        }
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
        let a = inputs.require(0)?;
        let b = inputs.require(1)?;
        backend.binary(self, a, b, single_output(outputs)?)
    }
}

/// Evaluate a binary operator on int tensors.
pub fn binary_int(
    op: &BinaryOp,
    a: &Tensor<i64>,
    b: &Tensor<i64>,
    out: &mut Tensor<i64>,
) -> Result<(), OpError> {
    let mut div_by_zero = false;
    binary_map(a, b, out, |a, b| {
        op.apply_int(a, b).unwrap_or_else(|| {
            div_by_zero = true;
            0
        })
    });
    if div_by_zero {
        return Err(OpError::InvalidValue("division by zero"));
    }
    Ok(())
}

/// Select elements from `x` or `y` depending on a condition.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Where {}

impl InferShapes for Where {
    fn infer_shapes(&self, inputs: InferInputs) -> Result<Vec<PartialTensor>, InferShapesError> {
        let cond = inputs.require(0)?;
        let x = inputs.require(1)?;
        let y = inputs.require(2)?;
        if cond.dtype() != DataType::Int {
            return Err(InferShapesError::IncorrectType("condition must be an int tensor"));
        }
        if x.dtype() != y.dtype() {
            return Err(InferShapesError::IncorrectType(
                "inputs must have the same type",
            ));
        }

        let mut output = broadcast_output(&[cond, x, y], x.dtype())?;
        fold_broadcast(&mut output, &[cond, x, y], |args| match &args[0] {
            PartialTensorElement::IntValue(0) => args[2].clone(),
            PartialTensorElement::IntValue(_) => args[1].clone(),
            _ => args[1].merge(&args[2]),
        });
        Ok(vec![output])
    }
}

impl Operator for Where {
    fn name(&self) -> &str {
        "Where"
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
        let cond = inputs.require(0)?;
        let x = inputs.require(1)?;
        let y = inputs.require(2)?;
        backend.select(cond, x, y, single_output(outputs)?)
    }
}

/// Select elements from `x` where `cond` is non-zero and `y` otherwise.
pub fn select<T: Copy>(cond: &Tensor<i64>, x: &Tensor<T>, y: &Tensor<T>, out: &mut Tensor<T>) {
    let shape = out.shape().to_vec();
    for (((out, &cond), &x), &y) in out
        .iter_mut()
        .zip(cond.broadcast_iter(&shape))
        .zip(x.broadcast_iter(&shape))
        .zip(y.broadcast_iter(&shape))
    {
        *out = if cond != 0 { x } else { y };
    }
}

#[cfg(test)]
mod tests {
    use infergraph_shape_inference::{
        sym_shape, ErrorKind, InferInputs, InferShapes, PartialTensor, PartialTensorElement,
        SymbolicShape,
    };
    use infergraph_tensor::{DataType, Tensor};
    use infergraph_testing::TestCases;

    use super::{BinaryOp, Where};
    use crate::operator::OpError;
    use crate::ops::tests::{assert_folds, run_op};
    use crate::value::Value;

    #[test]
    fn test_add_broadcast() {
        let a: Value = Tensor::from_data(&[3, 1], vec![1., 2., 3.]).into();
        let b: Value = Tensor::from_data(&[1, 4], vec![10., 20., 30., 40.]).into();
        let result = run_op(&BinaryOp::Add, &[Some(&a), Some(&b)]).unwrap();
        assert_eq!(result[0].shape(), &[3, 4]);
        let result: Tensor<f32> = result[0].clone().try_into().unwrap();
        assert_eq!(result[[2, 3]], 43.);
        assert_eq!(result[[0, 1]], 21.);

        let outputs = BinaryOp::Add
            .infer_shapes(InferInputs::new(&[
                Some(PartialTensor::new(DataType::Float, sym_shape!(3, 1))),
                Some(PartialTensor::new(DataType::Float, sym_shape!(1, 4))),
            ]))
            .unwrap();
        assert_eq!(outputs[0].shape(), &sym_shape!(3, 4));
    }

    #[test]
    fn test_incompatible_shapes() {
        let err = BinaryOp::Mul
            .infer_shapes(InferInputs::new(&[
                Some(PartialTensor::new(DataType::Float, sym_shape!(2, 3))),
                Some(PartialTensor::new(DataType::Float, sym_shape!(3, 2))),
            ]))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Shape);
    }

    #[test]
    fn test_int_ops() {
        #[derive(Debug)]
        struct Case {
            op: BinaryOp,
            a: i64,
            b: i64,
            expected: Option<i64>,
        }

        let cases = [
            Case {
                op: BinaryOp::Div,
                a: -7,
                b: 2,
                expected: Some(-3),
            },
            Case {
                op: BinaryOp::Div,
                a: 1,
                b: 0,
                expected: None,
            },
            Case {
                op: BinaryOp::Mod { fmod: false },
                a: -7,
                b: 3,
                expected: Some(2),
            },
            Case {
                op: BinaryOp::Mod { fmod: true },
                a: -7,
                b: 3,
                expected: Some(-1),
            },
            Case {
                op: BinaryOp::Pow,
                a: 3,
                b: 4,
                expected: Some(81),
            },
            Case {
                op: BinaryOp::Pow,
                a: 2,
                b: -1,
                expected: Some(0),
            },
            Case {
                op: BinaryOp::Add,
                a: i64::MAX,
                b: 1,
                expected: Some(i64::MIN),
            },
            Case {
                op: BinaryOp::Xor,
                a: 5,
                b: 0,
                expected: Some(1),
            },
            Case {
                op: BinaryOp::BitwiseAnd,
                a: 6,
                b: 3,
                expected: Some(2),
            },
            Case {
                op: BinaryOp::LessOrEqual,
                a: 3,
                b: 3,
                expected: Some(1),
            },
        ];

        cases.test_each(|case| {
            assert_eq!(case.op.apply_int(case.a, case.b), case.expected);
        })
    }

    #[test]
    fn test_float_mod() {
        let op = BinaryOp::Mod { fmod: false };
        assert_eq!(op.apply_float(-7., 3.), 2.);
        let op = BinaryOp::Mod { fmod: true };
        assert_eq!(op.apply_float(-7., 3.), -1.);
    }

    #[test]
    fn test_div_by_zero() {
        let a: Value = Tensor::from_vec(vec![4i64, 5]).into();
        let b: Value = Tensor::from_vec(vec![2i64, 0]).into();
        let err = run_op(&BinaryOp::Div, &[Some(&a), Some(&b)]).err().unwrap();
        assert_eq!(err, OpError::InvalidValue("division by zero"));
        assert_eq!(err.kind(), ErrorKind::Value);

        // Abstract division by zero gives an unknown result.
        let outputs = BinaryOp::Div
            .infer_shapes(InferInputs::new(&[
                Some(a.to_partial()),
                Some(b.to_partial()),
            ]))
            .unwrap();
        assert_eq!(outputs[0].get(0), PartialTensorElement::IntValue(2));
        assert_eq!(outputs[0].get(1), PartialTensorElement::Unknown);
    }

    #[test]
    fn test_comparison_output_type() {
        let a: Value = Tensor::from_vec(vec![1., 5.]).into();
        let b: Value = Value::from(2.);
        let result = run_op(&BinaryOp::Greater, &[Some(&a), Some(&b)]).unwrap();
        assert_eq!(result[0], Value::from(Tensor::from_vec(vec![0i64, 1])));
    }

    #[test]
    fn test_fold() {
        let a: Value = Tensor::from_vec(vec![6i64, -7, 0]).into();
        let b: Value = Tensor::from_vec(vec![3i64, 2, 5]).into();
        let scalar: Value = Value::from(4i64);
        let fa: Value = Tensor::from_vec(vec![1.5f32, -2., 8.]).into();
        let fb: Value = Value::from(0.5f32);

        let ops = [
            BinaryOp::Add,
            BinaryOp::Sub,
            BinaryOp::Mul,
            BinaryOp::Div,
            BinaryOp::Mod { fmod: false },
            BinaryOp::Min,
            BinaryOp::Max,
            BinaryOp::Equal,
            BinaryOp::Greater,
            BinaryOp::Less,
        ];
        for op in ops {
            assert_folds(&op, &[&a, &b]);
            assert_folds(&op, &[&a, &scalar]);
            assert_folds(&op, &[&fa, &fb]);
        }
        for op in [BinaryOp::And, BinaryOp::Or, BinaryOp::BitwiseXor] {
            assert_folds(&op, &[&a, &b]);
        }
    }

    #[test]
    fn test_fold_symbolic() {
        let batch = PartialTensor::vector(
            DataType::Int,
            vec![PartialTensorElement::Param("batch".into())],
        );
        let one = PartialTensor::from_ints(&[1]);
        let zero = PartialTensor::from_int(0);

        let infer = |op: BinaryOp, a: &PartialTensor, b: &PartialTensor| {
            op.infer_shapes(InferInputs::new(&[Some(a.clone()), Some(b.clone())]))
                .unwrap()
                .remove(0)
        };

        assert_eq!(
            infer(BinaryOp::Mul, &batch, &one).get(0),
            PartialTensorElement::Param("batch".into())
        );
        assert_eq!(
            infer(BinaryOp::Add, &batch, &zero).get(0),
            PartialTensorElement::Param("batch".into())
        );
        assert_eq!(
            infer(BinaryOp::Equal, &batch, &batch).get(0),
            PartialTensorElement::IntValue(1)
        );
        assert_eq!(
            infer(BinaryOp::Max, &batch, &one).get(0),
            PartialTensorElement::Unknown
        );
    }

    #[test]
    fn test_shape_only_ops() {
        let a = PartialTensor::from_float(2.);
        let outputs = BinaryOp::Pow
            .infer_shapes(InferInputs::new(&[Some(a.clone()), Some(a)]))
            .unwrap();
        assert_eq!(outputs[0].shape(), &SymbolicShape::scalar());
        assert!(!outputs[0].has_known_values());
    }

    #[test]
    fn test_where() {
        let cond: Value = Tensor::from_data(&[2, 1], vec![1i64, 0]).into();
        let x: Value = Tensor::from_vec(vec![1., 2.]).into();
        let y: Value = Value::from(-1.);
        let result = run_op(&Where {}, &[Some(&cond), Some(&x), Some(&y)]).unwrap();
        assert_eq!(
            result[0],
            Value::from(Tensor::from_data(&[2, 2], vec![1., 2., -1., -1.]))
        );

        let cond: Value = Tensor::from_vec(vec![1i64, 0, 1]).into();
        let x: Value = Tensor::from_vec(vec![1i64, 2, 3]).into();
        let y: Value = Value::from(9i64);
        assert_folds(&Where {}, &[&cond, &x, &y]);
    }
}
