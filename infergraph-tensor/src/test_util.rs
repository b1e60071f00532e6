//! Utilities for comparing tensors in tests.

use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::iter::zip;

use crate::{Indices, Tensor};

/// Trait that tests whether two values are approximately equal.
///
/// The comparison uses both an absolute and a relative tolerance, in the
/// same way as NumPy's `np.allclose`.
pub trait ApproxEq: Sized {
    fn default_abs_tolerance() -> Self;

    fn default_rel_tolerance() -> Self;

    /// Test whether `self` is "close" to `other` according to the formula:
    ///
    /// ```text
    /// (self - other).abs() <= atol + rtol * other.abs()
    /// ```
    fn approx_eq_with_atol_rtol(&self, other: &Self, atol: Self, rtol: Self) -> bool;

    /// Test if `other` is approximately equal to `self` with the default
    /// tolerances for this type.
    fn approx_eq(&self, other: &Self) -> bool {
        self.approx_eq_with_atol_rtol(
            other,
            Self::default_abs_tolerance(),
            Self::default_rel_tolerance(),
        )
    }
}

impl ApproxEq for f32 {
    fn default_abs_tolerance() -> f32 {
        1e-6
    }

    fn default_rel_tolerance() -> f32 {
        1e-5
    }

    fn approx_eq_with_atol_rtol(&self, other: &f32, atol: f32, rtol: f32) -> bool {
        if self.is_nan() || other.is_nan() {
            return self.is_nan() && other.is_nan();
        }
        if self.is_infinite() || other.is_infinite() {
            return self == other;
        }
        (self - other).abs() <= atol + rtol * other.abs()
    }
}

impl ApproxEq for i64 {
    fn default_abs_tolerance() -> i64 {
        0
    }

    fn default_rel_tolerance() -> i64 {
        0
    }

    fn approx_eq_with_atol_rtol(&self, other: &i64, atol: i64, rtol: i64) -> bool {
        (self - other).abs() <= atol + rtol * other.abs()
    }
}

#[derive(Debug)]
pub enum ExpectEqualError {
    ShapeMismatch(String),
    ValueMismatch(String),
}

impl Display for ExpectEqualError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectEqualError::ShapeMismatch(details) => write!(f, "{}", details),
            ExpectEqualError::ValueMismatch(details) => write!(f, "{}", details),
        }
    }
}

impl Error for ExpectEqualError {}

/// Check that two tensors have the same shape and approximately equal
/// contents.
///
/// NaN values compare equal to each other. On mismatch this returns an `Err`
/// with the count of mismatches and details of the first few.
pub fn expect_equal<T>(x: &Tensor<T>, y: &Tensor<T>) -> Result<(), ExpectEqualError>
where
    T: Clone + Debug + ApproxEq,
{
    expect_equal_with_tolerance(x, y, T::default_abs_tolerance(), T::default_rel_tolerance())
}

/// Variant of [`expect_equal`] with custom tolerances.
pub fn expect_equal_with_tolerance<T>(
    x: &Tensor<T>,
    y: &Tensor<T>,
    atol: T,
    rtol: T,
) -> Result<(), ExpectEqualError>
where
    T: Clone + Debug + ApproxEq,
{
    if x.shape() != y.shape() {
        return Err(ExpectEqualError::ShapeMismatch(format!(
            "Tensors have different shapes. {:?} vs. {:?}",
            x.shape(),
            y.shape()
        )));
    }

    let mismatches: Vec<_> = zip(Indices::from_shape(x.shape()), zip(x.iter(), y.iter()))
        .filter(|(_, (xi, yi))| !xi.approx_eq_with_atol_rtol(yi, atol.clone(), rtol.clone()))
        .map(|(index, (xi, yi))| (index.to_vec(), xi, yi))
        .collect();

    if mismatches.is_empty() {
        return Ok(());
    }

    let max_examples = 16;
    Err(ExpectEqualError::ValueMismatch(format!(
        "Tensor values differ at {} of {} indexes: {:?}{}",
        mismatches.len(),
        x.len(),
        &mismatches[..mismatches.len().min(max_examples)],
        if mismatches.len() > max_examples {
            "..."
        } else {
            ""
        }
    )))
}

#[cfg(test)]
mod tests {
    use super::{expect_equal, ApproxEq};
    use crate::Tensor;

    #[test]
    fn test_approx_eq_f32() {
        let vals = [-1000., -5., -0.5, 0., 0.5, 5., 1000.];
        for val in vals {
            assert!(val.approx_eq(&val));
            let close = val + 9e-7 + val * 9e-6;
            assert!(val.approx_eq(&close));
            assert!(!val.approx_eq(&(val + 1.)));
        }
        assert!(f32::NAN.approx_eq(&f32::NAN));
        assert!(!f32::INFINITY.approx_eq(&f32::NEG_INFINITY));
    }

    #[test]
    fn test_expect_equal() {
        let a = Tensor::from_data(&[2, 2], vec![1., 2., 3., 4.]);
        let b = Tensor::from_data(&[2, 2], vec![1., 2., 3., 4.5]);
        assert!(expect_equal(&a, &a).is_ok());

        let err = expect_equal(&a, &b).err().unwrap();
        assert!(err.to_string().contains("differ at 1 of 4 indexes"));

        let c = Tensor::from_vec(vec![1., 2., 3., 4.]);
        let err = expect_equal(&a, &c).err().unwrap();
        assert!(err.to_string().contains("different shapes"));
    }
}
