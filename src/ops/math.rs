//! Scalar math functions not provided by the standard library.

// Coefficients of the Abramowitz and Stegun approximation 7.1.26.
const ERF_P: f32 = 0.3275911;
const ERF_A0: f32 = 0.254829592;
const ERF_A1: f32 = -0.284496736;
const ERF_A2: f32 = 1.421413741;
const ERF_A3: f32 = -1.453152027;
const ERF_A4: f32 = 1.061405429;

/// Approximate the error function.
///
/// The maximum absolute error is about 1.5e-7.
pub fn erf(x: f32) -> f32 {
    // The approximation is valid for x >= 0. Use `erf(-x) = -erf(x)` for
    // negative inputs.
    let abs_x = x.abs();
    let t = 1.0 / (1.0 + ERF_P * abs_x);
    let poly = t * (ERF_A0 + t * (ERF_A1 + t * (ERF_A2 + t * (ERF_A3 + t * ERF_A4))));
    let y = 1.0 - poly * (-abs_x * abs_x).exp();
    y.copysign(x)
}

#[cfg(test)]
mod tests {
    use super::erf;

    #[test]
    fn test_erf() {
        let mut x = -6.0f32;
        while x <= 6.0 {
            let expected = libm::erff(x);
            let actual = erf(x);
            assert!(
                (actual - expected).abs() <= 1e-6,
                "erf({}) = {}, expected {}",
                x,
                actual,
                expected
            );
            x += 0.01;
        }

        assert!(erf(0.).abs() < 1e-6);
        assert_eq!(erf(f32::INFINITY), 1.);
        assert_eq!(erf(f32::NEG_INFINITY), -1.);
        assert!(erf(f32::NAN).is_nan());
    }
}
