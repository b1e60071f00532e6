use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::sync::Arc;

use crate::infer_shapes::InferShapesError;

/// A dimension size that may be known, named or unknown.
///
/// `Param` dimensions are named model inputs such as "batch" or "seq_len".
/// Two `Param` dims with the same name always have the same size at runtime.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum SymbolicDim {
    Unknown,
    Param(Arc<str>),
    Value(i64),
}

impl SymbolicDim {
    /// Create a named dimension.
    pub fn param(name: &str) -> SymbolicDim {
        SymbolicDim::Param(name.into())
    }

    /// Return the size of this dimension if it is known.
    pub fn value(&self) -> Option<i64> {
        match self {
            SymbolicDim::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, SymbolicDim::Value(_))
    }

    pub fn is_param(&self) -> bool {
        matches!(self, SymbolicDim::Param(_))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, SymbolicDim::Unknown)
    }

    /// Return true if this dimension is statically known to equal `size`.
    pub fn is(&self, size: i64) -> bool {
        self.value() == Some(size)
    }

    /// Lattice join of two dims.
    ///
    /// The result is only as precise as what both inputs agree on.
    pub fn merge(&self, other: &SymbolicDim) -> SymbolicDim {
        match (self, other) {
            (SymbolicDim::Value(a), SymbolicDim::Value(b)) if a == b => SymbolicDim::Value(*a),
            (SymbolicDim::Param(a), SymbolicDim::Param(b)) if a == b => self.clone(),
            _ => SymbolicDim::Unknown,
        }
    }

    /// Combine two descriptions of the same runtime dimension, keeping the
    /// most precise information from each.
    ///
    /// Fails if both are known values that disagree.
    pub fn refine(&self, other: &SymbolicDim) -> Result<SymbolicDim, InferShapesError> {
        match (self, other) {
            (SymbolicDim::Value(a), SymbolicDim::Value(b)) => {
                if a == b {
                    Ok(self.clone())
                } else {
                    Err(InferShapesError::IncompatibleShapes(
                        "dimension sizes do not match",
                    ))
                }
            }
            (SymbolicDim::Value(_), _) => Ok(self.clone()),
            (_, SymbolicDim::Value(_)) => Ok(other.clone()),
            (SymbolicDim::Param(_), _) => Ok(self.clone()),
            (_, SymbolicDim::Param(_)) => Ok(other.clone()),
            (SymbolicDim::Unknown, SymbolicDim::Unknown) => Ok(SymbolicDim::Unknown),
        }
    }

    /// Integer division rounding up, used for strided output sizes.
    pub fn div_ceil(&self, rhs: &SymbolicDim) -> SymbolicDim {
        match (self, rhs) {
            (x, SymbolicDim::Value(1)) => x.clone(),
            (SymbolicDim::Value(a), SymbolicDim::Value(b)) if *b != 0 => {
                SymbolicDim::Value(-floor_div(-a, *b))
            }
            _ => SymbolicDim::Unknown,
        }
    }

    /// Return the larger of two dims, if known.
    pub fn max(&self, rhs: &SymbolicDim) -> SymbolicDim {
        match (self, rhs) {
            (SymbolicDim::Value(a), SymbolicDim::Value(b)) => SymbolicDim::Value(*a.max(b)),
            (a, b) if a == b && !a.is_unknown() => a.clone(),
            _ => SymbolicDim::Unknown,
        }
    }
}

/// Division which rounds towards negative infinity.
fn floor_div(a: i64, b: i64) -> i64 {
    let q = a / b;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

impl From<i64> for SymbolicDim {
    fn from(val: i64) -> Self {
        SymbolicDim::Value(val)
    }
}

impl From<i32> for SymbolicDim {
    fn from(val: i32) -> Self {
        SymbolicDim::Value(val as i64)
    }
}

impl From<usize> for SymbolicDim {
    fn from(val: usize) -> Self {
        SymbolicDim::Value(val as i64)
    }
}

impl From<&str> for SymbolicDim {
    fn from(name: &str) -> Self {
        SymbolicDim::param(name)
    }
}

impl fmt::Display for SymbolicDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolicDim::Unknown => write!(f, "?"),
            SymbolicDim::Param(name) => write!(f, "{}", name),
            SymbolicDim::Value(val) => write!(f, "{}", val),
        }
    }
}

/// Lift a checked integer operation over two dims. Overflow gives `Unknown`.
fn lift(
    lhs: &SymbolicDim,
    rhs: &SymbolicDim,
    op: impl Fn(i64, i64) -> Option<i64>,
) -> SymbolicDim {
    match (lhs, rhs) {
        (SymbolicDim::Value(a), SymbolicDim::Value(b)) => {
            op(*a, *b).map(SymbolicDim::Value).unwrap_or(SymbolicDim::Unknown)
        }
        _ => SymbolicDim::Unknown,
    }
}

impl Add for SymbolicDim {
    type Output = SymbolicDim;

    fn add(self, rhs: SymbolicDim) -> SymbolicDim {
        match (&self, &rhs) {
            (x, SymbolicDim::Value(0)) => x.clone(),
            (SymbolicDim::Value(0), x) => x.clone(),
            _ => lift(&self, &rhs, i64::checked_add),
        }
    }
}

impl Sub for SymbolicDim {
    type Output = SymbolicDim;

    fn sub(self, rhs: SymbolicDim) -> SymbolicDim {
        match (&self, &rhs) {
            (x, SymbolicDim::Value(0)) => x.clone(),
            (SymbolicDim::Param(a), SymbolicDim::Param(b)) if a == b => SymbolicDim::Value(0),
            _ => lift(&self, &rhs, i64::checked_sub),
        }
    }
}

impl Mul for SymbolicDim {
    type Output = SymbolicDim;

    fn mul(self, rhs: SymbolicDim) -> SymbolicDim {
        match (&self, &rhs) {
            (x, SymbolicDim::Value(1)) => x.clone(),
            (SymbolicDim::Value(1), x) => x.clone(),
            (_, SymbolicDim::Value(0)) | (SymbolicDim::Value(0), _) => SymbolicDim::Value(0),
            _ => lift(&self, &rhs, i64::checked_mul),
        }
    }
}

impl Div for SymbolicDim {
    type Output = SymbolicDim;

    fn div(self, rhs: SymbolicDim) -> SymbolicDim {
        match (&self, &rhs) {
            (x, SymbolicDim::Value(1)) => x.clone(),
            _ => lift(&self, &rhs, |a, b| (b != 0).then(|| floor_div(a, b))),
        }
    }
}

impl Add<i64> for SymbolicDim {
    type Output = SymbolicDim;

    fn add(self, rhs: i64) -> SymbolicDim {
        self + SymbolicDim::Value(rhs)
    }
}

impl Sub<i64> for SymbolicDim {
    type Output = SymbolicDim;

    fn sub(self, rhs: i64) -> SymbolicDim {
        self - SymbolicDim::Value(rhs)
    }
}

impl Mul<i64> for SymbolicDim {
    type Output = SymbolicDim;

    fn mul(self, rhs: i64) -> SymbolicDim {
        self * SymbolicDim::Value(rhs)
    }
}

impl Div<i64> for SymbolicDim {
    type Output = SymbolicDim;

    fn div(self, rhs: i64) -> SymbolicDim {
        self / SymbolicDim::Value(rhs)
    }
}

/// Broadcast two dims following NumPy's rules.
///
/// Fails if both dims are known, different and neither is 1. A dim which is
/// not statically known broadcasts to `Unknown` unless the other side is 1
/// or the same parameter. The rule is commutative.
pub fn broadcast_dim(a: &SymbolicDim, b: &SymbolicDim) -> Result<SymbolicDim, InferShapesError> {
    let dim = match (a, b) {
        (SymbolicDim::Value(1), b) => b.clone(),
        (a, SymbolicDim::Value(1)) => a.clone(),
        (SymbolicDim::Value(x), SymbolicDim::Value(y)) => {
            if x == y {
                a.clone()
            } else {
                return Err(InferShapesError::IncompatibleShapes(
                    "dimensions cannot be broadcast together",
                ));
            }
        }

        // The other side could still be 1 at runtime, or fail to broadcast.

        (SymbolicDim::Param(x), SymbolicDim::Param(y)) if x == y => a.clone(),
        _ => SymbolicDim::Unknown,
    };
    Ok(dim)
}

#[cfg(test)]
mod tests {
    use infergraph_testing::TestCases;

    use super::{broadcast_dim, SymbolicDim};

    fn p(name: &str) -> SymbolicDim {
        SymbolicDim::param(name)
    }

    fn v(val: i64) -> SymbolicDim {
        SymbolicDim::Value(val)
    }

    #[test]
    fn test_merge() {
        #[derive(Debug)]
        struct Case {
            a: SymbolicDim,
            b: SymbolicDim,
            expected: SymbolicDim,
        }

        let cases = [
            Case {
                a: v(3),
                b: v(3),
                expected: v(3),
            },
            Case {
                a: v(3),
                b: v(4),
                expected: SymbolicDim::Unknown,
            },
            Case {
                a: p("batch"),
                b: p("batch"),
                expected: p("batch"),
            },
            Case {
                a: p("batch"),
                b: p("seq"),
                expected: SymbolicDim::Unknown,
            },
            Case {
                a: p("batch"),
                b: v(1),
                expected: SymbolicDim::Unknown,
            },
            Case {
                a: v(5),
                b: SymbolicDim::Unknown,
                expected: SymbolicDim::Unknown,
            },
        ];

        cases.test_each(|case| {
            assert_eq!(case.a.merge(&case.b), case.expected);
            assert_eq!(case.b.merge(&case.a), case.expected);
        })
    }

    #[test]
    fn test_merge_is_monotonic() {
        let dims = [SymbolicDim::Unknown, p("a"), p("b"), v(0), v(1), v(7)];
        for a in &dims {
            assert_eq!(a.merge(&SymbolicDim::Unknown), SymbolicDim::Unknown);
            for b in &dims {
                let merged = a.merge(b);
                // A merged dim is never more precise than either input.
                if merged != SymbolicDim::Unknown {
                    assert_eq!(&merged, a);
                    assert_eq!(&merged, b);
                }
            }
        }
    }

    #[test]
    fn test_refine() {
        assert_eq!(v(3).refine(&SymbolicDim::Unknown), Ok(v(3)));
        assert_eq!(p("n").refine(&v(4)), Ok(v(4)));
        assert_eq!(SymbolicDim::Unknown.refine(&p("n")), Ok(p("n")));
        assert!(v(3).refine(&v(4)).is_err());
    }

    #[test]
    fn test_arithmetic() {
        #[derive(Debug)]
        struct Case {
            result: SymbolicDim,
            expected: SymbolicDim,
        }

        let cases = [
            Case {
                result: v(2) + v(3),
                expected: v(5),
            },
            Case {
                result: p("n") + v(0),
                expected: p("n"),
            },
            Case {
                result: p("n") + v(1),
                expected: SymbolicDim::Unknown,
            },
            Case {
                result: p("n") - v(0),
                expected: p("n"),
            },
            Case {
                result: p("n") - p("n"),
                expected: v(0),
            },
            Case {
                result: v(1) * p("n"),
                expected: p("n"),
            },
            Case {
                result: p("n") * v(0),
                expected: v(0),
            },
            Case {
                result: SymbolicDim::Unknown * v(3),
                expected: SymbolicDim::Unknown,
            },
            Case {
                result: p("n") / v(1),
                expected: p("n"),
            },
            Case {
                result: v(7) / v(2),
                expected: v(3),
            },
            Case {
                result: v(7) / v(0),
                expected: SymbolicDim::Unknown,
            },
            Case {
                result: v(-7) / v(2),
                expected: v(-4),
            },
            Case {
                result: v(7).div_ceil(&v(2)),
                expected: v(4),
            },
            Case {
                result: v(i64::MAX) + v(1),
                expected: SymbolicDim::Unknown,
            },
        ];

        cases.test_each(|case| assert_eq!(case.result, case.expected))
    }

    #[test]
    fn test_broadcast_dim() {
        #[derive(Debug)]
        struct Case {
            a: SymbolicDim,
            b: SymbolicDim,
            expected: Option<SymbolicDim>,
        }

        let cases = [
            Case {
                a: v(1),
                b: v(4),
                expected: Some(v(4)),
            },
            Case {
                a: v(3),
                b: v(3),
                expected: Some(v(3)),
            },
            Case {
                a: v(3),
                b: v(4),
                expected: None,
            },
            Case {
                a: p("n"),
                b: v(1),
                expected: Some(p("n")),
            },
            Case {
                a: p("n"),
                b: v(5),
                expected: Some(SymbolicDim::Unknown),
            },
            Case {
                a: SymbolicDim::Unknown,
                b: v(5),
                expected: Some(SymbolicDim::Unknown),
            },
            Case {
                a: p("n"),
                b: p("n"),
                expected: Some(p("n")),
            },
            Case {
                a: p("n"),
                b: p("m"),
                expected: Some(SymbolicDim::Unknown),
            },
            Case {
                a: SymbolicDim::Unknown,
                b: v(1),
                expected: Some(SymbolicDim::Unknown),
            },
            Case {
                a: v(0),
                b: v(1),
                expected: Some(v(0)),
            },
        ];

        cases.test_each(|case| {
            assert_eq!(broadcast_dim(&case.a, &case.b).ok(), case.expected);
            assert_eq!(broadcast_dim(&case.b, &case.a).ok(), case.expected);
        })
    }

    #[test]
    fn test_broadcast_dim_is_associative() {
        let dims = [SymbolicDim::Unknown, p("a"), p("b"), v(0), v(1), v(3), v(4)];
        for a in &dims {
            for b in &dims {
                for c in &dims {
                    let left = broadcast_dim(a, b).and_then(|ab| broadcast_dim(&ab, c));
                    let right = broadcast_dim(b, c).and_then(|bc| broadcast_dim(a, &bc));

                    // Grouping can hide a conflict between known dims behind
                    // an `Unknown`, eg. `3, 4, ?`. Where both groupings
                    // succeed, they agree.
                    if let (Ok(left), Ok(right)) = (left, right) {
                        assert_eq!(left, right, "a={} b={} c={}", a, b, c);
                    }
                }
            }
        }
    }
}
