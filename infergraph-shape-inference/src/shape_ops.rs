//! Shape arithmetic shared by shape inference and operator execution.
//!
//! These functions are used both with symbolic shapes, when inferring shapes
//! ahead of execution, and with fully known shapes, when computing the size
//! of operator outputs at runtime.

use crate::infer_shapes::InferShapesError;
use crate::sym_dim::SymbolicDim;
use crate::sym_shape::SymbolicShape;

/// Compute the output shape of a `Reshape` operation.
///
/// `target` is the requested shape. It may contain one `-1` entry, whose size
/// is inferred from the input's element count. A `0` entry copies the
/// corresponding input dimension unless `allow_zero` is set, in which case it
/// is a literal zero.
pub fn reshape_shape(
    input: &SymbolicShape,
    target: &SymbolicShape,
    allow_zero: bool,
) -> Result<SymbolicShape, InferShapesError> {
    let Some(target_dims) = target.dims() else {
        return Ok(SymbolicShape::unknown());
    };

    let mut fill_index = None;
    let mut dims: Vec<SymbolicDim> = Vec::with_capacity(target_dims.len());
    for (i, dim) in target_dims.iter().enumerate() {
        let dim = match dim {
            SymbolicDim::Value(-1) => {
                if fill_index.is_some() {
                    return Err(InferShapesError::InvalidValue(
                        "multiple -1 entries in reshape target",
                    ));
                }
                fill_index = Some(i);
                SymbolicDim::Unknown
            }
            SymbolicDim::Value(size) if *size < -1 => {
                return Err(InferShapesError::InvalidValue(
                    "invalid entry in reshape target",
                ));
            }
            SymbolicDim::Value(0) if !allow_zero => {
                if input.rank().is_some_and(|rank| i >= rank) {
                    return Err(InferShapesError::InvalidValue(
                        "zero entry in reshape target has no corresponding input dim",
                    ));
                }
                input.dim(i)
            }
            other => other.clone(),
        };
        dims.push(dim);
    }

    if allow_zero && fill_index.is_some() && target_dims.iter().any(|d| d.is(0)) {
        return Err(InferShapesError::InvalidValue(
            "reshape target cannot contain both 0 and -1 when zeros are allowed",
        ));
    }

    let input_len = input.num_elements();
    if let Some(fill_index) = fill_index {
        let known_len = dims
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != fill_index)
            .fold(SymbolicDim::Value(1), |acc, (_, dim)| acc * dim.clone());
        dims[fill_index] = match (input_len.value(), known_len.value()) {
            (Some(_), Some(0)) => {
                return Err(InferShapesError::InvalidValue(
                    "cannot infer -1 entry when other dims are zero",
                ));
            }
            (Some(total), Some(known)) => {
                if total % known != 0 {
                    return Err(InferShapesError::InvalidValue(
                        "input size is not divisible by reshape target size",
                    ));
                }
                SymbolicDim::Value(total / known)
            }
            _ if !input_len.is_unknown() && input_len == known_len => SymbolicDim::Value(1),
            _ => SymbolicDim::Unknown,
        };
    } else {
        let output_len = dims
            .iter()
            .cloned()
            .fold(SymbolicDim::Value(1), |acc, dim| acc * dim);
        if let (Some(in_len), Some(out_len)) = (input_len.value(), output_len.value()) {
            if in_len != out_len {
                return Err(InferShapesError::IncompatibleShapes(
                    "reshape target size does not match input size",
                ));
            }
        }
    }

    Ok(SymbolicShape::from_dims(dims))
}

/// Range of indices selected along one axis by a `Slice` operation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SliceRange {
    /// Index of the first selected element. Only meaningful if `len > 0`.
    pub start: i64,

    /// Step between selected elements. Never zero.
    pub step: i64,

    /// Number of selected elements.
    pub len: usize,
}

impl SliceRange {
    /// Resolve a slice of a dimension of size `dim`.
    ///
    /// Negative `start` and `end` values count back from the end of the
    /// dimension. Both are then clamped to `[0, dim]` for positive steps and
    /// `[-1, dim - 1]` for negative steps.
    pub fn resolve(dim: i64, start: i64, end: i64, step: i64) -> Result<SliceRange, InferShapesError> {
        if step == 0 {
            return Err(InferShapesError::InvalidValue("slice step cannot be zero"));
        }

        let adjust = |index: i64| {
            if index < 0 {
                index.saturating_add(dim)
            } else {
                index
            }
        };
        let (start, end) = (adjust(start), adjust(end));
        let (start, end) = if step > 0 {
            (start.clamp(0, dim), end.clamp(0, dim))
        } else {
            (start.clamp(-1, dim - 1), end.clamp(-1, dim - 1))
        };

        // Ceiling division of a value by a step with the same sign.
        let span = end - start;
        let len = if (span > 0 && step > 0) || (span < 0 && step < 0) {
            let (span, step) = (span.abs(), step.abs());
            (span + step - 1) / step
        } else {
            0
        };

        Ok(SliceRange {
            start,
            step,
            len: len as usize,
        })
    }

    /// Return the index of the `i`th selected element.
    pub fn index(&self, i: usize) -> usize {
        (self.start + i as i64 * self.step) as usize
    }
}

/// Compute the output size of a sliced dimension.
///
/// The result is unknown unless the dimension and all slice parameters are
/// known.
pub fn slice_dim(
    dim: &SymbolicDim,
    start: Option<i64>,
    end: Option<i64>,
    step: Option<i64>,
) -> Result<SymbolicDim, InferShapesError> {
    if step == Some(0) {
        return Err(InferShapesError::InvalidValue("slice step cannot be zero"));
    }
    match (dim.value(), start, end, step) {
        (Some(size), Some(start), Some(end), Some(step)) => {
            let range = SliceRange::resolve(size, start, end, step)?;
            Ok(SymbolicDim::from(range.len))
        }
        // Slicing the whole of an axis, eg. `x[0:]`, preserves its size.
        (_, Some(0), Some(end), Some(1)) if end == i64::MAX => Ok(dim.clone()),
        _ => Ok(SymbolicDim::Unknown),
    }
}

/// Compute the output shape of a `Pad` operation.
///
/// `pads` has `2 * rank` entries. The first `rank` entries are the padding
/// added at the start of each axis and the rest are the padding added at the
/// end. `None` entries are unknown.
pub fn pad_shape(
    input: &SymbolicShape,
    pads: &[Option<i64>],
) -> Result<SymbolicShape, InferShapesError> {
    let Some(dims) = input.dims() else {
        if pads.len() % 2 != 0 {
            return Err(InferShapesError::InvalidValue("pads length must be even"));
        }
        return Ok(SymbolicShape::of_rank(pads.len() / 2));
    };
    if pads.len() != dims.len() * 2 {
        return Err(InferShapesError::InvalidValue(
            "pads length must be twice the input rank",
        ));
    }

    let (begin, end) = pads.split_at(dims.len());
    dims.iter()
        .zip(begin.iter().zip(end))
        .map(|(dim, (begin, end))| match (begin, end) {
            (Some(begin), Some(end)) => {
                let total = begin
                    .checked_add(*end)
                    .ok_or(InferShapesError::InvalidValue("padding is too large"))?;
                let padded = dim.clone() + SymbolicDim::Value(total);
                if padded.value().is_some_and(|size| size < 0) {
                    return Err(InferShapesError::InvalidValue(
                        "negative padding exceeds input size",
                    ));
                }
                Ok(padded)
            }
            _ => Ok(SymbolicDim::Unknown),
        })
        .collect()
}

/// Compute the output shape of a `Tile` operation.
pub fn tile_shape(
    input: &SymbolicShape,
    repeats: &[SymbolicDim],
) -> Result<SymbolicShape, InferShapesError> {
    if repeats.iter().any(|r| r.value().is_some_and(|r| r < 0)) {
        return Err(InferShapesError::InvalidValue("repeats must be non-negative"));
    }
    let Some(dims) = input.dims() else {
        return Ok(SymbolicShape::of_rank(repeats.len()));
    };
    if repeats.len() != dims.len() {
        return Err(InferShapesError::InvalidValue(
            "repeats length must match input rank",
        ));
    }
    Ok(dims
        .iter()
        .zip(repeats)
        .map(|(dim, repeat)| dim.clone() * repeat.clone())
        .collect())
}

#[cfg(test)]
mod tests {
    use infergraph_testing::TestCases;

    use super::{pad_shape, reshape_shape, slice_dim, tile_shape, SliceRange};
    use crate::infer_shapes::{ErrorKind, InferShapesError};
    use crate::sym_dim::SymbolicDim;
    use crate::sym_shape;
    use crate::sym_shape::SymbolicShape;

    #[test]
    fn test_reshape_shape() {
        #[derive(Debug)]
        struct Case {
            input: SymbolicShape,
            target: SymbolicShape,
            allow_zero: bool,
            expected: Result<SymbolicShape, ErrorKind>,
        }

        let cases = [
            Case {
                input: sym_shape!(2, 3, 4),
                target: sym_shape!(-1, 4),
                allow_zero: false,
                expected: Ok(sym_shape!(6, 4)),
            },
            Case {
                input: sym_shape!("batch", 3, 4),
                target: sym_shape!(0, -1),
                allow_zero: false,
                expected: Ok(sym_shape!("batch", SymbolicDim::Unknown)),
            },
            Case {
                input: sym_shape!("batch", 12),
                target: sym_shape!(0, 3, 4),
                allow_zero: false,
                expected: Ok(sym_shape!("batch", 3, 4)),
            },
            Case {
                input: sym_shape!(0, 4),
                target: sym_shape!(0, 2),
                allow_zero: true,
                expected: Ok(sym_shape!(0, 2)),
            },
            Case {
                input: sym_shape!(2, 3),
                target: sym_shape!(-1, -1),
                allow_zero: false,
                expected: Err(ErrorKind::Value),
            },
            Case {
                input: sym_shape!(2, 3),
                target: sym_shape!(-1, 4),
                allow_zero: false,
                expected: Err(ErrorKind::Value),
            },
            Case {
                input: sym_shape!(2, 3),
                target: sym_shape!(5),
                allow_zero: false,
                expected: Err(ErrorKind::Shape),
            },
            Case {
                input: sym_shape!("n", 4),
                target: sym_shape!("n", -1),
                allow_zero: false,
                expected: Ok(sym_shape!("n", SymbolicDim::Unknown)),
            },
            Case {
                input: sym_shape!(2, 3),
                target: SymbolicShape::unknown(),
                allow_zero: false,
                expected: Ok(SymbolicShape::unknown()),
            },
        ];

        cases.test_each(|case| {
            let result = reshape_shape(&case.input, &case.target, case.allow_zero);
            assert_eq!(result.map_err(|e| e.kind()), case.expected);
        })
    }

    #[test]
    fn test_slice_range() {
        #[derive(Debug)]
        struct Case {
            dim: i64,
            start: i64,
            end: i64,
            step: i64,
            expected_len: usize,
            expected_indices: Vec<usize>,
        }

        let cases = [
            Case {
                dim: 5,
                start: 1,
                end: 4,
                step: 1,
                expected_len: 3,
                expected_indices: vec![1, 2, 3],
            },
            Case {
                dim: 5,
                start: 0,
                end: i64::MAX,
                step: 2,
                expected_len: 3,
                expected_indices: vec![0, 2, 4],
            },
            Case {
                dim: 5,
                start: -1,
                end: i64::MIN,
                step: -1,
                expected_len: 5,
                expected_indices: vec![4, 3, 2, 1, 0],
            },
            Case {
                dim: 5,
                start: 10,
                end: -10,
                step: -2,
                expected_len: 3,
                expected_indices: vec![4, 2, 0],
            },
            Case {
                dim: 5,
                start: 3,
                end: 1,
                step: 1,
                expected_len: 0,
                expected_indices: vec![],
            },
            Case {
                dim: 0,
                start: 0,
                end: 10,
                step: 1,
                expected_len: 0,
                expected_indices: vec![],
            },
        ];

        cases.test_each(|case| {
            let range = SliceRange::resolve(case.dim, case.start, case.end, case.step).unwrap();
            assert_eq!(range.len, case.expected_len);
            let indices: Vec<_> = (0..range.len).map(|i| range.index(i)).collect();
            assert_eq!(indices, case.expected_indices);
        });

        assert_eq!(
            SliceRange::resolve(5, 0, 5, 0),
            Err(InferShapesError::InvalidValue("slice step cannot be zero"))
        );
    }

    #[test]
    fn test_slice_dim() {
        assert_eq!(
            slice_dim(&SymbolicDim::Value(10), Some(2), Some(-2), Some(1)),
            Ok(SymbolicDim::Value(6))
        );
        assert_eq!(
            slice_dim(&SymbolicDim::param("n"), Some(0), Some(i64::MAX), Some(1)),
            Ok(SymbolicDim::param("n"))
        );
        assert_eq!(
            slice_dim(&SymbolicDim::param("n"), Some(1), None, Some(1)),
            Ok(SymbolicDim::Unknown)
        );
        assert!(slice_dim(&SymbolicDim::Value(3), None, None, Some(0)).is_err());
    }

    #[test]
    fn test_pad_shape() {
        assert_eq!(
            pad_shape(&sym_shape!(2, "n"), &[Some(1), Some(0), Some(1), Some(2)]),
            Ok(sym_shape!(4, SymbolicDim::Unknown))
        );
        assert_eq!(
            pad_shape(&sym_shape!(2, 3), &[Some(1), None, Some(1), Some(2)]),
            Ok(sym_shape!(4, SymbolicDim::Unknown))
        );
        assert_eq!(
            pad_shape(&sym_shape!(2, 3), &[Some(1), Some(1)]).map_err(|e| e.kind()),
            Err(ErrorKind::Value)
        );
        assert_eq!(
            pad_shape(&SymbolicShape::unknown(), &[Some(1); 6]),
            Ok(SymbolicShape::of_rank(3))
        );
        assert_eq!(
            pad_shape(&sym_shape!(2), &[Some(i64::MAX), Some(1)]).map_err(|e| e.kind()),
            Err(ErrorKind::Value)
        );
    }

    #[test]
    fn test_tile_shape() {
        let repeats = [SymbolicDim::Value(2), SymbolicDim::Value(3)];
        assert_eq!(
            tile_shape(&sym_shape!(2, "n"), &repeats),
            Ok(sym_shape!(4, SymbolicDim::Unknown))
        );
        assert_eq!(
            tile_shape(&sym_shape!(2, 1), &repeats),
            Ok(sym_shape!(4, 3))
        );
        assert!(tile_shape(&sym_shape!(2), &repeats).is_err());
    }
}
