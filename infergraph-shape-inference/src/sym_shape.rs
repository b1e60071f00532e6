use std::fmt;

use smallvec::SmallVec;

use crate::infer_shapes::{resolve_axis, InferShapesError};
use crate::sym_dim::{broadcast_dim, SymbolicDim};

pub type SymbolicDims = SmallVec<[SymbolicDim; 4]>;

/// Shape of a tensor whose dimensions and rank may not be fully known.
///
/// A rank-unknown shape has no dimension list at all. Once a rank has been
/// declared it cannot change.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SymbolicShape {
    dims: Option<SymbolicDims>,
}

impl SymbolicShape {
    /// Return a shape whose rank is unknown.
    pub fn unknown() -> SymbolicShape {
        SymbolicShape { dims: None }
    }

    /// Return a shape with a known rank where every dimension is unknown.
    pub fn of_rank(rank: usize) -> SymbolicShape {
        SymbolicShape {
            dims: Some(SmallVec::from_elem(SymbolicDim::Unknown, rank)),
        }
    }

    /// Return the shape of a scalar.
    pub fn scalar() -> SymbolicShape {
        SymbolicShape {
            dims: Some(SmallVec::new()),
        }
    }

    pub fn from_dims(dims: impl IntoIterator<Item = SymbolicDim>) -> SymbolicShape {
        SymbolicShape {
            dims: Some(dims.into_iter().collect()),
        }
    }

    /// Return a fully known shape.
    pub fn from_fixed(shape: &[usize]) -> SymbolicShape {
        Self::from_dims(shape.iter().map(|&size| SymbolicDim::from(size)))
    }

    pub fn rank(&self) -> Option<usize> {
        self.dims.as_ref().map(|dims| dims.len())
    }

    pub fn has_rank(&self) -> bool {
        self.dims.is_some()
    }

    /// Return the dims, or `None` if the rank is unknown.
    pub fn dims(&self) -> Option<&[SymbolicDim]> {
        self.dims.as_deref()
    }

    /// Return dimension `index`, or `Unknown` if the rank is unknown or the
    /// index is out of range.
    pub fn dim(&self, index: usize) -> SymbolicDim {
        self.dims
            .as_ref()
            .and_then(|dims| dims.get(index))
            .cloned()
            .unwrap_or(SymbolicDim::Unknown)
    }

    /// Replace dimension `index`. Has no effect if the rank is unknown.
    pub fn set_dim(&mut self, index: usize, dim: SymbolicDim) {
        if let Some(slot) = self.dims.as_mut().and_then(|dims| dims.get_mut(index)) {
            *slot = dim;
        }
    }

    /// Return true if the rank and every dimension are known values.
    pub fn is_fully_known(&self) -> bool {
        self.dims
            .as_ref()
            .is_some_and(|dims| dims.iter().all(|d| d.is_value()))
    }

    /// Return the shape as concrete sizes if it is fully known.
    pub fn to_fixed(&self) -> Option<SmallVec<[usize; 4]>> {
        let dims = self.dims.as_ref()?;
        dims.iter()
            .map(|d| match d {
                SymbolicDim::Value(v) if *v >= 0 => Some(*v as usize),
                _ => None,
            })
            .collect()
    }

    /// Return the number of elements in a tensor with this shape.
    pub fn num_elements(&self) -> SymbolicDim {
        match &self.dims {
            Some(dims) => dims
                .iter()
                .cloned()
                .fold(SymbolicDim::Value(1), |acc, dim| acc * dim),
            None => SymbolicDim::Unknown,
        }
    }

    /// Return true if some dimension is statically known to be zero.
    pub fn has_zero_dim(&self) -> bool {
        self.dims
            .as_ref()
            .is_some_and(|dims| dims.iter().any(|d| d.is(0)))
    }

    /// Declare that this shape has a given rank.
    ///
    /// Declaring a rank on a rank-unknown shape fills it with unknown dims.
    /// Declaring the rank it already has is a no-op, and declaring a
    /// different rank is an error.
    pub fn declare_rank(&mut self, rank: usize) -> Result<(), InferShapesError> {
        match &self.dims {
            None => {
                *self = Self::of_rank(rank);
                Ok(())
            }
            Some(dims) if dims.len() == rank => Ok(()),
            Some(_) => Err(InferShapesError::IncorrectRank(
                "rank does not match declared rank",
            )),
        }
    }

    /// Consuming version of [`declare_rank`](Self::declare_rank).
    pub fn with_rank(mut self, rank: usize) -> Result<SymbolicShape, InferShapesError> {
        self.declare_rank(rank)?;
        Ok(self)
    }

    /// Check that the rank is at least `min_rank`, if it is known.
    pub fn require_min_rank(&self, min_rank: usize) -> Result<(), InferShapesError> {
        match self.rank() {
            Some(rank) if rank < min_rank => {
                Err(InferShapesError::IncorrectRank("input rank is too small"))
            }
            _ => Ok(()),
        }
    }

    /// Resolve a possibly negative axis against this shape's rank.
    ///
    /// Fails if the rank is unknown or the axis is out of range.
    pub fn resolve_axis(&self, axis: i64) -> Result<usize, InferShapesError> {
        let rank = self.rank().ok_or(InferShapesError::IncorrectRank(
            "axis cannot be resolved against an unknown rank",
        ))?;
        resolve_axis(rank, axis)
    }

    /// Lattice join of two shapes.
    ///
    /// Shapes of different ranks merge to a rank-unknown shape.
    pub fn merge(&self, other: &SymbolicShape) -> SymbolicShape {
        match (&self.dims, &other.dims) {
            (Some(a), Some(b)) if a.len() == b.len() => {
                Self::from_dims(a.iter().zip(b.iter()).map(|(a, b)| a.merge(b)))
            }
            _ => Self::unknown(),
        }
    }

    /// Combine two descriptions of the same runtime shape, keeping the most
    /// precise information from each.
    pub fn refine(&self, other: &SymbolicShape) -> Result<SymbolicShape, InferShapesError> {
        match (&self.dims, &other.dims) {
            (Some(a), Some(b)) => {
                if a.len() != b.len() {
                    return Err(InferShapesError::IncorrectRank("shapes have different ranks"));
                }
                let dims = a
                    .iter()
                    .zip(b.iter())
                    .map(|(a, b)| a.refine(b))
                    .collect::<Result<SymbolicDims, _>>()?;
                Ok(Self::from_dims(dims))
            }
            (Some(_), None) => Ok(self.clone()),
            (None, _) => Ok(other.clone()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SymbolicDim> {
        self.dims.iter().flatten()
    }
}

impl From<&[usize]> for SymbolicShape {
    fn from(shape: &[usize]) -> Self {
        SymbolicShape::from_fixed(shape)
    }
}

impl<const N: usize> From<[SymbolicDim; N]> for SymbolicShape {
    fn from(dims: [SymbolicDim; N]) -> Self {
        SymbolicShape::from_dims(dims)
    }
}

impl FromIterator<SymbolicDim> for SymbolicShape {
    fn from_iter<I: IntoIterator<Item = SymbolicDim>>(iter: I) -> Self {
        SymbolicShape::from_dims(iter)
    }
}

impl fmt::Display for SymbolicShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(dims) = &self.dims else {
            return write!(f, "[..]");
        };
        write!(f, "[")?;
        for (i, dim) in dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", dim)?;
        }
        write!(f, "]")
    }
}

/// Broadcast shapes together following NumPy's rules.
///
/// Shapes are right-aligned and shorter shapes are prefixed with 1s. The
/// result has the largest input rank, or unknown rank if any input's rank is
/// unknown.
pub fn broadcast_shapes(shapes: &[&SymbolicShape]) -> Result<SymbolicShape, InferShapesError> {
    let mut result = SymbolicShape::scalar();
    for shape in shapes {
        result = broadcast_pair(&result, shape)?;
    }
    Ok(result)
}

fn broadcast_pair(a: &SymbolicShape, b: &SymbolicShape) -> Result<SymbolicShape, InferShapesError> {
    let (Some(a_dims), Some(b_dims)) = (a.dims(), b.dims()) else {
        return Ok(SymbolicShape::unknown());
    };

    let ndim = a_dims.len().max(b_dims.len());
    let one = SymbolicDim::Value(1);
    let a_iter = std::iter::repeat_n(&one, ndim - a_dims.len()).chain(a_dims);
    let b_iter = std::iter::repeat_n(&one, ndim - b_dims.len()).chain(b_dims);

    a_iter
        .zip(b_iter)
        .map(|(a, b)| broadcast_dim(a, b))
        .collect()
}

#[cfg(test)]
mod tests {
    use infergraph_testing::TestCases;

    use super::{broadcast_shapes, SymbolicShape};
    use crate::infer_shapes::InferShapesError;
    use crate::sym_dim::SymbolicDim;
    use crate::sym_shape;

    #[test]
    fn test_declare_rank() {
        let mut shape = SymbolicShape::unknown();
        shape.declare_rank(3).unwrap();
        assert_eq!(shape, SymbolicShape::of_rank(3));

        // Declaring the same rank again is a no-op.
        shape.set_dim(0, SymbolicDim::Value(2));
        shape.declare_rank(3).unwrap();
        assert_eq!(shape.dim(0), SymbolicDim::Value(2));

        let err = shape.declare_rank(2).err().unwrap();
        assert!(matches!(err, InferShapesError::IncorrectRank(_)));
    }

    #[test]
    fn test_resolve_axis() {
        let shape = sym_shape!(2, 3, 4);
        assert_eq!(shape.resolve_axis(-1), Ok(2));
        assert_eq!(shape.resolve_axis(0), Ok(0));
        assert!(shape.resolve_axis(3).is_err());
        assert!(shape.resolve_axis(-4).is_err());
        assert!(SymbolicShape::unknown().resolve_axis(0).is_err());
    }

    #[test]
    fn test_num_elements() {
        assert_eq!(sym_shape!(2, 3, 4).num_elements(), SymbolicDim::Value(24));
        assert_eq!(sym_shape!("n", 1).num_elements(), SymbolicDim::param("n"));
        assert_eq!(sym_shape!("n", 0).num_elements(), SymbolicDim::Value(0));
        assert_eq!(SymbolicShape::scalar().num_elements(), SymbolicDim::Value(1));
        assert_eq!(SymbolicShape::unknown().num_elements(), SymbolicDim::Unknown);
    }

    #[test]
    fn test_merge_shapes() {
        assert_eq!(
            sym_shape!(2, "n", 4).merge(&sym_shape!(2, "n", 5)),
            SymbolicShape::from_dims([
                SymbolicDim::Value(2),
                SymbolicDim::param("n"),
                SymbolicDim::Unknown
            ])
        );
        assert_eq!(
            sym_shape!(2).merge(&sym_shape!(2, 2)),
            SymbolicShape::unknown()
        );
    }

    #[test]
    fn test_broadcast_shapes() {
        #[derive(Debug)]
        struct Case {
            a: SymbolicShape,
            b: SymbolicShape,
            expected: Result<SymbolicShape, ()>,
        }

        let cases = [
            Case {
                a: sym_shape!(3, 1),
                b: sym_shape!(1, 4),
                expected: Ok(sym_shape!(3, 4)),
            },
            Case {
                a: sym_shape!("batch", 3, 1),
                b: sym_shape!(5),
                expected: Ok(sym_shape!("batch", 3, 5)),
            },
            Case {
                a: sym_shape!(2, 3),
                b: sym_shape!(3, 3),
                expected: Err(()),
            },
            Case {
                a: SymbolicShape::unknown(),
                b: sym_shape!(3),
                expected: Ok(SymbolicShape::unknown()),
            },
            Case {
                a: sym_shape!(0, 1),
                b: sym_shape!(1, 7),
                expected: Ok(sym_shape!(0, 7)),
            },
        ];

        cases.test_each(|case| {
            let ab = broadcast_shapes(&[&case.a, &case.b]).map_err(|_| ());
            let ba = broadcast_shapes(&[&case.b, &case.a]).map_err(|_| ());
            assert_eq!(ab, case.expected);
            assert_eq!(ba, case.expected);
        })
    }

    #[test]
    fn test_broadcast_shapes_is_associative() {
        let shapes = [
            sym_shape!(3, 1),
            sym_shape!(1, 4),
            sym_shape!("n", 1, 4),
            sym_shape!(2, 1, 1),
            sym_shape!(5),
            SymbolicShape::scalar(),
        ];
        for a in &shapes {
            for b in &shapes {
                for c in &shapes {
                    let all = broadcast_shapes(&[a, b, c]).ok();
                    let nested = broadcast_shapes(&[a, b])
                        .and_then(|ab| broadcast_shapes(&[&ab, c]))
                        .ok();
                    assert_eq!(all, nested, "{} {} {}", a, b, c);
                }
            }
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(sym_shape!(2, "n").to_string(), "[2, n]");
        assert_eq!(SymbolicShape::unknown().to_string(), "[..]");
    }
}
