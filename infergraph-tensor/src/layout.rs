//! Helpers for working with the shapes and strides of contiguous tensors.

use std::iter::repeat_n;

use smallvec::SmallVec;

/// Return the strides of a contiguous row-major tensor with a given shape.
pub fn contiguous_strides(shape: &[usize]) -> SmallVec<[usize; 4]> {
    let mut strides: SmallVec<[usize; 4]> = SmallVec::from_elem(0, shape.len());
    let mut stride = 1;
    for (dim, size) in shape.iter().enumerate().rev() {
        strides[dim] = stride;
        stride *= size;
    }
    strides
}

/// Return true if a tensor with shape `from` can be broadcast to `to`,
/// following NumPy's rules.
pub fn can_broadcast_to(from: &[usize], to: &[usize]) -> bool {
    if from.len() > to.len() {
        return false;
    }
    from.iter()
        .rev()
        .zip(to.iter().rev())
        .all(|(&from, &to)| from == to || from == 1)
}

/// Return the strides to use when iterating a contiguous tensor of shape
/// `from` as if it had shape `to`.
///
/// Broadcast dimensions have a stride of zero. Panics if `from` cannot be
/// broadcast to `to`.
pub fn broadcast_strides(from: &[usize], to: &[usize]) -> SmallVec<[usize; 4]> {
    assert!(
        can_broadcast_to(from, to),
        "cannot broadcast shape {:?} to {:?}",
        from,
        to
    );
    let pad = to.len() - from.len();
    let from_strides = contiguous_strides(from);
    repeat_n(0, pad)
        .chain(
            from.iter()
                .zip(from_strides.iter())
                .zip(&to[pad..])
                .map(|((&size, &stride), &to_size)| {
                    if size == 1 && to_size != 1 {
                        0
                    } else {
                        stride
                    }
                }),
        )
        .collect()
}

/// Return the broadcast result of two concrete shapes, or `None` if they
/// are incompatible.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<SmallVec<[usize; 4]>> {
    let ndim = a.len().max(b.len());
    let a_iter = repeat_n(1, ndim - a.len()).chain(a.iter().copied());
    let b_iter = repeat_n(1, ndim - b.len()).chain(b.iter().copied());

    let mut result = SmallVec::with_capacity(ndim);
    for (a, b) in a_iter.zip(b_iter) {
        if a == b || b == 1 {
            result.push(a);
        } else if a == 1 {
            result.push(b);
        } else {
            return None;
        }
    }
    Some(result)
}

/// Return true if `perm` is a permutation of `0..ndim`.
pub fn is_valid_permutation(ndim: usize, perm: &[usize]) -> bool {
    perm.len() == ndim
        && (0..ndim).all(|dim| perm.iter().filter(|&&d| d == dim).count() == 1)
}

/// Return the linear offset of an index, given a set of strides.
pub fn offset_of(strides: &[usize], index: &[usize]) -> usize {
    strides.iter().zip(index).map(|(s, i)| s * i).sum()
}

#[cfg(test)]
mod tests {
    use infergraph_testing::TestCases;

    use super::{
        broadcast_shapes, broadcast_strides, can_broadcast_to, contiguous_strides,
        is_valid_permutation,
    };

    #[test]
    fn test_contiguous_strides() {
        assert_eq!(contiguous_strides(&[2, 3, 4]).as_slice(), &[12, 4, 1]);
        assert_eq!(contiguous_strides(&[]).as_slice(), &[] as &[usize]);
        assert_eq!(contiguous_strides(&[5, 0, 2]).as_slice(), &[0, 2, 1]);
    }

    #[test]
    fn test_broadcast_shapes() {
        #[derive(Debug)]
        struct Case<'a> {
            a: &'a [usize],
            b: &'a [usize],
            expected: Option<&'a [usize]>,
        }

        let cases = [
            Case {
                a: &[3, 1],
                b: &[1, 4],
                expected: Some(&[3, 4]),
            },
            Case {
                a: &[5],
                b: &[2, 3, 5],
                expected: Some(&[2, 3, 5]),
            },
            Case {
                a: &[2, 0],
                b: &[1],
                expected: Some(&[2, 0]),
            },
            Case {
                a: &[2, 3],
                b: &[3, 2],
                expected: None,
            },
        ];

        cases.test_each(|case| {
            let result = broadcast_shapes(case.a, case.b);
            assert_eq!(result.as_deref(), case.expected);
            assert_eq!(broadcast_shapes(case.b, case.a).as_deref(), case.expected);
        })
    }

    #[test]
    fn test_broadcast_strides() {
        assert!(can_broadcast_to(&[3, 1], &[2, 3, 4]));
        assert!(!can_broadcast_to(&[3, 2], &[3, 4]));
        assert_eq!(broadcast_strides(&[3, 1], &[2, 3, 4]).as_slice(), &[0, 1, 0]);
    }

    #[test]
    fn test_is_valid_permutation() {
        assert!(is_valid_permutation(3, &[2, 0, 1]));
        assert!(!is_valid_permutation(3, &[0, 0, 1]));
        assert!(!is_valid_permutation(2, &[0, 1, 2]));
    }
}
