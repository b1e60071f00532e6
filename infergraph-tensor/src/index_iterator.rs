use std::iter::FusedIterator;
use std::ops::Range;

use smallvec::SmallVec;

type DynIndex = SmallVec<[usize; 4]>;

/// Iterator over a range of N-dimensional indices, visited in row-major
/// order.
pub struct Indices {
    ranges: SmallVec<[Range<usize>; 4]>,

    /// Index to yield next, or `None` once the iterator is exhausted.
    next: Option<DynIndex>,

    /// Number of indices remaining.
    remaining: usize,
}

impl Indices {
    /// Return an iterator over all the indices of a tensor with a given shape.
    pub fn from_shape(shape: &[usize]) -> Indices {
        let ranges: SmallVec<[Range<usize>; 4]> = shape.iter().map(|&size| 0..size).collect();
        Self::from_ranges(&ranges)
    }

    /// Return an iterator over the indices within a set of per-dimension
    /// ranges.
    pub fn from_ranges(ranges: &[Range<usize>]) -> Indices {
        let remaining: usize = ranges.iter().map(|r| r.len()).product();
        let next = (remaining > 0).then(|| ranges.iter().map(|r| r.start).collect());
        Indices {
            ranges: ranges.iter().cloned().collect(),
            next,
            remaining,
        }
    }
}

impl Iterator for Indices {
    type Item = DynIndex;

    fn next(&mut self) -> Option<DynIndex> {
        let current = self.next.take()?;
        self.remaining -= 1;

        if self.remaining > 0 {
            let mut next = current.clone();
            for dim in (0..next.len()).rev() {
                next[dim] += 1;
                if next[dim] < self.ranges[dim].end {
                    break;
                }
                next[dim] = self.ranges[dim].start;
            }
            self.next = Some(next);
        }

        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Indices {}
impl FusedIterator for Indices {}

#[cfg(test)]
mod tests {
    use super::Indices;

    #[test]
    fn test_indices() {
        // Empty iterator
        let mut iter = Indices::from_shape(&[0]);
        assert_eq!(iter.next(), None);
        assert_eq!(iter.next(), None);

        // Scalar index iterator
        let visited: Vec<Vec<usize>> = Indices::from_shape(&[]).map(|i| i.to_vec()).collect();
        assert_eq!(visited, vec![Vec::<usize>::new()]);

        // 2D index iterator
        let visited: Vec<Vec<usize>> = Indices::from_shape(&[2, 2])
            .map(|i| i.to_vec())
            .collect();
        assert_eq!(visited, vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
    }

    #[test]
    fn test_indices_from_ranges() {
        let iter = Indices::from_ranges(&[1..3, 2..4]);
        assert_eq!(iter.len(), 4);
        let visited: Vec<Vec<usize>> = iter.map(|i| i.to_vec()).collect();
        assert_eq!(visited, vec![vec![1, 2], vec![1, 3], vec![2, 2], vec![2, 3]]);
    }
}
