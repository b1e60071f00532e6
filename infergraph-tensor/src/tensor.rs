use std::ops::{Index, IndexMut};

use smallvec::SmallVec;

use crate::errors::{FromDataError, ReshapeError};
use crate::index_iterator::Indices;
use crate::layout::{broadcast_strides, contiguous_strides, is_valid_permutation, offset_of};

/// Shape of a tensor.
pub type Shape = SmallVec<[usize; 4]>;

/// An owned N-dimensional array with contiguous row-major storage.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor<T> {
    shape: Shape,
    data: Vec<T>,
}

impl<T> Tensor<T> {
    /// Create a tensor from a shape and row-major data.
    ///
    /// Panics if the length of `data` does not match the product of `shape`.
    /// Use [`Tensor::try_from_data`] for a fallible version.
    pub fn from_data(shape: &[usize], data: Vec<T>) -> Tensor<T> {
        match Self::try_from_data(shape, data) {
            Ok(tensor) => tensor,
            Err(err) => panic!("invalid tensor data for shape {:?}: {}", shape, err),
        }
    }

    /// Create a tensor from a shape and row-major data.
    pub fn try_from_data(shape: &[usize], data: Vec<T>) -> Result<Tensor<T>, FromDataError> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(FromDataError::StorageLengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Tensor {
            shape: SmallVec::from_slice(shape),
            data,
        })
    }

    /// Create a 1D tensor from a vector.
    pub fn from_vec(data: Vec<T>) -> Tensor<T> {
        Tensor {
            shape: SmallVec::from_slice(&[data.len()]),
            data,
        }
    }

    /// Create a tensor with zero dimensions and a single element.
    pub fn from_scalar(value: T) -> Tensor<T> {
        Tensor {
            shape: SmallVec::new(),
            data: vec![value],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Return the number of elements in the tensor.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Return the size of dimension `dim`.
    pub fn size(&self, dim: usize) -> usize {
        self.shape[dim]
    }

    pub fn strides(&self) -> SmallVec<[usize; 4]> {
        contiguous_strides(&self.shape)
    }

    /// Return the elements of the tensor in row-major order.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Consume the tensor and return its elements in row-major order.
    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    /// Return the single element of a tensor with exactly one element, or
    /// `None` otherwise.
    pub fn item(&self) -> Option<&T> {
        match self.data.as_slice() {
            [item] => Some(item),
            _ => None,
        }
    }

    /// Change the shape of this tensor without changing its elements.
    pub fn reshape(&mut self, shape: &[usize]) -> Result<(), ReshapeError> {
        if shape.iter().product::<usize>() != self.data.len() {
            return Err(ReshapeError::LengthMismatch);
        }
        self.shape = SmallVec::from_slice(shape);
        Ok(())
    }

    /// Consuming version of [`Tensor::reshape`].
    pub fn into_shape(mut self, shape: &[usize]) -> Result<Tensor<T>, ReshapeError> {
        self.reshape(shape)?;
        Ok(self)
    }

    /// Return the storage offset of the element at `index`, or `None` if
    /// the index is out of bounds.
    pub fn offset(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.ndim() || index.iter().zip(self.shape()).any(|(i, s)| i >= s) {
            return None;
        }
        Some(offset_of(&self.strides(), index))
    }

    /// Return the element at `index`, or `None` if it is out of bounds.
    pub fn get(&self, index: &[usize]) -> Option<&T> {
        self.offset(index).map(|offset| &self.data[offset])
    }

    pub fn get_mut(&mut self, index: &[usize]) -> Option<&mut T> {
        self.offset(index).map(|offset| &mut self.data[offset])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.data.iter_mut()
    }

    /// Return an iterator over all valid indices of this tensor.
    pub fn indices(&self) -> Indices {
        Indices::from_shape(&self.shape)
    }

    /// Return a new tensor with the same shape, whose elements are the
    /// result of applying `f` to each element of this tensor.
    pub fn map<U, F: Fn(&T) -> U>(&self, f: F) -> Tensor<U> {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(f).collect(),
        }
    }

    /// Iterate over the elements of this tensor as if it had been broadcast
    /// to `shape`.
    ///
    /// Panics if this tensor's shape cannot be broadcast to `shape`.
    pub fn broadcast_iter(&self, shape: &[usize]) -> BroadcastIter<'_, T> {
        BroadcastIter {
            data: &self.data,
            strides: broadcast_strides(&self.shape, shape),
            indices: Indices::from_shape(shape),
        }
    }
}

impl<T: Clone> Tensor<T> {
    /// Create a tensor with all elements set to `value`.
    pub fn full(shape: &[usize], value: T) -> Tensor<T> {
        let len = shape.iter().product();
        Tensor {
            shape: SmallVec::from_slice(shape),
            data: vec![value; len],
        }
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.data.clone()
    }

    /// Return a copy of this tensor with dimensions reordered so that
    /// output dim `i` is input dim `perm[i]`.
    ///
    /// Panics if `perm` is not a permutation of the dimensions.
    pub fn permuted(&self, perm: &[usize]) -> Tensor<T> {
        assert!(
            is_valid_permutation(self.ndim(), perm),
            "permutation {:?} is invalid for shape {:?}",
            perm,
            self.shape
        );
        let in_strides = self.strides();
        let out_shape: Shape = perm.iter().map(|&d| self.shape[d]).collect();
        let strides: SmallVec<[usize; 4]> = perm.iter().map(|&d| in_strides[d]).collect();
        let data = Indices::from_shape(&out_shape)
            .map(|index| self.data[offset_of(&strides, &index)].clone())
            .collect();
        Tensor {
            shape: out_shape,
            data,
        }
    }

    /// Return a copy of this tensor broadcast to `shape`.
    pub fn broadcast_to(&self, shape: &[usize]) -> Tensor<T> {
        Tensor {
            shape: SmallVec::from_slice(shape),
            data: self.broadcast_iter(shape).cloned().collect(),
        }
    }
}

impl<T: Clone + Default> Tensor<T> {
    /// Create a tensor filled with the default value of `T`.
    pub fn zeros(shape: &[usize]) -> Tensor<T> {
        Self::full(shape, T::default())
    }
}

impl<T, const N: usize> Index<[usize; N]> for Tensor<T> {
    type Output = T;

    fn index(&self, index: [usize; N]) -> &T {
        match self.offset(&index) {
            Some(offset) => &self.data[offset],
            None => panic!("index {:?} out of bounds for shape {:?}", index, self.shape),
        }
    }
}

impl<T, const N: usize> IndexMut<[usize; N]> for Tensor<T> {
    fn index_mut(&mut self, index: [usize; N]) -> &mut T {
        match self.offset(&index) {
            Some(offset) => &mut self.data[offset],
            None => panic!("index {:?} out of bounds for shape {:?}", index, self.shape),
        }
    }
}

impl<T> From<Vec<T>> for Tensor<T> {
    fn from(data: Vec<T>) -> Tensor<T> {
        Tensor::from_vec(data)
    }
}

/// Iterator returned by [`Tensor::broadcast_iter`].
pub struct BroadcastIter<'a, T> {
    data: &'a [T],
    strides: SmallVec<[usize; 4]>,
    indices: Indices,
}

impl<'a, T> Iterator for BroadcastIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let index = self.indices.next()?;
        Some(&self.data[offset_of(&self.strides, &index)])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.indices.size_hint()
    }
}

impl<T> ExactSizeIterator for BroadcastIter<'_, T> {}

#[cfg(test)]
mod tests {
    use super::Tensor;
    use crate::errors::{FromDataError, ReshapeError};

    #[test]
    fn test_from_data() {
        let x = Tensor::from_data(&[2, 3], vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(x.shape(), &[2, 3]);
        assert_eq!(x[[1, 2]], 6);
        assert_eq!(x.get(&[2, 0]), None);

        let err = Tensor::try_from_data(&[2, 2], vec![1, 2, 3]).err();
        assert_eq!(
            err,
            Some(FromDataError::StorageLengthMismatch {
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_item() {
        assert_eq!(Tensor::from_scalar(3.5).item(), Some(&3.5));
        assert_eq!(Tensor::from_data(&[1, 1], vec![2]).item(), Some(&2));
        assert_eq!(Tensor::from_vec(vec![1, 2]).item(), None);
    }

    #[test]
    fn test_reshape() {
        let mut x = Tensor::from_vec((0..6).collect::<Vec<i64>>());
        x.reshape(&[3, 2]).unwrap();
        assert_eq!(x[[2, 1]], 5);
        assert_eq!(x.reshape(&[4]), Err(ReshapeError::LengthMismatch));
    }

    #[test]
    fn test_permuted() {
        let x = Tensor::from_data(&[2, 3], vec![1, 2, 3, 4, 5, 6]);
        let y = x.permuted(&[1, 0]);
        assert_eq!(y.shape(), &[3, 2]);
        assert_eq!(y.data(), &[1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn test_broadcast_iter() {
        let x = Tensor::from_data(&[2, 1], vec![1, 2]);
        let elems: Vec<_> = x.broadcast_iter(&[2, 3]).copied().collect();
        assert_eq!(elems, &[1, 1, 1, 2, 2, 2]);

        let row = Tensor::from_vec(vec![1, 2, 3]);
        assert_eq!(row.broadcast_to(&[2, 3]).data(), &[1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_empty_tensor() {
        let x = Tensor::<f32>::zeros(&[2, 0, 5]);
        assert!(x.is_empty());
        assert_eq!(x.indices().count(), 0);
        assert_eq!(x.map(|v| v + 1.).shape(), &[2, 0, 5]);
    }
}
