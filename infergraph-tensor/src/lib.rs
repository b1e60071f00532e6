//! infergraph_tensor provides the owned, multi-dimensional arrays that hold
//! the values flowing through an infergraph model.
//!
//! # Storage and layout
//!
//! A [Tensor] owns a `Vec<T>` of elements together with a shape. Elements are
//! always stored contiguously in row-major (C) order, so the strides of a
//! tensor are fully determined by its shape. Operations that change the
//! logical order of elements, such as [Tensor::permuted], produce a new
//! tensor rather than a strided view.
//!
//! ```
//! use infergraph_tensor::Tensor;
//!
//! let tensor = Tensor::from_data(&[2, 2], vec![1, 2, 3, 4]);
//! let transposed = tensor.permuted(&[1, 0]);
//! assert_eq!(transposed.data(), &[1, 3, 2, 4]);
//! ```
//!
//! # Element types
//!
//! Tensors are generic over their element type, but the runtime only stores
//! the element types enumerated by [DataType]: `f32` and `i64`.
//!
//! # Serialization
//!
//! Tensors can be serialized and deserialized using [serde](https://serde.rs)
//! if the `serde` feature is enabled. The serialized representation includes
//! the shape and elements in row-major order:
//!
//! ```json
//! {
//!   "shape": [2, 2],
//!   "data": [0.5, 1.0, 1.5, 2.0]
//! }
//! ```

mod dtype;
pub mod errors;
mod index_iterator;
pub mod layout;
mod tensor;

#[cfg(feature = "serde")]
mod impl_serialize;

pub use dtype::{DataType, DataTypeOf};
pub use index_iterator::Indices;
pub use tensor::{BroadcastIter, Shape, Tensor};

pub mod test_util;
