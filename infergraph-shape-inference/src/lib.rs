//! Shape inference primitives for the infergraph runtime.
//!
//! Shape inference traces how the operators in a graph transform the shapes
//! of tensors, and for small tensors such as shapes, axes and scalars, their
//! values. Inputs to a graph usually have some dimensions whose size is only
//! known at runtime, such as a batch size or sequence length. These are
//! represented as named parameters, so that inference can still determine
//! that, for example, two tensors share the same "batch" dimension.
//!
//! # Crate overview
//!
//! - [`SymbolicDim`] and [`SymbolicShape`] describe partially known shapes,
//!   and [`broadcast_shapes`] implements NumPy-style broadcasting over them.
//! - [`PartialTensor`] describes a tensor's data type, shape and, for small
//!   tensors, the values of its elements.
//! - The [`InferShapes`] trait is implemented by operators to compute output
//!   values from input values.
//! - [`shape_ops`] contains reshape, slice, pad and tile arithmetic which is
//!   shared between shape inference and operator execution.
//!
//! Each of the abstract types forms a lattice with an unknown element at the
//! top. Merging two values never yields a more precise value than either
//! input, and inference results are never wrong, only imprecise.

mod infer_shapes;
mod partial_tensor;
pub mod shape_ops;
mod sym_dim;
mod sym_shape;

pub use infer_shapes::{
    broadcast_output, reduce_shape, resolve_axes, resolve_axis, resolve_index, unary_output,
    ErrorKind, InferInputs, InferShapes, InferShapesError,
};
pub use partial_tensor::{KnownElement, PartialTensor, PartialTensorElement};
pub use sym_dim::{broadcast_dim, SymbolicDim};
pub use sym_shape::{broadcast_shapes, SymbolicDims, SymbolicShape};

/// Construct a [`SymbolicShape`] from a list of dimensions.
///
/// Each entry can be an integer size, a parameter name or a [`SymbolicDim`].
///
/// ```
/// use infergraph_shape_inference::{sym_shape, SymbolicDim};
///
/// let shape = sym_shape!("batch", 3, SymbolicDim::Unknown);
/// assert_eq!(shape.to_string(), "[batch, 3, ?]");
/// ```
#[macro_export]
macro_rules! sym_shape {
    ($($dim:expr),* $(,)?) => {
        $crate::SymbolicShape::from_dims([$($crate::SymbolicDim::from($dim)),*])
    };
}
