//! Operator kinds, their shape inference rules and reference kernels.
//!
//! Each operator is a struct or enum holding its attributes. It implements
//! [`InferShapes`](infergraph_shape_inference::InferShapes), which computes
//! output types, shapes and (for small tensors) values from partially known
//! inputs, and [`Operator`], which dispatches execution to a [`Backend`].
//!
//! The free functions in each module are the numeric kernels used by
//! [`CpuBackend`](crate::CpuBackend). They assume that output shapes have
//! already been computed by shape inference.
//!
//! [`Backend`]: crate::Backend

use crate::operator::{Operator, ValueInference};

mod binary_elementwise;
mod concat;
mod conv;
mod convert;
mod gather;
mod generate;
mod layout;
mod math;
mod matmul;
mod norm;
mod pad;
mod pooling;
#[cfg(feature = "random")]
mod random;
mod reduce;
mod resize;
mod slice;
mod split;
mod trilu;
mod unary_elementwise;
mod variadic_elementwise;

pub use binary_elementwise::{binary_int, binary_map, select, BinaryOp, Where};
pub use concat::{concat, tile, Concat, Tile};
pub use conv::{conv, conv_transpose, Conv, ConvParams, ConvTranspose, Padding};
pub use convert::{cast, Cast, CastElement, CastLike};
pub use gather::{
    compress, gather, gather_elements, gather_nd, non_zero, one_hot, scatter_elements,
    scatter_nd, Compress, Gather, GatherElements, GatherND, NonZero, OneHot, ScatterElements,
    ScatterND, ScatterReduction,
};
pub use generate::{eye_like, range, ConstantOfShape, EyeLike, Range};
pub use layout::{
    depth_to_space, space_to_depth, DepthToSpace, DepthToSpaceMode, Expand, Flatten, Identity,
    Reshape, Shape, Size, SpaceToDepth, Squeeze, Transpose, Unsqueeze,
};
pub use math::erf;
pub use matmul::{gemm, matmul, Gemm, MatMul};
pub use norm::{
    batch_norm, instance_norm, layer_norm, lrn, softmax, BatchNormalization, ChannelParams,
    InstanceNormalization, LayerNormalization, Lrn, Softmax, SoftmaxOp,
};
pub use pad::{pad, Pad, PadMode};
pub use pooling::{pool, GlobalPool, Pool, PoolOp, PoolParams};
#[cfg(feature = "random")]
pub use random::{
    random_fill, Bernoulli, RandomNormal, RandomNormalLike, RandomOp, RandomUniform,
    RandomUniformLike,
};
pub use reduce::{
    arg_reduce, cum_sum, reduce, top_k, ArgReduce, ArgReduceOp, CumSum, Reduce, ReduceOp, TopK,
};
pub use resize::{resize, CoordTransformMode, NearestMode, Resize, ResizeMode};
pub use slice::{slice, Slice};
pub use split::{split, Split};
pub use trilu::{trilu, Trilu};
pub use unary_elementwise::{clip, map_into, Clip, UnaryOp};
pub use variadic_elementwise::{fold_inputs, VariadicOp};

pub(crate) use binary_elementwise::fold_broadcast;

/// Declare the [`Op`] enum, with one variant per operator type.
///
/// Variants may be gated on a crate feature using `feature = "name"`.
macro_rules! declare_ops {
    ($($variant:ident($op:ty) $(, feature = $feature:literal)?;)*) => {
        /// An operator kind together with its attributes.
        #[derive(Clone, Debug, PartialEq)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub enum Op {
            $(
                $(#[cfg(feature = $feature)])?
                $variant($op),
            )*
        }

        impl Op {
            /// Return the operator as a trait object.
            pub fn as_operator(&self) -> &dyn Operator {
                match self {
                    $(
                        $(#[cfg(feature = $feature)])?
                        Op::$variant(op) => op,
                    )*
                }
            }
        }

        $(
            $(#[cfg(feature = $feature)])?
            impl From<$op> for Op {
                fn from(op: $op) -> Op {
                    Op::$variant(op)
                }
            }
        )*
    };
}

declare_ops! {
    ArgReduce(ArgReduce);
    BatchNormalization(BatchNormalization);
    Bernoulli(Bernoulli), feature = "random";
    Binary(BinaryOp);
    Cast(Cast);
    CastLike(CastLike);
    Clip(Clip);
    Compress(Compress);
    Concat(Concat);
    ConstantOfShape(ConstantOfShape);
    Conv(Conv);
    ConvTranspose(ConvTranspose);
    CumSum(CumSum);
    DepthToSpace(DepthToSpace);
    Expand(Expand);
    EyeLike(EyeLike);
    Flatten(Flatten);
    Gather(Gather);
    GatherElements(GatherElements);
    GatherND(GatherND);
    Gemm(Gemm);
    GlobalPool(GlobalPool);
    Identity(Identity);
    InstanceNormalization(InstanceNormalization);
    LayerNormalization(LayerNormalization);
    Lrn(Lrn);
    MatMul(MatMul);
    NonZero(NonZero);
    OneHot(OneHot);
    Pad(Pad);
    Pool(Pool);
    RandomNormal(RandomNormal), feature = "random";
    RandomNormalLike(RandomNormalLike), feature = "random";
    RandomUniform(RandomUniform), feature = "random";
    RandomUniformLike(RandomUniformLike), feature = "random";
    Range(Range);
    Reduce(Reduce);
    Reshape(Reshape);
    Resize(Resize);
    ScatterElements(ScatterElements);
    ScatterND(ScatterND);
    Shape(Shape);
    Size(Size);
    Slice(Slice);
    Softmax(Softmax);
    SpaceToDepth(SpaceToDepth);
    Split(Split);
    Squeeze(Squeeze);
    Tile(Tile);
    TopK(TopK);
    Transpose(Transpose);
    Trilu(Trilu);
    Unary(UnaryOp);
    Unsqueeze(Unsqueeze);
    Variadic(VariadicOp);
    Where(Where);
}

impl Op {
    pub fn name(&self) -> &str {
        self.as_operator().name()
    }

    /// Return whether shape inference computes the output values of this
    /// operator, when its inputs are known, or only output shapes.
    ///
    /// Folding is limited to operators whose abstract rule exactly matches
    /// the kernel for the small (rank <= 1) tensors whose values are
    /// tracked. For other operators, any values produced by the shape rule
    /// are discarded.
    pub fn value_inference(&self) -> ValueInference {
        use ValueInference::{Fold, ShapeOnly};

        if !self.as_operator().is_deterministic() {
            return ShapeOnly;
        }

        match self {
            Op::Unary(op) if op.can_fold() => Fold,
            Op::Binary(op) if op.can_fold() => Fold,
            Op::Variadic(op) if op.can_fold() => Fold,
            Op::Reduce(op) if op.op.can_fold() => Fold,
            Op::Cast(_)
            | Op::CastLike(_)
            | Op::Concat(_)
            | Op::ConstantOfShape(_)
            | Op::Expand(_)
            | Op::Flatten(_)
            | Op::Gather(_)
            | Op::Identity(_)
            | Op::Range(_)
            | Op::Reshape(_)
            | Op::Shape(_)
            | Op::Size(_)
            | Op::Slice(_)
            | Op::Split(_)
            | Op::Squeeze(_)
            | Op::Transpose(_)
            | Op::Unsqueeze(_)
            | Op::Where(_) => Fold,
            _ => ShapeOnly,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use infergraph_shape_inference::{InferInputs, PartialTensor};

    use super::{BinaryOp, Concat, Op, Range, Reshape, UnaryOp};
    use crate::backend::{CpuBackend, Dispatch};
    use crate::operator::{output_metas, InputList, OpError, Operator, ValueInference};
    use crate::value::Value;

    /// Run an operator with the reference CPU backend.
    ///
    /// Outputs are allocated using the shapes from shape inference, the same
    /// way as graph execution. A backend which does not support the inputs
    /// produces `OpError::UnsupportedType`.
    pub fn run_op(op: &dyn Operator, inputs: &[Option<&Value>]) -> Result<Vec<Value>, OpError> {
        let inputs = InputList::new(inputs);
        let mut outputs: Vec<Value> = output_metas(op, &inputs)?
            .iter()
            .map(|(dtype, shape)| Value::zeros(*dtype, shape))
            .collect();
        match op.dispatch(&CpuBackend::new(), &inputs, &mut outputs)? {
            Dispatch::Done => Ok(outputs),
            Dispatch::Unsupported => Err(OpError::UnsupportedType),
        }
    }

    /// Check that shape inference with fully known inputs computes the same
    /// output values as running the operator.
    #[track_caller]
    pub fn assert_folds(op: &dyn Operator, inputs: &[&Value]) {
        let partial_inputs: Vec<Option<PartialTensor>> =
            inputs.iter().map(|x| Some(x.to_partial())).collect();
        let folded = op
            .infer_shapes(InferInputs::new(&partial_inputs))
            .expect("shape inference failed");

        let inputs: Vec<Option<&Value>> = inputs.iter().map(|x| Some(*x)).collect();
        let expected = run_op(op, &inputs).expect("operator failed");

        assert_eq!(folded.len(), expected.len());
        for (folded, expected) in folded.iter().zip(&expected) {
            let folded = Value::from_partial(folded)
                .unwrap_or_else(|| panic!("output of {} was not folded: {:?}", op.name(), folded));
            assert_eq!(&folded, expected, "folded value of {} differs", op.name());
        }
    }

    #[test]
    fn test_value_inference() {
        let cases: [(Op, ValueInference); 6] = [
            (UnaryOp::Neg.into(), ValueInference::Fold),
            (UnaryOp::Exp.into(), ValueInference::ShapeOnly),
            (BinaryOp::Pow.into(), ValueInference::ShapeOnly),
            (Concat { axis: 0 }.into(), ValueInference::Fold),
            (Reshape::default().into(), ValueInference::Fold),
            (Range {}.into(), ValueInference::Fold),
        ];
        for (op, expected) in cases {
            assert_eq!(op.value_inference(), expected, "{}", op.name());
        }
    }

    #[cfg(feature = "random")]
    #[test]
    fn test_random_ops_are_not_folded() {
        let op: Op = super::RandomUniform {
            low: 0.,
            high: 1.,
            shape: vec![2],
            seed: Some(1.),
        }
        .into();
        assert_eq!(op.value_inference(), ValueInference::ShapeOnly);
    }
}
