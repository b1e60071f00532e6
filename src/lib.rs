//! infergraph is the core of a neural network inference engine: an operator
//! graph which can be analyzed ahead of time and then executed.
//!
//! # Building graphs
//!
//! A [`Graph`] is a list of layers in topological order, plus declared
//! inputs, constants and outputs. Graphs are assembled using a
//! [`GraphBuilder`], usually by a loader for a model interchange format.
//! Each layer runs an operator from the [`ops`] module, described by the
//! [`Op`] enum.
//!
//! # Shape inference
//!
//! [`ShapeInference`] propagates what is known about each value through the
//! graph before it runs. Input dimensions can be symbolic (eg. a "batch"
//! dimension whose size is only known at runtime), and the values of small
//! tensors such as shapes and axes are tracked where possible. This
//! detects many errors before execution, and lets the
//! [`GraphOptimizer`] replace layers whose outputs are fully determined with
//! constants.
//!
//! # Execution
//!
//! An [`ExecutionContext`] runs a graph with concrete inputs. Values are
//! freed as soon as the last layer that uses them has run. Operators are
//! executed by a [`BackendChain`], which tries each [`Backend`] in turn. The
//! default chain contains only the reference [`CpuBackend`].
//! [`BackendChain::parallel`] adds a [`ParallelBackend`] which runs large
//! elementwise operations in parallel.
//!
//! ```
//! use infergraph::{DataType, Dimension, GraphBuilder, RunOptions, Value};
//! use infergraph::ops::{BinaryOp, UnaryOp};
//! use infergraph_tensor::Tensor;
//!
//! let mut builder = GraphBuilder::new();
//! builder
//!     .add_input("x", DataType::Float, Some(&[Dimension::Symbolic("n".into())]))
//!     .add_constant("bias", Tensor::from_scalar(1.0f32))
//!     .add_layer(BinaryOp::Add, &[Some("x"), Some("bias")], &["sum"])
//!     .add_layer(UnaryOp::Relu, &[Some("sum")], &["out"])
//!     .add_output("out");
//! let graph = builder.build().unwrap();
//!
//! let x = Value::from(Tensor::from_vec(vec![-2.0f32, 0.5]));
//! let outputs = graph.run(vec![("x", x)], RunOptions::default()).unwrap();
//! assert_eq!(outputs[0], Value::from(Tensor::from_vec(vec![0.0f32, 1.5])));
//! ```
//!
//! ## Threading
//!
//! Parallel kernels run in a Rayon
//! [ThreadPool](https://docs.rs/rayon/latest/rayon/struct.ThreadPool.html)
//! which is sized to match the number of physical cores, or the value of the
//! `INFERGRAPH_NUM_THREADS` environment variable. You can access this pool
//! using [threading::thread_pool] if you want to run your own tasks in it.
//!
//! ## Diagnostics
//!
//! Setting `INFERGRAPH_VERBOSE=1` logs each step of a graph run, and
//! `INFERGRAPH_TIMING=1` logs a breakdown of time spent in each operator.
//! The same output can be enabled with [`RunOptions`].
//!
//! ## Crate features
//!
//! - `random` enables operators that generate random numbers (eg.
//!   `RandomUniform`).
//! - `serde` implements `Serialize` and `Deserialize` for graphs, operators
//!   and values.

pub mod backend;
mod env;
mod graph;
mod infer_shapes;
mod operator;
mod optimize;
pub mod threading;
mod timing;
mod value;

pub mod ops;

pub use backend::{Backend, BackendChain, CpuBackend, Dispatch, ParallelBackend};
pub use graph::{
    BuildError, Constant, Dimension, ExecutionContext, ExecutionStats, Graph, GraphBuilder,
    GraphInput, GraphOutput, Layer, RunError, RunErrorKind, RunOptions, TensorStore, ValueSource,
};
pub use infer_shapes::{InferError, ShapeInference, ShapeInfo};
pub use infergraph_shape_inference::ErrorKind;
pub use infergraph_tensor::DataType;
pub use operator::{
    check_arity, output_metas, InputList, OpError, Operator, OutputMeta, ValueInference,
};
pub use ops::Op;
pub use optimize::{GraphOptimizer, OptimizeError};
pub use threading::{thread_pool, ThreadPool};
pub use timing::TimingSort;
pub use value::{CastError, Scalar, Value, ValueMeta};
