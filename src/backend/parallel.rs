use infergraph_tensor::DataType;
use rayon::prelude::*;

use super::{Backend, Dispatch};
use crate::operator::OpError;
use crate::ops::{BinaryOp, UnaryOp};
use crate::threading::thread_pool;
use crate::value::Value;

/// Backend which runs large float elementwise operations in parallel.
///
/// Only unary and binary operators on float tensors with at least
/// `min_len` elements are handled. Binary operators are only handled when
/// neither input is broadcast. Everything else is left to the next backend
/// in the chain.
#[derive(Clone, Debug)]
pub struct ParallelBackend {
    min_len: usize,
}

impl ParallelBackend {
    /// Create a backend which handles tensors with at least `min_len`
    /// elements.
    pub fn with_min_len(min_len: usize) -> ParallelBackend {
        ParallelBackend { min_len }
    }

    pub fn min_len(&self) -> usize {
        self.min_len
    }
}

impl Default for ParallelBackend {
    fn default() -> Self {
        ParallelBackend::with_min_len(64 * 1024)
    }
}

/// Number of elements processed by each parallel task.
const CHUNK_SIZE: usize = 4096;

impl Backend for ParallelBackend {
    fn name(&self) -> &str {
        "parallel"
    }

    fn unary(&self, op: &UnaryOp, x: &Value, out: &mut Value) -> Result<Dispatch, OpError> {
        let (Value::FloatTensor(x), Value::FloatTensor(out)) = (x, out) else {
            return Ok(Dispatch::Unsupported);
        };
        if x.len() < self.min_len || !op.supports(DataType::Float) || op.is_predicate() {
            return Ok(Dispatch::Unsupported);
        }

        thread_pool().run(|| {
            out.data_mut()
                .par_chunks_mut(CHUNK_SIZE)
                .zip(x.data().par_chunks(CHUNK_SIZE))
                .for_each(|(out, x)| {
                    for (y, &x) in out.iter_mut().zip(x) {
                        *y = op.apply_float(x);
                    }
                })
        });
        Ok(Dispatch::Done)
    }

    fn binary(
        &self,
        op: &BinaryOp,
        a: &Value,
        b: &Value,
        out: &mut Value,
    ) -> Result<Dispatch, OpError> {
        let (Value::FloatTensor(a), Value::FloatTensor(b), Value::FloatTensor(out)) = (a, b, out)
        else {
            return Ok(Dispatch::Unsupported);
        };
        if out.len() < self.min_len
            || a.shape() != out.shape()
            || b.shape() != out.shape()
            || op.is_comparison()
            || !op.supports(DataType::Float)
        {
            return Ok(Dispatch::Unsupported);
        }

        thread_pool().run(|| {
            out.data_mut()
                .par_chunks_mut(CHUNK_SIZE)
                .zip(a.data().par_chunks(CHUNK_SIZE))
                .zip(b.data().par_chunks(CHUNK_SIZE))
                .for_each(|((out, a), b)| {
                    for ((y, &a), &b) in out.iter_mut().zip(a).zip(b) {
                        *y = op.apply_float(a, b);
                    }
                })
        });
        Ok(Dispatch::Done)
    }
}
