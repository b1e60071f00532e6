use std::time::Instant;

use infergraph_shape_inference::PartialTensor;
use infergraph_tensor::DataType;
use rustc_hash::FxHashMap;

use super::node::{Dimension, Layer, ValueSource};
use super::run_error::RunError;
use super::tensor_store::TensorStore;
use super::Graph;
use crate::backend::BackendChain;
use crate::env::env_flag;
use crate::infer_shapes::{ShapeInference, ShapeInfo};
use crate::operator::{check_arity, output_metas, InputList, OpError, ValueInference};
use crate::timing::{RunTiming, StepOutcome, StepRecord, TimingSort};
use crate::value::{Value, ValueMeta};

/// Options that control logging and other behaviors when executing a
/// [`Graph`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunOptions {
    /// Whether to log information about each step as it executes.
    pub verbose: bool,

    /// Whether to log times spent in different operators when the run
    /// completes.
    pub timing: bool,

    /// Whether to include a breakdown of execution time by input shape, in
    /// timing reports.
    pub timing_by_shape: bool,

    /// Order in which timings should be sorted.
    pub timing_sort: TimingSort,
}

impl RunOptions {
    /// Enable logging options which are turned on by the `INFERGRAPH_VERBOSE`
    /// and `INFERGRAPH_TIMING` environment variables.
    pub fn with_env_flags(mut self) -> RunOptions {
        self.verbose |= env_flag("INFERGRAPH_VERBOSE", false);
        self.timing |= env_flag("INFERGRAPH_TIMING", false);
        self
    }
}

/// Statistics about the most recent run of an [`ExecutionContext`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionStats {
    /// Number of layers executed by each backend in the chain, in chain
    /// order.
    pub dispatches: Vec<(String, usize)>,

    /// Number of layers skipped because all of their outputs are empty.
    pub skipped_empty: usize,

    /// Number of layers whose outputs were taken from shape inference
    /// results instead of being computed.
    pub folded: usize,

    /// Largest total size in bytes of the values that were live at the same
    /// time. Constants are not included.
    pub peak_bytes: usize,
}

impl ExecutionStats {
    fn new(backends: &BackendChain) -> ExecutionStats {
        ExecutionStats {
            dispatches: backends
                .backends()
                .iter()
                .map(|backend| (backend.name().to_string(), 0))
                .collect(),
            ..Default::default()
        }
    }

    /// Return the number of layers executed by the backend named `name`.
    pub fn dispatch_count(&self, name: &str) -> usize {
        self.dispatches
            .iter()
            .filter(|(backend, _)| backend == name)
            .map(|(_, count)| count)
            .sum()
    }

    /// Return the number of layers executed by any backend.
    pub fn total_dispatches(&self) -> usize {
        self.dispatches.iter().map(|(_, count)| count).sum()
    }
}

/// Executes a [`Graph`] by running its layers in order.
///
/// The context owns the store of live values, which are freed as soon as
/// the last layer which uses them has run. A context can be used for
/// multiple runs, one at a time.
pub struct ExecutionContext<'a> {
    graph: &'a Graph,
    backends: BackendChain,
    shape_info: Option<ShapeInfo>,
    store: TensorStore,
    stats: ExecutionStats,
}

impl<'a> ExecutionContext<'a> {
    /// Create a context which runs operators using the default backends.
    pub fn new(graph: &'a Graph) -> ExecutionContext<'a> {
        Self::with_backends(graph, BackendChain::default())
    }

    pub fn with_backends(graph: &'a Graph, backends: BackendChain) -> ExecutionContext<'a> {
        ExecutionContext {
            graph,
            backends,
            shape_info: None,
            store: TensorStore::new(),
            stats: ExecutionStats::default(),
        }
    }

    /// Attach shape inference results for the graph.
    ///
    /// Layer outputs are then checked against the inferred shapes, and
    /// layers whose output values were fully determined by inference are
    /// not computed. `info` must have been computed for inputs compatible
    /// with the ones that are passed to [`run`](Self::run).
    pub fn with_shape_info(mut self, info: ShapeInfo) -> ExecutionContext<'a> {
        self.shape_info = Some(info);
        self
    }

    /// Run shape inference on the graph's declared inputs and attach the
    /// results.
    pub fn with_inferred_shapes(self) -> Result<ExecutionContext<'a>, RunError> {
        let info = ShapeInference::new(self.graph).run()?;
        Ok(self.with_shape_info(info))
    }

    pub fn graph(&self) -> &'a Graph {
        self.graph
    }

    pub fn backends(&self) -> &BackendChain {
        &self.backends
    }

    pub fn shape_info(&self) -> Option<&ShapeInfo> {
        self.shape_info.as_ref()
    }

    /// Return statistics about the most recent run.
    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    /// Run the graph with a given set of inputs.
    ///
    /// Every declared input of the graph must be supplied. Returns the
    /// values of the graph's outputs, in the order they were declared.
    pub fn run(
        &mut self,
        inputs: Vec<(&str, Value)>,
        opts: RunOptions,
    ) -> Result<Vec<Value>, RunError> {
        let opts = opts.with_env_flags();

        self.store.clear();
        self.stats = ExecutionStats::new(&self.backends);

        let result = self.run_layers(inputs, &opts);
        self.stats.peak_bytes = self.store.peak_bytes();
        self.store.clear();
        result
    }

    fn run_layers(
        &mut self,
        inputs: Vec<(&str, Value)>,
        opts: &RunOptions,
    ) -> Result<Vec<Value>, RunError> {
        let graph = self.graph;
        self.bind_inputs(inputs)?;

        let run_start = Instant::now();
        let mut records: Vec<StepRecord<'a>> = Vec::new();

        for (step, layer) in graph.layers().iter().enumerate() {
            let step_start = Instant::now();
            let (input_meta, outcome) = self.run_layer(step, layer, opts.verbose)?;
            let elapsed = step_start.elapsed();

            if opts.verbose {
                println!("  time: {:.3}ms", elapsed.as_secs_f64() * 1000.0);
            }

            let released_bytes: usize = graph
                .released_after(step)
                .iter()
                .filter_map(|name| self.store.remove(name))
                .map(|value| value.bytes())
                .sum();

            if opts.timing {
                records.push(StepRecord {
                    op: layer.op.name(),
                    layer: layer.name(),
                    input_meta,
                    outcome,
                    released_bytes,
                    elapsed,
                });
            }
        }

        if opts.timing {
            let total_time = run_start.elapsed();
            println!(
                "Graph run of {} layers finished in {:.3}ms",
                graph.layers().len(),
                total_time.as_secs_f64() * 1000.0
            );
            let timing = RunTiming {
                steps: &records,
                backends: &self.stats.dispatches,
                total_time,
            };
            print!("{}", timing.report(opts.timing_sort, opts.timing_by_shape));
        }

        graph
            .outputs()
            .iter()
            .map(|output| match output.source {
                ValueSource::Constant(index) => Ok(graph.constants()[index].value.clone()),
                ValueSource::Input(_) | ValueSource::Layer { .. } => self
                    .store
                    .remove(&output.name)
                    .ok_or_else(|| RunError::missing_value(&output.name, &output.name)),
            })
            .collect()
    }

    /// Check the caller-supplied inputs against the graph's declared inputs
    /// and add them to the value store.
    fn bind_inputs(&mut self, inputs: Vec<(&str, Value)>) -> Result<(), RunError> {
        let graph = self.graph;

        // Sizes of symbolic dimensions seen so far.
        let mut symbols: FxHashMap<&'a str, usize> = FxHashMap::default();

        for (name, value) in inputs {
            let Some(ValueSource::Input(index)) = graph.source(name) else {
                return Err(RunError::invalid_input(name, "not an input of the graph"));
            };
            let input = &graph.inputs()[index];

            if value.dtype() != input.dtype {
                return Err(RunError::invalid_input(
                    name,
                    format!("expected type {} but got {}", input.dtype, value.dtype()),
                ));
            }

            if let Some(dims) = &input.shape {
                if dims.len() != value.ndim() {
                    return Err(RunError::invalid_input(
                        name,
                        format!("expected {} dims but got {}", dims.len(), value.ndim()),
                    ));
                }
                for (dim, &size) in dims.iter().zip(value.shape()) {
                    match dim {
                        Dimension::Fixed(expected) if *expected != size => {
                            return Err(RunError::invalid_input(
                                name,
                                format!("expected shape {:?} but got {:?}", dims, value.shape()),
                            ));
                        }
                        Dimension::Symbolic(symbol) => {
                            let bound = *symbols.entry(symbol.as_str()).or_insert(size);
                            if bound != size {
                                return Err(RunError::invalid_input(
                                    name,
                                    format!(
                                        "dimension \"{}\" has size {} but was {} in another input",
                                        symbol, size, bound
                                    ),
                                ));
                            }
                        }
                        Dimension::Fixed(_) | Dimension::Unknown => {}
                    }
                }
            }

            if let Some(info) = &self.shape_info {
                self.check_inferred(info, name, name, value.dtype(), value.shape())?;
            }

            if self.store.contains(name) {
                return Err(RunError::invalid_input(name, "supplied more than once"));
            }
            self.store.insert(name, value)?;
        }

        for input in graph.inputs() {
            if !self.store.contains(&input.name) {
                return Err(RunError::invalid_input(&input.name, "input was not supplied"));
            }
        }

        Ok(())
    }

    /// Check a value's data type and shape against the shape inference
    /// results, if any.
    fn check_inferred(
        &self,
        info: &ShapeInfo,
        layer: &str,
        name: &str,
        dtype: DataType,
        shape: &[usize],
    ) -> Result<(), RunError> {
        let Some(expected) = info.get(name) else {
            return Ok(());
        };
        if !is_compatible(expected, dtype, shape) {
            return Err(RunError::shape_mismatch(
                layer,
                name,
                format!("{} {}", expected.dtype(), expected.shape()),
                ValueMeta {
                    dtype,
                    shape: shape.to_vec(),
                },
            ));
        }
        Ok(())
    }

    /// Return the values of a layer's outputs if they are fully known from
    /// shape inference.
    fn folded_outputs(&self, layer: &Layer) -> Option<Vec<Value>> {
        let info = self.shape_info.as_ref()?;
        if layer.op.value_inference() != ValueInference::Fold {
            return None;
        }
        layer
            .outputs
            .iter()
            .map(|name| info.get(name).and_then(Value::from_partial))
            .collect()
    }

    /// Run a single layer and publish its outputs.
    ///
    /// Returns the metadata of the layer's inputs and how its outputs were
    /// produced.
    fn run_layer(
        &mut self,
        step: usize,
        layer: &Layer,
        verbose: bool,
    ) -> Result<(Vec<Option<ValueMeta>>, StepOutcome), RunError> {
        let graph = self.graph;
        let op = layer.op.as_operator();

        let input_values: Vec<Option<&Value>> = layer
            .inputs
            .iter()
            .map(|name| match name {
                None => Ok(None),
                Some(name) => graph
                    .constant(name)
                    .or_else(|| self.store.get(name))
                    .map(Some)
                    .ok_or_else(|| RunError::missing_value(layer.name(), name)),
            })
            .collect::<Result<_, _>>()?;
        let input_meta: Vec<Option<ValueMeta>> = input_values
            .iter()
            .map(|value| value.map(|v| v.to_meta()))
            .collect();
        let op_error = |error: OpError| {
            RunError::op_error_in(layer.name(), layer.op.name(), error, &input_meta)
        };

        check_arity(op, input_values.len()).map_err(|err| op_error(err.into()))?;
        let inputs = InputList::new(&input_values);
        let metas = output_metas(op, &inputs).map_err(op_error)?;

        if let Some(info) = &self.shape_info {
            for ((dtype, shape), name) in metas.iter().zip(&layer.outputs) {
                self.check_inferred(info, layer.name(), name, *dtype, shape)?;
            }
        }

        let mut outputs: Vec<Value> = metas
            .iter()
            .map(|(dtype, shape)| Value::zeros(*dtype, shape))
            .collect();

        // A layer with some non-empty outputs still has to run, eg. a split
        // where one chunk has zero length.
        let outcome = if metas.iter().all(|(_, shape)| shape.contains(&0)) {
            StepOutcome::SkippedEmpty
        } else if let Some(folded) = self.folded_outputs(layer) {
            outputs = folded;
            StepOutcome::Folded
        } else {
            match self.backends.dispatch(op, &inputs, &mut outputs) {
                Ok(Some(index)) => StepOutcome::Dispatched(index),
                Ok(None) => {
                    return Err(RunError::not_supported(
                        layer.name(),
                        layer.op.name(),
                        &input_meta,
                    ))
                }
                Err(err) => return Err(op_error(err)),
            }
        };

        match outcome {
            StepOutcome::Dispatched(index) => self.stats.dispatches[index].1 += 1,
            StepOutcome::SkippedEmpty => self.stats.skipped_empty += 1,
            StepOutcome::Folded => self.stats.folded += 1,
        }

        if verbose {
            println!("#{} {} ({})", step, layer.op.name(), layer.name());
            for (i, (name, meta)) in layer.inputs.iter().zip(&input_meta).enumerate() {
                match (name, meta) {
                    (Some(name), Some(meta)) => println!("  input {}: {} ({})", i, name, meta),
                    _ => println!("  input {}: -", i),
                }
            }
            for (i, (name, value)) in layer.outputs.iter().zip(&outputs).enumerate() {
                println!("  output {}: {} ({})", i, name, value.to_meta());
            }
            println!("  backend: {}", outcome.label(&self.stats.dispatches));
        }

        for (name, value) in layer.outputs.iter().zip(outputs) {
            self.store.insert(name, value)?;
        }

        Ok((input_meta, outcome))
    }
}

/// Return true if a concrete data type and shape are consistent with the
/// known parts of a partial tensor.
fn is_compatible(expected: &PartialTensor, dtype: DataType, shape: &[usize]) -> bool {
    if expected.dtype() != dtype {
        return false;
    }
    let Some(dims) = expected.shape().dims() else {
        return true;
    };
    dims.len() == shape.len()
        && dims
            .iter()
            .zip(shape)
            .all(|(dim, &size)| dim.value().map_or(true, |value| value == size as i64))
}
