//! Per-step records of a graph run and the report printed when timing is
//! enabled.

use std::fmt;
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::value::ValueMeta;

/// How the outputs of a step were produced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum StepOutcome {
    /// Computed by the backend at this index in the chain.
    Dispatched(usize),

    /// All outputs are empty, so no computation was needed.
    SkippedEmpty,

    /// Outputs were known from shape inference.
    Folded,
}

impl StepOutcome {
    /// Return a label for this outcome. `backends` lists the backends in the
    /// chain, in order.
    pub fn label(self, backends: &[(String, usize)]) -> &str {
        match self {
            StepOutcome::Dispatched(index) => backends
                .get(index)
                .map(|(name, _)| name.as_str())
                .unwrap_or("?"),
            StepOutcome::SkippedEmpty => "skipped (empty)",
            StepOutcome::Folded => "folded",
        }
    }
}

/// Specifies sort order for graph run timings.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum TimingSort {
    /// Sort timings by operator name
    ByName,

    /// Sort timings by time, descending
    #[default]
    ByTime,
}

/// Record of a single step of a graph run.
#[derive(Clone, Debug)]
pub(crate) struct StepRecord<'a> {
    /// Operator name, eg. `MatMul`.
    pub op: &'a str,

    /// Layer name.
    pub layer: &'a str,

    /// `None` entries are absent optional inputs.
    pub input_meta: Vec<Option<ValueMeta>>,

    pub outcome: StepOutcome,

    /// Size of the values freed after this step.
    pub released_bytes: usize,

    pub elapsed: Duration,
}

/// Totals for one operator kind.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct OpSummary<'a> {
    pub op: &'a str,
    pub steps: usize,
    pub elapsed: Duration,
}

/// The step records of a graph run.
pub(crate) struct RunTiming<'a> {
    pub steps: &'a [StepRecord<'a>],

    /// Backends of the chain which ran the graph, as listed in
    /// [`ExecutionStats::dispatches`](crate::ExecutionStats::dispatches).
    pub backends: &'a [(String, usize)],

    pub total_time: Duration,
}

impl<'a> RunTiming<'a> {
    /// Return the totals for each operator kind, in the order given by `sort`.
    pub fn by_operator(&self, sort: TimingSort) -> Vec<OpSummary<'a>> {
        let mut totals: FxHashMap<&str, OpSummary> = FxHashMap::default();
        for step in self.steps {
            let summary = totals.entry(step.op).or_insert(OpSummary {
                op: step.op,
                steps: 0,
                elapsed: Duration::ZERO,
            });
            summary.steps += 1;
            summary.elapsed += step.elapsed;
        }

        let mut summaries: Vec<_> = totals.into_values().collect();
        summaries.sort_by(|a, b| match sort {
            TimingSort::ByName => a.op.cmp(b.op),
            TimingSort::ByTime => b.elapsed.cmp(&a.elapsed).then(a.op.cmp(b.op)),
        });
        summaries
    }

    /// Return the number of steps handled in each way, with backends first
    /// in chain order. Handlers that ran no steps are included.
    pub fn by_outcome(&self) -> Vec<(&str, usize)> {
        let mut counts: Vec<(&str, usize)> = self
            .backends
            .iter()
            .map(|(name, _)| (name.as_str(), 0))
            .collect();
        counts.push(("folded", 0));
        counts.push(("skipped (empty)", 0));

        for step in self.steps {
            let index = match step.outcome {
                StepOutcome::Dispatched(index) => index,
                StepOutcome::Folded => self.backends.len(),
                StepOutcome::SkippedEmpty => self.backends.len() + 1,
            };
            if let Some((_, count)) = counts.get_mut(index) {
                *count += 1;
            }
        }
        counts
    }

    /// Return the time spent on each distinct list of input shapes for
    /// operator `op`, longest first.
    fn by_input_shapes(&self, op: &str) -> Vec<(String, usize, Duration)> {
        let mut totals: FxHashMap<String, (usize, Duration)> = FxHashMap::default();
        for step in self.steps.iter().filter(|step| step.op == op) {
            let (count, elapsed) = totals
                .entry(format_input_shapes(&step.input_meta))
                .or_insert((0, Duration::ZERO));
            *count += 1;
            *elapsed += step.elapsed;
        }
        let mut rows: Vec<_> = totals
            .into_iter()
            .map(|(shapes, (count, elapsed))| (shapes, count, elapsed))
            .collect();
        rows.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));
        rows
    }

    pub fn released_bytes(&self) -> usize {
        self.steps.iter().map(|step| step.released_bytes).sum()
    }

    /// Return a report of this run which implements `Display`.
    pub fn report(&self, sort: TimingSort, by_shape: bool) -> TimingReport<'_, 'a> {
        TimingReport {
            timing: self,
            sort,
            by_shape,
        }
    }
}

fn format_input_shapes(meta: &[Option<ValueMeta>]) -> String {
    let shapes: Vec<String> = meta
        .iter()
        .map(|meta| match meta {
            Some(meta) => format!("{:?}", meta.shape),
            None => "-".to_string(),
        })
        .collect();
    shapes.join(", ")
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

pub(crate) struct TimingReport<'t, 'a> {
    timing: &'t RunTiming<'a>,
    sort: TimingSort,
    by_shape: bool,
}

impl fmt::Display for TimingReport<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_ms = millis(self.timing.total_time);
        let summaries = self.timing.by_operator(self.sort);

        let op_width = summaries
            .iter()
            .map(|s| s.op.len())
            .chain(["Operator".len()])
            .max()
            .unwrap_or(0);
        writeln!(
            f,
            "{:<op_width$}  {:>5}  {:>10}  {:>6}",
            "Operator", "Steps", "Time (ms)", "Share"
        )?;

        for summary in &summaries {
            let op_ms = millis(summary.elapsed);
            let share = if total_ms > 0. {
                op_ms / total_ms * 100.
            } else {
                0.
            };
            writeln!(
                f,
                "{:<op_width$}  {:>5}  {:>10.3}  {:>5.1}%",
                summary.op, summary.steps, op_ms, share
            )?;

            if self.by_shape {
                for (shapes, count, elapsed) in self.timing.by_input_shapes(summary.op) {
                    writeln!(f, "    {}  x{}  {:.3}ms", shapes, count, millis(elapsed))?;
                }
            }
        }

        let outcomes: Vec<String> = self
            .timing
            .by_outcome()
            .into_iter()
            .map(|(label, count)| format!("{} {}", label, count))
            .collect();
        writeln!(f, "Steps by handler: {}", outcomes.join(", "))?;
        writeln!(
            f,
            "Released {} bytes after last use",
            self.timing.released_bytes()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use infergraph_tensor::DataType;

    use super::{OpSummary, RunTiming, StepOutcome, StepRecord, TimingSort};
    use crate::value::ValueMeta;

    fn step<'a>(op: &'a str, shape: &[usize], outcome: StepOutcome, ms: u64) -> StepRecord<'a> {
        StepRecord {
            op,
            layer: op,
            input_meta: vec![
                Some(ValueMeta {
                    dtype: DataType::Float,
                    shape: shape.to_vec(),
                }),
                None,
            ],
            outcome,
            released_bytes: 16,
            elapsed: Duration::from_millis(ms),
        }
    }

    fn backends() -> Vec<(String, usize)> {
        vec![("parallel".to_string(), 0), ("cpu".to_string(), 0)]
    }

    #[test]
    fn test_by_operator() {
        let steps = [
            step("MatMul", &[4, 4], StepOutcome::Dispatched(1), 10),
            step("Add", &[4, 4], StepOutcome::Dispatched(0), 2),
            step("MatMul", &[8, 8], StepOutcome::Dispatched(1), 20),
        ];
        let backends = backends();
        let timing = RunTiming {
            steps: &steps,
            backends: &backends,
            total_time: Duration::from_millis(40),
        };

        assert_eq!(
            timing.by_operator(TimingSort::ByTime),
            [
                OpSummary {
                    op: "MatMul",
                    steps: 2,
                    elapsed: Duration::from_millis(30)
                },
                OpSummary {
                    op: "Add",
                    steps: 1,
                    elapsed: Duration::from_millis(2)
                },
            ]
        );
        assert_eq!(timing.by_operator(TimingSort::ByName)[0].op, "Add");
    }

    #[test]
    fn test_by_outcome() {
        let steps = [
            step("Add", &[4], StepOutcome::Dispatched(1), 1),
            step("Shape", &[4], StepOutcome::Folded, 0),
            step("Relu", &[0], StepOutcome::SkippedEmpty, 0),
            step("Relu", &[4], StepOutcome::Dispatched(1), 1),
        ];
        let backends = backends();
        let timing = RunTiming {
            steps: &steps,
            backends: &backends,
            total_time: Duration::from_millis(2),
        };

        assert_eq!(
            timing.by_outcome(),
            [
                ("parallel", 0),
                ("cpu", 2),
                ("folded", 1),
                ("skipped (empty)", 1)
            ]
        );
        assert_eq!(timing.released_bytes(), 64);
        assert_eq!(StepOutcome::Dispatched(0).label(&backends), "parallel");
        assert_eq!(StepOutcome::Folded.label(&backends), "folded");
    }

    #[test]
    fn test_report() {
        let steps = [
            step("MatMul", &[4, 4], StepOutcome::Dispatched(1), 10),
            step("MatMul", &[4, 4], StepOutcome::Dispatched(1), 10),
            step("Add", &[4, 4], StepOutcome::Dispatched(1), 20),
        ];
        let backends = backends();
        let timing = RunTiming {
            steps: &steps,
            backends: &backends,
            total_time: Duration::from_millis(40),
        };

        let text = timing.report(TimingSort::ByTime, false).to_string();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("Operator"));
        assert!(lines[1].starts_with("Add") && lines[1].ends_with("50.0%"));
        assert!(lines[2].starts_with("MatMul") && lines[2].contains("20.000"));
        assert_eq!(
            lines[3],
            "Steps by handler: parallel 0, cpu 3, folded 0, skipped (empty) 0"
        );
        assert_eq!(lines[4], "Released 48 bytes after last use");

        let text = timing.report(TimingSort::ByName, true).to_string();
        assert!(text.contains("    [4, 4], -  x2  20.000ms"));
    }
}
