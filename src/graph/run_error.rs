use std::error::Error;
use std::fmt::{Display, Formatter};

use infergraph_shape_inference::ErrorKind;

use super::builder::BuildError;
use crate::infer_shapes::InferError;
use crate::operator::OpError;
use crate::value::ValueMeta;

/// Errors that occur when running a graph.
#[derive(Debug)]
pub struct RunError(RunErrorImpl);

impl RunError {
    /// Return the general category of error.
    pub fn kind(&self) -> RunErrorKind {
        self.0.kind()
    }

    /// Name of the layer that this error relates to, if any.
    pub fn layer(&self) -> Option<&str> {
        match &self.0 {
            RunErrorImpl::MissingValue { layer, .. }
            | RunErrorImpl::OperatorError { layer, .. }
            | RunErrorImpl::NotSupported { layer, .. }
            | RunErrorImpl::ShapeMismatch { layer, .. } => Some(layer),
            RunErrorImpl::InferError(err) => Some(&err.layer),
            RunErrorImpl::InvalidInput { .. }
            | RunErrorImpl::DuplicateValue(_)
            | RunErrorImpl::BuildError(_) => None,
        }
    }

    /// Return the operator error which caused this error, if any.
    pub fn op_error(&self) -> Option<&OpError> {
        match &self.0 {
            RunErrorImpl::OperatorError { error, .. } => Some(error),
            _ => None,
        }
    }

    pub(crate) fn invalid_input(name: &str, reason: impl Into<String>) -> Self {
        RunErrorImpl::InvalidInput {
            name: name.to_string(),
            reason: reason.into(),
        }
        .into()
    }

    pub(crate) fn missing_value(layer: &str, name: &str) -> Self {
        RunErrorImpl::MissingValue {
            layer: layer.to_string(),
            name: name.to_string(),
        }
        .into()
    }

    pub(crate) fn duplicate_value(name: &str) -> Self {
        RunErrorImpl::DuplicateValue(name.to_string()).into()
    }

    pub(crate) fn op_error_in(
        layer: &str,
        op: &str,
        error: OpError,
        inputs: &[Option<ValueMeta>],
    ) -> Self {
        RunErrorImpl::OperatorError {
            layer: layer.to_string(),
            op: op.to_string(),
            error,
            inputs: inputs.to_vec(),
        }
        .into()
    }

    pub(crate) fn not_supported(layer: &str, op: &str, inputs: &[Option<ValueMeta>]) -> Self {
        RunErrorImpl::NotSupported {
            layer: layer.to_string(),
            op: op.to_string(),
            inputs: inputs.to_vec(),
        }
        .into()
    }

    pub(crate) fn shape_mismatch(
        layer: &str,
        name: &str,
        expected: String,
        actual: ValueMeta,
    ) -> Self {
        RunErrorImpl::ShapeMismatch {
            layer: layer.to_string(),
            name: name.to_string(),
            expected,
            actual,
        }
        .into()
    }
}

impl Display for RunError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Error for RunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.0 {
            RunErrorImpl::OperatorError { error, .. } => Some(error),
            RunErrorImpl::InferError(err) => Some(err),
            RunErrorImpl::BuildError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RunErrorImpl> for RunError {
    fn from(inner: RunErrorImpl) -> Self {
        Self(inner)
    }
}

impl From<InferError> for RunError {
    fn from(err: InferError) -> Self {
        RunErrorImpl::InferError(err).into()
    }
}

impl From<BuildError> for RunError {
    fn from(err: BuildError) -> Self {
        RunErrorImpl::BuildError(err).into()
    }
}

/// The category of graph execution error. See [`RunError::kind`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunErrorKind {
    /// An axis or rank does not match a required rank.
    Rank,

    /// Shapes are incompatible, or differ from the shapes computed by shape
    /// inference.
    Shape,

    /// An attribute or input value is invalid.
    Value,

    /// No backend implements an operator for its input types.
    NotSupported,

    /// The inputs passed to the graph are missing, unknown or do not match
    /// the declared inputs.
    InvalidInput,

    /// The graph could not be constructed.
    Build,
}

impl From<ErrorKind> for RunErrorKind {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Rank => RunErrorKind::Rank,
            ErrorKind::Shape => RunErrorKind::Shape,
            ErrorKind::Value => RunErrorKind::Value,
            ErrorKind::NotSupported => RunErrorKind::NotSupported,
        }
    }
}

#[derive(Debug)]
enum RunErrorImpl {
    /// A graph input was not supplied, was supplied more than once, or does
    /// not match its declaration.
    InvalidInput { name: String, reason: String },

    /// A layer input has no live value.
    MissingValue { layer: String, name: String },

    /// A value was published under a name that is already live.
    DuplicateValue(String),

    /// Execution of an operator failed.
    OperatorError {
        layer: String,
        op: String,
        error: OpError,

        /// Shape and dtype of operator inputs. `None` entries are optional
        /// inputs which were not provided.
        inputs: Vec<Option<ValueMeta>>,
    },

    /// No backend in the chain supports the operator.
    NotSupported {
        layer: String,
        op: String,
        inputs: Vec<Option<ValueMeta>>,
    },

    /// A layer output does not match the shape computed by shape inference.
    ShapeMismatch {
        layer: String,
        name: String,
        expected: String,
        actual: ValueMeta,
    },

    InferError(InferError),

    BuildError(BuildError),
}

impl RunErrorImpl {
    fn kind(&self) -> RunErrorKind {
        type Kind = RunErrorKind;

        match self {
            Self::InvalidInput { .. } | Self::MissingValue { .. } => Kind::InvalidInput,
            Self::DuplicateValue(_) => Kind::Value,
            Self::OperatorError { error, .. } => error.kind().into(),
            Self::NotSupported { .. } => Kind::NotSupported,
            Self::ShapeMismatch { .. } => Kind::Shape,
            Self::InferError(err) => err.kind().into(),
            Self::BuildError(_) => Kind::Build,
        }
    }
}

fn write_inputs(f: &mut Formatter<'_>, inputs: &[Option<ValueMeta>]) -> std::fmt::Result {
    write!(f, "Inputs were (")?;
    for (i, input) in inputs.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        if let Some(meta) = input {
            write!(f, "{}", meta)?;
        } else {
            write!(f, "-")?;
        }
    }
    write!(f, ")")
}

impl Display for RunErrorImpl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput { name, reason } => {
                write!(f, "invalid graph input \"{}\": {}", name, reason)
            }
            Self::MissingValue { layer, name } => {
                write!(f, "layer \"{}\" input \"{}\" has no value", layer, name)
            }
            Self::DuplicateValue(name) => write!(f, "value \"{}\" is already live", name),
            Self::OperatorError {
                layer,
                op,
                error,
                inputs,
            } => {
                write!(f, "operator \"{}\" ({}) failed: {}. ", layer, op, error)?;
                write_inputs(f, inputs)
            }
            Self::NotSupported { layer, op, inputs } => {
                write!(
                    f,
                    "no backend supports operator \"{}\" ({}). ",
                    layer, op
                )?;
                write_inputs(f, inputs)
            }
            Self::ShapeMismatch {
                layer,
                name,
                expected,
                actual,
            } => write!(
                f,
                "layer \"{}\" output \"{}\" is {} but shape inference expected {}",
                layer, name, actual, expected
            ),
            Self::InferError(err) => write!(f, "shape inference failed: {}", err),
            Self::BuildError(err) => write!(f, "invalid graph: {}", err),
        }
    }
}
