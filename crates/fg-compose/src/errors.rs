#![forbid(unsafe_code)]

use fg_core::{DType, Shape};

/// Composition failures. `Graph` wraps whatever the collaborator framework
/// reported, unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeError<E> {
    EmptyOutputs,
    EmptyTargets,
    DirectionArity {
        expected: usize,
        actual: usize,
    },
    DirectionShape {
        index: usize,
        target: Shape,
        direction: Shape,
    },
    NonDifferentiableOutput {
        index: usize,
        dtype: DType,
    },
    Graph(E),
}

impl<E: std::fmt::Display> std::fmt::Display for ComposeError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyOutputs => write!(f, "forward gradients require at least one output"),
            Self::EmptyTargets => write!(f, "forward gradients require at least one target"),
            Self::DirectionArity { expected, actual } => {
                write!(
                    f,
                    "direction arity mismatch: {expected} targets, {actual} direction entries"
                )
            }
            Self::DirectionShape {
                index,
                target,
                direction,
            } => {
                write!(
                    f,
                    "direction {index} shape {:?} is not broadcast-compatible with target shape {:?}",
                    direction.dims, target.dims
                )
            }
            Self::NonDifferentiableOutput { index, dtype } => {
                write!(
                    f,
                    "output {index} has non-floating dtype {}; directional derivatives are only defined for floating outputs",
                    dtype.as_str()
                )
            }
            Self::Graph(err) => write!(f, "graph framework error: {err}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ComposeError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Graph(err) => Some(err),
            _ => None,
        }
    }
}
