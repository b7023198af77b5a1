#![forbid(unsafe_code)]

//! Reference computation-graph collaborator.
//!
//! A deliberately small expression-graph framework implementing the
//! `fg-core` contract: an explicit append-only builder, a handful of
//! differentiable primitives, a demand-driven interpreter that honors
//! control dependencies, and a reverse-mode gradient pass. It exists so the
//! forward-gradient composer can be exercised end to end; it is not a
//! general tensor engine.

mod eval;
mod graph;
mod kernels;
mod reverse;

pub use eval::{EvalError, evaluate};
pub use graph::{Graph, GraphError, Node, NodeId, Op};
