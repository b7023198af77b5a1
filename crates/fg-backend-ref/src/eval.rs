#![forbid(unsafe_code)]

//! Demand-driven graph interpreter.
//!
//! Only nodes reachable from the fetched handles (through data or control
//! edges) are evaluated, so diagnostic subgraphs stay inert until something
//! actually depends on them.

use std::collections::BTreeMap;

use fg_core::{DType, Shape, Value, ValueError};
use rustc_hash::FxHashSet;

use crate::graph::{Graph, Node, NodeId, Op};
use crate::kernels;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    UnknownNode(NodeId),
    MissingFeed {
        node: NodeId,
        name: String,
    },
    FeedShapeMismatch {
        node: NodeId,
        expected: Shape,
        actual: Shape,
    },
    FeedDTypeMismatch {
        node: NodeId,
        expected: DType,
        actual: DType,
    },
    AssertionFailed {
        message: String,
    },
    TypeMismatch {
        op: &'static str,
        detail: &'static str,
    },
    IndexOutOfBounds {
        op: &'static str,
        index: i64,
        axis_size: usize,
    },
    InvalidTensor(ValueError),
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownNode(node) => write!(f, "unknown node n{}", node.0),
            Self::MissingFeed { node, name } => {
                write!(f, "placeholder n{} ({name}) has no feed", node.0)
            }
            Self::FeedShapeMismatch {
                node,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "feed for n{} has shape {:?}, placeholder expects {:?}",
                    node.0, actual.dims, expected.dims
                )
            }
            Self::FeedDTypeMismatch {
                node,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "feed for n{} has dtype {}, placeholder expects {}",
                    node.0,
                    actual.as_str(),
                    expected.as_str()
                )
            }
            Self::AssertionFailed { message } => write!(f, "assertion failed: {message}"),
            Self::TypeMismatch { op, detail } => write!(f, "type mismatch for {op}: {detail}"),
            Self::IndexOutOfBounds {
                op,
                index,
                axis_size,
            } => {
                write!(
                    f,
                    "{op} index {index} out of bounds for axis size {axis_size}"
                )
            }
            Self::InvalidTensor(err) => write!(f, "invalid tensor: {err}"),
        }
    }
}

impl std::error::Error for EvalError {}

impl From<ValueError> for EvalError {
    fn from(value: ValueError) -> Self {
        Self::InvalidTensor(value)
    }
}

fn needed_nodes(graph: &Graph, fetches: &[NodeId]) -> Result<FxHashSet<NodeId>, EvalError> {
    let mut needed: FxHashSet<NodeId> = FxHashSet::default();
    let mut stack: Vec<NodeId> = fetches.to_vec();

    while let Some(id) = stack.pop() {
        let node = graph.node(id).map_err(|_| EvalError::UnknownNode(id))?;
        if !needed.insert(id) {
            continue;
        }
        stack.extend(node.inputs.iter().copied());
        stack.extend(node.after.iter().copied());
    }

    Ok(needed)
}

fn input_value<'a>(
    env: &'a BTreeMap<NodeId, Value>,
    node: &Node,
    position: usize,
) -> Result<&'a Value, EvalError> {
    let id = node.inputs[position];
    env.get(&id).ok_or(EvalError::UnknownNode(id))
}

/// Evaluate `fetches` against `feeds`, returning one value per fetch.
///
/// Node ids are a topological order by construction, so a single ascending
/// pass over the needed set evaluates every dependency (control dependencies
/// included) before its dependents.
pub fn evaluate(
    graph: &Graph,
    fetches: &[NodeId],
    feeds: &BTreeMap<NodeId, Value>,
) -> Result<Vec<Value>, EvalError> {
    let needed = needed_nodes(graph, fetches)?;
    let mut env: BTreeMap<NodeId, Value> = BTreeMap::new();

    for index in 0..graph.node_count() {
        let id = NodeId(index as u32);
        if !needed.contains(&id) {
            continue;
        }
        let node = graph.node(id).map_err(|_| EvalError::UnknownNode(id))?;

        let value = match &node.op {
            Op::Placeholder { name } => {
                let feed = feeds.get(&id).ok_or_else(|| EvalError::MissingFeed {
                    node: id,
                    name: name.clone(),
                })?;
                if feed.dtype() != node.dtype {
                    return Err(EvalError::FeedDTypeMismatch {
                        node: id,
                        expected: node.dtype,
                        actual: feed.dtype(),
                    });
                }
                if feed.shape() != node.shape {
                    return Err(EvalError::FeedShapeMismatch {
                        node: id,
                        expected: node.shape.clone(),
                        actual: feed.shape(),
                    });
                }
                feed.clone()
            }
            Op::Constant(value) => value.clone(),
            Op::Fill { fill } => kernels::eval_fill(&node.shape, *fill)?,
            Op::Add => kernels::eval_binary_elementwise(
                "add",
                input_value(&env, node, 0)?,
                input_value(&env, node, 1)?,
                |a, b| a + b,
                |a, b| a + b,
            )?,
            Op::Sub => kernels::eval_binary_elementwise(
                "sub",
                input_value(&env, node, 0)?,
                input_value(&env, node, 1)?,
                |a, b| a - b,
                |a, b| a - b,
            )?,
            Op::Mul => kernels::eval_binary_elementwise(
                "mul",
                input_value(&env, node, 0)?,
                input_value(&env, node, 1)?,
                |a, b| a * b,
                |a, b| a * b,
            )?,
            Op::Neg => kernels::eval_neg(input_value(&env, node, 0)?)?,
            Op::Sin => kernels::eval_unary_floating("sin", input_value(&env, node, 0)?, f64::sin)?,
            Op::Cos => kernels::eval_unary_floating("cos", input_value(&env, node, 0)?, f64::cos)?,
            Op::Exp => kernels::eval_unary_floating("exp", input_value(&env, node, 0)?, f64::exp)?,
            Op::Sum => kernels::eval_sum(input_value(&env, node, 0)?)?,
            Op::Broadcast => kernels::eval_broadcast(input_value(&env, node, 0)?, &node.shape)?,
            Op::Gather => kernels::eval_gather(
                input_value(&env, node, 0)?,
                input_value(&env, node, 1)?,
            )?,
            Op::ScatterAdd => kernels::eval_scatter_add(
                input_value(&env, node, 0)?,
                input_value(&env, node, 1)?,
                &node.shape,
            )?,
            Op::Identity => input_value(&env, node, 0)?.clone(),
            Op::AssertFail { message } => {
                return Err(EvalError::AssertionFailed {
                    message: message.clone(),
                });
            }
        };

        env.insert(id, value);
    }

    fetches
        .iter()
        .map(|id| env.get(id).cloned().ok_or(EvalError::UnknownNode(*id)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{EvalError, evaluate};
    use crate::graph::Graph;
    use fg_core::{DType, Shape, Value};
    use std::collections::BTreeMap;

    #[test]
    fn evaluates_simple_expression_with_feeds() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", DType::F64, Shape::scalar());
        let squared = graph.mul(x, x).unwrap();
        let shifted = graph.add(squared, x).unwrap();

        let mut feeds = BTreeMap::new();
        feeds.insert(x, Value::scalar_f64(3.0));
        let outputs = evaluate(&graph, &[shifted], &feeds).expect("x*x + x");
        assert_eq!(outputs, vec![Value::scalar_f64(12.0)]);
    }

    #[test]
    fn missing_feed_is_reported_with_placeholder_name() {
        let mut graph = Graph::new();
        let x = graph.placeholder("input", DType::F64, Shape::scalar());
        let err = evaluate(&graph, &[x], &BTreeMap::new()).expect_err("no feed provided");
        assert!(matches!(err, EvalError::MissingFeed { name, .. } if name == "input"));
    }

    #[test]
    fn feed_shape_is_validated() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", DType::F64, Shape::vector(2));
        let mut feeds = BTreeMap::new();
        feeds.insert(x, Value::vector_f64(&[1.0, 2.0, 3.0]).unwrap());
        let err = evaluate(&graph, &[x], &feeds).expect_err("wrong shape feed");
        assert!(matches!(err, EvalError::FeedShapeMismatch { .. }));
    }

    #[test]
    fn control_dependency_forces_assert_evaluation() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", DType::F64, Shape::scalar());
        let guard = graph.assert_fail("must stay unevaluated", &[x]).unwrap();
        let gated = graph.identity(x, &[guard]).unwrap();

        let mut feeds = BTreeMap::new();
        feeds.insert(x, Value::scalar_f64(1.0));

        // Fetching the plain placeholder never touches the assert.
        assert!(evaluate(&graph, &[x], &feeds).is_ok());

        let err = evaluate(&graph, &[gated], &feeds).expect_err("gated fetch trips the assert");
        assert_eq!(
            err,
            EvalError::AssertionFailed {
                message: "must stay unevaluated".to_owned(),
            }
        );
    }

    #[test]
    fn unneeded_nodes_are_not_evaluated() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", DType::F64, Shape::scalar());
        // A poisoned branch nothing fetches.
        let _boom = graph.assert_fail("dead branch", &[]).unwrap();
        let doubled = graph.add(x, x).unwrap();

        let mut feeds = BTreeMap::new();
        feeds.insert(x, Value::scalar_f64(2.0));
        let outputs = evaluate(&graph, &[doubled], &feeds).expect("dead assert must stay dead");
        assert_eq!(outputs, vec![Value::scalar_f64(4.0)]);
    }
}
