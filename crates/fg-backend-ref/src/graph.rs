#![forbid(unsafe_code)]

use fg_core::contract::{Cotangent, GraphBuilder, IndexedCotangent, ReverseAd};
use fg_core::{DType, Literal, Shape, Value};
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    Placeholder { name: String },
    Constant(Value),
    Fill { fill: Literal },
    Add,
    Sub,
    Mul,
    Neg,
    Sin,
    Cos,
    Exp,
    Sum,
    Broadcast,
    Gather,
    ScatterAdd,
    Identity,
    AssertFail { message: String },
}

impl Op {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Placeholder { .. } => "placeholder",
            Self::Constant(_) => "constant",
            Self::Fill { .. } => "fill",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Neg => "neg",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Exp => "exp",
            Self::Sum => "sum",
            Self::Broadcast => "broadcast",
            Self::Gather => "gather",
            Self::ScatterAdd => "scatter_add",
            Self::Identity => "identity",
            Self::AssertFail { .. } => "assert_fail",
        }
    }
}

/// One graph node. `inputs` carry data edges; `after` carries control-only
/// edges that order evaluation without contributing a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub op: Op,
    pub inputs: SmallVec<[NodeId; 2]>,
    pub after: SmallVec<[NodeId; 2]>,
    pub dtype: DType,
    pub shape: Shape,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    UnknownNode(NodeId),
    DTypeMismatch {
        op: &'static str,
        detail: &'static str,
        actual: DType,
    },
    ShapeMismatch {
        op: &'static str,
        left: Shape,
        right: Shape,
    },
    RankMismatch {
        op: &'static str,
        detail: &'static str,
        actual: usize,
    },
    SeedArity {
        expected: usize,
        actual: usize,
    },
    SeedShape {
        index: usize,
        output: Shape,
        seed: Shape,
    },
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownNode(node) => write!(f, "unknown node n{}", node.0),
            Self::DTypeMismatch { op, detail, actual } => {
                write!(f, "dtype mismatch for {op}: {detail}, got {}", actual.as_str())
            }
            Self::ShapeMismatch { op, left, right } => {
                write!(
                    f,
                    "shape mismatch for {op}: left={:?} right={:?}",
                    left.dims, right.dims
                )
            }
            Self::RankMismatch { op, detail, actual } => {
                write!(f, "rank mismatch for {op}: {detail}, got rank {actual}")
            }
            Self::SeedArity { expected, actual } => {
                write!(
                    f,
                    "seed arity mismatch: {expected} outputs, {actual} seeds"
                )
            }
            Self::SeedShape {
                index,
                output,
                seed,
            } => {
                write!(
                    f,
                    "seed {index} shape {:?} is not broadcast-compatible with output shape {:?}",
                    seed.dims, output.dims
                )
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Append-only expression graph with explicit handles.
///
/// Node ids are handed out in insertion order and every node's inputs must
/// already exist, so id order is a topological order. Shape and dtype are
/// inferred (and checked) at construction time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes.get(id.index()).ok_or(GraphError::UnknownNode(id))
    }

    fn check(&self, id: NodeId) -> Result<(), GraphError> {
        if id.index() < self.nodes.len() {
            Ok(())
        } else {
            Err(GraphError::UnknownNode(id))
        }
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn placeholder(&mut self, name: &str, dtype: DType, shape: Shape) -> NodeId {
        self.push(Node {
            op: Op::Placeholder {
                name: name.to_owned(),
            },
            inputs: smallvec![],
            after: smallvec![],
            dtype,
            shape,
        })
    }

    pub fn constant(&mut self, value: Value) -> NodeId {
        let dtype = value.dtype();
        let shape = value.shape();
        self.push(Node {
            op: Op::Constant(value),
            inputs: smallvec![],
            after: smallvec![],
            dtype,
            shape,
        })
    }

    pub fn fill(&mut self, shape: Shape, fill: Literal) -> NodeId {
        self.push(Node {
            op: Op::Fill { fill },
            inputs: smallvec![],
            after: smallvec![],
            dtype: fill.dtype(),
            shape,
        })
    }

    pub fn add(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, GraphError> {
        self.binary(Op::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, GraphError> {
        self.binary(Op::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: NodeId, rhs: NodeId) -> Result<NodeId, GraphError> {
        self.binary(Op::Mul, lhs, rhs)
    }

    fn binary(&mut self, op: Op, lhs: NodeId, rhs: NodeId) -> Result<NodeId, GraphError> {
        let left = self.node(lhs)?.clone();
        let right = self.node(rhs)?.clone();
        let op_name = op.as_str();

        for operand in [&left, &right] {
            if operand.dtype == DType::Bool {
                return Err(GraphError::DTypeMismatch {
                    op: op_name,
                    detail: "expected numeric operand",
                    actual: operand.dtype,
                });
            }
        }

        // Equal shapes, or one scalar operand broadcast over the other.
        let shape = if left.shape == right.shape || right.shape.is_scalar() {
            left.shape.clone()
        } else if left.shape.is_scalar() {
            right.shape.clone()
        } else {
            return Err(GraphError::ShapeMismatch {
                op: op_name,
                left: left.shape.clone(),
                right: right.shape.clone(),
            });
        };

        let dtype = if left.dtype == DType::F64 || right.dtype == DType::F64 {
            DType::F64
        } else {
            DType::I64
        };

        Ok(self.push(Node {
            op,
            inputs: smallvec![lhs, rhs],
            after: smallvec![],
            dtype,
            shape,
        }))
    }

    pub fn neg(&mut self, input: NodeId) -> Result<NodeId, GraphError> {
        let operand = self.node(input)?.clone();
        if operand.dtype == DType::Bool {
            return Err(GraphError::DTypeMismatch {
                op: Op::Neg.as_str(),
                detail: "expected numeric operand",
                actual: operand.dtype,
            });
        }
        Ok(self.push(Node {
            op: Op::Neg,
            inputs: smallvec![input],
            after: smallvec![],
            dtype: operand.dtype,
            shape: operand.shape,
        }))
    }

    pub fn sin(&mut self, input: NodeId) -> Result<NodeId, GraphError> {
        self.unary_floating(Op::Sin, input)
    }

    pub fn cos(&mut self, input: NodeId) -> Result<NodeId, GraphError> {
        self.unary_floating(Op::Cos, input)
    }

    pub fn exp(&mut self, input: NodeId) -> Result<NodeId, GraphError> {
        self.unary_floating(Op::Exp, input)
    }

    fn unary_floating(&mut self, op: Op, input: NodeId) -> Result<NodeId, GraphError> {
        let operand = self.node(input)?.clone();
        if !operand.dtype.is_floating() {
            return Err(GraphError::DTypeMismatch {
                op: op.as_str(),
                detail: "expected floating operand",
                actual: operand.dtype,
            });
        }
        Ok(self.push(Node {
            op,
            inputs: smallvec![input],
            after: smallvec![],
            dtype: operand.dtype,
            shape: operand.shape,
        }))
    }

    /// Full reduction of every element to a scalar.
    pub fn sum(&mut self, input: NodeId) -> Result<NodeId, GraphError> {
        let operand = self.node(input)?.clone();
        if operand.dtype == DType::Bool {
            return Err(GraphError::DTypeMismatch {
                op: Op::Sum.as_str(),
                detail: "expected numeric operand",
                actual: operand.dtype,
            });
        }
        Ok(self.push(Node {
            op: Op::Sum,
            inputs: smallvec![input],
            after: smallvec![],
            dtype: operand.dtype,
            shape: Shape::scalar(),
        }))
    }

    /// Broadcast a scalar to `shape`.
    pub fn broadcast(&mut self, input: NodeId, shape: Shape) -> Result<NodeId, GraphError> {
        let operand = self.node(input)?.clone();
        if !operand.shape.is_scalar() {
            return Err(GraphError::RankMismatch {
                op: Op::Broadcast.as_str(),
                detail: "expected scalar operand",
                actual: operand.shape.rank(),
            });
        }
        Ok(self.push(Node {
            op: Op::Broadcast,
            inputs: smallvec![input],
            after: smallvec![],
            dtype: operand.dtype,
            shape,
        }))
    }

    /// Axis-0 gather: `out[i, ...] = source[indices[i], ...]`.
    pub fn gather(&mut self, source: NodeId, indices: NodeId) -> Result<NodeId, GraphError> {
        let src = self.node(source)?.clone();
        let idx = self.node(indices)?.clone();
        if src.shape.is_scalar() {
            return Err(GraphError::RankMismatch {
                op: Op::Gather.as_str(),
                detail: "expected source of rank >= 1",
                actual: 0,
            });
        }
        if idx.dtype != DType::I64 {
            return Err(GraphError::DTypeMismatch {
                op: Op::Gather.as_str(),
                detail: "expected i64 indices",
                actual: idx.dtype,
            });
        }
        if idx.shape.rank() != 1 {
            return Err(GraphError::RankMismatch {
                op: Op::Gather.as_str(),
                detail: "expected rank-1 indices",
                actual: idx.shape.rank(),
            });
        }

        let mut dims = Vec::with_capacity(src.shape.rank());
        dims.push(idx.shape.dims[0]);
        dims.extend_from_slice(&src.shape.dims[1..]);
        Ok(self.push(Node {
            op: Op::Gather,
            inputs: smallvec![source, indices],
            after: smallvec![],
            dtype: src.dtype,
            shape: Shape { dims },
        }))
    }

    /// Axis-0 scatter-add into a zero tensor of `dense_shape`:
    /// `out[indices[i], ...] += values[i, ...]`.
    pub fn scatter_add(
        &mut self,
        values: NodeId,
        indices: NodeId,
        dense_shape: Shape,
    ) -> Result<NodeId, GraphError> {
        let vals = self.node(values)?.clone();
        let idx = self.node(indices)?.clone();
        if idx.dtype != DType::I64 {
            return Err(GraphError::DTypeMismatch {
                op: Op::ScatterAdd.as_str(),
                detail: "expected i64 indices",
                actual: idx.dtype,
            });
        }
        if idx.shape.rank() != 1 {
            return Err(GraphError::RankMismatch {
                op: Op::ScatterAdd.as_str(),
                detail: "expected rank-1 indices",
                actual: idx.shape.rank(),
            });
        }
        if vals.shape.is_scalar() || dense_shape.is_scalar() {
            return Err(GraphError::RankMismatch {
                op: Op::ScatterAdd.as_str(),
                detail: "expected values and dense shape of rank >= 1",
                actual: 0,
            });
        }
        if vals.shape.dims[0] != idx.shape.dims[0] || vals.shape.dims[1..] != dense_shape.dims[1..]
        {
            return Err(GraphError::ShapeMismatch {
                op: Op::ScatterAdd.as_str(),
                left: vals.shape.clone(),
                right: dense_shape,
            });
        }
        Ok(self.push(Node {
            op: Op::ScatterAdd,
            inputs: smallvec![values, indices],
            after: smallvec![],
            dtype: vals.dtype,
            shape: dense_shape,
        }))
    }

    /// Identity pass-through, optionally ordered after control-only edges.
    pub fn identity(&mut self, input: NodeId, after: &[NodeId]) -> Result<NodeId, GraphError> {
        let operand = self.node(input)?.clone();
        for dep in after {
            self.check(*dep)?;
        }
        Ok(self.push(Node {
            op: Op::Identity,
            inputs: smallvec![input],
            after: SmallVec::from_slice(after),
            dtype: operand.dtype,
            shape: operand.shape,
        }))
    }

    /// A node that fails evaluation whenever it is actually evaluated.
    pub fn assert_fail(&mut self, message: &str, after: &[NodeId]) -> Result<NodeId, GraphError> {
        for dep in after {
            self.check(*dep)?;
        }
        Ok(self.push(Node {
            op: Op::AssertFail {
                message: message.to_owned(),
            },
            inputs: smallvec![],
            after: SmallVec::from_slice(after),
            dtype: DType::Bool,
            shape: Shape::scalar(),
        }))
    }
}

impl GraphBuilder for Graph {
    type Node = NodeId;
    type Error = GraphError;

    fn node_dtype(&self, node: &NodeId) -> Result<DType, GraphError> {
        Ok(self.node(*node)?.dtype)
    }

    fn node_shape(&self, node: &NodeId) -> Result<Shape, GraphError> {
        Ok(self.node(*node)?.shape.clone())
    }

    fn zeros_like(&mut self, node: &NodeId) -> Result<NodeId, GraphError> {
        let target = self.node(*node)?.clone();
        Ok(self.fill(target.shape, Literal::zero_of(target.dtype)))
    }

    fn fill_like(&mut self, node: &NodeId, fill: Literal) -> Result<NodeId, GraphError> {
        let target = self.node(*node)?.clone();
        if fill.dtype() != target.dtype {
            return Err(GraphError::DTypeMismatch {
                op: "fill",
                detail: "fill literal dtype must match the reference node",
                actual: fill.dtype(),
            });
        }
        Ok(self.fill(target.shape, fill))
    }

    fn set_shape(&mut self, node: &NodeId, shape: &Shape) -> Result<(), GraphError> {
        // Shapes here are always fully inferred, so forcing metadata can
        // only confirm it.
        let recorded = self.node(*node)?.shape.clone();
        if recorded == *shape {
            Ok(())
        } else {
            Err(GraphError::ShapeMismatch {
                op: "set_shape",
                left: recorded,
                right: shape.clone(),
            })
        }
    }

    fn to_dense(&mut self, indexed: &IndexedCotangent<NodeId>) -> Result<NodeId, GraphError> {
        self.scatter_add(indexed.values, indexed.indices, indexed.dense_shape.clone())
    }

    fn gated_identity(&mut self, node: &NodeId, after: &[NodeId]) -> Result<NodeId, GraphError> {
        self.identity(*node, after)
    }

    fn failing_assert(&mut self, message: &str, after: &[NodeId]) -> Result<NodeId, GraphError> {
        self.assert_fail(message, after)
    }
}

impl ReverseAd for Graph {
    fn reverse_gradients(
        &mut self,
        outputs: &[NodeId],
        targets: &[NodeId],
        seeds: Option<&[NodeId]>,
    ) -> Result<Vec<Option<Cotangent<NodeId>>>, GraphError> {
        crate::reverse::reverse_gradients(self, outputs, targets, seeds)
    }
}

#[cfg(test)]
mod tests {
    use super::{Graph, GraphError, NodeId, Op};
    use fg_core::contract::GraphBuilder;
    use fg_core::{DType, Literal, Shape, Value};

    #[test]
    fn binary_op_infers_broadcast_shape() {
        let mut graph = Graph::new();
        let scalar = graph.placeholder("s", DType::F64, Shape::scalar());
        let vector = graph.placeholder("v", DType::F64, Shape::vector(4));
        let out = graph.mul(scalar, vector).expect("scalar * vector");
        assert_eq!(graph.node(out).unwrap().shape, Shape::vector(4));
    }

    #[test]
    fn mismatched_tensor_shapes_are_rejected_at_construction() {
        let mut graph = Graph::new();
        let a = graph.placeholder("a", DType::F64, Shape::vector(2));
        let b = graph.placeholder("b", DType::F64, Shape::vector(3));
        let err = graph.add(a, b).expect_err("2 + 3 elements should fail");
        assert!(matches!(err, GraphError::ShapeMismatch { op: "add", .. }));
    }

    #[test]
    fn sin_of_integer_is_rejected() {
        let mut graph = Graph::new();
        let n = graph.placeholder("n", DType::I64, Shape::scalar());
        let err = graph.sin(n).expect_err("sin(i64) should fail");
        assert!(matches!(err, GraphError::DTypeMismatch { op: "sin", .. }));
    }

    #[test]
    fn gather_shape_combines_indices_and_source_trailing_dims() {
        let mut graph = Graph::new();
        let source = graph.placeholder("src", DType::F64, Shape::of(&[5, 3]));
        let indices = graph.constant(Value::vector_i64(&[0, 4]).unwrap());
        let out = graph.gather(source, indices).expect("gather");
        assert_eq!(graph.node(out).unwrap().shape, Shape::of(&[2, 3]));
    }

    #[test]
    fn foreign_node_id_is_unknown() {
        let graph = Graph::new();
        let err = graph.node(NodeId(7)).expect_err("empty graph has no n7");
        assert_eq!(err, GraphError::UnknownNode(NodeId(7)));
    }

    #[test]
    fn zeros_like_matches_reference_dtype_and_shape() {
        let mut graph = Graph::new();
        let n = graph.placeholder("n", DType::I64, Shape::vector(3));
        let zeros = graph.zeros_like(&n).expect("zeros_like");
        let node = graph.node(zeros).unwrap();
        assert_eq!(node.dtype, DType::I64);
        assert_eq!(node.shape, Shape::vector(3));
        assert_eq!(node.op, Op::Fill { fill: Literal::I64(0) });
    }

    #[test]
    fn set_shape_confirms_but_never_rewrites() {
        let mut graph = Graph::new();
        let n = graph.placeholder("n", DType::F64, Shape::vector(3));
        graph.set_shape(&n, &Shape::vector(3)).expect("same shape is fine");
        let err = graph
            .set_shape(&n, &Shape::vector(4))
            .expect_err("different shape must be rejected");
        assert!(matches!(err, GraphError::ShapeMismatch { op: "set_shape", .. }));
    }
}
