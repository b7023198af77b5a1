//! Collaborator contract for computation-graph frameworks.
//!
//! The forward-gradient composer does not own any differentiation machinery.
//! It drives an external graph framework through these traits: node handles
//! stay opaque, every mutation goes through an explicit builder borrow, and
//! the reverse-mode primitive is the only derivative capability required.

use crate::{DType, Literal, Shape};

/// A reverse-mode pass returns one cotangent per target, either as a dense
/// node or as an indexed (mostly-zero) encoding that some frameworks emit
/// for gather-style operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cotangent<N> {
    Dense(N),
    Indexed(IndexedCotangent<N>),
}

impl<N> Cotangent<N> {
    #[must_use]
    pub fn is_indexed(&self) -> bool {
        matches!(self, Self::Indexed(_))
    }
}

/// Indexed encoding of a cotangent: `values[i]` is the slice of the dense
/// tensor at axis-0 position `indices[i]`; positions not listed are zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedCotangent<N> {
    pub values: N,
    pub indices: N,
    pub dense_shape: Shape,
}

/// Graph-construction surface the composer needs from a framework.
///
/// Implementations append nodes to an explicit builder; they never rely on
/// ambient/global graph state. All methods that create nodes may fail with
/// the framework's own error type, and static shape or dtype inconsistencies
/// must surface here, at construction time.
pub trait GraphBuilder {
    /// Opaque node handle. Only valid for the builder that produced it.
    type Node: Clone + std::fmt::Debug + PartialEq;
    type Error: std::error::Error + 'static;

    fn node_dtype(&self, node: &Self::Node) -> Result<DType, Self::Error>;

    fn node_shape(&self, node: &Self::Node) -> Result<Shape, Self::Error>;

    /// Zero tensor with `node`'s shape and dtype.
    fn zeros_like(&mut self, node: &Self::Node) -> Result<Self::Node, Self::Error>;

    /// Tensor with `node`'s shape, every element set to `fill`.
    fn fill_like(&mut self, node: &Self::Node, fill: Literal) -> Result<Self::Node, Self::Error>;

    /// Force `node`'s shape metadata. Frameworks with partial shape
    /// inference refine the recorded shape here; fully-inferring frameworks
    /// reject a mismatch.
    fn set_shape(&mut self, node: &Self::Node, shape: &Shape) -> Result<(), Self::Error>;

    /// Materialize an indexed cotangent as a dense node.
    fn to_dense(&mut self, indexed: &IndexedCotangent<Self::Node>)
    -> Result<Self::Node, Self::Error>;

    /// Identity pass-through whose evaluation is ordered after every node in
    /// `after`.
    fn gated_identity(
        &mut self,
        node: &Self::Node,
        after: &[Self::Node],
    ) -> Result<Self::Node, Self::Error>;

    /// A node that unconditionally fails graph evaluation with `message`,
    /// ordered after every node in `after`. Used only as a diagnostic gate;
    /// a graph is still valid while the node stays unevaluated.
    fn failing_assert(
        &mut self,
        message: &str,
        after: &[Self::Node],
    ) -> Result<Self::Node, Self::Error>;
}

/// The reverse-mode differentiation primitive.
pub trait ReverseAd: GraphBuilder {
    /// Differentiate `outputs` with respect to `targets`, seeding each
    /// output's cotangent from `seeds` (all-ones when absent). Returns one
    /// entry per target, in order; `None` means no output depends on that
    /// target. Entries may come back dense or indexed.
    fn reverse_gradients(
        &mut self,
        outputs: &[Self::Node],
        targets: &[Self::Node],
        seeds: Option<&[Self::Node]>,
    ) -> Result<Vec<Option<Cotangent<Self::Node>>>, Self::Error>;
}
