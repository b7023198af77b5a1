#![forbid(unsafe_code)]

//! The forward-gradient composer.
//!
//! Forward-mode (directional) derivatives out of two reverse-mode passes:
//! differentiate the outputs against the targets with symbolic dual seeds,
//! then differentiate that result against the duals along the requested
//! direction. The first pass is linear in the duals, so its gradient with
//! respect to them is exactly the Jacobian-vector product.

use fg_core::Literal;
use fg_core::contract::{Cotangent, ReverseAd};

use crate::errors::ComposeError;

/// Configuration for a forward-gradient composition.
///
/// `assert_unused` is a diagnostic mode: the dual placeholders are filled
/// with NaN instead of zeros and every intermediate is gated behind a
/// deliberately-failing assertion, so that numerically evaluating an
/// intermediate (instead of only differentiating it again) fails loudly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForwardGradients {
    assert_unused: bool,
}

/// Everything a composition produced: the directional derivatives plus the
/// dual placeholders and gated intermediates, exposed for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedForwardGradients<N> {
    /// One node per output: the directional derivative, same shape as the
    /// paired output.
    pub directional: Vec<N>,
    /// The dual placeholders, one per output. Never meant to be evaluated.
    pub duals: Vec<N>,
    /// First-pass results, one per target, dense and shape-aligned. Purely
    /// symbolic; in `assert_unused` mode evaluating one trips the gate.
    pub intermediates: Vec<N>,
}

impl ForwardGradients {
    #[must_use]
    pub fn new() -> Self {
        Self {
            assert_unused: false,
        }
    }

    #[must_use]
    pub fn with_assert_unused(mut self, enabled: bool) -> Self {
        self.assert_unused = enabled;
        self
    }

    /// Compose the directional derivatives of `ys` with respect to `xs`
    /// along `direction` (all-ones when absent).
    pub fn compose<G: ReverseAd>(
        &self,
        graph: &mut G,
        ys: &[G::Node],
        xs: &[G::Node],
        direction: Option<&[G::Node]>,
    ) -> Result<ComposedForwardGradients<G::Node>, ComposeError<G::Error>> {
        if ys.is_empty() {
            return Err(ComposeError::EmptyOutputs);
        }
        if xs.is_empty() {
            return Err(ComposeError::EmptyTargets);
        }

        for (index, y) in ys.iter().enumerate() {
            let dtype = graph.node_dtype(y).map_err(ComposeError::Graph)?;
            if !dtype.is_floating() {
                return Err(ComposeError::NonDifferentiableOutput { index, dtype });
            }
        }

        if let Some(direction) = direction {
            if direction.len() != xs.len() {
                return Err(ComposeError::DirectionArity {
                    expected: xs.len(),
                    actual: direction.len(),
                });
            }
            for (index, (x, entry)) in xs.iter().zip(direction.iter()).enumerate() {
                let target = graph.node_shape(x).map_err(ComposeError::Graph)?;
                let along = graph.node_shape(entry).map_err(ComposeError::Graph)?;
                if along != target && !along.is_scalar() {
                    return Err(ComposeError::DirectionShape {
                        index,
                        target,
                        direction: along,
                    });
                }
            }
        }

        // Dual placeholders, one per output. The fill value is irrelevant to
        // the result; NaN in diagnostic mode makes accidental evaluation
        // visible even without the assertion gate.
        let fill = if self.assert_unused {
            Literal::from_f64(f64::NAN)
        } else {
            Literal::from_f64(0.0)
        };
        let duals = ys
            .iter()
            .map(|y| graph.fill_like(y, fill))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ComposeError::Graph)?;

        // First reverse pass: seed the outputs with the duals. Each entry is
        // linear in the duals.
        let pulled = graph
            .reverse_gradients(ys, xs, Some(&duals))
            .map_err(ComposeError::Graph)?;

        // The second pass and shape forcing need a uniform dense node type.
        let mut intermediates = pulled
            .into_iter()
            .map(|entry| match entry {
                None => Ok(None),
                Some(Cotangent::Dense(node)) => Ok(Some(node)),
                Some(Cotangent::Indexed(indexed)) => graph.to_dense(&indexed).map(Some),
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(ComposeError::Graph)?;

        if self.assert_unused {
            let present: Vec<G::Node> = intermediates.iter().flatten().cloned().collect();
            let guard = graph
                .failing_assert("forward gradients intermediate was evaluated", &present)
                .map_err(ComposeError::Graph)?;
            for slot in &mut intermediates {
                if let Some(node) = slot.take() {
                    let gated = graph
                        .gated_identity(&node, std::slice::from_ref(&guard))
                        .map_err(ComposeError::Graph)?;
                    *slot = Some(gated);
                }
            }
        }

        // Targets no output depends on still get a defined, zero-valued
        // intermediate so indices stay aligned across both passes.
        let mut aligned = Vec::with_capacity(xs.len());
        for (x, slot) in xs.iter().zip(intermediates) {
            let node = match slot {
                Some(node) => node,
                None => graph.zeros_like(x).map_err(ComposeError::Graph)?,
            };
            let shape = graph.node_shape(x).map_err(ComposeError::Graph)?;
            graph.set_shape(&node, &shape).map_err(ComposeError::Graph)?;
            aligned.push(node);
        }

        // Second reverse pass: differentiate the intermediates against the
        // duals along the requested direction.
        let pushed = graph
            .reverse_gradients(&aligned, &duals, direction)
            .map_err(ComposeError::Graph)?;

        let mut directional = Vec::with_capacity(ys.len());
        for (y, entry) in ys.iter().zip(pushed) {
            let node = match entry {
                None => graph.zeros_like(y).map_err(ComposeError::Graph)?,
                Some(Cotangent::Dense(node)) => node,
                Some(Cotangent::Indexed(indexed)) => {
                    graph.to_dense(&indexed).map_err(ComposeError::Graph)?
                }
            };
            let shape = graph.node_shape(y).map_err(ComposeError::Graph)?;
            graph.set_shape(&node, &shape).map_err(ComposeError::Graph)?;
            directional.push(node);
        }

        Ok(ComposedForwardGradients {
            directional,
            duals,
            intermediates: aligned,
        })
    }
}

/// Directional derivatives of `ys` with respect to `xs` along `direction`.
///
/// Leaving `direction` unset is equivalent to passing an all-ones tensor per
/// target. The result has one node per output, shaped like that output.
pub fn forward_gradients<G: ReverseAd>(
    graph: &mut G,
    ys: &[G::Node],
    xs: &[G::Node],
    direction: Option<&[G::Node]>,
) -> Result<Vec<G::Node>, ComposeError<G::Error>> {
    Ok(ForwardGradients::new()
        .compose(graph, ys, xs, direction)?
        .directional)
}
