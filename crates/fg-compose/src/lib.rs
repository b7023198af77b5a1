#![forbid(unsafe_code)]

pub mod compose;
pub mod errors;

pub use compose::{ComposedForwardGradients, ForwardGradients, forward_gradients};
pub use errors::ComposeError;

#[cfg(test)]
mod tests {
    use super::*;
    use fg_backend_ref::{Graph, NodeId, evaluate};
    use fg_core::{DType, Shape, Value};
    use std::collections::BTreeMap;

    fn product_graph() -> (Graph, NodeId, NodeId, NodeId) {
        let mut graph = Graph::new();
        let x1 = graph.placeholder("x1", DType::F64, Shape::scalar());
        let x2 = graph.placeholder("x2", DType::F64, Shape::scalar());
        let y = graph.mul(x1, x2).expect("x1 * x2");
        (graph, x1, x2, y)
    }

    fn feeds(entries: &[(NodeId, f64)]) -> BTreeMap<NodeId, Value> {
        entries
            .iter()
            .map(|(id, value)| (*id, Value::scalar_f64(*value)))
            .collect()
    }

    #[test]
    fn product_along_first_axis_recovers_other_factor() {
        let (mut graph, x1, x2, y) = product_graph();
        let one = graph.constant(Value::scalar_f64(1.0));
        let zero = graph.constant(Value::scalar_f64(0.0));

        let result = forward_gradients(&mut graph, &[y], &[x1, x2], Some(&[one, zero]))
            .expect("compose should succeed");
        let outputs = evaluate(&graph, &result, &feeds(&[(x1, 3.0), (x2, 5.0)]))
            .expect("evaluation should succeed");
        assert_eq!(outputs, vec![Value::scalar_f64(5.0)]);
    }

    #[test]
    fn product_along_second_axis_recovers_first_factor() {
        let (mut graph, x1, x2, y) = product_graph();
        let zero = graph.constant(Value::scalar_f64(0.0));
        let one = graph.constant(Value::scalar_f64(1.0));

        let result = forward_gradients(&mut graph, &[y], &[x1, x2], Some(&[zero, one]))
            .expect("compose should succeed");
        let outputs = evaluate(&graph, &result, &feeds(&[(x1, 3.0), (x2, 5.0)]))
            .expect("evaluation should succeed");
        assert_eq!(outputs, vec![Value::scalar_f64(3.0)]);
    }

    #[test]
    fn default_direction_is_all_ones() {
        let (mut graph, x1, x2, y) = product_graph();
        let result = forward_gradients(&mut graph, &[y], &[x1, x2], None)
            .expect("compose should succeed");
        let outputs = evaluate(&graph, &result, &feeds(&[(x1, 3.0), (x2, 5.0)]))
            .expect("evaluation should succeed");
        // dy = x2·dx1 + x1·dx2 with dx1 = dx2 = 1.
        assert_eq!(outputs, vec![Value::scalar_f64(8.0)]);
    }

    #[test]
    fn empty_outputs_are_rejected() {
        let (mut graph, x1, _, _) = product_graph();
        let err = forward_gradients(&mut graph, &[], &[x1], None)
            .expect_err("no outputs should fail");
        assert_eq!(err, ComposeError::EmptyOutputs);
    }

    #[test]
    fn empty_targets_are_rejected() {
        let (mut graph, _, _, y) = product_graph();
        let err =
            forward_gradients(&mut graph, &[y], &[], None).expect_err("no targets should fail");
        assert_eq!(err, ComposeError::EmptyTargets);
    }

    #[test]
    fn integer_output_is_rejected_up_front() {
        let mut graph = Graph::new();
        let n = graph.placeholder("n", DType::I64, Shape::scalar());
        let y = graph.add(n, n).expect("n + n");

        let err = forward_gradients(&mut graph, &[y], &[n], None)
            .expect_err("integer output should fail");
        assert_eq!(
            err,
            ComposeError::NonDifferentiableOutput {
                index: 0,
                dtype: DType::I64,
            }
        );
    }

    #[test]
    fn direction_arity_is_checked() {
        let (mut graph, x1, x2, y) = product_graph();
        let one = graph.constant(Value::scalar_f64(1.0));
        let err = forward_gradients(&mut graph, &[y], &[x1, x2], Some(&[one]))
            .expect_err("one direction entry for two targets");
        assert_eq!(
            err,
            ComposeError::DirectionArity {
                expected: 2,
                actual: 1,
            }
        );
    }

    #[test]
    fn direction_shape_must_be_broadcast_compatible() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", DType::F64, Shape::vector(3));
        let y = graph.mul(x, x).expect("x * x");
        let bad = graph.constant(Value::vector_f64(&[1.0, 1.0]).unwrap());

        let err = forward_gradients(&mut graph, &[y], &[x], Some(&[bad]))
            .expect_err("2-vector direction for 3-vector target");
        assert!(matches!(err, ComposeError::DirectionShape { index: 0, .. }));
    }

    #[test]
    fn composition_exposes_aligned_duals_and_intermediates() {
        let (mut graph, x1, x2, y) = product_graph();
        let composed = ForwardGradients::new()
            .compose(&mut graph, &[y], &[x1, x2], None)
            .expect("compose should succeed");
        assert_eq!(composed.directional.len(), 1);
        assert_eq!(composed.duals.len(), 1);
        assert_eq!(composed.intermediates.len(), 2);
    }
}
