#![forbid(unsafe_code)]

//! Shared test programs for the conformance suite.
//!
//! Each builder returns a small reference graph together with the handles a
//! test needs. Programs are rebuilt per call so tests never share builder
//! state.

use fg_backend_ref::{Graph, NodeId};
use fg_core::{DType, Shape, Value};

/// A test program: its graph plus the handles tests differentiate through.
#[derive(Debug, Clone)]
pub struct Program {
    pub graph: Graph,
    pub inputs: Vec<NodeId>,
    pub outputs: Vec<NodeId>,
}

/// `y = x1 * x2` over two scalar placeholders.
#[must_use]
pub fn product_program() -> Program {
    let mut graph = Graph::new();
    let x1 = graph.placeholder("x1", DType::F64, Shape::scalar());
    let x2 = graph.placeholder("x2", DType::F64, Shape::scalar());
    let y = graph.mul(x1, x2).expect("product program should build");
    Program {
        graph,
        inputs: vec![x1, x2],
        outputs: vec![y],
    }
}

/// `y = x*x + sin(x)` over a single placeholder of the given shape.
#[must_use]
pub fn elementwise_program(shape: &Shape) -> Program {
    let mut graph = Graph::new();
    let x = graph.placeholder("x", DType::F64, shape.clone());
    let squared = graph.mul(x, x).expect("square should build");
    let wave = graph.sin(x).expect("sin should build");
    let y = graph.add(squared, wave).expect("sum should build");
    Program {
        graph,
        inputs: vec![x],
        outputs: vec![y],
    }
}

/// `y = x1 * x1` with a second placeholder no output depends on.
#[must_use]
pub fn partially_connected_program() -> Program {
    let mut graph = Graph::new();
    let x1 = graph.placeholder("x1", DType::F64, Shape::scalar());
    let x2 = graph.placeholder("x2", DType::F64, Shape::scalar());
    let y = graph.mul(x1, x1).expect("square should build");
    Program {
        graph,
        inputs: vec![x1, x2],
        outputs: vec![y],
    }
}

/// `y = gather(x, [0, 2])` over a 4-vector placeholder. Differentiating
/// through the gather makes the first reverse pass produce an indexed
/// cotangent.
#[must_use]
pub fn gather_program() -> Program {
    let mut graph = Graph::new();
    let x = graph.placeholder("x", DType::F64, Shape::vector(4));
    let indices = graph.constant(Value::vector_i64(&[0, 2]).expect("index vector"));
    let y = graph.gather(x, indices).expect("gather program should build");
    Program {
        graph,
        inputs: vec![x],
        outputs: vec![y],
    }
}

/// Two outputs, the second a constant expression no input reaches:
/// `y1 = x * x`, `y2 = sin(1)`.
#[must_use]
pub fn constant_second_output_program() -> Program {
    let mut graph = Graph::new();
    let x = graph.placeholder("x", DType::F64, Shape::scalar());
    let y1 = graph.mul(x, x).expect("square should build");
    let one = graph.constant(Value::scalar_f64(1.0));
    let y2 = graph.sin(one).expect("sin should build");
    Program {
        graph,
        inputs: vec![x],
        outputs: vec![y1, y2],
    }
}

/// Panics unless `actual` holds floating values elementwise within `tol` of
/// `expected`.
pub fn assert_close(actual: &Value, expected: &[f64], tol: f64) {
    let values = actual
        .to_f64_vec()
        .unwrap_or_else(|| panic!("expected floating value, got {actual:?}"));
    assert_eq!(
        values.len(),
        expected.len(),
        "element count mismatch: got {values:?}, expected {expected:?}"
    );
    for (index, (got, want)) in values.iter().zip(expected.iter()).enumerate() {
        assert!(
            (got - want).abs() <= tol,
            "element {index}: got {got}, expected {want} (tol {tol})"
        );
    }
}
