#![forbid(unsafe_code)]

//! Shared proptest strategies for core value types.

use crate::{DType, Literal, Shape};
use proptest::prelude::*;

pub fn any_dtype() -> impl Strategy<Value = DType> {
    prop_oneof![Just(DType::F64), Just(DType::I64), Just(DType::Bool)]
}

pub fn any_literal() -> impl Strategy<Value = Literal> {
    prop_oneof![
        any::<i64>().prop_map(Literal::I64),
        any::<bool>().prop_map(Literal::Bool),
        proptest::num::f64::NORMAL.prop_map(Literal::from_f64),
    ]
}

/// Shapes small enough that element counts stay comfortably in-range.
pub fn small_shape() -> impl Strategy<Value = Shape> {
    proptest::collection::vec(1_u32..5, 0..4).prop_map(|dims| Shape { dims })
}
