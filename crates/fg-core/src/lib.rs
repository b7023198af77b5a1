#![forbid(unsafe_code)]

pub mod contract;

#[cfg(test)]
pub mod proptest_strategies;

use serde::{Deserialize, Serialize};

pub use contract::{Cotangent, GraphBuilder, IndexedCotangent, ReverseAd};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    F64,
    I64,
    Bool,
}

impl DType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::F64 => "f64",
            Self::I64 => "i64",
            Self::Bool => "bool",
        }
    }

    /// Floating dtypes are the only ones a derivative can be taken in.
    #[must_use]
    pub fn is_floating(self) -> bool {
        matches!(self, Self::F64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub dims: Vec<u32>,
}

impl Shape {
    #[must_use]
    pub fn scalar() -> Self {
        Self { dims: Vec::new() }
    }

    #[must_use]
    pub fn vector(len: u32) -> Self {
        Self { dims: vec![len] }
    }

    #[must_use]
    pub fn of(dims: &[u32]) -> Self {
        Self {
            dims: dims.to_vec(),
        }
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    #[must_use]
    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    #[must_use]
    pub fn element_count(&self) -> Option<u64> {
        self.dims
            .iter()
            .try_fold(1_u64, |acc, dim| acc.checked_mul(u64::from(*dim)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Literal {
    I64(i64),
    Bool(bool),
    F64Bits(u64),
}

impl Literal {
    #[must_use]
    pub fn from_f64(value: f64) -> Self {
        Self::F64Bits(value.to_bits())
    }

    #[must_use]
    pub fn as_f64(self) -> Option<f64> {
        match self {
            Self::F64Bits(bits) => Some(f64::from_bits(bits)),
            Self::I64(value) => Some(value as f64),
            Self::Bool(_) => None,
        }
    }

    #[must_use]
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Self::I64(value) => Some(value),
            Self::Bool(_) | Self::F64Bits(_) => None,
        }
    }

    #[must_use]
    pub fn dtype(self) -> DType {
        match self {
            Self::I64(_) => DType::I64,
            Self::Bool(_) => DType::Bool,
            Self::F64Bits(_) => DType::F64,
        }
    }

    /// Additive identity for a dtype.
    #[must_use]
    pub fn zero_of(dtype: DType) -> Self {
        match dtype {
            DType::F64 => Self::from_f64(0.0),
            DType::I64 => Self::I64(0),
            DType::Bool => Self::Bool(false),
        }
    }

    /// Multiplicative identity for a dtype.
    #[must_use]
    pub fn one_of(dtype: DType) -> Self {
        match dtype {
            DType::F64 => Self::from_f64(1.0),
            DType::I64 => Self::I64(1),
            DType::Bool => Self::Bool(true),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Scalar(Literal),
    Tensor(TensorValue),
}

impl Value {
    #[must_use]
    pub fn scalar_i64(value: i64) -> Self {
        Self::Scalar(Literal::I64(value))
    }

    #[must_use]
    pub fn scalar_f64(value: f64) -> Self {
        Self::Scalar(Literal::from_f64(value))
    }

    #[must_use]
    pub fn scalar_bool(value: bool) -> Self {
        Self::Scalar(Literal::Bool(value))
    }

    pub fn vector_i64(values: &[i64]) -> Result<Self, ValueError> {
        let elements = values.iter().copied().map(Literal::I64).collect::<Vec<_>>();
        Ok(Self::Tensor(TensorValue::new(
            DType::I64,
            Shape::vector(values.len() as u32),
            elements,
        )?))
    }

    pub fn vector_f64(values: &[f64]) -> Result<Self, ValueError> {
        let elements = values
            .iter()
            .copied()
            .map(Literal::from_f64)
            .collect::<Vec<_>>();
        Ok(Self::Tensor(TensorValue::new(
            DType::F64,
            Shape::vector(values.len() as u32),
            elements,
        )?))
    }

    #[must_use]
    pub fn as_scalar_literal(&self) -> Option<Literal> {
        match self {
            Self::Scalar(lit) => Some(*lit),
            Self::Tensor(_) => None,
        }
    }

    #[must_use]
    pub fn as_f64_scalar(&self) -> Option<f64> {
        self.as_scalar_literal().and_then(Literal::as_f64)
    }

    #[must_use]
    pub fn as_tensor(&self) -> Option<&TensorValue> {
        match self {
            Self::Scalar(_) => None,
            Self::Tensor(tensor) => Some(tensor),
        }
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Scalar(lit) => lit.dtype(),
            Self::Tensor(t) => t.dtype,
        }
    }

    #[must_use]
    pub fn shape(&self) -> Shape {
        match self {
            Self::Scalar(_) => Shape::scalar(),
            Self::Tensor(t) => t.shape.clone(),
        }
    }

    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            Self::Scalar(lit) => lit.as_f64().map(|v| vec![v]),
            Self::Tensor(t) => t.to_f64_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorValue {
    pub dtype: DType,
    pub shape: Shape,
    pub elements: Vec<Literal>,
}

impl TensorValue {
    pub fn new(dtype: DType, shape: Shape, elements: Vec<Literal>) -> Result<Self, ValueError> {
        let expected_count = shape.element_count().ok_or(ValueError::ShapeOverflow {
            shape: shape.clone(),
        })?;

        if expected_count != elements.len() as u64 {
            return Err(ValueError::ElementCountMismatch {
                shape,
                expected_count,
                actual_count: elements.len(),
            });
        }

        Ok(Self {
            dtype,
            shape,
            elements,
        })
    }

    /// Tensor of the given shape with every element set to `fill`.
    pub fn filled(dtype: DType, shape: Shape, fill: Literal) -> Result<Self, ValueError> {
        let count = shape.element_count().ok_or(ValueError::ShapeOverflow {
            shape: shape.clone(),
        })?;
        let count = usize::try_from(count).map_err(|_| ValueError::ShapeOverflow {
            shape: shape.clone(),
        })?;
        Self::new(dtype, shape, vec![fill; count])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        self.elements.iter().copied().map(Literal::as_f64).collect()
    }

    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        self.elements.iter().copied().map(Literal::as_i64).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    ShapeOverflow {
        shape: Shape,
    },
    ElementCountMismatch {
        shape: Shape,
        expected_count: u64,
        actual_count: usize,
    },
}

impl std::fmt::Display for ValueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShapeOverflow { shape } => {
                write!(f, "shape element count overflowed: {:?}", shape.dims)
            }
            Self::ElementCountMismatch {
                shape,
                expected_count,
                actual_count,
            } => {
                write!(
                    f,
                    "tensor element count mismatch for shape {:?}: expected {}, got {}",
                    shape.dims, expected_count, actual_count
                )
            }
        }
    }
}

impl std::error::Error for ValueError {}

#[cfg(test)]
mod tests {
    use super::{DType, Literal, Shape, TensorValue, Value, ValueError};
    use crate::proptest_strategies::{any_literal, small_shape};
    use proptest::prelude::*;

    #[test]
    fn scalar_shape_has_rank_zero_and_one_element() {
        let shape = Shape::scalar();
        assert_eq!(shape.rank(), 0);
        assert!(shape.is_scalar());
        assert_eq!(shape.element_count(), Some(1));
    }

    #[test]
    fn element_count_overflow_is_detected() {
        let shape = Shape::of(&[u32::MAX, u32::MAX, u32::MAX]);
        assert_eq!(shape.element_count(), None);

        let err = TensorValue::filled(DType::F64, shape.clone(), Literal::from_f64(0.0))
            .expect_err("overflowing shape should be rejected");
        assert_eq!(err, ValueError::ShapeOverflow { shape });
    }

    #[test]
    fn tensor_element_count_mismatch_is_rejected() {
        let err = TensorValue::new(
            DType::I64,
            Shape::vector(3),
            vec![Literal::I64(1), Literal::I64(2)],
        )
        .expect_err("element count mismatch should be rejected");
        assert!(matches!(err, ValueError::ElementCountMismatch { .. }));
    }

    #[test]
    fn literal_identities_match_dtype() {
        assert_eq!(Literal::zero_of(DType::F64).as_f64(), Some(0.0));
        assert_eq!(Literal::one_of(DType::F64).as_f64(), Some(1.0));
        assert_eq!(Literal::zero_of(DType::I64), Literal::I64(0));
        assert_eq!(Literal::one_of(DType::I64), Literal::I64(1));
    }

    #[test]
    fn only_f64_is_floating() {
        assert!(DType::F64.is_floating());
        assert!(!DType::I64.is_floating());
        assert!(!DType::Bool.is_floating());
    }

    #[test]
    fn value_shape_and_dtype_agree_with_contents() {
        let scalar = Value::scalar_f64(2.5);
        assert_eq!(scalar.shape(), Shape::scalar());
        assert_eq!(scalar.dtype(), DType::F64);

        let vector = Value::vector_i64(&[1, 2, 3]).expect("vector should build");
        assert_eq!(vector.shape(), Shape::vector(3));
        assert_eq!(vector.dtype(), DType::I64);
    }

    proptest! {
        #[test]
        fn filled_tensor_has_exactly_shape_many_elements(
            shape in small_shape(),
            fill in any_literal(),
        ) {
            let tensor = TensorValue::filled(fill.dtype(), shape.clone(), fill)
                .expect("small shapes cannot overflow");
            prop_assert_eq!(tensor.len() as u64, shape.element_count().unwrap());
            prop_assert!(tensor.elements.iter().all(|lit| *lit == fill));
        }

        #[test]
        fn literal_f64_round_trips_through_bits(value in proptest::num::f64::NORMAL) {
            let lit = Literal::from_f64(value);
            prop_assert_eq!(lit.as_f64(), Some(value));
        }
    }
}
