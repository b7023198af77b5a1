#![forbid(unsafe_code)]

//! Numeric kernels for the reference interpreter.

use fg_core::{DType, Literal, Shape, TensorValue, Value};

use crate::eval::EvalError;

fn binary_literal(
    op: &'static str,
    lhs: Literal,
    rhs: Literal,
    int_op: &impl Fn(i64, i64) -> i64,
    float_op: &impl Fn(f64, f64) -> f64,
) -> Result<Literal, EvalError> {
    match (lhs, rhs) {
        (Literal::I64(a), Literal::I64(b)) => Ok(Literal::I64(int_op(a, b))),
        (Literal::Bool(_), _) | (_, Literal::Bool(_)) => Err(EvalError::TypeMismatch {
            op,
            detail: "expected numeric elements, got bool",
        }),
        _ => {
            let a = lhs.as_f64().ok_or(EvalError::TypeMismatch {
                op,
                detail: "expected numeric left element",
            })?;
            let b = rhs.as_f64().ok_or(EvalError::TypeMismatch {
                op,
                detail: "expected numeric right element",
            })?;
            Ok(Literal::from_f64(float_op(a, b)))
        }
    }
}

/// Binary elementwise operation dispatching on int/float paths, with scalar
/// operands broadcast over tensor operands.
pub(crate) fn eval_binary_elementwise(
    op: &'static str,
    lhs: &Value,
    rhs: &Value,
    int_op: impl Fn(i64, i64) -> i64,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    let dtype = if lhs.dtype() == DType::I64 && rhs.dtype() == DType::I64 {
        DType::I64
    } else {
        DType::F64
    };

    match (lhs, rhs) {
        (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(binary_literal(
            op, *a, *b, &int_op, &float_op,
        )?)),
        (Value::Tensor(a), Value::Tensor(b)) => {
            if a.shape != b.shape {
                return Err(EvalError::TypeMismatch {
                    op,
                    detail: "tensor operands must agree in shape",
                });
            }
            let elements = a
                .elements
                .iter()
                .copied()
                .zip(b.elements.iter().copied())
                .map(|(left, right)| binary_literal(op, left, right, &int_op, &float_op))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Tensor(TensorValue::new(
                dtype,
                a.shape.clone(),
                elements,
            )?))
        }
        (Value::Scalar(a), Value::Tensor(b)) => {
            let elements = b
                .elements
                .iter()
                .copied()
                .map(|right| binary_literal(op, *a, right, &int_op, &float_op))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Tensor(TensorValue::new(
                dtype,
                b.shape.clone(),
                elements,
            )?))
        }
        (Value::Tensor(a), Value::Scalar(b)) => {
            let elements = a
                .elements
                .iter()
                .copied()
                .map(|left| binary_literal(op, left, *b, &int_op, &float_op))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Tensor(TensorValue::new(
                dtype,
                a.shape.clone(),
                elements,
            )?))
        }
    }
}

/// Unary elementwise over floating values (sin, cos, exp).
pub(crate) fn eval_unary_floating(
    op: &'static str,
    input: &Value,
    f: impl Fn(f64) -> f64,
) -> Result<Value, EvalError> {
    match input {
        Value::Scalar(lit) => {
            let value = lit.as_f64().ok_or(EvalError::TypeMismatch {
                op,
                detail: "expected floating scalar",
            })?;
            Ok(Value::scalar_f64(f(value)))
        }
        Value::Tensor(tensor) => {
            let elements = tensor
                .elements
                .iter()
                .copied()
                .map(|lit| {
                    lit.as_f64().map(&f).map(Literal::from_f64).ok_or(
                        EvalError::TypeMismatch {
                            op,
                            detail: "expected floating tensor elements",
                        },
                    )
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Tensor(TensorValue::new(
                DType::F64,
                tensor.shape.clone(),
                elements,
            )?))
        }
    }
}

/// Elementwise negation preserving integer dtypes.
pub(crate) fn eval_neg(input: &Value) -> Result<Value, EvalError> {
    let negate = |lit: Literal| match lit {
        Literal::I64(v) => Ok(Literal::I64(-v)),
        Literal::F64Bits(bits) => Ok(Literal::from_f64(-f64::from_bits(bits))),
        Literal::Bool(_) => Err(EvalError::TypeMismatch {
            op: "neg",
            detail: "expected numeric elements, got bool",
        }),
    };

    match input {
        Value::Scalar(lit) => Ok(Value::Scalar(negate(*lit)?)),
        Value::Tensor(tensor) => {
            let elements = tensor
                .elements
                .iter()
                .copied()
                .map(negate)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Tensor(TensorValue::new(
                tensor.dtype,
                tensor.shape.clone(),
                elements,
            )?))
        }
    }
}

/// Full reduction to a scalar.
pub(crate) fn eval_sum(input: &Value) -> Result<Value, EvalError> {
    let tensor = match input {
        Value::Scalar(_) => return Ok(input.clone()),
        Value::Tensor(tensor) => tensor,
    };

    if tensor.dtype == DType::I64 {
        let mut total = 0_i64;
        for lit in &tensor.elements {
            total += lit.as_i64().ok_or(EvalError::TypeMismatch {
                op: "sum",
                detail: "expected i64 tensor elements",
            })?;
        }
        return Ok(Value::scalar_i64(total));
    }

    let mut total = 0.0_f64;
    for lit in &tensor.elements {
        total += lit.as_f64().ok_or(EvalError::TypeMismatch {
            op: "sum",
            detail: "expected numeric tensor elements",
        })?;
    }
    Ok(Value::scalar_f64(total))
}

/// Broadcast a scalar to `shape`.
pub(crate) fn eval_broadcast(input: &Value, shape: &Shape) -> Result<Value, EvalError> {
    let lit = input.as_scalar_literal().ok_or(EvalError::TypeMismatch {
        op: "broadcast",
        detail: "expected scalar operand",
    })?;
    if shape.is_scalar() {
        return Ok(Value::Scalar(lit));
    }
    Ok(Value::Tensor(TensorValue::filled(
        lit.dtype(),
        shape.clone(),
        lit,
    )?))
}

fn indices_of(op: &'static str, value: &Value) -> Result<Vec<i64>, EvalError> {
    match value {
        Value::Tensor(tensor) => tensor.to_i64_vec().ok_or(EvalError::TypeMismatch {
            op,
            detail: "expected i64 index elements",
        }),
        Value::Scalar(_) => Err(EvalError::TypeMismatch {
            op,
            detail: "expected index vector",
        }),
    }
}

fn axis0_chunk_len(shape: &Shape) -> usize {
    shape.dims[1..]
        .iter()
        .map(|dim| *dim as usize)
        .product::<usize>()
}

/// Axis-0 gather.
pub(crate) fn eval_gather(source: &Value, indices: &Value) -> Result<Value, EvalError> {
    let op = "gather";
    let src = source.as_tensor().ok_or(EvalError::TypeMismatch {
        op,
        detail: "expected tensor source",
    })?;
    let idx = indices_of(op, indices)?;
    let axis_size = src.shape.dims[0] as usize;
    let chunk = axis0_chunk_len(&src.shape);

    let mut elements = Vec::with_capacity(idx.len() * chunk);
    for index in &idx {
        let slot = usize::try_from(*index).ok().filter(|i| *i < axis_size).ok_or(
            EvalError::IndexOutOfBounds {
                op,
                index: *index,
                axis_size,
            },
        )?;
        elements.extend_from_slice(&src.elements[slot * chunk..(slot + 1) * chunk]);
    }

    let mut dims = Vec::with_capacity(src.shape.rank());
    dims.push(idx.len() as u32);
    dims.extend_from_slice(&src.shape.dims[1..]);
    Ok(Value::Tensor(TensorValue::new(
        src.dtype,
        Shape { dims },
        elements,
    )?))
}

fn add_literals(op: &'static str, lhs: Literal, rhs: Literal) -> Result<Literal, EvalError> {
    binary_literal(op, lhs, rhs, &|a, b| a + b, &|a, b| a + b)
}

/// Axis-0 scatter-add into a zero tensor of `dense_shape`.
pub(crate) fn eval_scatter_add(
    values: &Value,
    indices: &Value,
    dense_shape: &Shape,
) -> Result<Value, EvalError> {
    let op = "scatter_add";
    let vals = values.as_tensor().ok_or(EvalError::TypeMismatch {
        op,
        detail: "expected tensor values",
    })?;
    let idx = indices_of(op, indices)?;
    let axis_size = dense_shape.dims[0] as usize;
    let chunk = axis0_chunk_len(dense_shape);

    let mut dense =
        TensorValue::filled(vals.dtype, dense_shape.clone(), Literal::zero_of(vals.dtype))?;
    for (row, index) in idx.iter().enumerate() {
        let slot = usize::try_from(*index).ok().filter(|i| *i < axis_size).ok_or(
            EvalError::IndexOutOfBounds {
                op,
                index: *index,
                axis_size,
            },
        )?;
        for offset in 0..chunk {
            let into = slot * chunk + offset;
            dense.elements[into] = add_literals(
                op,
                dense.elements[into],
                vals.elements[row * chunk + offset],
            )?;
        }
    }
    Ok(Value::Tensor(dense))
}

/// Constant fill of `shape`.
pub(crate) fn eval_fill(shape: &Shape, fill: Literal) -> Result<Value, EvalError> {
    if shape.is_scalar() {
        return Ok(Value::Scalar(fill));
    }
    Ok(Value::Tensor(TensorValue::filled(
        fill.dtype(),
        shape.clone(),
        fill,
    )?))
}
