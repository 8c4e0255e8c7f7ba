//! Purpose: Built-in attribute protocol for plain (non-object) values.
//! Exports: `attribute`, `set_item`, `BuiltinMethod`.
//! Role: Lets operator members such as `__add__` resolve on stored primitives.
//! Invariants: Integer arithmetic is checked; overflow is an invocation failure.
//! Invariants: Array arithmetic follows IEEE semantics and never raises on zero.
use std::sync::Arc;

use crate::core::error::{Error, ErrorKind};
use crate::core::value::{HostObject, Kwargs, NdArray, Value};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum BuiltinOp {
    Add,
    Sub,
    Mul,
    TrueDiv,
    FloorDiv,
    Rem,
    Pow,
    GetItem,
    Len,
    Sum,
    ToList,
}

impl BuiltinOp {
    fn from_name(name: &str) -> Option<Self> {
        let op = match name {
            "__add__" => BuiltinOp::Add,
            "__sub__" => BuiltinOp::Sub,
            "__mul__" => BuiltinOp::Mul,
            "__truediv__" => BuiltinOp::TrueDiv,
            "__floordiv__" => BuiltinOp::FloorDiv,
            "__mod__" => BuiltinOp::Rem,
            "__pow__" => BuiltinOp::Pow,
            "__getitem__" => BuiltinOp::GetItem,
            "__len__" => BuiltinOp::Len,
            "sum" => BuiltinOp::Sum,
            "tolist" => BuiltinOp::ToList,
            _ => return None,
        };
        Some(op)
    }

    fn name(self) -> &'static str {
        match self {
            BuiltinOp::Add => "__add__",
            BuiltinOp::Sub => "__sub__",
            BuiltinOp::Mul => "__mul__",
            BuiltinOp::TrueDiv => "__truediv__",
            BuiltinOp::FloorDiv => "__floordiv__",
            BuiltinOp::Rem => "__mod__",
            BuiltinOp::Pow => "__pow__",
            BuiltinOp::GetItem => "__getitem__",
            BuiltinOp::Len => "__len__",
            BuiltinOp::Sum => "sum",
            BuiltinOp::ToList => "tolist",
        }
    }

    fn supports(self, receiver: &Value) -> bool {
        match self {
            BuiltinOp::Add | BuiltinOp::Mul => matches!(
                receiver,
                Value::Int(_) | Value::Float(_) | Value::Array(_) | Value::Str(_) | Value::List(_)
            ),
            BuiltinOp::Sub
            | BuiltinOp::TrueDiv
            | BuiltinOp::FloorDiv
            | BuiltinOp::Rem
            | BuiltinOp::Pow => {
                matches!(receiver, Value::Int(_) | Value::Float(_) | Value::Array(_))
            }
            BuiltinOp::GetItem | BuiltinOp::Len => matches!(
                receiver,
                Value::Str(_) | Value::List(_) | Value::Map(_) | Value::Array(_)
            ),
            BuiltinOp::Sum | BuiltinOp::ToList => matches!(receiver, Value::Array(_)),
        }
    }
}

/// A built-in member bound to the value it was read from.
pub(crate) struct BuiltinMethod {
    receiver: Value,
    op: BuiltinOp,
}

impl HostObject for BuiltinMethod {
    fn type_name(&self) -> &str {
        self.op.name()
    }

    fn get_attr(&self, _name: &str) -> Option<Value> {
        None
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn call(&self, args: Vec<Value>, _kwargs: Kwargs) -> Result<Value, Error> {
        match self.op {
            BuiltinOp::Len => length(&self.receiver),
            BuiltinOp::Sum => match &self.receiver {
                Value::Array(array) => Ok(Value::Float(array.data().iter().sum())),
                other => Err(unsupported(self.op.name(), other)),
            },
            BuiltinOp::ToList => match &self.receiver {
                Value::Array(array) => Ok(array.to_list()),
                other => Err(unsupported(self.op.name(), other)),
            },
            op => {
                let [operand]: [Value; 1] = args.try_into().map_err(|args: Vec<Value>| {
                    Error::new(ErrorKind::Invocation).with_message(format!(
                        "`{}` takes exactly one argument ({} given)",
                        op.name(),
                        args.len()
                    ))
                })?;
                if op == BuiltinOp::GetItem {
                    get_item(&self.receiver, &operand)
                } else {
                    arithmetic(op, &self.receiver, &operand)
                }
            }
        }
    }
}

/// Reads attribute `name` from a plain value.
pub(crate) fn attribute(receiver: &Value, name: &str) -> Option<Value> {
    if let Value::Array(array) = receiver {
        match name {
            "shape" => {
                return Some(Value::List(
                    array.shape().iter().map(|dim| Value::Int(*dim as i64)).collect(),
                ));
            }
            "ndim" => return Some(Value::Int(array.ndim() as i64)),
            "size" => return Some(Value::Int(array.size() as i64)),
            _ => {}
        }
    }
    let op = BuiltinOp::from_name(name)?;
    if !op.supports(receiver) {
        return None;
    }
    Some(Value::Object(Arc::new(BuiltinMethod {
        receiver: receiver.clone(),
        op,
    })))
}

fn unsupported(op: &str, value: &Value) -> Error {
    Error::new(ErrorKind::Invocation)
        .with_message(format!("`{op}` is not supported for `{}`", value.type_name()))
}

fn length(receiver: &Value) -> Result<Value, Error> {
    let len = match receiver {
        Value::Str(text) => text.chars().count(),
        Value::List(items) => items.len(),
        Value::Map(entries) => entries.len(),
        Value::Array(array) => array.shape().first().copied().unwrap_or(0),
        other => return Err(unsupported("__len__", other)),
    };
    Ok(Value::Int(len as i64))
}

fn arithmetic(op: BuiltinOp, lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => int_arithmetic(op, *a, *b),
        (Value::Array(a), Value::Array(b)) => Ok(Value::Array(a.zip(b, |x, y| float_op(op, x, y))?)),
        (Value::Array(a), scalar) => match scalar.as_f64() {
            Some(y) => Ok(Value::Array(a.map(|x| float_op(op, x, y)))),
            None => Err(operand_error(op, lhs, rhs)),
        },
        (scalar, Value::Array(b)) => match scalar.as_f64() {
            Some(x) => Ok(Value::Array(b.map(|y| float_op(op, x, y)))),
            None => Err(operand_error(op, lhs, rhs)),
        },
        (Value::Str(a), Value::Str(b)) if op == BuiltinOp::Add => Ok(Value::Str(format!("{a}{b}"))),
        (Value::List(a), Value::List(b)) if op == BuiltinOp::Add => {
            Ok(Value::List(a.iter().chain(b).cloned().collect()))
        }
        (Value::Str(a), Value::Int(n)) if op == BuiltinOp::Mul => {
            Ok(Value::Str(a.repeat((*n).max(0) as usize)))
        }
        (Value::List(a), Value::Int(n)) if op == BuiltinOp::Mul => {
            let n = (*n).max(0) as usize;
            Ok(Value::List(
                std::iter::repeat_n(a.iter(), n).flatten().cloned().collect(),
            ))
        }
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => scalar_float_arithmetic(op, a, b),
            _ => Err(operand_error(op, lhs, rhs)),
        },
    }
}

fn operand_error(op: BuiltinOp, lhs: &Value, rhs: &Value) -> Error {
    Error::new(ErrorKind::Invocation).with_message(format!(
        "unsupported operand types for `{}`: `{}` and `{}`",
        op.name(),
        lhs.type_name(),
        rhs.type_name()
    ))
}

fn zero_division() -> Error {
    Error::new(ErrorKind::Invocation).with_message("division by zero")
}

fn overflow(op: BuiltinOp) -> Error {
    Error::new(ErrorKind::Invocation)
        .with_message(format!("integer overflow in `{}`", op.name()))
}

fn int_arithmetic(op: BuiltinOp, a: i64, b: i64) -> Result<Value, Error> {
    let result = match op {
        BuiltinOp::Add => a.checked_add(b).ok_or_else(|| overflow(op))?,
        BuiltinOp::Sub => a.checked_sub(b).ok_or_else(|| overflow(op))?,
        BuiltinOp::Mul => a.checked_mul(b).ok_or_else(|| overflow(op))?,
        BuiltinOp::TrueDiv => {
            if b == 0 {
                return Err(zero_division());
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BuiltinOp::FloorDiv => {
            if b == 0 {
                return Err(zero_division());
            }
            let quotient = a.checked_div(b).ok_or_else(|| overflow(op))?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                quotient - 1
            } else {
                quotient
            }
        }
        BuiltinOp::Rem => {
            if b == 0 {
                return Err(zero_division());
            }
            // Only `MIN % -1` wraps, and its remainder is exactly 0.
            let remainder = a.wrapping_rem(b);
            if remainder != 0 && ((remainder < 0) != (b < 0)) {
                remainder + b
            } else {
                remainder
            }
        }
        BuiltinOp::Pow => {
            if b < 0 {
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exponent = u32::try_from(b).map_err(|_| overflow(op))?;
            a.checked_pow(exponent).ok_or_else(|| overflow(op))?
        }
        _ => return Err(operand_error(op, &Value::Int(a), &Value::Int(b))),
    };
    Ok(Value::Int(result))
}

fn scalar_float_arithmetic(op: BuiltinOp, a: f64, b: f64) -> Result<Value, Error> {
    if matches!(op, BuiltinOp::TrueDiv | BuiltinOp::FloorDiv | BuiltinOp::Rem) && b == 0.0 {
        return Err(zero_division());
    }
    Ok(Value::Float(float_op(op, a, b)))
}

fn float_op(op: BuiltinOp, a: f64, b: f64) -> f64 {
    match op {
        BuiltinOp::Add => a + b,
        BuiltinOp::Sub => a - b,
        BuiltinOp::Mul => a * b,
        BuiltinOp::TrueDiv => a / b,
        BuiltinOp::FloorDiv => (a / b).floor(),
        BuiltinOp::Rem => a - b * (a / b).floor(),
        BuiltinOp::Pow => a.powf(b),
        _ => f64::NAN,
    }
}

fn normalize_index(index: i64, len: usize) -> Result<usize, Error> {
    let resolved = if index < 0 { index + len as i64 } else { index };
    if resolved < 0 || resolved as usize >= len {
        return Err(Error::new(ErrorKind::Invocation)
            .with_message(format!("index {index} is out of range for length {len}")));
    }
    Ok(resolved as usize)
}

fn get_item(receiver: &Value, key: &Value) -> Result<Value, Error> {
    match (receiver, key) {
        (Value::List(items), Value::Int(index)) => {
            Ok(items[normalize_index(*index, items.len())?].clone())
        }
        (Value::Str(text), Value::Int(index)) => {
            let chars: Vec<char> = text.chars().collect();
            Ok(Value::Str(chars[normalize_index(*index, chars.len())?].to_string()))
        }
        (Value::Map(entries), Value::Str(name)) => entries.get(name).cloned().ok_or_else(|| {
            Error::new(ErrorKind::Invocation).with_message(format!("key `{name}` is not present"))
        }),
        (Value::Array(array), Value::Int(index)) => array_item(array, &[*index]),
        (Value::Array(array), Value::List(indices)) => {
            let indices = int_indices(indices)?;
            array_item(array, &indices)
        }
        _ => Err(Error::new(ErrorKind::Invocation).with_message(format!(
            "`{}` cannot be indexed by `{}`",
            receiver.type_name(),
            key.type_name()
        ))),
    }
}

fn int_indices(indices: &[Value]) -> Result<Vec<i64>, Error> {
    indices
        .iter()
        .map(|index| {
            index.as_int().ok_or_else(|| {
                Error::new(ErrorKind::Invocation).with_message("array indices must be integers")
            })
        })
        .collect()
}

fn array_item(array: &NdArray, indices: &[i64]) -> Result<Value, Error> {
    if indices.len() > array.ndim() {
        return Err(Error::new(ErrorKind::Invocation).with_message(format!(
            "too many indices for array with {} dimensions",
            array.ndim()
        )));
    }
    let mut current = array.clone();
    for index in indices {
        let row = normalize_index(*index, current.shape()[0])?;
        current = current.row(row);
    }
    if current.ndim() == 0 {
        Ok(Value::Float(current.data()[0]))
    } else {
        Ok(Value::Array(current))
    }
}

/// Returns `receiver` with `key` set to `value`; the caller writes it back.
pub(crate) fn set_item(receiver: Value, key: &Value, value: Value) -> Result<Value, Error> {
    match (receiver, key) {
        (Value::List(mut items), Value::Int(index)) => {
            let slot = normalize_index(*index, items.len())?;
            items[slot] = value;
            Ok(Value::List(items))
        }
        (Value::Map(mut entries), Value::Str(name)) => {
            entries.insert(name.clone(), value);
            Ok(Value::Map(entries))
        }
        (Value::Array(mut array), key) => {
            let indices = match key {
                Value::Int(index) => vec![*index],
                Value::List(indices) => int_indices(indices)?,
                other => {
                    return Err(Error::new(ErrorKind::Invocation).with_message(format!(
                        "arrays cannot be indexed by `{}`",
                        other.type_name()
                    )));
                }
            };
            assign_array(&mut array, &indices, &value)?;
            Ok(Value::Array(array))
        }
        (receiver, key) => Err(Error::new(ErrorKind::Invocation).with_message(format!(
            "`{}` does not support item assignment by `{}`",
            receiver.type_name(),
            key.type_name()
        ))),
    }
}

fn assign_array(array: &mut NdArray, indices: &[i64], value: &Value) -> Result<(), Error> {
    if indices.len() > array.ndim() {
        return Err(Error::new(ErrorKind::Invocation).with_message(format!(
            "too many indices for array with {} dimensions",
            array.ndim()
        )));
    }
    let mut offset = 0;
    let mut span = array.size();
    for (axis, index) in indices.iter().enumerate() {
        let dim = array.shape()[axis];
        let row = normalize_index(*index, dim)?;
        span /= dim;
        offset += row * span;
    }
    let target = &mut array.data_mut()[offset..offset + span];
    match value {
        Value::Array(source) if source.size() == span => {
            target.copy_from_slice(source.data());
        }
        scalar => {
            let number = scalar.as_f64().ok_or_else(|| {
                Error::new(ErrorKind::Invocation).with_message(format!(
                    "cannot assign `{}` into a numeric array",
                    scalar.type_name()
                ))
            })?;
            target.iter_mut().for_each(|slot| *slot = number);
        }
    }
    Ok(())
}
