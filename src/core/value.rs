//! Purpose: Define the values a host library produces and consumes.
//! Exports: `Value`, `NdArray`, `HostObject`, `ObjectRef`, `Kwargs`.
//! Role: Common currency between pointers (arguments), the store, and replies.
//! Invariants: Every variant except `Object` is encodable; encoding an `Object` fails.
//! Invariants: `Pointer` values only appear in arguments awaiting resolution.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::core::error::{Error, ErrorKind};
use crate::core::pointer::Pointer;

pub type Kwargs = BTreeMap<String, Value>;
pub type ObjectRef = Arc<dyn HostObject>;

/// A live object owned by the host library.
///
/// Implementations use interior mutability for `set_attr`; the store hands out
/// shared references, so every reader of an id observes the same object.
pub trait HostObject: Send + Sync {
    fn type_name(&self) -> &str;

    fn get_attr(&self, name: &str) -> Option<Value>;

    fn set_attr(&self, name: &str, _value: Value) -> Result<(), Error> {
        Err(Error::new(ErrorKind::Invocation).with_message(format!(
            "`{}` does not accept attribute writes (`{name}`)",
            self.type_name()
        )))
    }

    fn is_callable(&self) -> bool {
        false
    }

    fn call(&self, _args: Vec<Value>, _kwargs: Kwargs) -> Result<Value, Error> {
        Err(Error::new(ErrorKind::Invocation)
            .with_message(format!("`{}` is not callable", self.type_name())))
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Array(NdArray),
    Pointer(Box<Pointer>),
    #[serde(skip)]
    Object(ObjectRef),
}

impl Value {
    pub fn object(object: impl HostObject + 'static) -> Self {
        Value::Object(Arc::new(object))
    }

    pub fn list(items: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Array(_) => "array",
            Value::Pointer(_) => "pointer",
            Value::Object(object) => object.type_name(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Object(object) if object.is_callable())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(value) => f.debug_tuple("Bool").field(value).finish(),
            Value::Int(value) => f.debug_tuple("Int").field(value).finish(),
            Value::Float(value) => f.debug_tuple("Float").field(value).finish(),
            Value::Str(value) => f.debug_tuple("Str").field(value).finish(),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Map(entries) => f.debug_tuple("Map").field(entries).finish(),
            Value::Array(array) => f.debug_tuple("Array").field(array).finish(),
            Value::Pointer(pointer) => f.debug_tuple("Pointer").field(pointer).finish(),
            Value::Object(object) => write!(f, "Object(<{}>)", object.type_name()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<NdArray> for Value {
    fn from(value: NdArray) -> Self {
        Value::Array(value)
    }
}

impl From<Pointer> for Value {
    fn from(value: Pointer) -> Self {
        Value::Pointer(Box::new(value))
    }
}

/// Dense row-major numeric array. `shape` always accounts for every element of `data`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNdArray")]
pub struct NdArray {
    shape: Vec<usize>,
    data: Vec<f64>,
}

#[derive(Deserialize)]
struct RawNdArray {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl TryFrom<RawNdArray> for NdArray {
    type Error = Error;

    fn try_from(raw: RawNdArray) -> Result<Self, Error> {
        NdArray::new(raw.shape, raw.data)
    }
}

impl NdArray {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self, Error> {
        let expected = shape
            .iter()
            .try_fold(1usize, |product, dim| product.checked_mul(*dim))
            .ok_or_else(|| {
                Error::new(ErrorKind::Invocation)
                    .with_message(format!("shape {shape:?} is too large"))
            })?;
        if expected != data.len() {
            return Err(Error::new(ErrorKind::Invocation).with_message(format!(
                "shape {shape:?} needs {expected} elements, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn from_vec(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Builds an array from a (possibly nested) list of numbers.
    pub fn from_value(value: &Value) -> Result<Self, Error> {
        let mut shape = Vec::new();
        let mut probe = value;
        while let Value::List(items) = probe {
            shape.push(items.len());
            match items.first() {
                Some(first) => probe = first,
                None => break,
            }
        }
        let mut data = Vec::new();
        flatten_numbers(value, 0, &shape, &mut data)?;
        Self::new(shape, data)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub(crate) fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            shape: self.shape.clone(),
            data: self.data.iter().copied().map(f).collect(),
        }
    }

    pub(crate) fn zip(&self, other: &Self, f: impl Fn(f64, f64) -> f64) -> Result<Self, Error> {
        if self.shape != other.shape {
            return Err(Error::new(ErrorKind::Invocation).with_message(format!(
                "operands could not be broadcast together with shapes {:?} {:?}",
                self.shape, other.shape
            )));
        }
        Ok(Self {
            shape: self.shape.clone(),
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| f(*a, *b))
                .collect(),
        })
    }

    /// Row-major stride of the leading axis.
    pub(crate) fn row_len(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    pub(crate) fn row(&self, index: usize) -> Self {
        let row_len = self.row_len();
        let start = index * row_len;
        Self {
            shape: self.shape[1..].to_vec(),
            data: self.data[start..start + row_len].to_vec(),
        }
    }

    pub fn to_list(&self) -> Value {
        nest(&self.shape, &self.data)
    }
}

fn flatten_numbers(
    value: &Value,
    depth: usize,
    shape: &[usize],
    out: &mut Vec<f64>,
) -> Result<(), Error> {
    match value {
        Value::List(items) => {
            if shape.get(depth) != Some(&items.len()) {
                return Err(Error::new(ErrorKind::Invocation)
                    .with_message("array rows must all have the same length"));
            }
            for item in items {
                flatten_numbers(item, depth + 1, shape, out)?;
            }
            Ok(())
        }
        Value::Array(array) => {
            out.extend_from_slice(array.data());
            Ok(())
        }
        other => match other.as_f64() {
            Some(number) if depth == shape.len() => {
                out.push(number);
                Ok(())
            }
            _ => Err(Error::new(ErrorKind::Invocation)
                .with_message(format!("cannot build an array from `{}`", other.type_name()))),
        },
    }
}

fn nest(shape: &[usize], data: &[f64]) -> Value {
    match shape.split_first() {
        None => data.first().copied().map(Value::Float).unwrap_or(Value::Null),
        Some((&len, rest)) => {
            let stride: usize = rest.iter().product();
            Value::List(
                (0..len)
                    .map(|i| nest(rest, &data[i * stride..(i + 1) * stride]))
                    .collect(),
            )
        }
    }
}
