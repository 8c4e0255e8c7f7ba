//! Purpose: JSON Lines wire codec for pointers (client to host) and replies (host to client).
//! Exports: `encode_pointer`, `decode_pointer`, `encode_reply`, `decode_reply`,
//!          `ReplyEnvelope`, `ErrorBody`.
//! Role: The only place that turns pointers and values into bytes for the network transport.
//! Invariants: Every encoded message is exactly one `\n`-terminated JSON document.
//! Invariants: A reply that cannot be encoded becomes an error envelope under the same key.
#![allow(clippy::result_large_err)]

use serde::{Deserialize, Serialize};

use super::ApiResult;
use crate::core::error::{Error, ErrorKind, kind_from_label, kind_label};
use crate::core::id::PointerId;
use crate::core::pointer::Pointer;
use crate::core::value::Value;

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub key: PointerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ErrorBody {
    fn from_error(err: &Error) -> Self {
        Self {
            kind: kind_label(err.kind()).to_string(),
            message: err.message().unwrap_or("error").to_string(),
            path: err.path().map(str::to_string),
        }
    }

    fn into_error(self, key: &PointerId) -> Error {
        let mut err = Error::new(kind_from_label(&self.kind))
            .with_message(self.message)
            .with_pointer(key);
        if let Some(path) = self.path {
            err = err.with_path(path);
        }
        err
    }
}

pub fn encode_pointer(pointer: &Pointer) -> ApiResult<Vec<u8>> {
    let mut line = serde_json::to_vec(pointer).map_err(|err| {
        Error::new(ErrorKind::Protocol)
            .with_message("failed to encode pointer")
            .with_pointer(pointer.id())
            .with_source(err)
    })?;
    line.push(b'\n');
    Ok(line)
}

pub fn decode_pointer(line: &[u8]) -> ApiResult<Pointer> {
    serde_json::from_slice(trim_line(line)).map_err(|err| {
        Error::new(ErrorKind::Protocol)
            .with_message("malformed pointer message")
            .with_source(err)
    })
}

/// Encodes a reply; values that have no wire form are reported as errors.
pub fn encode_reply(key: &PointerId, reply: &Result<Value, Error>) -> Vec<u8> {
    let envelope = match reply {
        Ok(value) if !is_wire_safe(value) => error_envelope(
            key,
            &Error::new(ErrorKind::Protocol).with_message(format!(
                "reply value of type `{}` cannot be encoded",
                value.type_name()
            )),
        ),
        Ok(value) => ReplyEnvelope {
            key: key.clone(),
            value: Some(value.clone()),
            error: None,
        },
        Err(err) => error_envelope(key, err),
    };
    let mut line = serde_json::to_vec(&envelope).unwrap_or_else(|err| {
        let fallback = error_envelope(
            key,
            &Error::new(ErrorKind::Protocol).with_message(err.to_string()),
        );
        serde_json::to_vec(&fallback).unwrap_or_default()
    });
    line.push(b'\n');
    line
}

pub fn decode_reply(line: &[u8]) -> ApiResult<(PointerId, ApiResult<Value>)> {
    let envelope: ReplyEnvelope = serde_json::from_slice(trim_line(line)).map_err(|err| {
        Error::new(ErrorKind::Protocol)
            .with_message("malformed reply message")
            .with_source(err)
    })?;
    let key = envelope.key;
    let reply = match (envelope.value, envelope.error) {
        (_, Some(body)) => Err(body.into_error(&key)),
        (Some(value), None) => Ok(value),
        (None, None) => Ok(Value::Null),
    };
    Ok((key, reply))
}

fn error_envelope(key: &PointerId, err: &Error) -> ReplyEnvelope {
    ReplyEnvelope {
        key: key.clone(),
        value: None,
        error: Some(ErrorBody::from_error(err)),
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

// JSON has no encoding for host objects or non-finite floats.
fn is_wire_safe(value: &Value) -> bool {
    match value {
        Value::Object(_) => false,
        Value::Float(number) => number.is_finite(),
        Value::Array(array) => array.data().iter().all(|number| number.is_finite()),
        Value::List(items) => items.iter().all(is_wire_safe),
        Value::Map(entries) => entries.values().all(is_wire_safe),
        _ => true,
    }
}
