//! Purpose: Client-side broker face: forward pointers and wait for correlated replies.
//! Exports: `Transport`, `Producer`, `PendingReply`, `DEFAULT_REQUEST_TIMEOUT`.
//! Role: Transport-agnostic; embedded queues and the TCP client both plug in here.
//! Invariants: `send` is fire-and-forget; only retrievals wait.
//! Invariants: Replies correlate by id (the Get target, or the Get's own id for page scans).
//! Invariants: A retrieval that outlives its deadline fails with `Timeout`; nothing retries.
#![allow(clippy::result_large_err)]

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::ApiResult;
use crate::core::error::{Error, ErrorKind};
use crate::core::id::PointerId;
use crate::core::pointer::{GetPointer, Pointer};
use crate::core::value::Value;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client side of a broker channel.
pub trait Transport: Send + Sync {
    fn send(&self, pointer: &Pointer) -> ApiResult<()>;

    /// Blocks until a reply keyed by `key` arrives or `timeout` elapses.
    fn recv_reply(&self, key: &PointerId, timeout: Duration) -> ApiResult<Value>;

    /// Non-blocking variant of `recv_reply`.
    fn take_reply(&self, key: &PointerId) -> ApiResult<Option<Value>>;
}

#[derive(Clone)]
pub struct Producer {
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
}

impl Producer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn send(&self, pointer: &Pointer) -> ApiResult<()> {
        debug!(pointer = %pointer.id(), kind = pointer.kind_name(), "sending pointer");
        self.transport.send(pointer)
    }

    /// Sends `get` and blocks until its reply arrives.
    pub fn request(&self, get: GetPointer) -> ApiResult<Value> {
        self.submit(get)?.wait(self.request_timeout)
    }

    /// Sends `get` and returns a handle for collecting the reply later.
    pub fn submit(&self, get: GetPointer) -> ApiResult<PendingReply> {
        let key = get.reply_key().clone();
        self.send(&Pointer::Get(get))?;
        Ok(PendingReply {
            key,
            transport: Arc::clone(&self.transport),
        })
    }

    /// Requests one page of the host store as `(id, value)` pairs.
    pub fn scan(&self, page_index: i64, page_size: i64) -> ApiResult<Vec<(PointerId, Value)>> {
        let value = self.request(GetPointer::page(page_index, page_size))?;
        decode_page(value)
    }
}

/// A retrieval that has been sent but not yet collected.
pub struct PendingReply {
    key: PointerId,
    transport: Arc<dyn Transport>,
}

impl PendingReply {
    pub fn key(&self) -> &PointerId {
        &self.key
    }

    pub fn wait(&self, timeout: Duration) -> ApiResult<Value> {
        self.transport
            .recv_reply(&self.key, timeout)
            .map_err(|err| err.with_pointer(&self.key))
    }

    pub fn try_take(&self) -> ApiResult<Option<Value>> {
        self.transport
            .take_reply(&self.key)
            .map_err(|err| err.with_pointer(&self.key))
    }
}

pub(crate) fn timeout_error(key: &PointerId, timeout: Duration) -> Error {
    Error::new(ErrorKind::Timeout)
        .with_message(format!("no reply within {} ms", timeout.as_millis()))
        .with_hint("The target may never have been sent, or its resolution failed.")
        .with_pointer(key)
}

fn decode_page(value: Value) -> ApiResult<Vec<(PointerId, Value)>> {
    let Value::List(entries) = value else {
        return Err(Error::new(ErrorKind::Protocol).with_message("page reply is not a list"));
    };
    entries
        .into_iter()
        .map(|entry| match entry {
            Value::List(mut pair) if pair.len() == 2 => {
                let value = pair.pop().unwrap_or(Value::Null);
                match pair.pop() {
                    Some(Value::Str(id)) => Ok((PointerId::from(id), value)),
                    _ => Err(Error::new(ErrorKind::Protocol).with_message("page entry id is not a string")),
                }
            }
            _ => Err(Error::new(ErrorKind::Protocol).with_message("page entry is not an [id, value] pair")),
        })
        .collect()
}
