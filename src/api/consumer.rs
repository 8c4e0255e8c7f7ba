//! Purpose: Host-side broker face: execute inbound pointers and answer retrievals.
//! Exports: `Consumer`, `FailureRecord`, `Reply`.
//! Role: Shared by the embedded host and every network connection.
//! Invariants: A failing message is recorded against its id and never stops the caller's loop.
//! Invariants: Retrieving a failed id answers with the recorded failure instead of a value.
#![allow(clippy::result_large_err)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use super::ApiResult;
use crate::core::error::{Error, ErrorKind};
use crate::core::executor::Executor;
use crate::core::id::PointerId;
use crate::core::pointer::Pointer;
use crate::core::store::{MemoryStore, Store};
use crate::core::value::{ObjectRef, Value};

pub type Reply = Result<Value, Error>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FailureRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub path: Option<String>,
}

impl FailureRecord {
    fn from_error(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.message().unwrap_or("error").to_string(),
            path: err.path().map(str::to_string),
        }
    }

    pub fn to_error(&self, id: &PointerId) -> Error {
        let mut err = Error::new(self.kind)
            .with_message(self.message.clone())
            .with_pointer(id);
        if let Some(path) = &self.path {
            err = err.with_path(path.clone());
        }
        err
    }
}

pub struct Consumer {
    executor: Executor,
    store: Arc<dyn Store>,
    failures: Mutex<HashMap<PointerId, FailureRecord>>,
}

impl Consumer {
    /// A consumer over `root` backed by a fresh in-memory store.
    pub fn new(root: ObjectRef) -> Self {
        Self::with_store(root, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(root: ObjectRef, store: Arc<dyn Store>) -> Self {
        Self {
            executor: Executor::new(root),
            store,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Executes one message. Failures are recorded and returned; the caller
    /// moves on to the next message either way.
    pub fn execute(&self, pointer: &Pointer, reply: &mut dyn FnMut(PointerId, Reply)) -> ApiResult<()> {
        if let Pointer::Get(get) = pointer {
            if let Some(target) = &get.target_id {
                if let Some(record) = self.failure(target) {
                    reply(target.clone(), Err(record.to_error(target)));
                    return Ok(());
                }
            }
        }

        let result = self
            .executor
            .execute(pointer, self.store.as_ref(), &mut |key, value| reply(key, Ok(value)));
        if let Err(err) = &result {
            warn!(pointer = %pointer.id(), kind = pointer.kind_name(), error = %err, "pointer resolution failed");
            self.lock_failures()
                .insert(pointer.id().clone(), FailureRecord::from_error(err));
        }
        result
    }

    pub fn failure(&self, id: &PointerId) -> Option<FailureRecord> {
        self.lock_failures().get(id).cloned()
    }

    pub fn failures(&self) -> Vec<(PointerId, FailureRecord)> {
        let mut failures: Vec<_> = self
            .lock_failures()
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect();
        failures.sort_by(|a, b| a.0.cmp(&b.0));
        failures
    }

    fn lock_failures(&self) -> MutexGuard<'_, HashMap<PointerId, FailureRecord>> {
        self.failures
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}
