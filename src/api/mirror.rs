//! Purpose: Allowlist-checked entry points into a host library's surface.
//! Exports: `Mirror`, `FunctionStub`.
//! Role: Minimal stand-in generator; produces ordinary handles from declared paths.
//! Invariants: Only paths in the `Surface` with the requested kind are handed out.
#![allow(clippy::result_large_err)]

use std::sync::Arc;

use super::ApiResult;
use super::handle::{ClassHandle, ObjectHandle};
use super::producer::Producer;
use crate::core::error::{Error, ErrorKind};
use crate::core::library::{MemberKind, Surface};
use crate::core::pointer::{CallablePointer, Lineage, Pointer, join_path};
use crate::core::value::{Kwargs, Value};

#[derive(Clone)]
pub struct Mirror {
    surface: Arc<Surface>,
    producer: Producer,
    prefix: String,
}

impl Mirror {
    pub fn new(surface: Surface, producer: Producer) -> Self {
        Self {
            surface: Arc::new(surface),
            producer,
            prefix: String::new(),
        }
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn function(&self, path: &str) -> ApiResult<FunctionStub> {
        let path = self.checked(path, MemberKind::Function)?;
        Ok(FunctionStub {
            path,
            producer: self.producer.clone(),
        })
    }

    pub fn class(&self, path: &str) -> ApiResult<ClassHandle> {
        let path = self.checked(path, MemberKind::Class)?;
        Ok(ClassHandle::new(self.producer.clone(), path))
    }

    pub fn attribute(&self, path: &str) -> ApiResult<ObjectHandle> {
        let path = self.checked(path, MemberKind::Attribute)?;
        Ok(ObjectHandle::root(self.producer.clone(), path))
    }

    /// A mirror scoped to a nested namespace.
    pub fn namespace(&self, path: &str) -> ApiResult<Mirror> {
        let prefix = self.checked(path, MemberKind::Namespace)?;
        Ok(Mirror {
            surface: Arc::clone(&self.surface),
            producer: self.producer.clone(),
            prefix,
        })
    }

    fn checked(&self, path: &str, expected: MemberKind) -> ApiResult<String> {
        let full = join_path(&self.prefix, path);
        match self.surface.kind(&full) {
            Some(kind) if kind == expected => Ok(full),
            Some(kind) => Err(Error::new(ErrorKind::Lookup)
                .with_message(format!("`{full}` is a {kind:?}, not a {expected:?}"))
                .with_path(full)),
            None => Err(Error::new(ErrorKind::Lookup)
                .with_message(format!("`{full}` is not exposed by the library surface"))
                .with_path(full)),
        }
    }
}

/// Pointer-producing stand-in for a library function.
#[derive(Clone)]
pub struct FunctionStub {
    path: String,
    producer: Producer,
}

impl FunctionStub {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Sends the call and returns a registered handle to its result.
    pub fn call(&self, args: Vec<Value>, kwargs: Kwargs) -> ApiResult<ObjectHandle> {
        let parents: Vec<Lineage> = args.iter().map(Lineage::from).collect();
        let pointer = CallablePointer::new(self.path.clone(), args, kwargs);
        let id = pointer.id.clone();
        self.producer.send(&Pointer::Callable(pointer))?;
        Ok(ObjectHandle::result_of(self.producer.clone(), id, parents))
    }
}
