//! Purpose: Lazy client handles that compose pointers through explicit builder calls.
//! Exports: `ObjectHandle`, `ClassHandle`.
//! Role: The caller-facing pointer graph; every operation yields a new handle.
//! Invariants: Calls, writes, indexing, and arithmetic are sent immediately.
//! Invariants: Plain attribute handles stay unregistered until registered or retrieved.
//! Invariants: Attribute writes on a class handle are forwarded only once it is a shell.
#![allow(clippy::result_large_err)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::ApiResult;
use super::producer::{PendingReply, Producer};
use crate::core::error::{Error, ErrorKind};
use crate::core::id::PointerId;
use crate::core::pointer::{
    ClassPointer, GetPointer, INIT_SEGMENT, Lineage, ObjectActionPointer, ObjectPointer, Pointer,
    join_path,
};
use crate::core::value::{Kwargs, Value};

/// Handle to a remote value: an attribute chain or the result of an action.
#[derive(Clone)]
pub struct ObjectHandle {
    pointer: ObjectPointer,
    producer: Producer,
    registered: Arc<AtomicBool>,
}

impl ObjectHandle {
    /// An unregistered handle for a root-relative attribute path.
    pub fn root(producer: Producer, path: impl Into<String>) -> Self {
        Self::unregistered(producer, ObjectPointer::root(path))
    }

    fn unregistered(producer: Producer, pointer: ObjectPointer) -> Self {
        Self {
            pointer,
            producer,
            registered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn result_of(producer: Producer, id: PointerId, parents: Vec<Lineage>) -> Self {
        Self {
            pointer: ObjectPointer::result_of(id, parents),
            producer,
            registered: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> &PointerId {
        &self.pointer.id
    }

    pub fn pointer(&self) -> &ObjectPointer {
        &self.pointer
    }

    pub fn parents(&self) -> &[Lineage] {
        &self.pointer.parents
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Extends the attribute chain. Registered handles become the target of
    /// the new chain; unregistered ones keep growing their own path.
    pub fn attr(&self, name: &str) -> ObjectHandle {
        let (target_id, path) = match &self.pointer.target_id {
            Some(target) => (Some(target.clone()), join_path(&self.pointer.path, name)),
            None if self.is_registered() => (Some(self.pointer.id.clone()), name.to_string()),
            None => (None, join_path(&self.pointer.path, name)),
        };
        Self::unregistered(
            self.producer.clone(),
            ObjectPointer {
                id: PointerId::generate(),
                path,
                target_id,
                parents: vec![Lineage::Pointer(self.pointer.id.clone())],
            },
        )
    }

    /// Invokes the value this handle denotes.
    pub fn call(&self, args: Vec<Value>, kwargs: Kwargs) -> ApiResult<ObjectHandle> {
        self.action("", args, kwargs)
    }

    pub fn index(&self, key: impl Into<Value>) -> ApiResult<ObjectHandle> {
        self.action("__getitem__", vec![key.into()], Kwargs::new())
    }

    pub fn set_index(&self, key: impl Into<Value>, value: impl Into<Value>) -> ApiResult<()> {
        self.action("__setitem__", vec![key.into(), value.into()], Kwargs::new())
            .map(|_| ())
    }

    pub fn add(&self, other: impl Into<Value>) -> ApiResult<ObjectHandle> {
        self.binary("__add__", other.into())
    }

    pub fn sub(&self, other: impl Into<Value>) -> ApiResult<ObjectHandle> {
        self.binary("__sub__", other.into())
    }

    pub fn mul(&self, other: impl Into<Value>) -> ApiResult<ObjectHandle> {
        self.binary("__mul__", other.into())
    }

    pub fn truediv(&self, other: impl Into<Value>) -> ApiResult<ObjectHandle> {
        self.binary("__truediv__", other.into())
    }

    pub fn floordiv(&self, other: impl Into<Value>) -> ApiResult<ObjectHandle> {
        self.binary("__floordiv__", other.into())
    }

    pub fn rem(&self, other: impl Into<Value>) -> ApiResult<ObjectHandle> {
        self.binary("__mod__", other.into())
    }

    pub fn pow(&self, other: impl Into<Value>) -> ApiResult<ObjectHandle> {
        self.binary("__pow__", other.into())
    }

    fn binary(&self, member: &str, other: Value) -> ApiResult<ObjectHandle> {
        self.action(member, vec![other], Kwargs::new())
    }

    /// Sends an action on `member` of this value (`""` acts on the value itself)
    /// and returns a registered handle to its result.
    pub fn action(&self, member: &str, args: Vec<Value>, kwargs: Kwargs) -> ApiResult<ObjectHandle> {
        let mut parents = vec![Lineage::Pointer(self.pointer.id.clone())];
        parents.extend(args.iter().map(Lineage::from));
        let (target_id, path, temp_root) = match &self.pointer.target_id {
            Some(target) => (target.clone(), join_path(&self.pointer.path, member), None),
            None if self.is_registered() => (self.pointer.id.clone(), member.to_string(), None),
            None => (
                self.pointer.id.clone(),
                member.to_string(),
                Some(Box::new(self.pointer.clone())),
            ),
        };
        let action = ObjectActionPointer {
            id: PointerId::generate(),
            path,
            target_id,
            args,
            kwargs,
            temp_root,
            parents: parents.clone(),
        };
        let id = action.id.clone();
        self.producer.send(&Pointer::ObjectAction(action))?;
        Ok(Self::result_of(self.producer.clone(), id, parents))
    }

    pub fn register(&self) -> ApiResult<()> {
        if self.is_registered() {
            return Ok(());
        }
        self.producer.send(&Pointer::Object(self.pointer.clone()))?;
        self.registered.store(true, Ordering::Release);
        Ok(())
    }

    /// Registers if needed, then blocks for the value under the producer's timeout.
    pub fn retrieve(&self) -> ApiResult<Value> {
        self.register()?;
        self.producer.request(GetPointer::target(self.pointer.id.clone()))
    }

    pub fn retrieve_later(&self) -> ApiResult<PendingReply> {
        self.register()?;
        self.producer.submit(GetPointer::target(self.pointer.id.clone()))
    }
}

impl From<&ObjectHandle> for Value {
    fn from(handle: &ObjectHandle) -> Self {
        Value::Pointer(Box::new(Pointer::Object(handle.pointer.clone())))
    }
}

impl From<ObjectHandle> for Value {
    fn from(handle: ObjectHandle) -> Self {
        Value::from(&handle)
    }
}

/// Handle to a class reference, or (as a shell) to an instance of it.
#[derive(Clone)]
pub struct ClassHandle {
    pointer: ClassPointer,
    producer: Producer,
    registered: Arc<AtomicBool>,
}

impl ClassHandle {
    pub fn new(producer: Producer, path: impl Into<String>) -> Self {
        Self {
            pointer: ClassPointer::new(path),
            producer,
            registered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &PointerId {
        &self.pointer.id
    }

    pub fn pointer(&self) -> &ClassPointer {
        &self.pointer
    }

    pub fn is_shell(&self) -> bool {
        self.pointer.shell
    }

    /// Class attributes resolve from the library root; shell attributes
    /// resolve against the remote instance.
    pub fn attr(&self, name: &str) -> ObjectHandle {
        if self.is_shell() {
            return ObjectHandle::unregistered(
                self.producer.clone(),
                ObjectPointer {
                    id: PointerId::generate(),
                    path: name.to_string(),
                    target_id: Some(self.pointer.id.clone()),
                    parents: vec![Lineage::Pointer(self.pointer.id.clone())],
                },
            );
        }
        let mut handle = ObjectHandle::root(self.producer.clone(), join_path(&self.pointer.path, name));
        handle.pointer.parents = vec![Lineage::Pointer(self.pointer.id.clone())];
        handle
    }

    /// Instantiates the class under a fresh identity and returns the shell.
    pub fn call(&self, args: Vec<Value>, kwargs: Kwargs) -> ApiResult<ClassHandle> {
        if self.is_shell() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("class handle is already an instance")
                .with_hint("Use as_object() to call the instance itself.")
                .with_pointer(&self.pointer.id));
        }
        let instance = ClassPointer {
            id: PointerId::generate(),
            path: join_path(&self.pointer.path, INIT_SEGMENT),
            args,
            kwargs,
            shell: true,
        };
        self.producer.send(&Pointer::Class(instance.clone()))?;
        Ok(self.shell(instance))
    }

    /// Instantiates this class as the base of a local extension type: the
    /// extension takes a fresh identity and this class is sent as its
    /// initializer, while the returned shell keeps the class path.
    pub fn extend(&self, args: Vec<Value>, kwargs: Kwargs) -> ApiResult<ClassHandle> {
        let mut instance = self.call(args, kwargs)?;
        instance.pointer.path = self.pointer.path.clone();
        Ok(instance)
    }

    fn shell(&self, pointer: ClassPointer) -> ClassHandle {
        ClassHandle {
            pointer,
            producer: self.producer.clone(),
            registered: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_attr(&self, name: &str, value: impl Into<Value>) -> ApiResult<()> {
        if !self.is_shell() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("cannot write `{name}` on a class that has not been instantiated"))
                .with_pointer(&self.pointer.id));
        }
        let value = value.into();
        let parents = vec![Lineage::Pointer(self.pointer.id.clone()), Lineage::from(&value)];
        let action = ObjectActionPointer {
            id: PointerId::generate(),
            path: "__setattr__".to_string(),
            target_id: self.pointer.id.clone(),
            args: vec![Value::from(name), value],
            kwargs: Kwargs::new(),
            temp_root: None,
            parents,
        };
        self.producer.send(&Pointer::ObjectAction(action))
    }

    /// The instance behind a shell, as an object handle.
    pub fn as_object(&self) -> ApiResult<ObjectHandle> {
        if !self.is_shell() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("class handle has not been instantiated")
                .with_pointer(&self.pointer.id));
        }
        Ok(ObjectHandle::result_of(
            self.producer.clone(),
            self.pointer.id.clone(),
            vec![Lineage::Pointer(self.pointer.id.clone())],
        ))
    }

    pub fn retrieve(&self) -> ApiResult<Value> {
        if !self.registered.swap(true, Ordering::AcqRel) {
            if let Err(err) = self.producer.send(&Pointer::Class(self.pointer.clone())) {
                self.registered.store(false, Ordering::Release);
                return Err(err);
            }
        }
        self.producer.request(GetPointer::target(self.pointer.id.clone()))
    }
}

impl From<&ClassHandle> for Value {
    fn from(handle: &ClassHandle) -> Self {
        Value::Pointer(Box::new(Pointer::Class(handle.pointer.clone())))
    }
}
