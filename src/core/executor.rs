//! Purpose: Resolve pointers against a library root and persist their values.
//! Exports: `Executor`.
//! Role: The single dispatch point from pointer variant to resolution rule.
//! Invariants: A stored id is never recomputed; cached values are returned as-is.
//! Invariants: Pointer arguments resolve before the action that consumes them.
//! Invariants: Positional lists recurse element-wise; keyword values resolve one level only.
//! Invariants: Failures propagate; no placeholder value is ever stored for them.
use tracing::debug;

use crate::core::error::{Error, ErrorKind};
use crate::core::id::PointerId;
use crate::core::ops;
use crate::core::pointer::{
    CallablePointer, ClassPointer, GetPointer, INIT_SEGMENT, ObjectActionPointer, ObjectPointer,
    Pointer, path_segments,
};
use crate::core::store::Store;
use crate::core::value::{Kwargs, ObjectRef, Value};

pub type ReplyFn<'a> = dyn FnMut(PointerId, Value) + 'a;

#[derive(Clone)]
pub struct Executor {
    root: ObjectRef,
}

impl Executor {
    pub fn new(root: ObjectRef) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &ObjectRef {
        &self.root
    }

    /// Resolves one inbound message and persists its value.
    pub fn execute(
        &self,
        pointer: &Pointer,
        store: &dyn Store,
        reply: &mut ReplyFn<'_>,
    ) -> Result<(), Error> {
        debug!(pointer = %pointer.id(), kind = pointer.kind_name(), path = pointer.path(), "resolving pointer");
        self.resolve(pointer, Some(store), reply)
            .map(|_| ())
            .map_err(|err| err.with_pointer(pointer.id()))
    }

    /// Resolves `pointer`; with `store` absent nothing is cached (inline mode).
    pub fn resolve(
        &self,
        pointer: &Pointer,
        store: Option<&dyn Store>,
        reply: &mut ReplyFn<'_>,
    ) -> Result<Option<Value>, Error> {
        match pointer {
            Pointer::Get(get) => {
                self.resolve_get(get, store, reply)?;
                Ok(None)
            }
            Pointer::Callable(callable) => self.resolve_callable(callable, store, reply).map(Some),
            Pointer::Object(object) => self.resolve_object(object, store).map(Some),
            Pointer::ObjectAction(action) => self.resolve_action(action, store, reply).map(Some),
            Pointer::Class(class) => self.resolve_class(class, store, reply).map(Some),
        }
    }

    fn resolve_get(
        &self,
        get: &GetPointer,
        store: Option<&dyn Store>,
        reply: &mut ReplyFn<'_>,
    ) -> Result<(), Error> {
        let Some(store) = store else {
            return Ok(());
        };
        match (&get.target_id, &get.page) {
            (Some(target), _) => {
                if let Some(value) = store.get(target) {
                    reply(target.clone(), value);
                }
            }
            (None, Some(page)) => {
                let entries = store
                    .get_all(page.index, page.size)
                    .into_iter()
                    .map(|(id, value)| Value::List(vec![Value::Str(id.to_string()), value]))
                    .collect();
                reply(get.id.clone(), Value::List(entries));
            }
            (None, None) => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("get pointer needs a target id or a page"));
            }
        }
        Ok(())
    }

    fn resolve_callable(
        &self,
        callable: &CallablePointer,
        store: Option<&dyn Store>,
        reply: &mut ReplyFn<'_>,
    ) -> Result<Value, Error> {
        if let Some(cached) = cached(store, &callable.id) {
            return Ok(cached);
        }
        let (args, kwargs) = self.resolve_arguments(&callable.args, &callable.kwargs, store, reply)?;
        let target = self.walk(self.root_value(), &callable.path)?;
        let value = invoke_or_take(target, args, kwargs)
            .map_err(|err| err.with_path(callable.path.clone()))?;
        persist(store, &callable.id, &value);
        Ok(value)
    }

    fn resolve_object(&self, object: &ObjectPointer, store: Option<&dyn Store>) -> Result<Value, Error> {
        let Some(store) = store else {
            return self.walk(self.root_value(), &object.path);
        };
        if let Some(cached) = store.get(&object.id) {
            return Ok(cached);
        }
        let start = match object.target_id.as_ref().and_then(|target| store.get(target)) {
            Some(target) => target,
            None if object.path.is_empty() => {
                return Err(Error::new(ErrorKind::Lookup).with_message(format!(
                    "pointer {} has not been materialized",
                    object.id
                )));
            }
            None => self.root_value(),
        };
        let value = self.walk(start, &object.path)?;
        store.save(&object.id, value.clone());
        Ok(value)
    }

    fn resolve_action(
        &self,
        action: &ObjectActionPointer,
        store: Option<&dyn Store>,
        reply: &mut ReplyFn<'_>,
    ) -> Result<Value, Error> {
        if let Some(cached) = cached(store, &action.id) {
            return Ok(cached);
        }
        let (mut args, kwargs) = self.resolve_arguments(&action.args, &action.kwargs, store, reply)?;
        let (acting, stored) = match &action.temp_root {
            Some(temp) => (self.resolve_object(temp, None)?, false),
            None => {
                let value = store
                    .and_then(|store| store.get(&action.target_id))
                    .ok_or_else(|| {
                        Error::new(ErrorKind::Lookup).with_message(format!(
                            "target {} is not in the store",
                            action.target_id
                        ))
                    })?;
                (value, true)
            }
        };

        let segments = path_segments(&action.path);
        let value = match segments.split_last() {
            None => invoke_or_take(acting, args, kwargs)?,
            Some((&"__setattr__", owners)) => {
                let owner = self.walk_segments(acting, owners)?;
                let (name, value) = take_pair(&mut args, "__setattr__")?;
                let name = name.as_str().ok_or_else(|| {
                    Error::new(ErrorKind::Invocation)
                        .with_message("attribute name must be a string")
                })?;
                let object = owner.as_object().ok_or_else(|| {
                    Error::new(ErrorKind::Invocation).with_message(format!(
                        "`{}` does not accept attribute writes",
                        owner.type_name()
                    ))
                })?;
                object.set_attr(name, value)?;
                Value::Null
            }
            Some((&"__setitem__", owners)) => {
                let (key, value) = take_pair(&mut args, "__setitem__")?;
                let updated = self.assign_item(acting, owners, key, value)?;
                if !matches!(updated, Value::Object(_)) {
                    match store {
                        Some(store) if stored => store.save(&action.target_id, updated),
                        _ => {
                            return Err(Error::new(ErrorKind::Usage)
                                .with_message(format!(
                                    "cannot assign into `{}`: the target is an unregistered temporary",
                                    action.path
                                ))
                                .with_hint("Register the handle before writing items into it."));
                        }
                    }
                }
                Value::Null
            }
            Some((leaf, owners)) => {
                let owner = self.walk_segments(acting, owners)?;
                let member = self.attribute(&owner, leaf)?;
                invoke_or_take(member, args, kwargs)?
            }
        };
        persist(store, &action.id, &value);
        Ok(value)
    }

    fn resolve_class(
        &self,
        class: &ClassPointer,
        store: Option<&dyn Store>,
        reply: &mut ReplyFn<'_>,
    ) -> Result<Value, Error> {
        if let Some(cached) = cached(store, &class.id) {
            return Ok(cached);
        }
        let (args, kwargs) = self.resolve_arguments(&class.args, &class.kwargs, store, reply)?;
        let mut pending = Some((args, kwargs));
        let mut current = self.root_value();
        for segment in path_segments(&class.path) {
            current = if segment == INIT_SEGMENT {
                let (args, kwargs) = pending.take().ok_or_else(|| {
                    Error::new(ErrorKind::Usage).with_message("class path instantiates twice")
                })?;
                let Value::Object(class_object) = &current else {
                    return Err(not_callable(&current));
                };
                if !class_object.is_callable() {
                    return Err(not_callable(&current));
                }
                class_object.call(args, kwargs)?
            } else {
                self.attribute(&current, segment)?
            };
        }
        persist(store, &class.id, &current);
        Ok(current)
    }

    fn resolve_arguments(
        &self,
        args: &[Value],
        kwargs: &Kwargs,
        store: Option<&dyn Store>,
        reply: &mut ReplyFn<'_>,
    ) -> Result<(Vec<Value>, Kwargs), Error> {
        let mut resolved_args = Vec::with_capacity(args.len());
        for arg in args {
            resolved_args.push(self.resolve_positional(arg, store, reply)?);
        }
        let mut resolved_kwargs = Kwargs::new();
        for (name, value) in kwargs {
            let value = match value {
                Value::Pointer(pointer) => self.resolve_argument(pointer, store, reply)?,
                other => other.clone(),
            };
            resolved_kwargs.insert(name.clone(), value);
        }
        Ok((resolved_args, resolved_kwargs))
    }

    fn resolve_positional(
        &self,
        arg: &Value,
        store: Option<&dyn Store>,
        reply: &mut ReplyFn<'_>,
    ) -> Result<Value, Error> {
        match arg {
            Value::Pointer(pointer) => self.resolve_argument(pointer, store, reply),
            Value::List(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    resolved.push(self.resolve_positional(item, store, reply)?);
                }
                Ok(Value::List(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    fn resolve_argument(
        &self,
        pointer: &Pointer,
        store: Option<&dyn Store>,
        reply: &mut ReplyFn<'_>,
    ) -> Result<Value, Error> {
        self.resolve(pointer, store, reply)
            .map_err(|err| err.with_pointer(pointer.id()))?
            .ok_or_else(|| {
                Error::new(ErrorKind::Usage)
                    .with_message("get pointers cannot be used as arguments")
                    .with_pointer(pointer.id())
            })
    }

    /// Assigns `container[key] = value` after walking `owners`, writing the
    /// updated value back into each host object along the way.
    fn assign_item(&self, container: Value, owners: &[&str], key: Value, value: Value) -> Result<Value, Error> {
        match owners.split_first() {
            None => match &container {
                Value::Object(object) => {
                    let setter = object.get_attr("__setitem__").ok_or_else(|| {
                        Error::new(ErrorKind::Lookup).with_message(format!(
                            "`{}` has no attribute `__setitem__`",
                            object.type_name()
                        ))
                    })?;
                    invoke_or_take(setter, vec![key, value], Kwargs::new())?;
                    Ok(container)
                }
                _ => ops::set_item(container, &key, value),
            },
            Some((first, rest)) => {
                let child = self.attribute(&container, first)?;
                let updated = self.assign_item(child, rest, key, value)?;
                if matches!(updated, Value::Object(_)) {
                    return Ok(container);
                }
                match &container {
                    Value::Object(object) => {
                        object.set_attr(first, updated)?;
                        Ok(container)
                    }
                    other => Err(Error::new(ErrorKind::Invocation).with_message(format!(
                        "cannot write `{first}` back into `{}`",
                        other.type_name()
                    ))),
                }
            }
        }
    }

    fn root_value(&self) -> Value {
        Value::Object(self.root.clone())
    }

    fn walk(&self, start: Value, path: &str) -> Result<Value, Error> {
        self.walk_segments(start, &path_segments(path))
            .map_err(|err| err.with_path(path.to_string()))
    }

    fn walk_segments(&self, start: Value, segments: &[&str]) -> Result<Value, Error> {
        let mut current = start;
        for segment in segments {
            current = self.attribute(&current, segment)?;
        }
        Ok(current)
    }

    fn attribute(&self, value: &Value, name: &str) -> Result<Value, Error> {
        let found = match value {
            Value::Object(object) => object.get_attr(name),
            other => ops::attribute(other, name),
        };
        found.ok_or_else(|| {
            Error::new(ErrorKind::Lookup).with_message(format!(
                "`{}` has no attribute `{name}`",
                value.type_name()
            ))
        })
    }
}

fn cached(store: Option<&dyn Store>, id: &PointerId) -> Option<Value> {
    store.and_then(|store| store.get(id))
}

fn persist(store: Option<&dyn Store>, id: &PointerId, value: &Value) {
    if let Some(store) = store {
        store.save(id, value.clone());
    }
}

fn not_callable(value: &Value) -> Error {
    Error::new(ErrorKind::Invocation).with_message(format!("`{}` is not callable", value.type_name()))
}

fn invoke_or_take(value: Value, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, Error> {
    match &value {
        Value::Object(object) if object.is_callable() => object.call(args, kwargs),
        _ => Ok(value),
    }
}

fn take_pair(args: &mut Vec<Value>, member: &str) -> Result<(Value, Value), Error> {
    if args.len() != 2 {
        return Err(Error::new(ErrorKind::Invocation).with_message(format!(
            "`{member}` expects 2 arguments ({} given)",
            args.len()
        )));
    }
    let second = args.pop().unwrap_or(Value::Null);
    let first = args.pop().unwrap_or(Value::Null);
    Ok((first, second))
}

#[cfg(test)]
mod tests {
    use super::Executor;
    use crate::core::error::ErrorKind;
    use crate::core::id::PointerId;
    use crate::core::library::{NativeClass, Namespace};
    use crate::core::pointer::{
        CallablePointer, ClassPointer, GetPointer, ObjectActionPointer, ObjectPointer, Pointer,
    };
    use crate::core::store::{MemoryStore, Store};
    use crate::core::value::{Kwargs, NdArray, Value};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn library(calls: Arc<AtomicUsize>) -> Executor {
        let lib = Namespace::new("lib")
            .with_function("array", |args, _| {
                let first = args.first().cloned().unwrap_or(Value::Null);
                Ok(Value::Array(NdArray::from_value(&first)?))
            })
            .with_function("tick", move |_, _| {
                Ok(Value::Int(calls.fetch_add(1, Ordering::SeqCst) as i64 + 1))
            })
            .with_function("identity", |args, kwargs| {
                Ok(Value::List(vec![Value::List(args), Value::Map(kwargs)]))
            })
            .with_attribute("constants", Value::Map(
                [("e".to_string(), Value::Float(2.5))].into_iter().collect(),
            ))
            .with_class(
                NativeClass::new("Widget")
                    .with_init(|instance, _args, kwargs| {
                        instance.set_field("x", kwargs.get("x").cloned().unwrap_or(Value::Null));
                        instance.set_field("items", Value::list([0, 0, 0]));
                        Ok(Value::Null)
                    }),
            );
        Executor::new(lib.into_root())
    }

    fn run(executor: &Executor, store: &MemoryStore, pointer: &Pointer) -> Result<(), crate::core::error::Error> {
        executor.execute(pointer, store, &mut |_, _| {})
    }

    fn action(target: &PointerId, path: &str, args: Vec<Value>) -> ObjectActionPointer {
        ObjectActionPointer {
            id: PointerId::generate(),
            path: path.to_string(),
            target_id: target.clone(),
            args,
            kwargs: Kwargs::new(),
            temp_root: None,
            parents: Vec::new(),
        }
    }

    #[test]
    fn repeated_resolution_reuses_stored_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = library(Arc::clone(&calls));
        let store = MemoryStore::new();
        let tick = Pointer::Callable(CallablePointer::new("tick", vec![], Kwargs::new()));
        run(&executor, &store, &tick).expect("first");
        run(&executor, &store, &tick).expect("second");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get(tick.id()), Some(Value::Int(1)));
    }

    #[test]
    fn nested_pointer_arguments_resolve_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = library(calls);
        let store = MemoryStore::new();
        let first = Pointer::Callable(CallablePointer::new("tick", vec![], Kwargs::new()));
        let second = Pointer::Callable(CallablePointer::new("tick", vec![], Kwargs::new()));
        let outer = Pointer::Callable(CallablePointer::new(
            "identity",
            vec![Value::list([Value::from(second.clone()), Value::Int(7), Value::from(first.clone())])],
            Kwargs::new(),
        ));
        run(&executor, &store, &outer).expect("outer");
        let Some(Value::List(result)) = store.get(outer.id()) else {
            panic!("expected list result");
        };
        assert_eq!(result[0], Value::list([Value::list([Value::Int(1), Value::Int(7), Value::Int(2)])]));
        assert!(store.has(first.id()));
        assert!(store.has(second.id()));
    }

    #[test]
    fn keyword_containers_are_not_recursed() {
        let executor = library(Arc::new(AtomicUsize::new(0)));
        let store = MemoryStore::new();
        let inner = Pointer::Callable(CallablePointer::new("tick", vec![], Kwargs::new()));
        let mut kwargs = Kwargs::new();
        kwargs.insert("direct".to_string(), Value::from(inner.clone()));
        kwargs.insert("nested".to_string(), Value::list([Value::from(inner.clone())]));
        let outer = Pointer::Callable(CallablePointer::new("identity", vec![], kwargs));
        run(&executor, &store, &outer).expect("outer");
        let Some(Value::List(result)) = store.get(outer.id()) else {
            panic!("expected list result");
        };
        let Value::Map(kwargs) = &result[1] else {
            panic!("expected kwargs map");
        };
        assert_eq!(kwargs["direct"], Value::Int(1));
        assert_eq!(kwargs["nested"], Value::list([Value::from(inner)]));
    }

    #[test]
    fn object_pointer_walks_from_stored_target() {
        let executor = library(Arc::new(AtomicUsize::new(0)));
        let store = MemoryStore::new();
        let array = Pointer::Callable(CallablePointer::new(
            "array",
            vec![Value::list([Value::list([1, 2]), Value::list([3, 4])])],
            Kwargs::new(),
        ));
        run(&executor, &store, &array).expect("array");
        let shape = ObjectPointer {
            id: PointerId::generate(),
            path: "shape".to_string(),
            target_id: Some(array.id().clone()),
            parents: Vec::new(),
        };
        let shape = Pointer::Object(shape);
        run(&executor, &store, &shape).expect("shape");
        assert_eq!(store.get(shape.id()), Some(Value::list([2, 2])));
    }

    #[test]
    fn unresolvable_paths_fail_without_storing() {
        let executor = library(Arc::new(AtomicUsize::new(0)));
        let store = MemoryStore::new();
        let missing = Pointer::Callable(CallablePointer::new("nope.deeper", vec![], Kwargs::new()));
        let err = run(&executor, &store, &missing).expect_err("lookup");
        assert_eq!(err.kind(), ErrorKind::Lookup);
        assert_eq!(err.pointer(), Some(missing.id()));
        assert!(!store.has(missing.id()));

        let orphan = Pointer::ObjectAction(action(&PointerId::generate(), "__add__", vec![Value::Int(1)]));
        let err = run(&executor, &store, &orphan).expect_err("missing target");
        assert_eq!(err.kind(), ErrorKind::Lookup);
        assert!(store.is_empty());
    }

    #[test]
    fn class_instantiation_and_attribute_writes() {
        let executor = library(Arc::new(AtomicUsize::new(0)));
        let store = MemoryStore::new();
        let mut class = ClassPointer::new("Widget.__init__");
        class.kwargs.insert("x".to_string(), Value::Int(1));
        class.shell = true;
        let class = Pointer::Class(class);
        run(&executor, &store, &class).expect("instantiate");

        let write = Pointer::ObjectAction(action(class.id(), "__setattr__", vec![Value::from("x"), Value::Int(2)]));
        run(&executor, &store, &write).expect("setattr");
        let read = Pointer::ObjectAction(action(class.id(), "x", vec![]));
        run(&executor, &store, &read).expect("read");
        assert_eq!(store.get(read.id()), Some(Value::Int(2)));

        let set_item = Pointer::ObjectAction(action(class.id(), "items.__setitem__", vec![Value::Int(1), Value::Int(9)]));
        run(&executor, &store, &set_item).expect("setitem");
        let items = Pointer::ObjectAction(action(class.id(), "items", vec![]));
        run(&executor, &store, &items).expect("items");
        assert_eq!(store.get(items.id()), Some(Value::list([0, 9, 0])));
    }

    #[test]
    fn set_item_on_stored_value_writes_back() {
        let executor = library(Arc::new(AtomicUsize::new(0)));
        let store = MemoryStore::new();
        let array = Pointer::Callable(CallablePointer::new("array", vec![Value::list([1, 2, 3])], Kwargs::new()));
        run(&executor, &store, &array).expect("array");
        let write = Pointer::ObjectAction(action(array.id(), "__setitem__", vec![Value::Int(0), Value::Int(10)]));
        run(&executor, &store, &write).expect("write");
        assert_eq!(store.get(array.id()), Some(Value::Array(NdArray::from_vec(vec![10.0, 2.0, 3.0]))));
    }

    #[test]
    fn temporary_roots_are_not_cached() {
        let executor = library(Arc::new(AtomicUsize::new(0)));
        let store = MemoryStore::new();
        let temp = ObjectPointer::root("constants");
        let mut read = action(&temp.id, "__getitem__", vec![Value::from("e")]);
        read.temp_root = Some(Box::new(temp.clone()));
        let read = Pointer::ObjectAction(read);
        run(&executor, &store, &read).expect("read");
        assert_eq!(store.get(read.id()), Some(Value::Float(2.5)));
        assert!(!store.has(&temp.id));
    }

    #[test]
    fn item_writes_into_temporary_roots_fail_loudly() {
        let executor = library(Arc::new(AtomicUsize::new(0)));
        let store = MemoryStore::new();
        let temp = ObjectPointer::root("constants");
        let mut write = action(&temp.id, "__setitem__", vec![Value::from("answer"), Value::Int(7)]);
        write.temp_root = Some(Box::new(temp.clone()));
        let err = run(&executor, &store, &Pointer::ObjectAction(write)).expect_err("temporary");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(!store.has(&temp.id));

        let mut read = action(&temp.id, "__getitem__", vec![Value::from("answer")]);
        read.temp_root = Some(Box::new(temp));
        let err = run(&executor, &store, &Pointer::ObjectAction(read)).expect_err("never written");
        assert_eq!(err.kind(), ErrorKind::Invocation);
    }

    #[test]
    fn get_replies_only_for_stored_targets() {
        let executor = library(Arc::new(AtomicUsize::new(0)));
        let store = MemoryStore::new();
        let tick = Pointer::Callable(CallablePointer::new("tick", vec![], Kwargs::new()));
        run(&executor, &store, &tick).expect("tick");

        let mut replies = Vec::new();
        let hit = Pointer::Get(GetPointer::target(tick.id().clone()));
        let miss = Pointer::Get(GetPointer::target(PointerId::generate()));
        for get in [&hit, &miss] {
            executor
                .execute(get, &store, &mut |key: PointerId, value: Value| replies.push((key, value)))
                .expect("get");
        }
        assert_eq!(replies, vec![(tick.id().clone(), Value::Int(1))]);
        assert_eq!(store.len(), 1);
    }
}
