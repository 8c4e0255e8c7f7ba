//! Purpose: Declare the library surface a host exposes to pointer resolution.
//! Exports: `Namespace`, `NativeFunction`, `NativeClass`, `Instance`, `Surface`, `MemberKind`.
//! Role: Explicit allowlist of reachable members; replaces runtime reflection.
//! Invariants: Only declared members resolve; undeclared names are lookup failures.
//! Invariants: The published `Surface` lists exactly the declared dotted paths.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::core::error::Error;
use crate::core::pointer::join_path;
use crate::core::value::{HostObject, Kwargs, ObjectRef, Value};

pub const SURFACE_VERSION: u32 = 1;

pub type NativeFn = Arc<dyn Fn(Vec<Value>, Kwargs) -> Result<Value, Error> + Send + Sync>;
pub type MethodFn = Arc<dyn Fn(&Instance, Vec<Value>, Kwargs) -> Result<Value, Error> + Send + Sync>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Function,
    Class,
    Attribute,
    Namespace,
}

/// Versioned allowlist of the dotted paths a host exposes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    pub version: u32,
    pub entries: BTreeMap<String, MemberKind>,
}

impl Surface {
    pub fn kind(&self, path: &str) -> Option<MemberKind> {
        self.entries.get(path).copied()
    }
}

pub struct NativeFunction {
    name: String,
    func: NativeFn,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(Vec<Value>, Kwargs) -> Result<Value, Error> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

impl HostObject for NativeFunction {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn get_attr(&self, _name: &str) -> Option<Value> {
        None
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn call(&self, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, Error> {
        (self.func)(args, kwargs)
    }
}

struct ClassDef {
    name: String,
    init: Option<MethodFn>,
    methods: BTreeMap<String, MethodFn>,
    attributes: BTreeMap<String, Value>,
}

/// A constructible type; calling it builds an `Instance` and runs the initializer.
#[derive(Clone)]
pub struct NativeClass {
    def: Arc<ClassDef>,
}

impl NativeClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            def: Arc::new(ClassDef {
                name: name.into(),
                init: None,
                methods: BTreeMap::new(),
                attributes: BTreeMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn with_init(
        self,
        init: impl Fn(&Instance, Vec<Value>, Kwargs) -> Result<Value, Error> + Send + Sync + 'static,
    ) -> Self {
        self.edit(|def| def.init = Some(Arc::new(init)))
    }

    pub fn with_method(
        self,
        name: impl Into<String>,
        method: impl Fn(&Instance, Vec<Value>, Kwargs) -> Result<Value, Error> + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        self.edit(|def| {
            def.methods.insert(name, Arc::new(method));
        })
    }

    pub fn with_attribute(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let (name, value) = (name.into(), value.into());
        self.edit(|def| {
            def.attributes.insert(name, value);
        })
    }

    fn edit(self, f: impl FnOnce(&mut ClassDef)) -> Self {
        let mut def = Arc::try_unwrap(self.def).unwrap_or_else(|shared| ClassDef {
            name: shared.name.clone(),
            init: shared.init.clone(),
            methods: shared.methods.clone(),
            attributes: shared.attributes.clone(),
        });
        f(&mut def);
        Self { def: Arc::new(def) }
    }

    pub fn instantiate(&self, args: Vec<Value>, kwargs: Kwargs) -> Result<Instance, Error> {
        let instance = Instance {
            def: Arc::clone(&self.def),
            fields: Arc::new(RwLock::new(BTreeMap::new())),
        };
        if let Some(init) = &self.def.init {
            init(&instance, args, kwargs)?;
        }
        Ok(instance)
    }
}

impl HostObject for NativeClass {
    fn type_name(&self) -> &str {
        &self.def.name
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        self.def.attributes.get(name).cloned()
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn call(&self, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, Error> {
        Ok(Value::object(self.instantiate(args, kwargs)?))
    }
}

/// Field bag produced by a `NativeClass`. Clones share the same fields.
#[derive(Clone)]
pub struct Instance {
    def: Arc<ClassDef>,
    fields: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl Instance {
    pub fn field(&self, name: &str) -> Option<Value> {
        self.fields
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(name)
            .cloned()
    }

    pub fn set_field(&self, name: impl Into<String>, value: Value) {
        self.fields
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
            .insert(name.into(), value);
    }
}

impl HostObject for Instance {
    fn type_name(&self) -> &str {
        &self.def.name
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.field(name) {
            return Some(value);
        }
        if let Some(method) = self.def.methods.get(name) {
            return Some(Value::object(BoundMethod {
                name: name.to_string(),
                instance: self.clone(),
                method: Arc::clone(method),
            }));
        }
        self.def.attributes.get(name).cloned()
    }

    fn set_attr(&self, name: &str, value: Value) -> Result<(), Error> {
        self.set_field(name, value);
        Ok(())
    }
}

struct BoundMethod {
    name: String,
    instance: Instance,
    method: MethodFn,
}

impl HostObject for BoundMethod {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn get_attr(&self, _name: &str) -> Option<Value> {
        None
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn call(&self, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, Error> {
        (self.method)(&self.instance, args, kwargs)
    }
}

enum Member {
    Function(Arc<NativeFunction>),
    Class(NativeClass),
    Attribute(Value),
    Namespace(Arc<Namespace>),
}

impl Member {
    fn kind(&self) -> MemberKind {
        match self {
            Member::Function(_) => MemberKind::Function,
            Member::Class(_) => MemberKind::Class,
            Member::Attribute(_) => MemberKind::Attribute,
            Member::Namespace(_) => MemberKind::Namespace,
        }
    }

    fn value(&self) -> Value {
        match self {
            Member::Function(function) => Value::Object(Arc::clone(function) as ObjectRef),
            Member::Class(class) => Value::object(class.clone()),
            Member::Attribute(value) => value.clone(),
            Member::Namespace(namespace) => Value::Object(Arc::clone(namespace) as ObjectRef),
        }
    }
}

/// A named group of declared members; the root namespace is the library root.
pub struct Namespace {
    name: String,
    members: BTreeMap<String, Member>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: BTreeMap::new(),
        }
    }

    pub fn with_function(
        mut self,
        name: impl Into<String>,
        func: impl Fn(Vec<Value>, Kwargs) -> Result<Value, Error> + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        let function = NativeFunction::new(name.clone(), func);
        self.members.insert(name, Member::Function(Arc::new(function)));
        self
    }

    pub fn with_class(mut self, class: NativeClass) -> Self {
        self.members
            .insert(class.name().to_string(), Member::Class(class));
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.members
            .insert(name.into(), Member::Attribute(value.into()));
        self
    }

    pub fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.members.insert(
            namespace.name.clone(),
            Member::Namespace(Arc::new(namespace)),
        );
        self
    }

    pub fn surface(&self) -> Surface {
        let mut entries = BTreeMap::new();
        self.collect_surface("", &mut entries);
        Surface {
            version: SURFACE_VERSION,
            entries,
        }
    }

    fn collect_surface(&self, prefix: &str, entries: &mut BTreeMap<String, MemberKind>) {
        for (name, member) in &self.members {
            let path = join_path(prefix, name);
            if let Member::Namespace(child) = member {
                child.collect_surface(&path, entries);
            }
            entries.insert(path, member.kind());
        }
    }

    pub fn into_root(self) -> ObjectRef {
        Arc::new(self)
    }
}

impl HostObject for Namespace {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        self.members.get(name).map(Member::value)
    }
}
