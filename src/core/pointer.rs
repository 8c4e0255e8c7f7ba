//! Purpose: Wire-level pointer model: one tagged variant per resolution rule.
//! Exports: `Pointer`, `GetPointer`, `CallablePointer`, `CallableFlavor`,
//!          `ObjectPointer`, `ObjectActionPointer`, `ClassPointer`, `Page`, `Lineage`,
//!          `INIT_SEGMENT`, `path_segments`, `join_path`.
//! Role: Plain data shared by client handles, codecs, and the executor.
//! Invariants: Pointers carry no broker or transport handle; they encode whole.
//! Invariants: Lineage is informational only and never consulted by resolution.
use serde::{Deserialize, Serialize};

use crate::core::id::PointerId;
use crate::core::value::{Kwargs, Value};

/// Path segment that turns a class path into an instantiation.
pub const INIT_SEGMENT: &str = "__init__";

pub fn path_segments(path: &str) -> Vec<&str> {
    if path.is_empty() {
        Vec::new()
    } else {
        path.split('.').collect()
    }
}

pub fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pointer {
    Get(GetPointer),
    Callable(CallablePointer),
    Object(ObjectPointer),
    ObjectAction(ObjectActionPointer),
    Class(ClassPointer),
}

impl Pointer {
    pub fn id(&self) -> &PointerId {
        match self {
            Pointer::Get(pointer) => &pointer.id,
            Pointer::Callable(pointer) => &pointer.id,
            Pointer::Object(pointer) => &pointer.id,
            Pointer::ObjectAction(pointer) => &pointer.id,
            Pointer::Class(pointer) => &pointer.id,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Pointer::Get(pointer) => &pointer.path,
            Pointer::Callable(pointer) => &pointer.path,
            Pointer::Object(pointer) => &pointer.path,
            Pointer::ObjectAction(pointer) => &pointer.path,
            Pointer::Class(pointer) => &pointer.path,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Pointer::Get(_) => "get",
            Pointer::Callable(_) => "callable",
            Pointer::Object(_) => "object",
            Pointer::ObjectAction(_) => "object_action",
            Pointer::Class(_) => "class",
        }
    }

    pub fn target_id(&self) -> Option<&PointerId> {
        match self {
            Pointer::Get(pointer) => pointer.target_id.as_ref(),
            Pointer::Object(pointer) => pointer.target_id.as_ref(),
            Pointer::ObjectAction(pointer) => Some(&pointer.target_id),
            Pointer::Callable(_) | Pointer::Class(_) => None,
        }
    }
}

/// Half-open window `[index * size, index * size + size)` over the store.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub index: i64,
    pub size: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetPointer {
    pub id: PointerId,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<PointerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<Page>,
}

impl GetPointer {
    pub fn target(target_id: PointerId) -> Self {
        Self {
            id: PointerId::generate(),
            path: String::new(),
            target_id: Some(target_id),
            page: None,
        }
    }

    pub fn page(index: i64, size: i64) -> Self {
        Self {
            id: PointerId::generate(),
            path: String::new(),
            target_id: None,
            page: Some(Page { index, size }),
        }
    }

    /// Replies correlate on the target id; page scans have none and use their own id.
    pub fn reply_key(&self) -> &PointerId {
        self.target_id.as_ref().unwrap_or(&self.id)
    }
}

/// Wire tag for what a callable path names. Methods travel as object actions and
/// operators as dunder actions, so library functions are the only flavor.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallableFlavor {
    #[default]
    Function,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallablePointer {
    pub id: PointerId,
    pub path: String,
    #[serde(default)]
    pub flavor: CallableFlavor,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Kwargs,
}

impl CallablePointer {
    pub fn new(path: impl Into<String>, args: Vec<Value>, kwargs: Kwargs) -> Self {
        Self {
            id: PointerId::generate(),
            path: path.into(),
            flavor: CallableFlavor::Function,
            args,
            kwargs,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lineage {
    Pointer(PointerId),
    Value(Value),
}

impl From<&Value> for Lineage {
    fn from(value: &Value) -> Self {
        match value {
            Value::Pointer(pointer) => Lineage::Pointer(pointer.id().clone()),
            other => Lineage::Value(other.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectPointer {
    pub id: PointerId,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<PointerId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<Lineage>,
}

impl ObjectPointer {
    /// A root-relative attribute chain.
    pub fn root(path: impl Into<String>) -> Self {
        Self {
            id: PointerId::generate(),
            path: path.into(),
            target_id: None,
            parents: Vec::new(),
        }
    }

    /// A handle for a value that another pointer materializes under `id`.
    pub fn result_of(id: PointerId, parents: Vec<Lineage>) -> Self {
        Self {
            id,
            path: String::new(),
            target_id: None,
            parents,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectActionPointer {
    pub id: PointerId,
    pub path: String,
    pub target_id: PointerId,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Kwargs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_root: Option<Box<ObjectPointer>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<Lineage>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassPointer {
    pub id: PointerId,
    pub path: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Kwargs,
    #[serde(default)]
    pub shell: bool,
}

impl ClassPointer {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            id: PointerId::generate(),
            path: path.into(),
            args: Vec::new(),
            kwargs: Kwargs::new(),
            shell: false,
        }
    }
}
