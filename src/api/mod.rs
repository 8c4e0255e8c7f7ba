//! Purpose: Define the public Rust API boundary for remora.
//! Exports: Pointer handles, broker faces, transports, and the core types they carry.
//! Role: Public, additive-only surface; hides transport internals and the wire codec layout.
//! Invariants: Handles built here are ordinary pointers, interchangeable with hand-built ones.
//! Invariants: Every fallible operation returns `ApiResult`.

pub mod codec;
mod consumer;
mod embedded;
mod handle;
mod mirror;
mod producer;
mod remote;

pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::executor::Executor;
pub use crate::core::id::PointerId;
pub use crate::core::library::{
    Instance, MemberKind, Namespace, NativeClass, NativeFunction, SURFACE_VERSION, Surface,
};
pub use crate::core::pointer::{
    CallableFlavor, CallablePointer, ClassPointer, GetPointer, Lineage, ObjectActionPointer,
    ObjectPointer, Page, Pointer,
};
pub use crate::core::store::{MemoryStore, Store};
pub use crate::core::value::{HostObject, Kwargs, NdArray, ObjectRef, Value};
pub use consumer::{Consumer, FailureRecord, Reply};
pub use embedded::{EmbeddedHost, channel};
pub use handle::{ClassHandle, ObjectHandle};
pub use mirror::{FunctionStub, Mirror};
pub use producer::{DEFAULT_REQUEST_TIMEOUT, PendingReply, Producer, Transport};
pub use remote::RemoteTransport;

pub type ApiResult<T> = Result<T, Error>;
