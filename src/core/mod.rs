// Core modules implementing pointers, values, storage, resolution, and error modeling.
pub mod error;
pub mod executor;
pub mod id;
pub mod library;
pub(crate) mod ops;
pub mod pointer;
pub mod store;
pub mod value;
