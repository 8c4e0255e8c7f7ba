//! Purpose: Lazy remote pointers resolved by a host process against a declared library surface.
//! Exports: `api` (handles, broker faces, transports), `core` (engine), `serve` (network host).
//! Role: Library crate; hosts embed `Consumer`/`serve`, callers build pointers through `api`.
//! Invariants: Each pointer id materializes at most once per host store.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
pub mod serve;
