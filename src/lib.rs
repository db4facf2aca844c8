//! Purpose: Library crate backing the `tfapi` binary and its tests.
//! Exports: `core` (staging, invocation, engine, output capture, errors) and `api`.
//! Role: Everything except flag parsing and the HTTP listener lives here.
//! Invariants: Requests never share mutable state; each owns its staging dir and sink.
//! Invariants: Staging, argument building, and output capture never touch the network.
pub mod api;
pub mod core;
