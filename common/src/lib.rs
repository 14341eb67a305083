//! Shared building blocks for the lock-broker workspace.
//!
//! ## Architecture
//!
//! - **common** (this crate): types every other crate agrees on
//! - **lock-client**: the lock-broker IPC client
//! - **fake-lock-helper**: a protocol-compatible helper used to exercise the client
//!
//! Keeping the error location type here lets every crate report
//! failures in the same `[file:line:column]` format.

pub mod error;

pub use error::error_location::ErrorLocation;
