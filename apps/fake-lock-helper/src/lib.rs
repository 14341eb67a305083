//! Scriptable stand-in for the mailbox lock helper.
//!
//! Speaks the helper side of the lock protocol on stdin/stdout and can be told,
//! through environment variables, to misbehave in the ways a real helper might:
//! answer late, die mid-request, or go out of step. Every request it receives is
//! appended to a log so callers can check what actually went over the wire.

pub mod config;
pub mod error;
pub mod helper;
pub mod logger;

#[cfg(test)]
mod tests;
