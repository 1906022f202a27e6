//! Deterministic, pure logic shared by the control loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod chunk;
pub mod directive;
pub mod failure_guard;
pub mod history;
pub mod types;
pub mod usage;
