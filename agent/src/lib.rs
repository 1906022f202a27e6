//! LLM-driven container build agent.
//!
//! A chat model drives a loop of discrete actions (clone a repository, index
//! it, synthesize a Dockerfile, build it, fix it) by replying with one JSON
//! directive per turn. The loop accounts token usage, escalates to a human on
//! quota or repeated build failure, and keeps an append-only audit trail.
//!
//! - **[`core`]**: Pure logic (directive parsing, usage accounting, failure
//!   counting, history, chunking). No I/O.
//! - **[`io`]**: Side-effecting adapters (model and embedding endpoints, Qdrant,
//!   git, docker, logs, stdin). Each external service sits behind a trait.
//! - **[`actions`]**: The registry and the handlers the model can invoke.
//! - **[`looping`]**: The control loop tying them together.

pub mod actions;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
