//! Side-effecting adapters used by the control loop and action handlers.

pub mod audit_log;
pub mod config;
pub mod docker;
pub mod embeddings;
pub mod files;
pub mod git;
pub mod http;
pub mod human;
pub mod llm;
pub mod process;
pub mod prompt;
pub mod qdrant;
pub mod usage_log;
