//! Stable exit codes for the `build-agent` binary.

/// The model requested `exit`.
pub const OK: i32 = 0;
/// Missing credentials, invalid configuration or a fatal runtime error.
pub const INVALID: i32 = 1;
/// The model replied with something that is not a directive.
pub const MALFORMED: i32 = 2;
