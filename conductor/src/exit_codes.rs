//! Stable exit codes for conductor CLI commands.

/// Command succeeded; every unit in scope is resolved.
pub const OK: i32 = 0;
/// Command failed due to invalid layout/config/plan, a dependency cycle,
/// an unknown unit, or other errors.
pub const INVALID: i32 = 1;
/// A unit exhausted its retries; the run paused and can be resumed.
pub const PAUSED: i32 = 2;
