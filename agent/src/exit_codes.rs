//! Stable exit codes for the agent CLI.

/// Clean shutdown, or `check-config` found no problems.
pub const OK: i32 = 0;
/// Unexpected runtime failure.
pub const FAILED: i32 = 1;
/// Configuration or credential is missing or malformed; the loop never started.
pub const INVALID_CONFIG: i32 = 2;
/// The oracle never became reachable or the credential was rejected.
pub const STARTUP_FAILED: i32 = 3;
