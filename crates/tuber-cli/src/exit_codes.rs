//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Input error - malformed `--var`, `--exclude` or app name
pub const INPUT_ERROR: i32 = 2;

/// Configuration error - unreadable or invalid config file
pub const CONFIG_ERROR: i32 = 3;

/// Render error - manifests failed to interpolate, parse or classify
pub const RENDER_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Release failed and was rolled back
pub const RELEASE_FAILED: i32 = 6;

/// Release changed the cluster but its state could not be saved
pub const STATE_UNSAFE: i32 = 7;

/// App store unreachable or app missing
pub const STORE_ERROR: i32 = 8;
