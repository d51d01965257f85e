//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// No version satisfies the constraint, or the package is not cached
pub const NOT_FOUND: i32 = 2;

/// Registry could not be reached or refused our credentials
pub const REGISTRY_ERROR: i32 = 3;

/// Package content is malformed or fails lint
pub const PACKAGE_ERROR: i32 = 4;

/// IO error - file not found, permission denied, cache write failed
pub const IO_ERROR: i32 = 5;

/// Dependency graph contains a cycle
pub const CYCLE_ERROR: i32 = 6;

/// Usage error - invalid arguments or references (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;

/// Configuration error (sysexits.h EX_CONFIG)
pub const CONFIG_ERROR: i32 = 78;

/// Interrupted by the user or by the operation deadline
pub const INTERRUPTED: i32 = 130;
