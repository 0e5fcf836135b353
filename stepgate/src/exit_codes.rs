//! Stable exit codes for stepgate CLI commands.

/// Step accepted, or a report was printed.
pub const OK: i32 = 0;
/// Payload, config or arguments could not be used; a block response is still printed.
pub const INVALID: i32 = 1;
/// Step rejected; stdout carries the block reason.
pub const BLOCK: i32 = 2;
