//! Phase gate for agent-driven TDD workflows.
//!
//! When an agent reports that it stopped working on a step, stepgate reads the
//! step's execution log and decides whether the agent may stop (`allow`) or
//! must go back (`block`). The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (record parsing, phase schema,
//!   completion and integrity validation, correction planning, scope globs).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting ports and their default adapters (execution log
//!   file, JSONL audit log, git, clock, config). Traits at every seam so tests
//!   can substitute fakes.
//!
//! [`decision`] orchestrates core logic over the ports; [`hook`] and
//! [`inspect`] back the CLI commands.

pub mod core;
pub mod decision;
pub mod exit_codes;
pub mod hook;
pub mod inspect;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
