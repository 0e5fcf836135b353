//! I/O ports and adapters consumed by the decision service.

pub mod audit;
pub mod clock;
pub mod commit;
pub mod config;
pub mod execution_log;
pub mod git;
pub mod scope;
