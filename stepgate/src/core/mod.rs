//! Deterministic, pure logic of the gate.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod completion;
pub mod correction;
pub mod integrity;
pub mod parser;
pub mod schema;
pub mod scope;
pub mod types;
