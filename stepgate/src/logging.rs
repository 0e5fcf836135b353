//! Development-time tracing for debugging gate decisions.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, written to stderr so
//!   stdout stays reserved for the hook response.
//! - **Audit log (`io/audit`)**: product output appended as JSONL. Always
//!   written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`.
///
/// ```bash
/// RUST_LOG=stepgate=debug stepgate subagent-stop < payload.json
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
