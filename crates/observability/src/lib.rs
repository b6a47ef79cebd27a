//! Tracing and logging setup shared by every binary and test harness.

/// Initialize process-wide tracing using `ARMSLEDGER_LOG_FORMAT` (default JSON).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use tracing::{LOG_FORMAT, LogFormat, ParseLogFormatError, init_for_tests, init_with};
