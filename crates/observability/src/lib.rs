//! Shared logging setup for services and workers.

/// Tracing configuration (filters, output format).
pub mod tracing;

/// Initialize process-wide logging.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}
