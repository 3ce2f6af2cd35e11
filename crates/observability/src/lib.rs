//! Tracing/logging setup shared by the service binaries.

/// Initialize process-wide logging with the format picked from `LOG_FORMAT`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env(), tracing::DEFAULT_FILTER);
}

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use tracing::LogFormat;
