//! Process-wide logging setup shared by the balance binaries.

/// Install the tracing subscriber for this process.
///
/// Calling it again is a no-op.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

pub mod tracing;
