//! Where keys go when they exhaust their retries.

use splitter_core::ObjectKey;

use crate::error::ProcessError;

/// Receives each key that is dropped after its final failed attempt,
/// exactly once per drop.
pub trait ErrorSink: Send + Sync + 'static {
    fn report(&self, key: &ObjectKey, error: &ProcessError);
}

/// Default sink: one `error`-level tracing event per dropped key.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&self, key: &ObjectKey, error: &ProcessError) {
        tracing::error!(key = %key, error = %error, "giving up on key after repeated failures");
    }
}
