//! Destinations for errors the connection layer recovers from locally.
//!
//! Queue overflows, subscriber failures, and protocol errors never reach the
//! caller of `send` or `dispatch`. They are handed to an [`ErrorSink`].

use parking_lot::Mutex;
use tether_core::TetherError;
use tracing::{error, warn};

/// Receives non-fatal errors.
pub trait ErrorSink: Send + Sync {
    /// Report one error. Must not panic.
    fn report(&self, error: &TetherError);
}

/// Default sink: writes each error to the `tracing` log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, err: &TetherError) {
        let recoverable = err.is_recoverable();
        if recoverable && !matches!(err, TetherError::Subscriber { .. }) {
            warn!(code = err.code(), recoverable, error = %err, "connection layer error");
        } else {
            error!(code = err.code(), recoverable, error = %err, "connection layer error");
        }
    }
}

/// Sink that keeps every reported error in memory.
#[derive(Debug, Default)]
pub struct CollectingErrorSink {
    errors: Mutex<Vec<TetherError>>,
}

impl CollectingErrorSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far.
    pub fn errors(&self) -> Vec<TetherError> {
        self.errors.lock().clone()
    }

    /// Number of reported errors with the given code.
    pub fn count(&self, code: &str) -> usize {
        self.errors.lock().iter().filter(|e| e.code() == code).count()
    }
}

impl ErrorSink for CollectingErrorSink {
    fn report(&self, error: &TetherError) {
        self.errors.lock().push(error.clone());
    }
}
