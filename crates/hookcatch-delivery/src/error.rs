//! Errors raised while processing an accepted delivery.
//!
//! None of these reach the intake caller. The state machine turns every one
//! of them into a `failed` or `dead` transition; [`DeliveryError::kind`] is
//! the error class recorded on the delivery and its dead letter.

use std::{backtrace::BacktraceStatus, time::Duration};

use hookcatch_core::{CoreError, DeliveryId, DeliveryStatus};
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Failure during processing or engine lifecycle.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// A business handler returned an error.
    #[error("{error}")]
    Handler {
        /// Name of the handler that failed.
        handler: &'static str,
        /// Error returned by the handler.
        error: anyhow::Error,
    },

    /// Delivery was not in a state the operation expects.
    #[error("{message}")]
    InvalidState {
        /// What was wrong.
        message: String,
    },

    /// Store rejected a read or write.
    #[error("{message}")]
    Persistence {
        /// Storage error text.
        message: String,
    },

    /// Delivery no longer exists.
    #[error("delivery {id} not found")]
    NotFound {
        /// Missing delivery.
        id: DeliveryId,
    },

    /// Worker went away mid-attempt and the row outlived its liveness window.
    #[error("attempt abandoned after {timeout_secs}s in processing")]
    Abandoned {
        /// Liveness threshold that was exceeded.
        timeout_secs: u64,
    },

    /// Queue refused the work item.
    #[error("{message}")]
    Queue {
        /// Queue error text.
        message: String,
    },

    /// Workers did not stop within the shutdown budget.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Budget that was exceeded.
        timeout: Duration,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Index of the worker.
        worker_id: usize,
        /// Join error text.
        error: String,
    },
}

impl DeliveryError {
    /// Wraps a handler failure.
    pub fn handler(handler: &'static str, error: anyhow::Error) -> Self {
        Self::Handler { handler, error }
    }

    /// Creates an invalid state error for a delivery in `status`.
    pub fn invalid_state(id: DeliveryId, status: DeliveryStatus) -> Self {
        Self::InvalidState { message: format!("delivery {id} is {status}, expected processing") }
    }

    /// Creates a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence { message: message.into() }
    }

    /// Creates a queue error.
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue { message: message.into() }
    }

    /// Error class recorded on the delivery and its dead letter.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Handler { .. } => "HandlerError",
            Self::InvalidState { .. } => "InvalidStateError",
            Self::Persistence { .. } => "PersistenceError",
            Self::NotFound { .. } => "NotFoundError",
            Self::Abandoned { .. } => "AbandonedAttemptError",
            Self::Queue { .. } => "QueueError",
            Self::ShutdownTimeout { .. } => "ShutdownTimeoutError",
            Self::WorkerPanic { .. } => "WorkerPanicError",
        }
    }

    /// Diagnostic trace, at most `limit` lines.
    ///
    /// Handler errors yield the captured backtrace when one exists (set
    /// `RUST_BACKTRACE=1`), otherwise the chain of error causes.
    pub fn trace(&self, limit: usize) -> Option<String> {
        let lines: Vec<String> = match self {
            Self::Handler { error, .. } => {
                let backtrace = error.backtrace();
                if backtrace.status() == BacktraceStatus::Captured {
                    backtrace.to_string().lines().take(limit).map(str::to_string).collect()
                } else {
                    error.chain().take(limit).map(ToString::to_string).collect()
                }
            },
            other => vec![other.to_string()],
        };

        (!lines.is_empty()).then(|| lines.join("\n"))
    }
}

impl From<CoreError> for DeliveryError {
    fn from(err: CoreError) -> Self {
        Self::persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn kinds_name_the_failure_class() {
        let handler = DeliveryError::handler("push", anyhow::anyhow!("boom"));
        assert_eq!(handler.kind(), "HandlerError");
        assert_eq!(handler.to_string(), "boom");

        assert_eq!(DeliveryError::persistence("gone").kind(), "PersistenceError");
        assert_eq!(
            DeliveryError::invalid_state(DeliveryId::new(), DeliveryStatus::Dead).kind(),
            "InvalidStateError"
        );
        assert_eq!(DeliveryError::Abandoned { timeout_secs: 300 }.kind(), "AbandonedAttemptError");
    }

    #[test]
    fn handler_trace_falls_back_to_cause_chain() {
        let source: anyhow::Result<()> = Err(anyhow::anyhow!("connection reset"));
        let error = source.context("loading subscription").unwrap_err();
        let err = DeliveryError::handler("subscription", error);

        let trace = err.trace(10).unwrap();
        assert!(trace.contains("loading subscription"));
        assert!(trace.lines().count() <= 10);
    }

    #[test]
    fn trace_honours_line_limit() {
        let mut error = anyhow::anyhow!("root");
        for depth in 0..20 {
            error = error.context(format!("layer {depth}"));
        }
        let err = DeliveryError::handler("deep", error);

        assert!(err.trace(3).unwrap().lines().count() <= 3);
    }

    #[test]
    fn core_errors_become_persistence_failures() {
        let err: DeliveryError = CoreError::Database("connection refused".into()).into();
        assert_eq!(err.kind(), "PersistenceError");
        assert!(err.to_string().contains("connection refused"));
    }
}
