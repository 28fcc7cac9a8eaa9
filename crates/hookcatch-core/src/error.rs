//! Error types for storage and the public intake taxonomy.
//!
//! [`CoreError`] is what repositories return. [`HookCatchError`] is the
//! caller-facing taxonomy with stable codes that the HTTP layer maps onto
//! status codes.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Storage-level error.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Entity not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique key already taken.
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Whether a later attempt at the same operation could succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested entity not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Duplicate(format!("unique constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err)
                if db_err.is_foreign_key_violation() || db_err.is_check_violation() =>
            {
                Self::InvalidInput(format!("constraint violation: {db_err}"))
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

/// Caller-facing error taxonomy.
///
/// Displays the bare reason; [`HookCatchError::code`] carries the stable
/// identifier clients match on.
#[derive(Debug, Error)]
pub enum HookCatchError {
    // Request errors (E1001-E1006)
    /// Request signature did not verify (E1001).
    #[error("{reason}")]
    InvalidSignature {
        /// Human-readable verification failure.
        reason: String,
    },

    /// No provider registered under this key (E1002).
    #[error("Unknown provider: {provider}")]
    UnknownProvider {
        /// The provider key from the request path.
        provider: String,
    },

    /// Body is not valid JSON (E1003).
    #[error("Invalid JSON payload")]
    MalformedPayload,

    /// Referenced delivery or dead letter is absent (E1004).
    #[error("{what} not found (id={id})")]
    NotFound {
        /// Kind of record.
        what: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Missing or invalid admin credentials (E1005).
    #[error("Unauthorized: {reason}")]
    Unauthorized {
        /// Why the credentials were rejected.
        reason: String,
    },

    /// Query parameter does not name a known value (E1006).
    #[error("{reason}")]
    InvalidQuery {
        /// Which parameter was rejected and why.
        reason: String,
    },

    // Processing errors (E2001)
    /// Business handler failed (E2001).
    #[error("Handler error: {0}")]
    HandlerError(String),

    // System errors (E3001-E3002)
    /// Storage failure (E3001).
    #[error("Database error: {0}")]
    Database(#[from] CoreError),

    /// Work queue rejected the job (E3002).
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),
}

impl HookCatchError {
    /// Returns the error code (E1001-E3002).
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidSignature { .. } => "E1001",
            Self::UnknownProvider { .. } => "E1002",
            Self::MalformedPayload => "E1003",
            Self::NotFound { .. } => "E1004",
            Self::Unauthorized { .. } => "E1005",
            Self::InvalidQuery { .. } => "E1006",
            Self::HandlerError(_) => "E2001",
            Self::Database(_) => "E3001",
            Self::QueueUnavailable(_) => "E3002",
        }
    }

    /// Returns whether the failure is worth retrying.
    ///
    /// Authentication and routing failures are terminal per request.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::HandlerError(_) | Self::QueueUnavailable(_) => true,
            Self::Database(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Builds a delivery-not-found error.
    pub fn delivery_not_found(id: impl ToString) -> Self {
        Self::NotFound { what: "Delivery", id: id.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(HookCatchError::InvalidSignature { reason: "x".into() }.code(), "E1001");
        assert_eq!(HookCatchError::UnknownProvider { provider: "foo".into() }.code(), "E1002");
        assert_eq!(HookCatchError::MalformedPayload.code(), "E1003");
        assert_eq!(HookCatchError::delivery_not_found("abc").code(), "E1004");
        assert_eq!(HookCatchError::InvalidQuery { reason: "bad".into() }.code(), "E1006");
        assert_eq!(HookCatchError::HandlerError("boom".into()).code(), "E2001");
        assert_eq!(HookCatchError::QueueUnavailable("closed".into()).code(), "E3002");
    }

    #[test]
    fn messages_carry_reason_only() {
        let err = HookCatchError::InvalidSignature { reason: "Invalid signature".into() };
        assert_eq!(err.to_string(), "Invalid signature");

        let err = HookCatchError::UnknownProvider { provider: "foo".into() };
        assert_eq!(err.to_string(), "Unknown provider: foo");

        assert_eq!(
            HookCatchError::delivery_not_found("42").to_string(),
            "Delivery not found (id=42)"
        );
    }

    #[test]
    fn intake_rejections_are_not_retryable() {
        assert!(!HookCatchError::InvalidSignature { reason: "x".into() }.is_retryable());
        assert!(!HookCatchError::MalformedPayload.is_retryable());
        assert!(HookCatchError::HandlerError("x".into()).is_retryable());
        assert!(HookCatchError::Database(CoreError::Database("down".into())).is_retryable());
        assert!(!HookCatchError::Database(CoreError::NotFound("gone".into())).is_retryable());
    }
}
