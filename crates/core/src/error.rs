//! Error types for the Vigil domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator boundary has its own error variant.

use thiserror::Error;

/// The top-level error type for all Vigil operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Delivery errors ---
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    // --- Executor errors ---
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures reported by the delivery client (transport side).
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("Delivery client is closed")]
    Closed,

    #[error("Transport rejected {kind} envelope: {reason}")]
    Rejected { kind: String, reason: String },

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Session call failed: {0}")]
    Session(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures submitting work to a background flush executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("Executor '{name}' rejected task: queue full ({capacity} pending)")]
    Rejected { name: String, capacity: usize },

    #[error("Executor '{0}' is shut down")]
    Shutdown(String),

    #[error("No async runtime available to run executor '{0}'")]
    NoRuntime(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_error_displays_correctly() {
        let err = Error::Delivery(DeliveryError::Rejected {
            kind: "log".into(),
            reason: "payload too large".into(),
        });
        assert!(err.to_string().contains("log"));
        assert!(err.to_string().contains("payload too large"));
    }

    #[test]
    fn executor_error_displays_correctly() {
        let err = Error::Executor(ExecutorError::Rejected {
            name: "metric-flush".into(),
            capacity: 8,
        });
        assert!(err.to_string().contains("metric-flush"));
        assert!(err.to_string().contains('8'));

        let err = Error::from(ExecutorError::Shutdown("log-flush".into()));
        assert!(err.to_string().contains("shut down"));
    }
}
