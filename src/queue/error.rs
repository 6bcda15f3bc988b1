//! Queue Error Types
//!
//! The queue operations themselves never fail; these errors only come out of
//! configuration and construction.

use thiserror::Error;

/// Result type for queue construction and configuration
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors raised while configuring or building a queue
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Configuration values failed validation
    #[error("Invalid queue configuration: {message}")]
    InvalidConfig { message: String },

    /// Generic queue operation error
    #[error("Queue operation failed: {message}")]
    OperationFailed { message: String },
}

impl QueueError {
    /// Create an invalid configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an operation failed error
    pub fn operation_failed(message: impl Into<String>) -> Self {
        Self::OperationFailed {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_error_creation() {
        let error = QueueError::invalid_config("period must be non-zero");
        assert_eq!(
            error.to_string(),
            "Invalid queue configuration: period must be non-zero"
        );

        let error = QueueError::operation_failed("test error");
        assert_eq!(error.to_string(), "Queue operation failed: test error");
    }
}
