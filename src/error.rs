//! Error types for a3s-cache-notify

use thiserror::Error;

/// Errors that can occur while registering or running a watch
///
/// Errors are `Clone` because fetch failures travel to the consumer
/// inside every `UpdateEvent` that observed them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// The requested cache type was never registered with the backend
    #[error("Unknown type in cache: {0}")]
    UnknownType(String),

    /// A polling-only type was watched without a positive max age
    #[error("Cannot watch polling cache type '{0}' without specifying a max age")]
    MissingMaxAge(String),

    /// Invalid notifier or backend configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backend fetch failure (upstream, network, store)
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The destination of a watch is no longer accepting events
    #[error("Destination closed: {0}")]
    Closed(String),
}

/// Result type alias for notify operations
pub type Result<T> = std::result::Result<T, NotifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            NotifyError::UnknownType("kv".to_string()).to_string(),
            "Unknown type in cache: kv"
        );
        assert_eq!(
            NotifyError::MissingMaxAge("catalog".to_string()).to_string(),
            "Cannot watch polling cache type 'catalog' without specifying a max age"
        );
        assert_eq!(
            NotifyError::Fetch("connection refused".to_string()).to_string(),
            "Fetch error: connection refused"
        );
    }

    #[test]
    fn test_error_clone_eq() {
        let err = NotifyError::Timeout("blocking query".to_string());
        assert_eq!(err.clone(), err);
        assert_ne!(err, NotifyError::Timeout("other".to_string()));
    }
}
