//! The `error` module defines the error types used within `brokerlink`.
//!
//! Errors that mean an operation is invalid in its current form (a malformed
//! filter, a call made in the wrong session state) are returned to the caller.
//! Failures inside user handlers are represented separately by
//! [`HandlerError`]; the dispatch loop logs them and keeps going.

/// Main error type for session, registry and client operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network-level failure establishing or maintaining a connection.
    #[error("connection error: {message}")]
    Connection { message: String },

    /// TLS handshake or certificate failure. Retrying with the same
    /// credentials will not help.
    #[error("authentication error: {message}")]
    Auth { message: String },

    #[error("session is already connected")]
    AlreadyConnected,

    #[error("session is not connected")]
    NotConnected,

    #[error("invalid topic filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: &'static str },

    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: &'static str },

    /// The inbound frame sequence of the current connection was already
    /// handed out.
    #[error("incoming frames of this connection are already being consumed")]
    ReceiverInUse,

    #[error("frame codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl Error {
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_filter(filter: &str, reason: &'static str) -> Self {
        Self::InvalidFilter {
            filter: filter.to_string(),
            reason,
        }
    }

    pub(crate) fn invalid_topic(topic: &str, reason: &'static str) -> Self {
        Self::InvalidTopic {
            topic: topic.to_string(),
            reason,
        }
    }

    /// Only network failures are worth another `connect()` attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Returned by a message handler that failed to process a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("handler failed: {message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_errors_are_retryable() {
        assert!(Error::connection("refused").is_retryable());
        assert!(!Error::auth("bad cert").is_retryable());
        assert!(!Error::NotConnected.is_retryable());
        assert!(!Error::AlreadyConnected.is_retryable());
    }

    #[test]
    fn invalid_filter_message_names_the_filter() {
        let err = Error::invalid_filter("a/#/c", "'#' must be the last segment");
        assert_eq!(
            err.to_string(),
            "invalid topic filter 'a/#/c': '#' must be the last segment"
        );
    }

    #[test]
    fn handler_error_from_str() {
        let err: HandlerError = "boom".into();
        assert_eq!(err.to_string(), "handler failed: boom");
    }
}
