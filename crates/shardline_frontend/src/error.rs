//! Error types for the frontend.

use shardline_access::{
    ActorAddress, BuilderError, InvalidIdentifierError, ProxyError, RequestException,
};
use thiserror::Error;

/// Result type for frontend operations.
pub type FrontendResult<T> = Result<T, FrontendError>;

/// Error returned by a failed commit.
pub type CommitError = FrontendError;

/// Errors that can occur on the frontend side.
#[derive(Error, Debug)]
pub enum FrontendError {
    /// The backend rejected the request.
    #[error("request failed: {0}")]
    Request(RequestException),

    /// The backend replica is not the shard leader; the channel must
    /// reconnect before sending again.
    #[error("{actor} is not the current leader")]
    NotLeader {
        /// Replica that refused the request.
        actor: ActorAddress,
    },

    /// No answer arrived before retries ran out.
    #[error("no response after {attempts} attempts")]
    Timeout {
        /// Attempts made.
        attempts: u32,
    },

    /// Too many requests are awaiting an answer.
    #[error("too many outstanding requests (limit {limit})")]
    WindowFull {
        /// Negotiated limit.
        limit: u32,
    },

    /// The transaction was already readied, committed or cancelled.
    #[error("transaction {0} has already been finalized")]
    TransactionSealed(String),

    /// The backend answered with a success of the wrong kind.
    #[error("expected {expected}, got {actual}")]
    UnexpectedResponse {
        /// Expected response kind.
        expected: &'static str,
        /// Received response kind.
        actual: &'static str,
    },

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Serialization error.
    #[error("proxy error: {0}")]
    Proxy(#[from] ProxyError),

    /// Request construction error.
    #[error("builder error: {0}")]
    Builder(#[from] BuilderError),

    /// Invalid identifier in the configuration.
    #[error("identifier error: {0}")]
    Identifier(#[from] InvalidIdentifierError),

    /// The channel was closed.
    #[error("not connected to backend")]
    NotConnected,
}

impl FrontendError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the operation that produced this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::Request(cause) => cause.is_retriable(),
            Self::Timeout { .. } | Self::WindowFull { .. } => true,
            _ => false,
        }
    }

    /// The protocol cause, if the backend rejected the request.
    pub fn request_exception(&self) -> Option<&RequestException> {
        match self {
            Self::Request(cause) => Some(cause),
            _ => None,
        }
    }
}

impl From<RequestException> for FrontendError {
    fn from(cause: RequestException) -> Self {
        match cause {
            RequestException::NotLeader { actor } => Self::NotLeader { actor },
            other => Self::Request(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(FrontendError::transport_retryable("reset").is_retryable());
        assert!(!FrontendError::transport_fatal("refused").is_retryable());
        assert!(FrontendError::Timeout { attempts: 3 }.is_retryable());
        let unknown = RequestException::UnknownHistory { last_known: None };
        assert!(FrontendError::Request(unknown).is_retryable());
        let out_of_order = RequestException::OutOfOrder { expected: 2 };
        assert!(!FrontendError::Request(out_of_order).is_retryable());
        assert!(!FrontendError::TransactionSealed("tx".into()).is_retryable());
    }

    #[test]
    fn not_leader_is_lifted_out_of_request() {
        let error = FrontendError::from(RequestException::NotLeader {
            actor: ActorAddress::new("shard-a"),
        });
        assert!(matches!(error, FrontendError::NotLeader { .. }));
        assert_eq!(error.to_string(), "shard-a is not the current leader");
        assert!(error.request_exception().is_none());
    }

    #[test]
    fn error_display() {
        let error =
            FrontendError::Request(RequestException::ClosedTransaction { successful: false });
        assert_eq!(error.to_string(), "request failed: Transaction has been aborted");
        assert_eq!(
            FrontendError::WindowFull { limit: 4 }.to_string(),
            "too many outstanding requests (limit 4)"
        );
    }
}
