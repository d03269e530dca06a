// Shared plumbing for the remote services: the embedding model, the vector
// index and the hosted language model all fail the same ways and are retried
// by the same policy.

pub mod http;
pub mod retry;

use std::fmt;

use thiserror::Error;

pub use http::HttpClient;
pub use retry::{Retried, RetryFailure, RetryPolicy, with_retry};

/// Broad classification of a remote call failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Transport,
    RateLimited,
    Server,
    Auth,
    InvalidRequest,
    Protocol,
}

impl fmt::Display for FailureKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::Transport => "transport error",
            Self::RateLimited => "rate limited",
            Self::Server => "server error",
            Self::Auth => "authentication failed",
            Self::InvalidRequest => "invalid request",
            Self::Protocol => "unexpected response",
        };
        f.write_str(name)
    }
}

/// Error returned by a single call to a remote service
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: FailureKind,
    pub message: String,
}

impl ProviderError {
    #[inline]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[inline]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Protocol, message)
    }

    /// Whether a later attempt of the same call could succeed
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            FailureKind::Timeout
                | FailureKind::Transport
                | FailureKind::RateLimited
                | FailureKind::Server
        )
    }
}
