//! Application-wide error types.

use std::time::Duration;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication rejected by {service}: {message}")]
    Authentication { service: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Delivery via {sink} failed: {message}")]
    Delivery { sink: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn auth(service: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Authentication {
            service: service.into(),
            message: msg.into(),
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn delivery(sink: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Delivery {
            sink: sink.into(),
            message: msg.into(),
        }
    }

    /// Whether the failure is worth another attempt.
    ///
    /// Connection drops, timeouts, 5xx, 408 and 429 are transient. Configuration,
    /// authentication, other 4xx and cancellation are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::RateLimited { .. } | Self::Io(_) => true,
            Self::Http(e) => {
                e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
            }
            Self::UpstreamStatus { status, .. } => matches!(*status, 408 | 429 | 500..),
            Self::Delivery { .. } => true,
            Self::Configuration(_)
            | Self::Authentication { .. }
            | Self::Cancelled
            | Self::Other(_) => false,
        }
    }

    /// Whether the failure must stop the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Authentication { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::transport("reset").is_retryable());
        assert!(
            Error::UpstreamStatus {
                status: 503,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !Error::UpstreamStatus {
                status: 404,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            Error::UpstreamStatus {
                status: 408,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(Error::RateLimited { retry_after: None }.is_retryable());
        assert!(!Error::config("bad").is_retryable());
        assert!(Error::config("bad").is_fatal());
        assert!(Error::auth("nomad", "403").is_fatal());
        assert!(!Error::Cancelled.is_fatal());
    }
}
