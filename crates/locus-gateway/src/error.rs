//! Gateway error types

use thiserror::Error;

/// Failure of a single language model call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Connection or protocol failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("model API returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Truncated response body
        body: String,
    },

    /// Call exceeded its deadline
    #[error("model API call timed out")]
    Timeout,

    /// Reply did not have the expected shape
    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    /// Reply had no content
    #[error("model API returned an empty response")]
    EmptyResponse,
}

impl GatewayError {
    /// Whether retrying the same call may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::EmptyResponse => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::MalformedResponse(_) => false,
        }
    }

    /// Short label for logs
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Status { .. } => "status",
            Self::Timeout => "timeout",
            Self::MalformedResponse(_) => "malformed",
            Self::EmptyResponse => "empty",
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::MalformedResponse(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(GatewayError::Timeout.is_transient());
        assert!(GatewayError::Status { status: 503, body: String::new() }.is_transient());
        assert!(GatewayError::Status { status: 429, body: String::new() }.is_transient());
        assert!(!GatewayError::Status { status: 401, body: String::new() }.is_transient());
        assert!(!GatewayError::MalformedResponse("x".into()).is_transient());
    }
}
