//! Failure classification for API calls.

use std::time::Duration;

/// Error raised by an `ApiClient` call. Classified as transient (worth retrying) or permanent.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// Non-success HTTP status.
    #[error("[HTTP {status}] {message}")]
    Status {
        status: u16,
        message: String,
        /// Server-requested wait from a Retry-After header, if any.
        retry_after: Option<Duration>,
    },
    /// Connection, timeout, or other transport failure before a status was received.
    #[error("network error: {0}")]
    Transport(String),
    /// Response arrived but could not be understood.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        ApiError::Status {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    /// True for rate limiting, request timeout, server errors, and transport failures.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => {
                *status == 408 || *status == 429 || (500..=599).contains(status)
            }
            ApiError::Transport(_) => true,
            ApiError::Decode(_) => false,
        }
    }

    /// 401 or 403: the API key was refused.
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, ApiError::Status { status: 401 | 403, .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Status { status: 404, .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status when one was received.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_and_rate_limit_statuses_are_transient() {
        for s in [408, 429, 500, 502, 503, 504] {
            assert!(ApiError::status(s, "x").is_transient(), "status {}", s);
        }
    }

    #[test]
    fn client_errors_are_permanent() {
        for s in [400, 401, 403, 404, 422] {
            assert!(!ApiError::status(s, "x").is_transient(), "status {}", s);
        }
        assert!(!ApiError::Decode("bad".into()).is_transient());
        assert!(ApiError::Transport("reset".into()).is_transient());
    }

    #[test]
    fn display_includes_status() {
        let e = ApiError::status(500, "boom");
        assert_eq!(e.to_string(), "[HTTP 500] boom");
        assert!(ApiError::status(404, "").is_not_found());
        assert!(ApiError::status(401, "").is_auth_rejected());
        assert!(ApiError::status(403, "").is_auth_rejected());
        assert!(!ApiError::status(404, "").is_auth_rejected());
    }
}
