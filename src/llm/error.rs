//! Reasoning-service error classification.

use thiserror::Error;

/// Coarse failure categories for provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// 429
    RateLimited,
    /// 5xx
    ServerError,
    /// 401 / 403
    Unauthorized,
    /// Other 4xx
    BadRequest,
    /// Connection or DNS failure
    Network,
    /// Body did not match the expected completion shape
    InvalidResponse,
}

/// Error returned by [`super::OpenRouterClient`].
#[derive(Debug, Error)]
#[error("{kind:?} error from reasoning service{}: {message}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: classify_http_status(status),
            status: Some(status),
            message: message.into(),
        }
    }
}

/// Map an HTTP status code to an error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        401 | 403 => LlmErrorKind::Unauthorized,
        500..=599 => LlmErrorKind::ServerError,
        _ => LlmErrorKind::BadRequest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_http_status() {
        assert_eq!(classify_http_status(429), LlmErrorKind::RateLimited);
        assert_eq!(classify_http_status(503), LlmErrorKind::ServerError);
        assert_eq!(classify_http_status(401), LlmErrorKind::Unauthorized);
        assert_eq!(classify_http_status(422), LlmErrorKind::BadRequest);
    }

    #[test]
    fn test_display_includes_status() {
        let err = LlmError::from_status(502, "bad gateway");
        assert_eq!(
            err.to_string(),
            "ServerError error from reasoning service (HTTP 502): bad gateway"
        );
    }
}
