//! Gateway error taxonomy and the best-effort cleanup outcome.

use reqwest::StatusCode;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Network failure, timeout, or provider 5xx after retries.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rate limited by provider")]
    RateLimited,
    /// The resource is already gone at the provider.
    #[error("not found: {0}")]
    NotFound(String),
    /// Rejected credentials, including an expired or revoked refresh token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("failed to decode provider response: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => Self::Unauthorized(body),
            404 | 410 => Self::NotFound(body),
            429 => Self::RateLimited,
            code if status.is_server_error() => Self::Transport(format!("HTTP {code}: {body}")),
            code => Self::Api { status: code, body },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimited)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::from_status(status, err.to_string());
        }
        Self::Transport(err.to_string())
    }
}

/// Result of an external cleanup call whose failure must not block the
/// caller. Distinguishes "done" from "nothing to do" from "ignored failure".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Done,
    AlreadyGone,
    Warning(String),
}

impl CleanupOutcome {
    /// Fold a gateway result into an outcome, logging ignored failures.
    pub fn from_result(operation: &str, result: Result<(), GatewayError>) -> Self {
        match result {
            Ok(()) => Self::Done,
            Err(err) if err.is_not_found() => Self::AlreadyGone,
            Err(err) => {
                warn!("{} failed (ignored): {}", operation, err);
                Self::Warning(format!("{operation}: {err}"))
            }
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Warning(_))
    }
}
