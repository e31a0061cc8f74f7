// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::Serialize;

/// Maximum length for response bodies quoted in error messages.
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// User-presentable failure of a session operation (`login`, `register`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Client-detectable input problem. No network call was made.
    #[error("{message}")]
    Validation { field: &'static str, message: String },
    /// Transport failure or deadline exceeded.
    #[error("unable to reach the identity service: {0}")]
    Network(String),
    /// The identity service explicitly denied the request.
    #[error("{0}")]
    Rejected(String),
    /// 5xx or a response that could not be understood.
    #[error("identity service error: {0}")]
    Server(String),
}

impl SessionError {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation { field, message: message.into() }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION",
            Self::Network(_) => "NETWORK",
            Self::Rejected(_) => "REJECTED",
            Self::Server(_) => "SERVER",
        }
    }
}

impl From<IdentityError> for SessionError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Unauthorized { message, .. } | IdentityError::Rejected { message, .. } => {
                if message.is_empty() {
                    Self::Rejected("invalid credentials".to_owned())
                } else {
                    Self::Rejected(message)
                }
            }
            IdentityError::Server { status, message } => {
                Self::Server(format!("status {status}: {message}"))
            }
            IdentityError::Malformed(msg) => Self::Server(format!("malformed response: {msg}")),
            IdentityError::Network(msg) => Self::Network(msg),
            IdentityError::Timeout => Self::Network("request timed out".to_owned()),
        }
    }
}

/// Failure reported by an [`IdentityService`](crate::identity::IdentityService)
/// call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// 401/403: the presented credential is expired or invalid.
    #[error("unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },
    /// Any other 4xx.
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl IdentityError {
    /// Classify a non-success HTTP status and its body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = error_message(body);
        match status {
            401 | 403 => Self::Unauthorized { status, message },
            400..=499 => Self::Rejected { status, message },
            500..=599 => Self::Server { status, message },
            _ => Self::Malformed(format!("unexpected status {status}: {message}")),
        }
    }

    /// Whether this failure means the credential itself is no longer valid.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

/// Pull a human-readable message out of an error body. Prefers a JSON
/// `message` or `error` field, otherwise the truncated raw body.
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["message", "error_description", "error"] {
            if let Some(msg) = value.get(field).and_then(|v| v.as_str()) {
                return truncate(msg);
            }
        }
    }
    truncate(body.trim())
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_owned();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

/// Categorized reason a credential renewal did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum RefreshFailure {
    #[error("no credential to refresh")]
    NothingToRefresh,
    #[error("renewal timed out")]
    Timeout,
    #[error("network error during renewal")]
    Network,
    #[error("renewal rejected by the identity service")]
    Rejected,
    #[error("identity service error during renewal")]
    Server,
    #[error("malformed renewal response")]
    Malformed,
    /// The session was cleared or replaced while the renewal was in flight.
    #[error("session changed during renewal")]
    Superseded,
}

impl RefreshFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NothingToRefresh => "nothing_to_refresh",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Rejected => "rejected",
            Self::Server => "server",
            Self::Malformed => "malformed",
            Self::Superseded => "superseded",
        }
    }

    /// Transient failures leave the credential usable and are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network | Self::Server)
    }
}

impl From<&IdentityError> for RefreshFailure {
    fn from(err: &IdentityError) -> Self {
        match err {
            IdentityError::Unauthorized { .. } | IdentityError::Rejected { .. } => Self::Rejected,
            IdentityError::Server { .. } => Self::Server,
            IdentityError::Network(_) => Self::Network,
            IdentityError::Timeout => Self::Timeout,
            IdentityError::Malformed(_) => Self::Malformed,
        }
    }
}

/// A store update that would violate a session invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("invalid session update: {0}")]
    InvalidPatch(&'static str),
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
