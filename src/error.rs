//! Error taxonomy for everything that can go wrong between the core and the
//! backend. Storage failures are deliberately absent: they are logged and
//! swallowed, never surfaced.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Rejected client-side before any network effect.
    Validation,
    /// 401 that could not be recovered by a token refresh.
    Authorization,
    /// No response received at all.
    NetworkUnreachable,
    /// Backend answered with a non-401 error status.
    Server,
    /// Backend answered 2xx but the body did not match the endpoint schema.
    MalformedResponse,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authorization => "authorization",
            ErrorKind::NetworkUnreachable => "network_unreachable",
            ErrorKind::Server => "server_error",
            ErrorKind::MalformedResponse => "malformed_response",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::NetworkUnreachable | ErrorKind::Server)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub status: Option<u16>,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Validation,
            message: message.into(),
            status: None,
        }
    }

    pub fn authorization(message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            kind: ErrorKind::Authorization,
            message: message.into(),
            status,
        }
    }

    pub fn session_expired() -> Self {
        Self::authorization("Your session has expired. Please log in again.", Some(401))
    }

    pub fn network_unreachable() -> Self {
        Self {
            kind: ErrorKind::NetworkUnreachable,
            message: "Network unreachable. Check your connection and try again.".into(),
            status: None,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::MalformedResponse,
            message: message.into(),
            status: None,
        }
    }

    /// Builds a server error from a non-401 error status, preferring the
    /// backend-provided message over the generic fallback.
    pub fn server(status: u16, body: &[u8]) -> Self {
        let message = backend_message(body)
            .unwrap_or_else(|| format!("The server could not complete the request ({status})."));
        Self {
            kind: ErrorKind::Server,
            message,
            status: Some(status),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn user_facing_message(&self) -> &str {
        &self.message
    }
}

/// Shape the backend uses for error payloads. DRF-style `detail` is the
/// common case; `error` and `message` cover the custom views.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn backend_message(body: &[u8]) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_slice(body).ok()?;
    parsed
        .detail
        .or(parsed.error)
        .or(parsed.message)
        .filter(|m| !m.trim().is_empty())
}
