//! Token exchange failures

use std::fmt;
use std::time::Duration;

use http::StatusCode;
use serde_json::Value;

/// Coarse classification of an [`ExchangeError`], used in logs and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeErrorKind {
    /// Upstream answered with a non-2xx status (`invalid_grant`, `invalid_request`, ...)
    Rejected,
    /// Upstream did not answer in time; the code may or may not have been consumed
    Timeout,
    /// Connection, TLS or body-read failure
    NetworkFailure,
    /// Exchange succeeded but the response carries no `id_token`
    MissingIdToken,
}

impl ExchangeErrorKind {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
            Self::NetworkFailure => "network_failure",
            Self::MissingIdToken => "missing_id_token",
        }
    }
}

impl fmt::Display for ExchangeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The token endpoint rejected the exchange or could not be reached.
///
/// Upstream status and body are preserved so callers can pass them through
/// instead of synthesizing a generic failure.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// Non-2xx answer from the token endpoint
    #[error("token endpoint rejected the exchange with status {status}")]
    Rejected {
        /// Upstream HTTP status
        status: StatusCode,
        /// Parsed upstream body, or `{"raw": <text>}` when it was not JSON
        data: Value,
    },

    /// The request exceeded its timeout
    #[error("token endpoint did not respond within {timeout:?}")]
    Timeout {
        /// The bound that was exceeded
        timeout: Duration,
    },

    /// Transport-level failure
    #[error("token endpoint unreachable: {0}")]
    Network(#[source] reqwest::Error),

    /// 2xx answer without an ID token where one is required
    #[error("token response does not contain an id_token")]
    MissingIdToken {
        /// Parsed upstream body, for diagnostics
        data: Value,
    },
}

impl ExchangeError {
    /// Classification of this error.
    pub fn kind(&self) -> ExchangeErrorKind {
        match self {
            Self::Rejected { .. } => ExchangeErrorKind::Rejected,
            Self::Timeout { .. } => ExchangeErrorKind::Timeout,
            Self::Network(_) => ExchangeErrorKind::NetworkFailure,
            Self::MissingIdToken { .. } => ExchangeErrorKind::MissingIdToken,
        }
    }

    /// Upstream HTTP status, when the endpoint answered at all.
    pub fn upstream_status(&self) -> Option<StatusCode> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Upstream body, when there is one.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Rejected { data, .. } | Self::MissingIdToken { data } => Some(data),
            _ => None,
        }
    }

    /// The OAuth `error` code from a rejected exchange (RFC 6749 §5.2).
    pub fn oauth_error(&self) -> Option<&str> {
        match self {
            Self::Rejected { data, .. } => data.get("error").and_then(Value::as_str),
            _ => None,
        }
    }

    /// Text safe to hand to a browser.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "the authorization server rejected the code exchange",
            Self::Timeout { .. } => "the authorization server did not respond in time",
            Self::Network(_) => "the authorization server could not be reached",
            Self::MissingIdToken { .. } => "the token response did not include an ID token",
        }
    }
}
