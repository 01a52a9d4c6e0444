//! Exchange request and response types

use std::fmt;

use http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value, json};

use super::error::ExchangeError;

/// One authorization code to trade for tokens.
///
/// Built per inbound callback and consumed by a single exchange.
#[derive(Clone)]
pub struct ExchangeRequest {
    /// Opaque, single-use code issued by the authorization server
    pub code: String,
    /// Must match the redirect URI of the original authorization request
    pub redirect_uri: String,
    /// CSRF correlation value; passed through, not verified here
    pub state: Option<String>,
}

impl ExchangeRequest {
    /// Create a request without a `state`.
    pub fn new(code: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            redirect_uri: redirect_uri.into(),
            state: None,
        }
    }

    /// Attach the `state` value received with the redirect.
    pub fn with_state(mut self, state: Option<String>) -> Self {
        self.state = state;
        self
    }
}

// Codes are bearer credentials until redeemed; keep them out of logs
impl fmt::Debug for ExchangeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeRequest")
            .field("code", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .field("state", &self.state)
            .finish()
    }
}

/// Whatever the token endpoint answered, success or not.
///
/// Transport failures never produce an outcome; they are [`ExchangeError`]s.
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    /// Upstream HTTP status
    pub status: StatusCode,
    /// Parsed body, or `{"raw": <text>}` when the body was not JSON
    pub data: Value,
    raw: bool,
}

impl ExchangeOutcome {
    /// Build an outcome from a status and the body text.
    ///
    /// A body that does not parse as JSON is kept verbatim under `raw`.
    pub fn from_body(status: StatusCode, body: &str) -> Self {
        match serde_json::from_str::<Value>(body) {
            Ok(data) => Self {
                status,
                data,
                raw: false,
            },
            Err(_) => Self {
                status,
                data: json!({ "raw": body }),
                raw: true,
            },
        }
    }

    /// Whether the upstream status is 2xx.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Whether the body was not JSON and was wrapped under `raw`.
    pub fn is_raw(&self) -> bool {
        self.raw
    }

    /// Interpret the outcome as a token response.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::Rejected`] for a non-2xx status, carrying the
    /// upstream status and body.
    pub fn into_token_response(self) -> Result<TokenResponse, ExchangeError> {
        if !self.is_success() {
            return Err(ExchangeError::Rejected {
                status: self.status,
                data: self.data,
            });
        }
        Ok(TokenResponse::from_value(&self.data))
    }

    /// Interpret the outcome as a token response that must carry an ID token.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::Rejected`] for a non-2xx status and
    /// [`ExchangeError::MissingIdToken`] when a 2xx body has no usable
    /// `id_token`.
    pub fn into_id_token_response(self) -> Result<(String, TokenResponse), ExchangeError> {
        if !self.is_success() {
            return Err(ExchangeError::Rejected {
                status: self.status,
                data: self.data,
            });
        }
        let response = TokenResponse::from_value(&self.data);
        match response.id_token.clone() {
            Some(id_token) => Ok((id_token, response)),
            None => Err(ExchangeError::MissingIdToken { data: self.data }),
        }
    }
}

/// Tokens returned by a successful exchange. Transient, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TokenResponse {
    /// Compact-serialized ID token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Access token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Token type, usually `Bearer`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Access token lifetime in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Refresh token, when issued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Granted scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Everything else the server sent
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

impl TokenResponse {
    /// Lenient extraction from an upstream body.
    ///
    /// Wrongly typed or empty fields are treated as absent rather than
    /// failing the whole response; they stay visible in `additional`.
    pub fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };

        let string = |name: &str| {
            object
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let expires_in = object.get("expires_in").and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        });

        let response = Self {
            id_token: string("id_token"),
            access_token: string("access_token"),
            token_type: string("token_type"),
            expires_in,
            refresh_token: string("refresh_token"),
            scope: string("scope"),
            additional: Map::new(),
        };

        let known = |name: &str| match name {
            "id_token" => response.id_token.is_some(),
            "access_token" => response.access_token.is_some(),
            "token_type" => response.token_type.is_some(),
            "expires_in" => response.expires_in.is_some(),
            "refresh_token" => response.refresh_token.is_some(),
            "scope" => response.scope.is_some(),
            _ => false,
        };
        let additional = object
            .iter()
            .filter(|(name, _)| !known(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Self {
            additional,
            ..response
        }
    }
}
