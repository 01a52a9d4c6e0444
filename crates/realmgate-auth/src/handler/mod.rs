//! Request handlers
//!
//! Two handler types share one [`TokenExchanger`] and differ in trust posture:
//!
//! - [`ExchangeHandler`] forwards the raw upstream answer, success or failure,
//!   inside a 200 and leaves trust decisions to its caller.
//! - [`CallbackHandler`] verifies the returned ID token and only answers 200
//!   with claims that passed every check.
//!
//! Both are framework-independent: they return a [`HandlerResponse`] that the
//! HTTP layer turns into a response verbatim.

mod callback;
mod exchange;

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use serde_json::{Value, json};

use crate::config::ConfigResolver;
use crate::exchange::TokenExchanger;
use crate::jwt::{DEFAULT_LEEWAY, JwksCache};

pub use callback::{CallbackHandler, CallbackRequest};
pub use exchange::{ExchangeHandler, ExchangeHandlerRequest};

/// Dependencies shared by both handlers.
#[derive(Debug)]
pub struct OAuthContext {
    /// OAuth deployment configuration, resolved on first use
    pub config: ConfigResolver,
    /// Token endpoint client
    pub exchanger: TokenExchanger,
    /// Published signing keys, shared across requests
    pub jwks: Arc<JwksCache>,
    /// Clock skew tolerated by ID token checks
    pub leeway: Duration,
}

impl OAuthContext {
    /// Bundle the handler dependencies with the default leeway.
    pub fn new(config: ConfigResolver, exchanger: TokenExchanger, jwks: Arc<JwksCache>) -> Self {
        Self {
            config,
            exchanger,
            jwks,
            leeway: DEFAULT_LEEWAY,
        }
    }

    /// Override the clock skew tolerance.
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }
}

/// Status and JSON body to send back to the browser.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerResponse {
    /// HTTP status
    pub status: StatusCode,
    /// JSON body
    pub body: Value,
}

impl HandlerResponse {
    /// Build a response.
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }

    /// Split into status and body.
    pub fn into_parts(self) -> (StatusCode, Value) {
        (self.status, self.body)
    }

    pub(crate) fn missing_code() -> Self {
        Self::new(StatusCode::BAD_REQUEST, json!({ "error": "missing_code" }))
    }
}

/// `None`, empty and all-whitespace codes are all "missing".
fn present(code: Option<&str>) -> Option<&str> {
    code.map(str::trim).filter(|c| !c.is_empty())
}
