//! Token endpoint client
//!
//! Security configuration:
//! - Redirects disabled (the token endpoint must answer directly)
//! - Every request bounded by a timeout
//! - Client credentials only in the `Authorization` header, never in the
//!   body or the query string

use std::time::Duration;

use http::header::ACCEPT;
use tracing::{debug, error, info, warn};

use super::error::ExchangeError;
use super::types::{ExchangeOutcome, ExchangeRequest};
use crate::config::ClientCredentials;

/// Default bound on a token request.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Performs `authorization_code` grants against a token endpoint.
#[derive(Clone)]
pub struct TokenExchanger {
    http_client: reqwest::Client,
    timeout: Duration,
}

impl TokenExchanger {
    /// Create an exchanger with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built (TLS backend
    /// initialization).
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeout(DEFAULT_EXCHANGE_TIMEOUT)
    }

    /// Create an exchanger with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http_client,
            timeout,
        })
    }

    /// The per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Exchange an authorization code at `token_endpoint`.
    ///
    /// Sends exactly one POST with the form body
    /// `grant_type=authorization_code&client_id=..&code=..&redirect_uri=..`
    /// and `Authorization: Basic base64(client_id:client_secret)`.
    ///
    /// Any HTTP answer, including 4xx/5xx, is returned as an
    /// [`ExchangeOutcome`] so the caller decides how to surface it.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::Timeout`] when the request exceeds its bound
    /// and [`ExchangeError::Network`] for any other transport failure.
    pub async fn exchange_code(
        &self,
        request: &ExchangeRequest,
        credentials: &ClientCredentials,
        token_endpoint: &str,
    ) -> Result<ExchangeOutcome, ExchangeError> {
        debug!(
            token_endpoint = %token_endpoint,
            client_id = %credentials.client_id(),
            redirect_uri = %request.redirect_uri,
            "Exchanging authorization code"
        );

        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", credentials.client_id()),
            ("code", request.code.as_str()),
            ("redirect_uri", request.redirect_uri.as_str()),
        ];

        let response = self
            .http_client
            .post(token_endpoint)
            .basic_auth(credentials.client_id(), Some(credentials.client_secret()))
            .header(ACCEPT, "application/json")
            .form(&form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(token_endpoint, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(token_endpoint, e))?;

        let outcome = ExchangeOutcome::from_body(status, &body);

        if outcome.is_success() {
            info!(
                token_endpoint = %token_endpoint,
                status = status.as_u16(),
                raw_body = outcome.is_raw(),
                "Authorization code exchanged"
            );
        } else {
            warn!(
                token_endpoint = %token_endpoint,
                status = status.as_u16(),
                oauth_error = ?outcome.data.get("error").and_then(|v| v.as_str()),
                raw_body = outcome.is_raw(),
                "Token endpoint rejected the exchange"
            );
        }

        Ok(outcome)
    }

    fn transport_error(&self, token_endpoint: &str, e: reqwest::Error) -> ExchangeError {
        if e.is_timeout() {
            // The server may have redeemed the code before we gave up
            error!(
                token_endpoint = %token_endpoint,
                timeout_ms = self.timeout.as_millis() as u64,
                "Token exchange timed out; authorization code state is unknown"
            );
            ExchangeError::Timeout {
                timeout: self.timeout,
            }
        } else {
            error!(token_endpoint = %token_endpoint, error = %e, "Token exchange failed");
            ExchangeError::Network(e)
        }
    }
}

impl std::fmt::Debug for TokenExchanger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchanger")
            .field("http_client", &"<reqwest::Client>")
            .field("timeout", &self.timeout)
            .finish()
    }
}
