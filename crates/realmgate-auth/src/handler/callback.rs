//! Verified callback handler

use std::sync::Arc;

use http::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use super::{HandlerResponse, OAuthContext, present};
use crate::error::{Error, Result};
use crate::exchange::{ExchangeError, ExchangeErrorKind, ExchangeRequest};
use crate::jwt::{ClaimExpectations, IdTokenVerifier, VerificationCheck, VerifiedIdToken};

/// Body of `POST /oauth/callback`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackRequest {
    /// Authorization code from the redirect
    #[serde(default)]
    pub code: Option<String>,
    /// Redirect URI used in the authorization request; the configured one
    /// when absent
    #[serde(default, alias = "redirectUri")]
    pub redirect_uri: Option<String>,
}

/// Exchanges a code and answers with ID token claims only after they verify.
#[derive(Debug, Clone)]
pub struct CallbackHandler {
    context: Arc<OAuthContext>,
}

impl CallbackHandler {
    /// Create a handler over shared dependencies.
    pub fn new(context: Arc<OAuthContext>) -> Self {
        Self { context }
    }

    /// Handle one request. Performs one token exchange and, when the key set
    /// is cold or missing the token's `kid`, one JWKS fetch.
    pub async fn handle(&self, request: CallbackRequest) -> HandlerResponse {
        let Some(code) = present(request.code.as_deref()) else {
            warn!(endpoint = "callback", "Rejected request without an authorization code");
            return HandlerResponse::missing_code();
        };

        match self.verify_login(code, request.redirect_uri.as_deref()).await {
            Ok(verified) => {
                info!(
                    endpoint = "callback",
                    subject = ?verified.claims.subject(),
                    kid = ?verified.header.kid,
                    "Login verified"
                );
                HandlerResponse::new(
                    StatusCode::OK,
                    json!({
                        "ok": true,
                        "header": verified.header,
                        "claims": verified.claims,
                    }),
                )
            }
            Err(e) => failure_response(&e),
        }
    }

    async fn verify_login(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<VerifiedIdToken> {
        let config = self.context.config.resolve()?;
        let redirect_uri = redirect_uri
            .map(str::trim)
            .filter(|uri| !uri.is_empty())
            .unwrap_or(config.redirect_uri.as_str());

        let request = ExchangeRequest::new(code, redirect_uri);
        let (id_token, _) = self
            .context
            .exchanger
            .exchange_code(&request, &config.credentials, &config.token_endpoint)
            .await?
            .into_id_token_response()?;

        let verifier = IdTokenVerifier::new(
            Arc::clone(&self.context.jwks),
            config.jwks_url.as_str(),
            ClaimExpectations::new(config.issuer.as_str(), config.credentials.client_id())
                .with_leeway(self.context.leeway),
        );
        Ok(verifier.verify(&id_token).await?)
    }
}

fn failure_response(err: &Error) -> HandlerResponse {
    match err {
        Error::Configuration(e) => {
            error!(endpoint = "callback", error = %e, "Login failed: configuration");
            HandlerResponse::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "exchange_failed", "message": err.public_message() }),
            )
        }
        Error::Exchange(e) => exchange_failure(e),
        Error::KeyResolution(e) => {
            error!(endpoint = "callback", error = %e, "Login failed: signing keys unavailable");
            invalid_id_token(StatusCode::BAD_GATEWAY, VerificationCheck::KeyResolution, err)
        }
        Error::Verification(e) => {
            let check = e.check();
            warn!(
                endpoint = "callback",
                check = %check,
                error = %e,
                "Login failed: ID token rejected"
            );
            invalid_id_token(StatusCode::UNAUTHORIZED, check, err)
        }
    }
}

fn exchange_failure(e: &ExchangeError) -> HandlerResponse {
    warn!(
        endpoint = "callback",
        kind = %e.kind(),
        upstream_status = ?e.upstream_status().map(|s| s.as_u16()),
        oauth_error = ?e.oauth_error(),
        "Login failed: code exchange"
    );
    match e {
        ExchangeError::Rejected { status, data } => HandlerResponse::new(
            StatusCode::BAD_REQUEST,
            json!({
                "error": "token_exchange_failed",
                "status": status.as_u16(),
                "data": data,
            }),
        ),
        ExchangeError::MissingIdToken { data } => HandlerResponse::new(
            StatusCode::BAD_REQUEST,
            json!({ "error": "missing_id_token", "data": data }),
        ),
        ExchangeError::Timeout { .. } | ExchangeError::Network(_) => {
            let status = if e.kind() == ExchangeErrorKind::Timeout {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            };
            HandlerResponse::new(
                status,
                json!({
                    "error": "exchange_failed",
                    "kind": e.kind().as_str(),
                    "message": e.public_message(),
                }),
            )
        }
    }
}

fn invalid_id_token(status: StatusCode, check: VerificationCheck, err: &Error) -> HandlerResponse {
    HandlerResponse::new(
        status,
        json!({
            "error": "invalid_id_token",
            "reason": check.as_str(),
            "message": err.public_message(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::{KeyResolutionError, VerificationError};
    use http::StatusCode;
    use std::time::Duration;

    #[test]
    fn test_rejected_exchange_shape() {
        let response = failure_response(&Error::Exchange(ExchangeError::Rejected {
            status: StatusCode::BAD_REQUEST,
            data: json!({"error": "invalid_grant"}),
        }));
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            response.body,
            json!({
                "error": "token_exchange_failed",
                "status": 400,
                "data": {"error": "invalid_grant"},
            })
        );
    }

    #[test]
    fn test_timeout_is_gateway_timeout() {
        let response = failure_response(&Error::Exchange(ExchangeError::Timeout {
            timeout: Duration::from_secs(10),
        }));
        assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(response.body["kind"], "timeout");
    }

    #[test]
    fn test_verification_reason_is_reported() {
        let response = failure_response(&Error::Verification(VerificationError::Expired));
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.body["error"], "invalid_id_token");
        assert_eq!(response.body["reason"], "expiry");
    }

    #[test]
    fn test_key_resolution_is_bad_gateway() {
        let err: Error = VerificationError::KeyResolution(KeyResolutionError::Timeout {
            url: "https://id.example.com/jwks".into(),
        })
        .into();
        let response = failure_response(&err);
        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
        assert_eq!(response.body["error"], "invalid_id_token");
        assert_eq!(response.body["reason"], "key_resolution");
    }

    #[test]
    fn test_redirect_uri_alias() {
        let request: CallbackRequest =
            serde_json::from_str(r#"{"code":"c","redirectUri":"https://app/cb"}"#).unwrap();
        assert_eq!(request.redirect_uri.as_deref(), Some("https://app/cb"));
    }
}
