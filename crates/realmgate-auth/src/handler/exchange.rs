//! Pass-through exchange handler

use std::sync::Arc;

use http::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{error, info, warn};

use super::{HandlerResponse, OAuthContext, present};
use crate::error::{Error, Result};
use crate::exchange::{ExchangeOutcome, ExchangeRequest};

/// Body of `POST /oauth/exchange`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExchangeHandlerRequest {
    /// Authorization code from the redirect
    #[serde(default)]
    pub code: Option<String>,
    /// CSRF correlation value, echoed back untouched
    #[serde(default)]
    pub state: Option<String>,
}

/// Exchanges a code and forwards the upstream answer as-is.
///
/// Upstream failures are still a 200: the upstream status and body are
/// embedded in the response for the caller to branch on. The ID token is not
/// verified here.
#[derive(Debug, Clone)]
pub struct ExchangeHandler {
    context: Arc<OAuthContext>,
}

impl ExchangeHandler {
    /// Create a handler over shared dependencies.
    pub fn new(context: Arc<OAuthContext>) -> Self {
        Self { context }
    }

    /// Handle one request. Performs at most one outbound call.
    pub async fn handle(&self, request: ExchangeHandlerRequest) -> HandlerResponse {
        let Some(code) = present(request.code.as_deref()) else {
            warn!(endpoint = "exchange", "Rejected request without an authorization code");
            return HandlerResponse::missing_code();
        };

        match self.exchange(code, request.state.clone()).await {
            Ok(outcome) => {
                info!(
                    endpoint = "exchange",
                    upstream_status = outcome.status.as_u16(),
                    "Forwarding token endpoint answer"
                );
                let mut body = Map::new();
                body.insert("state".into(), json!(request.state));
                body.insert("status".into(), json!(outcome.status.as_u16()));
                body.insert("data".into(), outcome.data);
                HandlerResponse::new(StatusCode::OK, Value::Object(body))
            }
            Err(e) => internal_failure(&e),
        }
    }

    async fn exchange(&self, code: &str, state: Option<String>) -> Result<ExchangeOutcome> {
        let config = self.context.config.resolve()?;
        let request = ExchangeRequest::new(code, config.redirect_uri.as_str()).with_state(state);
        let outcome = self
            .context
            .exchanger
            .exchange_code(&request, &config.credentials, &config.token_endpoint)
            .await?;
        Ok(outcome)
    }
}

fn internal_failure(err: &Error) -> HandlerResponse {
    let mut body = json!({
        "error": "exchange_failed",
        "message": err.public_message(),
    });
    if let Error::Exchange(e) = err {
        body["kind"] = json!(e.kind().as_str());
        error!(endpoint = "exchange", kind = %e.kind(), error = %e, "Code exchange failed");
    } else {
        error!(endpoint = "exchange", error = %err, "Code exchange failed");
    }
    HandlerResponse::new(StatusCode::INTERNAL_SERVER_ERROR, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigResolver;
    use crate::exchange::TokenExchanger;
    use crate::jwt::JwksCache;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handler(config: ConfigResolver) -> ExchangeHandler {
        ExchangeHandler::new(Arc::new(OAuthContext::new(
            config,
            TokenExchanger::new().unwrap(),
            Arc::new(JwksCache::new().unwrap()),
        )))
    }

    #[tokio::test]
    async fn test_missing_code_short_circuits() {
        let lookups = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&lookups);
        let handler = handler(ConfigResolver::with_source(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        }));

        for code in [None, Some(String::new()), Some("   ".to_string())] {
            let response = handler
                .handle(ExchangeHandlerRequest {
                    code,
                    state: Some("xyz".into()),
                })
                .await;
            assert_eq!(response.status, StatusCode::BAD_REQUEST);
            assert_eq!(response.body, json!({"error": "missing_code"}));
        }
        // Input is validated before configuration is even consulted
        assert_eq!(lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_configuration_is_500() {
        let handler = handler(ConfigResolver::with_source(|_| None));
        let response = handler
            .handle(ExchangeHandlerRequest {
                code: Some("abc".into()),
                state: None,
            })
            .await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body["error"], "exchange_failed");
        assert!(response.body.get("kind").is_none());
    }
}
