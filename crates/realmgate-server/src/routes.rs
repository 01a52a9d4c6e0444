//! HTTP routes
//!
//! - `POST /oauth/exchange` - raw pass-through exchange
//! - `POST /oauth/callback` - exchange plus ID token verification
//! - `GET /healthz` - liveness
//!
//! Handlers translate a [`HandlerResponse`] into an HTTP response verbatim;
//! all response shaping happens in `realmgate_auth::handler`. A request that
//! outlives its deadline is answered with 408 `{"error":"request_timeout"}`.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderValue, Method, StatusCode};
use realmgate_auth::{
    CallbackHandler, CallbackRequest, ExchangeHandler, ExchangeHandlerRequest, HandlerResponse,
    OAuthContext,
};
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::ServerSettings;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 16 * 1024;

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    exchange: ExchangeHandler,
    callback: CallbackHandler,
    deadline: Duration,
}

impl AppState {
    /// Build both handlers over one context.
    pub fn new(context: Arc<OAuthContext>) -> Self {
        Self {
            exchange: ExchangeHandler::new(Arc::clone(&context)),
            callback: CallbackHandler::new(context),
            deadline: ServerSettings::default().handler_timeout(),
        }
    }
}

/// The application router with its middleware stack.
pub fn router(mut state: AppState, settings: &ServerSettings) -> Router {
    state.deadline = settings.handler_timeout();
    let mut router = Router::new()
        .route("/oauth/exchange", post(exchange))
        .route("/oauth/callback", post(callback))
        .route("/healthz", get(healthz))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http());

    if let Some(cors) = cors_layer(&settings.cors_allowed_origins) {
        router = router.layer(cors);
    }
    router
}

async fn exchange(
    State(state): State<AppState>,
    body: Result<Json<ExchangeHandlerRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(request)) => {
            within("exchange", state.deadline, state.exchange.handle(request)).await
        }
        Err(rejection) => invalid_body("exchange", &rejection),
    }
}

async fn callback(
    State(state): State<AppState>,
    body: Result<Json<CallbackRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(request)) => {
            within("callback", state.deadline, state.callback.handle(request)).await
        }
        Err(rejection) => invalid_body("callback", &rejection),
    }
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn within<F>(endpoint: &'static str, deadline: Duration, handling: F) -> Response
where
    F: Future<Output = HandlerResponse>,
{
    match tokio::time::timeout(deadline, handling).await {
        Ok(response) => respond(response),
        Err(_) => {
            warn!(
                endpoint,
                deadline_ms = deadline.as_millis() as u64,
                "Request exceeded its deadline"
            );
            (
                StatusCode::REQUEST_TIMEOUT,
                Json(json!({ "error": "request_timeout" })),
            )
                .into_response()
        }
    }
}

fn respond(response: HandlerResponse) -> Response {
    let (status, body) = response.into_parts();
    (status, Json(body)).into_response()
}

fn invalid_body(endpoint: &'static str, rejection: &JsonRejection) -> Response {
    warn!(endpoint, reason = %rejection.body_text(), "Rejected unreadable request body");
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "invalid_body" })),
    )
        .into_response()
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }

    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let allowed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring unparseable CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(allowed)
    };

    let layer = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .max_age(Duration::from_secs(3600));

    Some(if origins.iter().any(|o| o == "*") {
        layer.allow_headers(Any)
    } else {
        layer.allow_headers([CONTENT_TYPE, ACCEPT])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_overrun_request_gets_json_timeout_body() {
        let stalled = std::future::pending::<HandlerResponse>();
        let response = within("callback", Duration::from_millis(20), stalled).await;

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            HeaderValue::from_static("application/json")
        );
        assert_eq!(json_body(response).await, json!({ "error": "request_timeout" }));
    }

    #[tokio::test]
    async fn test_response_within_deadline_passes_through() {
        let ready = async { HandlerResponse::new(StatusCode::CREATED, json!({ "ok": true })) };
        let response = within("exchange", Duration::from_secs(5), ready).await;

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(json_body(response).await, json!({ "ok": true }));
    }

    #[test]
    fn test_no_origins_means_no_cors_layer() {
        assert!(cors_layer(&[]).is_none());
        assert!(cors_layer(&["https://admin.example.com".to_string()]).is_some());
        assert!(cors_layer(&["*".to_string()]).is_some());
    }
}
