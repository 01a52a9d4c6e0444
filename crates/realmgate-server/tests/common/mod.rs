//! Shared fixtures: mock authorization server, signing keys, app builder

#![allow(dead_code)]

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::Router;
use axum::body::Body;
use http::{Request, StatusCode};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use realmgate_auth::ConfigResolver;
use realmgate_auth::config::{
    ENV_CLIENT_ID, ENV_CLIENT_SECRET, ENV_ISSUER, ENV_JWKS_URL, ENV_REDIRECT_URI,
};
use realmgate_server::{AppState, ServerSettings, oauth_context, router};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLIENT_ID: &str = "admin-console";
pub const CLIENT_SECRET: &str = "Zq4-server-side-only-secret";
pub const REDIRECT_URI: &str = "https://admin.example.com/oauth/callback";
pub const SIGNING_KID: &str = "realm-key-1";

pub const SIGNING_KEY_PEM: &str =
    include_str!("../../../realmgate-auth/tests/fixtures/signing_key.pem");
pub const ROGUE_KEY_PEM: &str =
    include_str!("../../../realmgate-auth/tests/fixtures/rogue_key.pem");
const SIGNING_JWK: &str =
    include_str!("../../../realmgate-auth/tests/fixtures/signing_key.jwk.json");

pub const TOKEN_PATH: &str = "/oauth2/token";
pub const JWKS_PATH: &str = "/jwks";

/// Mock authorization server
pub struct MockIdp {
    pub server: MockServer,
}

impl MockIdp {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    pub async fn mock_token(&self, status: u16, body: Value) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_jwks(&self) {
        let jwk: Value = serde_json::from_str(SIGNING_JWK).expect("jwk fixture");
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [jwk] })))
            .mount(&self.server)
            .await;
    }

    pub async fn received_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map_or(0, |requests| requests.len())
    }

    /// The application router, configured against this server
    pub fn app(&self) -> Router {
        self.app_with_settings(&test_settings())
    }

    pub fn app_with_settings(&self, settings: &ServerSettings) -> Router {
        let issuer = self.issuer();
        let values = HashMap::from([
            (ENV_ISSUER.to_string(), issuer.clone()),
            (ENV_JWKS_URL.to_string(), format!("{issuer}{JWKS_PATH}")),
            (ENV_CLIENT_ID.to_string(), CLIENT_ID.to_string()),
            (ENV_CLIENT_SECRET.to_string(), CLIENT_SECRET.to_string()),
            (ENV_REDIRECT_URI.to_string(), REDIRECT_URI.to_string()),
        ]);
        build_app(ConfigResolver::from_map(values), settings)
    }
}

pub fn test_settings() -> ServerSettings {
    ServerSettings {
        request_timeout_secs: 5,
        ..ServerSettings::default()
    }
}

pub fn app_with(resolver: ConfigResolver) -> Router {
    build_app(resolver, &test_settings())
}

fn build_app(resolver: ConfigResolver, settings: &ServerSettings) -> Router {
    let context = oauth_context(settings, resolver).expect("oauth context");
    router(AppState::new(context), settings)
}

/// Send one request through the router, returning status and JSON body
pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("JSON response body")
    };
    (status, body)
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs() as i64
}

pub fn id_token(issuer: &str, exp_offset_secs: i64, key_pem: &str) -> String {
    let claims = json!({
        "iss": issuer,
        "sub": "user-91c2",
        "aud": CLIENT_ID,
        "exp": now() + exp_offset_secs,
        "iat": now(),
        "preferred_username": "ops-admin",
    });
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(SIGNING_KID.to_string());
    encode(
        &header,
        &claims,
        &EncodingKey::from_rsa_pem(key_pem.as_bytes()).expect("RSA fixture"),
    )
    .expect("sign")
}
