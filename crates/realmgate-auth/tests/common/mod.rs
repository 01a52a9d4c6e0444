//! Shared fixtures for integration tests
//!
//! A wiremock authorization server (token endpoint + JWKS), fixed RSA keys,
//! and helpers to sign ID tokens with them.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use realmgate_auth::config::{
    ENV_CLIENT_ID, ENV_CLIENT_SECRET, ENV_ISSUER, ENV_JWKS_URL, ENV_REDIRECT_URI,
};
use realmgate_auth::{ConfigResolver, JwksCache, OAuthContext, TokenExchanger};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLIENT_ID: &str = "admin-console";
pub const CLIENT_SECRET: &str = "kT9-very-secret-client-value";
pub const REDIRECT_URI: &str = "https://admin.example.com/oauth/callback";

pub const SIGNING_KID: &str = "realm-key-1";
pub const SIGNING_KEY_PEM: &str = include_str!("../fixtures/signing_key.pem");
pub const ROGUE_KEY_PEM: &str = include_str!("../fixtures/rogue_key.pem");
const SIGNING_JWK: &str = include_str!("../fixtures/signing_key.jwk.json");
const ROGUE_JWK: &str = include_str!("../fixtures/rogue_key.jwk.json");

pub const TOKEN_PATH: &str = "/oauth2/token";
pub const JWKS_PATH: &str = "/jwks";

/// Mock authorization server
pub struct MockAuthorizationServer {
    pub server: MockServer,
    pub issuer: String,
    pub token_endpoint: String,
    pub jwks_url: String,
}

impl MockAuthorizationServer {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let issuer = server.uri();
        Self {
            token_endpoint: format!("{issuer}{TOKEN_PATH}"),
            jwks_url: format!("{issuer}{JWKS_PATH}"),
            issuer,
            server,
        }
    }

    /// Token endpoint answers `status` with a JSON body
    pub async fn mock_token_response(&self, status: u16, body: Value) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Token endpoint answers `status` with a non-JSON body
    pub async fn mock_token_text(&self, status: u16, body: &str) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    /// Token endpoint returns `id_token` alongside an access token
    pub async fn mock_token_success(&self, id_token: &str) {
        self.mock_token_response(200, token_body(id_token)).await;
    }

    /// JWKS endpoint publishes `keys`
    pub async fn mock_jwks(&self, keys: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .mount(&self.server)
            .await;
    }

    /// Configuration pointing at this server
    pub fn config_values(&self) -> HashMap<String, String> {
        HashMap::from([
            (ENV_ISSUER.to_string(), self.issuer.clone()),
            (ENV_JWKS_URL.to_string(), self.jwks_url.clone()),
            (ENV_CLIENT_ID.to_string(), CLIENT_ID.to_string()),
            (ENV_CLIENT_SECRET.to_string(), CLIENT_SECRET.to_string()),
            (ENV_REDIRECT_URI.to_string(), REDIRECT_URI.to_string()),
        ])
    }

    /// Handler dependencies pointing at this server
    pub fn context(&self) -> Arc<OAuthContext> {
        Arc::new(self.base_context())
    }

    /// Handler dependencies with a custom clock skew tolerance
    pub fn context_with_leeway(&self, leeway: Duration) -> Arc<OAuthContext> {
        Arc::new(self.base_context().with_leeway(leeway))
    }

    fn base_context(&self) -> OAuthContext {
        OAuthContext::new(
            ConfigResolver::from_map(self.config_values()),
            TokenExchanger::with_timeout(Duration::from_secs(5)).expect("http client"),
            Arc::new(JwksCache::with_timeout(Duration::from_secs(5)).expect("http client")),
        )
    }

    /// Requests received on `request_path`
    pub async fn requests_to(&self, request_path: &str) -> Vec<wiremock::Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == request_path)
            .collect()
    }
}

pub fn token_body(id_token: &str) -> Value {
    json!({
        "access_token": "at-opaque-123",
        "token_type": "Bearer",
        "expires_in": 300,
        "id_token": id_token,
    })
}

pub fn signing_jwk() -> Value {
    serde_json::from_str(SIGNING_JWK).expect("signing jwk fixture")
}

/// The rogue public key, published under `kid`
pub fn rogue_jwk(kid: &str) -> Value {
    let mut jwk: Value = serde_json::from_str(ROGUE_JWK).expect("rogue jwk fixture");
    jwk["kid"] = json!(kid);
    jwk
}

/// `Authorization` header value the token endpoint must receive
pub fn expected_basic_header() -> String {
    format!("Basic {}", STANDARD.encode(format!("{CLIENT_ID}:{CLIENT_SECRET}")))
}

pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs() as i64
}

/// Standard ID token claims expiring `exp_offset_secs` from now
pub fn id_token_claims(issuer: &str, exp_offset_secs: i64) -> Value {
    json!({
        "iss": issuer,
        "sub": "user-7f3a",
        "aud": CLIENT_ID,
        "exp": now() + exp_offset_secs,
        "iat": now(),
        "email": "ops-admin@example.com",
        "realm_access": { "roles": ["realm-admin"] },
    })
}

/// Sign `claims` with RS256 under the given PEM key and `kid`
pub fn sign(claims: &Value, private_key_pem: &str, kid: Option<&str>) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.typ = Some("JWT".to_string());
    header.kid = kid.map(str::to_string);
    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes()).expect("RSA fixture key");
    encode(&header, claims, &key).expect("sign test token")
}

/// Whether `text` contains the client secret in plaintext or base64
pub fn leaks_secret(text: &str) -> bool {
    let encoded_pair = STANDARD.encode(format!("{CLIENT_ID}:{CLIENT_SECRET}"));
    let encoded_secret = STANDARD.encode(CLIENT_SECRET);
    text.contains(CLIENT_SECRET) || text.contains(&encoded_pair) || text.contains(&encoded_secret)
}
