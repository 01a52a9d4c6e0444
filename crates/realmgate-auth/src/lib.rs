//! # realmgate-auth
//!
//! Server-side half of the admin dashboard's OAuth 2.0 login: trades an
//! authorization code for tokens as a confidential client, then verifies the
//! returned ID token against the authorization server's published keys.
//! The client secret never leaves this process.
//!
//! ## Architecture
//!
//! - [`config`] - Config Resolver: issuer, JWKS URL and client credentials
//!   from the environment, fail-fast on anything missing
//! - [`exchange`] - Token Exchanger: one `authorization_code` POST with HTTP
//!   Basic client authentication, no retries
//! - [`jwt`] - JWKS Key Resolver ([`jwt::JwksCache`]) and ID Token Verifier
//!   ([`jwt::IdTokenVerifier`])
//! - [`handler`] - the two request handler types: [`handler::ExchangeHandler`]
//!   (raw pass-through) and [`handler::CallbackHandler`] (verified claims)
//! - [`error`] - umbrella [`Error`] over the per-component error enums
//!
//! ## Request lifecycle
//!
//! ```text
//! Received → Validating input → Exchanging → (Exchanged | ExchangeFailed)
//!          → [Verifying → (Verified | VerificationFailed)] → Responding
//! ```
//!
//! Each inbound request maps to exactly one exchange attempt. The only state
//! shared between requests is the JWKS cache.

pub mod config;
pub mod error;
pub mod exchange;
pub mod handler;
pub mod jwt;

#[doc(inline)]
pub use config::{ClientCredentials, ConfigResolver, ConfigurationError, OAuthConfig};

#[doc(inline)]
pub use error::{Error, Result};

#[doc(inline)]
pub use exchange::{
    ExchangeError, ExchangeErrorKind, ExchangeOutcome, ExchangeRequest, TokenExchanger,
    TokenResponse,
};

#[doc(inline)]
pub use jwt::{
    ClaimExpectations, IdTokenVerifier, JwksCache, KeyResolutionError, VerificationCheck,
    VerificationError, VerifiedClaims, VerifiedIdToken,
};

#[doc(inline)]
pub use handler::{
    CallbackHandler, CallbackRequest, ExchangeHandler, ExchangeHandlerRequest, HandlerResponse,
    OAuthContext,
};
