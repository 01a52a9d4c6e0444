//! JWT infrastructure: published keys and ID token verification
//!
//! ```text
//! ┌──────────────────────┐      ┌──────────────────────┐
//! │   IdTokenVerifier    │─────▶│      JwksCache       │
//! │  alg / sig / claims  │ kid  │ per-URL key sets,    │
//! └──────────────────────┘      │ single-flight refresh│
//!                               └──────────────────────┘
//! ```
//!
//! The cache is an explicit dependency of the verifier, shared through an
//! `Arc`, never a global.

pub mod jwks;
pub mod verifier;

pub use jwks::{DEFAULT_JWKS_TIMEOUT, JwksCache, KeyResolutionError, KeySet};
pub use verifier::{
    ALLOWED_ALGORITHMS, ClaimExpectations, DEFAULT_LEEWAY, IdTokenVerifier, VerificationCheck,
    VerificationError, VerifiedClaims, VerifiedIdToken, verify_with_key_set,
};
