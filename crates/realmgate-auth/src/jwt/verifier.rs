//! ID token verification
//!
//! Checks, in order:
//! - compact JWT structure and header
//! - algorithm is asymmetric, allow-listed, and matches the key's family
//! - signature against the published key named by `kid`
//! - `iss` equals the configured issuer exactly
//! - `aud` contains the configured client id
//! - `exp` is in the future, `nbf`/`iat` are not in the future
//!
//! Every failure names the check that failed. Claims are returned untouched
//! only after all checks pass.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk};
use jsonwebtoken::{Algorithm, DecodingKey, Header, TokenData, Validation, decode, decode_header};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::jwks::{JwksCache, KeyResolutionError, KeySet};

/// Clock skew tolerated on `exp`, `nbf` and `iat`.
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(60);

/// Asymmetric algorithms accepted for ID tokens. `HS*` and `none` never are.
pub const ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Which check rejected a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationCheck {
    /// Not a well-formed compact JWT
    Format,
    /// Algorithm absent, symmetric, not allow-listed, or wrong for the key
    Algorithm,
    /// Published keys could not be fetched
    KeyResolution,
    /// No published key verifies the signature
    Signature,
    /// `iss` mismatch or missing
    Issuer,
    /// `aud` mismatch or missing
    Audience,
    /// `exp` in the past or missing
    Expiry,
    /// `nbf` or `iat` in the future
    NotBefore,
}

impl VerificationCheck {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Format => "format",
            Self::Algorithm => "algorithm",
            Self::KeyResolution => "key_resolution",
            Self::Signature => "signature",
            Self::Issuer => "issuer",
            Self::Audience => "audience",
            Self::Expiry => "expiry",
            Self::NotBefore => "not_before",
        }
    }
}

impl fmt::Display for VerificationCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ID token failed verification.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// Structure, encoding or JSON problem
    #[error("malformed ID token: {0}")]
    Malformed(String),

    /// Header algorithm is not accepted
    #[error("algorithm {0} is not accepted for ID tokens")]
    UnsupportedAlgorithm(String),

    /// Header algorithm does not fit the key type
    #[error("key '{kid}' cannot verify {algorithm} signatures")]
    KeyAlgorithmMismatch {
        /// Key id, or `<none>`
        kid: String,
        /// Header algorithm
        algorithm: String,
    },

    /// `kid` not in the published set, even after a refresh
    #[error("no published signing key matches kid '{kid}'")]
    UnknownKey {
        /// Requested key id
        kid: String,
    },

    /// No `kid` in the header and no single key to fall back on
    #[error("token has no kid and the key set does not hold exactly one signing key")]
    AmbiguousKey,

    /// The published key cannot be turned into a verification key
    #[error("published key is unusable: {0}")]
    UnusableKey(String),

    /// Published keys could not be fetched
    #[error(transparent)]
    KeyResolution(#[from] KeyResolutionError),

    /// Signature does not verify
    #[error("ID token signature is invalid")]
    InvalidSignature,

    /// `iss` differs from the configured issuer
    #[error("ID token issuer does not match the configured issuer")]
    InvalidIssuer,

    /// `aud` does not contain the client id
    #[error("ID token audience does not include this client")]
    InvalidAudience,

    /// `exp` has passed
    #[error("ID token has expired")]
    Expired,

    /// `nbf` or `iat` lies in the future
    #[error("ID token is not yet valid")]
    NotYetValid,

    /// A required claim is absent
    #[error("ID token is missing the required '{0}' claim")]
    MissingClaim(String),
}

impl VerificationError {
    /// The check that failed.
    pub fn check(&self) -> VerificationCheck {
        match self {
            Self::Malformed(_) => VerificationCheck::Format,
            Self::UnsupportedAlgorithm(_) | Self::KeyAlgorithmMismatch { .. } => {
                VerificationCheck::Algorithm
            }
            Self::UnknownKey { .. }
            | Self::AmbiguousKey
            | Self::UnusableKey(_)
            | Self::InvalidSignature => VerificationCheck::Signature,
            Self::KeyResolution(_) => VerificationCheck::KeyResolution,
            Self::InvalidIssuer => VerificationCheck::Issuer,
            Self::InvalidAudience => VerificationCheck::Audience,
            Self::Expired => VerificationCheck::Expiry,
            Self::NotYetValid => VerificationCheck::NotBefore,
            Self::MissingClaim(claim) => match claim.as_str() {
                "iss" => VerificationCheck::Issuer,
                "aud" => VerificationCheck::Audience,
                "exp" => VerificationCheck::Expiry,
                _ => VerificationCheck::Format,
            },
        }
    }

    /// Text safe to hand to a browser.
    pub fn public_message(&self) -> &'static str {
        match self.check() {
            VerificationCheck::Format => "the ID token is malformed",
            VerificationCheck::Algorithm => "the ID token uses an unacceptable signing algorithm",
            VerificationCheck::KeyResolution => {
                "the authorization server's signing keys are unavailable"
            }
            VerificationCheck::Signature => "the ID token signature could not be verified",
            VerificationCheck::Issuer => "the ID token was issued by an unexpected issuer",
            VerificationCheck::Audience => "the ID token was not issued for this application",
            VerificationCheck::Expiry => "the ID token has expired",
            VerificationCheck::NotBefore => "the ID token is not yet valid",
        }
    }

    fn from_jwt(error: &jsonwebtoken::errors::Error) -> Self {
        match error.kind() {
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => Self::Malformed(error.to_string()),
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAlgorithm | ErrorKind::MissingAlgorithm => {
                Self::UnsupportedAlgorithm(error.to_string())
            }
            ErrorKind::InvalidIssuer => Self::InvalidIssuer,
            ErrorKind::InvalidAudience => Self::InvalidAudience,
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::ImmatureSignature => Self::NotYetValid,
            ErrorKind::MissingRequiredClaim(claim) => Self::MissingClaim(claim.clone()),
            _ => Self::UnusableKey(error.to_string()),
        }
    }
}

/// What the claims must say.
#[derive(Debug, Clone)]
pub struct ClaimExpectations {
    /// Exact expected `iss`
    pub issuer: String,
    /// Value `aud` must contain (the client id)
    pub audience: String,
    /// Clock skew tolerance
    pub leeway: Duration,
}

impl ClaimExpectations {
    /// Expect `issuer` and `audience` with the default leeway.
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            leeway: DEFAULT_LEEWAY,
        }
    }

    /// Override the clock skew tolerance.
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }
}

/// Decoded payload of a token that passed every check.
///
/// Only this module can construct one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct VerifiedClaims(Map<String, Value>);

impl VerifiedClaims {
    /// A claim by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// The `sub` claim.
    pub fn subject(&self) -> Option<&str> {
        self.0.get("sub").and_then(Value::as_str)
    }

    /// All claims.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// All claims, by value.
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// A verified ID token: its header and claims.
#[derive(Debug, Clone)]
pub struct VerifiedIdToken {
    /// JOSE header as sent
    pub header: Header,
    /// Verified claim set
    pub claims: VerifiedClaims,
}

/// Verifies ID tokens against keys from a shared [`JwksCache`].
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use realmgate_auth::jwt::{ClaimExpectations, IdTokenVerifier, JwksCache};
/// # tokio_test::block_on(async {
/// let cache = Arc::new(JwksCache::new()?);
/// let verifier = IdTokenVerifier::new(
///     cache,
///     "https://id.example.com/.well-known/jwks.json",
///     ClaimExpectations::new("https://id.example.com", "admin-console"),
/// );
///
/// let verified = verifier.verify("eyJhbGciOi...").await?;
/// println!("signed in: {:?}", verified.claims.subject());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct IdTokenVerifier {
    jwks: Arc<JwksCache>,
    jwks_url: String,
    expectations: ClaimExpectations,
    allowed_algorithms: Vec<Algorithm>,
}

impl IdTokenVerifier {
    /// Create a verifier for tokens signed by keys published at `jwks_url`.
    pub fn new(
        jwks: Arc<JwksCache>,
        jwks_url: impl Into<String>,
        expectations: ClaimExpectations,
    ) -> Self {
        Self {
            jwks,
            jwks_url: jwks_url.into(),
            expectations,
            allowed_algorithms: ALLOWED_ALGORITHMS.to_vec(),
        }
    }

    /// Narrow the accepted algorithms.
    ///
    /// Anything outside [`ALLOWED_ALGORITHMS`] is ignored, so symmetric
    /// algorithms cannot be enabled this way.
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms
            .into_iter()
            .filter(|alg| ALLOWED_ALGORITHMS.contains(alg))
            .collect();
        self
    }

    /// The claim expectations in force.
    pub fn expectations(&self) -> &ClaimExpectations {
        &self.expectations
    }

    /// Verify `token`, resolving its key through the cache.
    ///
    /// # Errors
    ///
    /// Returns a [`VerificationError`] naming the failed check.
    pub async fn verify(&self, token: &str) -> Result<VerifiedIdToken, VerificationError> {
        let header = checked_header(token, &self.allowed_algorithms)?;

        let jwk = match header.kid.as_deref() {
            Some(kid) => self
                .jwks
                .get_key(&self.jwks_url, kid)
                .await?
                .ok_or_else(|| VerificationError::UnknownKey {
                    kid: kid.to_string(),
                })?,
            None => self
                .jwks
                .resolve_key_set(&self.jwks_url)
                .await?
                .sole_key()
                .cloned()
                .ok_or(VerificationError::AmbiguousKey)?,
        };

        let result = verify_with_jwk(token, header, &jwk, &self.expectations);
        match &result {
            Ok(verified) => debug!(
                issuer = %self.expectations.issuer,
                subject = ?verified.claims.subject(),
                kid = ?verified.header.kid,
                "ID token verified"
            ),
            Err(e) => warn!(check = %e.check(), error = %e, "ID token verification failed"),
        }
        result
    }
}

/// Verify `token` against an already resolved key set, without fetching.
///
/// # Errors
///
/// Returns a [`VerificationError`] naming the failed check.
pub fn verify_with_key_set(
    token: &str,
    key_set: &KeySet,
    expectations: &ClaimExpectations,
) -> Result<VerifiedIdToken, VerificationError> {
    let header = checked_header(token, ALLOWED_ALGORITHMS)?;
    let jwk = match header.kid.as_deref() {
        Some(kid) => key_set
            .find(kid)
            .ok_or_else(|| VerificationError::UnknownKey {
                kid: kid.to_string(),
            })?,
        None => key_set.sole_key().ok_or(VerificationError::AmbiguousKey)?,
    };
    verify_with_jwk(token, header, jwk, expectations)
}

fn checked_header(token: &str, allowed: &[Algorithm]) -> Result<Header, VerificationError> {
    let header = decode_header(token).map_err(|e| {
        debug!(error = %e, "Failed to decode JWT header");
        VerificationError::from_jwt(&e)
    })?;
    if !allowed.contains(&header.alg) {
        return Err(VerificationError::UnsupportedAlgorithm(format!(
            "{:?}",
            header.alg
        )));
    }
    Ok(header)
}

fn key_fits_algorithm(jwk: &Jwk, algorithm: Algorithm) -> bool {
    use Algorithm::{ES256, ES384, EdDSA, PS256, PS384, PS512, RS256, RS384, RS512};
    match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => {
            matches!(algorithm, RS256 | RS384 | RS512 | PS256 | PS384 | PS512)
        }
        AlgorithmParameters::EllipticCurve(_) => matches!(algorithm, ES256 | ES384),
        AlgorithmParameters::OctetKeyPair(_) => algorithm == EdDSA,
        _ => false,
    }
}

fn verify_with_jwk(
    token: &str,
    header: Header,
    jwk: &Jwk,
    expectations: &ClaimExpectations,
) -> Result<VerifiedIdToken, VerificationError> {
    if !key_fits_algorithm(jwk, header.alg) {
        return Err(VerificationError::KeyAlgorithmMismatch {
            kid: jwk
                .common
                .key_id
                .clone()
                .unwrap_or_else(|| "<none>".to_string()),
            algorithm: format!("{:?}", header.alg),
        });
    }

    let key =
        DecodingKey::from_jwk(jwk).map_err(|e| VerificationError::UnusableKey(e.to_string()))?;

    let mut validation = Validation::new(header.alg);
    validation.set_issuer(&[&expectations.issuer]);
    validation.set_audience(&[&expectations.audience]);
    validation.set_required_spec_claims(&["exp", "iss", "aud"]);
    validation.validate_nbf = true;
    validation.leeway = expectations.leeway.as_secs();

    let data: TokenData<Map<String, Value>> =
        decode(token, &key, &validation).map_err(|e| VerificationError::from_jwt(&e))?;

    if let Some(iat) = data.claims.get("iat").and_then(Value::as_f64) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        if iat > now + expectations.leeway.as_secs_f64() {
            return Err(VerificationError::NotYetValid);
        }
    }

    Ok(VerifiedIdToken {
        header,
        claims: VerifiedClaims(data.claims),
    })
}
