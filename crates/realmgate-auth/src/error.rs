//! Crate-wide error type

use crate::config::ConfigurationError;
use crate::exchange::ExchangeError;
use crate::jwt::{KeyResolutionError, VerificationError};

/// Any failure of the login flow.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Deployment configuration is missing or invalid
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Token endpoint rejected the exchange or could not be reached
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// Published keys could not be fetched
    #[error(transparent)]
    KeyResolution(#[from] KeyResolutionError),

    /// ID token failed a check
    #[error(transparent)]
    Verification(VerificationError),
}

impl From<VerificationError> for Error {
    /// Key fetch failures surface as [`Error::KeyResolution`], not as a
    /// rejected token.
    fn from(err: VerificationError) -> Self {
        match err {
            VerificationError::KeyResolution(inner) => Self::KeyResolution(inner),
            other => Self::Verification(other),
        }
    }
}

impl Error {
    /// Text safe to hand to a browser.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "the login service is not configured",
            Self::Exchange(e) => e.public_message(),
            Self::KeyResolution(_) => "the authorization server's signing keys are unavailable",
            Self::Verification(e) => e.public_message(),
        }
    }
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
