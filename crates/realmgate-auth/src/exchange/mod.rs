//! Authorization code exchange
//!
//! A single `authorization_code` grant against the token endpoint,
//! authenticated as a confidential client with HTTP Basic. The exchange is
//! never retried: a code is single-use, and repeating a request whose first
//! attempt may have reached the server can burn a code the caller could
//! still have used.
//!
//! ## Submodules
//!
//! - `client` - [`TokenExchanger`], the HTTP call itself
//! - `types` - [`ExchangeRequest`], [`ExchangeOutcome`], [`TokenResponse`]
//! - `error` - [`ExchangeError`] and its [`ExchangeErrorKind`]

pub mod client;
pub mod error;
pub mod types;

pub use client::TokenExchanger;
pub use error::{ExchangeError, ExchangeErrorKind};
pub use types::{ExchangeOutcome, ExchangeRequest, TokenResponse};
