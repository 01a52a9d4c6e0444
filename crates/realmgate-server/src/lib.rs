//! # realmgate-server
//!
//! HTTP surface of the realmgate login backend: an axum router over the
//! handlers in [`realmgate_auth`], layered settings, and logging setup.
//!
//! ```rust,no_run
//! use realmgate_auth::ConfigResolver;
//! use realmgate_server::{AppState, ServerSettings, oauth_context, router};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let settings = ServerSettings::load(None)?;
//! let context = oauth_context(&settings, ConfigResolver::from_env())?;
//! let app = router(AppState::new(context), &settings);
//!
//! let listener = tokio::net::TcpListener::bind(settings.socket_addr()?).await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod routes;

use std::sync::Arc;

use anyhow::Context as _;
use realmgate_auth::{ConfigResolver, JwksCache, OAuthContext, TokenExchanger};

pub use config::{ServerSettings, SettingsError};
pub use routes::{AppState, router};

/// Build handler dependencies from server settings.
///
/// # Errors
///
/// Returns an error if an outbound HTTP client cannot be built.
pub fn oauth_context(
    settings: &ServerSettings,
    config: ConfigResolver,
) -> anyhow::Result<Arc<OAuthContext>> {
    let exchanger = TokenExchanger::with_timeout(settings.request_timeout())
        .context("failed to build token endpoint client")?;
    let jwks = JwksCache::with_timeout(settings.request_timeout())
        .context("failed to build JWKS client")?
        .with_min_refresh_interval(settings.jwks_min_refresh_interval());
    let context =
        OAuthContext::new(config, exchanger, Arc::new(jwks)).with_leeway(settings.leeway());
    Ok(Arc::new(context))
}
