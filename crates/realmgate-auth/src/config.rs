//! OAuth client configuration
//!
//! Endpoint and credential parameters are read once from the process
//! environment (or an injected lookup in tests). Every required key is
//! checked before anything touches the network, and all missing keys are
//! reported together.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error};
use url::Url;

/// Environment variable holding the authorization server's issuer URL.
pub const ENV_ISSUER: &str = "REALMGATE_OAUTH_ISSUER";
/// Environment variable holding the JWKS document URL.
pub const ENV_JWKS_URL: &str = "REALMGATE_OAUTH_JWKS_URL";
/// Environment variable holding the confidential client's identifier.
pub const ENV_CLIENT_ID: &str = "REALMGATE_OAUTH_CLIENT_ID";
/// Environment variable holding the confidential client's secret.
pub const ENV_CLIENT_SECRET: &str = "REALMGATE_OAUTH_CLIENT_SECRET";
/// Environment variable holding the registered redirect URI.
pub const ENV_REDIRECT_URI: &str = "REALMGATE_OAUTH_REDIRECT_URI";
/// Optional override for the token endpoint (defaults to `{issuer}/oauth2/token`).
pub const ENV_TOKEN_ENDPOINT: &str = "REALMGATE_OAUTH_TOKEN_ENDPOINT";

const REQUIRED_KEYS: [&str; 5] = [
    ENV_ISSUER,
    ENV_JWKS_URL,
    ENV_CLIENT_ID,
    ENV_CLIENT_SECRET,
    ENV_REDIRECT_URI,
];

/// Deployment configuration defects. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// One or more required keys are absent or empty
    #[error("missing required OAuth configuration: {}", .keys.join(", "))]
    Missing {
        /// Names of the missing keys, in declaration order
        keys: Vec<&'static str>,
    },

    /// A key is present but its value is unusable
    #[error("invalid OAuth configuration for {key}: {reason}")]
    Invalid {
        /// Name of the offending key
        key: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Confidential client credentials.
///
/// Not `Serialize`. The secret is only exposed to build the HTTP Basic header
/// of a token request.
#[derive(Clone)]
pub struct ClientCredentials {
    client_id: String,
    client_secret: SecretString,
}

impl ClientCredentials {
    /// Create credentials from an id and a secret.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::new(client_secret.into()),
        }
    }

    /// The public client identifier.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn client_secret(&self) -> &str {
        self.client_secret.expose_secret()
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Resolved OAuth parameters for one authorization server.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Expected `iss` claim and base of the default token endpoint
    pub issuer: String,
    /// JWKS document location
    pub jwks_url: String,
    /// Token endpoint the code is exchanged at
    pub token_endpoint: String,
    /// Redirect URI registered for the authorization request
    pub redirect_uri: String,
    /// Client id and secret
    pub credentials: ClientCredentials,
}

impl OAuthConfig {
    /// Build a configuration from a key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Missing`] naming every required key that
    /// is absent or blank, or [`ConfigurationError::Invalid`] when a URL does
    /// not parse or the client id cannot be used in a Basic credential.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let missing: Vec<&'static str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| value(*key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigurationError::Missing { keys: missing });
        }

        let required = |key: &'static str| {
            value(key).ok_or(ConfigurationError::Missing { keys: vec![key] })
        };

        let issuer = required(ENV_ISSUER)?;
        let jwks_url = required(ENV_JWKS_URL)?;
        let client_id = required(ENV_CLIENT_ID)?;
        let client_secret = required(ENV_CLIENT_SECRET)?;
        let redirect_uri = required(ENV_REDIRECT_URI)?;

        validate_url(ENV_ISSUER, &issuer)?;
        validate_url(ENV_JWKS_URL, &jwks_url)?;
        validate_url(ENV_REDIRECT_URI, &redirect_uri)?;

        // RFC 7617: the user-id of a Basic credential cannot contain a colon
        if client_id.contains(':') {
            return Err(ConfigurationError::Invalid {
                key: ENV_CLIENT_ID,
                reason: "client id must not contain ':'".to_string(),
            });
        }

        let token_endpoint = match value(ENV_TOKEN_ENDPOINT) {
            Some(endpoint) => {
                validate_url(ENV_TOKEN_ENDPOINT, &endpoint)?;
                endpoint
            }
            None => format!("{}/oauth2/token", issuer.trim_end_matches('/')),
        };

        Ok(Self {
            issuer,
            jwks_url,
            token_endpoint,
            redirect_uri,
            credentials: ClientCredentials::new(client_id, client_secret),
        })
    }
}

fn validate_url(key: &'static str, value: &str) -> Result<(), ConfigurationError> {
    let url = Url::parse(value).map_err(|e| ConfigurationError::Invalid {
        key,
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigurationError::Invalid {
            key,
            reason: format!("unsupported URL scheme '{other}'"),
        }),
    }
}

type ConfigSource = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Lazily resolves [`OAuthConfig`] on first use.
///
/// A successful resolution is cached for the lifetime of the resolver; a
/// failure is not, so fixing the deployment does not need a restart of
/// anything holding the resolver.
pub struct ConfigResolver {
    source: ConfigSource,
    resolved: OnceCell<Arc<OAuthConfig>>,
}

impl ConfigResolver {
    /// Resolver backed by the process environment.
    pub fn from_env() -> Self {
        Self::with_source(|key| std::env::var(key).ok())
    }

    /// Resolver backed by an arbitrary lookup.
    pub fn with_source<F>(source: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            source: Arc::new(source),
            resolved: OnceCell::new(),
        }
    }

    /// Resolver backed by a fixed map of keys.
    pub fn from_map(values: HashMap<String, String>) -> Self {
        Self::with_source(move |key| values.get(key).cloned())
    }

    /// Resolve (or return the cached) configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when required keys are missing or
    /// invalid. Nothing is cached in that case.
    pub fn resolve(&self) -> Result<Arc<OAuthConfig>, ConfigurationError> {
        self.resolved
            .get_or_try_init(|| {
                let config = OAuthConfig::from_lookup(|key| (self.source)(key)).map_err(|e| {
                    error!(error = %e, "OAuth configuration is incomplete");
                    e
                })?;
                debug!(
                    issuer = %config.issuer,
                    jwks_url = %config.jwks_url,
                    token_endpoint = %config.token_endpoint,
                    client_id = %config.credentials.client_id(),
                    "OAuth configuration resolved"
                );
                Ok::<_, ConfigurationError>(Arc::new(config))
            })
            .cloned()
    }
}

impl fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("resolved", &self.resolved.get().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn complete() -> HashMap<String, String> {
        [
            (ENV_ISSUER, "https://id.example.com"),
            (ENV_JWKS_URL, "https://id.example.com/.well-known/jwks.json"),
            (ENV_CLIENT_ID, "admin-console"),
            (ENV_CLIENT_SECRET, "s3cr3t-value"),
            (ENV_REDIRECT_URI, "https://admin.example.com/callback"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_resolves_complete_configuration() {
        let config = ConfigResolver::from_map(complete()).resolve().unwrap();
        assert_eq!(config.issuer, "https://id.example.com");
        assert_eq!(config.token_endpoint, "https://id.example.com/oauth2/token");
        assert_eq!(config.credentials.client_id(), "admin-console");
    }

    #[test]
    fn test_missing_keys_are_all_named() {
        let mut values = complete();
        values.remove(ENV_CLIENT_SECRET);
        values.insert(ENV_JWKS_URL.to_string(), "   ".to_string());

        let err = ConfigResolver::from_map(values).resolve().unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::Missing {
                keys: vec![ENV_JWKS_URL, ENV_CLIENT_SECRET]
            }
        );
        assert!(err.to_string().contains(ENV_CLIENT_SECRET));
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let mut values = complete();
        values.insert(ENV_ISSUER.to_string(), "not a url".to_string());

        let err = OAuthConfig::from_lookup(|k| values.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigurationError::Invalid { key, .. } if key == ENV_ISSUER));
    }

    #[test]
    fn test_colon_in_client_id_is_rejected() {
        let mut values = complete();
        values.insert(ENV_CLIENT_ID.to_string(), "admin:console".to_string());

        let err = OAuthConfig::from_lookup(|k| values.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigurationError::Invalid { key, .. } if key == ENV_CLIENT_ID));
    }

    #[test]
    fn test_token_endpoint_override_and_trailing_slash() {
        let mut values = complete();
        values.insert(ENV_ISSUER.to_string(), "https://id.example.com/".to_string());
        let config = OAuthConfig::from_lookup(|k| values.get(k).cloned()).unwrap();
        assert_eq!(config.token_endpoint, "https://id.example.com/oauth2/token");

        values.insert(
            ENV_TOKEN_ENDPOINT.to_string(),
            "https://token.example.com/exchange".to_string(),
        );
        let config = OAuthConfig::from_lookup(|k| values.get(k).cloned()).unwrap();
        assert_eq!(config.token_endpoint, "https://token.example.com/exchange");
    }

    #[test]
    fn test_failure_is_not_cached() {
        let values = Arc::new(parking_lot::Mutex::new(HashMap::new()));
        let source = Arc::clone(&values);
        let resolver = ConfigResolver::with_source(move |k| source.lock().get(k).cloned());

        assert!(resolver.resolve().is_err());

        *values.lock() = complete();
        assert!(resolver.resolve().is_ok());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = OAuthConfig::from_lookup(|k| complete().get(k).cloned()).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("s3cr3t-value"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
