//! Server settings
//!
//! Loaded in layers, later ones winning:
//!
//! 1. built-in defaults
//! 2. an optional file (`.toml`, `.yaml`/`.yml` or `.json`)
//! 3. `REALMGATE_`-prefixed environment variables (`REALMGATE_PORT=9000`)
//! 4. command line flags
//!
//! OAuth parameters are not part of these settings; they are read by
//! [`realmgate_auth::ConfigResolver`].

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment prefix for setting overrides.
pub const ENV_PREFIX: &str = "REALMGATE";

/// HTTP server and outbound client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Interface to listen on
    pub bind_address: String,
    /// Port to listen on
    pub port: u16,
    /// Bound on each outbound call (token endpoint, JWKS), in seconds
    pub request_timeout_secs: u64,
    /// Minimum age of a cached key set before an unknown `kid` may re-fetch it
    pub jwks_min_refresh_secs: u64,
    /// Clock skew tolerated on ID token `exp`, `nbf` and `iat`, in seconds
    pub leeway_secs: u64,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit logs as JSON lines
    pub log_json: bool,
    /// Origins allowed to call the endpoints from a browser; `*` for any.
    /// Empty means same-origin only.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout_secs: 10,
            jwks_min_refresh_secs: 1,
            leeway_secs: 60,
            log_level: "info".to_string(),
            log_json: false,
            cors_allowed_origins: Vec::new(),
        }
    }
}

/// Settings could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Settings file not found
    #[error("settings file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file extension
    #[error("unsupported settings file format; use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Parse or type error in a source
    #[error("failed to parse settings: {0}")]
    Parse(#[from] config::ConfigError),

    /// Bind address and port do not form a socket address
    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),
}

impl ServerSettings {
    /// Load settings from defaults, an optional file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or has an unsupported
    /// extension, or if any source holds a value of the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Like [`load`](Self::load) with a custom environment prefix.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self, SettingsError> {
        use config::{Config, Environment, File, FileFormat};

        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(SettingsError::FileNotFound(path.to_path_buf()));
            }
            let format = match path.extension().and_then(|s| s.to_str()) {
                Some("toml") => FileFormat::Toml,
                Some("yaml") | Some("yml") => FileFormat::Yaml,
                Some("json") => FileFormat::Json,
                _ => return Err(SettingsError::UnsupportedFormat),
            };
            let name = path.to_str().ok_or(SettingsError::UnsupportedFormat)?;
            builder = builder.add_source(File::new(name, format));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(env_prefix)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cors_allowed_origins"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Apply command line overrides.
    pub fn with_overrides(mut self, bind_address: Option<String>, port: Option<u16>) -> Self {
        if let Some(bind_address) = bind_address {
            self.bind_address = bind_address;
        }
        if let Some(port) = port {
            self.port = port;
        }
        self
    }

    /// Address to listen on.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::InvalidAddress`] when the bind address is not
    /// an IP address.
    pub fn socket_addr(&self) -> Result<SocketAddr, SettingsError> {
        let text = format!("{}:{}", self.bind_address, self.port);
        text.parse::<SocketAddr>()
            .or_else(|_| format!("[{}]:{}", self.bind_address, self.port).parse::<SocketAddr>())
            .map_err(|_| SettingsError::InvalidAddress(text))
    }

    /// Outbound request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Minimum interval between miss-driven JWKS refreshes.
    pub fn jwks_min_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.jwks_min_refresh_secs)
    }

    /// Clock skew tolerance for ID token time checks.
    pub fn leeway(&self) -> Duration {
        Duration::from_secs(self.leeway_secs)
    }

    /// Bound on a whole inbound request: one exchange plus one JWKS fetch.
    pub fn handler_timeout(&self) -> Duration {
        self.request_timeout() * 2 + Duration::from_secs(1)
    }
}
