//! JWKS (JSON Web Key Set) fetching and caching
//!
//! Key sets are fetched lazily, once per distinct JWKS URL, and kept for the
//! life of the cache. Keys rotate rarely, so the set is only re-fetched when
//! a token names a `kid` the cached set does not contain.
//!
//! # Concurrency
//!
//! - Readers of an already cached set take a short read lock and never wait
//!   on a refresh in progress.
//! - Refreshes of the same URL are single-flight: requests that miss while a
//!   fetch is running wait for it and reuse its result instead of issuing
//!   their own.
//! - A failed fetch leaves the previous set (if any) in place and is not
//!   remembered; the next request fetches again.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use http::StatusCode;
use jsonwebtoken::jwk::{Jwk, JwkSet, PublicKeyUse};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

/// Default bound on a JWKS fetch.
pub const DEFAULT_JWKS_TIMEOUT: Duration = Duration::from_secs(10);

/// The key set could not be fetched or parsed.
///
/// Fails the current request only; nothing about the failure is cached.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyResolutionError {
    /// Connection or body-read failure
    #[error("JWKS fetch from {url} failed: {reason}")]
    Fetch {
        /// JWKS URL
        url: String,
        /// Transport error text
        reason: String,
    },

    /// The fetch exceeded its timeout
    #[error("JWKS fetch from {url} timed out")]
    Timeout {
        /// JWKS URL
        url: String,
    },

    /// The endpoint answered with a non-2xx status
    #[error("JWKS endpoint {url} returned status {status}")]
    Status {
        /// JWKS URL
        url: String,
        /// Upstream status
        status: StatusCode,
    },

    /// The document is not a usable JWKS
    #[error("invalid JWKS document from {url}: {reason}")]
    Parse {
        /// JWKS URL
        url: String,
        /// What is wrong with it
        reason: String,
    },

    /// A concurrent refresh this request waited on failed
    #[error("JWKS refresh for {url} failed")]
    RefreshFailed {
        /// JWKS URL
        url: String,
    },
}

/// A fetched key set, restricted to signature keys.
#[derive(Debug, Clone)]
pub struct KeySet {
    jwks: JwkSet,
    fetched_at: Instant,
}

impl KeySet {
    /// Wrap a JWK set, dropping keys published for encryption.
    pub fn new(mut jwks: JwkSet) -> Self {
        jwks.keys
            .retain(|jwk| !matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)));
        Self {
            jwks,
            fetched_at: Instant::now(),
        }
    }

    /// Look up a key by `kid`.
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.jwks.find(kid)
    }

    /// The only signing key, if the set holds exactly one.
    pub fn sole_key(&self) -> Option<&Jwk> {
        match self.jwks.keys.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// Key ids present in the set.
    pub fn kids(&self) -> Vec<&str> {
        self.jwks
            .keys
            .iter()
            .filter_map(|jwk| jwk.common.key_id.as_deref())
            .collect()
    }

    /// Number of signing keys.
    pub fn len(&self) -> usize {
        self.jwks.keys.len()
    }

    /// Whether the set has no signing keys.
    pub fn is_empty(&self) -> bool {
        self.jwks.keys.is_empty()
    }

    /// When the set was fetched.
    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }
}

/// Loosely typed document; keys are parsed one at a time so a single
/// unsupported entry does not reject the whole set.
#[derive(Deserialize)]
struct RawJwks {
    keys: Vec<Value>,
}

struct JwksEntry {
    url: String,
    current: RwLock<Option<Arc<KeySet>>>,
    refresh_guard: AsyncMutex<()>,
    attempts: AtomicU64,
    last_attempt_failed: AtomicBool,
    /// The current set came from a refresh triggered by a `kid` miss.
    miss_refreshed: AtomicBool,
}

impl JwksEntry {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            current: RwLock::new(None),
            refresh_guard: AsyncMutex::new(()),
            attempts: AtomicU64::new(0),
            last_attempt_failed: AtomicBool::new(false),
            miss_refreshed: AtomicBool::new(false),
        }
    }

    fn current(&self) -> Option<Arc<KeySet>> {
        self.current.read().clone()
    }
}

/// Process-wide JWKS cache keyed by JWKS URL.
///
/// Passed explicitly (usually as `Arc<JwksCache>`) to whatever verifies
/// tokens; there is no global instance.
///
/// # Example
///
/// ```rust,no_run
/// # use realmgate_auth::jwt::JwksCache;
/// # tokio_test::block_on(async {
/// let cache = JwksCache::new()?;
/// let url = "https://id.example.com/.well-known/jwks.json";
///
/// if let Some(jwk) = cache.get_key(url, "key-2024-01").await? {
///     println!("found {:?}", jwk.common.key_id);
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
pub struct JwksCache {
    http_client: reqwest::Client,
    timeout: Duration,
    min_refresh_interval: Duration,
    entries: RwLock<HashMap<String, Arc<JwksEntry>>>,
}

impl JwksCache {
    /// Create a cache with the default fetch timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeout(DEFAULT_JWKS_TIMEOUT)
    }

    /// Create a cache with a custom fetch timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self::from_client(http_client, timeout))
    }

    fn from_client(http_client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            http_client,
            timeout,
            min_refresh_interval: Duration::ZERO,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Minimum age of a miss-driven refresh before another `kid` miss may
    /// re-fetch the set.
    ///
    /// Stops tokens with made-up `kid`s from forcing a fetch per request.
    /// The first load of a URL and the first miss after an ordinary load are
    /// never limited, so a key rotated in right after a load is still found.
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// The cached set for `jwks_url`, without fetching.
    pub fn cached(&self, jwks_url: &str) -> Option<Arc<KeySet>> {
        self.entries.read().get(jwks_url).and_then(|e| e.current())
    }

    /// Number of fetch attempts made for `jwks_url`.
    pub fn fetch_count(&self, jwks_url: &str) -> u64 {
        self.entries
            .read()
            .get(jwks_url)
            .map_or(0, |e| e.attempts.load(Ordering::Acquire))
    }

    /// The key set for `jwks_url`, fetching it on first use.
    ///
    /// # Errors
    ///
    /// Returns a [`KeyResolutionError`] if the set is not cached and cannot
    /// be fetched.
    pub async fn resolve_key_set(
        &self,
        jwks_url: &str,
    ) -> Result<Arc<KeySet>, KeyResolutionError> {
        let entry = self.entry(jwks_url);
        let observed = entry.attempts.load(Ordering::Acquire);
        if let Some(set) = entry.current() {
            return Ok(set);
        }
        self.refresh_after(&entry, observed, false).await
    }

    /// Look up `kid` in the set for `jwks_url`.
    ///
    /// On a miss the set is re-fetched once (key rotation) before giving up.
    /// `Ok(None)` means the key is not published.
    ///
    /// # Errors
    ///
    /// Returns a [`KeyResolutionError`] if a needed fetch fails.
    pub async fn get_key(
        &self,
        jwks_url: &str,
        kid: &str,
    ) -> Result<Option<Jwk>, KeyResolutionError> {
        let entry = self.entry(jwks_url);
        // Read the attempt counter before the set so a refresh completing in
        // between is seen as "someone else already refreshed"
        let observed = entry.attempts.load(Ordering::Acquire);

        let mut on_miss = false;
        if let Some(set) = entry.current() {
            if let Some(jwk) = set.find(kid) {
                return Ok(Some(jwk.clone()));
            }
            let limited = entry.miss_refreshed.load(Ordering::Acquire)
                && set.fetched_at().elapsed() < self.min_refresh_interval;
            if limited {
                debug!(
                    jwks_url = %jwks_url,
                    kid = %kid,
                    "Key not cached; JWKS refreshed too recently to fetch again"
                );
                return Ok(None);
            }
            debug!(jwks_url = %jwks_url, kid = %kid, "Key not cached, refreshing JWKS");
            on_miss = true;
        }

        let set = self.refresh_after(&entry, observed, on_miss).await?;
        let jwk = set.find(kid).cloned();
        if jwk.is_none() {
            warn!(
                jwks_url = %jwks_url,
                kid = %kid,
                published = ?set.kids(),
                "Key ID not published in JWKS"
            );
        }
        Ok(jwk)
    }

    fn entry(&self, jwks_url: &str) -> Arc<JwksEntry> {
        if let Some(entry) = self.entries.read().get(jwks_url) {
            return Arc::clone(entry);
        }
        let mut entries = self.entries.write();
        Arc::clone(
            entries
                .entry(jwks_url.to_string())
                .or_insert_with(|| Arc::new(JwksEntry::new(jwks_url))),
        )
    }

    /// Fetch unless another attempt finished after `observed` was read.
    ///
    /// `on_miss` marks a refresh triggered by a `kid` missing from a loaded
    /// set; only those count toward the refresh rate limit.
    async fn refresh_after(
        &self,
        entry: &JwksEntry,
        observed: u64,
        on_miss: bool,
    ) -> Result<Arc<KeySet>, KeyResolutionError> {
        let _guard = entry.refresh_guard.lock().await;

        if entry.attempts.load(Ordering::Acquire) != observed {
            debug!(jwks_url = %entry.url, "Joined concurrent JWKS refresh");
            if entry.last_attempt_failed.load(Ordering::Acquire) {
                return Err(KeyResolutionError::RefreshFailed {
                    url: entry.url.clone(),
                });
            }
            if let Some(set) = entry.current() {
                return Ok(set);
            }
        }

        let result = self.fetch(&entry.url).await;
        match result {
            Ok(set) => {
                let set = Arc::new(set);
                *entry.current.write() = Some(Arc::clone(&set));
                entry.miss_refreshed.store(on_miss, Ordering::Release);
                entry.last_attempt_failed.store(false, Ordering::Release);
                entry.attempts.fetch_add(1, Ordering::AcqRel);
                Ok(set)
            }
            Err(e) => {
                entry.last_attempt_failed.store(true, Ordering::Release);
                entry.attempts.fetch_add(1, Ordering::AcqRel);
                Err(e)
            }
        }
    }

    async fn fetch(&self, jwks_url: &str) -> Result<KeySet, KeyResolutionError> {
        info!(jwks_url = %jwks_url, "Fetching JWKS from endpoint");

        let transport = |e: reqwest::Error| {
            if e.is_timeout() {
                error!(
                    jwks_url = %jwks_url,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "JWKS fetch timed out"
                );
                KeyResolutionError::Timeout {
                    url: jwks_url.to_string(),
                }
            } else {
                error!(jwks_url = %jwks_url, error = %e, "Failed to fetch JWKS");
                KeyResolutionError::Fetch {
                    url: jwks_url.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let response = self
            .http_client
            .get(jwks_url)
            .header(http::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            error!(jwks_url = %jwks_url, status = %status, "JWKS endpoint returned error status");
            return Err(KeyResolutionError::Status {
                url: jwks_url.to_string(),
                status,
            });
        }

        let body = response.bytes().await.map_err(transport)?;
        let raw: RawJwks = serde_json::from_slice(&body).map_err(|e| {
            error!(jwks_url = %jwks_url, error = %e, "Failed to parse JWKS JSON");
            KeyResolutionError::Parse {
                url: jwks_url.to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut keys = Vec::with_capacity(raw.keys.len());
        for value in raw.keys {
            match serde_json::from_value::<Jwk>(value) {
                Ok(jwk) => keys.push(jwk),
                Err(e) => warn!(jwks_url = %jwks_url, error = %e, "Skipping unsupported JWK"),
            }
        }

        let set = KeySet::new(JwkSet { keys });
        if set.is_empty() {
            error!(jwks_url = %jwks_url, "JWKS contains no usable signing keys");
            return Err(KeyResolutionError::Parse {
                url: jwks_url.to_string(),
                reason: "no usable signing keys".to_string(),
            });
        }

        info!(
            jwks_url = %jwks_url,
            key_count = set.len(),
            kids = ?set.kids(),
            "Successfully fetched JWKS"
        );
        Ok(set)
    }
}

impl std::fmt::Debug for JwksCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksCache")
            .field("timeout", &self.timeout)
            .field("min_refresh_interval", &self.min_refresh_interval)
            .field("urls", &self.entries.read().keys().cloned().collect::<Vec<_>>())
            .finish()
    }
}
