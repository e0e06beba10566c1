//! Remote signing-key resolution backed by a shared key-set cache.
//!
//! # Resolution flow
//!
//! 1. Look the `kid` up in the current key-set snapshot; a hit on a fresh
//!    snapshot returns immediately.
//! 2. On a miss (or a stale snapshot) take the refresh lock. If another caller
//!    finished a fetch while we waited, reuse its outcome instead of fetching.
//! 3. Otherwise fetch the whole key set once, parse it, and swap the snapshot.
//! 4. Look the `kid` up again; still absent means
//!    [`KeyResolutionError::UnknownKeyId`].
//!
//! Fetches are never retried inside a single [`KeyResolver::resolve`] call.
//! When a refresh of a stale snapshot fails and the stale snapshot still holds
//! the requested key, that key is served and the failure is logged.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, KeyAlgorithm, PublicKeyUse};
use parking_lot::RwLock;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::error::KeyResolutionError;
use crate::{Error, Result};

/// Default upper bound on a single key-set fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default age after which a cached key set is refreshed on next use.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// An RS256 verification key published by the identity provider.
///
/// Immutable; a refresh replaces the whole key set rather than editing keys.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    key: DecodingKey,
}

impl SigningKey {
    /// Key identifier (`kid`).
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Key material for signature verification.
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey").field("kid", &self.kid).finish_non_exhaustive()
    }
}

/// Where key-set documents come from.
#[async_trait]
pub trait KeySetSource: Send + Sync {
    /// Human-readable location, used in errors and logs.
    fn location(&self) -> &str;

    /// Fetch the raw key-set document.
    async fn fetch(&self) -> std::result::Result<Vec<u8>, KeyResolutionError>;
}

/// Fetches the key set from a JWKS URL over HTTP.
pub struct HttpKeySetSource {
    url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpKeySetSource {
    /// Build a source for `url`.
    ///
    /// With `https_only` the client refuses plain-HTTP URLs at request time.
    pub fn new(url: impl Into<String>, timeout: Duration, https_only: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .https_only(https_only)
            .timeout(timeout)
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            url: url.into(),
            timeout,
            http,
        })
    }

    fn transport_error(&self, e: &reqwest::Error) -> KeyResolutionError {
        if e.is_timeout() {
            KeyResolutionError::Timeout {
                url: self.url.clone(),
                timeout: self.timeout,
            }
        } else {
            KeyResolutionError::Unavailable {
                url: self.url.clone(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    fn location(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> std::result::Result<Vec<u8>, KeyResolutionError> {
        let response = self
            .http
            .get(&self.url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KeyResolutionError::Unavailable {
                url: self.url.clone(),
                reason: format!("HTTP {status}"),
            });
        }

        let body = response.bytes().await.map_err(|e| self.transport_error(&e))?;
        Ok(body.to_vec())
    }
}

/// Immutable view of the key set at one point in time.
struct KeySetSnapshot {
    keys: HashMap<String, SigningKey>,
    fetched_at: Option<Instant>,
}

impl KeySetSnapshot {
    fn empty() -> Self {
        Self {
            keys: HashMap::new(),
            fetched_at: None,
        }
    }

    fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.is_none_or(|at| at.elapsed() >= ttl)
    }
}

/// Shared, cache-backed resolver of signing keys by `kid`.
///
/// One instance serves every request. Reads go through a lock-free snapshot
/// clone; at most one key-set fetch is in flight at any time, and callers that
/// queued behind it observe its outcome instead of fetching again.
pub struct KeyResolver {
    source: Arc<dyn KeySetSource>,
    snapshot: RwLock<Arc<KeySetSnapshot>>,
    /// Serialises fetches and remembers the outcome of the latest one.
    refresh: Mutex<Option<std::result::Result<(), KeyResolutionError>>>,
    /// Incremented after every completed fetch attempt.
    generation: AtomicU64,
    fetches: AtomicU64,
    fetch_timeout: Duration,
    cache_ttl: Duration,
}

impl KeyResolver {
    /// Create a resolver with the default timeout and TTL. Nothing is fetched
    /// until the first [`resolve`](Self::resolve).
    #[must_use]
    pub fn new(source: Arc<dyn KeySetSource>) -> Self {
        Self {
            source,
            snapshot: RwLock::new(Arc::new(KeySetSnapshot::empty())),
            refresh: Mutex::new(None),
            generation: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Bound each key-set fetch; expiry surfaces as
    /// [`KeyResolutionError::Timeout`].
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Age after which a cached key set is refreshed on next use.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Location of the underlying key set.
    #[must_use]
    pub fn location(&self) -> &str {
        self.source.location()
    }

    /// Resolve the verification key for `kid`.
    ///
    /// # Errors
    ///
    /// [`KeyResolutionError::UnknownKeyId`] when the freshly fetched key set
    /// lacks `kid`; a network or parse error when the fetch itself fails.
    pub async fn resolve(&self, kid: &str) -> std::result::Result<SigningKey, KeyResolutionError> {
        // Generation first, snapshot second: a fetch completing in between is
        // then visible as a generation change under the refresh lock.
        let observed = self.generation.load(Ordering::Acquire);
        let current = self.snapshot();

        let cached = current.keys.get(kid).cloned();
        if let Some(key) = &cached {
            if !current.is_stale(self.cache_ttl) {
                return Ok(key.clone());
            }
            debug!(kid = %kid, "Cached key set is stale, refreshing");
        } else {
            debug!(kid = %kid, "Key not in cached key set, refreshing");
        }

        if let Err(e) = self.refresh(observed).await {
            return match cached {
                Some(key) => {
                    warn!(kid = %kid, error = %e, "Key set refresh failed, serving stale key");
                    Ok(key)
                }
                None => Err(e),
            };
        }

        self.snapshot()
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| KeyResolutionError::UnknownKeyId(kid.to_string()))
    }

    /// Drop every cached key; the next [`resolve`](Self::resolve) refetches.
    pub fn invalidate(&self) {
        *self.snapshot.write() = Arc::new(KeySetSnapshot::empty());
        debug!(url = %self.source.location(), "Key set cache invalidated");
    }

    /// Key identifiers currently cached, sorted.
    #[must_use]
    pub fn cached_key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.snapshot().keys.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of key-set fetches attempted so far.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> Arc<KeySetSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    async fn refresh(&self, observed: u64) -> std::result::Result<(), KeyResolutionError> {
        let mut last = self.refresh.lock().await;

        if self.generation.load(Ordering::Acquire) != observed {
            debug!("Key set refreshed by a concurrent caller");
            return last.clone().unwrap_or(Ok(()));
        }

        let outcome = self.fetch_and_replace().await;
        *last = Some(outcome.clone());
        self.generation.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    async fn fetch_and_replace(&self) -> std::result::Result<(), KeyResolutionError> {
        let url = self.source.location().to_string();
        self.fetches.fetch_add(1, Ordering::Relaxed);
        debug!(url = %url, "Fetching key set");

        let body = match tokio::time::timeout(self.fetch_timeout, self.source.fetch()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(KeyResolutionError::Timeout {
                    url,
                    timeout: self.fetch_timeout,
                });
            }
        };

        let keys = parse_key_set(&url, &body)?;
        info!(url = %url, keys = keys.len(), "Key set refreshed");

        *self.snapshot.write() = Arc::new(KeySetSnapshot {
            keys,
            fetched_at: Some(Instant::now()),
        });
        Ok(())
    }
}

/// Parse a JWKS document into RS256 signing keys keyed by `kid`.
///
/// Entries that cannot be used for RS256 signature verification are skipped;
/// only a document without a `keys` array is an error.
pub fn parse_key_set(
    url: &str,
    body: &[u8],
) -> std::result::Result<HashMap<String, SigningKey>, KeyResolutionError> {
    #[derive(Deserialize)]
    struct RawKeySet {
        keys: Vec<serde_json::Value>,
    }

    let raw: RawKeySet =
        serde_json::from_slice(body).map_err(|e| KeyResolutionError::InvalidKeySet {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let mut keys = HashMap::with_capacity(raw.keys.len());
    for entry in raw.keys {
        let jwk: Jwk = match serde_json::from_value(entry) {
            Ok(jwk) => jwk,
            Err(e) => {
                debug!(url = %url, error = %e, "Skipping unparsable key set entry");
                continue;
            }
        };

        match signing_key_from_jwk(&jwk) {
            Some(key) => {
                keys.insert(key.kid.clone(), key);
            }
            None => debug!(
                url = %url,
                kid = jwk.common.key_id.as_deref().unwrap_or(""),
                "Skipping key that is not an RS256 signing key"
            ),
        }
    }

    Ok(keys)
}

fn signing_key_from_jwk(jwk: &Jwk) -> Option<SigningKey> {
    let kid = jwk.common.key_id.as_deref().filter(|k| !k.is_empty())?;

    if matches!(
        jwk.common.public_key_use,
        Some(PublicKeyUse::Encryption | PublicKeyUse::Other(_))
    ) {
        return None;
    }
    if jwk
        .common
        .key_algorithm
        .is_some_and(|alg| !matches!(alg, KeyAlgorithm::RS256))
    {
        return None;
    }

    let AlgorithmParameters::RSA(rsa) = &jwk.algorithm else {
        return None;
    };
    let key = DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok()?;

    Some(SigningKey {
        kid: kid.to_string(),
        key,
    })
}
