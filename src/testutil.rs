//! Shared fixtures for unit tests: generated credentials, token minting and
//! an in-memory key-set source.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, Header};
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::auth::{KeyResolutionError, KeyResolver, KeySetSource, TokenValidator};
use crate::udap::{CertificateStore, CredentialBundle, KeystoreGenerator, KeystoreParams};

/// Issuer the fixtures mint tokens for.
pub(crate) const ISSUER: &str = "https://idp.example.org";

fn generate(cn: &str) -> Arc<CredentialBundle> {
    let generated = KeystoreGenerator::generate(&KeystoreParams::new(cn), "test").unwrap();
    Arc::new(CertificateStore::from_pkcs12(&generated.pkcs12, "test").unwrap())
}

/// Credentials whose public key the test key sets publish.
pub(crate) fn shared_trusted_bundle() -> Arc<CredentialBundle> {
    static BUNDLE: OnceLock<Arc<CredentialBundle>> = OnceLock::new();
    Arc::clone(BUNDLE.get_or_init(|| generate("trusted.test")))
}

pub(crate) fn trusted_bundle() -> &'static CredentialBundle {
    static BUNDLE: OnceLock<Arc<CredentialBundle>> = OnceLock::new();
    BUNDLE.get_or_init(shared_trusted_bundle)
}

/// Credentials nobody trusts.
pub(crate) fn untrusted_bundle() -> &'static CredentialBundle {
    static BUNDLE: OnceLock<Arc<CredentialBundle>> = OnceLock::new();
    BUNDLE.get_or_init(|| generate("untrusted.test"))
}

/// JWKS document publishing each bundle's public key under the given kid.
pub(crate) fn key_set(entries: &[(&CredentialBundle, &str)]) -> Vec<u8> {
    let keys: Vec<Value> = entries
        .iter()
        .map(|(bundle, kid)| bundle.public_jwk(kid))
        .collect();
    serde_json::to_vec(&json!({ "keys": keys })).unwrap()
}

/// Claims of a currently valid token from [`ISSUER`].
pub(crate) fn valid_claims() -> Value {
    let now = Utc::now().timestamp();
    json!({
        "iss": ISSUER,
        "sub": "client-123",
        "aud": "http://localhost:8080/fhir",
        "scope": "system/*.read",
        "iat": now,
        "exp": now + 600
    })
}

/// RS256 token signed by `bundle` with `kid` in the header.
pub(crate) fn mint(bundle: &CredentialBundle, kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    jsonwebtoken::encode(&header, claims, bundle.encoding_key()).unwrap()
}

/// RS256 token without a `kid` header.
pub(crate) fn mint_without_kid(bundle: &CredentialBundle, claims: &Value) -> String {
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), claims, bundle.encoding_key()).unwrap()
}

/// Source serving the trusted bundle under `k1`.
pub(crate) fn trusted_source() -> Arc<StaticKeySource> {
    StaticKeySource::new(key_set(&[(trusted_bundle(), "k1")]))
}

/// Validator over `source` with default settings.
pub(crate) fn validator(source: &Arc<StaticKeySource>) -> Arc<TokenValidator> {
    let resolver = KeyResolver::new(Arc::clone(source) as Arc<dyn KeySetSource>);
    Arc::new(TokenValidator::new(Arc::new(resolver)))
}

/// In-memory key-set source that counts fetches.
pub(crate) struct StaticKeySource {
    response: Mutex<Result<Vec<u8>, KeyResolutionError>>,
    delay: Mutex<Duration>,
    fetches: AtomicUsize,
}

impl StaticKeySource {
    pub(crate) fn new(body: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(Ok(body)),
            delay: Mutex::new(Duration::ZERO),
            fetches: AtomicUsize::new(0),
        })
    }

    pub(crate) fn failing(error: KeyResolutionError) -> Arc<Self> {
        let source = Self::new(Vec::new());
        source.set_error(error);
        source
    }

    pub(crate) fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.delay.lock() = delay;
        self
    }

    pub(crate) fn set_body(&self, body: Vec<u8>) {
        *self.response.lock() = Ok(body);
    }

    pub(crate) fn set_error(&self, error: KeyResolutionError) {
        *self.response.lock() = Err(error);
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySetSource for StaticKeySource {
    fn location(&self) -> &str {
        "memory://jwks"
    }

    async fn fetch(&self) -> Result<Vec<u8>, KeyResolutionError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.response.lock().clone()
    }
}
