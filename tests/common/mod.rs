//! Shared helpers for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use axum::{Json, Router, extract::State, routing::get};
use chrono::Utc;
use jsonwebtoken::{Algorithm, Header};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use udap_gateway::config::Config;
use udap_gateway::udap::{CertificateStore, CredentialBundle, KeystoreGenerator, KeystoreParams};

/// Issuer every test token claims.
pub const ISSUER: &str = "https://idp.example.org";

fn generate(cn: &str) -> Arc<CredentialBundle> {
    let generated = KeystoreGenerator::generate(&KeystoreParams::new(cn), "test").unwrap();
    Arc::new(CertificateStore::from_pkcs12(&generated.pkcs12, "test").unwrap())
}

/// Key published by the test JWKS server.
pub fn idp_bundle() -> Arc<CredentialBundle> {
    static BUNDLE: OnceLock<Arc<CredentialBundle>> = OnceLock::new();
    Arc::clone(BUNDLE.get_or_init(|| generate("idp.test")))
}

/// Key nobody publishes.
pub fn rogue_bundle() -> Arc<CredentialBundle> {
    static BUNDLE: OnceLock<Arc<CredentialBundle>> = OnceLock::new();
    Arc::clone(BUNDLE.get_or_init(|| generate("rogue.test")))
}

/// Gateway signing credentials for discovery.
pub fn gateway_bundle() -> Arc<CredentialBundle> {
    static BUNDLE: OnceLock<Arc<CredentialBundle>> = OnceLock::new();
    Arc::clone(BUNDLE.get_or_init(|| generate("gateway.test")))
}

pub fn valid_claims() -> Value {
    let now = Utc::now().timestamp();
    json!({
        "iss": ISSUER,
        "sub": "client-123",
        "scope": "system/Patient.rs",
        "iat": now,
        "exp": now + 300
    })
}

pub fn mint(bundle: &CredentialBundle, kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    jsonwebtoken::encode(&header, claims, bundle.encoding_key()).unwrap()
}

/// Config pointing at a local JWKS server, with plain HTTP allowed.
pub fn config(jwks_url: &str) -> Config {
    let mut config = Config::default();
    config.auth.issuer = ISSUER.to_string();
    config.auth.jwks_url = Some(jwks_url.to_string());
    config.auth.require_https = false;
    config.keystore.path = "/nonexistent/gateway.p12".to_string();
    config.keystore.passphrase = "test".to_string();
    config.keystore.load_on_startup = false;
    config.discovery.base_url = "http://localhost:8080/fhir".to_string();
    config.discovery.authorization_server = "https://udap-security.fast.hl7.org".to_string();
    config
}

/// Local JWKS endpoint counting how often it is fetched.
pub struct JwksServer {
    pub url: String,
    hits: Arc<AtomicUsize>,
}

impl JwksServer {
    /// Serve `keys` (`[(bundle, kid)]`) on an ephemeral port.
    pub async fn start(keys: &[(&CredentialBundle, &str)]) -> Self {
        let document = json!({
            "keys": keys.iter().map(|(b, kid)| b.public_jwk(kid)).collect::<Vec<_>>()
        });
        Self::serve(Router::new().route(
            "/jwks",
            get(|State(state): State<(Arc<AtomicUsize>, Value)>| async move {
                state.0.fetch_add(1, Ordering::SeqCst);
                Json(state.1)
            }),
        ), document)
        .await
    }

    async fn serve(router: Router<(Arc<AtomicUsize>, Value)>, document: Value) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = router.with_state((Arc::clone(&hits), document));
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}/jwks"),
            hits,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}
