//! Discovery endpoint: builds and serves the signed UDAP metadata.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, error};

use super::cert_store::{CertificateError, CertificateStore, CredentialBundle};
use super::metadata::DiscoveryDocument;
use super::signer::{MetadataError, MetadataSigner};
use crate::config::{DiscoveryConfig, KeystoreConfig};

/// Serves the discovery document.
///
/// The credential bundle is loaded at most once; a failed load is retried on
/// the next request.
pub struct DiscoveryService {
    config: DiscoveryConfig,
    keystore: KeystoreConfig,
    signer: MetadataSigner,
    bundle: OnceCell<Arc<CredentialBundle>>,
}

impl DiscoveryService {
    /// Service that loads its bundle from `keystore` on first use.
    #[must_use]
    pub fn new(config: DiscoveryConfig, keystore: KeystoreConfig) -> Self {
        let signer = MetadataSigner::new(config.signed_metadata_lifetime);
        Self {
            config,
            keystore,
            signer,
            bundle: OnceCell::new(),
        }
    }

    /// Service with an already-loaded bundle.
    #[must_use]
    pub fn with_bundle(config: DiscoveryConfig, bundle: Arc<CredentialBundle>) -> Self {
        Self {
            bundle: OnceCell::new_with(Some(bundle)),
            ..Self::new(config, KeystoreConfig::default())
        }
    }

    /// Route the document is served on.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.config.path
    }

    /// The credential bundle, loading it on first call.
    pub async fn credentials(&self) -> Result<Arc<CredentialBundle>, MetadataError> {
        self.bundle
            .get_or_try_init(|| async {
                let passphrase = self
                    .keystore
                    .resolve_passphrase()
                    .map_err(|e| CertificateError::Decrypt(e.to_string()))?;
                let path = PathBuf::from(&self.keystore.path);
                // PKCS#12 decryption and the file read both block.
                let loaded = tokio::task::spawn_blocking({
                    let path = path.clone();
                    move || CertificateStore::load(&path, &passphrase)
                })
                .await
                .map_err(|e| CertificateError::Read {
                    path,
                    source: io::Error::other(e),
                })?;
                loaded.map(Arc::new).map_err(MetadataError::from)
            })
            .await
            .cloned()
    }

    /// Build a discovery document with a freshly signed JWT.
    pub async fn document(&self) -> Result<DiscoveryDocument, MetadataError> {
        let bundle = self.credentials().await?;
        let signed = self.signer.sign(&self.config.discovery_claims(), &bundle)?;
        debug!(alias = %bundle.alias(), "Signed discovery metadata");
        Ok(DiscoveryDocument::build(&self.config, signed))
    }
}

/// `GET` handler for the discovery path.
pub async fn discovery_handler(State(service): State<Arc<DiscoveryService>>) -> Response {
    match service.document().await {
        Ok(document) => Json(document).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to build UDAP discovery document");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "server_error" })),
            )
                .into_response()
        }
    }
}
