//! Signed UDAP metadata (the `signed_metadata` JWT).
//!
//! The JWT is RS256-signed with the gateway's credential bundle and carries
//! the full certificate chain in its `x5c` header, so a client can verify it
//! against the certificate without any other key distribution.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use jsonwebtoken::{Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::cert_store::{CertificateError, CredentialBundle, RsaPublicComponents};

/// Default `exp - iat` for signed metadata.
pub const DEFAULT_SIGNED_METADATA_LIFETIME: Duration = Duration::from_secs(24 * 3600);

/// Failure to produce or verify signed metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// No usable credential bundle.
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// JWT signing failed.
    #[error("failed to sign metadata: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    /// Signed metadata did not verify.
    #[error("signed metadata verification failed: {0}")]
    Verification(String),
}

/// Endpoint claims asserted by the signed metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryClaims {
    /// FHIR base URL; used as both `iss` and `sub`.
    pub issuer: String,
    /// Authorization endpoint URL.
    pub authorization_endpoint: String,
    /// Token endpoint URL.
    pub token_endpoint: String,
    /// Dynamic client registration endpoint URL.
    pub registration_endpoint: String,
}

/// Payload of the signed metadata JWT, in serialization order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMetadataClaims {
    /// Issuer (FHIR base URL).
    pub iss: String,
    /// Subject (same as `iss`).
    pub sub: String,
    /// Issued-at, seconds since the epoch.
    pub iat: i64,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    /// Unique token identifier.
    pub jti: String,
    /// Authorization endpoint URL.
    pub authorization_endpoint: String,
    /// Token endpoint URL.
    pub token_endpoint: String,
    /// Registration endpoint URL.
    pub registration_endpoint: String,
}

/// Produces signed metadata JWTs.
#[derive(Debug, Clone)]
pub struct MetadataSigner {
    lifetime: Duration,
}

impl Default for MetadataSigner {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNED_METADATA_LIFETIME)
    }
}

impl MetadataSigner {
    /// Signer issuing JWTs valid for `lifetime`.
    #[must_use]
    pub fn new(lifetime: Duration) -> Self {
        Self { lifetime }
    }

    /// Validity window of issued JWTs.
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Sign `claims` with `bundle`. Every call yields a fresh `jti`.
    pub fn sign(
        &self,
        claims: &DiscoveryClaims,
        bundle: &CredentialBundle,
    ) -> Result<String, MetadataError> {
        let iat = Utc::now().timestamp();
        let lifetime = i64::try_from(self.lifetime.as_secs()).unwrap_or(i64::MAX);

        let payload = SignedMetadataClaims {
            iss: claims.issuer.clone(),
            sub: claims.issuer.clone(),
            iat,
            exp: iat.saturating_add(lifetime),
            jti: Uuid::new_v4().to_string(),
            authorization_endpoint: claims.authorization_endpoint.clone(),
            token_endpoint: claims.token_endpoint.clone(),
            registration_endpoint: claims.registration_endpoint.clone(),
        };

        let mut header = Header::new(Algorithm::RS256);
        header.x5c = Some(bundle.x5c());

        jsonwebtoken::encode(&header, &payload, bundle.encoding_key()).map_err(MetadataError::Signing)
    }
}

/// Leaf certificate (DER) from the JWT's `x5c` header.
pub fn embedded_certificate(token: &str) -> Result<Vec<u8>, MetadataError> {
    let header = jsonwebtoken::decode_header(token)
        .map_err(|e| MetadataError::Verification(format!("unreadable header: {e}")))?;
    let leaf = header
        .x5c
        .as_ref()
        .and_then(|chain| chain.first())
        .ok_or_else(|| MetadataError::Verification("header has no x5c chain".to_string()))?;

    STANDARD
        .decode(leaf)
        .map_err(|e| MetadataError::Verification(format!("x5c entry is not base64: {e}")))
}

/// Verify `token` against the public key of `certificate_der`.
///
/// Checks the RS256 signature, `exp` (with the default 60s leeway), the
/// presence of `iat`, and that `iss` equals `sub`.
pub fn verify_signed_metadata(
    token: &str,
    certificate_der: &[u8],
) -> Result<SignedMetadataClaims, MetadataError> {
    let key = RsaPublicComponents::from_certificate(certificate_der)?.decoding_key();

    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp", "iat", "iss", "sub"]);

    let claims = jsonwebtoken::decode::<SignedMetadataClaims>(token, &key, &validation)
        .map_err(|e| MetadataError::Verification(e.to_string()))?
        .claims;

    if claims.iss != claims.sub {
        return Err(MetadataError::Verification(format!(
            "iss '{}' differs from sub '{}'",
            claims.iss, claims.sub
        )));
    }
    Ok(claims)
}
