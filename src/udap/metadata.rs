//! UDAP discovery document (`/.well-known/udap`).

use serde::{Deserialize, Serialize};

use super::signer::{MetadataError, SignedMetadataClaims, embedded_certificate, verify_signed_metadata};
use crate::config::DiscoveryConfig;

/// UDAP server metadata, serialized in field order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    /// UDAP versions, `["1"]`.
    pub udap_versions_supported: Vec<String>,
    /// Supported UDAP profiles.
    pub udap_profiles_supported: Vec<String>,
    /// Authorization extension objects accepted.
    pub udap_authorization_extensions_supported: Vec<String>,
    /// Authorization extension objects required.
    pub udap_authorization_extensions_required: Vec<String>,
    /// Certification URIs accepted.
    pub udap_certifications_supported: Vec<String>,
    /// Certification URIs required.
    pub udap_certifications_required: Vec<String>,
    /// OAuth grant types.
    pub grant_types_supported: Vec<String>,
    /// Advertised scopes.
    pub scopes_supported: Vec<String>,
    /// Absolute authorization endpoint URL.
    pub authorization_endpoint: String,
    /// Absolute token endpoint URL.
    pub token_endpoint: String,
    /// Absolute userinfo endpoint URL.
    pub userinfo_endpoint: String,
    /// Absolute revocation endpoint URL.
    pub revocation_endpoint: String,
    /// Client authentication methods at the token endpoint.
    pub token_endpoint_auth_methods_supported: Vec<String>,
    /// Algorithms accepted for client assertions.
    pub token_endpoint_auth_signing_alg_values_supported: Vec<String>,
    /// Absolute registration endpoint URL.
    pub registration_endpoint: String,
    /// Algorithms accepted for software statements.
    pub registration_endpoint_jwt_signing_alg_values_supported: Vec<String>,
    /// RS256 JWT asserting the endpoints above.
    pub signed_metadata: String,
}

impl DiscoveryDocument {
    /// Assemble the document from configuration and a freshly signed JWT.
    #[must_use]
    pub fn build(config: &DiscoveryConfig, signed_metadata: String) -> Self {
        Self {
            udap_versions_supported: config.udap_versions_supported.clone(),
            udap_profiles_supported: config.udap_profiles_supported.clone(),
            udap_authorization_extensions_supported: config
                .udap_authorization_extensions_supported
                .clone(),
            udap_authorization_extensions_required: config
                .udap_authorization_extensions_required
                .clone(),
            udap_certifications_supported: config.udap_certifications_supported.clone(),
            udap_certifications_required: config.udap_certifications_required.clone(),
            grant_types_supported: config.grant_types_supported.clone(),
            scopes_supported: config.scopes_supported.clone(),
            authorization_endpoint: config.authorization_endpoint(),
            token_endpoint: config.token_endpoint(),
            userinfo_endpoint: config.userinfo_endpoint(),
            revocation_endpoint: config.revocation_endpoint(),
            token_endpoint_auth_methods_supported: config
                .token_endpoint_auth_methods_supported
                .clone(),
            token_endpoint_auth_signing_alg_values_supported: config
                .token_endpoint_auth_signing_alg_values_supported
                .clone(),
            registration_endpoint: config.registration_endpoint(),
            registration_endpoint_jwt_signing_alg_values_supported: config
                .registration_endpoint_jwt_signing_alg_values_supported
                .clone(),
            signed_metadata,
        }
    }

    /// Relying-party check: verify `signed_metadata` against the certificate
    /// it embeds and confirm the signed endpoints match the plain fields.
    pub fn verify(&self) -> Result<SignedMetadataClaims, MetadataError> {
        let certificate = embedded_certificate(&self.signed_metadata)?;
        let claims = verify_signed_metadata(&self.signed_metadata, &certificate)?;

        let pairs = [
            ("authorization_endpoint", &claims.authorization_endpoint, &self.authorization_endpoint),
            ("token_endpoint", &claims.token_endpoint, &self.token_endpoint),
            ("registration_endpoint", &claims.registration_endpoint, &self.registration_endpoint),
        ];
        for (name, signed, plain) in pairs {
            if signed != plain {
                return Err(MetadataError::Verification(format!(
                    "signed {name} '{signed}' differs from document value '{plain}'"
                )));
            }
        }
        Ok(claims)
    }
}
