//! PKCS#12 keystore generation for development and test deployments.
//!
//! Produces a self-signed RSA-2048 certificate suitable for RS256 metadata
//! signing, wrapped in a passphrase-protected PKCS#12 file that
//! [`CertificateStore`](super::CertificateStore) can load.

use std::fs;
use std::path::Path;

use p12_keystore::{Certificate, KeyStore, KeyStoreEntry, PrivateKeyChain};
use rcgen::string::Ia5String;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_RSA_SHA256, SanType, date_time_ymd,
};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::cert_store::CertificateError;

/// Default keystore alias.
pub const DEFAULT_ALIAS: &str = "udap-gateway";

/// Parameters for a generated keystore.
#[derive(Debug)]
pub struct KeystoreParams<'a> {
    /// Common Name of the certificate subject.
    pub cn: &'a str,
    /// Organization (optional).
    pub organization: Option<&'a str>,
    /// Subject Alternative Names, URI entries (usually the FHIR base URL).
    pub san_uris: Vec<String>,
    /// Validity period in days.
    pub validity_days: u32,
    /// Alias of the private-key entry.
    pub alias: &'a str,
}

impl<'a> KeystoreParams<'a> {
    /// One-year certificate for `cn` under the default alias.
    #[must_use]
    pub fn new(cn: &'a str) -> Self {
        Self {
            cn,
            organization: None,
            san_uris: Vec::new(),
            validity_days: 365,
            alias: DEFAULT_ALIAS,
        }
    }
}

/// Generated keystore.
#[derive(Debug)]
pub struct GeneratedKeystore {
    /// Encrypted PKCS#12 bytes.
    pub pkcs12: Vec<u8>,
    /// PEM-encoded certificate, for distribution to relying parties.
    pub cert_pem: String,
}

/// Keystore generator backed by `rcgen` and `p12-keystore`.
pub struct KeystoreGenerator;

impl KeystoreGenerator {
    /// Generate an RSA key and self-signed certificate, protected by
    /// `passphrase`.
    pub fn generate(
        params: &KeystoreParams<'_>,
        passphrase: &str,
    ) -> Result<GeneratedKeystore, CertificateError> {
        let key_pair = KeyPair::generate_for(&PKCS_RSA_SHA256)
            .map_err(|e| CertificateError::Generate(format!("Failed to generate RSA key: {e}")))?;

        let mut cert_params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, params.cn);
        if let Some(org) = params.organization {
            dn.push(DnType::OrganizationName, org);
        }
        cert_params.distinguished_name = dn;
        cert_params.not_before = validity_to_date(0)?;
        cert_params.not_after = validity_to_date(params.validity_days)?;

        let mut sans: Vec<SanType> = Vec::new();
        for uri in &params.san_uris {
            let ia5 = Ia5String::try_from(uri.as_str())
                .map_err(|e| CertificateError::Generate(format!("Invalid URI SAN '{uri}': {e}")))?;
            sans.push(SanType::URI(ia5));
        }
        cert_params.subject_alt_names = sans;

        let cert = cert_params
            .self_signed(&key_pair)
            .map_err(|e| CertificateError::Generate(format!("Certificate signing failed: {e}")))?;
        let cert_der = cert.der().to_vec();

        let p12_cert = Certificate::from_der(&cert_der)
            .map_err(|e| CertificateError::Generate(format!("Certificate encoding failed: {e}")))?;
        let local_key_id = Sha256::digest(&cert_der).to_vec();
        let entry = PrivateKeyChain::new(key_pair.serialize_der(), local_key_id, vec![p12_cert]);

        let mut keystore = KeyStore::new();
        keystore.add_entry(params.alias, KeyStoreEntry::PrivateKeyChain(entry));
        let pkcs12 = keystore
            .writer(passphrase)
            .write()
            .map_err(|e| CertificateError::Generate(format!("PKCS#12 encoding failed: {e}")))?;

        debug!(cn = params.cn, alias = params.alias, "Generated keystore");

        Ok(GeneratedKeystore {
            pkcs12,
            cert_pem: cert.pem(),
        })
    }

    /// Write the PKCS#12 file to `path`, creating parent directories.
    pub fn write(keystore: &GeneratedKeystore, path: &Path) -> Result<(), CertificateError> {
        let write_err = |source| CertificateError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(path, &keystore.pkcs12).map_err(write_err)?;
        Ok(())
    }
}

/// Convert a validity period in days from now to an `OffsetDateTime`.
fn validity_to_date(days: u32) -> Result<time::OffsetDateTime, CertificateError> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| CertificateError::Generate(format!("System time error: {e}")))?
        .as_secs();
    let future_secs = now_secs.saturating_add(u64::from(days) * 86_400);

    let dt = time::OffsetDateTime::from_unix_timestamp(i64::try_from(future_secs).unwrap_or(i64::MAX))
        .map_err(|e| CertificateError::Generate(format!("Date calculation error: {e}")))?;

    Ok(date_time_ymd(dt.year(), dt.month() as u8, dt.day()))
}
