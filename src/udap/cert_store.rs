//! Credential bundle loading from a passphrase-protected PKCS#12 keystore.
//!
//! A bundle holds the gateway's RSA signing key and its X.509 chain (leaf
//! first). It is loaded once and shared read-only afterwards.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use p12_keystore::KeyStore;
use pkcs8::{ObjectIdentifier, PrivateKeyInfo};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};
use x509_parser::parse_x509_certificate;
use x509_parser::public_key::PublicKey;

const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// Failure to load or produce a credential bundle.
#[derive(Debug, Error)]
pub enum CertificateError {
    /// Keystore file could not be read.
    #[error("failed to read keystore {path}: {source}")]
    Read {
        /// Keystore path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Keystore file could not be written.
    #[error("failed to write keystore {path}: {source}")]
    Write {
        /// Keystore path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Not a PKCS#12 keystore, or the passphrase is wrong.
    #[error("failed to open PKCS#12 keystore (wrong passphrase or corrupt file): {0}")]
    Decrypt(String),

    /// The keystore holds no private-key entry.
    #[error("keystore contains no private key entry")]
    NoPrivateKey,

    /// The private-key entry has no certificate.
    #[error("keystore private key entry has no certificate")]
    NoCertificate,

    /// The certificate could not be parsed.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Key type other than RSA.
    #[error("unsupported key: {0}")]
    UnsupportedKey(String),

    /// Private key does not match the leaf certificate's public key.
    #[error("private key does not match the certificate public key")]
    KeyMismatch,

    /// Keystore generation failed.
    #[error("keystore generation failed: {0}")]
    Generate(String),
}

/// RSA public key taken from a certificate.
#[derive(Clone, PartialEq, Eq)]
pub struct RsaPublicComponents {
    modulus: Vec<u8>,
    exponent: Vec<u8>,
}

impl RsaPublicComponents {
    /// Extract the RSA public key from a DER certificate.
    pub fn from_certificate(der: &[u8]) -> Result<Self, CertificateError> {
        parse_leaf(der).map(|(_, key)| key)
    }

    /// Big-endian modulus without leading zero bytes.
    #[must_use]
    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    /// Big-endian public exponent without leading zero bytes.
    #[must_use]
    pub fn exponent(&self) -> &[u8] {
        &self.exponent
    }

    /// Modulus in the JWK `n` encoding.
    #[must_use]
    pub fn n(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.modulus)
    }

    /// Exponent in the JWK `e` encoding.
    #[must_use]
    pub fn e(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.exponent)
    }

    /// Verification key for RS256 signatures.
    #[must_use]
    pub fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_rsa_raw_components(&self.modulus, &self.exponent)
    }

    /// Modulus size in bits.
    #[must_use]
    pub fn bits(&self) -> usize {
        self.modulus.len() * 8
    }
}

impl fmt::Debug for RsaPublicComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaPublicComponents")
            .field("bits", &self.bits())
            .field("e", &self.e())
            .finish()
    }
}

/// The gateway's signing identity: RSA private key plus certificate chain.
pub struct CredentialBundle {
    alias: String,
    subject: String,
    chain: Vec<Vec<u8>>,
    public_key: RsaPublicComponents,
    encoding_key: EncodingKey,
}

impl CredentialBundle {
    /// Assemble a bundle from a PKCS#8 private key and a DER chain
    /// (leaf first), checking that key and leaf belong together.
    pub fn from_parts(
        alias: impl Into<String>,
        private_key_pkcs8: &[u8],
        chain: Vec<Vec<u8>>,
    ) -> Result<Self, CertificateError> {
        let leaf = chain.first().ok_or(CertificateError::NoCertificate)?;
        let (subject, public_key) = parse_leaf(leaf)?;
        let encoding_key = EncodingKey::from_rsa_der(rsa_private_key(private_key_pkcs8)?);

        let bundle = Self {
            alias: alias.into(),
            subject,
            chain,
            public_key,
            encoding_key,
        };
        bundle.ensure_key_pair()?;
        Ok(bundle)
    }

    /// Keystore alias of the private-key entry.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Leaf certificate subject, RFC 4514 style.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// DER certificates, leaf first.
    #[must_use]
    pub fn chain(&self) -> &[Vec<u8>] {
        &self.chain
    }

    /// DER leaf certificate.
    #[must_use]
    pub fn certificate_der(&self) -> &[u8] {
        &self.chain[0]
    }

    /// Chain as a JOSE `x5c` value: standard base64 DER, leaf first.
    #[must_use]
    pub fn x5c(&self) -> Vec<String> {
        self.chain.iter().map(|der| STANDARD.encode(der)).collect()
    }

    /// Leaf public key.
    #[must_use]
    pub fn public_key(&self) -> &RsaPublicComponents {
        &self.public_key
    }

    /// Signing key.
    #[must_use]
    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    /// Verification key matching [`encoding_key`](Self::encoding_key).
    #[must_use]
    pub fn decoding_key(&self) -> DecodingKey {
        self.public_key.decoding_key()
    }

    /// Lowercase hex SHA-256 of the leaf certificate.
    #[must_use]
    pub fn fingerprint_sha256(&self) -> String {
        Sha256::digest(self.certificate_der())
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// Public half as an RS256 signing JWK under `kid`.
    #[must_use]
    pub fn public_jwk(&self, kid: &str) -> Value {
        let thumbprint = URL_SAFE_NO_PAD.encode(Sha256::digest(self.certificate_der()));
        json!({
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": kid,
            "n": self.public_key.n(),
            "e": self.public_key.e(),
            "x5c": self.x5c(),
            "x5t#S256": thumbprint
        })
    }

    /// Sign a throwaway token and verify it against the leaf key.
    fn ensure_key_pair(&self) -> Result<(), CertificateError> {
        let probe = jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &json!({ "sub": "key-pair-probe" }),
            &self.encoding_key,
        )
        .map_err(|e| CertificateError::UnsupportedKey(format!("private key cannot sign RS256: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        jsonwebtoken::decode::<Value>(&probe, &self.decoding_key(), &validation)
            .map(|_| ())
            .map_err(|_| CertificateError::KeyMismatch)
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("alias", &self.alias)
            .field("subject", &self.subject)
            .field("chain_len", &self.chain.len())
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Loads credential bundles from PKCS#12 keystores.
pub struct CertificateStore;

impl CertificateStore {
    /// Read and decrypt the keystore at `path`.
    pub fn load(path: impl AsRef<Path>, passphrase: &str) -> Result<CredentialBundle, CertificateError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| CertificateError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let bundle = Self::from_pkcs12(&data, passphrase).inspect_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to load credential bundle");
        })?;

        info!(
            path = %path.display(),
            alias = %bundle.alias(),
            subject = %bundle.subject(),
            fingerprint = %bundle.fingerprint_sha256(),
            "Loaded credential bundle"
        );
        Ok(bundle)
    }

    /// Decrypt an in-memory PKCS#12 keystore and take its first private-key
    /// entry.
    pub fn from_pkcs12(data: &[u8], passphrase: &str) -> Result<CredentialBundle, CertificateError> {
        let keystore = KeyStore::from_pkcs12(data, passphrase)
            .map_err(|e| CertificateError::Decrypt(e.to_string()))?;
        let (alias, entry) = keystore
            .private_key_chain()
            .ok_or(CertificateError::NoPrivateKey)?;

        let chain: Vec<Vec<u8>> = entry
            .chain()
            .iter()
            .map(|cert| cert.as_der().to_vec())
            .collect();

        CredentialBundle::from_parts(alias, entry.key(), chain)
    }
}

fn parse_leaf(der: &[u8]) -> Result<(String, RsaPublicComponents), CertificateError> {
    let (_, cert) = parse_x509_certificate(der)
        .map_err(|e| CertificateError::InvalidCertificate(e.to_string()))?;

    if !cert.validity().is_valid() {
        warn!(subject = %cert.subject(), "Certificate is outside its validity period");
    }

    let parsed = cert
        .public_key()
        .parsed()
        .map_err(|e| CertificateError::InvalidCertificate(e.to_string()))?;
    let PublicKey::RSA(rsa) = parsed else {
        return Err(CertificateError::UnsupportedKey(
            "certificate public key is not RSA".to_string(),
        ));
    };

    let key = RsaPublicComponents {
        modulus: strip_leading_zeros(rsa.modulus).to_vec(),
        exponent: strip_leading_zeros(rsa.exponent).to_vec(),
    };
    Ok((cert.subject().to_string(), key))
}

fn rsa_private_key(pkcs8_der: &[u8]) -> Result<&[u8], CertificateError> {
    let info = PrivateKeyInfo::try_from(pkcs8_der)
        .map_err(|e| CertificateError::UnsupportedKey(format!("private key is not PKCS#8: {e}")))?;

    if info.algorithm.oid != RSA_ENCRYPTION {
        return Err(CertificateError::UnsupportedKey(format!(
            "private key algorithm {} is not RSA",
            info.algorithm.oid
        )));
    }
    Ok(info.private_key)
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}
