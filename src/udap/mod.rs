//! UDAP trust material and discovery metadata.
//!
//! - [`CertificateStore`] loads the gateway's PKCS#12 credential bundle
//! - [`MetadataSigner`] issues the `signed_metadata` JWT
//! - [`DiscoveryService`] serves the discovery document

pub mod cert_store;
pub mod handler;
pub mod keystore;
pub mod metadata;
pub mod signer;

pub use cert_store::{CertificateError, CertificateStore, CredentialBundle, RsaPublicComponents};
pub use handler::{DiscoveryService, discovery_handler};
pub use keystore::{GeneratedKeystore, KeystoreGenerator, KeystoreParams};
pub use metadata::DiscoveryDocument;
pub use signer::{
    DiscoveryClaims, MetadataError, MetadataSigner, SignedMetadataClaims, embedded_certificate,
    verify_signed_metadata,
};
