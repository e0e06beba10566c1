//! Bearer-token failure taxonomy.
//!
//! Every variant of [`AuthError`] becomes an HTTP 401 at the gate. The
//! variants stay distinct so logs (and tests) can tell an issuer mismatch from
//! a bad signature or an unreachable key-set endpoint.

use std::time::Duration;

use thiserror::Error;

/// Failure to obtain a verification key for a token.
///
/// `Clone` so a single key-set refresh outcome can be handed to every caller
/// that was waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyResolutionError {
    /// The token header carries no `kid`.
    #[error("token header has no 'kid'")]
    MissingKeyId,

    /// The key set was fetched but does not contain this `kid`.
    #[error("unknown key identifier: {0}")]
    UnknownKeyId(String),

    /// The key-set endpoint could not be reached or answered with an error.
    #[error("key set fetch from {url} failed: {reason}")]
    Unavailable {
        /// Key-set URL.
        url: String,
        /// Transport or HTTP status detail.
        reason: String,
    },

    /// The key-set fetch did not finish in time.
    #[error("key set fetch from {url} timed out after {timeout:?}")]
    Timeout {
        /// Key-set URL.
        url: String,
        /// Configured fetch timeout.
        timeout: Duration,
    },

    /// The key-set document could not be parsed.
    #[error("key set from {url} is invalid: {reason}")]
    InvalidKeySet {
        /// Key-set URL.
        url: String,
        /// Parse failure detail.
        reason: String,
    },
}

impl KeyResolutionError {
    /// `true` when the failure came from the network rather than the token.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }

    /// Short machine-readable reason used as a log field.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingKeyId => "missing_kid",
            Self::UnknownKeyId(_) => "unknown_kid",
            Self::Unavailable { .. } => "unavailable",
            Self::Timeout { .. } => "timeout",
            Self::InvalidKeySet { .. } => "invalid_key_set",
        }
    }
}

/// Reason a bearer token (or the request carrying it) was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No usable `Authorization: Bearer` header.
    #[error("Missing or invalid Authorization header")]
    MissingCredentials,

    /// Not three non-empty segments, or header/payload not base64url JSON.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// The `iss` claim is not the trusted issuer.
    #[error("Invalid issuer: expected \"{expected}\" but received \"{actual}\"")]
    IssuerMismatch {
        /// Configured trusted issuer.
        expected: String,
        /// Issuer found in the token (empty when absent).
        actual: String,
    },

    /// No verification key could be obtained for the token's `kid`.
    #[error("Key resolution failed: {0}")]
    KeyResolution(#[from] KeyResolutionError),

    /// Signature did not verify, or the declared algorithm is not RS256.
    #[error("Token verification failed: {0}")]
    SignatureInvalid(String),

    /// `exp`, `iat` or `nbf` outside the accepted window.
    #[error("Token expired: {0}")]
    TokenExpired(String),
}

impl AuthError {
    /// Stable identifier for the failure kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "missing_credentials",
            Self::MalformedToken(_) => "malformed_token",
            Self::IssuerMismatch { .. } => "issuer_mismatch",
            Self::KeyResolution(_) => "key_resolution",
            Self::SignatureInvalid(_) => "signature_invalid",
            Self::TokenExpired(_) => "token_expired",
        }
    }

    /// Human-readable reason returned to the client.
    ///
    /// Network-level key resolution failures are described without the
    /// upstream URL or transport detail; those stay in the logs.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::KeyResolution(e) if e.is_network() => {
                "Key resolution failed: signing keys are temporarily unavailable".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_failures_are_distinguished_from_unknown_kid() {
        let unknown = KeyResolutionError::UnknownKeyId("k1".to_string());
        let down = KeyResolutionError::Unavailable {
            url: "https://idp.example/jwks".to_string(),
            reason: "connection refused".to_string(),
        };

        assert!(!unknown.is_network());
        assert!(down.is_network());
        assert_eq!(unknown.reason(), "unknown_kid");
        assert_eq!(down.reason(), "unavailable");
    }

    #[test]
    fn client_message_hides_upstream_detail() {
        let err = AuthError::from(KeyResolutionError::Timeout {
            url: "https://idp.internal/jwks".to_string(),
            timeout: Duration::from_secs(10),
        });

        let msg = err.client_message();
        assert!(!msg.contains("idp.internal"));
        assert!(msg.starts_with("Key resolution failed"));
    }

    #[test]
    fn client_message_keeps_token_level_reasons() {
        let err = AuthError::IssuerMismatch {
            expected: "https://a".to_string(),
            actual: "https://b".to_string(),
        };

        assert_eq!(
            err.client_message(),
            "Invalid issuer: expected \"https://a\" but received \"https://b\""
        );
        assert_eq!(err.kind(), "issuer_mismatch");
    }
}
