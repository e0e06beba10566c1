//! RS256 bearer-token validation against the trusted issuer's key set.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. structure (three base64url segments, JSON header and payload)
//! 2. issuer equality, before any key work
//! 3. signing-key resolution by `kid`
//! 4. RS256 signature
//! 5. `exp` / `iat` / `nbf` within the clock-skew window
//!
//! The ordering is observable: a token that is both mis-issued and badly
//! signed is reported as an issuer mismatch.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::error::{AuthError, KeyResolutionError};
use super::key_resolver::{KeyResolver, SigningKey};

/// Default tolerance applied to temporal claims.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Claims of a token that passed every check.
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedClaims {
    /// `kid` of the key that verified the signature.
    pub key_id: String,
    /// `iss` claim (equal to the trusted issuer).
    pub issuer: String,
    /// `sub` claim, if present.
    pub subject: Option<String>,
    /// `exp` claim, seconds since the epoch.
    pub expires_at: i64,
    /// `iat` claim, if present.
    pub issued_at: Option<i64>,
    /// Full decoded payload, unchanged.
    pub claims: Map<String, Value>,
}

impl VerifiedClaims {
    /// Look up an arbitrary claim.
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Space-delimited `scope` claim split into individual scopes.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.claims
            .get("scope")
            .and_then(Value::as_str)
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// `exp` as a timestamp.
    #[must_use]
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expires_at, 0)
    }
}

#[derive(Debug, Deserialize)]
struct TokenHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

struct UnverifiedToken {
    header: TokenHeader,
    payload: Map<String, Value>,
}

/// Validates RS256 bearer tokens using a shared [`KeyResolver`].
pub struct TokenValidator {
    resolver: Arc<KeyResolver>,
    clock_skew: Duration,
}

impl TokenValidator {
    /// Create a validator with the default clock skew.
    #[must_use]
    pub fn new(resolver: Arc<KeyResolver>) -> Self {
        Self {
            resolver,
            clock_skew: DEFAULT_CLOCK_SKEW,
        }
    }

    /// Tolerance for `exp`, `iat` and `nbf`.
    #[must_use]
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// The resolver backing this validator.
    #[must_use]
    pub fn resolver(&self) -> &Arc<KeyResolver> {
        &self.resolver
    }

    /// Validate `raw_token` as issued by `expected_issuer`.
    ///
    /// # Errors
    ///
    /// The first failing check, as an [`AuthError`].
    pub async fn validate(
        &self,
        raw_token: &str,
        expected_issuer: &str,
    ) -> Result<VerifiedClaims, AuthError> {
        let token = parse_unverified(raw_token)?;

        let actual = token
            .payload
            .get("iss")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if actual != expected_issuer {
            return Err(AuthError::IssuerMismatch {
                expected: expected_issuer.to_string(),
                actual: actual.to_string(),
            });
        }

        let kid = token
            .header
            .kid
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(KeyResolutionError::MissingKeyId)?;
        let key = self.resolver.resolve(kid).await?;

        if token.header.alg != "RS256" {
            return Err(AuthError::SignatureInvalid(format!(
                "algorithm '{}' is not permitted",
                token.header.alg
            )));
        }
        let claims = verify_signature(raw_token, &key)?;

        let now = Utc::now().timestamp();
        let skew = i64::try_from(self.clock_skew.as_secs()).unwrap_or(i64::MAX);
        let expires_at = check_temporal_claims(&claims, now, skew)?;

        debug!(kid = %kid, sub = ?claims.get("sub"), "Bearer token verified");

        Ok(VerifiedClaims {
            key_id: kid.to_string(),
            issuer: actual.to_string(),
            subject: claims.get("sub").and_then(Value::as_str).map(str::to_string),
            expires_at,
            issued_at: timestamp_claim(&claims, "iat"),
            claims,
        })
    }
}

fn parse_unverified(raw: &str) -> Result<UnverifiedToken, AuthError> {
    let segments: Vec<&str> = raw.split('.').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(AuthError::MalformedToken(
            "expected three non-empty dot-separated segments".to_string(),
        ));
    }

    Ok(UnverifiedToken {
        header: decode_segment(segments[0], "header")?,
        payload: decode_segment(segments[1], "payload")?,
    })
}

fn decode_segment<T: DeserializeOwned>(segment: &str, part: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| AuthError::MalformedToken(format!("{part} is not valid base64url")))?;
    serde_json::from_slice(&bytes)
        .map_err(|_| AuthError::MalformedToken(format!("{part} is not a valid JSON object")))
}

fn verify_signature(raw: &str, key: &SigningKey) -> Result<Map<String, Value>, AuthError> {
    // Temporal claims are checked separately with our own skew and messages.
    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    jsonwebtoken::decode::<Map<String, Value>>(raw, key.decoding_key(), &validation)
        .map(|data| data.claims)
        .map_err(|e| AuthError::SignatureInvalid(e.to_string()))
}

#[allow(clippy::cast_possible_truncation)]
fn timestamp_claim(claims: &Map<String, Value>, name: &str) -> Option<i64> {
    let value = claims.get(name)?;
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

/// Returns `exp` on success.
fn check_temporal_claims(
    claims: &Map<String, Value>,
    now: i64,
    skew: i64,
) -> Result<i64, AuthError> {
    let exp = timestamp_claim(claims, "exp")
        .ok_or_else(|| AuthError::TokenExpired("token has no 'exp' claim".to_string()))?;
    if exp <= now.saturating_sub(skew) {
        return Err(AuthError::TokenExpired(format!("token expired at {exp}")));
    }

    if let Some(iat) = timestamp_claim(claims, "iat") {
        if iat > now.saturating_add(skew) {
            return Err(AuthError::TokenExpired(format!(
                "token issued in the future ({iat})"
            )));
        }
    }

    if let Some(nbf) = timestamp_claim(claims, "nbf") {
        if nbf > now.saturating_add(skew) {
            return Err(AuthError::TokenExpired(format!(
                "token not valid before {nbf}"
            )));
        }
    }

    Ok(exp)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::auth::key_resolver::KeySetSource;
    use crate::testutil::{self, ISSUER, StaticKeySource};

    fn validator_for(source: &Arc<StaticKeySource>) -> TokenValidator {
        let resolver = KeyResolver::new(Arc::clone(source) as Arc<dyn KeySetSource>);
        TokenValidator::new(Arc::new(resolver))
    }

    fn trusted_source() -> Arc<StaticKeySource> {
        StaticKeySource::new(testutil::key_set(&[(testutil::trusted_bundle(), "k1")]))
    }

    // ─── Happy path ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn valid_token_yields_its_claims() {
        // GIVEN: a correctly signed token from the trusted issuer
        let payload = testutil::valid_claims();
        let token = testutil::mint(testutil::trusted_bundle(), "k1", &payload);
        let validator = validator_for(&trusted_source());

        // WHEN: validated
        let verified = validator.validate(&token, ISSUER).await.unwrap();

        // THEN: the claims are the payload, unchanged
        assert_eq!(Value::Object(verified.claims.clone()), payload);
        assert_eq!(verified.key_id, "k1");
        assert_eq!(verified.issuer, ISSUER);
        assert_eq!(verified.subject.as_deref(), Some("client-123"));
        assert_eq!(verified.scopes(), vec!["system/*.read"]);
        assert!(verified.expiry().is_some());
        assert_eq!(verified.issued_at, payload["iat"].as_i64());
    }

    // ─── Structure ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn garbage_is_malformed() {
        let validator = validator_for(&trusted_source());

        for raw in ["not-a-jwt", "a.b", "a..c", "a.b.c.d", "!!!.???.***"] {
            let err = validator.validate(raw, ISSUER).await.unwrap_err();
            assert!(
                matches!(err, AuthError::MalformedToken(_)),
                "{raw}: {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn non_json_payload_is_malformed() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","kid":"k1"}"#);
        let payload = URL_SAFE_NO_PAD.encode(b"plain text");
        let raw = format!("{header}.{payload}.c2ln");

        let err = validator_for(&trusted_source())
            .validate(&raw, ISSUER)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::MalformedToken(_)));
    }

    // ─── Issuer ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn wrong_issuer_is_rejected_before_any_key_fetch() {
        // GIVEN: a token from another issuer
        let mut payload = testutil::valid_claims();
        payload["iss"] = json!("https://evil.example");
        let token = testutil::mint(testutil::trusted_bundle(), "k1", &payload);
        let source = trusted_source();
        let validator = validator_for(&source);

        // WHEN: validated
        let err = validator.validate(&token, ISSUER).await.unwrap_err();

        // THEN: issuer mismatch, and the key set was never touched
        assert_eq!(
            err,
            AuthError::IssuerMismatch {
                expected: ISSUER.to_string(),
                actual: "https://evil.example".to_string(),
            }
        );
        assert_eq!(source.fetches(), 0);
    }

    #[tokio::test]
    async fn missing_issuer_is_a_mismatch() {
        let mut payload = testutil::valid_claims();
        payload.as_object_mut().unwrap().remove("iss");
        let token = testutil::mint(testutil::trusted_bundle(), "k1", &payload);

        let err = validator_for(&trusted_source())
            .validate(&token, ISSUER)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "issuer_mismatch");
    }

    #[tokio::test]
    async fn issuer_comparison_is_exact() {
        let mut payload = testutil::valid_claims();
        payload["iss"] = json!(format!("{ISSUER}/"));
        let token = testutil::mint(testutil::trusted_bundle(), "k1", &payload);

        let err = validator_for(&trusted_source())
            .validate(&token, ISSUER)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "issuer_mismatch");
    }

    // ─── Key resolution ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn missing_kid_is_a_key_resolution_failure() {
        let token = testutil::mint_without_kid(testutil::trusted_bundle(), &testutil::valid_claims());

        let err = validator_for(&trusted_source())
            .validate(&token, ISSUER)
            .await
            .unwrap_err();

        assert_eq!(err, AuthError::KeyResolution(KeyResolutionError::MissingKeyId));
    }

    #[tokio::test]
    async fn unknown_kid_is_a_key_resolution_failure() {
        let token = testutil::mint(testutil::trusted_bundle(), "rotated-away", &testutil::valid_claims());

        let err = validator_for(&trusted_source())
            .validate(&token, ISSUER)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AuthError::KeyResolution(KeyResolutionError::UnknownKeyId(
                "rotated-away".to_string()
            ))
        );
    }

    // ─── Signature ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn token_signed_by_another_key_is_rejected() {
        // GIVEN: a token claiming kid k1 but signed with an unrelated key
        let token = testutil::mint(testutil::untrusted_bundle(), "k1", &testutil::valid_claims());

        // WHEN: validated
        let err = validator_for(&trusted_source())
            .validate(&token, ISSUER)
            .await
            .unwrap_err();

        // THEN: signature failure
        assert!(matches!(err, AuthError::SignatureInvalid(_)), "{err:?}");
    }

    #[tokio::test]
    async fn tampered_payload_is_rejected() {
        let token = testutil::mint(testutil::trusted_bundle(), "k1", &testutil::valid_claims());
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        let mut forged = testutil::valid_claims();
        forged["sub"] = json!("admin");
        parts[1] = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let forged_token = parts.join(".");

        let err = validator_for(&trusted_source())
            .validate(&forged_token, ISSUER)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::SignatureInvalid(_)));
    }

    #[tokio::test]
    async fn alg_none_is_rejected() {
        // GIVEN: an unsigned token that otherwise looks valid
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","kid":"k1","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&testutil::valid_claims()).unwrap());
        let raw = format!("{header}.{payload}.c2ln");

        // WHEN: validated
        let err = validator_for(&trusted_source())
            .validate(&raw, ISSUER)
            .await
            .unwrap_err();

        // THEN: the algorithm is refused
        assert!(matches!(err, AuthError::SignatureInvalid(ref m) if m.contains("none")));
    }

    #[tokio::test]
    async fn hs256_is_rejected() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","kid":"k1","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&testutil::valid_claims()).unwrap());
        let raw = format!("{header}.{payload}.c2ln");

        let err = validator_for(&trusted_source())
            .validate(&raw, ISSUER)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::SignatureInvalid(_)));
    }

    // ─── Temporal claims ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let mut payload = testutil::valid_claims();
        let now = Utc::now().timestamp();
        payload["iat"] = json!(now - 7200);
        payload["exp"] = json!(now - 3600);
        let token = testutil::mint(testutil::trusted_bundle(), "k1", &payload);

        let err = validator_for(&trusted_source())
            .validate(&token, ISSUER)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::TokenExpired(_)));
    }

    #[tokio::test]
    async fn token_without_exp_is_rejected() {
        let mut payload = testutil::valid_claims();
        payload.as_object_mut().unwrap().remove("exp");
        let token = testutil::mint(testutil::trusted_bundle(), "k1", &payload);

        let err = validator_for(&trusted_source())
            .validate(&token, ISSUER)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::TokenExpired(_)));
    }

    #[test]
    fn clock_skew_is_tolerated() {
        let now = 1_000_000;
        let claims = |exp: i64, iat: i64| {
            json!({ "exp": exp, "iat": iat })
                .as_object()
                .cloned()
                .unwrap()
        };

        // Expired 30s ago, within a 60s skew
        assert_eq!(check_temporal_claims(&claims(now - 30, now - 600), now, 60), Ok(now - 30));
        // Expired 61s ago
        assert!(check_temporal_claims(&claims(now - 61, now - 600), now, 60).is_err());
        // Issued 30s in the future, within skew
        assert!(check_temporal_claims(&claims(now + 600, now + 30), now, 60).is_ok());
        // Issued two minutes in the future
        assert!(check_temporal_claims(&claims(now + 600, now + 120), now, 60).is_err());
    }

    #[test]
    fn not_before_in_the_future_is_rejected() {
        let now = 1_000_000;
        let claims = json!({ "exp": now + 600, "nbf": now + 300 })
            .as_object()
            .cloned()
            .unwrap();

        let err = check_temporal_claims(&claims, now, 60).unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired(ref m) if m.contains("not valid before")));
    }
}
