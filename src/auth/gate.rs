//! Request-level authorization gate.
//!
//! Public paths pass untouched; everything else needs a valid
//! `Authorization: Bearer <token>` from the trusted issuer.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, warn};

use super::error::AuthError;
use super::validator::{TokenValidator, VerifiedClaims};

/// Paths that skip authentication unless configured otherwise.
pub const DEFAULT_PUBLIC_PATHS: &[&str] = &["/health", "/fhir/metadata", "/fhir/.well-known/udap"];

/// Outcome of a successful gate check.
#[derive(Debug, Clone)]
pub enum Passage {
    /// The path needs no credentials.
    Public,
    /// The bearer token was verified.
    Authenticated(VerifiedClaims),
}

/// Decides whether a request may reach the downstream handler.
pub struct AuthGate {
    validator: Arc<TokenValidator>,
    issuer: String,
    public_paths: HashSet<String>,
}

impl AuthGate {
    /// Create a gate that trusts `issuer` and exempts `public_paths`
    /// (exact match).
    pub fn new(
        validator: Arc<TokenValidator>,
        issuer: impl Into<String>,
        public_paths: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            validator,
            issuer: issuer.into(),
            public_paths: public_paths.into_iter().collect(),
        }
    }

    /// Trusted issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Check if a path is exempt from authentication.
    #[must_use]
    pub fn is_public_path(&self, path: &str) -> bool {
        self.public_paths.contains(path)
    }

    /// Admit or reject a request for `path` carrying `authorization`.
    ///
    /// # Errors
    ///
    /// [`AuthError::MissingCredentials`] without a usable bearer header,
    /// otherwise the validator's failure.
    pub async fn check(&self, path: &str, authorization: Option<&str>) -> Result<Passage, AuthError> {
        if self.is_public_path(path) {
            return Ok(Passage::Public);
        }

        let token = extract_bearer(authorization).ok_or(AuthError::MissingCredentials)?;
        let claims = self.validator.validate(token, &self.issuer).await?;
        Ok(Passage::Authenticated(claims))
    }
}

/// Extract the token from an `Authorization` header value.
///
/// The scheme is matched case-insensitively; an empty token yields `None`.
#[must_use]
pub fn extract_bearer(value: Option<&str>) -> Option<&str> {
    let (scheme, token) = value?.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Axum middleware applying the [`AuthGate`].
///
/// Verified claims are inserted into the request extensions for downstream
/// handlers.
pub async fn auth_middleware(
    State(gate): State<Arc<AuthGate>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let outcome = gate.check(&path, authorization.as_deref()).await;
    match outcome {
        Ok(Passage::Public) => {
            debug!(path = %path, "Public path, skipping auth");
            next.run(request).await
        }
        Ok(Passage::Authenticated(claims)) => {
            debug!(path = %path, sub = ?claims.subject, "Request authenticated");
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => {
            log_rejection(&path, &e);
            unauthorized_response(&e)
        }
    }
}

fn log_rejection(path: &str, error: &AuthError) {
    match error {
        AuthError::KeyResolution(e) => warn!(
            path = %path,
            reason = e.reason(),
            error = %e,
            "Signing key resolution failed"
        ),
        other => warn!(path = %path, kind = other.kind(), error = %other, "Bearer token rejected"),
    }
}

/// 401 response for a rejected request.
pub fn unauthorized_response(error: &AuthError) -> Response {
    let (challenge, code) = match error {
        AuthError::MissingCredentials => ("Bearer", "invalid_request"),
        _ => ("Bearer error=\"invalid_token\"", "invalid_token"),
    };

    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge)],
        Json(json!({
            "error": code,
            "error_description": error.client_message()
        })),
    )
        .into_response()
}
