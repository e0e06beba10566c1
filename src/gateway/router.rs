//! HTTP router

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, Uri},
    middleware,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::auth::{
    AuthGate, HttpKeySetSource, KeyResolver, KeySetSource, TokenValidator, auth_middleware,
};
use crate::config::Config;
use crate::udap::{DiscoveryService, discovery_handler};
use crate::Result;

/// Shared components, built once and used by every request.
pub struct AppState {
    /// Signing-key cache for bearer tokens
    pub key_resolver: Arc<KeyResolver>,
    /// Request authorization gate
    pub gate: Arc<AuthGate>,
    /// Discovery document service
    pub discovery: Arc<DiscoveryService>,
}

impl AppState {
    /// Wire the components from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client for the key set cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let source = HttpKeySetSource::new(
            config.auth.jwks_url(),
            config.auth.fetch_timeout,
            config.auth.require_https,
        )?;
        Ok(Self::with_key_source(config, Arc::new(source)))
    }

    /// Wire the components around an existing key-set source.
    pub fn with_key_source(config: &Config, source: Arc<dyn KeySetSource>) -> Self {
        let key_resolver = Arc::new(
            KeyResolver::new(source)
                .with_fetch_timeout(config.auth.fetch_timeout)
                .with_cache_ttl(config.auth.cache_ttl),
        );
        let validator = Arc::new(
            TokenValidator::new(Arc::clone(&key_resolver)).with_clock_skew(config.auth.clock_skew),
        );
        // The discovery document must stay reachable wherever it is mounted.
        let public_paths = config
            .auth
            .public_paths
            .iter()
            .cloned()
            .chain(std::iter::once(config.discovery.path.clone()));
        let gate = Arc::new(AuthGate::new(validator, config.auth.issuer.clone(), public_paths));
        let discovery = Arc::new(DiscoveryService::new(
            config.discovery.clone(),
            config.keystore.clone(),
        ));

        Self {
            key_resolver,
            gate,
            discovery,
        }
    }
}

/// Create the router: health, discovery and the caller's `downstream`
/// routes, all behind the auth gate.
pub fn create_router(state: Arc<AppState>, downstream: Router) -> Router {
    let gate = Arc::clone(&state.gate);
    let discovery = Router::new()
        .route(state.discovery.path(), get(discovery_handler))
        .with_state(Arc::clone(&state.discovery));

    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
        .merge(discovery)
        .merge(downstream)
        // Authentication middleware (applied before other layers)
        .layer(middleware::from_fn_with_state(gate, auth_middleware))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "cached_keys": state.key_resolver.cached_key_ids().len()
    }))
}

/// JSON 404 for unknown paths.
pub async fn not_found_handler(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "not_found",
            "path": uri.path()
        })),
    )
}
