//! UDAP Gateway Library
//!
//! Resource-server side of UDAP (Unified Data Access Profiles) for a FHIR
//! server.
//!
//! # Features
//!
//! - **Bearer token validation**: RS256 JWTs from one trusted issuer, verified
//!   against its JWKS
//! - **Key caching**: a shared key set, refreshed with a single in-flight fetch
//! - **Signed discovery**: `/.well-known/udap` with `signed_metadata` signed by
//!   the gateway's PKCS#12 credentials and carrying its `x5c` chain
//! - **Auth gate**: axum middleware with exact-match public paths

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod udap;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(format!("tracing already initialised: {e}")))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(format!("tracing already initialised: {e}")))?,
    }

    Ok(())
}
