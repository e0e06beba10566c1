//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::router::{AppState, create_router, not_found_handler};
use crate::config::Config;
use crate::{Error, Result};

/// UDAP resource-server gateway
pub struct Gateway {
    config: Config,
    state: Arc<AppState>,
}

impl Gateway {
    /// Build the shared components and, when configured, load the credential
    /// bundle eagerly so a broken keystore fails startup.
    pub async fn new(config: Config) -> Result<Self> {
        let state = Arc::new(AppState::from_config(&config)?);

        if config.keystore.load_on_startup {
            let bundle = state.discovery.credentials().await?;
            info!(alias = %bundle.alias(), subject = %bundle.subject(), "Credential bundle ready");
        }

        Ok(Self { config, state })
    }

    /// Shared components.
    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Serve until Ctrl-C or SIGTERM.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let downstream = Router::new().fallback(not_found_handler);
        let app = create_router(Arc::clone(&self.state), downstream);

        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("UDAP GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(issuer = %self.config.auth.issuer, jwks = %self.state.key_resolver.location(), "Trusted issuer");
        info!(
            "  GET  http://{}:{}{}  (UDAP discovery)",
            self.config.server.host,
            self.config.server.port,
            self.state.discovery.path()
        );
        info!(public_paths = ?self.config.auth.public_paths, "Unauthenticated paths");
        if !self.config.auth.require_https {
            warn!("Plain-HTTP key set URLs are allowed (auth.require_https = false)");
        }
        info!("============================================================");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        self.state.key_resolver.invalidate();
        info!("Key cache cleared");

        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
