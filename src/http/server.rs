//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::service::{build_router, AppState};
use crate::config::SelfSyncConfig;
use crate::error::{Result, SelfSyncError};
use crate::ratelimit::{LimiterRegistry, WindowStore};

/// HTTP server for the project and admin routes.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Handler state, holding the registered limiters
    state: AppState,
    /// Shared window store, swept periodically when configured
    store: Arc<WindowStore>,
    /// How often to purge expired windows
    sweep_interval: Option<Duration>,
}

impl HttpServer {
    /// Create a new server, registering the configured limits with `registry`.
    pub fn new(config: &SelfSyncConfig, registry: &LimiterRegistry) -> Result<Self> {
        Ok(Self {
            addr: config.server.http_addr,
            state: AppState::new(registry, config)?,
            store: registry.store().clone(),
            sweep_interval: config.rate_limiting.sweep_interval(),
        })
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        let app = build_router(self.state);
        let sweeper = self.sweep_interval.map(|every| spawn_sweeper(self.store, every));

        info!(addr = %self.addr, "Starting HTTP server");

        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            SelfSyncError::Io(e)
        });

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        result
    }
}

/// Periodically drop expired windows so idle keys do not accumulate.
fn spawn_sweeper(store: Arc<WindowStore>, every: Duration) -> JoinHandle<()> {
    debug!(interval_secs = every.as_secs(), "Starting expired window sweeper");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            store.purge_expired();
        }
    })
}
