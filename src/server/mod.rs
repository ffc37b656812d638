pub mod api;

use crate::config::ServerConfig;
use crate::relay::Relay;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use log::{ info, error };

use self::api::{ create_router, AppState };

pub struct Server {
    config: ServerConfig,
    relay: Arc<Relay>,
}

impl Server {
    pub fn new(config: ServerConfig, relay: Arc<Relay>) -> Self {
        Self { config, relay }
    }

    pub fn router(&self) -> axum::Router {
        let state = AppState::new(
            self.relay.clone(),
            self.config.rate_limit_per_second,
            self.config.expose_error_details
        );
        create_router(state, self.config.max_body_bytes)
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr = self.config.addr.parse::<SocketAddr>()?;
        let app = self.router();

        if let Some(tls) = &self.config.tls {
            info!(
                "TLS enabled. Loading certificate from '{}' and key from '{}'",
                tls.cert_path,
                tls.key_path
            );
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
                &tls.cert_path,
                &tls.key_path
            ).await?;

            let handle = axum_server::Handle::new();
            let shutdown_handle = handle.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
            });

            info!("HTTPS server listening on: https://{}", addr);
            axum_server::bind_rustls(addr, tls_config).handle(handle).serve(app.into_make_service()).await?;
        } else {
            let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
                error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
                e
            })?;
            info!("HTTP server listening on: http://{}", addr);
            axum::serve(listener, app.into_make_service()).with_graceful_shutdown(shutdown_signal()).await?;
        }

        info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections");
}
