//! veil relay
//!
//! Terminates TLS on both sides of every accepted connection, forging the
//! client-facing certificate from the upstream's identity, then relays the
//! decrypted bytes.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use veil_relay::{init_crypto_provider, serve_connection, ForgingCertStore, RelayConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = RelayConfig::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to VEIL_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    init_crypto_provider();

    let certstore = Arc::new(ForgingCertStore::new().context("cannot generate proxy CA")?);
    if let Some(path) = &config.ca_out {
        std::fs::write(path, certstore.ca_pem())
            .with_context(|| format!("cannot write CA certificate to {}", path.display()))?;
        info!(path = %path.display(), "CA certificate written");
    }

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("cannot bind {}", config.listen_addr))?;
    let local_addr = listener.local_addr()?;

    info!(
        listen_addr = %local_addr,
        upstream = %config.upstream,
        client_tls = config.client_tls,
        server_tls = config.server_tls,
        "relay started"
    );

    let proxy_config = Arc::new(config.proxy.clone());
    let conn_semaphore = Arc::new(Semaphore::new(config.max_connections));

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "accept error");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                continue;
            }
        };

        let permit = match conn_semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(peer_addr = %peer_addr, "connection rejected: max connections reached");
                continue;
            }
        };

        let upstream = config.upstream.clone();
        let proxy_config = Arc::clone(&proxy_config);
        let certstore = Arc::clone(&certstore);
        let client_tls = config.client_tls;
        let server_tls = config.server_tls;

        tokio::spawn(
            async move {
                debug!("handling connection");
                if let Err(e) = serve_connection(
                    stream,
                    upstream,
                    proxy_config,
                    certstore,
                    client_tls,
                    server_tls,
                )
                .await
                {
                    warn!(error = %e, "connection failed");
                }
                drop(permit);
            }
            .instrument(tracing::info_span!("connection", peer = %peer_addr)),
        );
    }
}
