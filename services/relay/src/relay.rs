//! Passthrough relaying and per-connection plumbing.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use veil_proxy::{
    CertStore, Layer, LayerContext, ProtocolError, ProxyConfig, TlsLayer, UpstreamAddr,
};

use crate::engine::{RustlsClientConnection, RustlsServerConnection};

/// Terminal layer: moves bytes between the two (by now decrypted) sides
/// until either closes.
pub struct RelayLayer;

#[async_trait]
impl Layer for RelayLayer {
    async fn run(&mut self, ctx: &mut LayerContext) -> Result<(), ProtocolError> {
        if !ctx.server.connected() {
            ctx.server
                .connect()
                .await
                .map_err(|source| ProtocolError::Connection {
                    address: ctx.server.address().to_string(),
                    source,
                })?;
        }

        match tokio::io::copy_bidirectional(&mut *ctx.client, &mut *ctx.server).await {
            Ok((to_server, to_client)) => {
                debug!(to_server, to_client, "relay finished");
            }
            Err(e) => {
                // Connection teardown mid-stream is normal for a relay.
                debug!(error = %e, "relay ended with error");
            }
        }
        Ok(())
    }
}

/// Drive one accepted client socket through the interception stack and into
/// the passthrough relay.
pub async fn serve_connection(
    stream: TcpStream,
    upstream: UpstreamAddr,
    config: Arc<ProxyConfig>,
    certstore: Arc<dyn CertStore>,
    client_tls: bool,
    server_tls: bool,
) -> Result<(), ProtocolError> {
    let client = RustlsClientConnection::new(stream);
    let server = RustlsServerConnection::new(upstream);

    let mut ctx = LayerContext::new(Box::new(client), Box::new(server), config, certstore)
        .with_next_layer(Arc::new(|_ctx| Some(Box::new(RelayLayer) as Box<dyn Layer>)));

    TlsLayer::new(client_tls, server_tls).run(&mut ctx).await
}
