//! Layer composition.
//!
//! A proxied connection is handled by a stack of layers built one at a
//! time: each layer does its work against the shared [`LayerContext`] and
//! then asks the context's `next_layer` factory what comes next. The
//! context owns the connection pair; layers are plain values on top of it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::certs::CertStore;
use crate::config::ProxyConfig;
use crate::engine::{ClientConnection, ServerConnection};
use crate::error::ProtocolError;

/// One stage of the per-connection protocol stack.
#[async_trait]
pub trait Layer: Send {
    async fn run(&mut self, ctx: &mut LayerContext) -> Result<(), ProtocolError>;
}

/// Factory producing the layer that follows the current one, or `None` when
/// the stack ends here.
pub type NextLayer = Arc<dyn Fn(&LayerContext) -> Option<Box<dyn Layer>> + Send + Sync>;

/// Everything a layer can see and act on for one proxied connection.
pub struct LayerContext {
    pub client: Box<dyn ClientConnection>,
    pub server: Box<dyn ServerConnection>,
    pub config: Arc<ProxyConfig>,
    pub certstore: Arc<dyn CertStore>,
    next_layer: Option<NextLayer>,
}

impl LayerContext {
    pub fn new(
        client: Box<dyn ClientConnection>,
        server: Box<dyn ServerConnection>,
        config: Arc<ProxyConfig>,
        certstore: Arc<dyn CertStore>,
    ) -> Self {
        Self {
            client,
            server,
            config,
            certstore,
            next_layer: None,
        }
    }

    /// Install the factory consulted when a layer completes.
    pub fn with_next_layer(mut self, next_layer: NextLayer) -> Self {
        self.next_layer = Some(next_layer);
        self
    }

    /// Produce the next layer for the current connection state.
    pub fn next_layer(&self) -> Option<Box<dyn Layer>> {
        self.next_layer.as_ref().and_then(|factory| factory(self))
    }
}
