//! TLS interception orchestration for the veil relay.
//!
//! The [`tls::TlsLayer`] terminates TLS on both sides of a proxied
//! connection so higher layers can observe and modify traffic: it peeks at
//! the client's ClientHello without consuming it, decides the order of the
//! two handshakes, forges a certificate matching the upstream's identity,
//! and keeps ALPN coherent between both sides.
//!
//! Cryptography is delegated: concrete TLS engines and certificate stores
//! plug in through the traits in [`engine`] and [`certs`].

pub mod certs;
pub mod config;
pub mod engine;
pub mod error;
pub mod layer;
pub mod stream;
pub mod tls;

pub use certs::{CertBundle, CertStore, CertStoreError, CertificatePem, DhParams, PrivateKeyPem};
pub use config::ProxyConfig;
pub use engine::{
    AlpnSelect, ClientConnection, ClientTlsOptions, EngineError, EngineOptions, PeerCertificate,
    ServerConnection, ServerTlsOptions, TlsMethod, UpstreamAddr, VerificationError,
    VerificationMode,
};
pub use error::ProtocolError;
pub use layer::{Layer, LayerContext, NextLayer};
pub use stream::PeekableStream;
pub use tls::{SniOverride, TlsLayer};
