//! The seam between the orchestrator and a concrete TLS engine.
//!
//! The layer never performs cryptography itself. It drives the two sides of
//! the interception through [`ClientConnection`] and [`ServerConnection`]
//! and reports whatever verdicts the engine hands back. The version and
//! option tokens are forwarded opaquely; an engine is free to ignore the
//! ones it has no equivalent for.

use std::fmt;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use veil_tls::Peek;

use crate::certs::{CertificatePem, DhParams, PrivateKeyPem};

/// Protocol-version token passed through to the TLS engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMethod {
    /// Negotiate the highest version both sides support.
    #[default]
    Flexible,
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

/// Engine-defined option bits. Opaque to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineOptions(pub u64);

/// Upstream certificate verification mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerificationMode {
    /// Handshake regardless of the chain verdict; failures are reported
    /// through [`ServerConnection::verification_error`].
    #[default]
    None,
    /// Fail the handshake on an unverifiable chain.
    Peer,
}

/// Failures reported by a TLS engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Generic handshake failure.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// The peer certificate failed verification in fatal mode.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Transport-level failure during the handshake.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Non-fatal chain verification failure recorded during a permissive
/// upstream handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationError {
    /// Chain depth at which verification failed (0 = leaf).
    pub depth: u32,
    /// Engine-specific error code.
    pub errno: i32,
}

/// Identity fields of the upstream leaf certificate, as far as the forged
/// certificate needs them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerCertificate {
    pub common_name: Option<String>,
    pub altnames: Vec<String>,
}

/// Callback choosing the ALPN protocol offered back to the client, given
/// the client's advertised list. Returns `None` only for an empty list.
pub type AlpnSelect = Box<dyn Fn(&[Vec<u8>]) -> Option<Vec<u8>> + Send + Sync>;

/// Everything the client-facing engine needs to terminate TLS.
pub struct ClientTlsOptions {
    pub cert: CertificatePem,
    pub key: PrivateKeyPem,
    pub chain_file: Option<PathBuf>,
    pub method: TlsMethod,
    pub options: EngineOptions,
    pub cipher_list: Option<String>,
    pub dhparams: Option<DhParams>,
    pub alpn_select: AlpnSelect,
}

impl fmt::Debug for ClientTlsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTlsOptions")
            .field("chain_file", &self.chain_file)
            .field("method", &self.method)
            .field("options", &self.options)
            .field("cipher_list", &self.cipher_list)
            .finish_non_exhaustive()
    }
}

/// Everything the server-facing engine needs to handshake upstream.
#[derive(Debug, Clone)]
pub struct ServerTlsOptions {
    /// Client certificate material for mutual TLS.
    pub client_certs: Option<PathBuf>,
    pub sni: Option<String>,
    pub method: TlsMethod,
    pub options: EngineOptions,
    pub verify: VerificationMode,
    pub ca_dir: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    /// OpenSSL-syntax cipher list; engines without an equivalent ignore it.
    pub cipher_list: Option<String>,
    /// `None` forwards no ALPN extension at all.
    pub alpn_protocols: Option<Vec<Vec<u8>>>,
}

/// Upstream endpoint as host plus port. The host may be a DNS name or an
/// IP literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpstreamAddr {
    pub host: String,
    pub port: u16,
}

impl UpstreamAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for UpstreamAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The client half of a proxied connection.
///
/// Starts as a plain TCP stream with buffered-peek access to the client's
/// opening bytes; [`convert_to_tls`](Self::convert_to_tls) replaces the
/// transport with a TLS session in place. Reads and writes always address
/// the current (innermost) transport.
#[async_trait]
pub trait ClientConnection: Peek + AsyncRead + AsyncWrite + Unpin + Send + Sync {
    /// Run the client-facing handshake over the buffered stream.
    async fn convert_to_tls(&mut self, options: ClientTlsOptions) -> Result<(), EngineError>;

    fn tls_established(&self) -> bool;
}

/// The upstream half of a proxied connection.
#[async_trait]
pub trait ServerConnection: AsyncRead + AsyncWrite + Unpin + Send + Sync {
    fn address(&self) -> &UpstreamAddr;

    /// Redirect to a different endpoint, dropping any existing connection.
    fn set_address(&mut self, address: UpstreamAddr);

    fn connected(&self) -> bool;

    /// Establish the TCP connection to [`address`](Self::address).
    async fn connect(&mut self) -> io::Result<()>;

    fn tls_established(&self) -> bool;

    /// Run the server-facing handshake on the established connection.
    async fn establish_tls(&mut self, options: ServerTlsOptions) -> Result<(), EngineError>;

    /// The upstream certificate's identity, once TLS is established.
    fn peer_certificate(&self) -> Option<PeerCertificate>;

    /// Non-fatal verification verdict from the last handshake.
    fn verification_error(&self) -> Option<VerificationError>;

    /// ALPN protocol the upstream selected, if any.
    fn negotiated_alpn(&self) -> Option<Vec<u8>>;
}
