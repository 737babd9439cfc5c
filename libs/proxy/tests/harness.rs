//! Test harness for the TLS interception layer: scriptable in-memory
//! engines behind the connection traits, plus a recording certstore.

#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use veil_proxy::{
    CertBundle, CertStore, CertStoreError, CertificatePem, ClientConnection, ClientTlsOptions,
    DhParams, EngineError, LayerContext, PeerCertificate, PrivateKeyPem, ProxyConfig,
    ServerConnection, ServerTlsOptions, UpstreamAddr, VerificationError,
};
use veil_tls::Peek;

/// Ordered record of the engine invocations a scenario produced.
pub type EventLog = Arc<Mutex<Vec<&'static str>>>;

/// How a scripted handshake should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    Handshake,
    InvalidCertificate,
}

#[derive(Default)]
pub struct ClientState {
    pub convert_calls: u32,
    pub tls_established: bool,
    /// Fail the client-facing handshake.
    pub fail_handshake: bool,
    /// Fail the post-handshake one-byte peek.
    pub peek_error_after_handshake: bool,
    /// ALPN list the "engine" hands to the select callback.
    pub advertised_alpn: Option<Vec<Vec<u8>>>,
    /// What the callback chose.
    pub selected_alpn: Option<Vec<u8>>,
    pub last_cert: Option<CertificatePem>,
    pub last_cipher_list: Option<String>,
    pub last_dhparams: Option<DhParams>,
}

pub struct MockClientConnection {
    wire: Vec<u8>,
    pub state: Arc<Mutex<ClientState>>,
    log: EventLog,
}

impl MockClientConnection {
    pub fn new(wire: Vec<u8>, log: EventLog) -> Self {
        Self {
            wire,
            state: Arc::new(Mutex::new(ClientState::default())),
            log,
        }
    }
}

#[async_trait]
impl Peek for MockClientConnection {
    async fn peek(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let state = self.state.lock().unwrap();
        if state.tls_established && state.peek_error_after_handshake {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed after handshake",
            ));
        }
        Ok(self.wire[..n.min(self.wire.len())].to_vec())
    }
}

#[async_trait]
impl ClientConnection for MockClientConnection {
    async fn convert_to_tls(&mut self, options: ClientTlsOptions) -> Result<(), EngineError> {
        self.log.lock().unwrap().push("client_tls");
        let mut state = self.state.lock().unwrap();
        state.convert_calls += 1;
        if state.fail_handshake {
            return Err(EngineError::Handshake("scripted client failure".into()));
        }
        state.last_cert = Some(options.cert.clone());
        state.last_cipher_list = options.cipher_list.clone();
        state.last_dhparams = options.dhparams.clone();
        if let Some(advertised) = state.advertised_alpn.clone() {
            state.selected_alpn = (options.alpn_select)(&advertised);
        }
        state.tls_established = true;
        Ok(())
    }

    fn tls_established(&self) -> bool {
        self.state.lock().unwrap().tls_established
    }
}

impl AsyncRead for MockClientConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockClientConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[derive(Default)]
pub struct ServerState {
    pub connected: bool,
    pub tls_established: bool,
    pub connect_calls: u32,
    pub establish_calls: u32,
    pub fail_connect: bool,
    pub fail_tls: Option<FailMode>,
    /// Negotiated protocol to report; when unset, the mock picks the first
    /// offered protocol, like a server preferring the client's order.
    pub preset_negotiated_alpn: Option<Vec<u8>>,
    pub negotiated_alpn: Option<Vec<u8>>,
    pub verification_error: Option<VerificationError>,
    pub peer_certificate: Option<PeerCertificate>,
    pub last_options: Option<ServerTlsOptions>,
}

pub struct MockServerConnection {
    address: UpstreamAddr,
    pub state: Arc<Mutex<ServerState>>,
    log: EventLog,
}

impl MockServerConnection {
    pub fn new(address: UpstreamAddr, log: EventLog) -> Self {
        Self {
            address,
            state: Arc::new(Mutex::new(ServerState::default())),
            log,
        }
    }
}

#[async_trait]
impl ServerConnection for MockServerConnection {
    fn address(&self) -> &UpstreamAddr {
        &self.address
    }

    fn set_address(&mut self, address: UpstreamAddr) {
        self.address = address;
        let mut state = self.state.lock().unwrap();
        state.connected = false;
        state.tls_established = false;
    }

    fn connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    async fn connect(&mut self) -> io::Result<()> {
        self.log.lock().unwrap().push("server_connect");
        let mut state = self.state.lock().unwrap();
        state.connect_calls += 1;
        if state.fail_connect {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "scripted connect failure",
            ));
        }
        state.connected = true;
        Ok(())
    }

    fn tls_established(&self) -> bool {
        self.state.lock().unwrap().tls_established
    }

    async fn establish_tls(&mut self, options: ServerTlsOptions) -> Result<(), EngineError> {
        self.log.lock().unwrap().push("server_tls");
        let mut state = self.state.lock().unwrap();
        state.establish_calls += 1;
        state.last_options = Some(options.clone());
        match state.fail_tls {
            Some(FailMode::Handshake) => {
                return Err(EngineError::Handshake("scripted server failure".into()))
            }
            Some(FailMode::InvalidCertificate) => {
                return Err(EngineError::InvalidCertificate(
                    "certificate verify failed".into(),
                ))
            }
            None => {}
        }
        state.tls_established = true;
        state.negotiated_alpn = state
            .preset_negotiated_alpn
            .clone()
            .or_else(|| options.alpn_protocols.as_ref().and_then(|p| p.first().cloned()));
        Ok(())
    }

    fn peer_certificate(&self) -> Option<PeerCertificate> {
        self.state.lock().unwrap().peer_certificate.clone()
    }

    fn verification_error(&self) -> Option<VerificationError> {
        self.state.lock().unwrap().verification_error
    }

    fn negotiated_alpn(&self) -> Option<Vec<u8>> {
        self.state.lock().unwrap().negotiated_alpn.clone()
    }
}

impl AsyncRead for MockServerConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockServerConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[derive(Default)]
pub struct CertStoreState {
    /// Every (host, sans) pair requested.
    pub requests: Vec<(String, Vec<String>)>,
}

#[derive(Default)]
pub struct MockCertStore {
    pub state: Arc<Mutex<CertStoreState>>,
    pub dhparams: Option<DhParams>,
}

#[async_trait]
impl CertStore for MockCertStore {
    async fn get_cert(&self, host: &str, sans: &[String]) -> Result<CertBundle, CertStoreError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push((host.to_string(), sans.to_vec()));
        Ok(CertBundle {
            cert: CertificatePem(format!("cert for {host}")),
            key: PrivateKeyPem("test key".into()),
            chain_file: None,
        })
    }

    fn dhparams(&self) -> Option<DhParams> {
        self.dhparams.clone()
    }
}

/// Handles into the mocks after they have been boxed into the context.
pub struct Handles {
    pub client: Arc<Mutex<ClientState>>,
    pub server: Arc<Mutex<ServerState>>,
    pub certs: Arc<Mutex<CertStoreState>>,
    pub log: EventLog,
}

impl Handles {
    pub fn events(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().clone()
    }

    pub fn cert_requests(&self) -> Vec<(String, Vec<String>)> {
        self.certs.lock().unwrap().requests.clone()
    }
}

/// Build a context around the given client wire bytes and configuration.
pub fn context(wire: Vec<u8>, config: ProxyConfig) -> (LayerContext, Handles) {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let client = MockClientConnection::new(wire, Arc::clone(&log));
    let server = MockServerConnection::new(UpstreamAddr::new("upstream.test", 443), Arc::clone(&log));
    let store = MockCertStore::default();

    let handles = Handles {
        client: Arc::clone(&client.state),
        server: Arc::clone(&server.state),
        certs: Arc::clone(&store.state),
        log,
    };

    let ctx = LayerContext::new(
        Box::new(client),
        Box::new(server),
        Arc::new(config),
        Arc::new(store),
    );
    (ctx, handles)
}

/// Byte-string helper for ALPN lists.
pub fn protos(list: &[&[u8]]) -> Vec<Vec<u8>> {
    list.iter().map(|p| p.to_vec()).collect()
}
