//! tokio-rustls adapters behind the interception layer's engine traits.
//!
//! The client side accepts through a [`LazyConfigAcceptor`] so the layer's
//! ALPN-select callback runs against the client's real offer before the
//! server config is fixed. The upstream side supports both verification
//! modes: `Peer` fails the handshake on a bad chain, `None` completes it
//! regardless but still records the verdict when trust anchors are
//! configured, the way an OpenSSL VERIFY_NONE callback would.
//!
//! Engine tokens with no rustls equivalent (option bits, OpenSSL cipher
//! strings, DH parameters) are accepted and ignored with a debug log.

use std::io::{self, Cursor};
use std::mem;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Once};
use std::task::{Context, Poll};

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{LazyConfigAcceptor, TlsConnector};
use tracing::debug;
use x509_parser::extensions::GeneralName;

use veil_proxy::{
    ClientConnection, ClientTlsOptions, EngineError, EngineOptions, PeekableStream,
    PeerCertificate, ServerConnection, ServerTlsOptions, TlsMethod, UpstreamAddr,
    VerificationError, VerificationMode,
};
use veil_tls::Peek;

static INIT_CRYPTO: Once = Once::new();

/// Install the ring crypto provider once per process.
pub fn init_crypto_provider() {
    INIT_CRYPTO.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .ok();
    });
}

static TLS12_ONLY: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS12];
static TLS13_ONLY: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS13];

fn protocol_versions(
    method: TlsMethod,
) -> Result<&'static [&'static rustls::SupportedProtocolVersion], EngineError> {
    match method {
        TlsMethod::Flexible => Ok(rustls::ALL_VERSIONS),
        TlsMethod::Tls12 => Ok(TLS12_ONLY),
        TlsMethod::Tls13 => Ok(TLS13_ONLY),
        TlsMethod::Tls10 | TlsMethod::Tls11 => Err(EngineError::Handshake(format!(
            "{method:?} is not supported by the rustls engine"
        ))),
    }
}

fn pem_certs(pem: &str) -> Result<Vec<CertificateDer<'static>>, EngineError> {
    rustls_pemfile::certs(&mut Cursor::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::Handshake(format!("cannot parse certificate PEM: {e}")))
}

fn pem_key(pem: &str) -> Result<PrivateKeyDer<'static>, EngineError> {
    rustls_pemfile::private_key(&mut Cursor::new(pem))
        .map_err(|e| EngineError::Handshake(format!("cannot parse private key PEM: {e}")))?
        .ok_or_else(|| EngineError::Handshake("no private key in PEM".into()))
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport not available")
}

type ClientTlsStream = PeekableStream<tokio_rustls::server::TlsStream<PeekableStream<TcpStream>>>;

enum ClientState {
    /// Plain TCP with buffered peeking over the opening bytes.
    Plain(PeekableStream<TcpStream>),
    /// TLS terminated; peeking now sees decrypted bytes.
    Tls(Box<ClientTlsStream>),
    /// A failed in-place handshake consumed the transport.
    Poisoned,
}

/// Client half of a proxied connection, backed by a rustls server session.
pub struct RustlsClientConnection {
    state: ClientState,
}

impl RustlsClientConnection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            state: ClientState::Plain(PeekableStream::new(stream)),
        }
    }
}

#[async_trait]
impl Peek for RustlsClientConnection {
    async fn peek(&mut self, n: usize) -> io::Result<Vec<u8>> {
        match &mut self.state {
            ClientState::Plain(s) => s.peek(n).await,
            ClientState::Tls(s) => s.peek(n).await,
            ClientState::Poisoned => Err(not_connected()),
        }
    }
}

#[async_trait]
impl ClientConnection for RustlsClientConnection {
    async fn convert_to_tls(&mut self, options: ClientTlsOptions) -> Result<(), EngineError> {
        let stream = match mem::replace(&mut self.state, ClientState::Poisoned) {
            ClientState::Plain(stream) => stream,
            other => {
                self.state = other;
                return Err(EngineError::Handshake(
                    "TLS already established with client".into(),
                ));
            }
        };

        if options.cipher_list.is_some() {
            debug!("client cipher list has no rustls equivalent, ignoring");
        }
        if options.dhparams.is_some() {
            debug!("rustls does no finite-field DHE, ignoring dhparams");
        }
        if options.options != EngineOptions::default() {
            debug!(bits = options.options.0, "ignoring engine option bits");
        }

        let mut config = client_facing_config(&options)?;

        // The acceptor reads the hello (from the peek buffer, then the
        // socket) before any config is needed, so the ALPN callback sees
        // the client's real offer.
        let acceptor = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), stream);
        let start = acceptor
            .await
            .map_err(|e| EngineError::Handshake(e.to_string()))?;

        let advertised: Vec<Vec<u8>> = start
            .client_hello()
            .alpn()
            .map(|alpn| alpn.map(<[u8]>::to_vec).collect())
            .unwrap_or_default();
        if !advertised.is_empty() {
            if let Some(choice) = (options.alpn_select)(&advertised) {
                config.alpn_protocols = vec![choice];
            }
        }

        let tls = start
            .into_stream(Arc::new(config))
            .await
            .map_err(|e| EngineError::Handshake(e.to_string()))?;
        self.state = ClientState::Tls(Box::new(PeekableStream::new(tls)));
        Ok(())
    }

    fn tls_established(&self) -> bool {
        matches!(self.state, ClientState::Tls(_))
    }
}

fn client_facing_config(options: &ClientTlsOptions) -> Result<rustls::ServerConfig, EngineError> {
    let mut certs = pem_certs(&options.cert.0)?;
    if let Some(chain_file) = &options.chain_file {
        let chain = std::fs::read_to_string(chain_file).map_err(|e| {
            EngineError::Handshake(format!("cannot read chain file {}: {e}", chain_file.display()))
        })?;
        certs.extend(pem_certs(&chain)?);
    }
    let key = pem_key(options.key.expose())?;

    rustls::ServerConfig::builder_with_protocol_versions(protocol_versions(options.method)?)
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| EngineError::Handshake(e.to_string()))
}

impl AsyncRead for RustlsClientConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.state {
            ClientState::Plain(s) => Pin::new(s).poll_read(cx, buf),
            ClientState::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            ClientState::Poisoned => Poll::Ready(Err(not_connected())),
        }
    }
}

impl AsyncWrite for RustlsClientConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.state {
            ClientState::Plain(s) => Pin::new(s).poll_write(cx, buf),
            ClientState::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            ClientState::Poisoned => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.state {
            ClientState::Plain(s) => Pin::new(s).poll_flush(cx),
            ClientState::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            ClientState::Poisoned => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.state {
            ClientState::Plain(s) => Pin::new(s).poll_shutdown(cx),
            ClientState::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            ClientState::Poisoned => Poll::Ready(Err(not_connected())),
        }
    }
}

enum ServerState {
    Disconnected,
    Tcp(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    Poisoned,
}

/// Upstream half of a proxied connection, backed by a rustls client session.
pub struct RustlsServerConnection {
    address: UpstreamAddr,
    state: ServerState,
    peer_certificate: Option<PeerCertificate>,
    negotiated_alpn: Option<Vec<u8>>,
    verification_error: Option<VerificationError>,
}

impl RustlsServerConnection {
    pub fn new(address: UpstreamAddr) -> Self {
        Self {
            address,
            state: ServerState::Disconnected,
            peer_certificate: None,
            negotiated_alpn: None,
            verification_error: None,
        }
    }
}

#[async_trait]
impl ServerConnection for RustlsServerConnection {
    fn address(&self) -> &UpstreamAddr {
        &self.address
    }

    fn set_address(&mut self, address: UpstreamAddr) {
        if address != self.address {
            debug!(%address, "upstream redirected");
        }
        self.address = address;
        self.state = ServerState::Disconnected;
        self.peer_certificate = None;
        self.negotiated_alpn = None;
        self.verification_error = None;
    }

    fn connected(&self) -> bool {
        matches!(self.state, ServerState::Tcp(_) | ServerState::Tls(_))
    }

    async fn connect(&mut self) -> io::Result<()> {
        let stream = TcpStream::connect((self.address.host.as_str(), self.address.port)).await?;
        self.state = ServerState::Tcp(stream);
        Ok(())
    }

    fn tls_established(&self) -> bool {
        matches!(self.state, ServerState::Tls(_))
    }

    async fn establish_tls(&mut self, options: ServerTlsOptions) -> Result<(), EngineError> {
        let tcp = match mem::replace(&mut self.state, ServerState::Poisoned) {
            ServerState::Tcp(stream) => stream,
            other => {
                self.state = other;
                return Err(EngineError::Handshake(
                    "no TCP connection to establish TLS on".into(),
                ));
            }
        };

        if options.cipher_list.as_deref().is_some_and(|c| !c.is_empty()) {
            debug!("upstream cipher list has no rustls equivalent, ignoring");
        }
        if options.options != EngineOptions::default() {
            debug!(bits = options.options.0, "ignoring engine option bits");
        }

        let outcome = Arc::new(Mutex::new(None));
        let mut config = upstream_config(&options, Arc::clone(&outcome))?;
        config.alpn_protocols = options.alpn_protocols.clone().unwrap_or_default();
        if options.sni.is_none() {
            config.enable_sni = false;
        }

        // With SNI suppressed, the address host still names the expected
        // certificate identity.
        let verification_host = options
            .sni
            .clone()
            .unwrap_or_else(|| self.address.host.clone());
        let server_name = ServerName::try_from(verification_host)
            .map_err(|e| EngineError::Handshake(format!("invalid server name: {e}")))?;

        let connector = TlsConnector::from(Arc::new(config));
        match connector.connect(server_name, tcp).await {
            Ok(tls) => {
                self.verification_error = outcome.lock().unwrap().take();
                {
                    let (_, session) = tls.get_ref();
                    self.negotiated_alpn = session.alpn_protocol().map(<[u8]>::to_vec);
                    self.peer_certificate = session
                        .peer_certificates()
                        .and_then(|certs| certs.first())
                        .and_then(|der| parse_peer_certificate(der.as_ref()));
                }
                self.state = ServerState::Tls(Box::new(tls));
                Ok(())
            }
            Err(err) => {
                let (err, verification_error) = map_handshake_error(err);
                self.verification_error = verification_error;
                Err(err)
            }
        }
    }

    fn peer_certificate(&self) -> Option<PeerCertificate> {
        self.peer_certificate.clone()
    }

    fn verification_error(&self) -> Option<VerificationError> {
        self.verification_error
    }

    fn negotiated_alpn(&self) -> Option<Vec<u8>> {
        self.negotiated_alpn.clone()
    }
}

impl AsyncRead for RustlsServerConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.state {
            ServerState::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            ServerState::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            _ => Poll::Ready(Err(not_connected())),
        }
    }
}

impl AsyncWrite for RustlsServerConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.state {
            ServerState::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            ServerState::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            _ => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.state {
            ServerState::Tcp(s) => Pin::new(s).poll_flush(cx),
            ServerState::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            _ => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.state {
            ServerState::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            ServerState::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            _ => Poll::Ready(Err(not_connected())),
        }
    }
}

fn upstream_config(
    options: &ServerTlsOptions,
    outcome: Arc<Mutex<Option<VerificationError>>>,
) -> Result<rustls::ClientConfig, EngineError> {
    let versions = protocol_versions(options.method)?;
    let roots = load_trust_anchors(options)?;

    let builder = rustls::ClientConfig::builder_with_protocol_versions(versions);
    let builder = match options.verify {
        VerificationMode::Peer => {
            builder.with_root_certificates(roots.unwrap_or_else(RootCertStore::empty))
        }
        VerificationMode::None => {
            let inner = match roots {
                Some(roots) => Some(
                    WebPkiServerVerifier::builder(Arc::new(roots))
                        .build()
                        .map_err(|e| EngineError::Handshake(e.to_string()))?,
                ),
                None => None,
            };
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(PermissiveVerifier { inner, outcome }))
        }
    };

    match &options.client_certs {
        Some(path) => {
            let (certs, key) = load_client_identity(path)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| EngineError::Handshake(e.to_string()))
        }
        None => Ok(builder.with_no_client_auth()),
    }
}

fn load_trust_anchors(options: &ServerTlsOptions) -> Result<Option<RootCertStore>, EngineError> {
    let mut roots = RootCertStore::empty();
    let mut loaded = false;

    if let Some(ca_file) = &options.ca_file {
        add_pem_file(&mut roots, ca_file)?;
        loaded = true;
    }
    if let Some(ca_dir) = &options.ca_dir {
        let entries = std::fs::read_dir(ca_dir).map_err(|e| {
            EngineError::Handshake(format!("cannot read CA dir {}: {e}", ca_dir.display()))
        })?;
        for entry in entries {
            let path = entry
                .map_err(|e| EngineError::Handshake(format!("cannot list CA dir: {e}")))?
                .path();
            if path
                .extension()
                .is_some_and(|ext| ext == "pem" || ext == "crt")
            {
                add_pem_file(&mut roots, &path)?;
                loaded = true;
            }
        }
    }

    Ok(loaded.then_some(roots))
}

fn add_pem_file(roots: &mut RootCertStore, path: &Path) -> Result<(), EngineError> {
    let pem = std::fs::read_to_string(path).map_err(|e| {
        EngineError::Handshake(format!("cannot read CA file {}: {e}", path.display()))
    })?;
    for cert in pem_certs(&pem)? {
        roots.add(cert).map_err(|e| {
            EngineError::Handshake(format!("invalid CA certificate in {}: {e}", path.display()))
        })?;
    }
    Ok(())
}

fn load_client_identity(
    path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), EngineError> {
    let pem = std::fs::read_to_string(path).map_err(|e| {
        EngineError::Handshake(format!("cannot read client cert {}: {e}", path.display()))
    })?;
    Ok((pem_certs(&pem)?, pem_key(&pem)?))
}

fn map_handshake_error(err: io::Error) -> (EngineError, Option<VerificationError>) {
    if let Some(tls_err) = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    {
        if matches!(tls_err, rustls::Error::InvalidCertificate(_)) {
            let verr = VerificationError {
                depth: 0,
                errno: verify_errno(tls_err),
            };
            return (
                EngineError::InvalidCertificate(tls_err.to_string()),
                Some(verr),
            );
        }
        return (EngineError::Handshake(tls_err.to_string()), None);
    }
    (EngineError::Io(err), None)
}

/// Map a rustls verdict onto the closest OpenSSL `X509_V_ERR` code, which
/// is what the layer logs.
fn verify_errno(err: &rustls::Error) -> i32 {
    match err {
        rustls::Error::InvalidCertificate(cert_err) => match cert_err {
            CertificateError::NotValidYet => 9,
            CertificateError::Expired => 10,
            CertificateError::UnknownIssuer => 20,
            CertificateError::Revoked => 23,
            CertificateError::NotValidForName => 62,
            _ => 1,
        },
        _ => 1,
    }
}

fn parse_peer_certificate(der: &[u8]) -> Option<PeerCertificate> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).ok()?;
    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned);
    let altnames = cert
        .subject_alternative_name()
        .ok()
        .flatten()
        .map(|ext| {
            ext.value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some((*dns).to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    Some(PeerCertificate {
        common_name,
        altnames,
    })
}

/// Completes every handshake; when trust anchors are available the chain is
/// still checked and the failure recorded for the layer to log.
#[derive(Debug)]
struct PermissiveVerifier {
    inner: Option<Arc<WebPkiServerVerifier>>,
    outcome: Arc<Mutex<Option<VerificationError>>>,
}

impl ServerCertVerifier for PermissiveVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if let Some(inner) = &self.inner {
            if let Err(err) =
                inner.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
            {
                *self.outcome.lock().unwrap() = Some(VerificationError {
                    depth: 0,
                    errno: verify_errno(&err),
                });
            }
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_matches_openssl_codes() {
        let expired = rustls::Error::InvalidCertificate(CertificateError::Expired);
        assert_eq!(verify_errno(&expired), 10);
        let unknown = rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer);
        assert_eq!(verify_errno(&unknown), 20);
        let other = rustls::Error::HandshakeNotComplete;
        assert_eq!(verify_errno(&other), 1);
    }

    #[test]
    fn legacy_versions_are_rejected() {
        assert!(protocol_versions(TlsMethod::Tls10).is_err());
        assert!(protocol_versions(TlsMethod::Tls11).is_err());
        assert!(protocol_versions(TlsMethod::Flexible).is_ok());
    }

    #[test]
    fn peer_certificate_fields_are_extracted() {
        let cert = rcgen::generate_simple_self_signed(vec![
            "example.com".to_string(),
            "alt.example".to_string(),
        ])
        .unwrap();
        let parsed = parse_peer_certificate(cert.cert.der().as_ref()).unwrap();
        assert!(parsed.altnames.contains(&"example.com".to_string()));
        assert!(parsed.altnames.contains(&"alt.example".to_string()));
    }
}
