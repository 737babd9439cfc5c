//! End-to-end interception tests: a rustls client connects through the
//! relay to a TLS echo upstream, with both handshakes real.

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;

use rcgen::{CertificateParams, DnType, KeyPair};
use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use veil_proxy::{ProxyConfig, UpstreamAddr, VerificationMode};
use veil_relay::{init_crypto_provider, serve_connection, ForgingCertStore};

/// A self-contained certificate: PEM cert + PEM key, optionally CA-signed.
struct TestCert {
    cert_pem: String,
    key_pem: String,
}

fn make_ca() -> (rcgen::Certificate, KeyPair, String) {
    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, "e2e test CA");
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    let pem = cert.pem();
    (cert, key, pem)
}

fn make_cert(name: &str, issuer: Option<(&rcgen::Certificate, &KeyPair)>) -> TestCert {
    let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
    params.distinguished_name.push(DnType::CommonName, name);
    let key = KeyPair::generate().unwrap();
    let cert = match issuer {
        Some((ca_cert, ca_key)) => params.signed_by(&key, ca_cert, ca_key).unwrap(),
        None => params.self_signed(&key).unwrap(),
    };
    TestCert {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    }
}

fn certs_from_pem(pem: &str) -> Vec<rustls::pki_types::CertificateDer<'static>> {
    rustls_pemfile::certs(&mut Cursor::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

/// TLS echo server; responds to every read with the same bytes.
struct TlsEchoBackend {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TlsEchoBackend {
    async fn spawn(cert: &TestCert, alpn: &[&[u8]]) -> Self {
        init_crypto_provider();

        let certs = certs_from_pem(&cert.cert_pem);
        let key = rustls_pemfile::private_key(&mut Cursor::new(&cert.key_pem))
            .unwrap()
            .unwrap();

        let mut config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .unwrap();
        config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();

        let acceptor = TlsAcceptor::from(Arc::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        let acceptor = acceptor.clone();
                        tokio::spawn(async move {
                            let Ok(mut tls) = acceptor.accept(stream).await else { return };
                            let mut buf = vec![0u8; 4096];
                            loop {
                                match tls.read(&mut buf).await {
                                    Ok(0) | Err(_) => break,
                                    Ok(n) => {
                                        if tls.write_all(&buf[..n]).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                            }
                        });
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }
}

impl Drop for TlsEchoBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Start a relay in front of `upstream` and return its listen address.
async fn spawn_relay(
    upstream: UpstreamAddr,
    config: ProxyConfig,
    certstore: Arc<ForgingCertStore>,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = Arc::new(config);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let upstream = upstream.clone();
            let config = Arc::clone(&config);
            let certstore: Arc<dyn veil_proxy::CertStore> = certstore.clone();
            tokio::spawn(async move {
                let _ = serve_connection(stream, upstream, config, certstore, true, true).await;
            });
        }
    });

    addr
}

async fn tls_client_connect(
    addr: SocketAddr,
    server_name: &str,
    root_pem: &str,
    alpn: &[&[u8]],
) -> std::io::Result<tokio_rustls::client::TlsStream<TcpStream>> {
    init_crypto_provider();

    let mut roots = rustls::RootCertStore::empty();
    for cert in certs_from_pem(root_pem) {
        roots.add(cert).unwrap();
    }

    let mut config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();

    let connector = TlsConnector::from(Arc::new(config));
    let stream = TcpStream::connect(addr).await?;
    let server_name = ServerName::try_from(server_name.to_string())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    connector.connect(server_name, stream).await
}

#[tokio::test]
async fn full_interception_roundtrip() {
    init_crypto_provider();

    let upstream_cert = make_cert("localhost", None);
    let backend = TlsEchoBackend::spawn(&upstream_cert, &[b"h2", b"http/1.1"]).await;

    let certstore = Arc::new(ForgingCertStore::new().unwrap());
    let ca_pem = certstore.ca_pem().to_string();

    let relay_addr = spawn_relay(
        UpstreamAddr::new("localhost", backend.addr.port()),
        ProxyConfig::default(),
        Arc::clone(&certstore),
    )
    .await;

    // The client trusts only the relay CA; a successful handshake means the
    // forged leaf chained up to it and covered the requested name.
    let mut tls = tls_client_connect(relay_addr, "localhost", &ca_pem, &[b"h2", b"http/1.1"])
        .await
        .unwrap();

    // ALPN is coherent end to end: the upstream picked h2, so the relay
    // offered h2 back to the client.
    {
        let (_, session) = tls.get_ref();
        assert_eq!(session.alpn_protocol(), Some(&b"h2"[..]));
    }

    tls.write_all(b"hello through the relay").await.unwrap();
    let mut buf = vec![0u8; 23];
    tls.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello through the relay");
}

#[tokio::test]
async fn peer_verification_accepts_trusted_upstream() {
    init_crypto_provider();

    let (ca_cert, ca_key, ca_pem) = make_ca();
    let upstream_cert = make_cert("localhost", Some((&ca_cert, &ca_key)));
    let backend = TlsEchoBackend::spawn(&upstream_cert, &[b"http/1.1"]).await;

    let ca_path = std::env::temp_dir().join(format!("veil-e2e-ca-{}.pem", std::process::id()));
    std::fs::write(&ca_path, &ca_pem).unwrap();

    let certstore = Arc::new(ForgingCertStore::new().unwrap());
    let relay_ca = certstore.ca_pem().to_string();

    let config = ProxyConfig {
        verification_mode_server: VerificationMode::Peer,
        trusted_ca_file_server: Some(ca_path.clone()),
        ..ProxyConfig::default()
    };
    let relay_addr = spawn_relay(
        UpstreamAddr::new("localhost", backend.addr.port()),
        config,
        Arc::clone(&certstore),
    )
    .await;

    let mut tls = tls_client_connect(relay_addr, "localhost", &relay_ca, &[b"http/1.1"])
        .await
        .unwrap();
    tls.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    tls.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    let _ = std::fs::remove_file(&ca_path);
}

#[tokio::test]
async fn peer_verification_without_anchors_aborts_relaying() {
    init_crypto_provider();

    let upstream_cert = make_cert("localhost", None);
    let backend = TlsEchoBackend::spawn(&upstream_cert, &[b"http/1.1"]).await;

    let certstore = Arc::new(ForgingCertStore::new().unwrap());
    let relay_ca = certstore.ca_pem().to_string();

    let config = ProxyConfig {
        verification_mode_server: VerificationMode::Peer,
        ..ProxyConfig::default()
    };
    let relay_addr = spawn_relay(
        UpstreamAddr::new("localhost", backend.addr.port()),
        config,
        Arc::clone(&certstore),
    )
    .await;

    // The relay still offers the client a TLS handshake (to deliver an
    // alert), but no data ever flows.
    match tls_client_connect(relay_addr, "localhost", &relay_ca, &[b"http/1.1"]).await {
        Err(_) => {}
        Ok(mut tls) => {
            tls.write_all(b"ping").await.ok();
            let mut buf = [0u8; 4];
            assert!(tls.read_exact(&mut buf).await.is_err());
        }
    }
}
