//! The TLS interception layer.
//!
//! The strategy for establishing TLS is as follows: first determine whether
//! the upstream certificate is needed to forge the client-facing one. If so,
//! connect to the server and handshake there first, then handshake with the
//! client. If not, handshake with the client right away and leave the server
//! side to a later [`connect`](TlsLayer::connect).
//!
//! Establishing TLS upstream may need the SNI value the client sent, and the
//! engine offers no callback when the client sends none. The layer therefore
//! peeks into the connection up front and parses the ClientHello itself to
//! obtain SNI and ALPN before either handshake starts.

use std::collections::BTreeSet;

use tracing::{debug, error};

use veil_tls::{openssl_cipher_name, ClientHello, Peek};

use crate::certs::CertBundle;
use crate::config::ProxyConfig;
use crate::engine::{AlpnSelect, ClientTlsOptions, EngineError, ServerTlsOptions, UpstreamAddr};
use crate::error::ProtocolError;
use crate::layer::{Layer, LayerContext};

/// Tri-state SNI override recorded when an upstream redirect wants a
/// different SNI than the client sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SniOverride {
    /// No redirect happened; the client's SNI applies.
    #[default]
    Inherit,
    /// Send no SNI upstream at all.
    Disabled,
    /// Send this host name instead of the client's SNI.
    Host(String),
}

/// Per-connection TLS interception state machine.
pub struct TlsLayer {
    client_tls: bool,
    server_tls: bool,

    client_sni: Option<String>,
    client_alpn_protocols: Option<Vec<Vec<u8>>>,
    client_ciphers: Vec<u16>,

    sni_override: SniOverride,
    client_handshake_started: bool,
}

#[async_trait::async_trait]
impl Layer for TlsLayer {
    async fn run(&mut self, ctx: &mut LayerContext) -> Result<(), ProtocolError> {
        TlsLayer::run(self, ctx).await
    }
}

impl TlsLayer {
    pub fn new(client_tls: bool, server_tls: bool) -> Self {
        Self {
            client_tls,
            server_tls,
            client_sni: None,
            client_alpn_protocols: None,
            client_ciphers: Vec::new(),
            sni_override: SniOverride::Inherit,
            client_handshake_started: false,
        }
    }

    /// Run the interception state machine, then hand off to the next layer.
    pub async fn run(&mut self, ctx: &mut LayerContext) -> Result<(), ProtocolError> {
        if self.client_tls {
            self.parse_client_hello(ctx).await;
        }

        let client_tls_requires_server_cert =
            self.client_tls && self.server_tls && !ctx.config.no_upstream_cert;

        if client_tls_requires_server_cert {
            self.establish_tls_with_client_and_server(ctx).await?;
        } else if self.client_tls {
            self.establish_tls_with_client(ctx).await?;
        }

        if let Some(mut layer) = ctx.next_layer() {
            layer.run(ctx).await?;
        }
        Ok(())
    }

    /// Ensure the upstream connection exists, establishing deferred
    /// server-side TLS on it if requested.
    pub async fn connect(&mut self, ctx: &mut LayerContext) -> Result<(), ProtocolError> {
        if !ctx.server.connected() {
            ctx.server
                .connect()
                .await
                .map_err(|source| ProtocolError::Connection {
                    address: ctx.server.address().to_string(),
                    source,
                })?;
        }
        if self.server_tls && !ctx.server.tls_established() {
            self.establish_tls_with_server(ctx).await?;
        }
        Ok(())
    }

    /// Redirect the upstream endpoint. When `server_tls` is supplied, the
    /// upstream TLS decision is updated and `sni` recorded as the override
    /// for the coming handshake.
    pub fn set_server(
        &mut self,
        ctx: &mut LayerContext,
        address: UpstreamAddr,
        server_tls: Option<bool>,
        sni: SniOverride,
    ) -> Result<(), ProtocolError> {
        if self.client_handshake_started {
            return Err(ProtocolError::tls_protocol(
                "cannot change the upstream server after the client handshake has started",
            ));
        }
        if let Some(server_tls) = server_tls {
            self.sni_override = sni;
            self.server_tls = server_tls;
        }
        ctx.server.set_address(address);
        Ok(())
    }

    /// SNI for the upstream handshake: the override when one was recorded,
    /// otherwise whatever the client sent.
    pub fn sni_for_server_connection(&self) -> Option<&str> {
        match &self.sni_override {
            SniOverride::Disabled => None,
            SniOverride::Host(host) => Some(host),
            SniOverride::Inherit => self.client_sni.as_deref(),
        }
    }

    /// ALPN protocol the upstream negotiated, passed down to the client.
    pub fn alpn_for_client_connection(&self, ctx: &LayerContext) -> Option<Vec<u8>> {
        ctx.server.negotiated_alpn()
    }

    /// Peek into the connection and parse the initial hello. Failure is not
    /// fatal: interception continues without SNI/ALPN knowledge.
    async fn parse_client_hello(&mut self, ctx: &mut LayerContext) {
        let stream: &mut dyn Peek = &mut *ctx.client;
        match ClientHello::from_stream(stream).await {
            Ok(hello) => {
                debug!(
                    sni = hello.sni().unwrap_or("-"),
                    alpn = ?hello
                        .alpn_protocols()
                        .map(|ps| ps.iter().map(|p| String::from_utf8_lossy(p).into_owned()).collect::<Vec<_>>()),
                    ciphers = hello.cipher_suites().len(),
                    "parsed client hello"
                );
                self.client_sni = hello.sni().map(str::to_owned);
                self.client_alpn_protocols = hello.alpn_protocols().map(<[_]>::to_vec);
                self.client_ciphers = hello.cipher_suites().to_vec();
            }
            Err(e) => {
                error!(error = %e, "cannot parse client hello");
            }
        }
    }

    /// ServerFirst ordering: if the upstream handshake fails, still try to
    /// establish TLS with the client so it receives a proper TLS alert
    /// instead of a bare TCP reset, then surface the original error.
    async fn establish_tls_with_client_and_server(
        &mut self,
        ctx: &mut LayerContext,
    ) -> Result<(), ProtocolError> {
        if let Err(err) = self.connect_and_establish_server(ctx).await {
            let _ = self.establish_tls_with_client(ctx).await;
            return Err(err);
        }
        self.establish_tls_with_client(ctx).await
    }

    async fn connect_and_establish_server(
        &mut self,
        ctx: &mut LayerContext,
    ) -> Result<(), ProtocolError> {
        if !ctx.server.connected() {
            ctx.server
                .connect()
                .await
                .map_err(|source| ProtocolError::Connection {
                    address: ctx.server.address().to_string(),
                    source,
                })?;
        }
        self.establish_tls_with_server(ctx).await
    }

    async fn establish_tls_with_client(
        &mut self,
        ctx: &mut LayerContext,
    ) -> Result<(), ProtocolError> {
        debug!("establishing TLS with client");
        let CertBundle {
            cert,
            key,
            chain_file,
        } = self.find_cert(ctx).await?;

        self.client_handshake_started = true;

        let server_alpn = ctx.server.negotiated_alpn();
        let alpn_select: AlpnSelect =
            Box::new(move |options| select_alpn(server_alpn.as_deref(), options));

        let options = ClientTlsOptions {
            cert,
            key,
            chain_file,
            method: ctx.config.method_client,
            options: ctx.config.options_client,
            cipher_list: ctx.config.ciphers_client.clone(),
            dhparams: ctx.certstore.dhparams(),
            alpn_select,
        };

        let handshake = async {
            ctx.client.convert_to_tls(options).await?;
            // Some clients complete the handshake and then immediately
            // close instead of failing it; engines tend to surface that
            // only on the first read. A one-byte peek forces the error out
            // here, where it can still be attributed to the handshake.
            ctx.client.peek(1).await?;
            Ok::<(), EngineError>(())
        };

        if let Err(source) = handshake.await {
            let context = self
                .client_sni
                .clone()
                .unwrap_or_else(|| ctx.server.address().to_string());
            return Err(ProtocolError::ClientHandshake { context, source });
        }
        Ok(())
    }

    async fn establish_tls_with_server(
        &mut self,
        ctx: &mut LayerContext,
    ) -> Result<(), ProtocolError> {
        debug!("establishing TLS with server");

        let alpn_protocols = self.alpn_for_server_connection(&ctx.config);
        let cipher_list = Some(match &ctx.config.ciphers_server {
            Some(configured) => configured.clone(),
            None => self
                .client_ciphers
                .iter()
                .filter_map(|&id| openssl_cipher_name(id as u32))
                .collect::<Vec<_>>()
                .join(":"),
        });
        let sni = self.sni_for_server_connection().map(str::to_owned);

        let options = ServerTlsOptions {
            client_certs: ctx.config.client_certs.clone(),
            sni: sni.clone(),
            method: ctx.config.method_server,
            options: ctx.config.options_server,
            verify: ctx.config.verification_mode_server,
            ca_dir: ctx.config.trusted_ca_dir_server.clone(),
            ca_file: ctx.config.trusted_ca_file_server.clone(),
            cipher_list,
            alpn_protocols,
        };

        match ctx.server.establish_tls(options).await {
            Ok(()) => {
                if let Some(verr) = ctx.server.verification_error() {
                    error!(
                        depth = verr.depth,
                        errno = verr.errno,
                        "TLS verification failed for upstream server"
                    );
                    error!("ignoring server verification error, continuing with connection");
                }
            }
            Err(source @ EngineError::InvalidCertificate(_)) => {
                if let Some(verr) = ctx.server.verification_error() {
                    error!(
                        depth = verr.depth,
                        errno = verr.errno,
                        "TLS verification failed for upstream server"
                    );
                }
                error!("aborting connection attempt");
                return Err(server_tls_error(ctx, sni.as_deref(), source));
            }
            Err(source) => return Err(server_tls_error(ctx, sni.as_deref(), source)),
        }

        debug!(
            alpn = ctx
                .server
                .negotiated_alpn()
                .map(|p| String::from_utf8_lossy(&p).into_owned())
                .as_deref()
                .unwrap_or("-"),
            "ALPN selected by server"
        );
        Ok(())
    }

    /// The ALPN list forwarded upstream: the client's offer minus the
    /// deprecated HTTP/2 draft variants, minus `h2` when HTTP/2 support is
    /// disabled. `None` when the client sent no ALPN extension.
    fn alpn_for_server_connection(&self, config: &ProxyConfig) -> Option<Vec<Vec<u8>>> {
        let client = self
            .client_alpn_protocols
            .as_ref()
            .filter(|protos| !protos.is_empty())?;
        let mut alpn: Vec<Vec<u8>> = client
            .iter()
            .filter(|p| !deprecated_http2_variant(p))
            .cloned()
            .collect();
        if !config.http2 {
            alpn.retain(|p| p.as_slice() != b"h2");
        }
        Some(alpn)
    }

    /// Compute the host name and SAN set for the forged leaf and request it
    /// from the store.
    async fn find_cert(&self, ctx: &LayerContext) -> Result<CertBundle, ProtocolError> {
        let mut host = ctx.server.address().host.clone();
        let mut sans: BTreeSet<String> = BTreeSet::new();

        // Incorporate the upstream certificate when one has been seen.
        let use_upstream_cert = ctx.server.tls_established() && !ctx.config.no_upstream_cert;
        if use_upstream_cert {
            if let Some(upstream_cert) = ctx.server.peer_certificate() {
                sans.extend(upstream_cert.altnames.iter().cloned());
                if let Some(cn) = &upstream_cert.common_name {
                    sans.insert(host.clone());
                    host = to_idna(cn);
                }
            }
        }

        // Also cover the SNI values in play.
        if let Some(sni) = &self.client_sni {
            sans.insert(sni.clone());
        }
        if let SniOverride::Host(sni) = &self.sni_override {
            sans.insert(sni.clone());
        }

        let sans: Vec<String> = sans.into_iter().collect();
        ctx.certstore
            .get_cert(&host, &sans)
            .await
            .map_err(|e| ProtocolError::TlsProtocol {
                message: e.to_string(),
                source: Some(Box::new(e)),
            })
    }
}

/// Choose the ALPN value offered back to the client: the protocol the
/// upstream already negotiated when the client offers it too, otherwise
/// `http/1.1`, otherwise the client's first preference.
fn select_alpn(server_alpn: Option<&[u8]>, options: &[Vec<u8>]) -> Option<Vec<u8>> {
    const DEFAULT_ALPN: &[u8] = b"http/1.1";

    let choice = if let Some(negotiated) =
        server_alpn.filter(|p| options.iter().any(|o| o.as_slice() == *p))
    {
        negotiated.to_vec()
    } else if options.iter().any(|o| o.as_slice() == DEFAULT_ALPN) {
        DEFAULT_ALPN.to_vec()
    } else {
        options.first()?.clone()
    };
    debug!(alpn = %String::from_utf8_lossy(&choice), "ALPN for client");
    Some(choice)
}

/// Draft HTTP/2 and SPDY variants the relay does not speak; offering them
/// upstream could push the connection into passthrough.
fn deprecated_http2_variant(proto: &[u8]) -> bool {
    proto.starts_with(b"h2-") || proto.starts_with(b"spdy")
}

fn server_tls_error(ctx: &LayerContext, sni: Option<&str>, source: EngineError) -> ProtocolError {
    ProtocolError::TlsProtocol {
        message: format!(
            "cannot establish TLS with {} (sni: {}): {}",
            ctx.server.address(),
            sni.unwrap_or("-"),
            source
        ),
        source: Some(Box::new(source)),
    }
}

/// Convert a certificate CN to its IDNA (punycode) form. Names that do not
/// convert cleanly are used as-is.
fn to_idna(host: &str) -> String {
    idna::domain_to_ascii(host).unwrap_or_else(|_| host.to_string())
}
