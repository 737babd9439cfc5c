//! The interception layer's error taxonomy.

use thiserror::Error;

use crate::engine::EngineError;

/// Protocol-level failures surfaced by the TLS layer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Structural TLS failure: a bad record header, a short read, a parser
    /// rejection, or any non-verification failure in the server-side
    /// handshake.
    #[error("{message}")]
    TlsProtocol {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// TLS negotiation with the client failed. `context` is the client's
    /// SNI, or the upstream address string when no SNI was seen.
    #[error("cannot establish TLS with client (sni: {context}): {source}")]
    ClientHandshake {
        context: String,
        #[source]
        source: EngineError,
    },

    /// The upstream TCP connection could not be established.
    #[error("cannot connect to {address}: {source}")]
    Connection {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProtocolError {
    /// A `TlsProtocol` error with no underlying cause.
    pub fn tls_protocol(message: impl Into<String>) -> Self {
        ProtocolError::TlsProtocol {
            message: message.into(),
            source: None,
        }
    }

    /// Returns true for structural TLS failures.
    pub fn is_tls_protocol(&self) -> bool {
        matches!(self, ProtocolError::TlsProtocol { .. })
    }

    /// Returns true for client-side handshake failures.
    pub fn is_client_handshake(&self) -> bool {
        matches!(self, ProtocolError::ClientHandshake { .. })
    }
}

impl From<veil_tls::WireError> for ProtocolError {
    fn from(err: veil_tls::WireError) -> Self {
        ProtocolError::TlsProtocol {
            message: format!("cannot read client hello: {err}"),
            source: Some(Box::new(err)),
        }
    }
}
