//! Error types for ClientHello extraction.

use thiserror::Error;

/// Errors raised while peeking at or parsing the client's opening handshake.
///
/// All variants describe structural protocol violations. Callers that can
/// proceed without parsed hello data (the interception layer can) are
/// expected to log these and continue.
#[derive(Debug, Error)]
pub enum WireError {
    /// The bytes at the head of the stream are not a TLS handshake record.
    #[error("expected TLS record, got `{}` instead", hex::encode(header))]
    NotTls {
        /// The offending record-header bytes as peeked.
        header: Vec<u8>,
    },

    /// The peer closed the connection before a complete record arrived.
    #[error("unexpected EOF in TLS handshake: `{}`", hex::encode(partial))]
    UnexpectedEof {
        /// Whatever partial record body was available.
        partial: Vec<u8>,
    },

    /// The handshake message is not an initial ClientHello.
    #[error("expected ClientHello (0x01), got handshake type {msg_type:#04x}")]
    NotClientHello { msg_type: u8 },

    /// The ClientHello body is structurally invalid.
    #[error("cannot parse ClientHello ({reason}), raw bytes: {}", hex::encode(raw))]
    Malformed {
        reason: &'static str,
        /// The full handshake body, for offline inspection.
        raw: Vec<u8>,
    },

    /// I/O failure while peeking at the stream.
    #[error("I/O error while reading ClientHello")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// Returns true if the failure happened before any TLS structure was
    /// recognized (as opposed to inside a well-framed handshake).
    pub fn is_not_tls(&self) -> bool {
        matches!(self, WireError::NotTls { .. })
    }
}
