//! TLS record framing and non-destructive ClientHello extraction.
//!
//! A ClientHello may arrive split across several TLS records, or as a single
//! oversized record. [`read_client_hello`] reassembles the handshake message
//! from however many records carry it, using only peek operations so the
//! bytes stay in the transport buffer for the TLS engine to consume during
//! the real handshake.

use std::io;

use async_trait::async_trait;

use crate::error::WireError;

/// Size of a TLS record header on the wire.
pub const RECORD_HEADER_LEN: usize = 5;

/// Size of a handshake message header (type + 24-bit length).
pub const HANDSHAKE_HEADER_LEN: usize = 4;

/// Content type of handshake records.
const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;

/// Non-destructive prefix access to a byte stream.
///
/// `peek(n)` returns the first `n` bytes of the stream without consuming
/// them, waiting for data as needed. Fewer than `n` bytes are returned only
/// if the peer closed the connection first. Implementations must make
/// repeated calls with increasing `n` cheap.
#[async_trait]
pub trait Peek: Send {
    async fn peek(&mut self, n: usize) -> io::Result<Vec<u8>>;
}

/// Returns true if the passed bytes start with the TLS handshake record
/// magic. Works for SSLv3 and TLS 1.0 through 1.2 (TLS 1.3 ClientHellos use
/// the 0x0301 compatibility version and match as well).
pub fn is_tls_record_magic(d: &[u8]) -> bool {
    d.len() >= 3 && d[0] == CONTENT_TYPE_HANDSHAKE && d[1] == 0x03 && d[2] <= 0x03
}

/// The five-byte header in front of every TLS record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub content_type: u8,
    pub version_major: u8,
    pub version_minor: u8,
    /// Length of the record body that follows the header.
    pub length: u16,
}

impl RecordHeader {
    /// Decode a record header, requiring the handshake magic.
    pub fn parse(d: &[u8]) -> Result<Self, WireError> {
        if d.len() != RECORD_HEADER_LEN || !is_tls_record_magic(d) {
            return Err(WireError::NotTls { header: d.to_vec() });
        }
        Ok(Self {
            content_type: d[0],
            version_major: d[1],
            version_minor: d[2],
            length: u16::from_be_bytes([d[3], d[4]]),
        })
    }
}

/// Peek into the stream and reassemble all records that contain the initial
/// handshake message.
///
/// Returns the raw handshake bytes (handshake header included) with the
/// record headers stripped. Nothing is consumed from the stream: invoking
/// this again on the same connection yields the same bytes.
pub async fn read_client_hello<S: Peek + ?Sized>(stream: &mut S) -> Result<Vec<u8>, WireError> {
    let mut hello: Vec<u8> = Vec::new();
    // Unknown until the handshake header has been seen; the placeholder
    // guarantees at least one loop iteration.
    let mut hello_size = 1usize;
    let mut offset = 0usize;

    while hello.len() < hello_size {
        let peeked = stream.peek(offset + RECORD_HEADER_LEN).await?;
        let header = &peeked[offset.min(peeked.len())..];
        let header = RecordHeader::parse(header)?;

        let record_size = header.length as usize + RECORD_HEADER_LEN;
        let peeked = stream.peek(offset + record_size).await?;
        let body = &peeked[(offset + RECORD_HEADER_LEN).min(peeked.len())..];
        if body.len() != record_size - RECORD_HEADER_LEN {
            return Err(WireError::UnexpectedEof {
                partial: body.to_vec(),
            });
        }

        hello.extend_from_slice(body);
        offset += record_size;

        if hello.len() >= HANDSHAKE_HEADER_LEN {
            hello_size =
                u32::from_be_bytes([0, hello[1], hello[2], hello[3]]) as usize + HANDSHAKE_HEADER_LEN;
        }
    }

    Ok(hello)
}
