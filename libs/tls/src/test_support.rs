//! Shared helpers for wire-level tests: a deterministic ClientHello builder
//! and an in-memory peekable stream.

use std::io;

use async_trait::async_trait;

use crate::record::Peek;

/// In-memory stream with buffered-peek semantics: returns the first `n`
/// bytes, or everything if the "peer" closed earlier.
pub struct StaticPeek {
    data: Vec<u8>,
}

impl StaticPeek {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

#[async_trait]
impl Peek for StaticPeek {
    async fn peek(&mut self, n: usize) -> io::Result<Vec<u8>> {
        Ok(self.data[..n.min(self.data.len())].to_vec())
    }
}

/// Wrap a handshake message into TLS records of at most `max_body` body
/// bytes each, producing the on-wire byte stream.
pub fn records(handshake: &[u8], max_body: usize) -> Vec<u8> {
    let mut wire = Vec::new();
    for chunk in handshake.chunks(max_body.clamp(1, 0xffff)) {
        wire.extend_from_slice(&[0x16, 0x03, 0x01]);
        wire.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
        wire.extend_from_slice(chunk);
    }
    wire
}

/// Build a complete TLS 1.2 ClientHello handshake message (handshake header
/// included) with the given offers.
pub fn build_hello(sni: Option<&str>, alpn: Option<&[&[u8]]>, ciphers: &[u16]) -> Vec<u8> {
    let mut body = Vec::new();

    // client_version + random
    body.extend_from_slice(&[0x03, 0x03]);
    body.extend((0..32u8).map(|i| i.wrapping_mul(7)));

    // session id
    body.push(0);

    // cipher suites
    body.extend_from_slice(&((ciphers.len() * 2) as u16).to_be_bytes());
    for id in ciphers {
        body.extend_from_slice(&id.to_be_bytes());
    }

    // compression methods: null only
    body.extend_from_slice(&[0x01, 0x00]);

    let mut extensions = Vec::new();
    if let Some(name) = sni {
        let mut ext = Vec::new();
        ext.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
        ext.push(0x00);
        ext.extend_from_slice(&(name.len() as u16).to_be_bytes());
        ext.extend_from_slice(name.as_bytes());
        push_extension(&mut extensions, 0x0000, &ext);
    }
    if let Some(protos) = alpn {
        let mut list = Vec::new();
        for p in protos {
            list.push(p.len() as u8);
            list.extend_from_slice(p);
        }
        let mut ext = Vec::new();
        ext.extend_from_slice(&(list.len() as u16).to_be_bytes());
        ext.extend_from_slice(&list);
        push_extension(&mut extensions, 0x0010, &ext);
    }
    if !extensions.is_empty() {
        body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(&extensions);
    }

    let mut handshake = Vec::with_capacity(body.len() + 4);
    handshake.push(0x01);
    handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&body);
    handshake
}

fn push_extension(out: &mut Vec<u8>, ext_type: u16, data: &[u8]) {
    out.extend_from_slice(&ext_type.to_be_bytes());
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(data);
}

/// The scenario-1 hello: SNI `example.com`, ALPN `h2` + `http/1.1`,
/// ciphers 0xc02f and 0x009c.
pub fn sample_hello() -> Vec<u8> {
    build_hello(
        Some("example.com"),
        Some(&[b"h2", b"http/1.1"]),
        &[0xc02f, 0x009c],
    )
}
