//! ClientHello decoding.
//!
//! Only the fields the interception layer acts on are extracted: the offered
//! cipher suites, the SNI host name, and the ALPN protocol list. Everything
//! else is skipped by length. Truncation and length-field inconsistencies
//! are hard errors; unknown extensions are not.

use crate::error::WireError;
use crate::record::{read_client_hello, Peek, HANDSHAKE_HEADER_LEN};

/// Handshake message type of an initial hello.
const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;

/// Extension id of server_name (RFC 6066).
const EXT_SERVER_NAME: u16 = 0x0000;

/// Extension id of application_layer_protocol_negotiation (RFC 7301).
const EXT_ALPN: u16 = 0x0010;

/// The decoded subset of a TLS 1.0–1.2 ClientHello.
///
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    cipher_suites: Vec<u16>,
    sni: Option<String>,
    alpn_protocols: Option<Vec<Vec<u8>>>,
}

impl ClientHello {
    /// Decode a ClientHello body (the bytes after the 4-byte handshake
    /// header).
    pub fn parse(raw: &[u8]) -> Result<Self, WireError> {
        let malformed = |reason: &'static str| WireError::Malformed {
            reason,
            raw: raw.to_vec(),
        };
        let mut r = Reader::new(raw);

        r.take(2).ok_or_else(|| malformed("truncated version"))?;
        r.take(32).ok_or_else(|| malformed("truncated random"))?;
        r.vec8().ok_or_else(|| malformed("truncated session id"))?;

        let suites = r
            .vec16()
            .ok_or_else(|| malformed("truncated cipher suites"))?;
        if suites.len() % 2 != 0 {
            return Err(malformed("odd cipher suite length"));
        }
        let cipher_suites = suites
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();

        r.vec8()
            .ok_or_else(|| malformed("truncated compression methods"))?;

        let mut sni = None;
        let mut alpn_protocols = None;

        if r.remaining() > 0 {
            let block = r
                .vec16()
                .ok_or_else(|| malformed("truncated extensions block"))?;
            if r.remaining() != 0 {
                return Err(malformed("trailing data after extensions"));
            }

            let mut er = Reader::new(block);
            while er.remaining() > 0 {
                let ext_type = er
                    .u16()
                    .ok_or_else(|| malformed("truncated extension header"))?;
                let data = er.vec16().ok_or_else(|| malformed("truncated extension"))?;
                match ext_type {
                    EXT_SERVER_NAME if sni.is_none() => {
                        sni = parse_server_name(data, &malformed)?;
                    }
                    EXT_ALPN if alpn_protocols.is_none() => {
                        alpn_protocols = Some(parse_alpn(data, &malformed)?);
                    }
                    _ => {}
                }
            }
        }

        Ok(Self {
            cipher_suites,
            sni,
            alpn_protocols,
        })
    }

    /// Peek into the connection, reassemble the initial hello and decode it.
    ///
    /// The handshake bytes stay in the transport buffer; the TLS engine
    /// consumes them later during the real handshake.
    pub async fn from_stream<S: Peek + ?Sized>(stream: &mut S) -> Result<Self, WireError> {
        let mut hello = read_client_hello(stream).await?;
        if hello.len() < HANDSHAKE_HEADER_LEN {
            return Err(WireError::Malformed {
                reason: "truncated handshake header",
                raw: hello,
            });
        }
        if hello[0] != HANDSHAKE_TYPE_CLIENT_HELLO {
            return Err(WireError::NotClientHello { msg_type: hello[0] });
        }
        // The final record may carry bytes past the hello; drop them.
        let size = u32::from_be_bytes([0, hello[1], hello[2], hello[3]]) as usize
            + HANDSHAKE_HEADER_LEN;
        hello.truncate(size);
        Self::parse(&hello[HANDSHAKE_HEADER_LEN..])
    }

    /// Offered cipher suite ids, in client preference order.
    pub fn cipher_suites(&self) -> &[u16] {
        &self.cipher_suites
    }

    /// The requested host name, when the server-name extension carried
    /// exactly one host_name entry.
    pub fn sni(&self) -> Option<&str> {
        self.sni.as_deref()
    }

    /// The advertised ALPN protocols, in client preference order. `None`
    /// when the extension was absent.
    pub fn alpn_protocols(&self) -> Option<&[Vec<u8>]> {
        self.alpn_protocols.as_deref()
    }
}

/// Decode the server_name extension. Yields the host name only when the
/// list contains exactly one entry of name type 0x00.
fn parse_server_name(
    data: &[u8],
    malformed: &dyn Fn(&'static str) -> WireError,
) -> Result<Option<String>, WireError> {
    let mut r = Reader::new(data);
    let list = r
        .vec16()
        .ok_or_else(|| malformed("truncated server name list"))?;
    if r.remaining() != 0 {
        return Err(malformed("trailing data in server name extension"));
    }

    let mut names = Vec::new();
    let mut lr = Reader::new(list);
    while lr.remaining() > 0 {
        let name_type = lr
            .u8()
            .ok_or_else(|| malformed("truncated server name entry"))?;
        let name = lr
            .vec16()
            .ok_or_else(|| malformed("truncated server name"))?;
        names.push((name_type, name));
    }

    match names.as_slice() {
        [(0x00, name)] => {
            let name =
                std::str::from_utf8(name).map_err(|_| malformed("server name not utf-8"))?;
            Ok(Some(name.to_string()))
        }
        _ => Ok(None),
    }
}

/// Decode the ALPN extension into the ordered protocol-name list.
fn parse_alpn(
    data: &[u8],
    malformed: &dyn Fn(&'static str) -> WireError,
) -> Result<Vec<Vec<u8>>, WireError> {
    let mut r = Reader::new(data);
    let list = r
        .vec16()
        .ok_or_else(|| malformed("truncated alpn protocol list"))?;
    if r.remaining() != 0 {
        return Err(malformed("trailing data in alpn extension"));
    }

    let mut protocols = Vec::new();
    let mut lr = Reader::new(list);
    while lr.remaining() > 0 {
        let name = lr.vec8().ok_or_else(|| malformed("truncated alpn name"))?;
        protocols.push(name.to_vec());
    }
    Ok(protocols)
}

/// Bounds-checked cursor over a byte slice.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(out)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    /// A u8-length-prefixed field.
    fn vec8(&mut self) -> Option<&'a [u8]> {
        let len = self.u8()? as usize;
        self.take(len)
    }

    /// A u16-length-prefixed field.
    fn vec16(&mut self) -> Option<&'a [u8]> {
        let len = self.u16()? as usize;
        self.take(len)
    }
}
