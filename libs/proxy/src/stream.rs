//! Buffered peeking over a byte stream.
//!
//! [`PeekableStream`] wraps any async stream and gives it
//! peek-by-prefix-length semantics: `peek(n)` reads from the underlying
//! stream into an internal buffer until `n` bytes are available (or the peer
//! closes) and returns them without consuming. Later reads drain the buffer
//! before touching the underlying stream, so the peeked bytes are exactly
//! what a TLS engine handshaking over this wrapper will see.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

use veil_tls::Peek;

/// A stream wrapper with non-destructive prefix access.
#[derive(Debug)]
pub struct PeekableStream<S> {
    inner: S,
    buffer: BytesMut,
}

impl<S> PeekableStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
        }
    }

    /// Bytes currently buffered but not yet consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Unwrap, returning the underlying stream and any unconsumed bytes.
    pub fn into_parts(self) -> (S, BytesMut) {
        (self.inner, self.buffer)
    }
}

#[async_trait]
impl<S: AsyncRead + Unpin + Send> Peek for PeekableStream<S> {
    async fn peek(&mut self, n: usize) -> io::Result<Vec<u8>> {
        while self.buffer.len() < n {
            if self.inner.read_buf(&mut self.buffer).await? == 0 {
                break;
            }
        }
        Ok(self.buffer[..n.min(self.buffer.len())].to_vec())
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PeekableStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.buffer.is_empty() {
            let n = self.buffer.len().min(buf.remaining());
            buf.put_slice(&self.buffer[..n]);
            self.buffer.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PeekableStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
