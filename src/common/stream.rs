//! Stream helpers for handing a connection from one pipeline to the next
//!
//! Bytes consumed while classifying must be seen again by whoever takes the
//! connection over. `PrefixedStream` replays them before reading from the
//! socket again.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Any bidirectional byte stream a pipeline can own
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type-erased stream handed to installed pipelines
pub type BoxedStream = Box<dyn AsyncStream>;

/// A stream that yields `prefix` before reading from `inner`
///
/// Writes always go straight to `inner`.
pub struct PrefixedStream<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> PrefixedStream<S> {
    /// Wrap `inner`, replaying `prefix` first
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }

    /// Bytes that have not been read yet from the replay buffer
    pub fn pending_prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Split into the unread prefix and the inner stream
    pub fn into_parts(self) -> (Bytes, S) {
        (self.prefix, self.inner)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            let chunk = self.prefix.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_prefix_is_read_before_inner() {
        let (client, server) = tokio::io::duplex(64);
        let mut stream = PrefixedStream::new(Bytes::from_static(b"GET / "), server);

        let mut client = client;
        client.write_all(b"HTTP/1.1\r\n").await.unwrap();
        drop(client);

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"GET / HTTP/1.1\r\n");
    }

    #[tokio::test]
    async fn test_prefix_respects_small_read_buffers() {
        let (_client, server) = tokio::io::duplex(64);
        let mut stream = PrefixedStream::new(Bytes::from_static(b"abcdef"), server);

        let mut first = [0u8; 4];
        let n = stream.read(&mut first).await.unwrap();
        assert_eq!(&first[..n], b"abcd");
        assert_eq!(stream.pending_prefix(), b"ef");
    }

    #[tokio::test]
    async fn test_writes_bypass_prefix() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut stream = PrefixedStream::new(Bytes::from_static(b"ignored"), server);
        stream.write_all(b"pong").await.unwrap();

        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }
}
