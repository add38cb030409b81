/*
 * SPDX-License-Identifier: Apache-2.0
 */

use std::io;
use std::io::IoSlice;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

const PEEK_BUF_CAP: usize = 128;

/// Buffered lookahead over any byte stream.
///
/// Bytes enter the internal buffer through `peek`/`fill_more` and stay
/// readable until `consume` discards them, so a classification pass can
/// inspect a stream prefix without taking anything away from the next
/// reader. The wrapper itself implements `AsyncRead` (buffered bytes first,
/// then the inner stream) and passes `AsyncWrite` through, so a wrapped
/// duplex socket stays fully usable after the lookahead is done.
pub struct PeekBufReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> PeekBufReader<R> {
    pub fn new(inner: R) -> Self {
        PeekBufReader {
            inner,
            buf: BytesMut::with_capacity(PEEK_BUF_CAP),
        }
    }

    /// Currently buffered bytes. No I/O.
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Read at least one more byte from the inner stream into the buffer.
    /// Returns the number of new bytes, 0 on EOF.
    pub async fn fill_more(&mut self) -> io::Result<usize> {
        self.inner.read_buf(&mut self.buf).await
    }

    /// Fill the buffer until it holds `len` bytes or the stream ends, then
    /// return the buffered prefix. A slice shorter than `len` means EOF.
    pub async fn peek(&mut self, len: usize) -> io::Result<&[u8]> {
        while self.buf.len() < len {
            if self.fill_more().await? == 0 {
                break;
            }
        }
        let n = self.buf.len().min(len);
        Ok(&self.buf[..n])
    }

    /// Discard `len` buffered bytes once the decision on them is final.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the buffered length.
    pub fn consume(&mut self, len: usize) {
        self.buf.advance(len);
    }

    pub fn into_parts(self) -> (R, BytesMut) {
        (self.inner, self.buf)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for PeekBufReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.buf.is_empty() {
            Pin::new(&mut this.inner).poll_read(cx, buf)
        } else {
            let to_read = buf.remaining().min(this.buf.len());
            buf.put_slice(&this.buf[..to_read]);
            this.buf.advance(to_read);
            Poll::Ready(Ok(()))
        }
    }
}

impl<R: AsyncRead + AsyncWrite + Unpin> AsyncWrite for PeekBufReader<R> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
