//! Raw-DEFLATE stream wrapper activated after `COMPRESS=DEFLATE` (RFC 4978).
//!
//! Wraps any `AsyncRead + AsyncWrite` transport, compressing everything
//! written and decompressing everything read, using a raw DEFLATE stream
//! (no zlib header, matching RFC 1951 as RFC 4978 requires).

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

const CHUNK: usize = 8192;

/// Transport wrapper that DEFLATE-compresses writes and inflates reads.
pub struct CompressedStream<S> {
    inner: S,
    compressor: Compress,
    decompressor: Decompress,
    /// Compressed bytes produced but not yet accepted by `inner`.
    pending_write: BytesMut,
    /// Decompressed bytes produced but not yet delivered to the caller.
    pending_read: BytesMut,
}

impl<S> CompressedStream<S> {
    /// Wraps `inner` in raw-DEFLATE compression/decompression.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            compressor: Compress::new(Compression::default(), false),
            decompressor: Decompress::new(false),
            pending_write: BytesMut::new(),
            pending_read: BytesMut::new(),
        }
    }

    /// Consumes the wrapper and returns the inner stream.
    ///
    /// Any buffered compressed/decompressed bytes are lost; only safe to
    /// call once both directions are idle (e.g. right after `LOGOUT`).
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncWrite + Unpin> CompressedStream<S> {
    fn poll_drain_pending_write(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.pending_write.is_empty() {
            match Pin::new(&mut self.inner).poll_write(cx, &self.pending_write) {
                Poll::Ready(Ok(0)) => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write compressed bytes",
                    )));
                }
                Poll::Ready(Ok(n)) => {
                    let _ = self.pending_write.split_to(n);
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CompressedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        match this.poll_drain_pending_write(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending => return Poll::Pending,
        }

        let mut consumed = 0;
        let mut out = [0u8; CHUNK];
        while consumed < buf.len() {
            let before_in = this.compressor.total_in();
            let before_out = this.compressor.total_out();
            this.compressor
                .compress(&buf[consumed..], &mut out, FlushCompress::None)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let produced = (this.compressor.total_out() - before_out) as usize;
            this.pending_write.extend_from_slice(&out[..produced]);
            let just_consumed = (this.compressor.total_in() - before_in) as usize;
            if just_consumed == 0 {
                // Output buffer was full; flush what we have and retry.
                break;
            }
            consumed += just_consumed;
        }

        Ok(consumed).into()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if let Poll::Pending = this.poll_drain_pending_write(cx) {
            return Poll::Pending;
        }

        let before_out = this.compressor.total_out();
        let mut out = [0u8; CHUNK];
        this.compressor
            .compress(&[], &mut out, FlushCompress::Sync)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let produced = (this.compressor.total_out() - before_out) as usize;
        this.pending_write.extend_from_slice(&out[..produced]);

        match this.poll_drain_pending_write(cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut this.inner).poll_flush(cx),
            other => other,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.poll_drain_pending_write(cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut this.inner).poll_shutdown(cx),
            other => other,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for CompressedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if !this.pending_read.is_empty() {
                let n = buf.remaining().min(this.pending_read.len());
                buf.put_slice(&this.pending_read[..n]);
                let _ = this.pending_read.split_to(n);
                return Poll::Ready(Ok(()));
            }

            let mut raw = [0u8; CHUNK];
            let mut raw_buf = ReadBuf::new(&mut raw);
            match Pin::new(&mut this.inner).poll_read(cx, &mut raw_buf) {
                Poll::Ready(Ok(())) => {
                    let filled = raw_buf.filled();
                    if filled.is_empty() {
                        return Poll::Ready(Ok(()));
                    }

                    let mut consumed = 0;
                    while consumed < filled.len() {
                        let before_in = this.decompressor.total_in();
                        let before_out = this.decompressor.total_out();
                        let mut out = [0u8; CHUNK];
                        this.decompressor
                            .decompress(&filled[consumed..], &mut out, FlushDecompress::None)
                            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                        let produced = (this.decompressor.total_out() - before_out) as usize;
                        this.pending_read.extend_from_slice(&out[..produced]);
                        let just_consumed = (this.decompressor.total_in() - before_in) as usize;
                        if just_consumed == 0 {
                            break;
                        }
                        consumed += just_consumed;
                    }
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    #[tokio::test]
    async fn round_trips_through_a_duplex_pipe() {
        let (client_raw, server_raw) = duplex(4096);
        let mut client = CompressedStream::new(client_raw);
        let mut server = CompressedStream::new(server_raw);

        client.write_all(b"A0001 NOOP\r\n").await.unwrap();
        client.flush().await.unwrap();

        let mut buf = [0u8; 64];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"A0001 NOOP\r\n");
    }

    #[tokio::test]
    async fn round_trips_data_larger_than_one_chunk() {
        let (client_raw, server_raw) = duplex(1 << 20);
        let mut client = CompressedStream::new(client_raw);
        let mut server = CompressedStream::new(server_raw);

        let payload = vec![b'x'; CHUNK * 3 + 17];
        client.write_all(&payload).await.unwrap();
        client.flush().await.unwrap();

        let mut received = vec![0u8; payload.len()];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(received, payload);
    }
}
