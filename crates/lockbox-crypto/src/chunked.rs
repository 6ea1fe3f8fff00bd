//! Chunked streaming transform for large objects
//!
//! Content is processed in fixed-size blocks (default 5 MiB). Every block is
//! run through its own fresh AES-CTR keystream keyed and IV'd by the PSK, so
//! a block can be transformed without knowing its offset in the object. The
//! price is keystream reuse across blocks, which is acceptable only because a
//! generated PSK encrypts exactly one object.
//!
//! Encryption and decryption are the same operation. Readers on either side
//! must agree on the block size, and every block except the last must be
//! full.

use crate::{symmetric, CryptoError, Psk, Result};
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

fn check_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(CryptoError::InvalidChunkSize(chunk_size));
    }
    Ok(())
}

/// Encrypt an in-memory buffer block by block
pub fn encrypt_chunked(psk: &Psk, plaintext: &[u8], chunk_size: usize) -> Result<Vec<u8>> {
    check_chunk_size(chunk_size)?;
    let mut buf = plaintext.to_vec();
    for block in buf.chunks_mut(chunk_size) {
        symmetric::apply(psk, block)?;
    }
    Ok(buf)
}

/// Decrypt an in-memory buffer block by block
pub fn decrypt_chunked(psk: &Psk, ciphertext: &[u8], chunk_size: usize) -> Result<Vec<u8>> {
    encrypt_chunked(psk, ciphertext, chunk_size)
        .map_err(|e| CryptoError::Decryption(e.to_string()))
}

pin_project! {
    /// An `AsyncRead` adapter that encrypts or decrypts its inner reader one
    /// block at a time
    ///
    /// At most one block is buffered. A short final block is transformed and
    /// delivered like any other; end-of-stream is reported only after it has
    /// been fully drained.
    pub struct ChunkedCipherReader<R> {
        #[pin]
        inner: R,
        psk: Psk,
        chunk_size: usize,
        block: Vec<u8>,
        filled: usize,
        pos: usize,
        draining: bool,
        eof: bool,
        bytes_out: u64,
    }
}

impl<R: AsyncRead> ChunkedCipherReader<R> {
    /// Wrap a reader with the given PSK and block size
    pub fn new(inner: R, psk: Psk, chunk_size: usize) -> Result<Self> {
        check_chunk_size(chunk_size)?;
        Ok(Self {
            inner,
            psk,
            chunk_size,
            block: Vec::new(),
            filled: 0,
            pos: 0,
            draining: false,
            eof: false,
            bytes_out: 0,
        })
    }

    /// Total bytes delivered to the caller so far
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// Block size in use
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl<R: AsyncRead> AsyncRead for ChunkedCipherReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let mut this = self.project();
        loop {
            if *this.draining {
                if *this.pos < *this.filled {
                    let n = buf.remaining().min(*this.filled - *this.pos);
                    buf.put_slice(&this.block[*this.pos..*this.pos + n]);
                    *this.pos += n;
                    *this.bytes_out += n as u64;
                    return Poll::Ready(Ok(()));
                }
                *this.draining = false;
                *this.filled = 0;
                *this.pos = 0;
            }

            if *this.eof {
                return Poll::Ready(Ok(()));
            }

            if this.block.len() != *this.chunk_size {
                this.block.resize(*this.chunk_size, 0);
            }

            // Fill a whole block; the inner reader may hand back arbitrarily
            // small pieces.
            while *this.filled < *this.chunk_size {
                let mut rb = ReadBuf::new(&mut this.block[*this.filled..]);
                ready!(this.inner.as_mut().poll_read(cx, &mut rb))?;
                let n = rb.filled().len();
                if n == 0 {
                    *this.eof = true;
                    break;
                }
                *this.filled += n;
            }

            if *this.filled == 0 {
                return Poll::Ready(Ok(()));
            }

            symmetric::apply(this.psk, &mut this.block[..*this.filled]).map_err(io::Error::other)?;
            *this.draining = true;
        }
    }
}
