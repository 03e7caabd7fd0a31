//! Byte-stream transport abstraction.
//!
//! [`Transport`] is a thin wrapper around any connected, ordered byte
//! stream (a `tokio::net::TcpStream` in the binary, an in-memory duplex
//! stream in tests) that speaks the probe protocol's fixed-size response
//! units instead of raw bytes.  All protocol logic lives elsewhere; this
//! module owns only byte I/O and the error taxonomy that comes with it.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from transport operations.
///
/// Neither variant is recoverable: the session aborts on the first error
/// and never retries.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Hard I/O failure from the underlying stream.
    #[error("transport I/O failure: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the stream in the middle of a fixed-size response.
    ///
    /// Distinct from [`TransportError::Io`]: the peer was alive enough to
    /// accept our frame but answered with the wrong number of bytes.
    #[error("stream ended while expecting a {expected}-byte response")]
    ShortResponse { expected: usize },
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// A frame-out, fixed-size-response-in view of a connected byte stream.
#[derive(Debug)]
pub struct Transport<S> {
    stream: S,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Transport<S> {
    /// Wrap an already-connected stream.
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Write one complete frame and flush it to the peer.
    pub async fn send_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read exactly 4 octets and interpret them as a big-endian `u32`.
    pub async fn read_u32(&mut self) -> Result<u32, TransportError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf).await?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Read exactly 2 octets and interpret them as a big-endian `u16`.
    pub async fn read_u16(&mut self) -> Result<u16, TransportError> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf).await?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Fill `buf` completely, mapping an early EOF to
    /// [`TransportError::ShortResponse`].
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        match self.stream.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(TransportError::ShortResponse {
                    expected: buf.len(),
                })
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}
