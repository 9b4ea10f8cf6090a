//! Length-prefixed framing shared by both cloudlet protocols.
//!
//! ```text
//! [4 bytes BE: command][4 bytes BE: payload length][payload]
//! ```
//!
//! The framing layer never looks inside the payload. Payload encodings live
//! in [`codec`](crate::codec).

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::FrameError;
use crate::transfer::{recv_exact, send_exact};

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = 8;

/// Initial size of a [`FrameReader`]'s receive buffer.
pub const INITIAL_BUFFER_LEN: usize = 4096;

/// Reverses the byte order of a 32-bit word.
pub fn swap32(x: u32) -> u32 {
    x.swap_bytes()
}

/// The fixed 8-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub command: u32,
    pub length: u32,
}

impl Header {
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&self.command.to_be_bytes());
        out[4..].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: [u8; HEADER_LEN]) -> Self {
        let [c0, c1, c2, c3, l0, l1, l2, l3] = bytes;
        Self {
            command: u32::from_be_bytes([c0, c1, c2, c3]),
            length: u32::from_be_bytes([l0, l1, l2, l3]),
        }
    }
}

/// Encodes one frame into a contiguous buffer.
pub fn encode_frame(command: u32, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let length = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        length: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&Header { command, length }.to_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Writes one frame to `writer`.
pub async fn write_frame<W>(writer: &mut W, command: u32, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = encode_frame(command, payload)?;
    let sent = send_exact(writer, &frame).await?;
    if sent != frame.len() {
        return Err(FrameError::Truncated {
            expected: frame.len(),
            received: sent,
        });
    }
    Ok(())
}

/// Reads frames from a stream into a reusable, growable buffer.
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
    max_payload: usize,
    read_timeout: Option<Duration>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Creates a reader that rejects payloads larger than `max_payload`.
    pub fn new(reader: R, max_payload: usize) -> Self {
        Self {
            reader,
            buf: vec![0u8; INITIAL_BUFFER_LEN],
            max_payload,
            read_timeout: None,
        }
    }

    /// Bounds how long a payload may take to arrive once its header is in.
    ///
    /// Waiting for the next header is never bounded; an idle connection is
    /// not an error.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Current size of the receive buffer.
    pub fn buffer_len(&self) -> usize {
        self.buf.len()
    }

    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` if the peer closed cleanly between frames. The
    /// returned payload borrows the internal buffer and is exactly as long as
    /// the header declared.
    pub async fn read_frame(&mut self) -> Result<Option<(u32, &[u8])>, FrameError> {
        let mut raw = [0u8; HEADER_LEN];
        let got = recv_exact(&mut self.reader, &mut raw).await?;
        if got == 0 {
            return Ok(None);
        }
        if got != HEADER_LEN {
            return Err(FrameError::Truncated {
                expected: HEADER_LEN,
                received: got,
            });
        }

        let header = Header::from_bytes(raw);
        let length = header.length as usize;
        if length > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                length,
                max: self.max_payload,
            });
        }

        if self.buf.len() < length {
            self.buf.resize(length, 0);
        }

        let payload = &mut self.buf[..length];
        let got = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, recv_exact(&mut self.reader, payload))
                .await
                .map_err(|_| FrameError::Timeout)??,
            None => recv_exact(&mut self.reader, payload).await?,
        };
        if got != length {
            return Err(FrameError::Truncated {
                expected: length,
                received: got,
            });
        }

        Ok(Some((header.command, &self.buf[..length])))
    }
}
