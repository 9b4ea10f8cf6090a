//! Exact-count reads and writes over a byte stream.
//!
//! A single `read`/`write` on a socket may move fewer bytes than asked for,
//! so both helpers loop until the full count has been transferred or the
//! peer goes away.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Fills `buf` from `reader`.
///
/// Returns the number of bytes read. This equals `buf.len()` on success and
/// is smaller only when the peer closed the stream first (`0` means a clean
/// close with nothing read). Callers must compare the count against the
/// length they asked for.
pub async fn recv_exact<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Writes all of `buf` to `writer`.
///
/// Returns the number of bytes written, which is smaller than `buf.len()`
/// only if the peer stopped accepting data.
pub async fn send_exact<W>(writer: &mut W, buf: &[u8]) -> io::Result<usize>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut sent = 0;
    while sent < buf.len() {
        match writer.write(&buf[sent..]).await {
            Ok(0) => break,
            Ok(n) => sent += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    writer.flush().await?;
    Ok(sent)
}
