//! The bidirectional relay engine: two independent one-way pipes per
//! session, joined at the end. Each pipe terminates silently on its
//! first read or write error (including a clean EOF). That is a normal
//! way for a pipe to end, not a session-level failure, so nothing here
//! returns an error to the caller. The session driver simply waits for
//! both pipes via `tokio::join!` and then tears down both sockets.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::frame::{self, FrameKey, BUFFER_SIZE, MAX_PLAINTEXT_LEN};

/// Copy plaintext from `reader` to `writer` until EOF or error. Used
/// for both directions of a direct (split-horizon) session, where
/// neither side is encrypted.
pub async fn pipe_plain<R, W>(label: &str, mut reader: R, mut writer: W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                log::trace!("{label}: source closed");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                log::debug!("{label}: read error: {e}");
                return;
            }
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            log::debug!("{label}: write error: {e}");
            return;
        }
        if let Err(e) = writer.flush().await {
            log::debug!("{label}: flush error: {e}");
            return;
        }
    }
}

/// Read plaintext from `reader` and forward it to `writer` as a
/// sequence of encrypted frames. Each read is capped at
/// `MAX_PLAINTEXT_LEN` to leave slack in the frame's fixed buffer for
/// padding and the IV.
pub async fn pipe_encrypt<R, W>(label: &str, mut reader: R, mut writer: W, key: &FrameKey)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; MAX_PLAINTEXT_LEN];
    let mut scratch = BytesMut::new();
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                log::trace!("{label}: source closed");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                log::debug!("{label}: read error: {e}");
                return;
            }
        };
        if let Err(e) = frame::write_frame(&mut writer, key, &buf[..n], &mut scratch).await {
            log::debug!("{label}: frame write error: {e}");
            return;
        }
    }
}

/// Read a sequence of encrypted frames from `reader` and write each
/// frame's decrypted plaintext verbatim to `writer`.
pub async fn pipe_decrypt<R, W>(label: &str, mut reader: R, mut writer: W, key: &FrameKey)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut scratch = BytesMut::new();
    loop {
        if let Err(e) = frame::read_frame(&mut reader, key, &mut scratch).await {
            log::debug!("{label}: frame read error: {e}");
            return;
        }
        if let Err(e) = writer.write_all(&scratch).await {
            log::debug!("{label}: write error: {e}");
            return;
        }
        if let Err(e) = writer.flush().await {
            log::debug!("{label}: flush error: {e}");
            return;
        }
    }
}
