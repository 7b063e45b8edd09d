//! Length-prefixed framing for TCP connections: a 4-byte big-endian length
//! header followed by that many bytes of UTF-8 JSON (the encoded
//! [`crate::protocol::Envelope`]). Mirrors the teacher's
//! `read_peer_message`/`write_peer_message` pair in shape, generalized from
//! its bincode payload to this system's JSON envelope.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Matches the original daemon's `struct.pack('>I', len(data))` prefix
/// width; caps a single frame at 16 MiB so a corrupt or hostile length
/// prefix can't make us allocate unbounded memory.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds the {1} byte limit")]
    TooLarge(usize, usize),
    #[error("connection closed while reading frame")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Read one length-prefixed frame. Returns `Ok(None)` on a clean EOF before
/// any bytes of the next frame arrive (the normal way a peer hangs up).
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, FrameError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(FrameError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(len, MAX_FRAME_SIZE));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                FrameError::Closed
            } else {
                FrameError::Io(e)
            }
        })?;
    Ok(Some(body))
}

/// Write one length-prefixed frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), FrameError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(payload.len(), MAX_FRAME_SIZE));
    }
    let len = (payload.len() as u32).to_be_bytes();
    writer.write_all(&len).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trip_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").await.unwrap();

        let mut cursor = Cursor::new(buf);
        let frame = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(frame, b"hello");
    }

    #[tokio::test]
    async fn eof_before_frame_is_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let frame = read_frame(&mut cursor).await.unwrap();
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        let huge = (MAX_FRAME_SIZE as u32 + 1).to_be_bytes();
        buf.extend_from_slice(&huge);

        let mut cursor = Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge(_, _)));
    }

    #[tokio::test]
    async fn truncated_body_is_closed_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(b"short");

        let mut cursor = Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, FrameError::Closed));
    }
}
