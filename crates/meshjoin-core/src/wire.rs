//! meshjoin framing — length-prefixed messages over a byte stream.
//!
//! Every frame is an 8-digit, zero-padded, decimal ASCII length followed by
//! exactly that many payload bytes. The same framing is used for requests
//! and responses. There is no checksum; integrity is left to TCP.
//!
//!   "00000017" {"kind":"...",...}

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Width of the decimal length prefix.
pub const LENGTH_PREFIX_LEN: usize = 8;

/// Largest payload an 8-digit prefix can describe.
pub const MAX_FRAME_LEN: usize = 99_999_999;

/// Initial receive buffer. The buffer grows as bytes actually arrive, so a
/// hostile prefix cannot make us allocate 100 MB up front.
const RECV_CHUNK: usize = 64 * 1024;

// ── Framing ───────────────────────────────────────────────────────────────────

/// Write one frame: the length prefix, then the payload.
pub async fn send_framed<W>(conn: &mut W, payload: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(payload.len()).into());
    }
    conn.write_all(encode_length(payload.len()).as_bytes()).await?;
    conn.write_all(payload).await?;
    conn.flush().await?;
    Ok(())
}

/// Read one frame and return its payload.
///
/// Fails with a [`ProtocolError`] if the prefix is not a decimal number or
/// the peer closes before the whole payload arrived.
pub async fn recv_framed<R>(conn: &mut R) -> Result<Bytes, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_LEN {
        let n = conn.read(&mut prefix[filled..]).await?;
        if n == 0 {
            return Err(ProtocolError::Truncated {
                expected: LENGTH_PREFIX_LEN,
                received: filled,
            }
            .into());
        }
        filled += n;
    }

    let len = parse_length(&prefix)?;
    let mut payload = Vec::with_capacity(len.min(RECV_CHUNK));
    let received = (&mut *conn).take(len as u64).read_to_end(&mut payload).await?;
    if received < len {
        return Err(ProtocolError::Truncated {
            expected: len,
            received,
        }
        .into());
    }
    Ok(Bytes::from(payload))
}

/// Format a payload length as the on-wire prefix.
pub fn encode_length(len: usize) -> String {
    format!("{:0width$}", len, width = LENGTH_PREFIX_LEN)
}

/// Parse an on-wire prefix. Only ASCII digits are accepted: no sign, no
/// whitespace.
pub fn parse_length(prefix: &[u8; LENGTH_PREFIX_LEN]) -> Result<usize, ProtocolError> {
    let invalid = || ProtocolError::InvalidLength(String::from_utf8_lossy(prefix).into_owned());
    if !prefix.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    std::str::from_utf8(prefix)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(invalid)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Malformed traffic. Fatal for the connection it arrived on, never for the
/// process.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid length prefix {0:?}")]
    InvalidLength(String),

    #[error("frame truncated: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },

    #[error("payload length {0} exceeds maximum {}", MAX_FRAME_LEN)]
    FrameTooLarge(usize),

    #[error("unknown message kind {0:?}")]
    UnknownKind(String),

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unexpected {0} message")]
    Unexpected(String),
}

/// Anything that can go wrong while moving a frame.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
