//! Length-prefixed JSON framing.
//!
//! Every message on the device link, in either direction, is one frame:
//!
//! ```text
//! +----------------------+---------------------------+
//! | length: u32, BE      | body: `length` bytes of   |
//! | (4 bytes)            | UTF-8 JSON                |
//! +----------------------+---------------------------+
//! ```
//!
//! There is no delimiter, version, or checksum. A reader must therefore
//! collect exactly four header bytes and then exactly `length` body bytes,
//! across however many partial reads the socket hands back.
//!
//! [`encode`] and [`FrameDecoder`] are pure; [`read_frame`] drives an
//! `AsyncRead` directly.

use bytes::{Buf, BytesMut};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

use zynqlink_core::error::{Error, Result};

/// Size of the big-endian length prefix.
pub const HEADER_LEN: usize = 4;

/// Largest body accepted by default (64 MiB).
///
/// The prefix can announce up to 4 GiB; anything above this is treated as
/// a corrupt stream rather than allocated.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Serialize `payload` to JSON and prepend its length.
///
/// Fails with [`Error::Encoding`] if the value cannot be represented as JSON
/// or the body would not fit the 32-bit prefix.
pub fn encode<T: Serialize + ?Sized>(payload: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(payload).map_err(|e| Error::Encoding(e.to_string()))?;
    let len = u32::try_from(body.len()).map_err(|_| {
        Error::Encoding(format!(
            "payload of {} bytes exceeds the 32-bit length prefix",
            body.len()
        ))
    })?;

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Parse a complete frame body.
pub fn decode_body(body: &[u8]) -> Result<Value> {
    serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))
}

// ---------------------------------------------------------------------------
// Streaming read
// ---------------------------------------------------------------------------

/// Read one whole frame from `reader` with the default size limit.
///
/// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
/// See [`read_frame_with_limit`] for the failure cases.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Value>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    read_frame_with_limit(reader, DEFAULT_MAX_FRAME_LEN).await
}

/// Read one whole frame from `reader`, rejecting bodies over `max_len`.
///
/// - EOF before any header byte: `Ok(None)`.
/// - EOF inside the header or body: [`Error::Framing`].
/// - Declared length over `max_len`: [`Error::Framing`].
/// - Read failure: [`Error::Receive`].
/// - Body is not JSON: [`Error::Decode`]; the frame has been consumed.
///
/// Not cancel-safe: dropping the future mid-frame loses the bytes already
/// read. Use [`FrameDecoder`] over a retained buffer when the read may be
/// raced against other work.
pub async fn read_frame_with_limit<R>(reader: &mut R, max_len: usize) -> Result<Option<Value>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_LEN];
    let got = read_full(reader, &mut header).await?;
    if got == 0 {
        return Ok(None);
    }
    if got < HEADER_LEN {
        return Err(short_header(got));
    }

    let len = u32::from_be_bytes(header) as usize;
    check_len(len, max_len)?;

    let mut body = vec![0u8; len];
    let got = read_full(reader, &mut body).await?;
    if got < len {
        return Err(short_body(len, got));
    }

    tracing::trace!(len, "frame received");
    decode_body(&body).map(Some)
}

/// Fill `buf` unless the stream ends first; returns the bytes read.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(|e| Error::Receive(e.to_string()))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// ---------------------------------------------------------------------------
// Incremental decoding
// ---------------------------------------------------------------------------

/// Incremental frame decoder over a caller-owned buffer.
///
/// Bytes are appended to a [`BytesMut`] as they arrive; [`decode`] pulls
/// whole frames off the front and leaves partial ones in place. Because
/// the buffer outlives any single read, a read future can be dropped at
/// any await point without losing data.
///
/// [`decode`]: FrameDecoder::decode
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_len: usize,
}

impl FrameDecoder {
    /// Create a decoder with the default size limit.
    pub fn new() -> Self {
        Self::with_max_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Create a decoder that rejects bodies over `max_len` bytes.
    pub fn with_max_len(max_len: usize) -> Self {
        FrameDecoder { max_len }
    }

    /// The body size limit.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Take one frame off the front of `buf` if a whole one is there.
    ///
    /// Returns `Ok(None)` when more bytes are needed. An oversized length
    /// fails with [`Error::Framing`] and leaves `buf` untouched; the stream
    /// cannot be resynchronized after that. A body that is not JSON fails
    /// with [`Error::Decode`] after the frame has been removed, so the next
    /// call continues with the following frame.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Value>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        check_len(len, self.max_len)?;

        if buf.len() < HEADER_LEN + len {
            buf.reserve(HEADER_LEN + len - buf.len());
            return Ok(None);
        }

        buf.advance(HEADER_LEN);
        let body = buf.split_to(len);
        tracing::trace!(len, "frame received");
        decode_body(&body).map(Some)
    }

    /// Classify whatever is left in `buf` when the stream has ended.
    ///
    /// An empty buffer is a clean end of stream; leftover bytes mean the
    /// peer hung up mid-frame.
    pub fn finish(&self, buf: &BytesMut) -> Result<()> {
        match buf.len() {
            0 => Ok(()),
            n if n < HEADER_LEN => Err(short_header(n)),
            n => {
                let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
                Err(short_body(len, n - HEADER_LEN))
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn check_len(len: usize, max_len: usize) -> Result<()> {
    if len > max_len {
        return Err(Error::Framing(format!(
            "frame length {len} exceeds limit of {max_len} bytes"
        )));
    }
    Ok(())
}

fn short_header(got: usize) -> Error {
    Error::Framing(format!(
        "short header: stream ended after {got} of {HEADER_LEN} bytes"
    ))
}

fn short_body(expected: usize, got: usize) -> Error {
    Error::Framing(format!(
        "short body: stream ended after {got} of {expected} bytes"
    ))
}
