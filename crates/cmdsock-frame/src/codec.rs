use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: magic (4) + command id (4) + payload length (4) = 12 bytes.
pub const HEADER_SIZE: usize = 12;

/// Protocol sentinel carried by every header (0x3ADE68B1).
pub const MAGIC: u32 = 987_654_321;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub command_id: u32,
    pub payload_len: u32,
}

impl FrameHeader {
    /// Header for a command carrying `payload_len` bytes, tagged with [`MAGIC`].
    pub fn new(command_id: u32, payload_len: u32) -> Self {
        Self {
            magic: MAGIC,
            command_id,
            payload_len,
        }
    }
}

/// A command frame: application-defined id plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Application-defined command id.
    pub command_id: u32,
    /// The message payload. May be empty.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(command_id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            command_id,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Write the 12-byte header into `dst`.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────┬──────────────┬─────────────────┐
/// │ Magic (4B)   │ Command (4B) │ Length (4B)  │ Payload         │
/// │ 0x3ADE68B1   │ big-endian   │ big-endian   │ (Length bytes)  │
/// └──────────────┴──────────────┴──────────────┴─────────────────┘
/// ```
pub fn encode_header(header: &FrameHeader, dst: &mut BytesMut) {
    dst.reserve(HEADER_SIZE);
    dst.put_u32(header.magic);
    dst.put_u32(header.command_id);
    dst.put_u32(header.payload_len);
}

/// Parse a header from the first [`HEADER_SIZE`] bytes of `src`.
///
/// Returns `Ok(None)` when fewer than 12 bytes are available and
/// `Err(FrameError::InvalidMagic)` when the magic does not match.
/// Does not consume anything.
pub fn decode_header(src: &[u8]) -> Result<Option<FrameHeader>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut header = &src[..HEADER_SIZE];
    let magic = header.get_u32();
    let command_id = header.get_u32();
    let payload_len = header.get_u32();

    if magic != MAGIC {
        return Err(FrameError::InvalidMagic { found: magic });
    }

    Ok(Some(FrameHeader {
        magic,
        command_id,
        payload_len,
    }))
}

/// Encode a complete frame (header + payload) into `dst`.
pub fn encode_frame(command_id: u32, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let payload_len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    encode_header(&FrameHeader::new(command_id, payload_len), dst);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one complete frame from the front of `src`.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. Errors leave the
/// buffer untouched; see [`FrameAssembler`](crate::FrameAssembler) for the
/// resynchronizing decoder.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let Some(header) = decode_header(src)? else {
        return Ok(None);
    };

    let payload_len = header.payload_len as usize;
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    if src.len() < HEADER_SIZE + payload_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame {
        command_id: header.command_id,
        payload,
    }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
