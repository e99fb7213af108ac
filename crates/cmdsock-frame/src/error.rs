use crate::codec::MAGIC;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header carries the wrong magic number.
    #[error("invalid frame magic 0x{found:08X} (expected 0x{:08X})", MAGIC)]
    InvalidMagic { found: u32 },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether this error means the byte stream lost sync and must be dropped.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            FrameError::InvalidMagic { .. } | FrameError::PayloadTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
