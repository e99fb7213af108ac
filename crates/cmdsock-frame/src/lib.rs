//! Command framing for cmdsock.
//!
//! Every message on the wire is a 12-byte header followed by the payload:
//! - a 4-byte magic number (987654321) for stream validation
//! - a 4-byte command id, opaque to this crate
//! - a 4-byte payload length
//!
//! All header fields are big-endian. A header with the wrong magic discards
//! everything buffered for that stream; decoding resumes with the next bytes
//! that arrive.

pub mod assembler;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod tokio_codec;

pub use assembler::{DecodeState, FrameAssembler};
pub use codec::{
    decode_frame, decode_header, encode_frame, encode_header, Frame, FrameConfig, FrameHeader,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAGIC,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use tokio_codec::CommandCodec;
