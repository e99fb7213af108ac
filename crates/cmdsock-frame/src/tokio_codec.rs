//! `tokio_util::codec` adapter for async callers.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::assembler::{advance, DecodeState};
use crate::codec::{encode_frame, Frame, DEFAULT_MAX_PAYLOAD};
use crate::error::FrameError;

/// Frame codec for `FramedRead` / `FramedWrite`.
///
/// Decoding follows the same rules as [`FrameAssembler`](crate::FrameAssembler):
/// a bad header clears the read buffer and decoding continues with the next
/// bytes; it never ends the stream.
#[derive(Debug, Clone)]
pub struct CommandCodec {
    state: DecodeState,
    max_payload: usize,
    discarded: u64,
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandCodec {
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            state: DecodeState::AwaitingHeader,
            max_payload,
            discarded: 0,
        }
    }

    pub fn discarded_headers(&self) -> u64 {
        self.discarded
    }
}

impl Decoder for CommandCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        match advance(&mut self.state, src, self.max_payload) {
            Ok(frame) => Ok(frame),
            Err(err) if err.is_framing() => {
                self.discarded = self.discarded.saturating_add(1);
                warn!(error = %err, "framing error; discarding buffered input");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

impl Encoder<Frame> for CommandCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame(item.command_id, &item.payload, dst)
    }
}
