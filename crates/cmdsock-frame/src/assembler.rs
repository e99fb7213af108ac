//! Incremental frame assembly.
//!
//! [`FrameAssembler`] accepts bytes in whatever chunks the transport delivers
//! and yields complete frames. Chunk boundaries never change the sequence of
//! frames produced.

use bytes::{Buf, BytesMut};
use tracing::{trace, warn};

use crate::codec::{decode_header, Frame, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Where the decoder is inside the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeState {
    /// Waiting for a full 12-byte header.
    #[default]
    AwaitingHeader,
    /// Header parsed; waiting for `payload_len` payload bytes.
    AwaitingPayload { command_id: u32, payload_len: usize },
}

/// Advance the state machine over `buf` by at most one frame.
///
/// On a framing error the whole buffer is cleared and `state` is back at
/// [`DecodeState::AwaitingHeader`] before the error is returned.
pub(crate) fn advance(
    state: &mut DecodeState,
    buf: &mut BytesMut,
    max_payload: usize,
) -> Result<Option<Frame>> {
    loop {
        match *state {
            DecodeState::AwaitingHeader => {
                let header = match decode_header(buf) {
                    Ok(Some(header)) => header,
                    Ok(None) => return Ok(None),
                    Err(err) => {
                        buf.clear();
                        return Err(err);
                    }
                };
                buf.advance(HEADER_SIZE);

                let payload_len = header.payload_len as usize;
                if payload_len > max_payload {
                    buf.clear();
                    return Err(FrameError::PayloadTooLarge {
                        size: payload_len,
                        max: max_payload,
                    });
                }

                *state = DecodeState::AwaitingPayload {
                    command_id: header.command_id,
                    payload_len,
                };
            }
            DecodeState::AwaitingPayload {
                command_id,
                payload_len,
            } => {
                if buf.len() < payload_len {
                    return Ok(None);
                }
                let payload = buf.split_to(payload_len).freeze();
                *state = DecodeState::AwaitingHeader;
                return Ok(Some(Frame {
                    command_id,
                    payload,
                }));
            }
        }
    }
}

/// Per-connection receive buffer plus decode state.
#[derive(Debug)]
pub struct FrameAssembler {
    buf: BytesMut,
    state: DecodeState,
    max_payload: usize,
    discarded: u64,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    /// Empty assembler with the default payload limit.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    /// Empty assembler rejecting payloads above `max_payload` bytes.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            state: DecodeState::AwaitingHeader,
            max_payload,
            discarded: 0,
        }
    }

    /// Append freshly received bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, if the buffer holds one.
    ///
    /// A bad header drops everything buffered so far and returns `None`;
    /// decoding restarts with the next pushed bytes.
    pub fn next_frame(&mut self) -> Option<Frame> {
        match advance(&mut self.state, &mut self.buf, self.max_payload) {
            Ok(frame) => {
                if let Some(frame) = &frame {
                    trace!(
                        command_id = frame.command_id,
                        len = frame.payload.len(),
                        "frame assembled"
                    );
                }
                frame
            }
            Err(err) => {
                self.discarded = self.discarded.saturating_add(1);
                warn!(error = %err, "framing error; discarding buffered input");
                None
            }
        }
    }

    /// Push `chunk` and hand every frame it completes to `on_frame`, in order.
    ///
    /// Returns the number of frames delivered.
    pub fn feed(&mut self, chunk: &[u8], mut on_frame: impl FnMut(Frame)) -> usize {
        self.push(chunk);
        let mut delivered = 0usize;
        while let Some(frame) = self.next_frame() {
            on_frame(frame);
            delivered += 1;
        }
        delivered
    }

    /// Current decode state.
    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Bytes buffered but not yet part of a delivered frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// How many times a framing error forced the buffer to be discarded.
    pub fn discarded_headers(&self) -> u64 {
        self.discarded
    }

    /// Update the payload limit for subsequent headers.
    pub fn set_max_payload_size(&mut self, max_payload: usize) {
        self.max_payload = max_payload;
    }
}
