//! Per-connection receive loop.

use std::io::{ErrorKind, Read};
use std::sync::Arc;

use cmdsock_frame::{DecodeState, FrameAssembler};
use tracing::{debug, trace};

use crate::config::ServerConfig;
use crate::events::{CommandEvent, EventHub};
use crate::registry::ClientId;

/// Turns one client's byte stream into command events.
///
/// Owns the client's receive buffer and decode state. Each chunk read from the
/// stream is fed to the assembler and every frame it completes is dispatched
/// before the next read, so a chunk holding several frames yields all of them
/// in one pass.
#[derive(Debug)]
pub struct ConnectionHandler {
    client_id: ClientId,
    assembler: FrameAssembler,
    events: Arc<EventHub>,
    read_chunk_size: usize,
}

impl ConnectionHandler {
    /// Fresh handler: empty buffer, awaiting a header.
    pub fn new(client_id: ClientId, events: Arc<EventHub>, config: &ServerConfig) -> Self {
        Self {
            client_id,
            assembler: FrameAssembler::with_max_payload(config.frame.max_payload_size),
            events,
            read_chunk_size: config.read_chunk_size.max(1),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Feed received bytes; dispatch every command they complete.
    ///
    /// Returns the number of commands dispatched.
    pub fn process(&mut self, chunk: &[u8]) -> usize {
        trace!(client = %self.client_id, len = chunk.len(), "bytes received");
        let client_id = self.client_id;
        let events = &self.events;
        self.assembler.feed(chunk, |frame| {
            events.dispatch_command(&CommandEvent {
                client_id,
                command_id: frame.command_id,
                payload: frame.payload,
            });
        })
    }

    /// Read from `stream` until the peer closes it or a read fails.
    ///
    /// `Ok(())` means a clean EOF. Whatever is still buffered is dropped.
    pub fn run<R: Read>(&mut self, stream: &mut R) -> std::io::Result<()> {
        let mut chunk = vec![0u8; self.read_chunk_size];
        loop {
            let read = match stream.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };

            if read == 0 {
                if self.assembler.buffered() > 0 {
                    debug!(
                        client = %self.client_id,
                        pending = self.assembler.buffered(),
                        "connection closed mid-frame"
                    );
                }
                return Ok(());
            }

            self.process(&chunk[..read]);
        }
    }

    pub fn state(&self) -> DecodeState {
        self.assembler.state()
    }

    pub fn buffered(&self) -> usize {
        self.assembler.buffered()
    }

    pub fn discarded_headers(&self) -> u64 {
        self.assembler.discarded_headers()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;

    use bytes::{BufMut, BytesMut};
    use cmdsock_frame::{encode_frame, encode_header, FrameHeader};

    use super::*;

    type Seen = Arc<Mutex<Vec<(u32, Vec<u8>)>>>;

    fn handler() -> (ConnectionHandler, Seen) {
        let events = Arc::new(EventHub::new());
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            events.on_command(move |ev| {
                seen.lock()
                    .unwrap()
                    .push((ev.command_id, ev.payload.to_vec()));
            });
        }
        let handler = ConnectionHandler::new(ClientId::new(1), events, &ServerConfig::default());
        (handler, seen)
    }

    fn frame_bytes(command_id: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(command_id, payload, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn ten_then_five_bytes_emit_one_command() {
        let (mut handler, seen) = handler();
        let bytes = frame_bytes(5, b"abc");

        assert_eq!(handler.process(&bytes[..10]), 0);
        assert!(seen.lock().unwrap().is_empty());

        assert_eq!(handler.process(&bytes[10..]), 1);
        assert_eq!(*seen.lock().unwrap(), vec![(5, b"abc".to_vec())]);
    }

    #[test]
    fn two_frames_in_one_chunk_in_order() {
        let (mut handler, seen) = handler();
        let mut bytes = frame_bytes(1, b"first");
        bytes.extend(frame_bytes(2, b"second"));

        assert_eq!(handler.process(&bytes), 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1, b"first".to_vec()), (2, b"second".to_vec())]
        );
    }

    #[test]
    fn byte_at_a_time_matches_all_at_once() {
        let mut bytes = frame_bytes(1, b"one");
        bytes.extend(frame_bytes(2, b""));
        bytes.extend(frame_bytes(3, &[7u8; 100]));

        let (mut whole, seen_whole) = handler();
        whole.process(&bytes);

        let (mut split, seen_split) = handler();
        for byte in &bytes {
            split.process(std::slice::from_ref(byte));
        }

        assert_eq!(seen_whole.lock().unwrap().len(), 3);
        assert_eq!(*seen_whole.lock().unwrap(), *seen_split.lock().unwrap());
    }

    #[test]
    fn bad_magic_emits_nothing() {
        let (mut handler, seen) = handler();
        let mut bytes = BytesMut::new();
        encode_header(
            &FrameHeader {
                magic: 123,
                command_id: 5,
                payload_len: 0,
            },
            &mut bytes,
        );
        bytes.put_slice(b"trailing garbage");

        assert_eq!(handler.process(&bytes), 0);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(handler.buffered(), 0);
        assert_eq!(handler.discarded_headers(), 1);
        assert_eq!(handler.state(), DecodeState::AwaitingHeader);

        assert_eq!(handler.process(&frame_bytes(6, b"ok")), 1);
        assert_eq!(*seen.lock().unwrap(), vec![(6, b"ok".to_vec())]);
    }

    #[test]
    fn run_stops_at_eof() {
        let (mut handler, seen) = handler();
        let mut bytes = frame_bytes(1, b"a");
        bytes.extend(frame_bytes(2, b"b"));
        bytes.extend(&frame_bytes(3, b"cut")[..13]);

        let mut stream = Cursor::new(bytes);
        handler.run(&mut stream).unwrap();

        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(handler.buffered(), 1);
    }

    #[test]
    fn run_with_tiny_reads_still_assembles() {
        let events = Arc::new(EventHub::new());
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            events.on_command(move |ev| {
                seen.lock()
                    .unwrap()
                    .push((ev.command_id, ev.payload.to_vec()));
            });
        }
        let config = ServerConfig::default().with_read_chunk_size(3);
        let mut handler = ConnectionHandler::new(ClientId::new(2), events, &config);

        let mut stream = Cursor::new(frame_bytes(9, b"chunked payload"));
        handler.run(&mut stream).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(9, b"chunked payload".to_vec())]);
    }
}
