use std::io::{ErrorKind, Read};

use cmdsock_transport::IpcStream;

use crate::assembler::FrameAssembler;
use crate::codec::{Frame, FrameConfig};
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally — callers always get complete frames.
/// Headers with a bad magic are dropped together with everything buffered
/// alongside them, and reading continues.
pub struct FrameReader<T> {
    inner: T,
    assembler: FrameAssembler,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            assembler: FrameAssembler::with_max_payload(config.max_payload_size),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.assembler.next_frame() {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.assembler.push(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Number of times buffered input was discarded after a framing error.
    pub fn discarded_headers(&self) -> u64 {
        self.assembler.discarded_headers()
    }

    /// Update maximum payload size for subsequent frame decoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
        self.assembler.set_max_payload_size(max_payload_size);
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<IpcStream> {
    /// Create a frame reader for `IpcStream` and apply read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: cmdsock_transport::TransportError) -> FrameError {
    match err {
        cmdsock_transport::TransportError::Io(io)
        | cmdsock_transport::TransportError::Accept(io) => FrameError::Io(io),
        cmdsock_transport::TransportError::Bind { source, .. }
        | cmdsock_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::{encode_frame, encode_header, FrameHeader, HEADER_SIZE};

    #[test]
    fn read_single_frame() {
        let mut wire = BytesMut::new();
        encode_frame(1, b"hello", &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.command_id, 1);
        assert_eq!(frame.payload.as_ref(), b"hello");
    }

    #[test]
    fn read_multiple_frames() {
        let mut wire = BytesMut::new();
        encode_frame(1, b"one", &mut wire).unwrap();
        encode_frame(2, b"two", &mut wire).unwrap();
        encode_frame(3, b"", &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));

        let f1 = reader.read_frame().unwrap();
        let f2 = reader.read_frame().unwrap();
        let f3 = reader.read_frame().unwrap();

        assert_eq!((f1.command_id, f1.payload.as_ref()), (1, b"one".as_ref()));
        assert_eq!((f2.command_id, f2.payload.as_ref()), (2, b"two".as_ref()));
        assert_eq!((f3.command_id, f3.payload.as_ref()), (3, b"".as_ref()));
    }

    #[test]
    fn read_frame_with_large_payload() {
        let payload = vec![0xAB; 64 * 1024];
        let mut wire = BytesMut::new();
        encode_frame(9, &payload, &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.command_id, 9);
        assert_eq!(frame.payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn partial_read_handling() {
        let mut wire = BytesMut::new();
        encode_frame(4, b"slow", &mut wire).unwrap();

        let mut reader = FrameReader::new(ByteByByteReader::new(wire.to_vec()));

        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.command_id, 4);
        assert_eq!(frame.payload.as_ref(), b"slow");
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_frame() {
        let mut partial = BytesMut::new();
        encode_header(&FrameHeader::new(2, 16), &mut partial);
        partial.put_slice(b"only-part");

        let mut reader = FrameReader::new(Cursor::new(partial.to_vec()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn invalid_magic_drops_frames_read_in_same_chunk() {
        let mut wire = BytesMut::new();
        wire.put_slice(&[0u8; HEADER_SIZE]);
        encode_frame(1, b"swallowed", &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
        assert_eq!(reader.discarded_headers(), 1);
    }

    #[test]
    fn invalid_magic_resyncs_on_later_bytes() {
        let mut wire = BytesMut::new();
        wire.put_slice(&[0u8; HEADER_SIZE]);
        encode_frame(6, b"after", &mut wire).unwrap();

        // One byte per read: the bad header is complete (and dropped) before
        // any byte of the good frame is buffered.
        let mut reader = FrameReader::new(ByteByByteReader::new(wire.to_vec()));
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.command_id, 6);
        assert_eq!(frame.payload.as_ref(), b"after");
        assert_eq!(reader.discarded_headers(), 1);
    }

    #[test]
    fn oversized_frame_in_stream_is_discarded() {
        let mut wire = BytesMut::new();
        encode_header(&FrameHeader::new(1, 1024), &mut wire);

        let cfg = FrameConfig {
            max_payload_size: 16,
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config(Cursor::new(wire.to_vec()), cfg);
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
        assert_eq!(reader.discarded_headers(), 1);
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl ByteByByteReader {
        fn new(bytes: Vec<u8>) -> Self {
            Self { bytes, pos: 0 }
        }
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }

            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn roundtrip_over_pipe() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        writer.send(1, b"ping").unwrap();
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.command_id, 1);
        assert_eq!(frame.payload.as_ref(), b"ping");
    }

    #[test]
    fn concurrent_reader_writer_threads() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        let reader_thread = std::thread::spawn(move || {
            for expected in 0..64u32 {
                let frame = reader.read_frame().unwrap();
                assert_eq!(frame.command_id, expected % 5);
                assert_eq!(frame.payload.as_ref(), format!("msg-{expected}").as_bytes());
            }
        });

        for i in 0..64u32 {
            let payload = format!("msg-{i}");
            writer.send(i % 5, payload.as_bytes()).unwrap();
        }

        reader_thread.join().unwrap();
    }

    #[test]
    fn interrupted_read_retries() {
        let mut wire = BytesMut::new();
        encode_frame(8, b"ok", &mut wire).unwrap();

        let reader = InterruptedThenData {
            state: 0,
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let frame = framed.read_frame().unwrap();

        assert_eq!(frame.command_id, 8);
        assert_eq!(frame.payload.as_ref(), b"ok");
    }

    #[test]
    fn would_block_propagates_io_error() {
        let mut framed = FrameReader::new(WouldBlockReader);
        let err = framed.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
    }

    struct WouldBlockReader;

    impl Read for WouldBlockReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::WouldBlock))
        }
    }

    struct InterruptedThenData {
        state: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.state == 0 {
                self.state = 1;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    #[cfg(unix)]
    fn roundtrip_over_ipc_stream_uds() {
        let dir = std::env::temp_dir().join(format!(
            "cmdsock-frame-uds-roundtrip-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let sock_path = dir.join("test.sock");
        let listener = cmdsock_transport::UnixDomainSocket::bind(&sock_path).unwrap();

        let server = std::thread::spawn(move || {
            let stream = listener.accept().unwrap();
            let cfg = FrameConfig {
                read_timeout: Some(std::time::Duration::from_secs(5)),
                ..FrameConfig::default()
            };
            let mut reader = FrameReader::with_config_ipc(stream, cfg).unwrap();
            let frame = reader.read_frame().unwrap();
            assert_eq!(frame.command_id, 11);
            assert_eq!(frame.payload.as_ref(), b"uds");
        });

        let stream = cmdsock_transport::UnixDomainSocket::connect(&sock_path).unwrap();
        let mut writer = crate::writer::FrameWriter::new(stream);
        writer.send(11, b"uds").unwrap();

        server.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
