use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use cmdsock_frame::{Frame, FrameConfig, FrameError, FrameReader, FrameWriter};
use cmdsock_transport::{IpcStream, UnixDomainSocket};
use tracing::debug;

use crate::error::{Result, ServerError};

/// Client end of a command channel.
///
/// Sends commands to the server and receives the commands it broadcasts.
pub struct CommandClient {
    reader: FrameReader<IpcStream>,
    writer: FrameWriter<IpcStream>,
    read_timeout: Option<Duration>,
}

impl CommandClient {
    /// Connect to the server listening on `path`.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Self::connect_with_config(path, FrameConfig::default())
    }

    /// Connect with an explicit payload limit and timeouts.
    pub fn connect_with_config(path: impl AsRef<Path>, config: FrameConfig) -> Result<Self> {
        let stream = UnixDomainSocket::connect(path.as_ref())?;
        let reader_stream = stream.try_clone()?;
        let read_timeout = config.read_timeout;

        let reader = FrameReader::with_config_ipc(reader_stream, config.clone())?;
        let writer = FrameWriter::with_config_ipc(stream, config)?;
        debug!(path = ?path.as_ref(), "connected to command server");

        Ok(Self {
            reader,
            writer,
            read_timeout,
        })
    }

    /// Send one command to the server.
    pub fn send_command(&mut self, command_id: u32, payload: &[u8]) -> Result<()> {
        self.writer.send(command_id, payload)?;
        Ok(())
    }

    /// Block until the next command arrives from the server.
    ///
    /// Returns [`ServerError::Timeout`] when a read timeout is set and
    /// elapses, and [`ServerError::Disconnected`] once the server closes the
    /// connection.
    pub fn recv(&mut self) -> Result<Frame> {
        match self.reader.read_frame() {
            Ok(frame) => Ok(frame),
            Err(FrameError::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                Err(ServerError::Timeout(self.read_timeout.unwrap_or_default()))
            }
            Err(FrameError::ConnectionClosed) => Err(ServerError::Disconnected),
            Err(err) => Err(err.into()),
        }
    }

    /// Change the read timeout used by [`recv`](Self::recv).
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.reader.get_ref().set_read_timeout(timeout)?;
        self.read_timeout = timeout;
        Ok(())
    }

    /// Number of times received input was dropped because it could not be framed.
    pub fn discarded_headers(&self) -> u64 {
        self.reader.discarded_headers()
    }

    /// Close the connection. The server sees EOF for this client.
    pub fn close(self) -> Result<()> {
        self.writer.get_ref().shutdown()?;
        Ok(())
    }
}

impl std::fmt::Debug for CommandClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandClient")
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}
