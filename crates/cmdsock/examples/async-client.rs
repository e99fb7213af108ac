//! Async client using the tokio codec: sends one command and prints the
//! commands the server broadcasts back.
//!
//! Run `broadcast-server` first, then:
//!   cargo run --example async-client --features async -- <socket path>

use cmdsock::frame::{CommandCodec, Frame};
use futures_util::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| cmdsock::transport::DEFAULT_SOCKET_PATH.to_string());

    let stream = UnixStream::connect(&path).await?;
    let mut framed = Framed::new(stream, CommandCodec::new());

    framed.send(Frame::new(1, &b"hello from tokio"[..])).await?;

    while let Some(frame) = framed.next().await {
        let frame = frame?;
        println!(
            "command {}: {}",
            frame.command_id,
            String::from_utf8_lossy(&frame.payload)
        );
    }

    Ok(())
}
