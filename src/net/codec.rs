//! Length-prefixed framing over a reliable byte stream.
//!
//! Every frame is a 4-byte big-endian payload length followed by the payload.
//! A closed stream mid-frame or a zero/oversized length header is fatal.

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::trace;

use super::{Message, NetError};

/// Upper bound on a frame payload. The largest legitimate frames are
/// SET_ROBOTS and FINAL_POSITIONS, 5 + 24 bytes per robot; this admits
/// several million robots on a single worker.
pub const MAX_FRAME_LEN: usize = 128 * 1024 * 1024;

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, NetError> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await.map_err(map_eof)?;

    let len = u32::from_be_bytes(header) as usize;
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(NetError::InvalidFrameLength(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(map_eof)?;
    Ok(payload)
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), NetError> {
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    Ok(())
}

fn map_eof(e: io::Error) -> NetError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        NetError::ConnectionClosed
    } else {
        NetError::Io(e)
    }
}

/// A framed, message-typed TCP connection.
pub struct Connection {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    pub peer_addr: SocketAddr,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Result<Self, NetError> {
        let peer_addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        Ok(Self { reader, writer, peer_addr })
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), NetError> {
        trace!("Sending '{}' to {}", message.name(), self.peer_addr);
        write_frame(&mut self.writer, &message.encode()).await
    }

    pub async fn recv(&mut self) -> Result<Message, NetError> {
        let payload = read_frame(&mut self.reader).await?;
        let message = Message::decode(&payload)?;
        trace!("Received '{}' from {}", message.name(), self.peer_addr);
        Ok(message)
    }

    /// Receive one message and fail the connection unless it carries the
    /// expected tag.
    pub async fn expect(&mut self, expected: u8) -> Result<Message, NetError> {
        let message = self.recv().await?;
        if message.tag() != expected {
            return Err(NetError::UnexpectedMessage {
                got: message.name(),
                expected: Message::name_of(expected),
            });
        }
        Ok(message)
    }
}
