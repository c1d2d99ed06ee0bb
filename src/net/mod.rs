//! Networking layer: ports, socket tuning, framing, and the wire protocol.

pub mod codec;
pub mod message;

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::debug;

pub use codec::{read_frame, write_frame, Connection, MAX_FRAME_LEN};
pub use message::Message;

/// The port the master listens on for workers to join.
pub const SERVER_PORT: u16 = 2828;

/// Each worker listens for its left neighbour on this base plus its id.
pub const BASE_NEIGHBOUR_PORT: u16 = 2929;

/// Backlog for listening sockets.
pub const LISTEN_BACKLOG: u32 = 20;

/// Textual IP addresses on the wire are padded to this length (fits IPv6).
pub const IP_ADDRESS_LENGTH: usize = 46;

/// Send/receive buffer size for peer channels: large enough to cover the
/// bandwidth-delay product of a saturated LAN round trip.
pub const PEER_SOCKET_BUFFER_SIZE: u32 = 32 * 1024 * 1024;

/// How long to keep retrying a refused dial during ring bring-up.
const DIAL_RETRY_LIMIT: u32 = 50;
const DIAL_RETRY_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum NetError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("connection closed by remote")]
    ConnectionClosed,

    #[error("invalid frame length {0}")]
    InvalidFrameLength(usize),

    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),

    #[error("malformed '{0}' payload")]
    MalformedPayload(&'static str),

    #[error("received '{got}' message when expecting '{expected}'")]
    UnexpectedMessage {
        got: &'static str,
        expected: &'static str,
    },

    #[error("invalid neighbour address '{0}'")]
    InvalidAddress(String),

    #[error("{0} neighbour already set")]
    NeighbourAlreadySet(&'static str),

    #[error("peer channel is not neighboured yet")]
    NotNeighboured,

    #[error("universe parameters not set")]
    UniverseNotSet,

    #[error("robot id {0} out of range")]
    UnknownRobot(u32),

    #[error("peer task ended unexpectedly")]
    Disbanded,
}

/// Connect to a peer worker with tuned buffers, TCP_NODELAY, and a bounded
/// retry for the bring-up window in which the neighbour is assigned but not
/// yet listening.
pub async fn connect_peer(addr: SocketAddr) -> Result<TcpStream, NetError> {
    let mut attempts = 0;
    loop {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_send_buffer_size(PEER_SOCKET_BUFFER_SIZE)?;
        socket.set_recv_buffer_size(PEER_SOCKET_BUFFER_SIZE)?;

        match socket.connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused && attempts < DIAL_RETRY_LIMIT => {
                attempts += 1;
                debug!("Neighbour {} not listening yet, retrying", addr);
                tokio::time::sleep(DIAL_RETRY_PAUSE).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Bind the listener a worker exposes to its left neighbour. Buffer sizes are
/// set on the listening socket so accepted peer sockets inherit them.
pub fn bind_peer_listener(port: u16) -> Result<TcpListener, NetError> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.set_send_buffer_size(PEER_SOCKET_BUFFER_SIZE)?;
    socket.set_recv_buffer_size(PEER_SOCKET_BUFFER_SIZE)?;
    socket.bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))?;
    Ok(socket.listen(LISTEN_BACKLOG)?)
}
