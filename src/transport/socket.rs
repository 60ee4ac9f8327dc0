//! TCP socket setup shared by both actors.
//!
//! Every socket gets `SO_REUSEADDR` before bind/connect; every connected stream gets
//! `TCP_NODELAY` and `SO_KEEPALIVE`.

use std::io;
use std::net::SocketAddr;

use socket2::SockRef;
use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// Pending connections kept by a listener that only ever accepts one.
const LISTEN_BACKLOG: u32 = 128;

fn new_socket(addr: &SocketAddr) -> io::Result<TcpSocket> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    Ok(socket)
}

/// Apply per-connection options to an established stream.
pub(crate) fn configure_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    SockRef::from(stream).set_keepalive(true)
}

/// Open a configured TCP connection to `addr`.
pub(crate) async fn connect(addr: SocketAddr) -> io::Result<TcpStream> {
    let socket = new_socket(&addr)?;
    let stream = socket.connect(addr).await?;
    configure_stream(&stream)?;
    Ok(stream)
}

/// Bind and start listening on `addr`.
pub(crate) fn listen(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = new_socket(&addr)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}
