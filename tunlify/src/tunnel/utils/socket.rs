use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::TcpStream;

const TCP_KEEPALIVE_IDLE: Duration = Duration::from_secs(30);
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
#[cfg(any(target_os = "linux", target_os = "macos"))]
const TCP_KEEPALIVE_RETRIES: u32 = 5;

fn tcp_keepalive() -> TcpKeepalive {
    let keepalive = TcpKeepalive::new()
        .with_time(TCP_KEEPALIVE_IDLE)
        .with_interval(TCP_KEEPALIVE_INTERVAL);
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    let keepalive = keepalive.with_retries(TCP_KEEPALIVE_RETRIES);
    keepalive
}

pub trait SetStreamSockOpts {
    /// Keepalive, so a vanished peer is eventually noticed, and no Nagle delay on relayed
    /// blocks.
    fn set_stream_common_sock_opts(&self) -> std::io::Result<()>;
}

impl SetStreamSockOpts for TcpStream {
    fn set_stream_common_sock_opts(&self) -> std::io::Result<()> {
        SockRef::from(self).set_tcp_keepalive(&tcp_keepalive())?;
        self.set_nodelay(true)?;
        Ok(())
    }
}

/// Connect to `addr` with a socket of the matching address family.
pub async fn tcp_connect(addr: SocketAddr) -> std::io::Result<TcpStream> {
    tracing::debug!("Trying to tcp connect to {addr}");
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket.set_tcp_keepalive(&tcp_keepalive())?;

    let socket = tokio::net::TcpSocket::from_std_stream(socket.into());
    let stream = socket.connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
