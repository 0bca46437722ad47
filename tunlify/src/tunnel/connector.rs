use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::error::TunlifyError;

use super::connection::ConnectionPair;
use super::endpoint::Tunnel;
use super::utils::socket::{tcp_connect, SetStreamSockOpts as _};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    pub accept_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

/// Produces the single connection pair of a run: one accepted inbound connection and one
/// outbound connection to the destination.
pub struct Connector {
    tunnel: Tunnel,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Connector {
    /// Listen on the tunnel source. Nothing is accepted yet.
    pub async fn bind(tunnel: &Tunnel) -> Result<Self, TunlifyError> {
        let addr = tunnel.source();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TunlifyError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TunlifyError::Bind { addr, source })?;

        tracing::info!(%local_addr, "Listening for the inbound connection");
        Ok(Self {
            tunnel: *tunnel,
            listener,
            local_addr,
        })
    }

    /// The address actually listened on, which differs from the source when port 0 was asked.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept exactly one inbound connection, stop listening, then connect to the destination.
    pub async fn establish(self, options: &ConnectOptions) -> Result<ConnectionPair, TunlifyError> {
        let Self {
            tunnel,
            listener,
            local_addr,
        } = self;

        let (inbound, inbound_peer) = with_timeout(options.accept_timeout, listener.accept())
            .await
            .map_err(|source| TunlifyError::Accept {
                addr: local_addr,
                source,
            })?;
        drop(listener);
        tracing::info!("Connection accepted from {inbound_peer}");
        if let Err(error) = inbound.set_stream_common_sock_opts() {
            tracing::warn!(?error, "Failed to set socket options on the inbound connection");
        }

        let outbound_peer = tunnel.destination();
        let outbound = with_timeout(options.connect_timeout, tcp_connect(outbound_peer))
            .await
            .map_err(|source| TunlifyError::Connect {
                addr: outbound_peer,
                source,
            })?;
        tracing::info!("Connection established with {outbound_peer}");

        Ok(ConnectionPair {
            inbound,
            inbound_peer,
            outbound,
            outbound_peer,
        })
    }
}

async fn with_timeout<T>(
    limit: Option<Duration>,
    fut: impl Future<Output = std::io::Result<T>>,
) -> std::io::Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
            Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("timed out after {limit:?}"),
            ))
        }),
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{bail, Result};
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpStream;

    use super::*;

    fn localhost(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn unused_port() -> Result<u16> {
        portpicker::pick_unused_port().ok_or_else(|| anyhow::anyhow!("no free port"))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 10)]
    async fn test_establish() -> Result<()> {
        let server = TcpListener::bind(localhost(0)).await?;
        let tunnel = Tunnel::new(localhost(0), server.local_addr()?);

        let connector = Connector::bind(&tunnel).await?;
        let source = connector.local_addr();
        assert_ne!(source.port(), 0);

        let client_task = tokio::spawn(async move {
            let mut client = TcpStream::connect(source).await?;
            client.write_all(b"hello").await?;
            Ok::<_, std::io::Error>(client)
        });

        let options = ConnectOptions::default();
        let (pair, accepted) = tokio::join!(connector.establish(&options), server.accept());
        let mut pair = pair?;
        let (_server_side, _) = accepted?;
        let client = client_task.await??;

        assert_eq!(pair.inbound_peer, client.local_addr()?);
        assert_eq!(pair.outbound_peer, tunnel.destination());
        let mut buf = [0u8; 5];
        pair.inbound.read_exact(&mut buf).await?;
        assert_eq!(&buf, b"hello");

        // The listener is gone after the single accept.
        assert!(TcpStream::connect(source).await.is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 10)]
    async fn test_bind_conflict() -> Result<()> {
        let occupied = TcpListener::bind(localhost(0)).await?;
        let tunnel = Tunnel::new(occupied.local_addr()?, localhost(unused_port()?));

        match Connector::bind(&tunnel).await {
            Err(TunlifyError::Bind { addr, source }) => {
                assert_eq!(addr, tunnel.source());
                assert_eq!(source.kind(), std::io::ErrorKind::AddrInUse);
            }
            Err(error) => bail!("unexpected error: {error}"),
            Ok(_) => bail!("bind should fail"),
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 10)]
    async fn test_destination_refused() -> Result<()> {
        let tunnel = Tunnel::new(localhost(0), localhost(unused_port()?));
        let connector = Connector::bind(&tunnel).await?;
        let source = connector.local_addr();

        let options = ConnectOptions::default();
        let (pair, client) =
            tokio::join!(connector.establish(&options), TcpStream::connect(source));
        let _client = client?;

        match pair {
            Err(error @ TunlifyError::Connect { .. }) => {
                assert!(error.os_error_code().is_some());
            }
            Err(error) => bail!("unexpected error: {error}"),
            Ok(_) => bail!("connect should fail"),
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 10)]
    async fn test_accept_timeout() -> Result<()> {
        let tunnel = Tunnel::new(localhost(0), localhost(unused_port()?));
        let connector = Connector::bind(&tunnel).await?;

        let options = ConnectOptions {
            accept_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        match connector.establish(&options).await {
            Err(TunlifyError::Accept { source, .. }) => {
                assert_eq!(source.kind(), std::io::ErrorKind::TimedOut);
            }
            Err(error) => bail!("unexpected error: {error}"),
            Ok(_) => bail!("nobody connected"),
        }
        Ok(())
    }
}
