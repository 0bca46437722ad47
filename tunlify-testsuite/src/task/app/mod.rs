use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Task;

mod tcp_client;
mod tcp_server;

pub const TCP_PAYLOAD: &str = "Hello World TCP!";

pub enum AppType {
    /// Echo server, serves connections until the test is over.
    TcpServer { port: u16 },
    /// Server sending data endlessly to each connection, never reading.
    FloodServer { port: u16 },
    /// Sends the payload, expects it back, then closes.
    TcpClient { port: u16, payload: &'static [u8] },
    /// Sends the payload and closes its write side right away, without waiting for any reply.
    HalfCloseClient { port: u16, payload: &'static [u8] },
}

#[async_trait]
impl Task for AppType {
    fn name(&self) -> String {
        match self {
            AppType::TcpServer { .. } | AppType::FloodServer { .. } => "app_server",
            AppType::TcpClient { .. } | AppType::HalfCloseClient { .. } => "app_client",
        }
        .to_owned()
    }

    async fn launch(&self, token: CancellationToken) -> Result<JoinHandle<Result<()>>> {
        match self {
            AppType::TcpServer { port } => tcp_server::launch_tcp_server(token, *port).await,
            AppType::FloodServer { port } => tcp_server::launch_flood_server(token, *port).await,
            AppType::TcpClient { port, payload } => {
                tcp_client::launch_tcp_client(token, *port, payload).await
            }
            AppType::HalfCloseClient { port, payload } => {
                tcp_client::launch_half_close_client(token, *port, payload).await
            }
        }
    }
}
