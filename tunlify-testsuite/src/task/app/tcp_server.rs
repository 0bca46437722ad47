use std::net::SocketAddr;

use anyhow::{Context as _, Result};
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::TcpListener,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to listen on {addr}"))?;
    tracing::info!("TCP server listening on {addr}");
    Ok(listener)
}

pub async fn launch_tcp_server(
    token: CancellationToken,
    port: u16,
) -> Result<JoinHandle<Result<()>>> {
    let listener = bind(port).await?;

    Ok(tokio::task::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("The TCP server task cancelled");
                    break
                },
                result = listener.accept() => {
                    let (mut stream, addr) = result?;
                    tracing::info!("Accepted connection from {}", addr);

                    let mut buffer = [0; 512];
                    while let Ok(size) = stream.read(&mut buffer).await {
                        if size == 0 {
                            break;
                        }
                        stream
                            .write_all(&buffer[0..size])
                            .await
                            .context("Failed to write back data")?;
                    }
                    // Forward the half-close back to the client.
                    let _ = stream.shutdown().await;
                }
            }
        }
        Ok(())
    }))
}

pub async fn launch_flood_server(
    token: CancellationToken,
    port: u16,
) -> Result<JoinHandle<Result<()>>> {
    let listener = bind(port).await?;

    Ok(tokio::task::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("The flood server task cancelled");
                    break
                },
                result = listener.accept() => {
                    let (mut stream, addr) = result?;
                    tracing::info!("Accepted connection from {}, flooding it", addr);

                    let block = [b'f'; 4096];
                    let mut sent = 0u64;
                    // Only stops once the peer is gone.
                    while stream.write_all(&block).await.is_ok() {
                        sent += block.len() as u64;
                    }
                    tracing::info!(sent, "Connection closed by the peer");
                }
            }
        }
        Ok(())
    }))
}
