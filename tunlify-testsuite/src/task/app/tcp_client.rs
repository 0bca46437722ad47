use std::time::Duration;

use anyhow::{anyhow, bail, Context as _, Result};
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::TcpStream,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

async fn connect(port: u16) -> Result<TcpStream> {
    tracing::info!("TCP client connecting to 127.0.0.1:{port}");
    let connect_task = async {
        TcpStream::connect(("127.0.0.1", port))
            .await
            .context("Failed to connect to the tunnel")
    };

    let stream = tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(10)) => {
            Err(anyhow!("The TCP client task timed out"))
        }
        result = connect_task => result,
    }?;
    tracing::info!("Connected to the tunnel");
    Ok(stream)
}

pub async fn launch_tcp_client(
    token: CancellationToken,
    port: u16,
    payload: &'static [u8],
) -> Result<JoinHandle<Result<()>>> {
    Ok(tokio::task::spawn(async move {
        let _drop_guard = token.drop_guard();

        let mut stream = connect(port).await?;
        stream.write_all(payload).await?;

        let mut response = vec![0u8; payload.len()];
        tokio::time::timeout(Duration::from_secs(10), stream.read_exact(&mut response))
            .await
            .context("Timeout waiting for the echoed payload")??;
        if response != payload {
            bail!(
                "The response body should be `{}`, but got `{}`",
                String::from_utf8_lossy(payload),
                String::from_utf8_lossy(&response)
            )
        }
        tracing::info!("Success! The response matchs expected value");

        stream.shutdown().await?;

        // The tunnel closes the connection after the half-close, without extra bytes.
        let mut rest = Vec::new();
        let _ = tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut rest))
            .await
            .context("The tunnel did not close the connection")?;
        if !rest.is_empty() {
            bail!("Got {} unexpected bytes after the echo", rest.len());
        }

        tracing::info!("The TCP client task normally exited");
        Ok(())
    }))
}

pub async fn launch_half_close_client(
    token: CancellationToken,
    port: u16,
    payload: &'static [u8],
) -> Result<JoinHandle<Result<()>>> {
    Ok(tokio::task::spawn(async move {
        let _drop_guard = token.drop_guard();

        let mut stream = connect(port).await?;
        stream.write_all(payload).await?;
        stream.shutdown().await?;

        // The server never stops sending, so the tunnel has to end the connection itself.
        let mut received = 0usize;
        let mut buffer = [0u8; 4096];
        let drained = tokio::time::timeout(Duration::from_secs(10), async {
            while let Ok(size) = stream.read(&mut buffer).await {
                if size == 0 {
                    break;
                }
                received += size;
            }
        })
        .await;
        if drained.is_err() {
            bail!("The tunnel kept the connection open after the half-close");
        }

        tracing::info!(received, "The half-close client task normally exited");
        Ok(())
    }))
}
