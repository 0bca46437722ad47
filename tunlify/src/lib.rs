#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use shadow_rs::shadow;

pub mod config;
pub mod error;
pub mod runtime;
pub mod state;
pub mod tunnel;

shadow!(build);

pub use crate::tunnel::stream::CommonStreamTrait;

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use anyhow::{bail, Result};
    use scopeguard::defer;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::select;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

    use crate::config::{CaptureArgs, TunlifyConfig};
    use crate::error::TunlifyError;
    use crate::runtime::TunlifyRuntime;
    use crate::state::RunState;
    use crate::tunnel::capture::CaptureFormat;
    use crate::tunnel::relay::{CloseCause, RelayReport};

    #[ctor::ctor]
    fn init() {
        // Initialize log tracing
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer().with_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                        "info,tokio_graceful=off,tunlify=debug".into()
                    }),
                ),
            )
            .init();
    }

    fn localhost(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn unused_port() -> Result<u16> {
        portpicker::pick_unused_port().ok_or_else(|| anyhow::anyhow!("no free port"))
    }

    async fn echo_server() -> Result<SocketAddr> {
        let listener = TcpListener::bind(localhost(0)).await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let (mut reader, mut writer) = stream.into_split();
            if tokio::io::copy(&mut reader, &mut writer).await.is_ok() {
                let _ = writer.shutdown().await;
            }
        });
        Ok(addr)
    }

    /// Start the runtime and wait until it listens.
    async fn launch(
        config: TunlifyConfig,
    ) -> Result<(
        SocketAddr,
        tokio::task::JoinHandle<Result<RelayReport, TunlifyError>>,
    )> {
        let (ready_sender, ready_receiver) = tokio::sync::oneshot::channel();
        let tunlify_runtime = TunlifyRuntime::from_config(config)?;
        let join_handle = tokio::task::spawn(async move {
            tunlify_runtime.serve_with_ready(ready_sender).await
        });
        match ready_receiver.await {
            Ok(addr) => Ok((addr, join_handle)),
            Err(_) => bail!("tunlify exited before ready: {:?}", join_handle.await?),
        }
    }

    async fn wait_exit(
        join_handle: tokio::task::JoinHandle<Result<RelayReport, TunlifyError>>,
    ) -> Result<Result<RelayReport, TunlifyError>> {
        select! {
            _ = tokio::time::sleep(Duration::from_secs(10)) => {
                defer! {
                    std::process::exit(1);
                }
                panic!("Wait for tunlify exit timeout")
            }
            res = join_handle => Ok(res?)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 10)]
    async fn test_exit_on_cancel() -> Result<()> {
        let config = TunlifyConfig::new(localhost(0), localhost(unused_port()?));

        let tunlify_runtime = TunlifyRuntime::from_config(config)?;
        let canceller = tunlify_runtime.canceller();
        let state = tunlify_runtime.state();
        let (ready_sender, ready_receiver) = tokio::sync::oneshot::channel();
        let join_handle = tokio::task::spawn(async move {
            tunlify_runtime.serve_with_ready(ready_sender).await
        });

        ready_receiver.await?;
        assert!(*state.ready.1.borrow());
        // tunlify is ready now, so we cancel it
        canceller.cancel();

        let report = wait_exit(join_handle).await??;
        assert_eq!(report, RelayReport::cancelled());
        assert_eq!(state.run_state(), RunState::Closed);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 10)]
    async fn test_ping_echo_with_capture() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let capture_path = dir.path().join("capture.bin");

        let mut config = TunlifyConfig::new(localhost(0), echo_server().await?);
        config.capture = Some(CaptureArgs {
            path: capture_path.clone(),
            format: CaptureFormat::Raw,
        });
        let (source, join_handle) = launch(config).await?;

        let mut client = TcpStream::connect(source).await?;
        client.write_all(b"PING").await?;
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await?;
        assert_eq!(&buf, b"PING");
        client.shutdown().await?;

        let report = wait_exit(join_handle).await??;
        assert_eq!(report.client_to_server, 4);
        assert_eq!(report.server_to_client, 4);
        assert_eq!(report.cause, CloseCause::Client);

        assert_eq!(std::fs::read(&capture_path)?, b"PINGPING");

        // A single connection pair per run: nobody listens anymore.
        assert!(TcpStream::connect(source).await.is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 10)]
    async fn test_exit_on_bind_conflict() -> Result<()> {
        let occupied = TcpListener::bind(localhost(0)).await?;
        let destination = TcpListener::bind(localhost(0)).await?;

        let config = TunlifyConfig::new(occupied.local_addr()?, destination.local_addr()?);
        let join_handle =
            tokio::task::spawn(async move { TunlifyRuntime::from_config(config)?.serve().await });

        match wait_exit(join_handle).await? {
            Err(error @ TunlifyError::Bind { .. }) => assert!(error.os_error_code().is_some()),
            other => bail!("unexpected result: {other:?}"),
        }

        // The destination was never contacted.
        select! {
            _ = destination.accept() => bail!("destination should not be connected"),
            _ = tokio::time::sleep(Duration::from_millis(200)) => {}
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 10)]
    async fn test_unreachable_destination_leaves_no_capture() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let capture_path = dir.path().join("capture.bin");

        let mut config = TunlifyConfig::new(localhost(0), localhost(unused_port()?));
        config.capture = Some(CaptureArgs {
            path: capture_path.clone(),
            format: CaptureFormat::Raw,
        });
        let (source, join_handle) = launch(config).await?;

        let _client = TcpStream::connect(source).await?;

        match wait_exit(join_handle).await? {
            Err(TunlifyError::Connect { source, .. }) => {
                assert_eq!(source.kind(), std::io::ErrorKind::ConnectionRefused)
            }
            other => bail!("unexpected result: {other:?}"),
        }
        assert!(!capture_path.exists());
        Ok(())
    }

    #[test]
    fn test_exit_on_config_error() -> Result<()> {
        let config = TunlifyConfig::new(localhost(9000), localhost(9000));
        assert!(matches!(
            TunlifyRuntime::from_config(config),
            Err(TunlifyError::InvalidConfig(_))
        ));
        Ok(())
    }
}
