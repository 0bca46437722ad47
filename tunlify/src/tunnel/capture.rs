use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt as _, BufWriter};
use tokio::sync::Mutex;

use super::direction::Direction;

/// Layout of the bytes written to a capture sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    /// Forwarded bytes of both directions, back to back. The direction of a byte cannot be
    /// recovered from the file.
    #[default]
    Raw,
    /// Each block is prefixed with one direction byte and its length as a big-endian u32.
    Tagged,
}

/// Receives a copy of every block written by the writer stages of a relay.
///
/// Both directions call [`TrafficTap::observe`] concurrently, so implementations must make each
/// call atomic with respect to the underlying sink.
#[async_trait]
pub trait TrafficTap: Send + Sync {
    /// Called with every block written to its destination, or the written prefix of a block cut short.
    async fn observe(&self, direction: Direction, block: &Bytes) -> std::io::Result<()>;

    /// Called once after all stage workers terminated. Reports any failure that happened
    /// during the run.
    async fn finish(&self) -> std::io::Result<()>;
}

struct CaptureState<W> {
    writer: W,
    captured_bytes: u64,
    failure: Option<std::io::Error>,
}

/// A [`TrafficTap`] persisting blocks into any async writer.
///
/// Once a write to the sink fails, the sink stops accepting blocks and the failure is reported
/// by [`TrafficTap::finish`].
pub struct CaptureSink<W> {
    state: Mutex<CaptureState<W>>,
    format: CaptureFormat,
}

impl<W> CaptureSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W, format: CaptureFormat) -> Self {
        Self {
            state: Mutex::new(CaptureState {
                writer,
                captured_bytes: 0,
                failure: None,
            }),
            format,
        }
    }

    /// Payload bytes persisted so far, framing excluded.
    pub async fn captured_bytes(&self) -> u64 {
        self.state.lock().await.captured_bytes
    }

    pub async fn into_inner(self) -> W {
        self.state.into_inner().writer
    }
}

impl CaptureSink<BufWriter<tokio::fs::File>> {
    /// Create the capture file, truncating it if it already exists.
    pub async fn create(path: impl AsRef<Path>, format: CaptureFormat) -> std::io::Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())
            .await?;
        Ok(Self::new(BufWriter::new(file), format))
    }
}

#[async_trait]
impl<W> TrafficTap for CaptureSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn observe(&self, direction: Direction, block: &Bytes) -> std::io::Result<()> {
        let mut state = self.state.lock().await;
        if state.failure.is_some() {
            return Ok(());
        }

        let format = self.format;
        let res = async {
            if format == CaptureFormat::Tagged {
                let len = u32::try_from(block.len()).map_err(std::io::Error::other)?;
                state.writer.write_u8(direction.tag()).await?;
                state.writer.write_u32(len).await?;
            }
            state.writer.write_all(block).await?;
            state.writer.flush().await
        }
        .await;

        match res {
            Ok(()) => {
                state.captured_bytes += block.len() as u64;
                Ok(())
            }
            Err(error) => {
                let reported = std::io::Error::new(error.kind(), error.to_string());
                state.failure = Some(error);
                Err(reported)
            }
        }
    }

    async fn finish(&self) -> std::io::Result<()> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.failure.take() {
            return Err(error);
        }
        state.writer.flush().await
    }
}
