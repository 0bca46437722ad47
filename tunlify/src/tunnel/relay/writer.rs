use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt as _};
use tokio::sync::mpsc::Receiver;

use crate::tunnel::capture::TrafficTap;
use crate::tunnel::connection::ConnectionHandle;
use crate::tunnel::direction::Direction;

use super::StageResult;

/// Write queued blocks to `dst` in order, handing each written block to the tap.
///
/// Returns once the queue is closed and empty, or on a write error. On a drained queue the
/// write side of `dst` is shut down so the peer observes the half-close. A block cut short by
/// an error is counted and tapped up to the bytes `dst` accepted.
pub(super) async fn write_stage<W>(
    mut dst: W,
    conn: ConnectionHandle,
    mut queue: Receiver<Bytes>,
    direction: Direction,
    tap: Option<Arc<dyn TrafficTap>>,
) -> StageResult
where
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;

    loop {
        let block = match conn.guard(async { Ok(queue.recv().await) }).await {
            Ok(Some(block)) => block,
            Ok(None) => break,
            Err(error) => return StageResult::failed(total, error),
        };

        let mut written = 0;
        let result = conn
            .guard(async {
                while written < block.len() {
                    let n = dst.write(&block[written..]).await?;
                    if n == 0 {
                        return Err(std::io::ErrorKind::WriteZero.into());
                    }
                    written += n;
                }
                dst.flush().await
            })
            .await;

        total += written as u64;
        if written > 0 {
            observe(tap.as_deref(), direction, &block.slice(..written)).await;
        }
        if let Err(error) = result {
            tracing::debug!(written, len = block.len(), "Block interrupted");
            return StageResult::failed(total, error);
        }
    }

    tracing::debug!(total, "Queue drained");
    if let Err(error) = conn.guard(dst.shutdown()).await {
        tracing::debug!(?error, "Failed to shut down write side");
    }

    StageResult::finished(total)
}

async fn observe(tap: Option<&dyn TrafficTap>, direction: Direction, block: &Bytes) {
    let Some(tap) = tap else {
        return;
    };
    if let Err(error) = tap.observe(direction, block).await {
        tracing::warn!(?error, "Failed to capture traffic, capture disabled for this run");
    }
}
