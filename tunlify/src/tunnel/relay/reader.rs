use bytes::{BufMut as _, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt as _};
use tokio::sync::mpsc::Sender;

use crate::tunnel::connection::ConnectionHandle;

use super::StageResult;

/// Read blocks of at most `block_size` bytes from `src` and queue them in read order.
///
/// Returns on EOF, on a read error, or when the writer stage stopped pulling from the queue.
/// Dropping the queue sender on return is the half-close signal for the writer stage.
pub(super) async fn read_stage<R>(
    mut src: R,
    conn: ConnectionHandle,
    queue: Sender<Bytes>,
    block_size: usize,
) -> StageResult
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(block_size);
    let mut total = 0u64;

    loop {
        buf.reserve(block_size);

        // `buf` is empty here, so the limit caps the block size.
        let mut block_buf = (&mut buf).limit(block_size);
        let n = match conn.guard(src.read_buf(&mut block_buf)).await {
            Ok(n) => n,
            Err(error) => return StageResult::failed(total, error),
        };
        if n == 0 {
            tracing::debug!(total, "Stream exhausted");
            return StageResult::finished(total);
        }

        let block = buf.split_to(n).freeze();
        total += n as u64;

        // Blocks while the queue is full, so a slow writer throttles the reader.
        let sent = conn.guard(async { Ok(queue.send(block).await) }).await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                tracing::debug!(total, "Writer stage stopped, no longer reading");
                return StageResult::finished(total);
            }
            Err(error) => return StageResult::failed(total, error),
        }
    }
}
