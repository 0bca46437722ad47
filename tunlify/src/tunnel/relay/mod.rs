use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use strum_macros::Display;
use tokio::task::JoinSet;
use tracing::Instrument as _;

use crate::error::TunlifyError;
use crate::state::{RunState, TunlifyState};
use crate::tunnel::capture::TrafficTap;
use crate::tunnel::connection::ConnectionHandle;
use crate::tunnel::direction::{ConnectionRole, Direction, Stage, StageKind};
use crate::tunnel::stream::CommonStreamTrait;

use self::shutdown::ShutdownCoordinator;

pub mod classify;
mod reader;
mod shutdown;
mod writer;

// tokio::io::copy uses 8 KB, a larger block means fewer round trips through the queue.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;
pub const DEFAULT_QUEUE_DEPTH: usize = 16;
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOptions {
    /// Upper bound of a single read, and so of a byte block.
    pub block_size: usize,
    /// Blocks buffered per direction before the reader waits for the writer.
    pub queue_depth: usize,
    /// How long the direction that hit EOF may keep writing its queued blocks before both
    /// connections are closed.
    pub drain_timeout: Duration,
    /// Deadline of the whole relaying phase.
    pub relay_timeout: Option<Duration>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            relay_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CloseCause {
    #[strum(serialize = "client")]
    Client,
    #[strum(serialize = "server")]
    Server,
    #[strum(serialize = "cancelled")]
    Cancelled,
    #[strum(serialize = "deadline")]
    Deadline,
}

/// Summary of a finished relay run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    /// Bytes written to the server.
    pub client_to_server: u64,
    /// Bytes written to the client.
    pub server_to_client: u64,
    pub cause: CloseCause,
}

impl RelayReport {
    pub fn cancelled() -> Self {
        Self {
            client_to_server: 0,
            server_to_client: 0,
            cause: CloseCause::Cancelled,
        }
    }

    pub fn total(&self) -> u64 {
        self.client_to_server + self.server_to_client
    }
}

pub(crate) struct StageResult {
    bytes: u64,
    result: std::io::Result<()>,
}

impl StageResult {
    fn finished(bytes: u64) -> Self {
        Self {
            bytes,
            result: Ok(()),
        }
    }

    fn failed(bytes: u64, error: std::io::Error) -> Self {
        Self {
            bytes,
            result: Err(error),
        }
    }
}

/// Copies bytes in both directions between an inbound and an outbound stream.
///
/// Each direction is a reader stage and a writer stage joined by a bounded queue, so four
/// workers run per relay. The run ends as soon as one of them finishes: the shutdown
/// coordinator then closes both streams and waits for the remaining workers.
pub struct Relay<I, O> {
    inbound: I,
    outbound: O,
    options: RelayOptions,
    tap: Option<Arc<dyn TrafficTap>>,
    state: Arc<TunlifyState>,
}

impl<I, O> Relay<I, O>
where
    I: CommonStreamTrait,
    O: CommonStreamTrait,
{
    pub fn new(inbound: I, outbound: O, options: RelayOptions) -> Self {
        Self {
            inbound,
            outbound,
            options,
            tap: None,
            state: Arc::new(TunlifyState::new()),
        }
    }

    pub fn with_tap(mut self, tap: Arc<dyn TrafficTap>) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn with_state(mut self, state: Arc<TunlifyState>) -> Self {
        self.state = state;
        self
    }

    /// Relay until one side closes, `stop` resolves or the relay deadline passes.
    ///
    /// Resolving `stop` is a graceful end and not an error. The report is returned only if no
    /// genuine I/O error happened on either stream and the tap, if any, did not fail.
    pub async fn run(
        self,
        stop: impl Future<Output = ()> + Send,
    ) -> Result<RelayReport, TunlifyError> {
        let Self {
            inbound,
            outbound,
            options,
            tap,
            state,
        } = self;

        let inbound_conn = ConnectionHandle::new(ConnectionRole::Inbound);
        let outbound_conn = ConnectionHandle::new(ConnectionRole::Outbound);

        let (inbound_rx, inbound_tx) = tokio::io::split(inbound);
        let (outbound_rx, outbound_tx) = tokio::io::split(outbound);

        let block_size = options.block_size.max(1);
        let queue_depth = options.queue_depth.max(1);
        let (c2s_sender, c2s_receiver) = tokio::sync::mpsc::channel::<Bytes>(queue_depth);
        let (s2c_sender, s2c_receiver) = tokio::sync::mpsc::channel::<Bytes>(queue_depth);

        let mut stages = JoinSet::new();
        spawn_stage(
            &mut stages,
            Stage::reader(Direction::ClientToServer),
            reader::read_stage(inbound_rx, inbound_conn.clone(), c2s_sender, block_size),
        );
        spawn_stage(
            &mut stages,
            Stage::writer(Direction::ClientToServer),
            writer::write_stage(
                outbound_tx,
                outbound_conn.clone(),
                c2s_receiver,
                Direction::ClientToServer,
                tap.clone(),
            ),
        );
        spawn_stage(
            &mut stages,
            Stage::reader(Direction::ServerToClient),
            reader::read_stage(outbound_rx, outbound_conn.clone(), s2c_sender, block_size),
        );
        spawn_stage(
            &mut stages,
            Stage::writer(Direction::ServerToClient),
            writer::write_stage(
                inbound_tx,
                inbound_conn.clone(),
                s2c_receiver,
                Direction::ServerToClient,
                tap.clone(),
            ),
        );
        tracing::debug!(block_size, queue_depth, "Starting to relay");
        state.set_run_state(RunState::Relaying);

        let mut coordinator = ShutdownCoordinator::new(stages, inbound_conn, outbound_conn);
        let trigger = coordinator
            .wait_for_trigger(stop, options.relay_timeout)
            .await;
        state.set_run_state(RunState::ShuttingDown);
        let result = coordinator.shutdown(trigger, options.drain_timeout).await;

        let result = match (result, tap) {
            (Ok(report), Some(tap)) => tap
                .finish()
                .await
                .map(|()| report)
                .map_err(TunlifyError::Capture),
            (Err(error), Some(tap)) => {
                if let Err(capture_error) = tap.finish().await {
                    tracing::warn!(error = ?capture_error, "Failed to finish traffic capture");
                }
                Err(error)
            }
            (result, None) => result,
        };

        state.set_run_state(RunState::Closed);
        result
    }
}

fn spawn_stage<F>(stages: &mut JoinSet<(Stage, StageResult)>, stage: Stage, task: F)
where
    F: Future<Output = StageResult> + Send + 'static,
{
    let span = match stage.kind {
        StageKind::Reader => tracing::info_span!("reader", direction = %stage.direction),
        StageKind::Writer => tracing::info_span!("writer", direction = %stage.direction),
    };
    stages.spawn(async move { (stage, task.await) }.instrument(span));
}
