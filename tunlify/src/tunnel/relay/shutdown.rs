use std::future::Future;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};

use crate::error::TunlifyError;
use crate::tunnel::connection::ConnectionHandle;
use crate::tunnel::direction::{ConnectionRole, Direction, Stage, StageKind};

use super::classify::{classify, IoErrorClass};
use super::{CloseCause, RelayReport, StageResult};

/// What ended the relaying phase of a run.
#[derive(Debug, Clone, Copy)]
pub(super) enum Trigger {
    Stage(Stage),
    Crashed,
    Cancelled,
    Deadline(Duration),
}

/// Ends a relay run: waits for the first stage worker to finish, closes both connections
/// exactly once and collects the results of all four workers.
pub(super) struct ShutdownCoordinator {
    stages: JoinSet<(Stage, StageResult)>,
    inbound: ConnectionHandle,
    outbound: ConnectionHandle,
    outcomes: Vec<(Stage, StageResult)>,
    crashed: Option<JoinError>,
}

impl ShutdownCoordinator {
    pub(super) fn new(
        stages: JoinSet<(Stage, StageResult)>,
        inbound: ConnectionHandle,
        outbound: ConnectionHandle,
    ) -> Self {
        Self {
            stages,
            inbound,
            outbound,
            outcomes: Vec::with_capacity(4),
            crashed: None,
        }
    }

    /// Wait until one of the stage workers finishes, `stop` resolves or `relay_timeout` passes.
    pub(super) async fn wait_for_trigger(
        &mut self,
        stop: impl Future<Output = ()>,
        relay_timeout: Option<Duration>,
    ) -> Trigger {
        let deadline = async {
            match relay_timeout {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            Some(joined) = self.stages.join_next() => match self.record(joined) {
                Some(stage) => Trigger::Stage(stage),
                None => Trigger::Crashed,
            },
            _ = stop => Trigger::Cancelled,
            limit = deadline => Trigger::Deadline(limit),
        }
    }

    /// Shut the run down and wait for every stage worker to terminate.
    pub(super) async fn shutdown(
        mut self,
        trigger: Trigger,
        drain_timeout: Duration,
    ) -> Result<RelayReport, TunlifyError> {
        match trigger {
            Trigger::Stage(stage) => tracing::info!(
                "Connection was closed by the {}",
                stage.connection().peer_name()
            ),
            Trigger::Crashed => tracing::error!("A stage worker crashed, shutting down"),
            Trigger::Cancelled => tracing::info!("Relay cancelled, shutting down"),
            Trigger::Deadline(limit) => {
                tracing::warn!(?limit, "Relay deadline reached, shutting down")
            }
        }

        // Blocks already read before an EOF are still delivered.
        if let Trigger::Stage(stage) = trigger {
            if stage.kind == StageKind::Reader {
                self.drain(Stage::writer(stage.direction), drain_timeout)
                    .await;
            }
        }

        self.close_all();

        while let Some(joined) = self.stages.join_next().await {
            self.record(joined);
        }

        self.into_report(trigger)
    }

    fn record(&mut self, joined: Result<(Stage, StageResult), JoinError>) -> Option<Stage> {
        match joined {
            Ok((stage, result)) => {
                tracing::debug!(
                    direction = %stage.direction,
                    stage = %stage.kind,
                    bytes = result.bytes,
                    "Stage terminated"
                );
                self.outcomes.push((stage, result));
                Some(stage)
            }
            Err(error) => {
                tracing::error!(?error, "Stage worker crashed");
                self.crashed.get_or_insert(error);
                None
            }
        }
    }

    async fn drain(&mut self, writer: Stage, limit: Duration) {
        let drained = tokio::time::timeout(limit, async {
            while !self.outcomes.iter().any(|(stage, _)| *stage == writer) {
                match self.stages.join_next().await {
                    Some(joined) => {
                        self.record(joined);
                    }
                    None => break,
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::debug!(
                direction = %writer.direction,
                ?limit,
                "Queued blocks were not drained in time, forcing close"
            );
        }
    }

    fn close_all(&self) {
        for conn in [&self.inbound, &self.outbound] {
            if conn.close() {
                tracing::debug!(connection = %conn.role(), "Connection closed locally");
            }
        }
    }

    fn into_report(self, trigger: Trigger) -> Result<RelayReport, TunlifyError> {
        let cause = match trigger {
            Trigger::Stage(stage) => match stage.connection() {
                ConnectionRole::Inbound => CloseCause::Client,
                ConnectionRole::Outbound => CloseCause::Server,
            },
            Trigger::Crashed | Trigger::Cancelled => CloseCause::Cancelled,
            Trigger::Deadline(_) => CloseCause::Deadline,
        };
        let mut report = RelayReport {
            client_to_server: 0,
            server_to_client: 0,
            cause,
        };

        let mut first_failure = None;
        for (stage, StageResult { bytes, result }) in self.outcomes {
            if stage.kind == StageKind::Writer {
                match stage.direction {
                    Direction::ClientToServer => report.client_to_server = bytes,
                    Direction::ServerToClient => report.server_to_client = bytes,
                }
            }

            let Err(error) = result else {
                continue;
            };
            match classify(&error) {
                IoErrorClass::ExpectedClose => tracing::info!(
                    direction = %stage.direction,
                    stage = %stage.kind,
                    "Stage stopped by local close"
                ),
                IoErrorClass::PeerReset => tracing::info!(
                    direction = %stage.direction,
                    stage = %stage.kind,
                    %error,
                    "Connection was terminated by the {}",
                    stage.connection().peer_name()
                ),
                IoErrorClass::Genuine => {
                    tracing::error!(
                        direction = %stage.direction,
                        stage = %stage.kind,
                        ?error,
                        "Stage failed"
                    );
                    first_failure.get_or_insert(TunlifyError::Relay {
                        direction: stage.direction,
                        stage: stage.kind,
                        source: error,
                    });
                }
            }
        }

        tracing::info!(
            tx_bytes = report.client_to_server,
            rx_bytes = report.server_to_client,
            cause = %report.cause,
            "Connection closed"
        );

        if let Some(error) = self.crashed {
            return Err(TunlifyError::StageCrashed(error));
        }
        if let Some(error) = first_failure {
            return Err(error);
        }
        if let Trigger::Deadline(limit) = trigger {
            return Err(TunlifyError::RelayTimeout(limit));
        }
        Ok(report)
    }
}
