use std::net::SocketAddr;
use std::sync::Arc;

use scopeguard::defer;
use tokio_graceful::{Shutdown, ShutdownGuard};
use tokio_util::sync::CancellationToken;
use tracing::Instrument as _;

use crate::config::TunlifyConfig;
use crate::error::TunlifyError;
use crate::state::{RunState, TunlifyState};
use crate::tunnel::access_log::AccessLog;
use crate::tunnel::capture::{CaptureSink, TrafficTap};
use crate::tunnel::connector::Connector;
use crate::tunnel::relay::{Relay, RelayReport};

pub struct TunlifyRuntime {
    config: TunlifyConfig,
    state: Arc<TunlifyState>,
    shutdown: Shutdown,
    // Cancel token for the caller to stop the run. It is cancelled by this runtime only on its way out.
    canceller: CancellationToken,
}

impl TunlifyRuntime {
    pub fn from_config(config: TunlifyConfig) -> Result<Self, TunlifyError> {
        config.validate()?;

        let canceller = CancellationToken::new();

        // Prepare for graceful shutdown
        let shutdown = {
            let canceller = canceller.clone();
            tokio_graceful::Shutdown::builder()
                .with_signal(async move {
                    tokio::select! {
                        _ = canceller.cancelled() => {}
                        _ = tokio_graceful::default_signal() => {}
                    }
                })
                .with_overwrite_fn(tokio::signal::ctrl_c)
                .build()
        };

        Ok(Self {
            config,
            state: Arc::new(TunlifyState::new()),
            shutdown,
            canceller,
        })
    }

    pub fn state(&self) -> Arc<TunlifyState> {
        Arc::clone(&self.state)
    }

    pub fn canceller(&self) -> CancellationToken {
        self.canceller.clone()
    }

    pub async fn serve(self) -> Result<RelayReport, TunlifyError> {
        self.serve_with_ready(tokio::sync::oneshot::channel().0)
            .await
    }

    /// Run the single relay of this process. `ready` receives the listened address once the
    /// source is bound.
    ///
    /// Cancellation through the canceller or a termination signal ends the run gracefully
    /// with a [`RelayReport`] whose cause is `Cancelled`.
    pub async fn serve_with_ready(
        self,
        ready: tokio::sync::oneshot::Sender<SocketAddr>,
    ) -> Result<RelayReport, TunlifyError> {
        let for_cancel_safity = self.canceller.clone();
        defer! {
            // Cancel-Safity: stop the run in case the future of this function is dropped
            for_cancel_safity.cancel();
        }

        let Self {
            config,
            state,
            shutdown,
            canceller,
        } = self;

        let span = tracing::info_span!("tunnel", tunnel = %config.tunnel());
        let result = {
            let guard = shutdown.guard();
            run(&config, &state, guard, ready).instrument(span).await
        };
        state.set_run_state(RunState::Closed);

        match &result {
            Ok(_) => tracing::info!("Shutting down the instance"),
            Err(_) => tracing::error!("Relay failed, canceling and exiting now"),
        }

        // Trigger the shutdown guard and wait for it to complete.
        canceller.cancel();
        shutdown.shutdown().await;

        tracing::debug!("The instance is shutdown complete");
        result
    }
}

async fn run(
    config: &TunlifyConfig,
    state: &Arc<TunlifyState>,
    guard: ShutdownGuard,
    ready: tokio::sync::oneshot::Sender<SocketAddr>,
) -> Result<RelayReport, TunlifyError> {
    let connector = Connector::bind(&config.tunnel()).await?;

    let _ = state.ready.0.send(true); // Ignore any error occuring during send
    let _ = ready.send(connector.local_addr()); // Ignore any error occuring during send

    let connect_options = config.connect_options();
    let pair = tokio::select! {
        pair = connector.establish(&connect_options) => pair?,
        _ = guard.cancelled() => {
            tracing::info!("Cancelled before a connection was established");
            return Ok(RelayReport::cancelled());
        }
    };

    let access_log = AccessLog {
        downstream: pair.inbound_peer,
        upstream: pair.outbound_peer,
        capture: config
            .capture
            .as_ref()
            .map(|capture| (capture.path.as_path(), capture.format)),
    };
    tracing::info!(?access_log);

    // Opened only now, so a failed establishment leaves no capture file behind.
    let tap = match &config.capture {
        Some(capture) => {
            let sink = CaptureSink::create(&capture.path, capture.format)
                .await
                .map_err(TunlifyError::Capture)?;
            tracing::debug!(path = ?capture.path, format = ?capture.format, "Capturing traffic");
            Some(Arc::new(sink) as Arc<dyn TrafficTap>)
        }
        None => None,
    };

    let mut relay =
        Relay::new(pair.inbound, pair.outbound, config.relay_options()).with_state(state.clone());
    if let Some(tap) = tap {
        relay = relay.with_tap(tap);
    }

    let stop = {
        let guard = guard.clone();
        async move { guard.cancelled().await }
    };
    relay
        .run(stop)
        .instrument(tracing::info_span!("relay"))
        .await
}
