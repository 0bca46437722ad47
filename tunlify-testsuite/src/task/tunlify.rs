use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tunlify::{
    config::TunlifyConfig,
    runtime::TunlifyRuntime,
    tunnel::relay::CloseCause,
};

use super::Task;

/// An in-process tunlify instance, configured with the given JSON config.
pub struct TunlifyInstance {
    config_json: String,
    expected_cause: Option<CloseCause>,
}

impl TunlifyInstance {
    pub fn new(config_json: impl Into<String>) -> Self {
        Self {
            config_json: config_json.into(),
            expected_cause: None,
        }
    }

    /// Fail the task unless the relay ends for this reason.
    pub fn expect_closed_by(mut self, cause: CloseCause) -> Self {
        self.expected_cause = Some(cause);
        self
    }
}

#[async_trait]
impl Task for TunlifyInstance {
    fn name(&self) -> String {
        "tunlify".to_string()
    }

    async fn launch(&self, token: CancellationToken) -> Result<JoinHandle<Result<()>>> {
        let config: TunlifyConfig = serde_json::from_str(&self.config_json)?;
        let expected_cause = self.expected_cause;

        let (sender, receiver) = tokio::sync::oneshot::channel();

        let join_handle = tokio::task::spawn(async move {
            let runtime = TunlifyRuntime::from_config(config)?;

            {
                let canceller = runtime.canceller();
                tokio::task::spawn(async move {
                    token.cancelled().await;
                    canceller.cancel();
                });
            }

            let report = runtime.serve_with_ready(sender).await?;
            tracing::info!(?report, "The tunlify instance exited");

            if let Some(expected_cause) = expected_cause {
                if report.cause != expected_cause {
                    bail!(
                        "The relay should be closed by the {expected_cause}, but got {}",
                        report.cause
                    );
                }
            }
            Ok::<_, anyhow::Error>(())
        });

        // Wait for the tunlify runtime to be ready
        if let Err(e) = receiver.await {
            tracing::error!(error=?e, "failed to receive tunlify runtime ready signal");
        }

        Ok(join_handle)
    }
}
