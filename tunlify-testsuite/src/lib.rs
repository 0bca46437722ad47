pub mod task;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::StreamExt as _;
use task::Task;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

static LOG_INIT: OnceCell<()> = OnceCell::const_new();

/// Pick a free localhost port for a test.
pub fn pick_port() -> Result<u16> {
    portpicker::pick_unused_port().context("No free port left")
}

/// This is a common function to run end-to-end tests on the loopback interface. The tasks are
/// launched one by one in the given order, each one only after the previous one is ready, and
/// then run concurrently until all of them finish. The first error of any task fails the test.
pub async fn run_test(tasks: Vec<Box<dyn Task>>) -> Result<()> {
    let token = CancellationToken::new();

    let test_future = async {
        LOG_INIT
            .get_or_init(|| async {
                // Initialize log tracing
                tracing_subscriber::registry()
                    .with(tracing_subscriber::fmt::layer().with_filter(
                        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
                            |_| "info,tokio_graceful=off,tunlify=debug,tunlify_testsuite=debug".into(),
                        ),
                    ))
                    .init();
            })
            .await;

        // Launch all tasks in order and get the join handles
        let mut sub_tasks = futures::stream::FuturesUnordered::new();
        for task in tasks {
            let task_name = task.name();

            let task_result = {
                // Timeout is 1 minute.
                let timeout = tokio::time::sleep(Duration::from_secs(60));

                tokio::select! {
                    _ = timeout => {
                        bail!("Timeout waiting for task {task_name} to be ready");
                    },
                    res = task.launch(token.clone()) => res
                }
                .with_context(|| format!("Failed to launch the {task_name} task"))?
            };

            sub_tasks.push(async move {
                (
                    task_name,
                    task_result
                        .await
                        .map_err(anyhow::Error::from)
                        .and_then(|r| r),
                )
            });
        }

        let mut first_error = None;

        while let Some((task_name, res)) = sub_tasks.next().await {
            if let Err(e) = res.with_context(|| format!("Error in the {task_name} task")) {
                tracing::error!(error=?e, "Got error in task");
                // Let the other tasks wind down.
                token.cancel();
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        Ok::<_, anyhow::Error>(())
    };

    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            token.cancel();
            bail!("We got SIGINT, cancel now");
        }
        _ = sigterm.recv() => {
            token.cancel();
            bail!("We got SIGTERM, cancel now");
        }
        res = test_future => {
            res?;
        }
    }

    Ok(())
}
