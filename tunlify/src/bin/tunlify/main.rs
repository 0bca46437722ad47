#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::{fs::File, io::BufReader};

use anyhow::{bail, Context};
use clap::Parser as _;
use cli::{Cli, TuningOptions};
use tracing_subscriber::Layer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tunlify::config::{CaptureArgs, TunlifyConfig};
use tunlify::runtime::TunlifyRuntime;

use tunlify::build;

mod cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize log tracing
    let subscriber_init = tracing_subscriber::registry().with(
        tracing_subscriber::fmt::layer().with_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tokio_graceful=off,tunlify=info".into()),
        ),
    );
    #[cfg(feature = "tokio-console")]
    if cli.tokio_console {
        // Initialize tokio console
        subscriber_init.with(console_subscriber::spawn()).init();
    } else {
        subscriber_init.init();
    }
    #[cfg(not(feature = "tokio-console"))]
    subscriber_init.init();

    tracing::info!(
        r#"
 _              _ _  __
| |_ _   _ _ __ | (_)/ _|_   _
| __| | | | '_ \| | | |_| | | |
| |_| |_| | | | | | |  _| |_| |
 \__|\__,_|_| |_|_|_|_|  \__, |
                         |___/  version: v{}  commit: {}  buildtime: {}"#,
        build::PKG_VERSION,
        build::COMMIT_HASH,
        build::BUILD_TIME
    );

    tracing::info!("Current process PID: {}", std::process::id());

    let fut = async {
        let config = load_config(cli).context("Failed to load config")?;
        tracing::debug!("Tunlify config: {config:#?}");

        tracing::info!("Starting tunlify instance now");
        let report = TunlifyRuntime::from_config(config)?.serve().await?;

        tracing::info!(
            tx_bytes = report.client_to_server,
            rx_bytes = report.server_to_client,
            cause = %report.cause,
            "Gracefully exit now"
        );
        Ok::<_, anyhow::Error>(())
    };

    if let Err(error) = fut.await {
        tracing::error!(error = format!("{error:#}"));
        std::process::exit(1);
    }
}

fn load_config(cli: Cli) -> anyhow::Result<TunlifyConfig> {
    let mut config = match (cli.config_file, cli.config_content) {
        (Some(_), Some(_)) => {
            bail!("Cannot set both --config-file and --config-content at the same time")
        }
        (None, Some(s)) => serde_json::from_str(&s)?,
        (Some(path), None) => {
            tracing::info!("Loading config from: {path:?}");
            let file = File::open(path)?;
            let reader = BufReader::new(file);
            serde_json::from_reader(reader)?
        }
        (None, None) => {
            let (Some(src), Some(dst)) = (cli.src, cli.dst) else {
                bail!("Both --src and --dst should be set")
            };
            let mut config = TunlifyConfig::new(src, dst);
            config.capture = cli.log.map(|path| CaptureArgs {
                path,
                format: cli.capture_format.unwrap_or_default(),
            });
            config
        }
    };

    apply_tuning(&mut config, cli.tuning);
    Ok(config)
}

fn apply_tuning(config: &mut TunlifyConfig, tuning: TuningOptions) {
    let TuningOptions {
        block_size,
        queue_depth,
        accept_timeout,
        connect_timeout,
        relay_timeout,
    } = tuning;

    if let Some(block_size) = block_size {
        config.relay.block_size = block_size;
    }
    if let Some(queue_depth) = queue_depth {
        config.relay.queue_depth = queue_depth;
    }
    config.timeouts.accept_secs = accept_timeout.or(config.timeouts.accept_secs);
    config.timeouts.connect_secs = connect_timeout.or(config.timeouts.connect_secs);
    config.timeouts.relay_secs = relay_timeout.or(config.timeouts.relay_secs);
}
