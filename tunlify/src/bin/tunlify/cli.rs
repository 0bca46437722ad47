use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{arg, Parser};
use tunlify::tunnel::capture::CaptureFormat;

use crate::build::CLAP_LONG_VERSION;

/// Relay a single TCP connection from a source address to a destination address.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[clap(long_version = CLAP_LONG_VERSION)]
pub struct Cli {
    /// Address to accept the inbound connection on
    #[arg(long, value_name = "ADDR:PORT", required_unless_present_any = ["config_file", "config_content"])]
    pub src: Option<SocketAddr>,

    /// Address to connect the outbound connection to
    #[arg(long, value_name = "ADDR:PORT", required_unless_present_any = ["config_file", "config_content"])]
    pub dst: Option<SocketAddr>,

    /// Write a copy of all relayed bytes to this file
    #[arg(long, value_name = "PATH")]
    pub log: Option<PathBuf>,

    #[arg(long, value_enum, requires = "log")]
    pub capture_format: Option<CaptureFormat>,

    #[command(flatten)]
    pub tuning: TuningOptions,

    #[arg(short, long, conflicts_with_all = ["src", "dst", "log", "config_content"])]
    pub config_file: Option<PathBuf>,

    #[arg(long, conflicts_with_all = ["src", "dst", "log"])]
    pub config_content: Option<String>,

    /// Enable tokio console
    #[cfg(feature = "tokio-console")]
    #[arg(long, default_value_t = false)]
    pub tokio_console: bool,
}

/// Overrides applied on top of the flags or the loaded config.
#[derive(Parser, Debug)]
pub struct TuningOptions {
    /// Maximum size of one relayed block, in bytes
    #[arg(long)]
    pub block_size: Option<usize>,

    /// Blocks buffered per direction
    #[arg(long)]
    pub queue_depth: Option<usize>,

    /// Seconds to wait for the inbound connection
    #[arg(long, value_name = "SECS")]
    pub accept_timeout: Option<u64>,

    /// Seconds to wait for the outbound connection
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Seconds the relay may run once both connections exist
    #[arg(long, value_name = "SECS")]
    pub relay_timeout: Option<u64>,
}
