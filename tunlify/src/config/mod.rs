use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::TunlifyError;
use crate::tunnel::capture::CaptureFormat;
use crate::tunnel::connector::ConnectOptions;
use crate::tunnel::relay::RelayOptions;
use crate::tunnel::Tunnel;

pub mod relay;

use self::relay::{RelayArgs, TimeoutArgs};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TunlifyConfig {
    pub src: SocketAddr,

    pub dst: SocketAddr,

    #[serde(default = "Option::default")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<CaptureArgs>,

    #[serde(default)]
    pub relay: RelayArgs,

    #[serde(default)]
    pub timeouts: TimeoutArgs,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CaptureArgs {
    pub path: PathBuf,

    #[serde(default)]
    pub format: CaptureFormat,
}

impl TunlifyConfig {
    pub fn new(src: SocketAddr, dst: SocketAddr) -> Self {
        Self {
            src,
            dst,
            capture: None,
            relay: RelayArgs::default(),
            timeouts: TimeoutArgs::default(),
        }
    }

    pub fn validate(&self) -> Result<(), TunlifyError> {
        let invalid = |msg: String| Err(TunlifyError::InvalidConfig(msg));

        if self.src == self.dst {
            return invalid(format!(
                "source and destination are the same address {}",
                self.src
            ));
        }
        if self.relay.block_size == 0 {
            return invalid("`block_size` must be greater than 0".to_owned());
        }
        // A tagged capture stores block lengths as u32.
        if u32::try_from(self.relay.block_size).is_err() {
            return invalid(format!(
                "`block_size` must not exceed {} bytes",
                u32::MAX
            ));
        }
        if self.relay.queue_depth == 0 {
            return invalid("`queue_depth` must be greater than 0".to_owned());
        }
        for (name, value) in [
            ("accept_secs", self.timeouts.accept_secs),
            ("connect_secs", self.timeouts.connect_secs),
            ("relay_secs", self.timeouts.relay_secs),
        ] {
            if value == Some(0) {
                return invalid(format!("`{name}` must be greater than 0 when set"));
            }
        }
        if let Some(capture) = &self.capture {
            if capture.path.as_os_str().is_empty() {
                return invalid("capture `path` must not be empty".to_owned());
            }
        }
        Ok(())
    }

    pub fn tunnel(&self) -> Tunnel {
        Tunnel::new(self.src, self.dst)
    }

    pub fn relay_options(&self) -> RelayOptions {
        self.relay.to_options(self.timeouts.relay())
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            accept_timeout: self.timeouts.accept(),
            connect_timeout: self.timeouts.connect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::{bail, Result};
    use serde_json::json;

    use super::*;

    #[test]
    fn test_minimal_config() -> Result<()> {
        let config: TunlifyConfig = serde_json::from_value(json!({
            "src": "127.0.0.1:9000",
            "dst": "127.0.0.1:9100"
        }))?;
        config.validate()?;

        assert_eq!(
            config,
            TunlifyConfig::new("127.0.0.1:9000".parse()?, "127.0.0.1:9100".parse()?)
        );
        assert_eq!(config.relay_options(), RelayOptions::default());
        assert_eq!(config.connect_options(), ConnectOptions::default());
        assert_eq!(config.tunnel().to_string(), "127.0.0.1:9000 -> 127.0.0.1:9100");
        Ok(())
    }

    #[test]
    fn test_full_config() -> Result<()> {
        let config: TunlifyConfig = serde_json::from_value(json!({
            "src": "0.0.0.0:9000",
            "dst": "[::1]:9100",
            "capture": {
                "path": "/tmp/capture.bin",
                "format": "tagged"
            },
            "relay": {
                "block_size": 4096,
                "queue_depth": 2,
                "drain_timeout_ms": 250
            },
            "timeouts": {
                "accept_secs": 30,
                "connect_secs": 5,
                "relay_secs": 600
            }
        }))?;
        config.validate()?;

        assert_eq!(
            config.capture,
            Some(CaptureArgs {
                path: "/tmp/capture.bin".into(),
                format: CaptureFormat::Tagged,
            })
        );
        assert_eq!(
            config.relay_options(),
            RelayOptions {
                block_size: 4096,
                queue_depth: 2,
                drain_timeout: Duration::from_millis(250),
                relay_timeout: Some(Duration::from_secs(600)),
            }
        );
        assert_eq!(
            config.connect_options(),
            ConnectOptions {
                accept_timeout: Some(Duration::from_secs(30)),
                connect_timeout: Some(Duration::from_secs(5)),
            }
        );

        // The capture format falls back to raw.
        let config: TunlifyConfig = serde_json::from_value(json!({
            "src": "127.0.0.1:9000",
            "dst": "127.0.0.1:9100",
            "capture": { "path": "capture.bin" }
        }))?;
        assert_eq!(
            config.capture.map(|capture| capture.format),
            Some(CaptureFormat::Raw)
        );
        Ok(())
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result = serde_json::from_value::<TunlifyConfig>(json!({
            "src": "127.0.0.1:9000",
            "dst": "127.0.0.1:9100",
            "relay": { "buffer": 1 }
        }));
        assert!(result.is_err());

        let result = serde_json::from_value::<TunlifyConfig>(json!({
            "src": "localhost:9000",
            "dst": "127.0.0.1:9100"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_values() -> Result<()> {
        let valid = TunlifyConfig::new("127.0.0.1:9000".parse()?, "127.0.0.1:9100".parse()?);

        let mut same = valid.clone();
        same.dst = same.src;

        let mut zero_block = valid.clone();
        zero_block.relay.block_size = 0;

        let mut zero_depth = valid.clone();
        zero_depth.relay.queue_depth = 0;

        let mut zero_timeout = valid.clone();
        zero_timeout.timeouts.connect_secs = Some(0);

        for config in [same, zero_block, zero_depth, zero_timeout] {
            match config.validate() {
                Err(TunlifyError::InvalidConfig(_)) => {}
                other => bail!("config {config:?} should be rejected, got {other:?}"),
            }
        }
        Ok(())
    }
}
