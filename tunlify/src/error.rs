use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::tunnel::direction::{Direction, StageKind};

/// Custom error type
#[derive(Error, Debug)]
pub enum TunlifyError {
    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to accept inbound connection on {addr}: {source}")]
    Accept {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error in the {stage} stage of {direction}: {source}")]
    Relay {
        direction: Direction,
        stage: StageKind,
        #[source]
        source: std::io::Error,
    },

    #[error("A stage worker of the relay crashed: {0}")]
    StageCrashed(#[source] tokio::task::JoinError),

    #[error("Failed to write traffic capture: {0}")]
    Capture(#[source] std::io::Error),

    #[error("The relay did not finish within {0:?}")]
    RelayTimeout(Duration),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl TunlifyError {
    /// The platform error code behind this error, if there is one.
    pub fn os_error_code(&self) -> Option<i32> {
        match self {
            TunlifyError::Bind { source, .. }
            | TunlifyError::Accept { source, .. }
            | TunlifyError::Connect { source, .. }
            | TunlifyError::Relay { source, .. }
            | TunlifyError::Capture(source) => source.raw_os_error(),
            TunlifyError::StageCrashed(_)
            | TunlifyError::RelayTimeout(_)
            | TunlifyError::InvalidConfig(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_error_code_is_kept() {
        let error = TunlifyError::Bind {
            addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
            source: std::io::Error::from_raw_os_error(98),
        };
        assert_eq!(error.os_error_code(), Some(98));
        assert!(error.to_string().starts_with("Failed to listen on 127.0.0.1:9000"));

        let error = TunlifyError::RelayTimeout(Duration::from_secs(3));
        assert_eq!(error.os_error_code(), None);
    }
}
