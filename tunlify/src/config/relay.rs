use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tunnel::relay::{
    RelayOptions, DEFAULT_BLOCK_SIZE, DEFAULT_DRAIN_TIMEOUT, DEFAULT_QUEUE_DEPTH,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RelayArgs {
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_queue_depth() -> usize {
    DEFAULT_QUEUE_DEPTH
}

fn default_drain_timeout_ms() -> u64 {
    DEFAULT_DRAIN_TIMEOUT.as_millis() as u64
}

impl Default for RelayArgs {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            queue_depth: default_queue_depth(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

/// All timeouts are disabled unless set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TimeoutArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_secs: Option<u64>,

    /// Deadline of the relaying phase, counted from the moment both connections exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_secs: Option<u64>,
}

impl TimeoutArgs {
    pub(super) fn accept(&self) -> Option<Duration> {
        self.accept_secs.map(Duration::from_secs)
    }

    pub(super) fn connect(&self) -> Option<Duration> {
        self.connect_secs.map(Duration::from_secs)
    }

    pub(super) fn relay(&self) -> Option<Duration> {
        self.relay_secs.map(Duration::from_secs)
    }
}

impl RelayArgs {
    pub(super) fn to_options(&self, relay_timeout: Option<Duration>) -> RelayOptions {
        RelayOptions {
            block_size: self.block_size,
            queue_depth: self.queue_depth,
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
            relay_timeout,
        }
    }
}
