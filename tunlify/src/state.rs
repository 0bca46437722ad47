use strum_macros::Display;
use tokio::sync::watch;

/// Lifecycle of the single relay run of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RunState {
    /// Listening, accepting or connecting.
    #[strum(serialize = "establishing")]
    Establishing,
    #[strum(serialize = "relaying")]
    Relaying,
    /// Waiting for the stage workers to terminate.
    #[strum(serialize = "shutting_down")]
    ShuttingDown,
    #[strum(serialize = "closed")]
    Closed,
}

pub struct TunlifyState {
    /// Flips to `true` once the source address is listened on.
    pub ready: (watch::Sender<bool>, watch::Receiver<bool>),
    pub run: (watch::Sender<RunState>, watch::Receiver<RunState>),
}

impl Default for TunlifyState {
    fn default() -> Self {
        Self::new()
    }
}

impl TunlifyState {
    pub fn new() -> Self {
        TunlifyState {
            ready: watch::channel(false),
            run: watch::channel(RunState::Establishing),
        }
    }

    pub fn run_state(&self) -> RunState {
        *self.run.1.borrow()
    }

    pub fn set_run_state(&self, state: RunState) {
        let previous = self.run.0.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Run state changed");
        }
    }
}
