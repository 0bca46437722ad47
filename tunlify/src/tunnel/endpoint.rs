use std::fmt::{Debug, Display};
use std::net::SocketAddr;

/// The endpoints bridged by one relay run.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Tunnel {
    source: SocketAddr,
    destination: SocketAddr,
}

impl Tunnel {
    pub fn new(source: SocketAddr, destination: SocketAddr) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Where the inbound connection is accepted.
    pub fn source(&self) -> SocketAddr {
        self.source
    }

    /// Where the outbound connection goes.
    pub fn destination(&self) -> SocketAddr {
        self.destination
    }
}

impl Display for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{} -> {}", self.source, self.destination))
    }
}

impl Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
