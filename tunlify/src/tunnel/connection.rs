use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use super::direction::ConnectionRole;

/// The two live sockets bridged by one relay run.
#[derive(Debug)]
pub struct ConnectionPair {
    pub inbound: TcpStream,
    pub inbound_peer: SocketAddr,
    pub outbound: TcpStream,
    pub outbound_peer: SocketAddr,
}

/// Marker carried by the I/O errors of a connection closed by the relay itself.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("the {0} connection was closed locally")]
pub struct LocallyClosed(pub ConnectionRole);

impl LocallyClosed {
    pub fn into_io_error(self) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::ConnectionAborted, self)
    }
}

/// Close switch shared between the stages doing I/O on one connection and the shutdown
/// coordinator.
///
/// Closing aborts every in-flight or future operation run through [`ConnectionHandle::guard`]
/// with a [`LocallyClosed`] error. The socket itself is released once the stages holding its
/// halves have returned.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    role: ConnectionRole,
    closer: CancellationToken,
    closed: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub fn new(role: ConnectionRole) -> Self {
        Self {
            role,
            closer: CancellationToken::new(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    /// Close the connection. Returns `false` if it was already closed, in which case this is a
    /// no-op.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.closer.cancel();
        true
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn closed_error(&self) -> std::io::Error {
        LocallyClosed(self.role).into_io_error()
    }

    /// Run an I/O operation on this connection, aborting it as soon as the connection is closed.
    pub async fn guard<F, T>(&self, fut: F) -> std::io::Result<T>
    where
        F: Future<Output = std::io::Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.closer.cancelled() => Err(self.closed_error()),
            res = fut => res,
        }
    }
}
