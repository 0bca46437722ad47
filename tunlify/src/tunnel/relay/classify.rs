use std::io::ErrorKind;

use crate::tunnel::connection::LocallyClosed;

/// How an I/O error surfaced by a stage worker is handled when the relay shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoErrorClass {
    /// The relay closed the connection itself. Swallowed.
    ExpectedClose,
    /// The remote peer reset or aborted the connection. Treated like a clean EOF.
    PeerReset,
    /// Anything else. Propagated to the result of the run.
    Genuine,
}

pub fn classify(error: &std::io::Error) -> IoErrorClass {
    if error
        .get_ref()
        .is_some_and(|inner| inner.is::<LocallyClosed>())
    {
        return IoErrorClass::ExpectedClose;
    }

    match error.kind() {
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
            IoErrorClass::PeerReset
        }
        _ => IoErrorClass::Genuine,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::tunnel::direction::ConnectionRole;

    use super::*;

    #[rstest]
    #[case(LocallyClosed(ConnectionRole::Inbound).into_io_error(), IoErrorClass::ExpectedClose)]
    #[case(LocallyClosed(ConnectionRole::Outbound).into_io_error(), IoErrorClass::ExpectedClose)]
    #[case(ErrorKind::ConnectionReset.into(), IoErrorClass::PeerReset)]
    #[case(ErrorKind::ConnectionAborted.into(), IoErrorClass::PeerReset)]
    #[case(ErrorKind::BrokenPipe.into(), IoErrorClass::PeerReset)]
    #[case(ErrorKind::PermissionDenied.into(), IoErrorClass::Genuine)]
    #[case(ErrorKind::TimedOut.into(), IoErrorClass::Genuine)]
    #[case(std::io::Error::other("disk on fire"), IoErrorClass::Genuine)]
    fn test_classify(#[case] error: std::io::Error, #[case] expected: IoErrorClass) {
        assert_eq!(classify(&error), expected);
    }

    #[test]
    fn test_other_payload_with_aborted_kind_is_peer_reset() {
        let error = std::io::Error::new(ErrorKind::ConnectionAborted, "software caused abort");
        assert_eq!(classify(&error), IoErrorClass::PeerReset);
    }
}
