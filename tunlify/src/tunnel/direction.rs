use strum_macros::Display;

/// One of the two independent forwarding paths of a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(test, derive(strum_macros::EnumIter))]
pub enum Direction {
    #[strum(serialize = "client->server")]
    ClientToServer,
    #[strum(serialize = "server->client")]
    ServerToClient,
}

impl Direction {
    /// The connection this direction reads from.
    pub fn source(self) -> ConnectionRole {
        match self {
            Direction::ClientToServer => ConnectionRole::Inbound,
            Direction::ServerToClient => ConnectionRole::Outbound,
        }
    }

    /// The connection this direction writes to.
    pub fn destination(self) -> ConnectionRole {
        match self {
            Direction::ClientToServer => ConnectionRole::Outbound,
            Direction::ServerToClient => ConnectionRole::Inbound,
        }
    }

    /// Single byte identifying the direction in tagged captures.
    pub fn tag(self) -> u8 {
        match self {
            Direction::ClientToServer => 0x00,
            Direction::ServerToClient => 0x01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ConnectionRole {
    /// Accepted from the tunnel source.
    #[strum(serialize = "inbound")]
    Inbound,
    /// Connected to the tunnel destination.
    #[strum(serialize = "outbound")]
    Outbound,
}

impl ConnectionRole {
    /// Name of the peer at the other end of this connection.
    pub fn peer_name(self) -> &'static str {
        match self {
            ConnectionRole::Inbound => "client",
            ConnectionRole::Outbound => "server",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum StageKind {
    #[strum(serialize = "reader")]
    Reader,
    #[strum(serialize = "writer")]
    Writer,
}

/// Identifies one of the four stage workers of a relay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stage {
    pub direction: Direction,
    pub kind: StageKind,
}

impl Stage {
    pub fn reader(direction: Direction) -> Self {
        Self {
            direction,
            kind: StageKind::Reader,
        }
    }

    pub fn writer(direction: Direction) -> Self {
        Self {
            direction,
            kind: StageKind::Writer,
        }
    }

    /// The connection this stage does its I/O on.
    pub fn connection(&self) -> ConnectionRole {
        match self.kind {
            StageKind::Reader => self.direction.source(),
            StageKind::Writer => self.direction.destination(),
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_directions_are_mirrored() {
        for direction in Direction::iter() {
            assert_ne!(direction.source(), direction.destination());
            assert_eq!(
                Stage::reader(direction).connection(),
                Stage::writer(direction).connection().mirrored()
            );
        }
        assert_ne!(
            Direction::ClientToServer.tag(),
            Direction::ServerToClient.tag()
        );
        assert_eq!(Direction::ClientToServer.to_string(), "client->server");
    }

    impl ConnectionRole {
        fn mirrored(self) -> Self {
            match self {
                ConnectionRole::Inbound => ConnectionRole::Outbound,
                ConnectionRole::Outbound => ConnectionRole::Inbound,
            }
        }
    }
}
