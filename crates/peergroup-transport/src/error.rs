use crate::{SessionId, SessionPort};

/// Errors returned by a [`Transport`](crate::Transport) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("session port {0} is already bound")]
    PortInUse(SessionPort),

    #[error("no free session port left")]
    PortsExhausted,

    #[error("session port {0} is not bound")]
    PortNotBound(SessionPort),

    #[error("name {0} is already advertised by another peer")]
    NameTaken(String),

    #[error("no peer advertises {0}")]
    NameNotFound(String),

    #[error("host of {name} rejected the join on port {port}")]
    JoinRejected { name: String, port: SessionPort },

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("attachment is detached from the bus")]
    Detached,

    #[error("transport failure: {0}")]
    Other(String),
}

impl TransportError {
    /// Stable numeric status for the failure kind.
    pub fn code(&self) -> u32 {
        match self {
            TransportError::PortInUse(_) => 0x1001,
            TransportError::PortsExhausted => 0x1002,
            TransportError::PortNotBound(_) => 0x1003,
            TransportError::NameTaken(_) => 0x1004,
            TransportError::NameNotFound(_) => 0x1005,
            TransportError::JoinRejected { .. } => 0x1006,
            TransportError::UnknownSession(_) => 0x1007,
            TransportError::Detached => 0x1008,
            TransportError::Other(_) => 0x1FFF,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_join_rejected() {
        let err = TransportError::JoinRejected {
            name: "org.example.chess.1024".into(),
            port: SessionPort(1024),
        };
        assert_eq!(
            err.to_string(),
            "host of org.example.chess.1024 rejected the join on port 1024"
        );
    }

    #[test]
    fn test_display_unknown_session() {
        let err = TransportError::UnknownSession(SessionId(9));
        assert_eq!(err.to_string(), "unknown session 9");
    }

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            TransportError::PortInUse(SessionPort(1)),
            TransportError::PortsExhausted,
            TransportError::PortNotBound(SessionPort(1)),
            TransportError::NameTaken("a".into()),
            TransportError::NameNotFound("a".into()),
            TransportError::JoinRejected {
                name: "a".into(),
                port: SessionPort(1),
            },
            TransportError::UnknownSession(SessionId(1)),
            TransportError::Detached,
            TransportError::Other("x".into()),
        ];
        let mut codes: Vec<u32> = errors.iter().map(TransportError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}
