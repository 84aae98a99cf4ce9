/// Errors surfaced by the peer group layer.
///
/// Registry queries never fail; they answer with sentinels instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerGroupError {
    #[error("group {name} already exists")]
    DuplicateName { name: String },

    /// Unknown group, or a group in the wrong state for the request
    /// (e.g. locking a group we do not host).
    #[error("group {name} not found")]
    NotFound { name: String },

    #[error("invalid group name: {name:?}")]
    InvalidGroupName { name: String },

    #[error("transport error: {0}")]
    Transport(#[from] peergroup_transport::TransportError),

    #[error("peer group manager has been shut down")]
    Shutdown,
}

impl PeerGroupError {
    pub(crate) fn duplicate(name: &str) -> Self {
        PeerGroupError::DuplicateName {
            name: name.to_string(),
        }
    }

    pub(crate) fn not_found(name: &str) -> Self {
        PeerGroupError::NotFound {
            name: name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peergroup_transport::{SessionPort, TransportError};

    #[test]
    fn test_display_duplicate() {
        let err = PeerGroupError::duplicate("chess");
        assert_eq!(err.to_string(), "group chess already exists");
    }

    #[test]
    fn test_display_invalid_name() {
        let err = PeerGroupError::InvalidGroupName { name: " ".into() };
        assert_eq!(err.to_string(), "invalid group name: \" \"");
    }

    #[test]
    fn test_display_transport() {
        let err: PeerGroupError = TransportError::PortInUse(SessionPort(42)).into();
        assert_eq!(
            err.to_string(),
            "transport error: session port 42 is already bound"
        );
    }

    #[test]
    fn test_display_shutdown() {
        assert_eq!(
            PeerGroupError::Shutdown.to_string(),
            "peer group manager has been shut down"
        );
    }
}
