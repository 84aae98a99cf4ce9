use serde::{Deserialize, Serialize};

use crate::{PeerId, SessionId, SessionPort, TransportMask};

/// Notifications a transport delivers to the group layer.
///
/// Delivered asynchronously on their own channel; ordering relative to
/// application calls is not guaranteed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportEvent {
    /// A remote peer started advertising `name`.
    AdvertisementFound { name: String, transport: TransportMask },
    /// A previously found advertisement disappeared.
    AdvertisementLost { name: String, transport: TransportMask },
    /// Host side: the first joiner arrived on one of our bound ports.
    SessionJoined {
        port: SessionPort,
        session_id: SessionId,
        joiner: PeerId,
    },
    /// A peer became a member of a session we belong to.
    MemberJoined { session_id: SessionId, peer: PeerId },
    /// A peer left a session we belong to.
    MemberLeft { session_id: SessionId, peer: PeerId },
    /// The session collapsed or we were removed from it.
    SessionLost { session_id: SessionId },
}

impl TransportEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::AdvertisementFound { .. } => "advertisement_found",
            TransportEvent::AdvertisementLost { .. } => "advertisement_lost",
            TransportEvent::SessionJoined { .. } => "session_joined",
            TransportEvent::MemberJoined { .. } => "member_joined",
            TransportEvent::MemberLeft { .. } => "member_left",
            TransportEvent::SessionLost { .. } => "session_lost",
        }
    }
}
