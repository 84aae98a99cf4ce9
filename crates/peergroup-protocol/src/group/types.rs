/// Group data types.
use std::collections::BTreeSet;
use std::fmt;

use peergroup_transport::{PeerId, SessionId, SessionPort, TransportMask};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a group as seen by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    /// Unknown group. Returned by lookups on absent names.
    #[default]
    Invalid,
    HostedUnlocked,
    HostedLocked,
    JoinedUnlocked,
    JoinedLocked,
    /// Discovered through an advertisement; neither hosted nor joined.
    Found,
}

impl GroupStatus {
    pub fn is_hosted(self) -> bool {
        matches!(self, GroupStatus::HostedUnlocked | GroupStatus::HostedLocked)
    }

    pub fn is_joined(self) -> bool {
        matches!(self, GroupStatus::JoinedUnlocked | GroupStatus::JoinedLocked)
    }

    pub fn is_locked(self) -> bool {
        matches!(self, GroupStatus::HostedLocked | GroupStatus::JoinedLocked)
    }

    /// Hosted or joined: the only states that track members.
    pub fn has_session(self) -> bool {
        self.is_hosted() || self.is_joined()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GroupStatus::Invalid => "invalid",
            GroupStatus::HostedUnlocked => "hosted_unlocked",
            GroupStatus::HostedLocked => "hosted_locked",
            GroupStatus::JoinedUnlocked => "joined_unlocked",
            GroupStatus::JoinedLocked => "joined_locked",
            GroupStatus::Found => "found",
        }
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One group's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntity {
    pub name: String,
    pub session_id: SessionId,
    pub session_port: SessionPort,
    /// Discovered under a name that does not follow `<prefix>.<name>.<port>`.
    pub is_legacy: bool,
    pub status: GroupStatus,
    /// Current members in arrival order, no duplicates.
    pub members: Vec<PeerId>,
    /// Peers admitted to a private hosted group. Empty means anyone.
    pub allowed_members: BTreeSet<PeerId>,
    /// Exact external name the group is (or was last) advertised under.
    pub advertised_name: Option<String>,
    /// Transports the latest advertisement was seen on.
    pub transport: TransportMask,
}

impl GroupEntity {
    pub fn new(name: impl Into<String>, session_port: SessionPort, status: GroupStatus) -> Self {
        Self {
            name: name.into(),
            session_id: SessionId::NONE,
            session_port,
            is_legacy: false,
            status,
            members: Vec::new(),
            allowed_members: BTreeSet::new(),
            advertised_name: None,
            transport: TransportMask::NONE,
        }
    }

    pub fn with_legacy(mut self, is_legacy: bool) -> Self {
        self.is_legacy = is_legacy;
        self
    }

    pub fn with_advertised_name(mut self, name: impl Into<String>) -> Self {
        self.advertised_name = Some(name.into());
        self
    }

    pub fn with_transport(mut self, transport: TransportMask) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn has_member(&self, peer: &PeerId) -> bool {
        self.members.contains(peer)
    }

    /// Insert `peer` unless present. Returns whether the set changed.
    pub fn add_member(&mut self, peer: PeerId) -> bool {
        if self.has_member(&peer) {
            return false;
        }
        self.members.push(peer);
        true
    }

    /// Remove `peer` if present. Returns whether the set changed.
    pub fn remove_member(&mut self, peer: &PeerId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != peer);
        self.members.len() != before
    }

    /// Whether the host should let `joiner` in.
    pub fn admits(&self, joiner: &PeerId) -> bool {
        self.status == GroupStatus::HostedUnlocked
            && (self.allowed_members.is_empty() || self.allowed_members.contains(joiner))
    }
}
