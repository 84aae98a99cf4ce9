//! Peer group transport boundary.
//!
//! Defines the discovery/session capability the group layer consumes
//! ([`Transport`]), the inbound notification feed ([`TransportEvent`]) and
//! the identifier types shared by both sides.
//!
//! [`LoopbackBus`] is an in-process implementation: every attachment sees
//! the advertisements and sessions of the others, which makes it suitable
//! for tests and local simulation.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use peergroup_transport::{LoopbackBus, LoopbackConfig, Transport};
//!
//! # async fn example() -> Result<(), peergroup_transport::TransportError> {
//! let bus = LoopbackBus::new(LoopbackConfig::new());
//! let (alice, _alice_events) = bus.attach("alice");
//! let (bob, mut bob_events) = bus.attach("bob");
//!
//! bob.find_advertised_name("org.example").await?;
//! alice.advertise("org.example.chess.1024").await?;
//!
//! let event = bob_events.recv().await;
//! println!("bob saw {event:?}");
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod event;
mod loopback;
mod transport;

pub use config::LoopbackConfig;
pub use error::TransportError;
pub use event::TransportEvent;
pub use loopback::{LoopbackBus, LoopbackTransport};
pub use transport::{SessionAcceptor, Transport};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique bus name of a peer attachment (e.g. `":alice.1"`).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Transport-assigned session identifier. Zero means "no session".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u32);

impl SessionId {
    /// Sentinel for "not bound to a session".
    pub const NONE: SessionId = SessionId(0);

    pub fn is_valid(self) -> bool {
        self != Self::NONE
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport-level session port. Zero is the invalid sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionPort(pub u16);

impl SessionPort {
    /// Sentinel for "port not known".
    pub const INVALID: SessionPort = SessionPort(0);
    /// Passed to [`Transport::bind_session_port`] to let the transport pick.
    pub const ANY: SessionPort = SessionPort(0);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for SessionPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bitmask of the transports an advertisement was seen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportMask(pub u16);

impl TransportMask {
    pub const NONE: TransportMask = TransportMask(0x0000);
    pub const LOCAL: TransportMask = TransportMask(0x0001);
    pub const TCP: TransportMask = TransportMask(0x0004);
    pub const UDP: TransportMask = TransportMask(0x0100);
    pub const ANY: TransportMask = TransportMask(0xFFFF);

    pub fn contains(self, other: TransportMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl fmt::Display for TransportMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_invalid() {
        assert!(!SessionId::NONE.is_valid());
        assert!(!SessionPort::INVALID.is_valid());
        assert!(SessionId(7).is_valid());
        assert!(SessionPort(12345).is_valid());
    }

    #[test]
    fn peer_id_display_is_raw_name() {
        let id = PeerId::from(":alice.1");
        assert_eq!(id.to_string(), ":alice.1");
        assert_eq!(format!("{id:?}"), "PeerId(:alice.1)");
    }

    #[test]
    fn transport_mask_contains() {
        assert!(TransportMask::ANY.contains(TransportMask::TCP));
        assert!(!TransportMask::LOCAL.contains(TransportMask::TCP));
        assert_eq!(TransportMask::TCP.to_string(), "0x0004");
    }
}
