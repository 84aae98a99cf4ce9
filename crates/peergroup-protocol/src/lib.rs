//! Peer group layer.
//!
//! Lets independent peers discover one another over a discovery/session
//! transport, form named groups and keep a consistent view of group
//! membership while application calls and transport notifications race.
//!
//! Naming convention on the wire: `<prefix>.<group>.<port>`. Advertisements
//! that do not follow it are treated as legacy groups.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod group;
pub mod runtime;

pub use config::PeerGroupConfig;
pub use dispatch::{ChannelObserver, EventDispatcher, GroupEvent, GroupObserver};
pub use error::PeerGroupError;
pub use group::{
    DecodedName, GroupCoordinator, GroupEntity, GroupRegistry, GroupStatus, JoinOrCreate,
    JoinOrCreateBranch, NameCodec,
};
pub use runtime::{PeerGroupRuntime, RuntimeCommand, RuntimeHandle};

pub use peergroup_transport::{PeerId, SessionId, SessionPort, TransportMask};
