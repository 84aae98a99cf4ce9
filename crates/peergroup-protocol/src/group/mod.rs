/// Peer groups: registry, naming convention and the lifecycle coordinator.
///
/// The registry and codec are plain data structures; the coordinator is the
/// only part that talks to the transport.
pub mod codec;
pub mod coordinator;
pub mod registry;
pub mod types;

pub use codec::{DecodedName, NameCodec};
pub use coordinator::{GroupCoordinator, JoinOrCreate, JoinOrCreateBranch};
pub use registry::GroupRegistry;
pub use types::{GroupEntity, GroupStatus};
