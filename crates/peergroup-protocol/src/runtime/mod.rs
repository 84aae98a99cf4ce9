/// Peer group runtime: one task that owns the order of events.
///
/// Application intents arrive as [`RuntimeCommand`]s, transport
/// notifications arrive on the transport's event channel, and the loop
/// handles them one at a time. A command's registry effects are therefore
/// in place before any later transport event is looked at.
mod r#loop;

use std::sync::Arc;

use peergroup_transport::{PeerId, SessionId, SessionPort, Transport, TransportEvent};
use tokio::sync::{mpsc, oneshot};

use crate::config::PeerGroupConfig;
use crate::dispatch::{GroupEvent, GroupObserver};
use crate::error::PeerGroupError;
use crate::group::{GroupCoordinator, GroupStatus, JoinOrCreate, JoinOrCreateBranch};

type Reply<T = ()> = oneshot::Sender<Result<T, PeerGroupError>>;

// ── Commands (app → runtime) ──────────────────────────────────────────

/// Intents the application sends to the runtime loop.
pub enum RuntimeCommand {
    CreateGroup {
        name: String,
        locked: bool,
        reply: Reply,
    },
    DestroyGroup {
        name: String,
        reply: Reply,
    },
    JoinGroup {
        name: String,
        reply: Reply,
    },
    LeaveGroup {
        name: String,
        reply: Reply,
    },
    JoinOrCreate {
        name: String,
        reply: oneshot::Sender<JoinOrCreate>,
    },
    LockGroup {
        name: String,
        reply: Reply,
    },
    UnlockGroup {
        name: String,
        reply: Reply,
    },
    RenameGroup {
        old: String,
        new: String,
        reply: Reply,
    },
    /// Graceful shutdown. Replies once the coordinator has cleaned up.
    Shutdown { reply: oneshot::Sender<()> },
}

impl RuntimeCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeCommand::CreateGroup { .. } => "create_group",
            RuntimeCommand::DestroyGroup { .. } => "destroy_group",
            RuntimeCommand::JoinGroup { .. } => "join_group",
            RuntimeCommand::LeaveGroup { .. } => "leave_group",
            RuntimeCommand::JoinOrCreate { .. } => "join_or_create",
            RuntimeCommand::LockGroup { .. } => "lock_group",
            RuntimeCommand::UnlockGroup { .. } => "unlock_group",
            RuntimeCommand::RenameGroup { .. } => "rename_group",
            RuntimeCommand::Shutdown { .. } => "shutdown",
        }
    }
}

// ── RuntimeHandle (app-facing API) ───────────────────────────────────

/// Handle to a running [`PeerGroupRuntime`].
///
/// Cheap to clone. Intents go through the runtime loop; queries read the
/// shared coordinator directly and never block on the loop.
#[derive(Clone)]
pub struct RuntimeHandle {
    cmd_tx: mpsc::Sender<RuntimeCommand>,
    coordinator: Arc<GroupCoordinator>,
}

impl RuntimeHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> RuntimeCommand,
    ) -> Result<T, PeerGroupError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| PeerGroupError::Shutdown)?;
        rx.await.map_err(|_| PeerGroupError::Shutdown)?
    }

    pub async fn create_group(&self, name: &str, locked: bool) -> Result<(), PeerGroupError> {
        let name = name.to_string();
        self.request(|reply| RuntimeCommand::CreateGroup {
            name,
            locked,
            reply,
        })
        .await
    }

    pub async fn destroy_group(&self, name: &str) -> Result<(), PeerGroupError> {
        let name = name.to_string();
        self.request(|reply| RuntimeCommand::DestroyGroup { name, reply })
            .await
    }

    pub async fn join_group(&self, name: &str) -> Result<(), PeerGroupError> {
        let name = name.to_string();
        self.request(|reply| RuntimeCommand::JoinGroup { name, reply })
            .await
    }

    pub async fn leave_group(&self, name: &str) -> Result<(), PeerGroupError> {
        let name = name.to_string();
        self.request(|reply| RuntimeCommand::LeaveGroup { name, reply })
            .await
    }

    /// Join if discovered, otherwise host. See
    /// [`GroupCoordinator::join_or_create_group`].
    pub async fn join_or_create_group(&self, name: &str) -> JoinOrCreate {
        let (tx, rx) = oneshot::channel();
        let cmd = RuntimeCommand::JoinOrCreate {
            name: name.to_string(),
            reply: tx,
        };
        let stopped = || JoinOrCreate {
            branch: if self.coordinator.status_of_group(name) == GroupStatus::Found {
                JoinOrCreateBranch::Joined
            } else {
                JoinOrCreateBranch::Created
            },
            result: Err(PeerGroupError::Shutdown),
        };
        if self.cmd_tx.send(cmd).await.is_err() {
            return stopped();
        }
        rx.await.unwrap_or_else(|_| stopped())
    }

    pub async fn lock_group(&self, name: &str) -> Result<(), PeerGroupError> {
        let name = name.to_string();
        self.request(|reply| RuntimeCommand::LockGroup { name, reply })
            .await
    }

    pub async fn unlock_group(&self, name: &str) -> Result<(), PeerGroupError> {
        let name = name.to_string();
        self.request(|reply| RuntimeCommand::UnlockGroup { name, reply })
            .await
    }

    pub async fn rename_hosted_group(&self, old: &str, new: &str) -> Result<(), PeerGroupError> {
        let (old, new) = (old.to_string(), new.to_string());
        self.request(|reply| RuntimeCommand::RenameGroup { old, new, reply })
            .await
    }

    /// Graceful shutdown. Waits until the coordinator has cleaned up.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(RuntimeCommand::Shutdown { reply: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    // ── Direct settings ──────────────────────────────

    pub fn set_allowed_members(
        &self,
        name: &str,
        peers: impl IntoIterator<Item = PeerId>,
    ) -> Result<(), PeerGroupError> {
        self.coordinator.set_allowed_members(name, peers)
    }

    pub fn set_legacy_session_port(&self, port: SessionPort) {
        self.coordinator.set_legacy_session_port(port);
    }

    // ── Observers ────────────────────────────────────

    pub fn register_observer(&self, observer: Arc<dyn GroupObserver>) {
        self.coordinator.dispatcher().register(observer);
    }

    pub fn unregister_observer(&self, observer: &Arc<dyn GroupObserver>) {
        self.coordinator.dispatcher().unregister(observer);
    }

    /// Receive every group event from now on, in dispatch order.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<GroupEvent> {
        self.coordinator.dispatcher().subscribe()
    }

    // ── Queries ──────────────────────────────────────

    pub fn coordinator(&self) -> &Arc<GroupCoordinator> {
        &self.coordinator
    }

    pub fn list_found_group_names(&self) -> Vec<String> {
        self.coordinator.list_found_group_names()
    }

    pub fn list_hosted_group_names(&self) -> Vec<String> {
        self.coordinator.list_hosted_group_names()
    }

    pub fn list_joined_group_names(&self) -> Vec<String> {
        self.coordinator.list_joined_group_names()
    }

    pub fn list_locked_group_names(&self) -> Vec<String> {
        self.coordinator.list_locked_group_names()
    }

    pub fn peer_ids_in_group(&self, name: &str) -> Vec<PeerId> {
        self.coordinator.peer_ids_in_group(name)
    }

    pub fn number_of_peers_in_group(&self, name: &str) -> usize {
        self.coordinator.number_of_peers_in_group(name)
    }

    pub fn session_id_of_group(&self, name: &str) -> SessionId {
        self.coordinator.session_id_of_group(name)
    }

    pub fn session_port_of_group(&self, name: &str) -> SessionPort {
        self.coordinator.session_port_of_group(name)
    }

    pub fn status_of_group(&self, name: &str) -> GroupStatus {
        self.coordinator.status_of_group(name)
    }

    pub fn is_legacy_group(&self, name: &str) -> bool {
        self.coordinator.is_legacy_group(name)
    }

    pub fn does_group_exist(&self, name: &str) -> bool {
        self.coordinator.does_group_exist(name)
    }

    pub fn group_prefix(&self) -> &str {
        self.coordinator.group_prefix()
    }

    pub fn my_peer_id(&self) -> &PeerId {
        self.coordinator.my_peer_id()
    }

    pub fn legacy_session_port(&self) -> Option<SessionPort> {
        self.coordinator.legacy_session_port()
    }

    pub async fn host_peer_id_of_group(&self, name: &str) -> Option<PeerId> {
        self.coordinator.host_peer_id_of_group(name).await
    }
}

// ── PeerGroupRuntime ─────────────────────────────────────────────────

pub struct PeerGroupRuntime;

impl PeerGroupRuntime {
    /// Build a coordinator over `transport`, start discovery and spawn the
    /// loop.
    pub async fn start(
        config: PeerGroupConfig,
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Result<RuntimeHandle, PeerGroupError> {
        let buffer = config.command_buffer;
        let coordinator = Arc::new(GroupCoordinator::new(config, transport));
        coordinator.start().await?;
        Ok(Self::spawn_with_buffer(coordinator, events, buffer))
    }

    /// Spawn the loop for an already started coordinator.
    pub fn spawn(
        coordinator: Arc<GroupCoordinator>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> RuntimeHandle {
        Self::spawn_with_buffer(coordinator, events, 64)
    }

    fn spawn_with_buffer(
        coordinator: Arc<GroupCoordinator>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        buffer: usize,
    ) -> RuntimeHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(buffer);
        tokio::spawn(r#loop::runtime_loop(coordinator.clone(), cmd_rx, events));
        RuntimeHandle {
            cmd_tx,
            coordinator,
        }
    }
}
