/// GroupCoordinator: the group lifecycle state machine.
///
/// Maps application intents and inbound transport events onto registry
/// mutations, outbound transport calls and observer notifications.
///
/// Intents that call the transport and then mutate the registry re-check
/// their guard at mutation time (`insert` / `transition`), so a racing
/// transport event can never leave a half-applied entry behind. Events are
/// dispatched only after the registry lock has been released.
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use peergroup_transport::{
    PeerId, SessionAcceptor, SessionId, SessionPort, Transport, TransportEvent, TransportMask,
};

use crate::config::PeerGroupConfig;
use crate::dispatch::{EventDispatcher, GroupEvent};
use crate::error::PeerGroupError;
use crate::group::codec::{is_valid_group_name, DecodedName, NameCodec};
use crate::group::registry::GroupRegistry;
use crate::group::types::{GroupEntity, GroupStatus};

/// Which path [`GroupCoordinator::join_or_create_group`] took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOrCreateBranch {
    Joined,
    Created,
}

/// Outcome of [`GroupCoordinator::join_or_create_group`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOrCreate {
    pub branch: JoinOrCreateBranch,
    pub result: Result<(), PeerGroupError>,
}

/// Admission policy installed on every port we bind.
struct RegistryAcceptor {
    registry: Arc<GroupRegistry>,
}

impl SessionAcceptor for RegistryAcceptor {
    fn accept_session_joiner(&self, port: SessionPort, joiner: &PeerId) -> bool {
        let accepted = self
            .registry
            .find_hosted_name_by_session_port(port)
            .and_then(|name| self.registry.snapshot(&name))
            .is_some_and(|group| group.admits(joiner));
        if !accepted {
            tracing::debug!(%port, %joiner, "rejecting session joiner");
        }
        accepted
    }
}

pub struct GroupCoordinator {
    transport: Arc<dyn Transport>,
    registry: Arc<GroupRegistry>,
    dispatcher: Arc<EventDispatcher>,
    codec: NameCodec,
    local_peer: PeerId,
    legacy_port: Mutex<Option<SessionPort>>,
    /// Names with a create in flight.
    creating: Mutex<HashSet<String>>,
    shut_down: AtomicBool,
}

impl GroupCoordinator {
    pub fn new(config: PeerGroupConfig, transport: Arc<dyn Transport>) -> Self {
        let local_peer = transport.local_peer_id();
        Self {
            transport,
            registry: Arc::new(GroupRegistry::new()),
            dispatcher: Arc::new(EventDispatcher::new()),
            codec: NameCodec::new(config.prefix),
            local_peer,
            legacy_port: Mutex::new(config.legacy_session_port),
            creating: Mutex::new(HashSet::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Start discovering groups under our prefix.
    pub async fn start(&self) -> Result<(), PeerGroupError> {
        self.ensure_running()?;
        self.transport
            .find_advertised_name(self.codec.prefix())
            .await?;
        tracing::info!(
            peer = %self.local_peer,
            prefix = self.codec.prefix(),
            "peer group coordinator started"
        );
        Ok(())
    }

    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn codec(&self) -> &NameCodec {
        &self.codec
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<(), PeerGroupError> {
        if self.is_shut_down() {
            Err(PeerGroupError::Shutdown)
        } else {
            Ok(())
        }
    }

    fn ensure_valid(name: &str) -> Result<(), PeerGroupError> {
        if is_valid_group_name(name) {
            Ok(())
        } else {
            Err(PeerGroupError::InvalidGroupName {
                name: name.to_string(),
            })
        }
    }

    fn hosted(&self, name: &str) -> Result<GroupEntity, PeerGroupError> {
        self.registry
            .snapshot(name)
            .filter(|g| g.status.is_hosted())
            .ok_or_else(|| PeerGroupError::not_found(name))
    }

    fn external_name(&self, group: &GroupEntity) -> String {
        group
            .advertised_name
            .clone()
            .unwrap_or_else(|| self.codec.encode(&group.name, group.session_port))
    }

    // ── Intents ──────────────────────────────────────────────────────────

    /// Host a new group. A locked group is bound but not advertised.
    pub async fn create_group(&self, name: &str, locked: bool) -> Result<(), PeerGroupError> {
        self.ensure_running()?;
        Self::ensure_valid(name)?;
        if self.registry.contains(name) || !self.creating.lock().insert(name.to_string()) {
            return Err(PeerGroupError::duplicate(name));
        }

        let result = self.create_hosted(name, locked).await;
        self.creating.lock().remove(name);
        result
    }

    async fn create_hosted(&self, name: &str, locked: bool) -> Result<(), PeerGroupError> {
        let acceptor = Arc::new(RegistryAcceptor {
            registry: self.registry.clone(),
        });
        let port = self
            .transport
            .bind_session_port(SessionPort::ANY, acceptor)
            .await?;

        let advertised = self.codec.encode(name, port);
        let status = if locked {
            GroupStatus::HostedLocked
        } else {
            GroupStatus::HostedUnlocked
        };
        let entity = GroupEntity::new(name, port, status).with_advertised_name(advertised.clone());

        // Registered before advertising so the acceptor knows the port by the
        // time anyone can see the name.
        if let Err(e) = self.registry.insert(entity) {
            self.release_port(port).await;
            return Err(e);
        }

        if !locked {
            if let Err(e) = self.transport.advertise(&advertised).await {
                self.registry.remove(name);
                self.release_port(port).await;
                return Err(e.into());
            }
        }

        tracing::info!(group = name, %port, locked, "hosting group");
        Ok(())
    }

    async fn release_port(&self, port: SessionPort) {
        if let Err(e) = self.transport.unbind_session_port(port).await {
            tracing::warn!(%port, "failed to unbind session port: {e}");
        }
    }

    /// Stop hosting a group. Transport failures are logged; the group is
    /// removed locally either way.
    pub async fn destroy_group(&self, name: &str) -> Result<(), PeerGroupError> {
        self.ensure_running()?;
        self.destroy_hosted(name).await
    }

    async fn destroy_hosted(&self, name: &str) -> Result<(), PeerGroupError> {
        let group = self
            .registry
            .remove_if(name, |g| g.status.is_hosted())
            .ok_or_else(|| PeerGroupError::not_found(name))?;

        if group.status == GroupStatus::HostedUnlocked {
            let advertised = self.external_name(&group);
            if let Err(e) = self.transport.stop_advertise(&advertised).await {
                tracing::warn!(group = name, "failed to stop advertising: {e}");
            }
        }
        self.release_port(group.session_port).await;

        tracing::info!(group = name, "destroyed hosted group");
        Ok(())
    }

    /// Join a discovered group.
    pub async fn join_group(&self, name: &str) -> Result<(), PeerGroupError> {
        self.ensure_running()?;
        Self::ensure_valid(name)?;
        let group = self
            .registry
            .snapshot(name)
            .filter(|g| g.status == GroupStatus::Found)
            .ok_or_else(|| PeerGroupError::not_found(name))?;

        let target = self.external_name(&group);
        let session_id = match self.transport.join_session(&target, group.session_port).await {
            Ok(id) => id,
            Err(first) => match self.join_with_legacy_hint(&group).await {
                Some(id) => id,
                None => return Err(first.into()),
            },
        };

        if !self.registry.transition(
            name,
            GroupStatus::Found,
            GroupStatus::JoinedUnlocked,
            Some(session_id),
        ) {
            // The advertisement vanished while we were joining.
            if let Err(e) = self.transport.leave_session(session_id).await {
                tracing::warn!(group = name, %session_id, "failed to leave stale session: {e}");
            }
            return Err(PeerGroupError::not_found(name));
        }

        tracing::info!(group = name, %session_id, "joined group");
        Ok(())
    }

    /// Retry a conforming group as if it were hosted by a legacy peer.
    async fn join_with_legacy_hint(&self, group: &GroupEntity) -> Option<SessionId> {
        if group.is_legacy {
            return None;
        }
        let port = (*self.legacy_port.lock())?;
        let legacy_name = self.codec.legacy_name(&group.name);
        match self.transport.join_session(&legacy_name, port).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::debug!(group = %group.name, %port, "legacy join retry failed: {e}");
                None
            }
        }
    }

    /// Leave a joined group. The group is dropped locally even if the
    /// transport reports an error, which is then returned.
    pub async fn leave_group(&self, name: &str) -> Result<(), PeerGroupError> {
        self.ensure_running()?;
        self.leave_joined(name).await
    }

    async fn leave_joined(&self, name: &str) -> Result<(), PeerGroupError> {
        let group = self
            .registry
            .snapshot(name)
            .filter(|g| g.status.is_joined())
            .ok_or_else(|| PeerGroupError::not_found(name))?;
        let session_id = group.session_id;

        let result = self.transport.leave_session(session_id).await;
        // The session may have been lost and the name found again meanwhile.
        let removed = self
            .registry
            .remove_if(name, |g| g.status.is_joined() && g.session_id == session_id);
        if removed.is_some() {
            tracing::info!(group = name, %session_id, "left group");
        } else {
            tracing::debug!(group = name, %session_id, "group changed while leaving");
        }
        result.map_err(Into::into)
    }

    /// Join `name` if it has been discovered, otherwise host it.
    ///
    /// Two peers calling this at the same moment may both end up hosting.
    pub async fn join_or_create_group(&self, name: &str) -> JoinOrCreate {
        if self.registry.status(name) == GroupStatus::Found {
            JoinOrCreate {
                branch: JoinOrCreateBranch::Joined,
                result: self.join_group(name).await,
            }
        } else {
            JoinOrCreate {
                branch: JoinOrCreateBranch::Created,
                result: self.create_group(name, false).await,
            }
        }
    }

    /// Hide a hosted group from discovery and refuse new joiners.
    pub async fn lock_group(&self, name: &str) -> Result<(), PeerGroupError> {
        self.ensure_running()?;
        let group = self.hosted(name)?;
        if group.status == GroupStatus::HostedLocked {
            return Ok(());
        }

        self.transport
            .stop_advertise(&self.external_name(&group))
            .await?;
        if !self.registry.transition(
            name,
            GroupStatus::HostedUnlocked,
            GroupStatus::HostedLocked,
            None,
        ) {
            // Destroyed or lost while the advertisement was being withdrawn.
            return Err(PeerGroupError::not_found(name));
        }
        tracing::info!(group = name, "locked group");
        Ok(())
    }

    pub async fn unlock_group(&self, name: &str) -> Result<(), PeerGroupError> {
        self.ensure_running()?;
        let group = self.hosted(name)?;
        if group.status == GroupStatus::HostedUnlocked {
            return Ok(());
        }

        let advertised = self.external_name(&group);
        self.transport.advertise(&advertised).await?;
        if !self.registry.transition(
            name,
            GroupStatus::HostedLocked,
            GroupStatus::HostedUnlocked,
            None,
        ) {
            if let Err(e) = self.transport.stop_advertise(&advertised).await {
                tracing::warn!(group = name, "failed to withdraw advertisement: {e}");
            }
            return Err(PeerGroupError::not_found(name));
        }
        tracing::info!(group = name, "unlocked group");
        Ok(())
    }

    /// Rename a hosted group, moving its advertisement to the new name.
    pub async fn rename_hosted_group(&self, old: &str, new: &str) -> Result<(), PeerGroupError> {
        self.ensure_running()?;
        Self::ensure_valid(new)?;
        let group = self.hosted(old)?;
        if old == new {
            return Ok(());
        }
        if self.creating.lock().contains(new) {
            return Err(PeerGroupError::duplicate(new));
        }

        self.registry.rename_group(old, new)?;

        let old_advertised = self.external_name(&group);
        let new_advertised = self.codec.encode(new, group.session_port);
        if group.status == GroupStatus::HostedUnlocked {
            if let Err(e) = self.transport.advertise(&new_advertised).await {
                self.registry.rename_group(new, old)?;
                return Err(e.into());
            }
            if let Err(e) = self.transport.stop_advertise(&old_advertised).await {
                tracing::warn!(group = old, "failed to stop old advertisement: {e}");
            }
        }
        self.registry
            .update_advertised_name(new, Some(new_advertised));

        tracing::info!(from = old, to = new, "renamed hosted group");
        Ok(())
    }

    /// Restrict who may join a hosted group. An empty set admits anyone.
    pub fn set_allowed_members(
        &self,
        name: &str,
        peers: impl IntoIterator<Item = PeerId>,
    ) -> Result<(), PeerGroupError> {
        self.ensure_running()?;
        self.hosted(name)?;
        self.registry
            .set_allowed_members(name, peers.into_iter().collect::<BTreeSet<_>>());
        Ok(())
    }

    /// Set the port used for legacy groups. `SessionPort::INVALID` clears it.
    pub fn set_legacy_session_port(&self, port: SessionPort) {
        *self.legacy_port.lock() = port.is_valid().then_some(port);
    }

    /// Leave every joined group, destroy every hosted one and forget all
    /// state. Every later intent fails with [`PeerGroupError::Shutdown`].
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        for name in self.registry.list_joined() {
            if let Err(e) = self.leave_joined(&name).await {
                tracing::warn!(group = %name, "leave during shutdown failed: {e}");
            }
        }
        for name in self.registry.list_hosted() {
            if let Err(e) = self.destroy_hosted(&name).await {
                tracing::warn!(group = %name, "destroy during shutdown failed: {e}");
            }
        }
        if let Err(e) = self
            .transport
            .cancel_find_advertised_name(self.codec.prefix())
            .await
        {
            tracing::debug!("cancel discovery failed: {e}");
        }

        self.registry.clear();
        self.dispatcher.clear();
        tracing::info!(peer = %self.local_peer, "peer group coordinator shut down");
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn list_found_group_names(&self) -> Vec<String> {
        self.registry.list_found()
    }

    pub fn list_hosted_group_names(&self) -> Vec<String> {
        self.registry.list_hosted()
    }

    pub fn list_joined_group_names(&self) -> Vec<String> {
        self.registry.list_joined()
    }

    pub fn list_locked_group_names(&self) -> Vec<String> {
        self.registry.list_locked()
    }

    pub fn peer_ids_in_group(&self, name: &str) -> Vec<PeerId> {
        self.registry.member_ids(name)
    }

    pub fn number_of_peers_in_group(&self, name: &str) -> usize {
        self.registry.member_count(name)
    }

    pub fn session_id_of_group(&self, name: &str) -> SessionId {
        self.registry.session_id(name)
    }

    pub fn session_port_of_group(&self, name: &str) -> SessionPort {
        self.registry.session_port(name)
    }

    pub fn status_of_group(&self, name: &str) -> GroupStatus {
        self.registry.status(name)
    }

    pub fn is_legacy_group(&self, name: &str) -> bool {
        self.registry.is_legacy(name)
    }

    pub fn does_group_exist(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn group_prefix(&self) -> &str {
        self.codec.prefix()
    }

    pub fn my_peer_id(&self) -> &PeerId {
        &self.local_peer
    }

    pub fn legacy_session_port(&self) -> Option<SessionPort> {
        *self.legacy_port.lock()
    }

    /// Peer hosting `name`: ourselves for hosted groups, otherwise whoever
    /// owns the advertised name right now.
    pub async fn host_peer_id_of_group(&self, name: &str) -> Option<PeerId> {
        let group = self.registry.snapshot(name)?;
        if group.status.is_hosted() {
            return Some(self.local_peer.clone());
        }
        match self.transport.name_owner(&self.external_name(&group)).await {
            Ok(owner) => owner,
            Err(e) => {
                tracing::debug!(group = name, "name owner lookup failed: {e}");
                None
            }
        }
    }

    // ── Transport events ─────────────────────────────────────────────────

    pub async fn handle_transport_event(&self, event: TransportEvent) {
        if self.is_shut_down() {
            tracing::debug!(kind = event.kind(), "ignoring transport event after shutdown");
            return;
        }
        match event {
            TransportEvent::AdvertisementFound { name, transport } => {
                self.advertisement_found(&name, transport)
            }
            TransportEvent::AdvertisementLost { name, transport } => {
                self.advertisement_lost(&name, transport)
            }
            TransportEvent::SessionJoined {
                port,
                session_id,
                joiner,
            } => self.session_joined(port, session_id, joiner),
            TransportEvent::MemberJoined { session_id, peer } => {
                self.member_joined(session_id, peer)
            }
            TransportEvent::MemberLeft { session_id, peer } => self.member_left(session_id, &peer),
            TransportEvent::SessionLost { session_id } => self.session_lost(session_id).await,
        }
    }

    /// Register or refresh a discovered group.
    ///
    /// A joined group that the host had locked is flipped back to
    /// `JoinedUnlocked` when its advertisement reappears. That flip mirrors
    /// the host's lock state on joiners and goes beyond plain discovery.
    pub fn advertisement_found(&self, external_name: &str, transport: TransportMask) {
        let decoded = self.codec.decode(external_name);
        let is_legacy = decoded.is_legacy();
        let port = match decoded.port().or(*self.legacy_port.lock()) {
            Some(port) => port,
            None => {
                tracing::debug!(name = external_name, "ignoring legacy advertisement without port hint");
                return;
            }
        };
        let group = match decoded {
            DecodedName::Conforming { group_name, .. } | DecodedName::Legacy { group_name } => {
                group_name
            }
        };

        if self.creating.lock().contains(&group) {
            tracing::debug!(group = %group, "ignoring advertisement of group being created");
            return;
        }

        match self.registry.status(&group) {
            GroupStatus::Invalid => {
                let entity = GroupEntity::new(&group, port, GroupStatus::Found)
                    .with_legacy(is_legacy)
                    .with_advertised_name(external_name)
                    .with_transport(transport);
                if self.registry.insert(entity).is_ok() {
                    tracing::info!(group = %group, %port, is_legacy, "found group");
                    self.dispatcher
                        .dispatch(GroupEvent::FoundAdvertisedName { group, transport });
                }
            }
            GroupStatus::Found => {
                if self
                    .registry
                    .refresh_found(&group, port, external_name, is_legacy)
                {
                    tracing::debug!(group = %group, %port, "refreshed found group");
                }
            }
            GroupStatus::JoinedLocked => {
                if self.registry.advertised_name(&group).as_deref() == Some(external_name)
                    && self.registry.transition(
                        &group,
                        GroupStatus::JoinedLocked,
                        GroupStatus::JoinedUnlocked,
                        None,
                    )
                {
                    tracing::info!(group = %group, "joined group unlocked by host");
                }
            }
            status => {
                tracing::debug!(group = %group, %status, "stale advertisement ignored");
            }
        }
    }

    /// Forget a discovered group whose advertisement went away.
    ///
    /// For a joined group the loss means the host locked it (or stopped
    /// advertising), so it is flipped to `JoinedLocked` and kept. Like the
    /// reverse flip in [`Self::advertisement_found`], this mirrors the host's
    /// lock state and goes beyond plain discovery.
    pub fn advertisement_lost(&self, external_name: &str, transport: TransportMask) {
        let decoded = self.codec.decode(external_name);
        let group = decoded.group_name();
        if self.registry.advertised_name(group).as_deref() != Some(external_name) {
            tracing::debug!(name = external_name, "lost advertisement of unknown group");
            return;
        }

        match self.registry.status(group) {
            GroupStatus::Found => {
                if self
                    .registry
                    .remove_with_status(group, GroupStatus::Found)
                    .is_some()
                {
                    tracing::info!(group, "lost group advertisement");
                    self.dispatcher.dispatch(GroupEvent::LostAdvertisedName {
                        group: group.to_string(),
                        transport,
                    });
                }
            }
            GroupStatus::JoinedUnlocked => {
                if self.registry.transition(
                    group,
                    GroupStatus::JoinedUnlocked,
                    GroupStatus::JoinedLocked,
                    None,
                ) {
                    tracing::info!(group, "joined group locked by host");
                }
            }
            status => {
                tracing::debug!(group, %status, "advertisement loss ignored");
            }
        }
    }

    /// Host side: the first peer joined one of our ports.
    pub fn session_joined(&self, port: SessionPort, session_id: SessionId, joiner: PeerId) {
        let Some(group) = self.registry.find_hosted_name_by_session_port(port) else {
            tracing::debug!(%port, %session_id, "session joined on unknown port");
            return;
        };
        if !self.registry.session_id(&group).is_valid() {
            self.registry.update_session_id(&group, session_id);
        }
        tracing::info!(group = %group, %session_id, %joiner, "hosted session started");
        self.member_added(group, joiner);
    }

    pub fn member_joined(&self, session_id: SessionId, peer: PeerId) {
        match self.registry.find_name_by_session_id(session_id) {
            Some(group) => self.member_added(group, peer),
            None => tracing::debug!(%session_id, %peer, "member joined unknown session"),
        }
    }

    fn member_added(&self, group: String, peer: PeerId) {
        if self.registry.add_member(&group, peer.clone()) {
            let num_peers = self.registry.member_count(&group);
            self.dispatcher.dispatch(GroupEvent::PeerAdded {
                peer,
                group,
                num_peers,
            });
        }
    }

    pub fn member_left(&self, session_id: SessionId, peer: &PeerId) {
        let Some(group) = self.registry.find_name_by_session_id(session_id) else {
            tracing::debug!(%session_id, %peer, "member left unknown session");
            return;
        };
        if self.registry.remove_member(&group, peer) {
            let num_peers = self.registry.member_count(&group);
            self.dispatcher.dispatch(GroupEvent::PeerRemoved {
                peer: peer.clone(),
                group,
                num_peers,
            });
        }
    }

    pub async fn session_lost(&self, session_id: SessionId) {
        let Some(name) = self.registry.find_name_by_session_id(session_id) else {
            tracing::debug!(%session_id, "lost unknown session");
            return;
        };
        let Some(group) = self.registry.remove(&name) else {
            return;
        };

        if group.status.is_hosted() {
            if group.status == GroupStatus::HostedUnlocked {
                if let Err(e) = self
                    .transport
                    .stop_advertise(&self.external_name(&group))
                    .await
                {
                    tracing::warn!(group = %name, "failed to stop advertising lost group: {e}");
                }
            }
            self.release_port(group.session_port).await;
        }

        tracing::info!(group = %name, %session_id, "group session lost");
        self.dispatcher.dispatch(GroupEvent::GroupLost { group: name });
    }
}
