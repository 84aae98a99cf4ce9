/// GroupRegistry: the single owner of every [`GroupEntity`] in the process.
///
/// One mutex guards the groups and their secondary indices (session id and
/// hosted session port). Each call takes the lock once, so mutations never
/// interleave and reads see a consistent snapshot. Lookups on unknown names
/// answer with sentinels rather than errors.
use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::Mutex;
use peergroup_transport::{PeerId, SessionId, SessionPort};

use crate::error::PeerGroupError;
use crate::group::types::{GroupEntity, GroupStatus};

#[derive(Default)]
pub struct GroupRegistry {
    inner: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    groups: BTreeMap<String, GroupEntity>,
    by_session: HashMap<SessionId, String>,
    by_hosted_port: HashMap<SessionPort, String>,
}

impl RegistryState {
    fn index(&mut self, entity: &GroupEntity) {
        if entity.session_id.is_valid() {
            self.by_session
                .insert(entity.session_id, entity.name.clone());
        }
        if entity.status.is_hosted() && entity.session_port.is_valid() {
            self.by_hosted_port
                .insert(entity.session_port, entity.name.clone());
        }
    }

    fn unindex(&mut self, entity: &GroupEntity) {
        if self.by_session.get(&entity.session_id) == Some(&entity.name) {
            self.by_session.remove(&entity.session_id);
        }
        if self.by_hosted_port.get(&entity.session_port) == Some(&entity.name) {
            self.by_hosted_port.remove(&entity.session_port);
        }
    }

    /// Apply `f` to the named entity, keeping the indices in step.
    fn update<R>(&mut self, name: &str, f: impl FnOnce(&mut GroupEntity) -> R) -> Option<R> {
        let mut entity = self.groups.remove(name)?;
        self.unindex(&entity);
        let out = f(&mut entity);
        self.index(&entity);
        self.groups.insert(entity.name.clone(), entity);
        Some(out)
    }

    fn take(&mut self, name: &str) -> Option<GroupEntity> {
        let entity = self.groups.remove(name)?;
        self.unindex(&entity);
        Some(entity)
    }
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Register a bare group with empty member sets.
    pub fn add(
        &self,
        name: &str,
        port: SessionPort,
        status: GroupStatus,
    ) -> Result<(), PeerGroupError> {
        self.insert(GroupEntity::new(name, port, status))
    }

    /// Register a fully built entity.
    pub fn insert(&self, entity: GroupEntity) -> Result<(), PeerGroupError> {
        let mut state = self.inner.lock();
        if state.groups.contains_key(&entity.name) {
            return Err(PeerGroupError::duplicate(&entity.name));
        }
        state.index(&entity);
        state.groups.insert(entity.name.clone(), entity);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Option<GroupEntity> {
        self.inner.lock().take(name)
    }

    /// Remove the group only while it is in `status`.
    pub fn remove_with_status(&self, name: &str, status: GroupStatus) -> Option<GroupEntity> {
        self.remove_if(name, |g| g.status == status)
    }

    /// Remove the group only if `guard` holds for it, checked under the same
    /// lock as the removal.
    pub fn remove_if(
        &self,
        name: &str,
        guard: impl FnOnce(&GroupEntity) -> bool,
    ) -> Option<GroupEntity> {
        let mut state = self.inner.lock();
        if !state.groups.get(name).is_some_and(guard) {
            return None;
        }
        state.take(name)
    }

    pub fn rename_group(&self, old: &str, new: &str) -> Result<(), PeerGroupError> {
        let mut state = self.inner.lock();
        if old == new {
            return Ok(());
        }
        if state.groups.contains_key(new) {
            return Err(PeerGroupError::duplicate(new));
        }
        if let Some(mut entity) = state.take(old) {
            entity.name = new.to_string();
            state.index(&entity);
            state.groups.insert(entity.name.clone(), entity);
        }
        Ok(())
    }

    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.groups.clear();
        state.by_session.clear();
        state.by_hosted_port.clear();
    }

    // ── Lookups ──────────────────────────────────────────────────────────

    pub fn find_name_by_session_id(&self, session_id: SessionId) -> Option<String> {
        self.inner.lock().by_session.get(&session_id).cloned()
    }

    pub fn find_hosted_name_by_session_port(&self, port: SessionPort) -> Option<String> {
        self.inner.lock().by_hosted_port.get(&port).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().groups.contains_key(name)
    }

    pub fn snapshot(&self, name: &str) -> Option<GroupEntity> {
        self.inner.lock().groups.get(name).cloned()
    }

    pub fn session_id(&self, name: &str) -> SessionId {
        self.read(name, |g| g.session_id).unwrap_or(SessionId::NONE)
    }

    pub fn session_port(&self, name: &str) -> SessionPort {
        self.read(name, |g| g.session_port)
            .unwrap_or(SessionPort::INVALID)
    }

    pub fn status(&self, name: &str) -> GroupStatus {
        self.read(name, |g| g.status).unwrap_or(GroupStatus::Invalid)
    }

    pub fn is_legacy(&self, name: &str) -> bool {
        self.read(name, |g| g.is_legacy).unwrap_or(false)
    }

    pub fn advertised_name(&self, name: &str) -> Option<String> {
        self.read(name, |g| g.advertised_name.clone()).flatten()
    }

    fn read<R>(&self, name: &str, f: impl FnOnce(&GroupEntity) -> R) -> Option<R> {
        self.inner.lock().groups.get(name).map(f)
    }

    // ── Field updates (no-op on unknown names) ───────────────────────────

    pub fn update_session_id(&self, name: &str, session_id: SessionId) {
        self.inner
            .lock()
            .update(name, |g| g.session_id = session_id);
    }

    pub fn update_status(&self, name: &str, status: GroupStatus) {
        self.inner.lock().update(name, |g| g.status = status);
    }

    pub fn update_session_port(&self, name: &str, port: SessionPort) {
        self.inner.lock().update(name, |g| g.session_port = port);
    }

    pub fn update_legacy(&self, name: &str, is_legacy: bool) {
        self.inner.lock().update(name, |g| g.is_legacy = is_legacy);
    }

    pub fn update_advertised_name(&self, name: &str, advertised: Option<String>) {
        self.inner
            .lock()
            .update(name, |g| g.advertised_name = advertised);
    }

    /// Compare-and-set on the status. When `session_id` is given it is bound
    /// in the same step. Returns whether the transition applied.
    pub fn transition(
        &self,
        name: &str,
        from: GroupStatus,
        to: GroupStatus,
        session_id: Option<SessionId>,
    ) -> bool {
        let mut state = self.inner.lock();
        if state.groups.get(name).map(|g| g.status) != Some(from) {
            return false;
        }
        state
            .update(name, |g| {
                g.status = to;
                if let Some(id) = session_id {
                    g.session_id = id;
                }
                if !to.has_session() {
                    g.members.clear();
                }
            })
            .is_some()
    }

    /// Refresh a `Found` entry from a repeated advertisement. Returns whether
    /// anything changed.
    pub fn refresh_found(
        &self,
        name: &str,
        port: SessionPort,
        advertised: &str,
        is_legacy: bool,
    ) -> bool {
        let mut state = self.inner.lock();
        let Some(current) = state.groups.get(name) else {
            return false;
        };
        if current.status != GroupStatus::Found {
            return false;
        }
        if current.session_port == port
            && current.advertised_name.as_deref() == Some(advertised)
            && current.is_legacy == is_legacy
        {
            return false;
        }
        state
            .update(name, |g| {
                g.session_port = port;
                g.advertised_name = Some(advertised.to_string());
                g.is_legacy = is_legacy;
            })
            .is_some()
    }

    // ── Membership ───────────────────────────────────────────────────────

    /// Returns whether the member set changed. Ignored unless the group is
    /// hosted or joined.
    pub fn add_member(&self, name: &str, peer: PeerId) -> bool {
        let mut state = self.inner.lock();
        match state.groups.get_mut(name) {
            Some(g) if g.status.has_session() => g.add_member(peer),
            _ => false,
        }
    }

    pub fn remove_member(&self, name: &str, peer: &PeerId) -> bool {
        let mut state = self.inner.lock();
        match state.groups.get_mut(name) {
            Some(g) if g.status.has_session() => g.remove_member(peer),
            _ => false,
        }
    }

    pub fn clear_members(&self, name: &str) {
        if let Some(g) = self.inner.lock().groups.get_mut(name) {
            g.members.clear();
        }
    }

    pub fn member_ids(&self, name: &str) -> Vec<PeerId> {
        self.read(name, |g| g.members.clone()).unwrap_or_default()
    }

    pub fn member_count(&self, name: &str) -> usize {
        self.read(name, |g| g.members.len()).unwrap_or(0)
    }

    pub fn allow_member(&self, name: &str, peer: PeerId) -> bool {
        match self.inner.lock().groups.get_mut(name) {
            Some(g) => g.allowed_members.insert(peer),
            None => false,
        }
    }

    pub fn disallow_member(&self, name: &str, peer: &PeerId) -> bool {
        match self.inner.lock().groups.get_mut(name) {
            Some(g) => g.allowed_members.remove(peer),
            None => false,
        }
    }

    pub fn set_allowed_members(&self, name: &str, peers: BTreeSet<PeerId>) {
        if let Some(g) = self.inner.lock().groups.get_mut(name) {
            g.allowed_members = peers;
        }
    }

    pub fn allowed_members(&self, name: &str) -> BTreeSet<PeerId> {
        self.read(name, |g| g.allowed_members.clone())
            .unwrap_or_default()
    }

    // ── Listings ─────────────────────────────────────────────────────────

    /// Names whose status satisfies `predicate`, sorted.
    pub fn list_by_status(&self, predicate: impl Fn(GroupStatus) -> bool) -> Vec<String> {
        self.inner
            .lock()
            .groups
            .values()
            .filter(|g| predicate(g.status))
            .map(|g| g.name.clone())
            .collect()
    }

    pub fn list_found(&self) -> Vec<String> {
        self.list_by_status(|s| s == GroupStatus::Found)
    }

    pub fn list_hosted(&self) -> Vec<String> {
        self.list_by_status(GroupStatus::is_hosted)
    }

    pub fn list_joined(&self) -> Vec<String> {
        self.list_by_status(GroupStatus::is_joined)
    }

    /// Hosted groups that are locked.
    pub fn list_locked(&self) -> Vec<String> {
        self.list_by_status(|s| s == GroupStatus::HostedLocked)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
