//! In-process discovery/session bus.
//!
//! Every [`LoopbackTransport`] attached to the same [`LoopbackBus`] shares one
//! name table and one session table. Notifications are pushed onto each
//! attachment's unbounded event channel while the bus lock is held, so they
//! are observed in the order the bus applied them.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{
    LoopbackConfig, PeerId, SessionAcceptor, SessionId, SessionPort, Transport, TransportError,
    TransportEvent,
};

/// Shared bus. Cheap to clone.
#[derive(Clone)]
pub struct LoopbackBus {
    shared: Arc<BusShared>,
}

struct BusShared {
    config: LoopbackConfig,
    state: Mutex<BusState>,
    attach_counter: AtomicU64,
}

#[derive(Default)]
struct BusState {
    attachments: HashMap<PeerId, Attachment>,
    /// Advertised name → owner.
    advertisements: BTreeMap<String, PeerId>,
    ports: HashMap<(PeerId, SessionPort), Arc<dyn SessionAcceptor>>,
    sessions: BTreeMap<SessionId, Session>,
    last_session_id: u32,
}

struct Attachment {
    events: mpsc::UnboundedSender<TransportEvent>,
    find_prefixes: BTreeSet<String>,
}

impl Attachment {
    fn watches(&self, name: &str) -> bool {
        self.find_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }
}

struct Session {
    host: PeerId,
    port: SessionPort,
    /// Host first, then joiners in arrival order.
    members: Vec<PeerId>,
}

impl LoopbackBus {
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            shared: Arc::new(BusShared {
                config,
                state: Mutex::new(BusState::default()),
                attach_counter: AtomicU64::new(0),
            }),
        }
    }

    /// Attach a new peer. `name` is a human hint; the returned transport's
    /// peer id is made unique by the bus.
    pub fn attach(
        &self,
        name: &str,
    ) -> (LoopbackTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let n = self.shared.attach_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let peer = PeerId::new(format!(":{name}.{n}"));
        let guid = uuid::Uuid::new_v4().simple().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        self.shared.state.lock().attachments.insert(
            peer.clone(),
            Attachment {
                events: tx,
                find_prefixes: BTreeSet::new(),
            },
        );
        tracing::debug!(%peer, "loopback: attached");

        let transport = LoopbackTransport {
            shared: self.shared.clone(),
            peer,
            guid,
        };
        (transport, rx)
    }

    /// Number of live attachments.
    pub fn attachment_count(&self) -> usize {
        self.shared.state.lock().attachments.len()
    }

    /// Names currently advertised on the bus.
    pub fn advertised_names(&self) -> Vec<String> {
        self.shared.state.lock().advertisements.keys().cloned().collect()
    }

    /// Members of a live session, host first.
    pub fn session_members(&self, session_id: SessionId) -> Vec<PeerId> {
        self.shared
            .state
            .lock()
            .sessions
            .get(&session_id)
            .map(|s| s.members.clone())
            .unwrap_or_default()
    }
}

/// One peer's attachment to a [`LoopbackBus`]. Detaches on drop.
pub struct LoopbackTransport {
    shared: Arc<BusShared>,
    peer: PeerId,
    guid: String,
}

impl LoopbackTransport {
    /// Leave the bus: withdraw advertisements, unbind ports, leave sessions.
    pub fn detach(&self) {
        let mut state = self.shared.state.lock();
        if state.attachments.remove(&self.peer).is_none() {
            return;
        }

        let owned: Vec<String> = state
            .advertisements
            .iter()
            .filter(|(_, owner)| **owner == self.peer)
            .map(|(name, _)| name.clone())
            .collect();
        for name in owned {
            withdraw_advertisement(&mut state, &name, &self.shared.config);
        }

        let ports: Vec<SessionPort> = state
            .ports
            .keys()
            .filter(|(owner, _)| *owner == self.peer)
            .map(|(_, port)| *port)
            .collect();
        for port in ports {
            release_port(&mut state, &self.peer, port);
        }

        let joined: Vec<SessionId> = state
            .sessions
            .iter()
            .filter(|(_, s)| s.members.contains(&self.peer))
            .map(|(id, _)| *id)
            .collect();
        for session_id in joined {
            depart_session(&mut state, session_id, &self.peer);
        }
        tracing::debug!(peer = %self.peer, "loopback: detached");
    }

    fn ensure_attached(&self, state: &BusState) -> Result<(), TransportError> {
        if state.attachments.contains_key(&self.peer) {
            Ok(())
        } else {
            Err(TransportError::Detached)
        }
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.detach();
    }
}

// ── Bus-state helpers (caller holds the lock) ───────────────────────────

fn notify(state: &BusState, peer: &PeerId, event: TransportEvent) {
    if let Some(attachment) = state.attachments.get(peer) {
        // Receiver dropped means the peer stopped listening; nothing to do.
        let _ = attachment.events.send(event);
    }
}

fn withdraw_advertisement(state: &mut BusState, name: &str, config: &LoopbackConfig) {
    let Some(owner) = state.advertisements.remove(name) else {
        return;
    };
    for (peer, attachment) in &state.attachments {
        if *peer != owner && attachment.watches(name) {
            let _ = attachment.events.send(TransportEvent::AdvertisementLost {
                name: name.to_string(),
                transport: config.transport_mask,
            });
        }
    }
}

/// Unbind `port` and end every session hosted on it.
fn release_port(state: &mut BusState, host: &PeerId, port: SessionPort) -> bool {
    if state.ports.remove(&(host.clone(), port)).is_none() {
        return false;
    }
    let hosted: Vec<SessionId> = state
        .sessions
        .iter()
        .filter(|(_, s)| s.host == *host && s.port == port)
        .map(|(id, _)| *id)
        .collect();
    for session_id in hosted {
        if let Some(session) = state.sessions.remove(&session_id) {
            for member in session.members.iter().filter(|m| *m != host) {
                notify(state, member, TransportEvent::SessionLost { session_id });
            }
        }
    }
    true
}

/// Remove `peer` from a session. A departing host ends the session.
fn depart_session(state: &mut BusState, session_id: SessionId, peer: &PeerId) {
    let Some(session) = state.sessions.get_mut(&session_id) else {
        return;
    };
    if session.host == *peer {
        if let Some(session) = state.sessions.remove(&session_id) {
            for member in session.members.iter().filter(|m| *m != peer) {
                notify(state, member, TransportEvent::SessionLost { session_id });
            }
        }
        return;
    }

    session.members.retain(|m| m != peer);
    let remaining = session.members.clone();
    for member in &remaining {
        notify(
            state,
            member,
            TransportEvent::MemberLeft {
                session_id,
                peer: peer.clone(),
            },
        );
    }
}

#[async_trait::async_trait]
impl Transport for LoopbackTransport {
    fn local_peer_id(&self) -> PeerId {
        self.peer.clone()
    }

    fn guid(&self) -> String {
        self.guid.clone()
    }

    async fn find_advertised_name(&self, prefix: &str) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        self.ensure_attached(&state)?;

        let already = state
            .attachments
            .get(&self.peer)
            .map(|a| a.watches(prefix))
            .unwrap_or(false);
        if let Some(attachment) = state.attachments.get_mut(&self.peer) {
            attachment.find_prefixes.insert(prefix.to_string());
        }
        if already {
            return Ok(());
        }

        // Replay what is already on the air.
        let visible: Vec<String> = state
            .advertisements
            .iter()
            .filter(|(name, owner)| **owner != self.peer && name.starts_with(prefix))
            .map(|(name, _)| name.clone())
            .collect();
        for name in visible {
            notify(
                &state,
                &self.peer,
                TransportEvent::AdvertisementFound {
                    name,
                    transport: self.shared.config.transport_mask,
                },
            );
        }
        Ok(())
    }

    async fn cancel_find_advertised_name(&self, prefix: &str) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        self.ensure_attached(&state)?;
        if let Some(attachment) = state.attachments.get_mut(&self.peer) {
            attachment.find_prefixes.remove(prefix);
        }
        Ok(())
    }

    async fn advertise(&self, name: &str) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        self.ensure_attached(&state)?;

        match state.advertisements.get(name) {
            Some(owner) if *owner == self.peer => return Ok(()),
            Some(_) => return Err(TransportError::NameTaken(name.to_string())),
            None => {}
        }
        state
            .advertisements
            .insert(name.to_string(), self.peer.clone());

        for (peer, attachment) in &state.attachments {
            if *peer != self.peer && attachment.watches(name) {
                let _ = attachment.events.send(TransportEvent::AdvertisementFound {
                    name: name.to_string(),
                    transport: self.shared.config.transport_mask,
                });
            }
        }
        tracing::debug!(peer = %self.peer, name, "loopback: advertising");
        Ok(())
    }

    async fn stop_advertise(&self, name: &str) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        self.ensure_attached(&state)?;

        if state.advertisements.get(name) != Some(&self.peer) {
            return Err(TransportError::NameNotFound(name.to_string()));
        }
        withdraw_advertisement(&mut state, name, &self.shared.config);
        tracing::debug!(peer = %self.peer, name, "loopback: stopped advertising");
        Ok(())
    }

    async fn bind_session_port(
        &self,
        port: SessionPort,
        acceptor: Arc<dyn SessionAcceptor>,
    ) -> Result<SessionPort, TransportError> {
        let mut state = self.shared.state.lock();
        self.ensure_attached(&state)?;

        let bound = if port == SessionPort::ANY {
            self.shared
                .config
                .port_range
                .clone()
                .filter(|p| *p != 0)
                .map(SessionPort)
                .find(|p| !state.ports.contains_key(&(self.peer.clone(), *p)))
                .ok_or(TransportError::PortsExhausted)?
        } else if state.ports.contains_key(&(self.peer.clone(), port)) {
            return Err(TransportError::PortInUse(port));
        } else {
            port
        };

        state.ports.insert((self.peer.clone(), bound), acceptor);
        Ok(bound)
    }

    async fn unbind_session_port(&self, port: SessionPort) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        self.ensure_attached(&state)?;
        if release_port(&mut state, &self.peer, port) {
            Ok(())
        } else {
            Err(TransportError::PortNotBound(port))
        }
    }

    async fn join_session(
        &self,
        name: &str,
        port: SessionPort,
    ) -> Result<SessionId, TransportError> {
        let mut state = self.shared.state.lock();
        self.ensure_attached(&state)?;

        let host = state
            .advertisements
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError::NameNotFound(name.to_string()))?;
        if host == self.peer {
            return Err(TransportError::Other(format!(
                "cannot join own session {name}"
            )));
        }
        let acceptor = state
            .ports
            .get(&(host.clone(), port))
            .cloned()
            .ok_or(TransportError::PortNotBound(port))?;
        if !acceptor.accept_session_joiner(port, &self.peer) {
            return Err(TransportError::JoinRejected {
                name: name.to_string(),
                port,
            });
        }

        let existing = state
            .sessions
            .iter()
            .find(|(_, s)| s.host == host && s.port == port)
            .map(|(id, _)| *id);

        match existing {
            Some(session_id) => {
                let members = state
                    .sessions
                    .get(&session_id)
                    .map(|s| s.members.clone())
                    .unwrap_or_default();
                if members.contains(&self.peer) {
                    return Err(TransportError::Other(format!(
                        "already a member of session {session_id}"
                    )));
                }
                for member in &members {
                    notify(
                        &state,
                        member,
                        TransportEvent::MemberJoined {
                            session_id,
                            peer: self.peer.clone(),
                        },
                    );
                    notify(
                        &state,
                        &self.peer,
                        TransportEvent::MemberJoined {
                            session_id,
                            peer: member.clone(),
                        },
                    );
                }
                if let Some(session) = state.sessions.get_mut(&session_id) {
                    session.members.push(self.peer.clone());
                }
                Ok(session_id)
            }
            None => {
                state.last_session_id = state.last_session_id.wrapping_add(1).max(1);
                let session_id = SessionId(state.last_session_id);
                state.sessions.insert(
                    session_id,
                    Session {
                        host: host.clone(),
                        port,
                        members: vec![host.clone(), self.peer.clone()],
                    },
                );
                notify(
                    &state,
                    &host,
                    TransportEvent::SessionJoined {
                        port,
                        session_id,
                        joiner: self.peer.clone(),
                    },
                );
                notify(
                    &state,
                    &self.peer,
                    TransportEvent::MemberJoined {
                        session_id,
                        peer: host,
                    },
                );
                Ok(session_id)
            }
        }
    }

    async fn leave_session(&self, session_id: SessionId) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        self.ensure_attached(&state)?;

        let is_member = state
            .sessions
            .get(&session_id)
            .map(|s| s.members.contains(&self.peer))
            .unwrap_or(false);
        if !is_member {
            return Err(TransportError::UnknownSession(session_id));
        }
        depart_session(&mut state, session_id, &self.peer);
        Ok(())
    }

    async fn name_owner(&self, name: &str) -> Result<Option<PeerId>, TransportError> {
        let state = self.shared.state.lock();
        self.ensure_attached(&state)?;
        Ok(state.advertisements.get(name).cloned())
    }
}
