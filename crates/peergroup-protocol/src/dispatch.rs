/// Fan-out of group lifecycle notifications.
///
/// The observer list is snapshotted under its lock and delivery happens
/// after the lock is released, so observers may register or unregister
/// from inside `on_event`; such changes take effect on the next dispatch.
use std::sync::Arc;

use parking_lot::Mutex;
use peergroup_transport::{PeerId, TransportMask};
use serde::Serialize;
use tokio::sync::mpsc;

/// Lifecycle notification delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GroupEvent {
    FoundAdvertisedName {
        group: String,
        transport: TransportMask,
    },
    LostAdvertisedName {
        group: String,
        transport: TransportMask,
    },
    /// The session behind a hosted or joined group went away.
    GroupLost { group: String },
    PeerAdded {
        peer: PeerId,
        group: String,
        num_peers: usize,
    },
    PeerRemoved {
        peer: PeerId,
        group: String,
        num_peers: usize,
    },
}

impl GroupEvent {
    pub fn group(&self) -> &str {
        match self {
            GroupEvent::FoundAdvertisedName { group, .. }
            | GroupEvent::LostAdvertisedName { group, .. }
            | GroupEvent::GroupLost { group }
            | GroupEvent::PeerAdded { group, .. }
            | GroupEvent::PeerRemoved { group, .. } => group,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GroupEvent::FoundAdvertisedName { .. } => "found_advertised_name",
            GroupEvent::LostAdvertisedName { .. } => "lost_advertised_name",
            GroupEvent::GroupLost { .. } => "group_lost",
            GroupEvent::PeerAdded { .. } => "peer_added",
            GroupEvent::PeerRemoved { .. } => "peer_removed",
        }
    }
}

/// Receives [`GroupEvent`]s. Called synchronously from the dispatching
/// context; implementations should not block.
pub trait GroupObserver: Send + Sync {
    fn on_event(&self, event: &GroupEvent);

    /// A closed observer is dropped from the list on the next dispatch.
    fn is_closed(&self) -> bool {
        false
    }
}

impl<F> GroupObserver for F
where
    F: Fn(&GroupEvent) + Send + Sync,
{
    fn on_event(&self, event: &GroupEvent) {
        self(event)
    }
}

/// Observer that forwards every event into an unbounded channel.
///
/// Delivery never blocks the dispatcher and never drops an event; the
/// observer is pruned once its receiver is gone.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<GroupEvent>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::UnboundedSender<GroupEvent>) -> Self {
        Self { tx }
    }
}

impl GroupObserver for ChannelObserver {
    fn on_event(&self, event: &GroupEvent) {
        if self.tx.send(event.clone()).is_err() {
            tracing::debug!(kind = event.kind(), "subscriber gone");
        }
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Default)]
pub struct EventDispatcher {
    observers: Mutex<Vec<Arc<dyn GroupObserver>>>,
}

fn same_observer(a: &Arc<dyn GroupObserver>, b: &Arc<dyn GroupObserver>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer. Registering the same `Arc` twice is a no-op.
    pub fn register(&self, observer: Arc<dyn GroupObserver>) {
        let mut observers = self.observers.lock();
        if !observers.iter().any(|o| same_observer(o, &observer)) {
            observers.push(observer);
        }
    }

    pub fn unregister(&self, observer: &Arc<dyn GroupObserver>) {
        self.observers
            .lock()
            .retain(|o| !same_observer(o, observer));
    }

    /// Register a channel observer and hand back its receiving end.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<GroupEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(Arc::new(ChannelObserver::new(tx)));
        rx
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn clear(&self) {
        self.observers.lock().clear();
    }

    /// Deliver `event` once to every registered observer.
    pub fn dispatch(&self, event: GroupEvent) {
        let snapshot: Vec<Arc<dyn GroupObserver>> = {
            let mut observers = self.observers.lock();
            observers.retain(|o| !o.is_closed());
            observers.clone()
        };
        tracing::debug!(
            kind = event.kind(),
            group = event.group(),
            observers = snapshot.len(),
            "dispatching group event"
        );
        for observer in snapshot {
            observer.on_event(&event);
        }
    }
}
