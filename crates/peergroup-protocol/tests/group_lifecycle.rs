//! Integration tests: several peers running full runtimes on one loopback bus.

use std::sync::Arc;
use std::time::Duration;

use peergroup_protocol::{
    GroupCoordinator, GroupEvent, GroupStatus, JoinOrCreateBranch, PeerGroupConfig, PeerGroupError,
    PeerGroupRuntime, RuntimeHandle,
};
use peergroup_transport::{
    LoopbackBus, LoopbackConfig, PeerId, SessionAcceptor, SessionPort, Transport, TransportError,
};
use tokio::sync::mpsc;

const PREFIX: &str = "org.test";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .try_init();
}

type Peer = (RuntimeHandle, mpsc::UnboundedReceiver<GroupEvent>);

async fn peer(bus: &LoopbackBus, name: &str) -> Peer {
    peer_with(bus, name, PeerGroupConfig::new().prefix(PREFIX)).await
}

/// Subscribe before discovery starts so replayed advertisements are seen.
async fn peer_with(bus: &LoopbackBus, name: &str, config: PeerGroupConfig) -> Peer {
    let (transport, events) = bus.attach(name);
    let coordinator = Arc::new(GroupCoordinator::new(config, Arc::new(transport)));
    let rx = coordinator.dispatcher().subscribe();
    coordinator.start().await.expect("coordinator start");
    (PeerGroupRuntime::spawn(coordinator, events), rx)
}

/// Read events until one matches, returning it together with everything
/// skipped on the way.
async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<GroupEvent>,
    pred: impl Fn(&GroupEvent) -> bool,
) -> (GroupEvent, Vec<GroupEvent>) {
    tokio::time::timeout(Duration::from_secs(5), async {
        let mut skipped = Vec::new();
        loop {
            match rx.recv().await {
                Some(event) if pred(&event) => return (event, skipped),
                Some(event) => skipped.push(event),
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for group event")
}

async fn wait_found(rx: &mut mpsc::UnboundedReceiver<GroupEvent>, group: &str) -> Vec<GroupEvent> {
    let (_, skipped) = wait_for(rx, |e| {
        matches!(e, GroupEvent::FoundAdvertisedName { group: g, .. } if g == group)
    })
    .await;
    skipped
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition never held: {what}");
}

fn peer_added(peer: &PeerId, group: &str, num_peers: usize) -> GroupEvent {
    GroupEvent::PeerAdded {
        peer: peer.clone(),
        group: group.into(),
        num_peers,
    }
}

#[tokio::test]
async fn host_and_joiners_track_membership() {
    init_tracing();
    let bus = LoopbackBus::new(LoopbackConfig::new());
    let (alice, mut alice_ev) = peer(&bus, "alice").await;
    let (bob, mut bob_ev) = peer(&bus, "bob").await;

    alice.create_group("alpha", false).await.unwrap();
    assert_eq!(alice.list_hosted_group_names(), vec!["alpha"]);
    wait_found(&mut bob_ev, "alpha").await;
    assert_eq!(bob.status_of_group("alpha"), GroupStatus::Found);
    assert_eq!(
        bob.session_port_of_group("alpha"),
        alice.session_port_of_group("alpha")
    );

    bob.join_group("alpha").await.unwrap();
    assert_eq!(bob.status_of_group("alpha"), GroupStatus::JoinedUnlocked);

    let bob_id = bob.my_peer_id().clone();
    let alice_id = alice.my_peer_id().clone();
    let (event, _) = wait_for(&mut alice_ev, |e| e.kind() == "peer_added").await;
    assert_eq!(event, peer_added(&bob_id, "alpha", 1));
    let (event, _) = wait_for(&mut bob_ev, |e| e.kind() == "peer_added").await;
    assert_eq!(event, peer_added(&alice_id, "alpha", 1));

    // Hosted and joined sides agree on the session.
    assert_eq!(
        bob.session_id_of_group("alpha"),
        alice.session_id_of_group("alpha")
    );

    let (carol, mut carol_ev) = peer(&bus, "carol").await;
    let carol_id = carol.my_peer_id().clone();
    wait_found(&mut carol_ev, "alpha").await;
    carol.join_group("alpha").await.unwrap();

    let (event, _) = wait_for(&mut alice_ev, |e| e.kind() == "peer_added").await;
    assert_eq!(event, peer_added(&carol_id, "alpha", 2));
    let (event, _) = wait_for(&mut bob_ev, |e| e.kind() == "peer_added").await;
    assert_eq!(event, peer_added(&carol_id, "alpha", 2));
    eventually("carol sees host and bob", || {
        carol.number_of_peers_in_group("alpha") == 2
    })
    .await;

    bob.leave_group("alpha").await.unwrap();
    assert!(!bob.does_group_exist("alpha"));

    let (event, _) = wait_for(&mut alice_ev, |e| e.kind() == "peer_removed").await;
    assert_eq!(
        event,
        GroupEvent::PeerRemoved {
            peer: bob_id.clone(),
            group: "alpha".into(),
            num_peers: 1,
        }
    );
    assert_eq!(alice.peer_ids_in_group("alpha"), vec![carol_id]);
}

#[tokio::test]
async fn locked_groups_stay_invisible() {
    init_tracing();
    let bus = LoopbackBus::new(LoopbackConfig::new());
    let (alice, _alice_ev) = peer(&bus, "alice").await;
    alice.create_group("hidden", true).await.unwrap();
    assert_eq!(alice.list_locked_group_names(), vec!["hidden"]);

    let (bob, mut bob_ev) = peer(&bus, "bob").await;

    // Events arrive in bus order, so a visible "hidden" would show up
    // before the marker.
    alice.create_group("marker", false).await.unwrap();
    let skipped = wait_found(&mut bob_ev, "marker").await;
    assert!(skipped.iter().all(|e| e.group() != "hidden"));
    assert!(!bob.does_group_exist("hidden"));

    alice.unlock_group("hidden").await.unwrap();
    wait_found(&mut bob_ev, "hidden").await;

    alice.lock_group("hidden").await.unwrap();
    let (event, _) = wait_for(&mut bob_ev, |e| e.kind() == "lost_advertised_name").await;
    assert_eq!(event.group(), "hidden");
    assert_eq!(bob.list_found_group_names(), vec!["marker"]);
}

#[tokio::test]
async fn joined_group_follows_host_lock() {
    init_tracing();
    let bus = LoopbackBus::new(LoopbackConfig::new());
    let (alice, _alice_ev) = peer(&bus, "alice").await;
    let (bob, mut bob_ev) = peer(&bus, "bob").await;

    alice.create_group("alpha", false).await.unwrap();
    wait_found(&mut bob_ev, "alpha").await;
    bob.join_group("alpha").await.unwrap();

    alice.lock_group("alpha").await.unwrap();
    eventually("bob sees the lock", || {
        bob.status_of_group("alpha") == GroupStatus::JoinedLocked
    })
    .await;

    alice.unlock_group("alpha").await.unwrap();
    eventually("bob sees the unlock", || {
        bob.status_of_group("alpha") == GroupStatus::JoinedUnlocked
    })
    .await;
}

#[tokio::test]
async fn private_group_admits_listed_peers_only() {
    init_tracing();
    let bus = LoopbackBus::new(LoopbackConfig::new());
    let (alice, _alice_ev) = peer(&bus, "alice").await;
    let (bob, mut bob_ev) = peer(&bus, "bob").await;
    let (carol, mut carol_ev) = peer(&bus, "carol").await;

    alice.create_group("club", false).await.unwrap();
    alice
        .set_allowed_members("club", [carol.my_peer_id().clone()])
        .unwrap();

    wait_found(&mut bob_ev, "club").await;
    let err = bob.join_group("club").await.unwrap_err();
    assert!(matches!(
        err,
        PeerGroupError::Transport(TransportError::JoinRejected { .. })
    ));
    assert_eq!(bob.status_of_group("club"), GroupStatus::Found);

    wait_found(&mut carol_ev, "club").await;
    carol.join_group("club").await.unwrap();
    assert_eq!(carol.status_of_group("club"), GroupStatus::JoinedUnlocked);
}

#[tokio::test]
async fn destroying_a_group_notifies_members() {
    init_tracing();
    let bus = LoopbackBus::new(LoopbackConfig::new());
    let (alice, _alice_ev) = peer(&bus, "alice").await;
    let (bob, mut bob_ev) = peer(&bus, "bob").await;

    alice.create_group("alpha", false).await.unwrap();
    wait_found(&mut bob_ev, "alpha").await;
    bob.join_group("alpha").await.unwrap();

    alice.destroy_group("alpha").await.unwrap();
    assert!(!alice.does_group_exist("alpha"));

    let (event, _) = wait_for(&mut bob_ev, |e| e.kind() == "group_lost").await;
    assert_eq!(
        event,
        GroupEvent::GroupLost {
            group: "alpha".into()
        }
    );
    assert!(!bob.does_group_exist("alpha"));
}

#[tokio::test]
async fn legacy_groups_need_a_port_hint() {
    init_tracing();
    let bus = LoopbackBus::new(LoopbackConfig::new());

    struct AcceptAll;
    impl SessionAcceptor for AcceptAll {
        fn accept_session_joiner(&self, _port: SessionPort, _joiner: &PeerId) -> bool {
            true
        }
    }

    // A peer speaking the old naming scheme: fixed port, no port suffix.
    let (legacy, _legacy_events) = bus.attach("legacy");
    legacy
        .bind_session_port(SessionPort(27), Arc::new(AcceptAll))
        .await
        .unwrap();
    legacy.advertise("org.test.oldgame").await.unwrap();

    let (bob, mut bob_ev) = peer_with(
        &bus,
        "bob",
        PeerGroupConfig::new()
            .prefix(PREFIX)
            .legacy_session_port(SessionPort(27)),
    )
    .await;
    let (carol, mut carol_ev) = peer(&bus, "carol").await;

    wait_found(&mut bob_ev, "oldgame").await;
    assert!(bob.is_legacy_group("oldgame"));
    assert_eq!(bob.session_port_of_group("oldgame"), SessionPort(27));

    bob.join_group("oldgame").await.unwrap();
    let (event, _) = wait_for(&mut bob_ev, |e| e.kind() == "peer_added").await;
    assert_eq!(event, peer_added(&legacy.local_peer_id(), "oldgame", 1));

    // Without the hint the advertisement is dropped.
    let (alice, _alice_ev) = peer(&bus, "alice").await;
    alice.create_group("marker", false).await.unwrap();
    let skipped = wait_found(&mut carol_ev, "marker").await;
    assert!(skipped.is_empty());
    assert!(!carol.does_group_exist("oldgame"));
}

#[tokio::test]
async fn join_or_create_picks_the_right_branch() {
    init_tracing();
    let bus = LoopbackBus::new(LoopbackConfig::new());
    let (alice, _alice_ev) = peer(&bus, "alice").await;
    let (bob, mut bob_ev) = peer(&bus, "bob").await;

    let created = alice.join_or_create_group("room").await;
    assert_eq!(created.branch, JoinOrCreateBranch::Created);
    assert_eq!(created.result, Ok(()));

    wait_found(&mut bob_ev, "room").await;
    let joined = bob.join_or_create_group("room").await;
    assert_eq!(joined.branch, JoinOrCreateBranch::Joined);
    assert_eq!(joined.result, Ok(()));
    assert_eq!(
        bob.host_peer_id_of_group("room").await,
        Some(alice.my_peer_id().clone())
    );
    assert_eq!(
        alice.host_peer_id_of_group("room").await,
        Some(alice.my_peer_id().clone())
    );
}

#[tokio::test]
async fn renaming_moves_the_advertisement() {
    init_tracing();
    let bus = LoopbackBus::new(LoopbackConfig::new());
    let (alice, _alice_ev) = peer(&bus, "alice").await;
    let (bob, mut bob_ev) = peer(&bus, "bob").await;

    alice.create_group("alpha", false).await.unwrap();
    wait_found(&mut bob_ev, "alpha").await;

    alice.rename_hosted_group("alpha", "omega").await.unwrap();
    assert_eq!(alice.list_hosted_group_names(), vec!["omega"]);

    wait_found(&mut bob_ev, "omega").await;
    let (event, _) = wait_for(&mut bob_ev, |e| e.kind() == "lost_advertised_name").await;
    assert_eq!(event.group(), "alpha");
    assert_eq!(bob.list_found_group_names(), vec!["omega"]);
}

#[tokio::test]
async fn shutdown_releases_everything() {
    init_tracing();
    let bus = LoopbackBus::new(LoopbackConfig::new());
    let (alice, _alice_ev) = peer(&bus, "alice").await;
    let (bob, mut bob_ev) = peer(&bus, "bob").await;

    alice.create_group("alpha", false).await.unwrap();
    wait_found(&mut bob_ev, "alpha").await;
    bob.join_group("alpha").await.unwrap();

    alice.shutdown().await;
    let (event, _) = wait_for(&mut bob_ev, |e| e.kind() == "group_lost").await;
    assert_eq!(event.group(), "alpha");
    assert!(bus.advertised_names().is_empty());
    assert_eq!(
        alice.create_group("again", false).await,
        Err(PeerGroupError::Shutdown)
    );
}
