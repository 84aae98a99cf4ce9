//! Integration tests: several loopback attachments sharing one bus.

use std::sync::Arc;
use std::time::Duration;

use peergroup_transport::{
    LoopbackBus, LoopbackConfig, PeerId, SessionAcceptor, SessionPort, Transport,
    TransportError, TransportEvent,
};
use tokio::sync::mpsc::UnboundedReceiver;

struct AcceptAll;

impl SessionAcceptor for AcceptAll {
    fn accept_session_joiner(&self, _port: SessionPort, _joiner: &PeerId) -> bool {
        true
    }
}

async fn next(rx: &mut UnboundedReceiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event timed out")
        .expect("channel closed")
}

/// Host plus two joiners: every member learns about every other member.
#[tokio::test]
async fn multipoint_session_membership() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .try_init();

    let bus = LoopbackBus::new(LoopbackConfig::new());
    let (host, mut host_rx) = bus.attach("host");
    let (bob, mut bob_rx) = bus.attach("bob");
    let (carol, mut carol_rx) = bus.attach("carol");

    let port = host
        .bind_session_port(SessionPort::ANY, Arc::new(AcceptAll))
        .await
        .unwrap();
    let name = format!("org.test.room.{port}");
    host.advertise(&name).await.unwrap();

    // First joiner creates the session.
    let session_id = bob.join_session(&name, port).await.unwrap();
    assert_eq!(
        next(&mut host_rx).await,
        TransportEvent::SessionJoined {
            port,
            session_id,
            joiner: bob.local_peer_id(),
        }
    );
    assert_eq!(
        next(&mut bob_rx).await,
        TransportEvent::MemberJoined {
            session_id,
            peer: host.local_peer_id(),
        }
    );

    // Second joiner lands in the same session.
    assert_eq!(carol.join_session(&name, port).await.unwrap(), session_id);
    assert_eq!(
        next(&mut host_rx).await,
        TransportEvent::MemberJoined {
            session_id,
            peer: carol.local_peer_id(),
        }
    );
    assert_eq!(
        next(&mut bob_rx).await,
        TransportEvent::MemberJoined {
            session_id,
            peer: carol.local_peer_id(),
        }
    );
    let mut seen = vec![next(&mut carol_rx).await, next(&mut carol_rx).await];
    seen.sort_by_key(|e| format!("{e:?}"));
    let mut expected = vec![
        TransportEvent::MemberJoined {
            session_id,
            peer: host.local_peer_id(),
        },
        TransportEvent::MemberJoined {
            session_id,
            peer: bob.local_peer_id(),
        },
    ];
    expected.sort_by_key(|e| format!("{e:?}"));
    assert_eq!(seen, expected);

    // Bob leaves; the rest hear about it and the session survives.
    bob.leave_session(session_id).await.unwrap();
    assert_eq!(
        next(&mut host_rx).await,
        TransportEvent::MemberLeft {
            session_id,
            peer: bob.local_peer_id(),
        }
    );
    assert_eq!(
        next(&mut carol_rx).await,
        TransportEvent::MemberLeft {
            session_id,
            peer: bob.local_peer_id(),
        }
    );
    assert_eq!(
        bus.session_members(session_id),
        vec![host.local_peer_id(), carol.local_peer_id()]
    );
    assert_eq!(
        bob.leave_session(session_id).await,
        Err(TransportError::UnknownSession(session_id))
    );
}

/// Dropping the host's transport collapses its session for the joiners.
#[tokio::test]
async fn host_drop_loses_session() {
    let bus = LoopbackBus::new(LoopbackConfig::new());
    let (host, _host_rx) = bus.attach("host");
    let (bob, mut bob_rx) = bus.attach("bob");
    bob.find_advertised_name("org.test.").await.unwrap();

    let port = host
        .bind_session_port(SessionPort::ANY, Arc::new(AcceptAll))
        .await
        .unwrap();
    let name = format!("org.test.room.{port}");
    host.advertise(&name).await.unwrap();
    assert_eq!(next(&mut bob_rx).await.kind(), "advertisement_found");

    let session_id = bob.join_session(&name, port).await.unwrap();
    assert_eq!(next(&mut bob_rx).await.kind(), "member_joined");

    drop(host);

    let mut kinds = vec![next(&mut bob_rx).await.kind(), next(&mut bob_rx).await.kind()];
    kinds.sort_unstable();
    assert_eq!(kinds, vec!["advertisement_lost", "session_lost"]);
    assert!(bus.session_members(session_id).is_empty());
    assert_eq!(bus.attachment_count(), 1);
}

#[tokio::test]
async fn name_owner_tracks_advertiser() {
    let bus = LoopbackBus::new(LoopbackConfig::new());
    let (host, _host_rx) = bus.attach("host");
    let (bob, _bob_rx) = bus.attach("bob");

    assert_eq!(bob.name_owner("org.test.x.1").await.unwrap(), None);
    host.advertise("org.test.x.1").await.unwrap();
    assert_eq!(
        bob.name_owner("org.test.x.1").await.unwrap(),
        Some(host.local_peer_id())
    );
}
