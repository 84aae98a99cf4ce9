/// The runtime event loop.
///
/// Multiplexes application commands and transport events over one
/// coordinator, strictly one item at a time.
use std::ops::ControlFlow;
use std::sync::Arc;

use peergroup_transport::TransportEvent;
use tokio::sync::mpsc;

use crate::group::GroupCoordinator;

use super::RuntimeCommand;

pub(super) async fn runtime_loop(
    coordinator: Arc<GroupCoordinator>,
    mut cmd_rx: mpsc::Receiver<RuntimeCommand>,
    mut events_rx: mpsc::UnboundedReceiver<TransportEvent>,
) {
    let mut commands_open = true;
    let mut events_open = true;

    while commands_open || events_open {
        tokio::select! {
            cmd = cmd_rx.recv(), if commands_open => {
                match cmd {
                    Some(cmd) => {
                        if handle_command(&coordinator, cmd).await.is_break() {
                            break;
                        }
                    }
                    None => commands_open = false,
                }
            }
            event = events_rx.recv(), if events_open => {
                match event {
                    Some(event) => {
                        tracing::debug!(kind = event.kind(), "transport event");
                        coordinator.handle_transport_event(event).await;
                    }
                    None => {
                        tracing::debug!("transport event channel closed");
                        events_open = false;
                    }
                }
            }
        }
    }

    tracing::debug!(peer = %coordinator.my_peer_id(), "runtime loop stopped");
}

/// Run one command. Breaks once the coordinator has shut down.
async fn handle_command(coordinator: &GroupCoordinator, cmd: RuntimeCommand) -> ControlFlow<()> {
    tracing::debug!(kind = cmd.kind(), "runtime command");
    // A dropped reply receiver just means the caller stopped waiting.
    match cmd {
        RuntimeCommand::CreateGroup {
            name,
            locked,
            reply,
        } => {
            let _ = reply.send(coordinator.create_group(&name, locked).await);
        }
        RuntimeCommand::DestroyGroup { name, reply } => {
            let _ = reply.send(coordinator.destroy_group(&name).await);
        }
        RuntimeCommand::JoinGroup { name, reply } => {
            let _ = reply.send(coordinator.join_group(&name).await);
        }
        RuntimeCommand::LeaveGroup { name, reply } => {
            let _ = reply.send(coordinator.leave_group(&name).await);
        }
        RuntimeCommand::JoinOrCreate { name, reply } => {
            let _ = reply.send(coordinator.join_or_create_group(&name).await);
        }
        RuntimeCommand::LockGroup { name, reply } => {
            let _ = reply.send(coordinator.lock_group(&name).await);
        }
        RuntimeCommand::UnlockGroup { name, reply } => {
            let _ = reply.send(coordinator.unlock_group(&name).await);
        }
        RuntimeCommand::RenameGroup { old, new, reply } => {
            let _ = reply.send(coordinator.rename_hosted_group(&old, &new).await);
        }
        RuntimeCommand::Shutdown { reply } => {
            coordinator.shutdown().await;
            let _ = reply.send(());
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

#[cfg(test)]
mod tests {
    use crate::group::coordinator::mock::{Call, MockTransport};
    use crate::{GroupEvent, GroupStatus, PeerGroupConfig, PeerGroupError, PeerGroupRuntime};
    use peergroup_transport::{SessionId, SessionPort, TransportEvent, TransportMask};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    async fn runtime() -> (
        crate::RuntimeHandle,
        Arc<MockTransport>,
        mpsc::UnboundedSender<TransportEvent>,
    ) {
        let transport = Arc::new(MockTransport::new("me"));
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = PeerGroupRuntime::start(
            PeerGroupConfig::new().prefix("org.test"),
            transport.clone(),
            rx,
        )
        .await
        .unwrap();
        (handle, transport, tx)
    }

    #[tokio::test]
    async fn commands_and_events_share_one_loop() {
        let (handle, transport, events) = runtime().await;
        let mut group_events = handle.subscribe();

        events
            .send(TransportEvent::AdvertisementFound {
                name: "org.test.beta.12345".into(),
                transport: TransportMask::LOCAL,
            })
            .unwrap();
        assert_eq!(
            group_events.recv().await.map(|e| e.kind()),
            Some("found_advertised_name")
        );

        transport.next_session_id(SessionId(7));
        handle.join_group("beta").await.unwrap();
        events
            .send(TransportEvent::MemberJoined {
                session_id: SessionId(7),
                peer: "p1".into(),
            })
            .unwrap();
        assert_eq!(
            group_events.recv().await,
            Some(GroupEvent::PeerAdded {
                peer: "p1".into(),
                group: "beta".into(),
                num_peers: 1,
            })
        );
        assert_eq!(handle.status_of_group("beta"), GroupStatus::JoinedUnlocked);
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let (handle, transport, _events) = runtime().await;
        handle.create_group("alpha", false).await.unwrap();

        handle.shutdown().await;
        assert!(transport.calls().contains(&Call::Unbind(SessionPort(1000))));
        assert_eq!(
            handle.create_group("beta", false).await,
            Err(PeerGroupError::Shutdown)
        );
        let outcome = handle.join_or_create_group("gamma").await;
        assert_eq!(outcome.result, Err(PeerGroupError::Shutdown));
    }
}
