/// Legacy interop scenario: a peer advertising without the port suffix is
/// joinable only by peers configured with the legacy session port.
use std::sync::Arc;

use peergroup_protocol::{GroupEvent, PeerGroupConfig};
use peergroup_transport::{
    LoopbackBus, LoopbackConfig, PeerId, SessionAcceptor, SessionPort, Transport,
};

use crate::events::{emit, EventIntent};
use crate::scenario::{ScenarioRun, ScenarioSummary, SimPeer};

/// Stand-in for an old host: admits everyone.
struct OpenDoor;

impl SessionAcceptor for OpenDoor {
    fn accept_session_joiner(&self, _port: SessionPort, _joiner: &PeerId) -> bool {
        true
    }
}

pub async fn run(
    config: PeerGroupConfig,
    port: SessionPort,
    group: &str,
) -> anyhow::Result<ScenarioSummary> {
    let mut scenario = ScenarioRun::new("legacy-interop", group, 3);
    let start = scenario.epoch();
    let bus = LoopbackBus::new(LoopbackConfig::new());

    let legacy_name = format!("{}.{group}", config.prefix_str());
    let (legacy, _legacy_events) = bus.attach("legacy");
    legacy.bind_session_port(port, Arc::new(OpenDoor)).await?;
    legacy.advertise(&legacy_name).await?;

    let mut aware = SimPeer::spawn(
        &bus,
        "aware",
        config.clone().legacy_session_port(port),
        start,
    )
    .await?;
    let mut unaware = SimPeer::spawn(&bus, "unaware", config.clone(), start).await?;

    scenario.step("hinted peer finds legacy group", async {
        aware.found(group).await?;
        if !aware.handle.is_legacy_group(group) {
            return Err("group not flagged legacy".into());
        }
        Ok(format!("port {}", aware.handle.session_port_of_group(group)))
    })
    .await;

    scenario.step("hinted peer joins", async {
        let outcome = aware.handle.join_group(group).await;
        emit(&EventIntent::new(&aware.name, "join_group", group, &outcome));
        outcome.map_err(|e| e.to_string())?;
        let host = legacy.local_peer_id();
        aware
            .next_matching(|e| matches!(e, GroupEvent::PeerAdded { peer, .. } if *peer == host))
            .await?;
        Ok(String::new())
    })
    .await;

    scenario.step("unhinted peer ignores legacy group", async {
        // Anything advertised later arrives after the legacy name would have.
        let marker = SimPeer::spawn(&bus, "marker", config.clone(), start)
            .await
            .map_err(|e| e.to_string())?;
        let marker_group = format!("{group}-marker");
        marker
            .handle
            .create_group(&marker_group, false)
            .await
            .map_err(|e| e.to_string())?;
        unaware.found(&marker_group).await?;
        marker.handle.shutdown().await;
        if unaware.handle.does_group_exist(group) {
            return Err("legacy group registered without a port hint".into());
        }
        Ok(String::new())
    })
    .await;

    aware.drain();
    aware.emit_state();
    unaware.emit_state();
    aware.handle.shutdown().await;
    unaware.handle.shutdown().await;

    Ok(scenario.finish())
}
