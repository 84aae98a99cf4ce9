/// Host lifecycle scenario: one host, several joiners. Exercises discovery,
/// joining, membership fan-out, lock visibility, leaving and destroying.
use peergroup_protocol::{GroupEvent, GroupStatus, PeerGroupConfig};
use peergroup_transport::{LoopbackBus, LoopbackConfig};

use crate::events::{emit, EventIntent};
use crate::scenario::{spawn_peers, wait_until, ScenarioRun, ScenarioSummary, SimPeer};

pub async fn run(
    config: PeerGroupConfig,
    joiner_count: usize,
    group: &str,
) -> anyhow::Result<ScenarioSummary> {
    let mut scenario = ScenarioRun::new("host-lifecycle", group, joiner_count + 1);
    let start = scenario.epoch();
    let bus = LoopbackBus::new(LoopbackConfig::new());

    let mut host = SimPeer::spawn(&bus, "host", config.clone(), start).await?;
    let mut joiners = spawn_peers(&bus, "joiner", joiner_count, &config, start).await?;

    // ── Create ──────────────────────────────────────────────────────
    scenario.step("create group", async {
        let outcome = host.handle.create_group(group, false).await;
        emit(&EventIntent::new(&host.name, "create_group", group, &outcome));
        outcome.map_err(|e| e.to_string())?;
        Ok(format!("port {}", host.handle.session_port_of_group(group)))
    })
    .await;

    // ── Discover + join ─────────────────────────────────────────────
    scenario.step("joiners discover group", async {
        for joiner in joiners.iter_mut() {
            joiner.found(group).await?;
        }
        Ok(String::new())
    })
    .await;

    scenario.step("joiners join", async {
        for joiner in &joiners {
            let outcome = joiner.handle.join_group(group).await;
            emit(&EventIntent::new(&joiner.name, "join_group", group, &outcome));
            outcome.map_err(|e| format!("{}: {e}", joiner.name))?;
        }
        Ok(String::new())
    })
    .await;

    scenario.step("membership converges", async {
        wait_until("host member count", || {
            host.handle.number_of_peers_in_group(group) == joiner_count
        })
        .await?;
        for joiner in &joiners {
            // Each joiner sees the host plus every other joiner.
            wait_until(&joiner.name, || {
                joiner.handle.number_of_peers_in_group(group) == joiner_count
            })
            .await?;
        }
        Ok(format!("{joiner_count} members"))
    })
    .await;

    // ── Lock / unlock ───────────────────────────────────────────────
    scenario.step("lock propagates", async {
        let outcome = host.handle.lock_group(group).await;
        emit(&EventIntent::new(&host.name, "lock_group", group, &outcome));
        outcome.map_err(|e| e.to_string())?;
        for joiner in &joiners {
            wait_until(&joiner.name, || {
                joiner.handle.status_of_group(group) == GroupStatus::JoinedLocked
            })
            .await?;
        }
        Ok(String::new())
    })
    .await;

    scenario.step("unlock propagates", async {
        let outcome = host.handle.unlock_group(group).await;
        emit(&EventIntent::new(&host.name, "unlock_group", group, &outcome));
        outcome.map_err(|e| e.to_string())?;
        for joiner in &joiners {
            wait_until(&joiner.name, || {
                joiner.handle.status_of_group(group) == GroupStatus::JoinedUnlocked
            })
            .await?;
        }
        Ok(String::new())
    })
    .await;

    // ── Leave ───────────────────────────────────────────────────────
    if !joiners.is_empty() {
        let leaver = joiners.remove(0);
        scenario.step("first joiner leaves", async {
            let outcome = leaver.handle.leave_group(group).await;
            emit(&EventIntent::new(&leaver.name, "leave_group", group, &outcome));
            outcome.map_err(|e| e.to_string())?;
            let leaver_id = leaver.handle.my_peer_id().clone();
            host.next_matching(|e| {
                matches!(e, GroupEvent::PeerRemoved { peer, .. } if *peer == leaver_id)
            })
            .await?;
            Ok(format!(
                "host now has {} members",
                host.handle.number_of_peers_in_group(group)
            ))
        })
        .await;
        leaver.handle.shutdown().await;
    }

    // ── Destroy ─────────────────────────────────────────────────────
    scenario.step("destroy notifies members", async {
        let outcome = host.handle.destroy_group(group).await;
        emit(&EventIntent::new(&host.name, "destroy_group", group, &outcome));
        outcome.map_err(|e| e.to_string())?;
        for joiner in joiners.iter_mut() {
            joiner
                .next_matching(|e| matches!(e, GroupEvent::GroupLost { group: g } if g == group))
                .await?;
        }
        Ok(String::new())
    })
    .await;

    host.drain();
    host.emit_state();
    for joiner in joiners.iter_mut() {
        joiner.drain();
        joiner.emit_state();
        joiner.handle.shutdown().await;
    }
    host.handle.shutdown().await;

    Ok(scenario.finish())
}
