/// Join-or-create race: every peer asks for the same group at roughly the
/// same time. Whoever has not yet seen an advertisement hosts, so more than
/// one host is possible; the scenario reports how the race played out.
use std::time::Duration;

use peergroup_protocol::{JoinOrCreateBranch, PeerGroupConfig};
use peergroup_transport::{LoopbackBus, LoopbackConfig};
use rand::Rng;

use crate::events::{emit, EventIntent};
use crate::scenario::{spawn_peers, wait_until, ScenarioRun, ScenarioSummary};

pub async fn run(
    config: PeerGroupConfig,
    peer_count: usize,
    group: &str,
    jitter_ms: u64,
) -> anyhow::Result<ScenarioSummary> {
    let mut scenario = ScenarioRun::new("join-or-create-race", group, peer_count);
    let start = scenario.epoch();
    let bus = LoopbackBus::new(LoopbackConfig::new());
    let mut peers = spawn_peers(&bus, "peer", peer_count, &config, start).await?;

    let delays: Vec<u64> = {
        let mut rng = rand::rng();
        (0..peer_count)
            .map(|_| rng.random_range(0..=jitter_ms))
            .collect()
    };

    scenario.step("join-or-create", async {
        let mut tasks = Vec::with_capacity(peer_count);
        for (peer, delay) in peers.iter().zip(&delays) {
            let handle = peer.handle.clone();
            let name = peer.name.clone();
            let group = group.to_string();
            let delay = *delay;
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                let outcome = handle.join_or_create_group(&group).await;
                let branch = match outcome.branch {
                    JoinOrCreateBranch::Joined => "joined",
                    JoinOrCreateBranch::Created => "created",
                };
                emit(&EventIntent::new(&name, "join_or_create", &group, &outcome.result).with_branch(branch));
                outcome
            }));
        }

        let mut created = 0;
        let mut joined = 0;
        let mut failed = 0;
        for task in tasks {
            let outcome = task.await.map_err(|e| e.to_string())?;
            match (outcome.branch, outcome.result.is_ok()) {
                (JoinOrCreateBranch::Created, true) => created += 1,
                (JoinOrCreateBranch::Joined, true) => joined += 1,
                (_, false) => failed += 1,
            }
        }
        if created == 0 {
            return Err("nobody hosts the group".into());
        }
        Ok(format!("{created} hosted, {joined} joined, {failed} failed"))
    })
    .await;

    scenario.step("hosts see their joiners", async {
        let joined_total: usize = peers
            .iter()
            .filter(|p| !p.handle.list_joined_group_names().is_empty())
            .count();
        let hosts: Vec<_> = peers
            .iter()
            .filter(|p| !p.handle.list_hosted_group_names().is_empty())
            .collect();
        wait_until("host member counts", || {
            hosts
                .iter()
                .map(|h| h.handle.number_of_peers_in_group(group))
                .sum::<usize>()
                == joined_total
        })
        .await?;
        Ok(format!("{} host(s), {joined_total} member(s)", hosts.len()))
    })
    .await;

    for peer in peers.iter_mut() {
        peer.drain();
        peer.emit_state();
        peer.handle.shutdown().await;
    }

    Ok(scenario.finish())
}
