/// Common types and helpers for the simulated scenarios.
use std::sync::Arc;
use std::time::{Duration, Instant};

use peergroup_protocol::{GroupCoordinator, GroupEvent, PeerGroupConfig, PeerGroupRuntime, RuntimeHandle};
use peergroup_transport::LoopbackBus;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::events::{emit, EventObserved, EventPeerState, EventPeerUp};

/// How long a step waits for a notification or a condition.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// One finished step, emitted as a JSONL line as soon as it completes.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub event: &'static str,
    pub scenario: &'static str,
    pub step: String,
    pub ok: bool,
    /// Start of the step, relative to the scenario start.
    pub at_ms: u64,
    pub took_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Drives the steps of one group scenario. Steps keep running after a
/// failure so later ones still report what the peers converged to.
pub struct ScenarioRun {
    scenario: &'static str,
    group: String,
    peers: usize,
    epoch: Instant,
    steps: Vec<StepRecord>,
}

impl ScenarioRun {
    pub fn new(scenario: &'static str, group: &str, peers: usize) -> Self {
        Self {
            scenario,
            group: group.to_string(),
            peers,
            epoch: Instant::now(),
            steps: Vec::new(),
        }
    }

    /// Instant every peer timestamps its observations against.
    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Run one step, then record and emit it. Returns whether it passed.
    pub async fn step<Fut>(&mut self, name: &str, step: Fut) -> bool
    where
        Fut: std::future::Future<Output = Result<String, String>>,
    {
        let at_ms = self.epoch.elapsed().as_millis() as u64;
        let started = Instant::now();
        let outcome = step.await;
        let ok = outcome.is_ok();
        let detail = match outcome {
            Ok(detail) if detail.is_empty() => None,
            Ok(detail) | Err(detail) => Some(detail),
        };
        if !ok {
            tracing::warn!(
                scenario = self.scenario,
                step = name,
                "step failed: {}",
                detail.as_deref().unwrap_or_default()
            );
        }

        let record = StepRecord {
            event: "step",
            scenario: self.scenario,
            step: name.to_string(),
            ok,
            at_ms,
            took_ms: started.elapsed().as_millis() as u64,
            detail,
        };
        emit(&record);
        self.steps.push(record);
        ok
    }

    pub fn finish(self) -> ScenarioSummary {
        ScenarioSummary {
            event: "scenario",
            scenario: self.scenario,
            group: self.group,
            peers: self.peers,
            passed: self.steps.iter().filter(|s| s.ok).count(),
            failed_steps: self
                .steps
                .iter()
                .filter(|s| !s.ok)
                .map(|s| s.step.clone())
                .collect(),
            total_ms: self.epoch.elapsed().as_millis() as u64,
            steps: self.steps,
        }
    }
}

/// Final line of a scenario.
#[derive(Debug, Serialize)]
pub struct ScenarioSummary {
    pub event: &'static str,
    pub scenario: &'static str,
    pub group: String,
    pub peers: usize,
    pub passed: usize,
    pub failed_steps: Vec<String>,
    pub total_ms: u64,
    #[serde(skip)]
    pub steps: Vec<StepRecord>,
}

impl ScenarioSummary {
    pub fn success(&self) -> bool {
        self.failed_steps.is_empty()
    }

    /// Human-readable report on stderr.
    pub fn print(&self) {
        let verdict = if self.success() { "PASS" } else { "FAIL" };
        eprintln!(
            "\n[{verdict}] {} on group {:?} with {} peers: {}/{} steps in {}ms",
            self.scenario,
            self.group,
            self.peers,
            self.passed,
            self.steps.len(),
            self.total_ms
        );
        for step in &self.steps {
            let mark = if step.ok { " ok " } else { "FAIL" };
            eprint!("  [{mark}] +{:>5}ms {} ({}ms)", step.at_ms, step.step, step.took_ms);
            if let Some(detail) = &step.detail {
                eprint!(": {detail}");
            }
            eprintln!();
        }
    }
}

/// Poll `check` until it holds or [`STEP_TIMEOUT`] passes.
pub async fn wait_until(what: &str, check: impl Fn() -> bool) -> Result<(), String> {
    tokio::time::timeout(STEP_TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .map_err(|_| format!("timeout waiting for {what}"))
}

// ── Simulated peer ──────────────────────────────────────────────

/// One peer on the bus: a running runtime plus its group event feed.
pub struct SimPeer {
    pub name: String,
    pub handle: RuntimeHandle,
    events: mpsc::UnboundedReceiver<GroupEvent>,
    epoch: Instant,
}

impl SimPeer {
    pub async fn spawn(
        bus: &LoopbackBus,
        name: &str,
        config: PeerGroupConfig,
        epoch: Instant,
    ) -> anyhow::Result<Self> {
        let (transport, transport_events) = bus.attach(name);
        let coordinator = Arc::new(GroupCoordinator::new(config, Arc::new(transport)));
        // Subscribe first so advertisements replayed by discovery are seen.
        let events = coordinator.dispatcher().subscribe();
        coordinator.start().await?;
        let handle = PeerGroupRuntime::spawn(coordinator, transport_events);

        emit(&EventPeerUp::new(name, handle.my_peer_id().as_str()));
        Ok(Self {
            name: name.to_string(),
            handle,
            events,
            epoch,
        })
    }

    /// Read events until `pred` matches. Every event read is echoed as JSONL.
    pub async fn next_matching(
        &mut self,
        pred: impl Fn(&GroupEvent) -> bool,
    ) -> Result<GroupEvent, String> {
        let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
        loop {
            let event = tokio::time::timeout_at(deadline, self.events.recv())
                .await
                .map_err(|_| format!("{}: timeout waiting for group event", self.name))?
                .ok_or_else(|| format!("{}: event channel closed", self.name))?;
            emit(&EventObserved {
                event: "observed",
                peer: &self.name,
                elapsed_ms: self.epoch.elapsed().as_millis() as u64,
                observed: &event,
            });
            if pred(&event) {
                return Ok(event);
            }
        }
    }

    pub async fn found(&mut self, group: &str) -> Result<(), String> {
        self.next_matching(|e| {
            matches!(e, GroupEvent::FoundAdvertisedName { group: g, .. } if g == group)
        })
        .await
        .map(|_| ())
    }

    /// Echo whatever is already queued.
    pub fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            emit(&EventObserved {
                event: "observed",
                peer: &self.name,
                elapsed_ms: self.epoch.elapsed().as_millis() as u64,
                observed: &event,
            });
        }
    }

    pub fn emit_state(&self) {
        emit(&EventPeerState {
            event: "peer_state",
            peer: self.name.clone(),
            hosted: self.handle.list_hosted_group_names(),
            joined: self.handle.list_joined_group_names(),
            found: self.handle.list_found_group_names(),
            locked: self.handle.list_locked_group_names(),
        });
    }
}

/// Spawn `count` peers named `<stem>-<n>`.
pub async fn spawn_peers(
    bus: &LoopbackBus,
    stem: &str,
    count: usize,
    config: &PeerGroupConfig,
    epoch: Instant,
) -> anyhow::Result<Vec<SimPeer>> {
    let mut peers = Vec::with_capacity(count);
    for i in 0..count {
        peers.push(SimPeer::spawn(bus, &format!("{stem}-{i}"), config.clone(), epoch).await?);
    }
    Ok(peers)
}
