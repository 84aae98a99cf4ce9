use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use peergroup_protocol::{GroupEvent, PeerGroupError};
use serde::Serialize;

/// Emit a JSONL event to stdout (flushed immediately for piped output).
pub fn emit<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{json}");
        let _ = lock.flush();
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ── Session events ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventStarted {
    pub event: &'static str,
    pub scenario: String,
    pub prefix: String,
    pub peers: usize,
    pub timestamp_ms: u64,
}

impl EventStarted {
    pub fn new(scenario: &str, prefix: &str, peers: usize) -> Self {
        Self {
            event: "started",
            scenario: scenario.to_string(),
            prefix: prefix.to_string(),
            peers,
            timestamp_ms: now_ms(),
        }
    }
}

#[derive(Serialize)]
pub struct EventPeerUp {
    pub event: &'static str,
    pub peer: String,
    pub peer_id: String,
}

impl EventPeerUp {
    pub fn new(peer: &str, peer_id: &str) -> Self {
        Self {
            event: "peer_up",
            peer: peer.to_string(),
            peer_id: peer_id.to_string(),
        }
    }
}

// ── Group events ────────────────────────────────────────────────

/// A [`GroupEvent`] observed by one simulated peer.
#[derive(Serialize)]
pub struct EventObserved<'a> {
    pub event: &'static str,
    pub peer: &'a str,
    pub elapsed_ms: u64,
    pub observed: &'a GroupEvent,
}

// ── Intents ─────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventIntent {
    pub event: &'static str,
    pub peer: String,
    pub intent: &'static str,
    pub group: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<&'static str>,
}

impl EventIntent {
    pub fn new(
        peer: &str,
        intent: &'static str,
        group: &str,
        result: &Result<(), PeerGroupError>,
    ) -> Self {
        Self {
            event: "intent",
            peer: peer.to_string(),
            intent,
            group: group.to_string(),
            ok: result.is_ok(),
            error: result.as_ref().err().map(ToString::to_string),
            branch: None,
        }
    }

    pub fn with_branch(mut self, branch: &'static str) -> Self {
        self.branch = Some(branch);
        self
    }
}

// ── Final state ─────────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventPeerState {
    pub event: &'static str,
    pub peer: String,
    pub hosted: Vec<String>,
    pub joined: Vec<String>,
    pub found: Vec<String>,
    pub locked: Vec<String>,
}
