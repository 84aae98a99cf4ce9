use peergroup_transport::SessionPort;

/// Environment variable consulted for the default group prefix.
pub const PREFIX_ENV: &str = "PEERGROUP_PREFIX";

/// Prefix used when [`PREFIX_ENV`] is unset or empty.
pub const DEFAULT_PREFIX: &str = "org.peergroup";

/// Configuration for a [`GroupCoordinator`](crate::GroupCoordinator).
///
/// ```rust
/// use peergroup_protocol::PeerGroupConfig;
/// use peergroup_transport::SessionPort;
///
/// let config = PeerGroupConfig::new()
///     .prefix("org.example.chess")
///     .legacy_session_port(SessionPort(27));
/// assert_eq!(config.prefix_str(), "org.example.chess");
/// ```
#[derive(Debug, Clone)]
pub struct PeerGroupConfig {
    /// Prefix of every advertised group name.
    pub(crate) prefix: String,
    /// Port assumed for discovered names that do not carry one.
    pub(crate) legacy_session_port: Option<SessionPort>,
    /// Capacity of the runtime command channel.
    pub(crate) command_buffer: usize,
}

impl Default for PeerGroupConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerGroupConfig {
    /// Defaults: prefix from `PEERGROUP_PREFIX` (falling back to
    /// `org.peergroup`), no legacy port, 64 queued commands.
    pub fn new() -> Self {
        let prefix = std::env::var(PREFIX_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PREFIX.to_string());
        Self {
            prefix,
            legacy_session_port: None,
            command_buffer: 64,
        }
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Port used to join legacy groups. `SessionPort::INVALID` clears it.
    pub fn legacy_session_port(mut self, port: SessionPort) -> Self {
        self.legacy_session_port = port.is_valid().then_some(port);
        self
    }

    pub fn command_buffer(mut self, size: usize) -> Self {
        self.command_buffer = size.max(1);
        self
    }

    pub fn prefix_str(&self) -> &str {
        &self.prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides() {
        let config = PeerGroupConfig::new()
            .prefix("a.b")
            .legacy_session_port(SessionPort(9))
            .command_buffer(0);
        assert_eq!(config.prefix, "a.b");
        assert_eq!(config.legacy_session_port, Some(SessionPort(9)));
        assert_eq!(config.command_buffer, 1);
    }

    #[test]
    fn invalid_legacy_port_clears_hint() {
        let config = PeerGroupConfig::new()
            .legacy_session_port(SessionPort(9))
            .legacy_session_port(SessionPort::INVALID);
        assert_eq!(config.legacy_session_port, None);
    }
}
