/// Advertised-name convention: `<prefix>.<group>.<port>`.
///
/// Group names may themselves contain dots; the port is always the segment
/// after the last one.
use peergroup_transport::SessionPort;

/// Result of parsing an advertised name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedName {
    /// Follows the convention; the port comes from the name.
    Conforming { group_name: String, port: u16 },
    /// Anything else. The port must come from elsewhere.
    Legacy { group_name: String },
}

impl DecodedName {
    pub fn group_name(&self) -> &str {
        match self {
            DecodedName::Conforming { group_name, .. } | DecodedName::Legacy { group_name } => {
                group_name
            }
        }
    }

    /// Port carried by a conforming name.
    pub fn port(&self) -> Option<SessionPort> {
        match self {
            DecodedName::Conforming { port, .. } => Some(SessionPort(*port)),
            DecodedName::Legacy { .. } => None,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, DecodedName::Legacy { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameCodec {
    prefix: String,
}

impl NameCodec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn encode(&self, group_name: &str, port: SessionPort) -> String {
        format!("{}.{}.{}", self.prefix, group_name, port.0)
    }

    /// Name a legacy peer would advertise for `group_name`: no port suffix.
    pub fn legacy_name(&self, group_name: &str) -> String {
        format!("{}.{}", self.prefix, group_name)
    }

    pub fn decode(&self, external_name: &str) -> DecodedName {
        let Some(rest) = self.strip_prefix(external_name) else {
            return DecodedName::Legacy {
                group_name: external_name.to_string(),
            };
        };

        if let Some((group, port)) = rest.rsplit_once('.') {
            if let Some(port) = parse_port(port).filter(|_| !group.is_empty()) {
                return DecodedName::Conforming {
                    group_name: group.to_string(),
                    port,
                };
            }
        }

        DecodedName::Legacy {
            group_name: rest.to_string(),
        }
    }

    fn strip_prefix<'a>(&self, name: &'a str) -> Option<&'a str> {
        name.strip_prefix(self.prefix.as_str())?.strip_prefix('.')
    }
}

/// A port segment exactly as [`NameCodec::encode`] writes it: decimal
/// digits only, no sign, no leading zero, non-zero and within `u16`.
fn parse_port(segment: &str) -> Option<u16> {
    let canonical = !segment.is_empty()
        && !segment.starts_with('0')
        && segment.bytes().all(|b| b.is_ascii_digit());
    if !canonical {
        return None;
    }
    segment.parse().ok()
}

/// Non-empty, without leading or trailing whitespace.
pub fn is_valid_group_name(name: &str) -> bool {
    !name.is_empty() && name.trim() == name
}
