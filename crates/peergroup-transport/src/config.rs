use std::ops::RangeInclusive;

use crate::TransportMask;

/// Configuration for a [`LoopbackBus`](crate::LoopbackBus).
///
/// ```rust
/// use peergroup_transport::{LoopbackConfig, TransportMask};
///
/// let config = LoopbackConfig::new()
///     .port_range(2000..=2099)
///     .transport_mask(TransportMask::LOCAL);
/// ```
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Ports handed out for `SessionPort::ANY` binds.
    pub(crate) port_range: RangeInclusive<u16>,
    /// Mask reported on discovery events.
    pub(crate) transport_mask: TransportMask,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackConfig {
    /// Defaults: ports 10000..=19999, `TransportMask::LOCAL`.
    pub fn new() -> Self {
        Self {
            port_range: 10_000..=19_999,
            transport_mask: TransportMask::LOCAL,
        }
    }

    /// Set the range used for automatic port assignment. Port 0 is skipped.
    pub fn port_range(mut self, range: RangeInclusive<u16>) -> Self {
        self.port_range = range;
        self
    }

    /// Set the transport mask reported with advertisements.
    pub fn transport_mask(mut self, mask: TransportMask) -> Self {
        self.transport_mask = mask;
        self
    }
}
