use std::sync::Arc;

use crate::{PeerId, SessionId, SessionPort, TransportError};

/// Host-side admission policy attached to a bound session port.
///
/// Called synchronously by the transport while it processes a join request,
/// so implementations must not block.
pub trait SessionAcceptor: Send + Sync {
    fn accept_session_joiner(&self, port: SessionPort, joiner: &PeerId) -> bool;
}

/// Discovery and session capability consumed by the group layer.
///
/// Completion or failure is always reported; timeouts and cancellation are
/// the implementation's concern. Inbound notifications travel separately as
/// [`TransportEvent`](crate::TransportEvent)s.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Our unique bus name.
    fn local_peer_id(&self) -> PeerId;

    /// Globally unique id of this attachment.
    fn guid(&self) -> String;

    /// Start reporting advertisements whose name starts with `prefix`.
    async fn find_advertised_name(&self, prefix: &str) -> Result<(), TransportError>;

    async fn cancel_find_advertised_name(&self, prefix: &str) -> Result<(), TransportError>;

    /// Claim and broadcast `name`.
    async fn advertise(&self, name: &str) -> Result<(), TransportError>;

    async fn stop_advertise(&self, name: &str) -> Result<(), TransportError>;

    /// Bind a session port. [`SessionPort::ANY`] lets the transport choose;
    /// the bound port is returned.
    async fn bind_session_port(
        &self,
        port: SessionPort,
        acceptor: Arc<dyn SessionAcceptor>,
    ) -> Result<SessionPort, TransportError>;

    async fn unbind_session_port(&self, port: SessionPort) -> Result<(), TransportError>;

    /// Join the session hosted by the owner of `name` on `port`.
    async fn join_session(&self, name: &str, port: SessionPort)
        -> Result<SessionId, TransportError>;

    async fn leave_session(&self, session_id: SessionId) -> Result<(), TransportError>;

    /// Current owner of an advertised name, if any.
    async fn name_owner(&self, name: &str) -> Result<Option<PeerId>, TransportError>;
}
