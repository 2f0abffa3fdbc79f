//! UDP transport: one JSON datagram per protocol message.
//!
//! Every peer handle shares the daemon's single socket, so replies always
//! leave from the address other members know us by.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use swim_core::{NodeIdentity, SwimMessage, SwimPeer, TransportError};
use tokio::net::UdpSocket;
use tracing::trace;

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Sends to one member over the shared socket.
pub struct UdpPeer {
    node: NodeIdentity,
    addr: SocketAddr,
    socket: Arc<UdpSocket>,
}

impl UdpPeer {
    /// Create a handle for a member whose address is already known.
    pub fn new(node: NodeIdentity, addr: SocketAddr, socket: Arc<UdpSocket>) -> Self {
        Self { node, addr, socket }
    }

    /// Resolve the member's `host:port` and create a handle for it.
    pub async fn resolve(node: NodeIdentity, socket: Arc<UdpSocket>) -> Result<Self, TransportError> {
        let endpoint = node.endpoint();
        let addr = tokio::net::lookup_host(&endpoint)
            .await
            .map_err(|e| TransportError::Unresolvable(format!("{}: {}", endpoint, e)))?
            .next()
            .ok_or_else(|| TransportError::Unresolvable(endpoint.clone()))?;
        Ok(Self::new(node, addr, socket))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl SwimPeer for UdpPeer {
    fn node(&self) -> &NodeIdentity {
        &self.node
    }

    async fn send(&self, message: &SwimMessage) -> Result<usize, TransportError> {
        let data = message
            .to_json()
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::Encode(format!(
                "{} is {} bytes, max is {}",
                message.kind(),
                data.len(),
                MAX_DATAGRAM_SIZE
            )));
        }

        self.socket
            .send_to(&data, self.addr)
            .await
            .map_err(|e| TransportError::SendFailed(format!("{}: {}", self.addr, e)))?;
        trace!("Sent {} to {} ({} bytes)", message.kind(), self.node, data.len());
        Ok(data.len())
    }
}
