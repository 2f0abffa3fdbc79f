//! SwimPeer trait for delivering protocol messages.
//!
//! The engine never talks to the network. A hosting shell turns each
//! `Directive::Send` into a call on the peer handle for the destination.
//!
//! Implementations:
//! - UDP: `swim-daemon`'s `UdpPeer`, one JSON datagram per message

use crate::NodeIdentity;
use crate::swim::SwimMessage;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Cannot resolve {0}")]
    Unresolvable(String),

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// A handle for sending to one member.
#[async_trait]
pub trait SwimPeer: Send + Sync {
    /// The member this handle sends to
    fn node(&self) -> &NodeIdentity;

    /// Send one message and return how many bytes went out. Delivery is best-effort.
    async fn send(&self, message: &SwimMessage) -> Result<usize, TransportError>;
}
