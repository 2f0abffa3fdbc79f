//! Seed address parsing for `--seed`.

use swim_core::{NodeIdentity, NodeIdentityError};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeedError {
    #[error("Invalid seed {0:?}: expected host:port or udp://host:port#uid")]
    InvalidFormat(String),

    #[error("Invalid seed {0:?}: only udp seeds are supported")]
    UnsupportedProtocol(String),

    #[error(transparent)]
    InvalidNode(#[from] NodeIdentityError),
}

/// Parse a seed given as `udp://host:port#uid` or plain `host:port`.
///
/// Without a uid the seed gets uid 0, which the engine treats as a placeholder
/// until the seed answers with its real identity.
pub fn parse_seed(s: &str) -> Result<NodeIdentity, SeedError> {
    if s.contains('#') {
        let node: NodeIdentity = s.parse()?;
        if node.protocol() != "udp" {
            return Err(SeedError::UnsupportedProtocol(s.to_string()));
        }
        return Ok(node);
    }

    let address = s.strip_prefix("udp://").unwrap_or(s);
    if address.contains("://") {
        return Err(SeedError::UnsupportedProtocol(s.to_string()));
    }
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| SeedError::InvalidFormat(s.to_string()))?;
    let port: u16 = port
        .parse()
        .map_err(|_| SeedError::InvalidFormat(s.to_string()))?;
    if host.is_empty() {
        return Err(SeedError::InvalidFormat(s.to_string()));
    }
    Ok(NodeIdentity::new("udp", host, port, 0))
}
