//! NodeIdentity: Unique identifier for a process taking part in the membership protocol.
//!
//! An identity is the full `(protocol, host, port, uid)` tuple. The `uid` is
//! drawn fresh every time a process starts, so a node that restarts on the same
//! `host:port` is a different identity from the one it replaced.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeIdentityError {
    #[error("Invalid node identity format: expected protocol://host:port#uid")]
    InvalidFormat,
    #[error("Node identity has an empty {0}")]
    EmptyComponent(&'static str),
    #[error("Invalid port: {0}")]
    InvalidPort(String),
    #[error("Invalid uid: {0}")]
    InvalidUid(String),
}

/// A unique identifier for a node in the cluster.
///
/// Displays as `protocol://host:port#uid`.
///
/// # Examples
/// ```
/// use swim_core::NodeIdentity;
///
/// let node: NodeIdentity = "udp://127.0.0.1:7001#1111".parse().unwrap();
/// assert_eq!(node.port(), 7001);
/// assert_eq!(node.uid(), 1111);
/// assert_eq!(node.to_string(), "udp://127.0.0.1:7001#1111");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdentity {
    protocol: String,
    host: String,
    port: u16,
    uid: u64,
}

impl NodeIdentity {
    /// Create an identity from its parts.
    pub fn new(protocol: impl Into<String>, host: impl Into<String>, port: u16, uid: u64) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port,
            uid,
        }
    }

    /// Create an identity with a fresh random uid.
    ///
    /// Never returns a zero uid; zero is reserved for seeds whose uid is not known yet.
    pub fn generate(protocol: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        use rand::Rng;
        let uid = loop {
            let uid: u64 = rand::rng().random();
            if uid != 0 {
                break uid;
            }
        };
        Self::new(protocol, host, port, uid)
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// `host:port` of this node, suitable for socket address resolution.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// True if both identities point at the same protocol/host/port, ignoring the uid.
    pub fn same_endpoint(&self, other: &NodeIdentity) -> bool {
        self.protocol == other.protocol && self.host == other.host && self.port == other.port
    }

    /// Check the shape invariants the engine relies on.
    pub fn validate(&self) -> Result<(), NodeIdentityError> {
        if self.protocol.is_empty() {
            return Err(NodeIdentityError::EmptyComponent("protocol"));
        }
        if self.host.is_empty() {
            return Err(NodeIdentityError::EmptyComponent("host"));
        }
        Ok(())
    }
}

impl Display for NodeIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}#{}", self.protocol, self.host, self.port, self.uid)
    }
}

impl FromStr for NodeIdentity {
    type Err = NodeIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (protocol, rest) = s.split_once("://").ok_or(NodeIdentityError::InvalidFormat)?;
        let (address, uid) = rest.rsplit_once('#').ok_or(NodeIdentityError::InvalidFormat)?;
        // rsplit so IPv6-ish hosts keep their inner colons
        let (host, port) = address
            .rsplit_once(':')
            .ok_or(NodeIdentityError::InvalidFormat)?;

        let port: u16 = port
            .parse()
            .map_err(|_| NodeIdentityError::InvalidPort(port.to_string()))?;
        let uid: u64 = uid
            .parse()
            .map_err(|_| NodeIdentityError::InvalidUid(uid.to_string()))?;

        let node = Self::new(protocol, host, port, uid);
        node.validate()?;
        Ok(node)
    }
}

// Serialize as the display string so identities read the same in logs, errors and JSON
impl serde::Serialize for NodeIdentity {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for NodeIdentity {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
