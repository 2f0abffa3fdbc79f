//! swim-daemon library: Exposes the daemon components for testing.
//!
//! This is a thin layer that hosts one `SwimInstance` behind a UDP socket,
//! allowing integration tests to run several daemons over loopback.

pub mod daemon;
pub mod seed;
pub mod transport;

// Re-export key types for convenience
pub use daemon::SwimDaemon;
pub use seed::{SeedError, parse_seed};
pub use transport::{MAX_DATAGRAM_SIZE, UdpPeer};
