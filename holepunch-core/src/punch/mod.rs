//! NAT traversal engine.
//!
//! Two independent strategies, picked by the transport the peers intend to use:
//!
//! - [`punch_hole`]: UDP punch-and-acknowledge over a caller-owned socket.
//! - [`tcp_hole_punch`]: TCP simultaneous open, racing an inbound accept against an
//!   outbound connect on the same local port.
//!
//! Neither strategy retries beyond its own configuration; a failed attempt is
//! reported to the caller, which decides whether to fall back to a relay.

pub use config::*;
pub use tcp::tcp_hole_punch;
pub use udp::{
    create_punch_socket, establish_p2p_connection, punch_hole, respond_punch, PUNCH, PUNCH_ACK,
};

pub mod config;
pub mod tcp;
pub mod udp;
