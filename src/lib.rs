//! # holepunch - rendezvous, hole punching and relay for peers behind NAT
//!
//! A [`Server`] accepts control connections and registers every peer under the
//! endpoint it observes, which is the peer's public (NAT-mapped) address. Peers ask
//! to be introduced with `connect`; the server hands each side the other's public
//! address and the clients then race a TCP simultaneous open towards each other.
//! When no direct path can be made, [`relay`] forwards a TCP connection through a
//! reachable host.
//!
//! ```rust,no_run
//! use holepunch::client::Client;
//! use holepunch::config::ClientConfig;
//!
//! # async fn example() -> holepunch::error::Result<()> {
//! let client = Client::connect(ClientConfig::new("rendezvous.example.com", 8000)).await?;
//! println!("registered as {}", client.peer_id());
//! let handle = client.handle();
//! tokio::spawn(client.run());
//! handle.connect_to_peer("203.0.113.9:40000").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use holepunch_core::{punch, relay};

pub use client::{Client, ClientHandle, ConnectionHandler};
pub use server::Server;
