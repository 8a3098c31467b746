//! # holepunch-core - NAT traversal and relay building blocks
//!
//! `holepunch-core` holds the transport-level pieces of `holepunch`: the socket
//! helpers, the NAT traversal engine and the relay forwarder. It knows nothing about
//! the rendezvous protocol; callers hand it addresses they learned elsewhere.
//!
//! ## Modules
//!
//! - [`socket`] - socket creation with address/port reuse
//! - [`punch`] - UDP punch-and-acknowledge and TCP simultaneous open
//! - [`relay`] - bidirectional TCP forwarding to a fixed target
//!
//! ## UDP hole punching
//!
//! ```rust,no_run
//! use holepunch_core::punch::{create_punch_socket, punch_hole, UdpPunchConfig};
//!
//! # async fn example() -> holepunch_core::error::Result<()> {
//! let (socket, port) = create_punch_socket("0.0.0.0".parse().unwrap(), 0)?;
//! println!("punching from port {port}");
//! let ok = punch_hole(&socket, "203.0.113.7:40000".parse().unwrap(), &UdpPunchConfig::default()).await;
//! println!("punched: {ok}");
//! # Ok(())
//! # }
//! ```
//!
//! ## TCP simultaneous open
//!
//! ```rust,no_run
//! use holepunch_core::punch::{tcp_hole_punch, TcpPunchConfig};
//!
//! # async fn example() -> holepunch_core::error::Result<()> {
//! let stream = tcp_hole_punch(
//!     "0.0.0.0:40001".parse().unwrap(),
//!     "203.0.113.7:40000".parse().unwrap(),
//!     &TcpPunchConfig::default(),
//! )
//! .await?;
//! println!("connected to {:?}", stream.peer_addr());
//! # Ok(())
//! # }
//! ```
//!
//! ## Relay
//!
//! ```rust,no_run
//! use holepunch_core::relay::{start, RelayConfig};
//!
//! # async fn example() -> holepunch_core::error::Result<()> {
//! start(RelayConfig::new("0.0.0.0:9000".parse().unwrap(), "10.0.0.2", 22)).await
//! # }
//! ```

pub mod error;
pub mod punch;
pub mod relay;
pub mod socket;
