use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Identifier the rendezvous server assigns to a registered peer.
///
/// The id is the peer's control-connection endpoint as observed by the server,
/// rendered with [`SocketAddr`]'s `Display`: `"198.51.100.4:51234"` for IPv4
/// and `"[2001:db8::1]:4000"` for IPv6. IPv6 ids keep the brackets, so an id
/// typed by hand must include them to match. Two live connections never share
/// an endpoint, so two registered peers never share an id.
///
/// # Examples
///
/// ```rust
/// use holepunch::protocol::PeerId;
/// use std::net::SocketAddr;
///
/// let addr: SocketAddr = "198.51.100.4:51234".parse().unwrap();
/// let id = PeerId::from(addr);
/// assert_eq!(id.as_str(), "198.51.100.4:51234");
/// ```
#[derive(Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for PeerId {
    fn from(addr: SocketAddr) -> Self {
        PeerId(addr.to_string())
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        PeerId(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        PeerId(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
