//! Control-channel wire format.
//!
//! Every message is one JSON object on one line, tagged by its `type` field:
//!
//! ```text
//! {"type":"register"}
//! {"type":"register_ack","peer_id":"198.51.100.4:51234","public_addr":["198.51.100.4",51234]}
//! {"type":"connect","target_id":"203.0.113.9:40000"}
//! {"type":"connect_ready","target_id":"203.0.113.9:40000","target_addr":["203.0.113.9",40000]}
//! {"type":"punch","target_id":"203.0.113.9:40000","port":40000,"target_addr":["203.0.113.9",40000]}
//! {"type":"punch","peer_id":"198.51.100.4:51234","port":40000,"target_addr":["198.51.100.4",51234]}
//! {"type":"error","message":"Target peer not found"}
//! ```
//!
//! Addresses travel as `[ip, port]` pairs.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use peer_id::PeerId;

mod peer_id;

/// Longest line accepted from a peer, newline included.
pub const MAX_ENVELOPE_LEN: usize = 64 * 1024;

pub const TARGET_NOT_FOUND: &str = "Target peer not found";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Register,
    RegisterAck {
        peer_id: PeerId,
        #[serde(with = "addr_pair")]
        public_addr: SocketAddr,
    },
    Connect {
        #[serde(default)]
        target_id: Option<PeerId>,
    },
    ConnectReady {
        target_id: PeerId,
        #[serde(with = "addr_pair")]
        target_addr: SocketAddr,
    },
    /// Client to server it names `target_id`; server to client it names `peer_id`.
    Punch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<PeerId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<PeerId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        #[serde(
            default,
            with = "opt_addr_pair",
            skip_serializing_if = "Option::is_none"
        )]
        target_addr: Option<SocketAddr>,
    },
    Error {
        message: String,
    },
    /// Any `type` this side does not know.
    #[serde(other)]
    Unknown,
}

impl Envelope {
    pub fn connect(target_id: impl Into<PeerId>) -> Envelope {
        Envelope::Connect {
            target_id: Some(target_id.into()),
        }
    }
    /// `punch` as sent by a client that wants `target_id` to race towards it.
    pub fn punch_request(target_id: PeerId, port: u16, target_addr: SocketAddr) -> Envelope {
        Envelope::Punch {
            target_id: Some(target_id),
            peer_id: None,
            port: Some(port),
            target_addr: Some(target_addr),
        }
    }
    /// `punch` as forwarded by the server, naming the requesting peer.
    pub fn punch_announce(peer_id: PeerId, port: u16, target_addr: SocketAddr) -> Envelope {
        Envelope::Punch {
            target_id: None,
            peer_id: Some(peer_id),
            port: Some(port),
            target_addr: Some(target_addr),
        }
    }
    pub fn error(message: impl Into<String>) -> Envelope {
        Envelope::Error {
            message: message.into(),
        }
    }
    /// The wire tag of this envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Register => "register",
            Envelope::RegisterAck { .. } => "register_ack",
            Envelope::Connect { .. } => "connect",
            Envelope::ConnectReady { .. } => "connect_ready",
            Envelope::Punch { .. } => "punch",
            Envelope::Error { .. } => "error",
            Envelope::Unknown => "unknown",
        }
    }
    /// One UTF-8 JSON object followed by a single `\n`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf =
            serde_json::to_vec(self).map_err(|e| Error::MalformedEnvelope(e.to_string()))?;
        buf.push(b'\n');
        Ok(buf)
    }
    /// Parse one line, with or without its trailing newline.
    pub fn decode(line: &[u8]) -> Result<Envelope> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(Error::MalformedEnvelope("empty line".to_string()));
        }
        serde_json::from_slice(line).map_err(|e| Error::MalformedEnvelope(e.to_string()))
    }
}

mod addr_pair {
    use std::net::{IpAddr, SocketAddr};

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error> {
        (addr.ip(), addr.port()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SocketAddr, D::Error> {
        let (ip, port) = <(IpAddr, u16)>::deserialize(deserializer)?;
        Ok(SocketAddr::new(ip, port))
    }
}

mod opt_addr_pair {
    use std::net::{IpAddr, SocketAddr};

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        addr: &Option<SocketAddr>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match addr {
            Some(addr) => serializer.serialize_some(&(addr.ip(), addr.port())),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<SocketAddr>, D::Error> {
        let pair = Option::<(IpAddr, u16)>::deserialize(deserializer)?;
        Ok(pair.map(|(ip, port)| SocketAddr::new(ip, port)))
    }
}
