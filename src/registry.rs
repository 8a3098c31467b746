//! Server-side peer registry.
//!
//! Maps peer ids to the write side of their control session and the public
//! address the server observed for them. An id is present only while its peer is
//! registered and its transport is open; the connection task removes it on the
//! way out. Routing is keyed by id only.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::protocol::{Envelope, PeerId, TARGET_NOT_FOUND};
use crate::session::{PeerSession, SessionWriter};

#[derive(Clone)]
struct RegisteredPeer {
    public_addr: SocketAddr,
    writer: SessionWriter,
}

#[derive(Clone, Default)]
pub struct Registry {
    sessions: Arc<DashMap<PeerId, RegisteredPeer>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn len(&self) -> usize {
        self.sessions.len()
    }
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.sessions.contains_key(peer_id)
    }
    pub fn public_addr(&self, peer_id: &PeerId) -> Option<SocketAddr> {
        self.sessions.get(peer_id).map(|v| v.public_addr)
    }
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.sessions.iter().map(|v| v.key().clone()).collect()
    }
    // Clone out so no map guard is held across an await.
    fn get(&self, peer_id: &PeerId) -> Option<RegisteredPeer> {
        self.sessions.get(peer_id).map(|v| v.value().clone())
    }

    /// Register `session` under its observed endpoint and acknowledge it.
    ///
    /// The id and the public address both come from the transport, never from
    /// anything the client claims. If the ack cannot be sent the entry is
    /// removed again before the error is returned.
    pub async fn handle_register(&self, session: &PeerSession) -> Result<PeerId> {
        let public_addr = session.remote_addr();
        let peer_id = PeerId::from(public_addr);
        self.sessions.insert(
            peer_id.clone(),
            RegisteredPeer {
                public_addr,
                writer: session.writer(),
            },
        );
        let ack = Envelope::RegisterAck {
            peer_id: peer_id.clone(),
            public_addr,
        };
        if let Err(e) = session.send(&ack).await {
            self.remove(&peer_id).await;
            return Err(e);
        }
        log::info!("Registered peer {peer_id}");
        Ok(peer_id)
    }

    /// Introduce `requester_id` and `target_id` to each other.
    ///
    /// Both `connect_ready` envelopes are sent before this returns. An unknown
    /// target is answered with an `error` envelope to the requester only and
    /// reported as [`Error::TargetNotFound`]. Only a failure to reach the
    /// requester is returned as a send error; the target's session notices its
    /// own broken transport.
    pub async fn handle_connect(&self, requester_id: &PeerId, target_id: &PeerId) -> Result<()> {
        let requester = self
            .get(requester_id)
            .ok_or_else(|| Error::TargetNotFound(requester_id.clone()))?;
        let Some(target) = self.get(target_id) else {
            requester
                .writer
                .send(&Envelope::error(TARGET_NOT_FOUND))
                .await?;
            return Err(Error::TargetNotFound(target_id.clone()));
        };
        let to_requester = Envelope::ConnectReady {
            target_id: target_id.clone(),
            target_addr: target.public_addr,
        };
        let to_target = Envelope::ConnectReady {
            target_id: requester_id.clone(),
            target_addr: requester.public_addr,
        };
        let (rs_requester, rs_target) = tokio::join!(
            requester.writer.send(&to_requester),
            target.writer.send(&to_target)
        );
        if let Err(e) = rs_target {
            log::warn!("connect_ready {requester_id} -> {target_id}: {e}");
        }
        rs_requester?;
        log::info!("introduced {requester_id} <-> {target_id}");
        Ok(())
    }

    /// Forward a punch from `requester_id` to `target_id`, telling the target
    /// which address to race towards. Unknown targets are dropped silently.
    pub async fn handle_punch(
        &self,
        requester_id: &PeerId,
        target_id: Option<&PeerId>,
        port: Option<u16>,
    ) {
        let Some((target_id, target)) = target_id.and_then(|id| self.get(id).map(|t| (id, t)))
        else {
            log::debug!("punch from {requester_id}: target {target_id:?} not registered");
            return;
        };
        let Some(requester) = self.get(requester_id) else {
            return;
        };
        let envelope =
            Envelope::punch_announce(requester_id.clone(), port.unwrap_or(0), requester.public_addr);
        if let Err(e) = target.writer.send(&envelope).await {
            log::warn!("punch {requester_id} -> {target_id}: {e}");
        }
    }

    /// Drop `peer_id` and close its transport. Returns false if it was not present.
    pub async fn remove(&self, peer_id: &PeerId) -> bool {
        match self.sessions.remove(peer_id) {
            Some((_, peer)) => {
                peer.writer.close().await;
                log::info!("Peer {peer_id} disconnected");
                true
            }
            None => false,
        }
    }
}
