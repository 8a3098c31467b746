//! Rendezvous client.
//!
//! Registers with the server over one control connection and then reacts to
//! what the server routes to it: a `connect_ready` is answered with a `punch`
//! request, and an incoming `punch` starts a TCP hole punch towards the
//! announced address. Each race runs on its own task so the control connection
//! keeps being read in order.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpStream;

use holepunch_core::punch::tcp_hole_punch;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{Envelope, PeerId};
use crate::session::{PeerSession, SessionWriter};

/// Receives the outcome of every TCP hole punch the client runs.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn on_connected(&self, peer_id: PeerId, stream: TcpStream);
    async fn on_failed(&self, peer_id: PeerId, error: Error) {
        log::warn!("TCP hole punch to {peer_id} failed: {error}");
    }
}

#[derive(Clone)]
struct Handler {
    inner: Arc<dyn ConnectionHandler>,
}

#[async_trait]
impl ConnectionHandler for Handler {
    async fn on_connected(&self, peer_id: PeerId, stream: TcpStream) {
        self.inner.on_connected(peer_id, stream).await
    }
    async fn on_failed(&self, peer_id: PeerId, error: Error) {
        self.inner.on_failed(peer_id, error).await
    }
}

pub struct Client {
    config: ClientConfig,
    session: PeerSession,
    peer_id: PeerId,
    public_addr: SocketAddr,
    handler: Option<Handler>,
    pending: Arc<Mutex<HashSet<PeerId>>>,
}

impl Client {
    /// Connect to the server and register.
    ///
    /// Fails with [`Error::RegistrationFailed`] if no `register_ack` arrives
    /// within `register_timeout`.
    pub async fn connect(config: ClientConfig) -> Result<Client> {
        config.check()?;
        let server_addr = tokio::net::lookup_host((config.server_host.as_str(), config.server_port))
            .await?
            .next()
            .ok_or_else(|| {
                Error::RegistrationFailed(format!("cannot resolve {}", config.server_host))
            })?;
        let mut session = PeerSession::connect(server_addr).await?;
        log::info!(
            "Connected to server at {}:{}",
            config.server_host,
            config.server_port
        );
        session.send(&Envelope::Register).await?;
        let reply = tokio::time::timeout(config.register_timeout, session.receive())
            .await
            .map_err(|_| Error::RegistrationFailed("timed out waiting for register_ack".into()));
        let (peer_id, public_addr) = match reply {
            Ok(Ok(Some(Envelope::RegisterAck {
                peer_id,
                public_addr,
            }))) => (peer_id, public_addr),
            Ok(Ok(Some(other))) => {
                session.close().await;
                return Err(Error::RegistrationFailed(format!(
                    "expected register_ack, got {}",
                    other.kind()
                )));
            }
            Ok(Ok(None)) => {
                return Err(Error::RegistrationFailed(
                    "server closed the connection".into(),
                ))
            }
            Ok(Err(e)) => {
                session.close().await;
                return Err(Error::RegistrationFailed(e.to_string()));
            }
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };
        log::info!("Registered as {peer_id}, public address {public_addr}");
        Ok(Client {
            config,
            session,
            peer_id,
            public_addr,
            handler: None,
            pending: Default::default(),
        })
    }

    pub fn with_handler<H: ConnectionHandler + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Handler {
            inner: Arc::new(handler),
        });
        self
    }
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }
    /// The address the server observed for this client.
    pub fn public_addr(&self) -> SocketAddr {
        self.public_addr
    }
    pub fn local_addr(&self) -> SocketAddr {
        self.session.local_addr()
    }
    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            peer_id: self.peer_id.clone(),
            writer: self.session.writer(),
        }
    }

    /// Read the control connection until the server closes it or the transport
    /// fails. Malformed lines are logged and skipped.
    pub async fn run(mut self) -> Result<()> {
        let rs = loop {
            match self.session.receive().await {
                Ok(Some(envelope)) => {
                    if let Err(e) = self.handle_envelope(envelope).await {
                        break Err(e);
                    }
                }
                Ok(None) => {
                    log::info!("Server closed the connection");
                    break Ok(());
                }
                Err(e) if e.is_recoverable() => {
                    log::warn!("invalid message from server: {e}");
                }
                Err(e) => break Err(e),
            }
        };
        self.session.close().await;
        rs
    }

    async fn handle_envelope(&self, envelope: Envelope) -> Result<()> {
        match envelope {
            Envelope::ConnectReady {
                target_id,
                target_addr,
            } => {
                log::info!("Received peer public address: {target_addr}");
                self.session
                    .send(&Envelope::punch_request(
                        target_id,
                        target_addr.port(),
                        target_addr,
                    ))
                    .await?;
            }
            Envelope::Punch {
                peer_id: Some(peer_id),
                port,
                target_addr: Some(target_addr),
                ..
            } => {
                log::info!(
                    "Received punch request from {peer_id} at {target_addr} (announced port {port:?})"
                );
                self.start_traversal(peer_id, target_addr);
            }
            Envelope::Punch { .. } => {
                log::error!("Missing peer_id or target_addr in punch message");
            }
            Envelope::Error { message } => {
                log::error!("Received error: {message}");
            }
            envelope => {
                log::debug!("ignore {} from server", envelope.kind());
            }
        }
        Ok(())
    }

    fn punch_local_addr(&self, target: SocketAddr) -> SocketAddr {
        let port = self
            .config
            .punch_port
            .unwrap_or_else(|| self.session.local_addr().port());
        let ip = match (self.config.punch_ip, target) {
            (IpAddr::V4(ip), SocketAddr::V6(_)) if ip == Ipv4Addr::UNSPECIFIED => {
                IpAddr::V6(Ipv6Addr::UNSPECIFIED)
            }
            (ip, _) => ip,
        };
        SocketAddr::new(ip, port)
    }

    fn start_traversal(&self, peer_id: PeerId, target: SocketAddr) {
        if !self.pending.lock().insert(peer_id.clone()) {
            log::debug!("hole punch to {peer_id} already running");
            return;
        }
        let local = self.punch_local_addr(target);
        let config = self.config.tcp_punch;
        let pending = self.pending.clone();
        let handler = self.handler.clone();
        tokio::spawn(async move {
            let rs = tcp_hole_punch(local, target, &config).await;
            pending.lock().remove(&peer_id);
            match rs {
                Ok(stream) => {
                    log::info!(
                        "TCP hole punch successful: {:?} <-> {:?}",
                        stream.local_addr(),
                        stream.peer_addr()
                    );
                    if let Some(handler) = handler {
                        handler.on_connected(peer_id, stream).await;
                    }
                }
                Err(e) => match handler {
                    Some(handler) => handler.on_failed(peer_id, e.into()).await,
                    None => log::warn!("TCP hole punch to {peer_id} failed: {e}"),
                },
            }
        });
    }
}

/// Sends requests over a running client's control connection.
#[derive(Clone)]
pub struct ClientHandle {
    peer_id: PeerId,
    writer: SessionWriter,
}

impl ClientHandle {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }
    /// Ask the server to introduce this client to `target_id`.
    pub async fn connect_to_peer(&self, target_id: impl Into<PeerId>) -> Result<()> {
        let target_id = target_id.into();
        log::info!("Requesting connection to {target_id}");
        self.writer.send(&Envelope::connect(target_id)).await
    }
    /// Close the control connection; [`Client::run`] returns once the server
    /// closes its side.
    pub async fn shutdown(&self) {
        self.writer.close().await
    }
}
