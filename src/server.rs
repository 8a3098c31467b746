//! Rendezvous server.
//!
//! Accepts control connections, registers peers under the endpoint it observes
//! and routes `connect` and `punch` messages between them. Every connection is
//! served on its own task; a failing peer never stops the accept loop.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::protocol::{Envelope, PeerId};
use crate::registry::Registry;
use crate::session::PeerSession;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

pub struct Server {
    listener: TcpListener,
    registry: Registry,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Server> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        Ok(Server {
            listener,
            registry: Registry::new(),
        })
    }
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }
    /// Run the accept loop. Only returns if the listener itself cannot be polled.
    pub async fn serve(self) -> Result<()> {
        log::info!("Server listening on {}", self.listener.local_addr()?);
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(rs) => rs,
                Err(e) => {
                    log::warn!("accept {e:?}");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };
            log::info!("New connection from {addr}");
            let registry = self.registry.clone();
            tokio::spawn(async move {
                match PeerSession::new(stream) {
                    Ok(session) => handle_connection(registry, session).await,
                    Err(e) => log::warn!("session {addr}: {e:?}"),
                }
            });
        }
    }
}

enum SessionState {
    Connected,
    Registered(PeerId),
}

async fn handle_connection(registry: Registry, mut session: PeerSession) {
    let addr = session.remote_addr();
    let mut state = SessionState::Connected;
    loop {
        let envelope = match session.receive().await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => break,
            Err(e) if e.is_recoverable() => {
                log::warn!("invalid message from {addr}: {e}");
                continue;
            }
            Err(e) => {
                log::warn!("receive from {addr}: {e}");
                break;
            }
        };
        if let Err(e) = dispatch(&registry, &session, &mut state, envelope).await {
            if e.is_recoverable() {
                log::info!("{addr}: {e}");
                continue;
            }
            log::warn!("{addr}: {e}");
            break;
        }
    }
    if let SessionState::Registered(peer_id) = &state {
        registry.remove(peer_id).await;
    }
    session.close().await;
}

async fn dispatch(
    registry: &Registry,
    session: &PeerSession,
    state: &mut SessionState,
    envelope: Envelope,
) -> Result<()> {
    let registered = match state {
        SessionState::Registered(peer_id) => Some(peer_id.clone()),
        SessionState::Connected => None,
    };
    match (envelope, registered) {
        (Envelope::Register, _) => {
            let peer_id = registry.handle_register(session).await?;
            *state = SessionState::Registered(peer_id);
        }
        (Envelope::Connect { target_id }, Some(peer_id)) => {
            let target_id = target_id.unwrap_or_default();
            registry.handle_connect(&peer_id, &target_id).await?;
        }
        (Envelope::Punch { target_id, port, .. }, Some(peer_id)) => {
            registry
                .handle_punch(&peer_id, target_id.as_ref(), port)
                .await;
        }
        (envelope, _) => {
            log::debug!(
                "ignore {} from {}",
                envelope.kind(),
                session.remote_addr()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    use super::*;
    use crate::protocol::TARGET_NOT_FOUND;

    async fn start_server() -> (SocketAddr, Registry) {
        let config = ServerConfig::default().set_listen_addr("127.0.0.1:0".parse().unwrap());
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let registry = server.registry();
        tokio::spawn(server.serve());
        (addr, registry)
    }

    async fn register(server: SocketAddr) -> (PeerSession, PeerId) {
        let mut session = PeerSession::connect(server).await.unwrap();
        session.send(&Envelope::Register).await.unwrap();
        match session.receive().await.unwrap() {
            Some(Envelope::RegisterAck {
                peer_id,
                public_addr,
            }) => {
                assert_eq!(public_addr, session.local_addr());
                (session, peer_id)
            }
            other => panic!("expected register_ack, got {other:?}"),
        }
    }

    async fn nothing_within(session: &mut PeerSession, wait: Duration) -> bool {
        tokio::time::timeout(wait, session.receive()).await.is_err()
    }

    #[tokio::test]
    async fn peer_id_is_observed_endpoint() {
        let (server, registry) = start_server().await;
        let (session, peer_id) = register(server).await;
        assert_eq!(peer_id, PeerId::from(session.local_addr()));
        assert!(registry.contains(&peer_id));
    }

    #[tokio::test]
    async fn connect_introduces_both_sides() {
        let (server, _registry) = start_server().await;
        let (mut a, a_id) = register(server).await;
        let (mut b, b_id) = register(server).await;
        a.send(&Envelope::connect(b_id.clone())).await.unwrap();
        assert_eq!(
            a.receive().await.unwrap(),
            Some(Envelope::ConnectReady {
                target_id: b_id,
                target_addr: b.local_addr(),
            })
        );
        assert_eq!(
            b.receive().await.unwrap(),
            Some(Envelope::ConnectReady {
                target_id: a_id,
                target_addr: a.local_addr(),
            })
        );
    }

    #[tokio::test]
    async fn unknown_target_errors_to_requester_only() {
        let (server, _registry) = start_server().await;
        let (mut a, _) = register(server).await;
        let (mut b, _) = register(server).await;
        a.send(&Envelope::connect("127.0.0.1:1")).await.unwrap();
        assert_eq!(
            a.receive().await.unwrap(),
            Some(Envelope::error(TARGET_NOT_FOUND))
        );
        assert!(nothing_within(&mut a, Duration::from_millis(200)).await);
        assert!(nothing_within(&mut b, Duration::from_millis(200)).await);
    }

    #[tokio::test]
    async fn disconnected_peer_is_unreachable() {
        let (server, registry) = start_server().await;
        let (mut a, _) = register(server).await;
        let (b, b_id) = register(server).await;
        b.close().await;
        drop(b);
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.contains(&b_id) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        a.send(&Envelope::connect(b_id)).await.unwrap();
        assert_eq!(
            a.receive().await.unwrap(),
            Some(Envelope::error(TARGET_NOT_FOUND))
        );
    }

    #[tokio::test]
    async fn punch_is_forwarded_with_requester_address() {
        let (server, _registry) = start_server().await;
        let (mut a, a_id) = register(server).await;
        let (mut b, b_id) = register(server).await;
        a.send(&Envelope::punch_request(b_id, 4321, b.local_addr()))
            .await
            .unwrap();
        assert_eq!(
            b.receive().await.unwrap(),
            Some(Envelope::punch_announce(a_id, 4321, a.local_addr()))
        );
        // unknown target is dropped without a reply
        a.send(&Envelope::punch_request(
            PeerId::from("127.0.0.1:1"),
            4321,
            b.local_addr(),
        ))
        .await
        .unwrap();
        assert!(nothing_within(&mut a, Duration::from_millis(200)).await);
    }

    #[tokio::test]
    async fn connect_before_register_is_ignored() {
        let (server, registry) = start_server().await;
        let (_b, b_id) = register(server).await;
        let mut c = PeerSession::connect(server).await.unwrap();
        c.send(&Envelope::connect(b_id)).await.unwrap();
        assert!(nothing_within(&mut c, Duration::from_millis(200)).await);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn reset_during_register_leaves_no_entry() {
        let (server, registry) = start_server().await;
        for _ in 0..20 {
            let mut stream = TcpStream::connect(server).await.unwrap();
            stream.write_all(b"{\"type\":\"register\"}\n").await.unwrap();
            #[allow(deprecated)]
            stream.set_linger(Some(Duration::ZERO)).unwrap();
            drop(stream);
        }
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                tokio::time::sleep(Duration::from_millis(50)).await;
                if registry.is_empty() {
                    break;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("stale ids {:?}", registry.peer_ids()));
    }

    #[tokio::test]
    async fn malformed_line_keeps_session() {
        let (server, _registry) = start_server().await;
        let mut stream = TcpStream::connect(server).await.unwrap();
        stream.write_all(b"{not json\n").await.unwrap();
        let mut session = PeerSession::new(stream).unwrap();
        session.send(&Envelope::Register).await.unwrap();
        assert!(matches!(
            session.receive().await.unwrap(),
            Some(Envelope::RegisterAck { .. })
        ));
    }
}
