use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

use crate::error::{Error, Result};
use crate::punch::config::TcpPunchConfig;
use crate::socket::{create_tcp, create_tcp_listener};

/// TCP simultaneous open towards `target` from `local`.
///
/// A listener and an outbound connect share the local port and race under one
/// deadline. The first to succeed wins and the other is dropped on the spot,
/// which closes its socket. If both are ready in the same poll the inbound
/// connection is kept. On failure nothing stays bound to `local`.
pub async fn tcp_hole_punch(
    local: SocketAddr,
    target: SocketAddr,
    config: &TcpPunchConfig,
) -> Result<TcpStream> {
    let listener = TcpListener::from_std(create_tcp_listener(local)?)?;
    let bind = listener.local_addr()?;
    let socket = create_tcp(bind, config.ttl)?;

    let race = async {
        let accept = listener.accept();
        let connect = socket.connect(target);
        tokio::pin!(accept, connect);
        let mut accepting = true;
        let mut connecting = true;
        loop {
            tokio::select! {
                biased;
                rs = &mut accept, if accepting => match rs {
                    Ok((stream, addr)) => {
                        log::info!("tcp punch {bind}: accepted inbound from {addr}");
                        return Some(stream);
                    }
                    Err(e) => {
                        log::debug!("tcp punch {bind}: accept {e:?}");
                        accepting = false;
                    }
                },
                rs = &mut connect, if connecting => match rs {
                    Ok(stream) => {
                        log::info!("tcp punch {bind}: outbound connected to {target}");
                        return Some(stream);
                    }
                    Err(e) => {
                        log::debug!("tcp punch {bind}: connect {target} {e:?}");
                        connecting = false;
                    }
                },
                else => return None,
            }
        }
    };

    match tokio::time::timeout(config.timeout, race).await {
        Ok(Some(stream)) => {
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(None) => {
            log::warn!("tcp punch {bind} -> {target}: both attempts failed");
            Err(Error::TraversalFailed { target })
        }
        Err(_) => {
            log::warn!(
                "tcp punch {bind} -> {target}: timed out after {:?}",
                config.timeout
            );
            Err(Error::TraversalFailed { target })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn closed_port_addr() -> SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    #[tokio::test]
    async fn outbound_wins_when_target_listens() {
        let target = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target.local_addr().unwrap();
        let local = closed_port_addr();
        let config = TcpPunchConfig::default().set_timeout(Duration::from_secs(2));

        let (punched, accepted) = tokio::join!(
            tcp_hole_punch(local, target_addr, &config),
            target.accept()
        );
        let mut punched = punched.unwrap();
        let (mut accepted, from) = accepted.unwrap();
        assert_eq!(punched.peer_addr().unwrap(), target_addr);
        assert_eq!(from, punched.local_addr().unwrap());

        punched.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        accepted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn inbound_wins_when_target_unreachable() {
        let local = closed_port_addr();
        let target = closed_port_addr();
        let config = TcpPunchConfig::default().set_timeout(Duration::from_secs(3));
        let punch = tokio::spawn(async move { tcp_hole_punch(local, target, &config).await });

        let mut client = None;
        for _ in 0..50 {
            match TcpStream::connect(local).await {
                Ok(stream) => {
                    client = Some(stream);
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        let client = client.expect("listener never came up");
        let punched = punch.await.unwrap().unwrap();
        assert_eq!(punched.peer_addr().unwrap(), client.local_addr().unwrap());
    }

    #[tokio::test]
    async fn neither_side_fails_and_releases_port() {
        let local = closed_port_addr();
        let target = closed_port_addr();
        let config = TcpPunchConfig::default().set_timeout(Duration::from_millis(300));
        let start = Instant::now();
        let rs = tcp_hole_punch(local, target, &config).await;
        assert!(matches!(rs, Err(Error::TraversalFailed { target: t }) if t == target));
        assert!(start.elapsed() < Duration::from_secs(2));
        std::net::TcpListener::bind(local).expect("port still held after failed punch");
    }
}
