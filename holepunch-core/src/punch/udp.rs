use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::error::Result;
use crate::punch::config::UdpPunchConfig;
use crate::socket::bind_udp;

pub const PUNCH: &[u8] = b"punch";
pub const PUNCH_ACK: &[u8] = b"punch_ack";

const RECV_BUF_LEN: usize = 1024;

/// Bind a non-blocking UDP socket for punching; port 0 picks an ephemeral port.
///
/// Returns the socket together with the port it is actually bound to.
pub fn create_punch_socket(ip: IpAddr, port: u16) -> Result<(UdpSocket, u16)> {
    let socket = bind_udp(SocketAddr::new(ip, port))?;
    let socket = UdpSocket::from_std(socket.into())?;
    let port = socket.local_addr()?.port();
    Ok((socket, port))
}

/// Send `punch` to `target` until a `punch_ack` comes back or the retries run out.
///
/// A `punch` received while waiting is answered with `punch_ack`, so two peers
/// punching towards each other both see an ack. The socket is never closed here.
pub async fn punch_hole(socket: &UdpSocket, target: SocketAddr, config: &UdpPunchConfig) -> bool {
    let mut buf = [0u8; RECV_BUF_LEN];
    for attempt in 1..=config.retries {
        if let Err(e) = socket.send_to(PUNCH, target).await {
            log::error!(
                "punch {target} attempt {attempt}/{}: {e:?}",
                config.retries
            );
            continue;
        }
        match tokio::time::timeout(config.timeout, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, addr))) => {
                let data = &buf[..len];
                if data == PUNCH_ACK {
                    log::info!("NAT hole punch successful with {addr}");
                    return true;
                }
                if data == PUNCH {
                    if let Err(e) = socket.send_to(PUNCH_ACK, addr).await {
                        log::warn!("punch_ack {addr}: {e:?}");
                    }
                } else {
                    log::debug!("unexpected datagram from {addr}, len={len}");
                }
            }
            Ok(Err(e)) => {
                log::error!(
                    "punch {target} attempt {attempt}/{}: {e:?}",
                    config.retries
                );
            }
            Err(_) => {
                log::debug!(
                    "punch {target} attempt {attempt}/{} timed out",
                    config.retries
                );
            }
        }
    }
    log::warn!(
        "NAT hole punch to {target} failed after {} retries",
        config.retries
    );
    false
}

/// Wait up to `timeout` for a `punch` and answer it with `punch_ack`.
///
/// Other datagrams are ignored. Returns the address that punched, if any.
pub async fn respond_punch(socket: &UdpSocket, timeout: Duration) -> Result<Option<SocketAddr>> {
    match tokio::time::timeout(timeout, answer_punch(socket)).await {
        Ok(rs) => Ok(Some(rs?)),
        Err(_) => Ok(None),
    }
}

async fn answer_punch(socket: &UdpSocket) -> io::Result<SocketAddr> {
    let mut buf = [0u8; RECV_BUF_LEN];
    loop {
        let (len, addr) = socket.recv_from(&mut buf).await?;
        if &buf[..len] == PUNCH {
            socket.send_to(PUNCH_ACK, addr).await?;
            return Ok(addr);
        }
        log::debug!("ignore datagram from {addr}, len={len}");
    }
}

/// Bind a fresh punch socket on `local_ip` and punch towards `target`.
///
/// The socket is returned only if the punch succeeded.
pub async fn establish_p2p_connection(
    local_ip: IpAddr,
    target: SocketAddr,
    config: &UdpPunchConfig,
) -> Option<UdpSocket> {
    let (socket, port) = match create_punch_socket(local_ip, 0) {
        Ok(rs) => rs,
        Err(e) => {
            log::error!("failed to establish P2P connection to {target}: {e:?}");
            return None;
        }
    };
    log::info!("created local punch socket on port {port}");
    if punch_hole(&socket, target, config).await {
        Some(socket)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::{Duration, Instant};

    use super::*;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn create_socket_reports_port() {
        let (socket, port) = create_punch_socket(LOCALHOST, 0).unwrap();
        assert!(port > 0);
        assert_eq!(socket.local_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn silent_peer_fails_in_bounded_time() {
        let (socket, _) = create_punch_socket(LOCALHOST, 0).unwrap();
        let (silent, silent_port) = create_punch_socket(LOCALHOST, 0).unwrap();
        let config = UdpPunchConfig::default()
            .set_retries(1)
            .set_timeout(Duration::from_millis(200));
        let start = Instant::now();
        let ok = punch_hole(&socket, SocketAddr::new(LOCALHOST, silent_port), &config).await;
        assert!(!ok);
        assert!(start.elapsed() < Duration::from_secs(1));
        drop(silent);
    }

    #[tokio::test]
    async fn cooperating_peer_acks_first_attempt() {
        let (socket, _) = create_punch_socket(LOCALHOST, 0).unwrap();
        let (peer, peer_port) = create_punch_socket(LOCALHOST, 0).unwrap();
        let responder =
            tokio::spawn(async move { respond_punch(&peer, Duration::from_secs(5)).await });
        let config = UdpPunchConfig::default().set_timeout(Duration::from_secs(2));
        let start = Instant::now();
        let ok = punch_hole(&socket, SocketAddr::new(LOCALHOST, peer_port), &config).await;
        assert!(ok);
        assert!(start.elapsed() < config.timeout);
        let punched_from = responder.await.unwrap().unwrap();
        assert_eq!(punched_from, Some(socket.local_addr().unwrap()));
    }

    #[tokio::test]
    async fn both_sides_punching_succeed() {
        let (a, a_port) = create_punch_socket(LOCALHOST, 0).unwrap();
        let (b, b_port) = create_punch_socket(LOCALHOST, 0).unwrap();
        let config = UdpPunchConfig::default().set_timeout(Duration::from_millis(500));
        let (ok_a, ok_b) = tokio::join!(
            punch_hole(&a, SocketAddr::new(LOCALHOST, b_port), &config),
            punch_hole(&b, SocketAddr::new(LOCALHOST, a_port), &config)
        );
        assert!(ok_a && ok_b);
    }

    #[tokio::test]
    async fn establish_without_peer_returns_none() {
        let (silent, silent_port) = create_punch_socket(LOCALHOST, 0).unwrap();
        let config = UdpPunchConfig::default()
            .set_retries(2)
            .set_timeout(Duration::from_millis(100));
        let socket =
            establish_p2p_connection(LOCALHOST, SocketAddr::new(LOCALHOST, silent_port), &config)
                .await;
        assert!(socket.is_none());
        drop(silent);
    }
}
