use anyhow::Context;
use socket2::{Domain, Protocol, Type};
use std::net::SocketAddr;

fn new_socket(addr: &SocketAddr, ty: Type, protocol: Protocol) -> anyhow::Result<socket2::Socket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = socket2::Socket::new(domain, ty, Some(protocol))?;
    if addr.is_ipv6() {
        socket
            .set_only_v6(false)
            .with_context(|| format!("set_only_v6 failed: {}", addr))?;
    }
    Ok(socket)
}

fn set_reuse(socket: &socket2::Socket) -> anyhow::Result<()> {
    socket
        .set_reuse_address(true)
        .context("set_reuse_address")?;
    #[cfg(unix)]
    if let Err(e) = socket.set_reuse_port(true) {
        log::warn!("set_reuse_port {:?}", e)
    }
    Ok(())
}

/// Create a TCP socket that shares its local port with other reusing sockets.
///
/// An unspecified port in `bind` lets the kernel pick one; the socket is still
/// bound explicitly so that a listener can later join the same port.
pub fn create_tcp(bind: SocketAddr, ttl: Option<u32>) -> anyhow::Result<tokio::net::TcpSocket> {
    let socket = new_socket(&bind, Type::STREAM, Protocol::TCP)?;
    set_reuse(&socket)?;
    socket
        .bind(&bind.into())
        .with_context(|| format!("bind tcp {}", bind))?;
    if let Some(ttl) = ttl {
        socket.set_ttl(ttl)?;
    }
    socket.set_nonblocking(true)?;
    socket.set_nodelay(true)?;
    Ok(tokio::net::TcpSocket::from_std_stream(socket.into()))
}

/// Connect to `addr` from a reusable local port, see [`create_tcp`].
pub async fn connect_tcp(
    addr: SocketAddr,
    bind: SocketAddr,
) -> crate::error::Result<tokio::net::TcpStream> {
    let socket = create_tcp(bind, None)?;
    Ok(socket.connect(addr).await?)
}

pub fn create_tcp_listener(addr: SocketAddr) -> anyhow::Result<std::net::TcpListener> {
    let socket = new_socket(&addr, Type::STREAM, Protocol::TCP)?;
    set_reuse(&socket)?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("bind tcp listener {}", addr))?;
    socket.listen(128)?;
    socket.set_nonblocking(true)?;
    socket.set_nodelay(true)?;
    Ok(socket.into())
}

pub fn bind_udp(addr: SocketAddr) -> anyhow::Result<socket2::Socket> {
    let socket = new_socket(&addr, Type::DGRAM, Protocol::UDP)?;
    socket.set_nonblocking(true)?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("bind_udp {}", addr))?;
    Ok(socket)
}

/// The wildcard address of the same family as `addr`.
pub fn unspecified_for(addr: &SocketAddr) -> SocketAddr {
    if addr.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listener_and_connector_share_port() {
        let listener = create_tcp_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let port = listener.local_addr().unwrap().port();
        let socket = create_tcp(SocketAddr::from(([127, 0, 0, 1], port)), None).unwrap();
        assert_eq!(socket.local_addr().unwrap().port(), port);
    }

    #[test]
    fn bind_udp_ephemeral() {
        let socket = bind_udp("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = socket.local_addr().unwrap().as_socket().unwrap();
        assert_ne!(addr.port(), 0);
    }
}
