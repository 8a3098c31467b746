//! Relay forwarder.
//!
//! Accepts clients on a listening address and, for every client, opens one new
//! connection to a fixed target and copies bytes both ways until either side goes
//! away. Usable as a fallback after a failed traversal or as a standalone proxy.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{Error, Result};

pub(crate) const CHUNK_SIZE: usize = 4096;
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const LINGER: Duration = Duration::from_secs(5);
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    pub target_host: String,
    pub target_port: u16,
    /// Upper bound of a single read in either direction.
    pub chunk_size: usize,
    pub connect_timeout: Duration,
    /// How long the surviving direction may keep copying once the other one ended.
    pub linger: Duration,
}

impl RelayConfig {
    pub fn new(listen_addr: SocketAddr, target_host: impl Into<String>, target_port: u16) -> Self {
        Self {
            listen_addr,
            target_host: target_host.into(),
            target_port,
            chunk_size: CHUNK_SIZE,
            connect_timeout: CONNECT_TIMEOUT,
            linger: LINGER,
        }
    }
    pub fn set_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
    pub fn set_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
    pub fn set_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }
    pub fn target(&self) -> String {
        format!("{}:{}", self.target_host, self.target_port)
    }
    pub fn check(&self) -> io::Result<()> {
        if self.chunk_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "chunk_size must be greater than 0",
            ));
        }
        if self.target_host.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "target_host is required",
            ));
        }
        Ok(())
    }
}

pub struct RelayServer {
    listener: TcpListener,
    config: Arc<RelayConfig>,
}

impl RelayServer {
    pub async fn bind(config: RelayConfig) -> Result<RelayServer> {
        config.check()?;
        let listener = TcpListener::bind(config.listen_addr).await?;
        Ok(RelayServer {
            listener,
            config: Arc::new(config),
        })
    }
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
    /// Accept clients until the future is dropped. Per-client failures never stop the loop.
    pub async fn serve(self) -> Result<()> {
        log::info!(
            "TCP relay listening on {}, forwarding to {}",
            self.local_addr()?,
            self.config.target()
        );
        loop {
            let (client, addr) = match self.listener.accept().await {
                Ok(rs) => rs,
                Err(e) => {
                    log::warn!("relay accept {e:?}");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };
            log::info!("relay accepted connection from {addr}");
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_client(client, addr, &config).await {
                    log::warn!("relay client {addr}: {e}");
                }
                log::info!("relay closed client connection {addr}");
            });
        }
    }
}

/// Bind the relay described by `config` and serve it forever.
pub async fn start(config: RelayConfig) -> Result<()> {
    RelayServer::bind(config).await?.serve().await
}

async fn connect_target(config: &RelayConfig) -> Result<TcpStream> {
    let target = config.target();
    let connect = TcpStream::connect((config.target_host.as_str(), config.target_port));
    let rs = match tokio::time::timeout(config.connect_timeout, connect).await {
        Ok(rs) => rs,
        Err(_) => Err(io::Error::from(io::ErrorKind::TimedOut)),
    };
    rs.map_err(|source| Error::RelayConnectFailed { target, source })
}

async fn handle_client(mut client: TcpStream, addr: SocketAddr, config: &RelayConfig) -> Result<()> {
    let target = match connect_target(config).await {
        Ok(target) => target,
        Err(e) => {
            let line = format!("Relay error: cannot connect to {}\n", config.target());
            if let Err(write_err) = client.write_all(line.as_bytes()).await {
                log::debug!("relay client {addr}: {write_err:?}");
            }
            if let Err(shutdown_err) = client.shutdown().await {
                log::debug!("relay client {addr} shutdown: {shutdown_err:?}");
            }
            return Err(e);
        }
    };
    log::info!("relay {addr} connected to target {}", config.target());
    forward(client, target, config).await;
    Ok(())
}

/// Copy both directions between `client` and `target`.
///
/// When one direction ends its destination write side is shut down, the other
/// direction gets at most `linger` to finish, then both connections are dropped.
async fn forward(client: TcpStream, target: TcpStream, config: &RelayConfig) {
    let (mut client_read, mut client_write) = client.into_split();
    let (mut target_read, mut target_write) = target.into_split();
    let upstream = copy_half(&mut client_read, &mut target_write, config.chunk_size);
    let downstream = copy_half(&mut target_read, &mut client_write, config.chunk_size);
    tokio::pin!(upstream, downstream);
    let rest = tokio::select! {
        rs = &mut upstream => {
            log_copy("client -> target", rs);
            tokio::time::timeout(config.linger, &mut downstream).await
        }
        rs = &mut downstream => {
            log_copy("target -> client", rs);
            tokio::time::timeout(config.linger, &mut upstream).await
        }
    };
    match rest {
        Ok(rs) => log_copy("remaining direction", rs),
        Err(_) => log::debug!("relay linger {:?} expired", config.linger),
    }
}

fn log_copy(direction: &str, rs: io::Result<u64>) {
    match rs {
        Ok(n) => log::debug!("relay {direction} done, {n} bytes"),
        Err(e) => log::info!("relay {direction} error: {e}"),
    }
}

/// Read up to `chunk_size` at a time from `reader` into `writer` until EOF.
/// The write side of `writer` is shut down on every exit path.
pub async fn copy_half<R, W>(reader: &mut R, writer: &mut W, chunk_size: usize) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(chunk_size);
    let rs = copy_chunks(reader, writer, &mut buf).await;
    if let Err(e) = writer.shutdown().await {
        log::debug!("relay shutdown write side: {e:?}");
    }
    rs
}

async fn copy_chunks<R, W>(reader: &mut R, writer: &mut W, buf: &mut BytesMut) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    loop {
        buf.clear();
        let len = reader.read_buf(buf).await?;
        if len == 0 {
            return Ok(total);
        }
        writer.write_all(&buf[..]).await?;
        total += len as u64;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::Rng;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    async fn target_and_relay(linger: Duration) -> (TcpListener, SocketAddr) {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_port = target.local_addr().unwrap().port();
        let config = RelayConfig::new("127.0.0.1:0".parse().unwrap(), "127.0.0.1", target_port)
            .set_linger(linger);
        let relay = RelayServer::bind(config).await.unwrap();
        let relay_addr = relay.local_addr().unwrap();
        tokio::spawn(relay.serve());
        (target, relay_addr)
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn write_in_random_chunks(stream: &mut TcpStream, data: &[u8]) {
        let mut offset = 0;
        while offset < data.len() {
            let n = rand::thread_rng().gen_range(1..=1500).min(data.len() - offset);
            stream.write_all(&data[offset..offset + n]).await.unwrap();
            offset += n;
        }
    }

    #[tokio::test]
    async fn forwards_multi_chunk_payload_both_ways() {
        let (target, relay_addr) = target_and_relay(Duration::from_secs(5)).await;
        let mut client = TcpStream::connect(relay_addr).await.unwrap();
        let (mut server_side, _) = target.accept().await.unwrap();

        let up = payload(10000);
        write_in_random_chunks(&mut client, &up).await;
        let mut received = vec![0u8; up.len()];
        server_side.read_exact(&mut received).await.unwrap();
        assert_eq!(received, up);

        let down: Vec<u8> = payload(10000).into_iter().rev().collect();
        write_in_random_chunks(&mut server_side, &down).await;
        let mut received = vec![0u8; down.len()];
        client.read_exact(&mut received).await.unwrap();
        assert_eq!(received, down);
    }

    #[tokio::test]
    async fn client_close_closes_target() {
        let (target, relay_addr) = target_and_relay(Duration::from_millis(500)).await;
        let client = TcpStream::connect(relay_addr).await.unwrap();
        let (mut server_side, _) = target.accept().await.unwrap();
        drop(client);
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), server_side.read(&mut buf))
            .await
            .expect("target side not closed")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn target_close_closes_client() {
        let (target, relay_addr) = target_and_relay(Duration::from_millis(500)).await;
        let mut client = TcpStream::connect(relay_addr).await.unwrap();
        let (server_side, _) = target.accept().await.unwrap();
        drop(server_side);
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("client side not closed")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn unreachable_target_reports_and_keeps_listening() {
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let closed_port = closed.local_addr().unwrap().port();
        drop(closed);
        let config = RelayConfig::new("127.0.0.1:0".parse().unwrap(), "127.0.0.1", closed_port)
            .set_connect_timeout(Duration::from_secs(2));
        let relay = RelayServer::bind(config).await.unwrap();
        let relay_addr = relay.local_addr().unwrap();
        tokio::spawn(relay.serve());

        for _ in 0..2 {
            let mut client = TcpStream::connect(relay_addr).await.unwrap();
            let mut line = String::new();
            tokio::time::timeout(Duration::from_secs(3), client.read_to_string(&mut line))
                .await
                .unwrap()
                .unwrap();
            assert!(line.starts_with("Relay error"));
            assert!(line.ends_with('\n'));
        }
    }

    #[test]
    fn config_rejects_zero_chunk() {
        let config = RelayConfig::new("127.0.0.1:0".parse().unwrap(), "localhost", 80)
            .set_chunk_size(0);
        assert!(config.check().is_err());
    }
}
