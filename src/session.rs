//! One live control connection.
//!
//! A [`PeerSession`] owns the read half of its transport and reads envelopes in
//! arrival order. The write half lives in a [`SessionWriter`], which can be cloned
//! and handed to other tasks (the registry keeps one per registered peer); every
//! send writes one whole framed envelope under a lock.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_lock::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::protocol::{Envelope, MAX_ENVELOPE_LEN};

pub struct PeerSession {
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    reader: BufReader<OwnedReadHalf>,
    writer: SessionWriter,
    line: Vec<u8>,
}

impl PeerSession {
    pub fn new(stream: TcpStream) -> io::Result<PeerSession> {
        let remote_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(PeerSession {
            remote_addr,
            local_addr,
            reader: BufReader::new(read_half),
            writer: SessionWriter::new(remote_addr, write_half),
            line: Vec::with_capacity(256),
        })
    }

    /// Open a control connection from a reusable local port, so the same port
    /// can later take part in a TCP hole punch.
    pub async fn connect(addr: SocketAddr) -> Result<PeerSession> {
        let bind = holepunch_core::socket::unspecified_for(&addr);
        let stream = holepunch_core::socket::connect_tcp(addr, bind).await?;
        Ok(PeerSession::new(stream)?)
    }

    /// The peer's endpoint as seen on this connection.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
    pub fn writer(&self) -> SessionWriter {
        self.writer.clone()
    }

    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        self.writer.send(envelope).await
    }

    /// Wait for the next line.
    ///
    /// `Ok(None)` is a clean end of stream. A line that fails to parse is
    /// reported as [`Error::MalformedEnvelope`] and the session stays usable.
    pub async fn receive(&mut self) -> Result<Option<Envelope>> {
        self.line.clear();
        let len = (&mut self.reader)
            .take(MAX_ENVELOPE_LEN as u64)
            .read_until(b'\n', &mut self.line)
            .await
            .map_err(Error::ReceiveFailed)?;
        if len == 0 {
            return Ok(None);
        }
        if len == MAX_ENVELOPE_LEN && self.line.last() != Some(&b'\n') {
            return Err(Error::MalformedEnvelope(format!(
                "line longer than {MAX_ENVELOPE_LEN} bytes"
            )));
        }
        Envelope::decode(&self.line).map(Some)
    }

    /// Shut the transport down. Safe to call more than once.
    pub async fn close(&self) {
        self.writer.close().await
    }
}

#[derive(Clone)]
pub struct SessionWriter {
    remote_addr: SocketAddr,
    inner: Arc<Mutex<Option<OwnedWriteHalf>>>,
}

impl SessionWriter {
    fn new(remote_addr: SocketAddr, write_half: OwnedWriteHalf) -> Self {
        Self {
            remote_addr,
            inner: Arc::new(Mutex::new(Some(write_half))),
        }
    }
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
    /// Write one framed envelope and flush it.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        let buf = envelope.encode()?;
        let mut guard = self.inner.lock().await;
        let Some(write_half) = guard.as_mut() else {
            return Err(Error::SendFailed(io::Error::new(
                io::ErrorKind::NotConnected,
                "session closed",
            )));
        };
        write_half.write_all(&buf).await.map_err(Error::SendFailed)?;
        write_half.flush().await.map_err(Error::SendFailed)
    }
    pub async fn close(&self) {
        let write_half = self.inner.lock().await.take();
        if let Some(mut write_half) = write_half {
            if let Err(e) = write_half.shutdown().await {
                log::debug!("shutdown {}: {e:?}", self.remote_addr);
            }
        }
    }
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}
