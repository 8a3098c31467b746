use std::io;
use std::time::Duration;

pub(crate) const UDP_PUNCH_RETRIES: usize = 5;
pub(crate) const UDP_PUNCH_TIMEOUT: Duration = Duration::from_secs(1);
pub(crate) const TCP_PUNCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug)]
pub struct UdpPunchConfig {
    /// Number of `punch` datagrams sent before giving up.
    pub retries: usize,
    /// How long each attempt waits for `punch_ack`.
    pub timeout: Duration,
}

impl Default for UdpPunchConfig {
    fn default() -> Self {
        Self {
            retries: UDP_PUNCH_RETRIES,
            timeout: UDP_PUNCH_TIMEOUT,
        }
    }
}

impl UdpPunchConfig {
    pub fn set_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }
    pub fn set_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
    pub fn check(&self) -> io::Result<()> {
        if self.retries == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "retries must be greater than 0",
            ));
        }
        if self.timeout.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "timeout must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TcpPunchConfig {
    /// Deadline shared by the inbound accept and the outbound connect.
    pub timeout: Duration,
    pub ttl: Option<u32>,
}

impl Default for TcpPunchConfig {
    fn default() -> Self {
        Self {
            timeout: TCP_PUNCH_TIMEOUT,
            ttl: None,
        }
    }
}

impl TcpPunchConfig {
    pub fn set_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
    pub fn set_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }
    pub fn check(&self) -> io::Result<()> {
        if self.timeout.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "timeout must be greater than 0",
            ));
        }
        Ok(())
    }
}
