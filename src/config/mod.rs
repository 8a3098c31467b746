use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

pub use holepunch_core::punch::{TcpPunchConfig, UdpPunchConfig};
pub use holepunch_core::relay::RelayConfig;

pub(crate) const DEFAULT_PORT: u16 = 8000;
pub(crate) const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
        }
    }
}

impl ServerConfig {
    pub fn set_listen_addr(mut self, listen_addr: SocketAddr) -> Self {
        self.listen_addr = listen_addr;
        self
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub server_host: String,
    pub server_port: u16,
    /// Local address the TCP race binds on.
    pub punch_ip: IpAddr,
    /// Local port for the TCP race; `None` reuses the control connection's port.
    pub punch_port: Option<u16>,
    /// How long to wait for `register_ack`.
    pub register_timeout: Duration,
    pub tcp_punch: TcpPunchConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: "localhost".to_string(),
            server_port: DEFAULT_PORT,
            punch_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            punch_port: None,
            register_timeout: REGISTER_TIMEOUT,
            tcp_punch: TcpPunchConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(server_host: impl Into<String>, server_port: u16) -> Self {
        Self {
            server_host: server_host.into(),
            server_port,
            ..Default::default()
        }
    }
    pub fn set_punch_ip(mut self, punch_ip: IpAddr) -> Self {
        self.punch_ip = punch_ip;
        self
    }
    pub fn set_punch_port(mut self, punch_port: u16) -> Self {
        self.punch_port = Some(punch_port);
        self
    }
    pub fn set_register_timeout(mut self, register_timeout: Duration) -> Self {
        self.register_timeout = register_timeout;
        self
    }
    pub fn set_tcp_punch_config(mut self, tcp_punch: TcpPunchConfig) -> Self {
        self.tcp_punch = tcp_punch;
        self
    }
    pub fn check(&self) -> io::Result<()> {
        if self.server_host.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "server_host is required",
            ));
        }
        if self.server_port == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "server_port must not be 0",
            ));
        }
        self.tcp_punch.check()
    }
}
