use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use env_logger::Env;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;

use holepunch::config::{ClientConfig, RelayConfig, ServerConfig};
use holepunch::error::Error;
use holepunch::protocol::PeerId;
use holepunch::{relay, Client, ClientHandle, ConnectionHandler, Server};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    Server,
    Client,
    Relay,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long, value_enum)]
    mode: Mode,
    /// Address the server or relay binds to
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,
    /// Server listen port
    #[arg(long, default_value_t = 8000)]
    port: u16,
    #[arg(long, default_value = "localhost")]
    server_host: String,
    #[arg(long, default_value_t = 8000)]
    server_port: u16,
    /// Local port for TCP hole punching.
    /// Defaults to the port of the connection to the server
    #[arg(long)]
    punch_port: Option<u16>,
    #[arg(long)]
    relay_port: Option<u16>,
    #[arg(long)]
    relay_target_host: Option<String>,
    #[arg(long)]
    relay_target_port: Option<u16>,
}

impl Args {
    fn relay_config(&self) -> Option<RelayConfig> {
        match (self.relay_port, &self.relay_target_host, self.relay_target_port) {
            (Some(port), Some(host), Some(target_port)) => Some(RelayConfig::new(
                SocketAddr::new(self.host, port),
                host.clone(),
                target_port,
            )),
            _ => None,
        }
    }
}

struct LogConnections;

#[async_trait]
impl ConnectionHandler for LogConnections {
    async fn on_connected(&self, peer_id: PeerId, stream: TcpStream) {
        log::info!(
            "direct connection to {peer_id}: {:?} <-> {:?}",
            stream.local_addr(),
            stream.peer_addr()
        );
    }
    async fn on_failed(&self, peer_id: PeerId, error: Error) {
        log::error!("TCP hole punch to {peer_id} failed: {error}");
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    if let Some(config) = args.relay_config() {
        config.check()?;
        log::info!(
            "Started TCP relay on {} -> {}",
            config.listen_addr,
            config.target()
        );
        match args.mode {
            Mode::Relay => return run_until_ctrl_c(relay::start(config)).await,
            _ => {
                tokio::spawn(async move {
                    if let Err(e) = relay::start(config).await {
                        log::error!("relay {e}");
                    }
                });
            }
        }
    } else if let Mode::Relay = args.mode {
        anyhow::bail!("relay mode needs --relay-port, --relay-target-host and --relay-target-port");
    }

    match args.mode {
        Mode::Server => {
            let config = ServerConfig::default().set_listen_addr(SocketAddr::new(args.host, args.port));
            let server = Server::bind(config).await?;
            run_until_ctrl_c(server.serve()).await
        }
        Mode::Client => {
            let mut config = ClientConfig::new(args.server_host, args.server_port);
            if let Some(port) = args.punch_port {
                config = config.set_punch_port(port);
            }
            let client = Client::connect(config).await?.with_handler(LogConnections);
            let handle = client.handle();
            tokio::select! {
                rs = client.run() => rs?,
                rs = read_commands(handle.clone()) => {
                    rs?;
                    handle.shutdown().await;
                }
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Shutting down...");
                    handle.shutdown().await;
                }
            }
            Ok(())
        }
        Mode::Relay => Ok(()),
    }
}

async fn run_until_ctrl_c<F, E>(task: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = Result<(), E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    tokio::select! {
        rs = task => rs?,
        _ = tokio::signal::ctrl_c() => log::info!("Shutting down..."),
    }
    Ok(())
}

/// `connect <peer_id>` and `quit` from stdin. Returns on `quit` or end of input.
async fn read_commands(handle: ClientHandle) -> anyhow::Result<()> {
    println!("Commands: connect <peer_id>, quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("connect"), Some(target_id)) => {
                handle.connect_to_peer(target_id).await?;
            }
            (Some("quit"), _) => break,
            (None, _) => {}
            _ => println!("Unknown command: {line}"),
        }
    }
    Ok(())
}
