//! DuckovNet Server - Echo server
//!
//! Accepts DuckovNet sessions and echoes every payload back to its sender
//! with the same delivery mode.

use clap::Parser;
use crossbeam::channel::RecvTimeoutError;
use duckov_cli::{display_compact_stats, Config};
use duckov_net::{KcpServer, ServerEvent, ServerEventChannel, SessionConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "duckov-server")]
#[command(about = "DuckovNet echo server", long_about = None)]
struct Args {
    /// Listen port
    #[arg(short, long, default_value = "9050")]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Connection key clients must present
    #[arg(short, long)]
    key: Option<String>,

    /// TOML configuration file (its [server] section)
    #[arg(short, long)]
    config: Option<String>,

    /// Statistics interval in seconds (0 disables)
    #[arg(long, default_value = "5")]
    stats: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let (listen, stats_interval, mut session) = match &args.config {
        Some(path) => {
            let config = Config::from_file(path)?;
            let server = config
                .server
                .ok_or_else(|| anyhow::anyhow!("'{}' has no [server] section", path))?;
            (server.listen, server.stats_interval_secs, server.session)
        }
        None => {
            let listen: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
            (listen, args.stats, SessionConfig::default())
        }
    };
    if let Some(key) = args.key {
        session.connection_key = key;
    }

    tracing::info!("DuckovNet server starting...");
    let (handler, events) = ServerEventChannel::new();
    let server = KcpServer::bind(listen, session, Arc::new(handler))?;
    tracing::info!("Echoing on {}", server.local_addr()?);

    let start = Instant::now();
    let tick = if stats_interval > 0 {
        Duration::from_secs(stats_interval)
    } else {
        Duration::from_secs(3600)
    };
    let mut last_stats = Instant::now();

    loop {
        match events.recv_timeout(tick) {
            Ok(ServerEvent::PeerConnected(peer)) => {
                tracing::info!("Peer connected: {} ({} total)", peer, server.peer_count());
            }
            Ok(ServerEvent::PeerDisconnected(peer, reason)) => {
                tracing::info!("Peer disconnected: {} ({})", peer, reason);
            }
            Ok(ServerEvent::Data { peer, data, mode }) => {
                tracing::debug!("{} bytes from {} ({:?})", data.len(), peer, mode);
                if let Err(e) = server.send(peer, &data, mode) {
                    tracing::warn!("Echo to {} failed: {}", peer, e);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if stats_interval > 0 && last_stats.elapsed() >= tick {
            last_stats = Instant::now();
            for peer in server.peers() {
                if let Some(kcp) = server.peer_stats(&peer) {
                    let stats = duckov_net::SessionStats {
                        kcp,
                        ..Default::default()
                    };
                    tracing::info!("{} {}", peer, display_compact_stats(&stats, start.elapsed()));
                }
            }
        }
    }

    server.shutdown();
    Ok(())
}
