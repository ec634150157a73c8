//! DuckovNet Client - Line-based test client
//!
//! Connects to a DuckovNet server, sends every stdin line as one message and
//! prints whatever comes back.

use clap::Parser;
use crossbeam::channel::RecvTimeoutError;
use duckov_cli::{display_compact_stats, display_session_stats, Config};
use duckov_net::{DeliveryMode, EventChannel, KcpClient, SessionConfig, SessionEvent};
use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "duckov-client")]
#[command(about = "DuckovNet line client", long_about = None)]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "9050")]
    port: u16,

    /// Connection key
    #[arg(short, long)]
    key: Option<String>,

    /// TOML configuration file (its [client] section)
    #[arg(short, long)]
    config: Option<String>,

    /// Send lines unreliably instead of through the reliable channel
    #[arg(short, long)]
    unreliable: bool,

    /// Statistics interval in seconds (0 disables)
    #[arg(long, default_value = "0")]
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
        .with_writer(io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let (host, port, stats_interval, session) = match &args.config {
        Some(path) => {
            let config = Config::from_file(path)?;
            let client = config
                .client
                .ok_or_else(|| anyhow::anyhow!("'{}' has no [client] section", path))?;
            (client.host, client.port, client.stats_interval_secs, client.session)
        }
        None => (args.host.clone(), args.port, args.stats, SessionConfig::default()),
    };
    let key = args
        .key
        .clone()
        .unwrap_or_else(|| session.connection_key.clone());

    let mode = if args.unreliable {
        DeliveryMode::Unreliable
    } else {
        DeliveryMode::Reliable
    };

    let (handler, events) = EventChannel::new();
    let client = Arc::new(KcpClient::with_config(session, Arc::new(handler)));

    tracing::info!("Connecting to {}:{}...", host, port);
    client.connect_with_key(&host, port, &key)?;
    tracing::info!("Connected from {:?}", client.local_addr());

    // Stdin reader
    let sender = client.clone();
    let (done_tx, done_rx) = crossbeam::channel::bounded::<()>(1);
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!("Read error: {}", e);
                    break;
                }
            };
            if line.is_empty() {
                continue;
            }
            if let Err(e) = sender.send(line.as_bytes(), mode) {
                tracing::error!("Send failed: {}", e);
                break;
            }
        }
        tracing::info!("End of input reached");
        let _ = done_tx.send(());
    });

    let start = Instant::now();
    let mut last_stats = Instant::now();
    let mut input_done: Option<Instant> = None;

    loop {
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(SessionEvent::Data { data, mode }) => {
                println!("{} ({:?})", String::from_utf8_lossy(&data), mode);
            }
            Ok(SessionEvent::Latency(ms)) => tracing::debug!("Latency: {}ms", ms),
            Ok(SessionEvent::Disconnected(reason)) | Ok(SessionEvent::ConnectionFailed(reason)) => {
                tracing::info!("Disconnected: {}", reason);
                break;
            }
            Ok(SessionEvent::Connected) => {}
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if input_done.is_none() && done_rx.try_recv().is_ok() {
            input_done = Some(Instant::now());
        }

        // Give echoes a moment to come back once stdin is exhausted
        if let Some(done) = input_done {
            let drained = client
                .stats()
                .map(|s| s.kcp.inflight + s.kcp.send_queue == 0)
                .unwrap_or(true);
            if (drained && done.elapsed() > Duration::from_millis(500))
                || done.elapsed() > Duration::from_secs(5)
            {
                break;
            }
        }

        if stats_interval > 0 && last_stats.elapsed() >= Duration::from_secs(stats_interval) {
            last_stats = Instant::now();
            if let Some(stats) = client.stats() {
                eprintln!("{}", display_compact_stats(&stats, start.elapsed()));
            }
        }
    }

    if let Some(stats) = client.stats() {
        display_session_stats("summary", &stats);
    }
    client.disconnect("client exit");
    Ok(())
}
