//! Example of using the kad-peers crawler against a simulated overlay.
//!
//! Runs until interrupted with Ctrl-C.

use clap::Parser;
use kad_peers_crawler::{CrawlerBuilder, Lifecycle, MemoryOverlay};
use log::LevelFilter;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of peers in the simulated overlay.
    #[arg(short, long, default_value = "500")]
    peers: usize,

    /// Neighbours linked to each peer.
    #[arg(short, long, default_value = "6")]
    degree: usize,

    /// Fraction of peers that refuse connections.
    #[arg(short, long, default_value = "0.25")]
    unreachable: f64,

    /// Simulated connect latency in milliseconds.
    #[arg(long, default_value = "200")]
    latency_ms: u64,

    /// Number of concurrent dialers.
    #[arg(short = 'n', long, default_value = "16")]
    dialers: usize,

    /// Seconds between discovery rounds.
    #[arg(short, long, default_value = "60")]
    round_interval: u64,

    /// Log level.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {} - {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log_level)
        .chain(std::io::stderr())
        .apply()?;

    log::info!("CRAWLING A SIMULATED OVERLAY OF {} PEERS", args.peers);

    let overlay = MemoryOverlay::random(args.peers, args.degree, args.unreachable);
    overlay.set_connect_latency(Duration::from_millis(args.latency_ms));

    let (messages_tx, mut messages_rx) = mpsc::channel(1024);
    let crawler = CrawlerBuilder::new(overlay.clone(), overlay)
        .with_dialers(args.dialers)
        .with_round_interval(Duration::from_secs(args.round_interval))
        .with_message_sender(messages_tx)
        .build()?;

    let lifecycle = Lifecycle::new();
    let shutdown = lifecycle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, shutting down");
        }
        shutdown.cancel();
    });

    let printer = tokio::spawn(async move {
        while let Some(message) = messages_rx.recv().await {
            log::info!("{message}");
        }
    });

    let result = crawler.run(lifecycle).await;
    // Closes the message channel so the printer drains and exits.
    let stats = crawler.stats();
    drop(crawler);
    printer.await?;

    result.map_err(|e| format!("Crawler error: {e}"))?;
    log::info!("Final stats: {stats}");
    Ok(())
}
