use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use sluice::config::{LimiterEntry, LimiterSpec, PacedQueueConfig, SluiceConfig};
use sluice::error::SluiceError;
use sluice::ratelimit::{build_limiter, PacedQueueBucket};

/// Replay a synthetic request stream through a configured limiter.
#[derive(Parser, Debug)]
#[command(name = "sluice", version, about)]
struct Args {
    /// YAML file defining the limiters (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Name of the limiter to drive (first entry when omitted)
    #[arg(short, long)]
    limiter: Option<String>,

    /// Number of requests to replay
    #[arg(long, default_value_t = 20)]
    requests: u64,

    /// Largest weight of a single request; weights are drawn from 1..=max
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    max_weight: u64,

    /// Delay between two requests in milliseconds
    #[arg(long, default_value_t = 100)]
    spacing_ms: u64,

    /// Seed for the request weights
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Outcome of one replay.
#[derive(Debug, Default, Serialize)]
struct Summary {
    limiter: String,
    kind: &'static str,
    requests: u64,
    admitted: u64,
    rejected: u64,
    admitted_weight: u64,
    rejected_weight: u64,
    spillover: u64,
    /// Items that reached the sink (paced queues only)
    #[serde(skip_serializing_if = "Option::is_none")]
    delivered: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting Sluice");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => SluiceConfig::from_file(path)?,
        None => SluiceConfig::default(),
    };

    let entry = match &args.limiter {
        Some(name) => config
            .find(name)
            .ok_or_else(|| anyhow::anyhow!("no limiter named {:?} in configuration", name))?,
        None => config
            .limiters
            .first()
            .ok_or_else(|| anyhow::anyhow!("configuration defines no limiters"))?,
    }
    .clone();
    info!(limiter = %entry.name, kind = entry.spec.kind(), "Configuration loaded");

    let summary = tokio::select! {
        summary = replay(&entry, &args) => summary?,
        _ = shutdown_signal() => {
            info!("Replay interrupted");
            return Ok(());
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!(
            limiter = %summary.limiter,
            requests = summary.requests,
            admitted = summary.admitted,
            rejected = summary.rejected,
            admitted_weight = summary.admitted_weight,
            spillover = summary.spillover,
            delivered = ?summary.delivered,
            "Replay finished"
        );
    }

    info!("Sluice stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn replay(entry: &LimiterEntry, args: &Args) -> anyhow::Result<Summary> {
    if let LimiterSpec::PacedQueue(config) = &entry.spec {
        return replay_paced(entry, config, args).await;
    }

    let mut limiter = build_limiter(&entry.spec)?;
    let mut rng = StdRng::seed_from_u64(args.seed);
    let spacing = Duration::from_millis(args.spacing_ms);
    let mut summary = Summary {
        limiter: entry.name.clone(),
        kind: entry.spec.kind(),
        ..Summary::default()
    };

    for i in 0..args.requests {
        let weight = rng.gen_range(1..=args.max_weight);
        let decision = limiter.admit(weight)?;
        debug!(request = i, weight, allowed = decision.allowed, "Admission decision");

        summary.requests += 1;
        if decision.allowed {
            summary.admitted += 1;
            summary.admitted_weight += weight;
        } else {
            summary.rejected += 1;
            summary.rejected_weight += weight;
            summary.spillover += decision.spillover;
        }
        tokio::time::sleep(spacing).await;
    }

    limiter.shutdown();
    Ok(summary)
}

async fn replay_paced(
    entry: &LimiterEntry,
    config: &PacedQueueConfig,
    args: &Args,
) -> anyhow::Result<Summary> {
    let (tx, mut rx) = mpsc::channel(args.requests.max(1) as usize);
    let pacer = PacedQueueBucket::new(tx, config.clone())?;
    pacer.start()?;

    let spacing = Duration::from_millis(args.spacing_ms);
    let mut summary = Summary {
        limiter: entry.name.clone(),
        kind: entry.spec.kind(),
        ..Summary::default()
    };

    for item in 0..args.requests {
        summary.requests += 1;
        match pacer.enqueue(item) {
            Ok(()) => {
                summary.admitted += 1;
                summary.admitted_weight += 1;
            }
            Err(SluiceError::QueueFull) => {
                summary.rejected += 1;
                summary.rejected_weight += 1;
            }
            Err(e) => return Err(e.into()),
        }
        tokio::time::sleep(spacing).await;
    }

    let mut delivered = 0;
    while delivered < summary.admitted {
        match rx.recv().await {
            Some(item) => {
                debug!(item, "Delivered");
                delivered += 1;
            }
            None => {
                warn!("Paced sink closed before all items were delivered");
                break;
            }
        }
    }
    pacer.stop();

    summary.delivered = Some(delivered);
    Ok(summary)
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping replay");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping replay");
        }
    }
}
