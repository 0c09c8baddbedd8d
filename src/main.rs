use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use blobstore::test_utils::{FaultyTarget, LatencySimulator};
use blobstore::{BlobRef, InMemoryBlobService, LeaseTarget};
use bytes::Bytes;
use clap::Parser;
use cloudlock::{Cli, CloudLock, Commands, LockConfig};
use futures_util::future::join_all;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

type Target = FaultyTarget<BlobRef>;

/// Acquire, read, increment, write, release.
async fn increment(worker: usize, target: Arc<Target>, config: LockConfig) -> Result<u64> {
    let mut lock = CloudLock::from_config(target.clone(), &config)?;
    if !lock.acquire_with(&config.retry_policy()).await? {
        return Err(anyhow!(
            "worker {worker} could not acquire the lock within {:?}",
            config.retry_policy().max_wait()
        ));
    }

    let condition = lock.access_condition()?;
    let text = target.read(&condition).await?;
    let current: u64 = std::str::from_utf8(&text)?
        .trim()
        .parse()
        .context("counter blob is not a number")?;
    let next = current + 1;
    target
        .write(Bytes::from(next.to_string()), &condition)
        .await?;
    info!(worker, next, "incremented counter");

    lock.release().await?;
    Ok(next)
}

async fn run_increment(
    service: &Arc<InMemoryBlobService>,
    target: Arc<Target>,
    workers: usize,
    config: LockConfig,
) -> Result<()> {
    service.upload(target.name(), "0");

    let results = join_all(
        (0..workers).map(|worker| tokio::spawn(increment(worker, target.clone(), config.clone()))),
    )
    .await;

    let mut failures = 0;
    for result in results {
        if let Err(err) = result? {
            error!("{err:#}");
            failures += 1;
        }
    }

    let text = service.download(target.name())?;
    println!(
        "{}: {} ({} workers, {} failed)",
        target.name(),
        String::from_utf8_lossy(&text),
        workers,
        failures
    );
    Ok(())
}

async fn run_hold(
    service: &Arc<InMemoryBlobService>,
    target: Arc<Target>,
    seconds: u64,
    config: LockConfig,
) -> Result<()> {
    service.upload(target.name(), "");

    let mut lock = CloudLock::from_config(target, &config)?;
    if !lock.acquire_with(&config.retry_policy()).await? {
        return Err(anyhow!("lock is held elsewhere"));
    }
    let mut keep_alive = lock.keep_alive(config.keep_alive_period())?;
    println!("holding lease {} for {seconds}s", lock.held_lease_id()?);

    let lost = tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(seconds)) => false,
        () = keep_alive.lost() => true,
    };
    if lost {
        lock.dispose().await;
        return Err(anyhow!("lease was lost while held"));
    }

    println!(
        "renewal status: {:?}, lease expires in {:?}",
        keep_alive.status(),
        lock.time_remaining()
    );
    lock.release().await?;
    println!("released");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let level = match args.verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    let config = match &args.config {
        Some(path) => LockConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => LockConfig::default(),
    };

    let service = InMemoryBlobService::new();
    let latency = LatencySimulator::symmetric(Duration::from_millis(args.latency_ms));
    let target = Arc::new(FaultyTarget::with_latency(service.blob(&args.blob), latency));

    match args.command {
        Commands::Increment { workers } => run_increment(&service, target, workers, config).await,
        Commands::Hold { seconds } => run_hold(&service, target, seconds, config).await,
    }
}
