use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use workgate::config::saturating_millis;
use workgate::limiter::TokenBucket;
use workgate::worker::WorkerPool;

mod config;
mod handlers;
mod monitor;
mod producer;
mod telemetry;

use config::AppConfig;
use telemetry::{init_telemetry, TelemetryConfig};

/// How long to wait for the result collector after the pool has stopped
const COLLECTOR_GRACE: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "info")
    // - LOG_FORMAT: "json" for structured output
    init_telemetry(TelemetryConfig::from_env());

    tracing::info!("workgate-worker starting...");

    let config = AppConfig::from_env()?;

    tracing::info!(
        pool = %config.pool.name,
        workers = config.pool.workers,
        queue_capacity = config.pool.queue_capacity,
        max_tokens = config.limiter.max_tokens,
        refill_interval_ms = saturating_millis(config.limiter.refill_interval),
        "Starting worker pool"
    );

    let pool = Arc::new(
        WorkerPool::new(config.pool.clone(), handlers::registry())
            .context("Failed to create worker pool")?,
    );
    let limiter =
        Arc::new(TokenBucket::new(config.limiter.clone()).context("Failed to create rate limiter")?);
    let cancel = CancellationToken::new();

    let producer = tokio::spawn(producer::run(
        Arc::clone(&pool),
        Arc::clone(&limiter),
        config.produce_interval,
        cancel.clone(),
    ));
    let reporter = tokio::spawn(monitor::report_stats(
        Arc::clone(&pool),
        config.stats_interval,
        cancel.clone(),
    ));
    let collector = {
        let results = pool.results().clone();
        tokio::task::spawn_blocking(move || monitor::collect_results(results))
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received, initiating graceful shutdown");

    // Stop producing first so nothing races the closing intake.
    cancel.cancel();
    let submitted = producer.await.context("Task generator panicked")?;
    reporter.await.context("Stats reporter panicked")?;

    let shutdown = {
        let pool = Arc::clone(&pool);
        let timeout = config.pool.shutdown_timeout;
        tokio::task::spawn_blocking(move || pool.shutdown(timeout))
            .await
            .context("Shutdown task panicked")?
    };
    if let Err(e) = &shutdown {
        tracing::error!(error = %e, "Worker pool shutdown error");
    }

    match tokio::time::timeout(COLLECTOR_GRACE, collector).await {
        Ok(Ok(collected)) => tracing::debug!(collected, "Result collector finished"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Result collector panicked"),
        Err(_) => tracing::warn!(
            live_workers = pool.live_workers(),
            "Result collector still waiting on workers"
        ),
    }

    let stats = pool.stats();
    tracing::info!(
        total_submitted = submitted,
        total_processed = stats.processed,
        total_errors = stats.errors,
        dropped_results = stats.dropped_results,
        success_rate = stats.success_rate(),
        "Final statistics"
    );

    tracing::info!("workgate-worker completed");
    Ok(())
}
