//! Result collection and periodic stats reporting

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use workgate::config::saturating_millis;
use workgate::task::AnyTask;
use workgate::worker::{ResultStream, WorkerPool};

/// Consume results until the stream ends. Blocking; run it on a blocking thread.
///
/// Returns the number of results seen.
pub fn collect_results(results: ResultStream) -> u64 {
    let mut seen = 0u64;
    for result in &results {
        seen += 1;
        if result.success {
            debug!(
                task_id = %result.task_id,
                worker_id = result.worker_id,
                duration_ms = saturating_millis(result.duration),
                "Task completed"
            );
        } else {
            let error = result
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            error!(
                task_id = %result.task_id,
                error = %error,
                duration_ms = saturating_millis(result.duration),
                "Task failed"
            );
            if let Ok(record) = serde_json::to_string(&result) {
                debug!(record = %record, "Failed task record");
            }
        }
        results.recycle(result);
    }
    info!(results = seen, "Result collector shutting down");
    seen
}

/// Log pool statistics every `interval` until `cancel` fires
pub async fn report_stats(
    pool: Arc<WorkerPool<AnyTask>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let stats = pool.stats();
                let reuse = pool.result_pool_stats();
                info!(
                    tasks_processed = stats.processed,
                    task_errors = stats.errors,
                    error_rate = stats.error_rate(),
                    dropped_results = stats.dropped_results,
                    live_workers = pool.live_workers(),
                    queued = pool.queued(),
                    results_created = reuse.created,
                    results_reused = reuse.reused,
                    "Performance stats"
                );
            }
        }
    }
}
