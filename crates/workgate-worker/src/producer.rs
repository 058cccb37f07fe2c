//! Task generator
//!
//! Alternates data and image tasks on a fixed interval, each submission gated by
//! the token bucket.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use workgate::limiter::TokenBucket;
use workgate::task::{AnyTask, DataTask, ImageTask, Task};
use workgate::worker::WorkerPool;

/// Build the `seq`-th generated task: even numbers are images, odd are data.
pub fn generate_task(seq: u64) -> AnyTask {
    let priority = rand::thread_rng().gen_range(0..10);
    if seq % 2 == 0 {
        ImageTask::new(
            format!("img_{seq}"),
            format!("https://example.com/image_{seq}.jpg"),
        )
        .with_filters(["blur", "sharpen"])
        .with_priority(priority)
        .into()
    } else {
        DataTask::new(format!("data_{seq}"), format!("dataset_{}", seq % 5))
            .with_query_param("type", "aggregation")
            .with_query_param("field", "value")
            .with_priority(priority)
            .into()
    }
}

/// Generate tasks until `cancel` fires. Returns the number accepted by the pool.
pub async fn run(
    pool: Arc<WorkerPool<AnyTask>>,
    limiter: Arc<TokenBucket>,
    interval: Duration,
    cancel: CancellationToken,
) -> u64 {
    let mut ticker = tokio::time::interval(interval);
    let mut seq = 0u64;
    let mut accepted = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // The limiter blocks its caller; keep it off the async workers.
        let acquired = {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || limiter.acquire(&cancel)).await
        };
        match acquired {
            Ok(Ok(())) => {}
            Ok(Err(_)) => break,
            Err(e) => {
                error!(error = %e, "Rate limiter task failed");
                break;
            }
        }

        seq += 1;
        let task = generate_task(seq);
        let task_id = task.id().to_string();
        let kind = task.kind().to_string();
        let priority = task.priority();

        match pool.submit(task) {
            Ok(()) => {
                accepted += 1;
                debug!(task_id = %task_id, task_type = %kind, priority, "Task submitted");
            }
            Err(e) => {
                error!(error = %e, task_id = %task_id, "Failed to submit task");
            }
        }
    }

    info!(generated = seq, accepted, "Task generator shutting down");
    accepted
}
