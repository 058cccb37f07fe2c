//! Simulated task handlers
//!
//! Each handler sleeps for a random processing time and fails at a fixed
//! rate. Sleeping happens in short slices so a shutdown cuts the work short.

use std::ops::Range;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::debug;
use workgate::task::{AnyTask, DATA_ANALYSIS, IMAGE_PROCESSING};
use workgate::worker::{HandlerError, HandlerRegistry, HandlerResult, TaskContext};

const SLICE: Duration = Duration::from_millis(50);

/// Processing profile of a simulated handler
#[derive(Debug, Clone)]
pub struct Simulation {
    /// Processing time range in milliseconds
    pub latency_ms: Range<u64>,
    /// Probability of failure in [0, 1]
    pub failure_rate: f64,
}

impl Simulation {
    pub const IMAGE: Self = Self {
        latency_ms: 500..1500,
        failure_rate: 0.1,
    };

    pub const DATA: Self = Self {
        latency_ms: 1000..3000,
        failure_rate: 0.05,
    };

    fn run(&self, ctx: &TaskContext, failure: &str) -> HandlerResult {
        let (latency, fail) = {
            let mut rng = rand::thread_rng();
            (
                Duration::from_millis(rng.gen_range(self.latency_ms.clone())),
                rng.gen_bool(self.failure_rate),
            )
        };

        let deadline = Instant::now() + latency;
        loop {
            if ctx.is_cancelled() {
                return Err(HandlerError::new("cancelled by shutdown"));
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(SLICE.min(deadline - now));
        }

        if fail {
            Err(HandlerError::new(failure))
        } else {
            Ok(())
        }
    }
}

fn process_image(task: &AnyTask, ctx: &TaskContext) -> HandlerResult {
    let AnyTask::Image(image) = task else {
        return Err(HandlerError::new("expected an image task"));
    };
    debug!(task_id = %image.id, image_url = %image.image_url, filters = ?image.filters, worker_id = ctx.worker_id(), "Processing image");
    Simulation::IMAGE.run(ctx, "image processing failed")
}

fn process_data(task: &AnyTask, ctx: &TaskContext) -> HandlerResult {
    let AnyTask::Data(data) = task else {
        return Err(HandlerError::new("expected a data task"));
    };
    debug!(task_id = %data.id, dataset = %data.dataset, worker_id = ctx.worker_id(), "Analysing dataset");
    Simulation::DATA.run(ctx, "data analysis failed")
}

/// Registry with the simulated image and data handlers
pub fn registry() -> HandlerRegistry<AnyTask> {
    HandlerRegistry::new()
        .with_handler(IMAGE_PROCESSING, process_image)
        .with_handler(DATA_ANALYSIS, process_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;
    use workgate::task::{DataTask, ImageTask};
    use workgate::worker::TaskError;

    #[test]
    fn test_registry_routes_both_kinds() {
        let registry = registry();
        assert_eq!(registry.kinds(), vec![DATA_ANALYSIS, IMAGE_PROCESSING]);
    }

    #[test]
    fn test_cancelled_handler_returns_early() {
        let registry = registry();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let task: AnyTask = DataTask::new("data_1", "dataset_1").into();
        let started = Instant::now();
        let outcome = registry.dispatch(&task, &test_context(cancel));

        assert_eq!(
            outcome,
            Err(TaskError::Handler("cancelled by shutdown".to_string()))
        );
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_certain_failure() {
        let simulation = Simulation {
            latency_ms: 1..2,
            failure_rate: 1.0,
        };
        let outcome = simulation.run(&test_context(CancellationToken::new()), "always");
        assert_eq!(outcome, Err(HandlerError::new("always")));
    }

    #[test]
    fn test_data_handler_rejects_image_task() {
        let task: AnyTask = ImageTask::new("img_1", "u").into();
        assert!(process_data(&task, &test_context(CancellationToken::new())).is_err());
    }

    fn test_context(cancel: CancellationToken) -> TaskContext {
        TaskContext::new(0, cancel)
    }
}
