use crate::executor::{Outcome, RequestExecutor};
use crate::sampler;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcomes of one scheduled run plus its wall-clock duration.
#[derive(Debug)]
pub struct Collected {
    pub outcomes: Vec<Outcome>,
    pub duration: Duration,
    /// True when cancellation or the deadline cut dispatch short
    pub stopped_early: bool,
}

/// Drives N request executions, one at a time or over a worker pool.
#[derive(Clone)]
pub struct Scheduler {
    executor: Arc<RequestExecutor>,
    seed: u64,
    cancel: CancellationToken,
    deadline: Option<Duration>,
    progress_every: usize,
}

impl Scheduler {
    pub fn new(executor: RequestExecutor, seed: u64) -> Self {
        Self {
            executor: Arc::new(executor),
            seed,
            cancel: CancellationToken::new(),
            deadline: None,
            progress_every: 0,
        }
    }

    /// Stop dispatching when this token is cancelled.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Stop dispatching once this much time has passed since the run started.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Log progress every `n` collected outcomes (0 disables).
    pub fn with_progress_every(mut self, n: usize) -> Self {
        self.progress_every = n;
        self
    }

    /// Back-to-back execution; outcome order equals submission order.
    pub async fn run_sequential(&self, requests: usize) -> Collected {
        let start = Instant::now();
        let stop_at = self.deadline.map(|d| start + d);
        let mut outcomes = Vec::with_capacity(requests);
        let mut stopped_early = false;

        for idx in 0..requests {
            if should_stop(&self.cancel, stop_at) {
                stopped_early = true;
                break;
            }
            let tx = sampler::sample(&mut unit_rng(self.seed, idx));
            outcomes.push(self.executor.execute(&tx).await);
            self.report_progress(outcomes.len(), requests);
        }

        Collected {
            outcomes,
            duration: start.elapsed(),
            stopped_early,
        }
    }

    /// Greedy pool of `workers` tasks sharing one pending-work counter.
    ///
    /// Completion order is arbitrary; exactly one outcome is collected per
    /// dispatched unit.
    pub async fn run_concurrent(&self, requests: usize, workers: usize) -> Collected {
        let workers = workers.clamp(1, requests.max(1));
        let start = Instant::now();
        let stop_at = self.deadline.map(|d| start + d);
        let next = Arc::new(AtomicUsize::new(0));
        let (result_tx, mut result_rx) = mpsc::channel::<Outcome>(workers * 2);

        let mut pool = JoinSet::new();
        for _ in 0..workers {
            let executor = self.executor.clone();
            let next = next.clone();
            let result_tx = result_tx.clone();
            let cancel = self.cancel.clone();
            let seed = self.seed;

            pool.spawn(async move {
                loop {
                    if should_stop(&cancel, stop_at) {
                        break;
                    }
                    let idx = next.fetch_add(1, Ordering::Relaxed);
                    if idx >= requests {
                        break;
                    }
                    let tx = sampler::sample(&mut unit_rng(seed, idx));
                    let outcome = executor.execute(&tx).await;
                    if result_tx.send(outcome).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut outcomes = Vec::with_capacity(requests);
        while let Some(outcome) = result_rx.recv().await {
            outcomes.push(outcome);
            self.report_progress(outcomes.len(), requests);
        }
        let duration = start.elapsed();

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                warn!("Worker task failed: {}", e);
            }
        }

        let stopped_early = outcomes.len() < requests;
        Collected {
            outcomes,
            duration,
            stopped_early,
        }
    }

    fn report_progress(&self, done: usize, total: usize) {
        if self.progress_every > 0 && done % self.progress_every == 0 {
            info!("Processed: {}/{}", done, total);
        }
    }
}

fn should_stop(cancel: &CancellationToken, stop_at: Option<Instant>) -> bool {
    cancel.is_cancelled() || stop_at.is_some_and(|t| Instant::now() >= t)
}

/// Per-unit RNG so the sampled transaction depends only on (seed, index).
fn unit_rng(seed: u64, idx: usize) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_add(idx as u64))
}
