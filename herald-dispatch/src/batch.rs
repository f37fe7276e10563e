//! Batch execution: one worker drives one batch to completion
//!
//! A batch worker owns its queue manager, attaches the shared rate
//! limiters to SMTP jobs, drains completions, and emits progress events.
//! Its `stop` handle only sets a flag; the blocking shutdown happens in
//! the run loop's cleanup, so whoever requests the stop never blocks.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use herald_common::{BatchStats, DispatchEvent, Job, JobDisposition, SendOutcome};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    queue::{JobCompletion, JobQueueManager, JobRunner},
    rate_limiter::RateLimiterPool,
    transport::Transport,
};

/// How often the run loop drains completions
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs jobs through the batch's transport, resolving the rate limiter
/// per job from the shared pool
struct TransportRunner {
    transport: Arc<dyn Transport>,
    limiters: Arc<RateLimiterPool>,
}

#[async_trait]
impl JobRunner for TransportRunner {
    async fn run(&self, job: Job) -> SendOutcome {
        let limiter = job
            .endpoint
            .as_smtp()
            .and_then(|server| self.limiters.get(&server.nickname));
        self.transport.send(&job, limiter.as_deref()).await
    }
}

/// Executes one batch on its own queue manager
pub struct BatchWorker {
    batch_id: usize,
    jobs: Vec<Job>,
    concurrency: usize,
    transport: Arc<dyn Transport>,
    limiters: Arc<RateLimiterPool>,
    events: mpsc::UnboundedSender<DispatchEvent>,
    primary_tx: Option<mpsc::UnboundedSender<Job>>,
    stop: Arc<AtomicBool>,
    probe: bool,
}

impl BatchWorker {
    /// Create a worker over a homogeneous slice of the campaign
    #[must_use]
    pub fn new(
        batch_id: usize,
        jobs: Vec<Job>,
        concurrency: usize,
        transport: Arc<dyn Transport>,
        limiters: Arc<RateLimiterPool>,
        events: mpsc::UnboundedSender<DispatchEvent>,
    ) -> Self {
        Self {
            batch_id,
            jobs,
            concurrency,
            transport,
            limiters,
            events,
            primary_tx: None,
            stop: Arc::new(AtomicBool::new(false)),
            probe: false,
        }
    }

    /// Forward each successful primary job through `tx`, for the
    /// orchestrator's probe trigger
    #[must_use]
    pub fn with_primary_channel(mut self, tx: mpsc::UnboundedSender<Job>) -> Self {
        self.primary_tx = Some(tx);
        self
    }

    /// Mark this worker as carrying a delivery probe
    #[must_use]
    pub fn as_probe(mut self) -> Self {
        self.probe = true;
        self
    }

    /// Handle that requests a stop without blocking
    ///
    /// Setting the flag lets in-flight sends run out; jobs not yet
    /// admitted are cancelled during the worker's own cleanup.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Drive the batch to completion (or to a requested stop) and return
    /// its final counters
    pub async fn run(mut self) -> BatchStats {
        let started = Instant::now();
        let mut stats = BatchStats {
            total: self.jobs.len(),
            ..BatchStats::default()
        };

        // An SMTP job whose endpoint has no limiter proceeds unthrottled;
        // that is a configuration problem worth surfacing, not a reason
        // to drop the job.
        for job in &self.jobs {
            if let Some(server) = job.endpoint.as_smtp()
                && self.limiters.get(&server.nickname).is_none()
            {
                warn!(
                    batch = self.batch_id,
                    nickname = %server.nickname,
                    job_id = %job.id.short(),
                    "no rate limiter for endpoint, job will send unthrottled"
                );
            }
        }

        let runner = Arc::new(TransportRunner {
            transport: Arc::clone(&self.transport),
            limiters: Arc::clone(&self.limiters),
        });
        let mut queue = JobQueueManager::new(runner);
        for job in self.jobs.drain(..) {
            queue.add_job(job);
        }
        queue.start_processing(self.concurrency);
        debug!(
            batch = self.batch_id,
            total = stats.total,
            concurrency = self.concurrency,
            "batch started"
        );

        while !self.stop.load(Ordering::SeqCst) && !queue.is_finished() {
            for completion in queue.poll_completed() {
                self.handle_completion(&mut stats, &completion);
            }
            let _ = self.events.send(DispatchEvent::BatchProgress {
                batch: self.batch_id,
                completed: stats.completed,
                active: queue.active_count(),
                total: stats.total,
            });
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        // Cleanup: exactly one blocking shutdown, also on the natural
        // completion path where it is a no-op beyond state transitions.
        let stopped_early = self.stop.load(Ordering::SeqCst);
        let (cancelled, late) = queue.stop().await;
        for completion in late {
            self.handle_completion(&mut stats, &completion);
        }
        stats.cancelled += cancelled.len();

        let message = format!(
            "{}/{} successful, {} cancelled, in {:.2}s",
            stats.succeeded,
            stats.total,
            stats.cancelled,
            started.elapsed().as_secs_f64(),
        );
        debug!(batch = self.batch_id, %message, "batch finished");
        let _ = self.events.send(DispatchEvent::BatchFinished {
            batch: self.batch_id,
            success: !stopped_early,
            message,
            stats,
            probe: self.probe,
        });

        stats
    }

    fn handle_completion(&self, stats: &mut BatchStats, completion: &JobCompletion) {
        let succeeded = completion.succeeded();
        stats.record(succeeded);

        let (disposition, message, elapsed) = match (&completion.fault, &completion.outcome) {
            (Some(fault), _) => (JobDisposition::Faulted, fault.clone(), Duration::ZERO),
            (None, Some(outcome)) => (
                if outcome.success {
                    JobDisposition::Succeeded
                } else {
                    JobDisposition::TransportFailed
                },
                outcome.message.clone(),
                outcome.elapsed,
            ),
            (None, None) => (
                JobDisposition::Faulted,
                "send task produced no result".to_string(),
                Duration::ZERO,
            ),
        };

        let _ = self.events.send(DispatchEvent::JobCompleted {
            batch: self.batch_id,
            job_id: completion.job.id.clone(),
            recipient: completion.job.primary_recipient().to_string(),
            disposition,
            message,
            elapsed,
            probe: completion.job.probe,
        });

        if succeeded && !completion.job.probe
            && let Some(tx) = &self.primary_tx
        {
            let _ = tx.send(completion.job.clone());
        }
    }
}
