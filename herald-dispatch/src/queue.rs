//! Bounded worker-pool job queue
//!
//! One manager runs one batch: jobs wait in an internal FIFO and are
//! admitted into the task pool as slots free up, so at most the
//! configured concurrency is ever in flight. Completion polling is
//! non-blocking; only the draining stop waits for in-flight work.
//!
//! The manager is exclusively owned by its batch worker, which makes
//! completion accounting single-writer by construction: a completion is
//! counted exactly once, in whichever call collected it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use herald_common::{Job, JobStatus, SendOutcome};
use tokio::task::{Id, JoinError, JoinSet};
use tracing::debug;

/// Executes one job; supplied by the batch worker
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    /// Run a single send attempt to completion
    ///
    /// Implementations resolve the job's rate limiter and call the
    /// transport; they report every failure through the outcome rather
    /// than panicking.
    async fn run(&self, job: Job) -> SendOutcome;
}

/// Lifecycle of a queue manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Accepting jobs, nothing admitted yet
    Idle,
    /// Admitting jobs into free slots
    Running,
    /// Stop requested; no further admission, in-flight work draining
    Draining,
    /// Fully quiesced
    Stopped,
}

/// One drained completion: the job plus either its outcome or the fault
/// that killed its task
#[derive(Debug)]
pub struct JobCompletion {
    /// The job that completed
    pub job: Job,
    /// Transport outcome; absent when the task faulted
    pub outcome: Option<SendOutcome>,
    /// Set only when the send task itself faulted unexpectedly
    pub fault: Option<String>,
}

impl JobCompletion {
    /// Whether the destination accepted the message
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.fault.is_none() && self.outcome.as_ref().is_some_and(|outcome| outcome.success)
    }
}

/// Bounded worker pool over a FIFO of jobs
pub struct JobQueueManager {
    runner: Arc<dyn JobRunner>,
    state: ManagerState,
    fifo: VecDeque<Job>,
    in_flight: HashMap<Id, Job>,
    tasks: JoinSet<SendOutcome>,
    concurrency: usize,
    submitted: usize,
    completed: usize,
    cancelled: usize,
}

impl JobQueueManager {
    /// Create an idle manager over the given runner
    #[must_use]
    pub fn new(runner: Arc<dyn JobRunner>) -> Self {
        Self {
            runner,
            state: ManagerState::Idle,
            fifo: VecDeque::new(),
            in_flight: HashMap::new(),
            tasks: JoinSet::new(),
            concurrency: 1,
            submitted: 0,
            completed: 0,
            cancelled: 0,
        }
    }

    /// Enqueue a job; no transport I/O happens here
    pub fn add_job(&mut self, job: Job) {
        debug_assert!(
            matches!(self.state, ManagerState::Idle | ManagerState::Running),
            "jobs must not be added to a stopping manager"
        );
        self.fifo.push_back(job);
        self.submitted += 1;
    }

    /// Begin admitting jobs, up to `concurrency` in flight at once
    pub fn start_processing(&mut self, concurrency: usize) {
        if self.state != ManagerState::Idle {
            return;
        }
        self.concurrency = concurrency.max(1);
        self.state = ManagerState::Running;
        self.fill_slots();
    }

    /// Collect any newly finished tasks, back-filling freed slots
    ///
    /// Never blocks. Each returned completion is counted exactly once.
    pub fn poll_completed(&mut self) -> Vec<JobCompletion> {
        let mut drained = Vec::new();
        while let Some(result) = self.tasks.try_join_next_with_id() {
            if let Some(completion) = self.record(result) {
                drained.push(completion);
            }
        }
        self.fill_slots();
        drained
    }

    /// Stop the manager: cancel everything not yet admitted, then wait
    /// for in-flight tasks to finish
    ///
    /// Returns the cancelled jobs and the completions that finished while
    /// draining. Idempotent; a second call returns empty results.
    pub async fn stop(&mut self) -> (Vec<Job>, Vec<JobCompletion>) {
        if self.state == ManagerState::Stopped {
            return (Vec::new(), Vec::new());
        }
        self.state = ManagerState::Draining;

        // Jobs still in the FIFO were never admitted and are guaranteed
        // cancellable; in-flight sends run to completion.
        let cancelled: Vec<Job> = self.fifo.drain(..).collect();
        self.cancelled += cancelled.len();
        if !cancelled.is_empty() {
            debug!(count = cancelled.len(), "cancelled unadmitted jobs");
        }

        let mut drained = Vec::new();
        while let Some(result) = self.tasks.join_next_with_id().await {
            if let Some(completion) = self.record(result) {
                drained.push(completion);
            }
        }

        self.state = ManagerState::Stopped;
        (cancelled, drained)
    }

    /// True exactly when nothing is queued, nothing is in flight, and
    /// every submitted job has been accounted for
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.fifo.is_empty()
            && self.in_flight.is_empty()
            && self.completed + self.cancelled == self.submitted
    }

    /// Jobs currently in flight
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Jobs that have run to completion
    #[must_use]
    pub const fn completed_count(&self) -> usize {
        self.completed
    }

    /// Jobs ever submitted to this manager
    #[must_use]
    pub const fn submitted_count(&self) -> usize {
        self.submitted
    }

    /// Jobs cancelled before admission
    #[must_use]
    pub const fn cancelled_count(&self) -> usize {
        self.cancelled
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> ManagerState {
        self.state
    }

    fn fill_slots(&mut self) {
        while self.state == ManagerState::Running && self.in_flight.len() < self.concurrency {
            let Some(mut job) = self.fifo.pop_front() else {
                break;
            };
            job.status = JobStatus::Dispatched;
            let runner = Arc::clone(&self.runner);
            let task_job = job.clone();
            let handle = self.tasks.spawn(async move { runner.run(task_job).await });
            self.in_flight.insert(handle.id(), job);
        }
    }

    fn record(&mut self, result: Result<(Id, SendOutcome), JoinError>) -> Option<JobCompletion> {
        match result {
            Ok((id, outcome)) => {
                let mut job = self.in_flight.remove(&id)?;
                self.completed += 1;
                job.status = if outcome.success {
                    JobStatus::Succeeded
                } else {
                    JobStatus::Failed
                };
                Some(JobCompletion {
                    job,
                    outcome: Some(outcome),
                    fault: None,
                })
            }
            Err(join_error) => {
                let mut job = self.in_flight.remove(&join_error.id())?;
                self.completed += 1;
                job.status = JobStatus::Failed;
                Some(JobCompletion {
                    job,
                    outcome: None,
                    fault: Some(join_error.to_string()),
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use ahash::AHashMap;
    use chrono::Utc;
    use herald_common::{Endpoint, JobId, JobSource, TransportKind, WebhookEndpoint};

    use super::*;

    fn test_job(tag: &str) -> Job {
        let endpoint = Arc::new(Endpoint::Webhook(WebhookEndpoint {
            email: "script@example.com".to_string(),
            url: "https://hooks.example.com".to_string(),
            display_name: None,
        }));
        Job {
            id: JobId::generate(),
            recipients: vec![format!("{tag}@example.com")],
            subject: tag.to_string(),
            html_body: None,
            plain_body: None,
            headers: AHashMap::new(),
            endpoint,
            kind: TransportKind::Webhook,
            display_name: None,
            from_address: None,
            status: JobStatus::Prepared,
            created_at: Utc::now(),
            source: JobSource::Single,
            probe: false,
        }
    }

    struct CountingRunner {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Duration,
    }

    impl CountingRunner {
        fn new(delay: Duration) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl JobRunner for CountingRunner {
        async fn run(&self, job: Job) -> SendOutcome {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if job.subject.starts_with("fail") {
                SendOutcome::failure("destination rejected", self.delay)
            } else {
                SendOutcome::success("accepted", self.delay)
            }
        }
    }

    struct PanickingRunner;

    #[async_trait]
    impl JobRunner for PanickingRunner {
        async fn run(&self, job: Job) -> SendOutcome {
            assert!(job.subject != "boom", "runner exploded");
            SendOutcome::success("accepted", Duration::ZERO)
        }
    }

    async fn drive_to_completion(manager: &mut JobQueueManager) -> Vec<JobCompletion> {
        let mut all = Vec::new();
        while !manager.is_finished() {
            all.extend(manager.poll_completed());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        all.extend(manager.poll_completed());
        all
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn accounting_invariant_holds_at_completion() {
        let runner = Arc::new(CountingRunner::new(Duration::from_millis(5)));
        let mut manager = JobQueueManager::new(runner);
        for i in 0..20 {
            let tag = if i % 3 == 0 {
                format!("fail-{i}")
            } else {
                format!("job-{i}")
            };
            manager.add_job(test_job(&tag));
        }
        manager.start_processing(4);

        let completions = drive_to_completion(&mut manager).await;

        assert_eq!(manager.completed_count(), manager.submitted_count());
        assert!(manager.is_finished());
        let succeeded = completions.iter().filter(|c| c.succeeded()).count();
        let failed = completions.iter().filter(|c| !c.succeeded()).count();
        assert_eq!(succeeded + failed, manager.completed_count());
        assert_eq!(failed, 7);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrency_is_bounded() {
        let runner = Arc::new(CountingRunner::new(Duration::from_millis(20)));
        let mut manager = JobQueueManager::new(Arc::clone(&runner) as Arc<dyn JobRunner>);
        for i in 0..12 {
            manager.add_job(test_job(&format!("job-{i}")));
        }
        manager.start_processing(3);

        drive_to_completion(&mut manager).await;

        assert!(
            runner.max_in_flight.load(Ordering::SeqCst) <= 3,
            "more than 3 tasks were in flight at once"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_cancels_unadmitted_jobs_and_drains_in_flight() {
        let runner = Arc::new(CountingRunner::new(Duration::from_millis(30)));
        let mut manager = JobQueueManager::new(runner);
        for i in 0..10 {
            manager.add_job(test_job(&format!("job-{i}")));
        }
        manager.start_processing(2);

        let (cancelled, drained) = manager.stop().await;

        assert_eq!(cancelled.len(), 8);
        assert_eq!(drained.len(), 2);
        assert_eq!(manager.state(), ManagerState::Stopped);
        assert!(manager.is_finished());
        assert_eq!(
            manager.completed_count() + manager.cancelled_count(),
            manager.submitted_count()
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_is_idempotent() {
        let runner = Arc::new(CountingRunner::new(Duration::from_millis(5)));
        let mut manager = JobQueueManager::new(runner);
        manager.add_job(test_job("only"));
        manager.start_processing(1);

        let (first_cancelled, first_drained) = manager.stop().await;
        assert_eq!(first_cancelled.len() + first_drained.len(), 1);

        let (second_cancelled, second_drained) = manager.stop().await;
        assert!(second_cancelled.is_empty());
        assert!(second_drained.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn task_faults_are_recorded_distinctly() {
        let mut manager = JobQueueManager::new(Arc::new(PanickingRunner));
        manager.add_job(test_job("boom"));
        manager.add_job(test_job("fine"));
        manager.start_processing(2);

        let completions = drive_to_completion(&mut manager).await;

        assert_eq!(completions.len(), 2);
        let faulted = completions
            .iter()
            .find(|c| c.job.subject == "boom")
            .unwrap();
        assert!(faulted.fault.is_some());
        assert!(faulted.outcome.is_none());
        assert!(!faulted.succeeded());
        assert_eq!(faulted.job.status, JobStatus::Failed);

        let fine = completions
            .iter()
            .find(|c| c.job.subject == "fine")
            .unwrap();
        assert!(fine.fault.is_none());
        assert!(fine.succeeded());
        assert_eq!(fine.job.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn jobs_admit_in_fifo_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        struct OrderRunner(Arc<parking_lot::Mutex<Vec<String>>>);

        #[async_trait]
        impl JobRunner for OrderRunner {
            async fn run(&self, job: Job) -> SendOutcome {
                self.0.lock().push(job.subject.clone());
                SendOutcome::success("accepted", Duration::ZERO)
            }
        }

        let mut manager = JobQueueManager::new(Arc::new(OrderRunner(Arc::clone(&order))));
        for i in 0..6 {
            manager.add_job(test_job(&format!("job-{i}")));
        }
        // Single slot: admission order is completion order.
        manager.start_processing(1);
        drive_to_completion(&mut manager).await;

        let seen = order.lock().clone();
        let expected: Vec<String> = (0..6).map(|i| format!("job-{i}")).collect();
        assert_eq!(seen, expected);
    }
}
