//! Campaign orchestration: slicing, sequencing, pause/resume/stop
//!
//! The orchestrator owns the full ordered job list and a dispatch cursor.
//! Batches run sequentially (the next is dispatched from the previous
//! worker's completion) while jobs inside a batch run in parallel. The
//! control operations never block on in-flight sends; only an explicit
//! `stop` waits, and then only with a bounded per-worker timeout.

use std::collections::HashMap;
use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use herald_common::{
    BatchStats, CampaignCounters, CampaignSummary, DispatchEvent, Endpoint, Job,
};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tracing::{info, warn};

use crate::{
    batch::BatchWorker,
    error::DispatchError,
    rate_limiter::RateLimiterPool,
    transport::TransportSet,
};

const fn default_batch_size() -> usize {
    25
}

const fn default_concurrency() -> usize {
    10
}

const fn default_worker_stop_timeout_secs() -> u64 {
    7
}

const fn default_probe_after_every() -> usize {
    50
}

/// Periodic delivery-probe configuration
///
/// After every `after_every` successful primary sends, a probe job is
/// derived from the latest success and dispatched to `recipient` on its
/// own single-job worker, outside the campaign counters.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Where probes are delivered
    pub recipient: String,
    /// Primary successes between probes
    #[serde(default = "default_probe_after_every")]
    pub after_every: usize,
}

/// Dispatch settings for one campaign run
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Jobs per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent sends per batch worker
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Bound on the per-worker wait during an explicit stop (seconds)
    #[serde(default = "default_worker_stop_timeout_secs")]
    pub worker_stop_timeout_secs: u64,

    /// Periodic delivery probes, if configured
    #[serde(default)]
    pub probe: Option<ProbeConfig>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            worker_stop_timeout_secs: default_worker_stop_timeout_secs(),
            probe: None,
        }
    }
}

impl DispatchConfig {
    fn worker_stop_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_stop_timeout_secs.max(1))
    }
}

/// Campaign phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No run in progress
    Idle,
    /// Batches dispatching (possibly paused)
    Active,
    /// An explicit stop is draining the active workers
    Finalizing,
}

struct WorkerHandle {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

struct CampaignState {
    jobs: Vec<Job>,
    cursor: usize,
    phase: Phase,
    paused: bool,
    batch_seq: usize,
    active: HashMap<usize, WorkerHandle>,
    probes: HashMap<usize, WorkerHandle>,
    primaries_since_probe: usize,
    summary: Option<CampaignSummary>,
}

struct Inner {
    config: DispatchConfig,
    endpoints_selected: usize,
    limiters: Arc<RateLimiterPool>,
    transports: TransportSet,
    events: mpsc::UnboundedSender<DispatchEvent>,
    primary_tx: Option<mpsc::UnboundedSender<Job>>,
    primary_rx: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
    state: Mutex<CampaignState>,
    counters: Mutex<CampaignCounters>,
}

/// Drives one campaign's job list through sequential batches
///
/// Cheap to clone through its internal `Arc`; all control methods take
/// `&self`. Must be used inside a tokio runtime.
pub struct CampaignOrchestrator {
    inner: Arc<Inner>,
}

impl CampaignOrchestrator {
    /// Create an orchestrator over a prepared job list
    ///
    /// `endpoints` is the campaign's endpoint selection; it seeds the
    /// shared rate-limiter pool and is validated at `start`.
    #[must_use]
    pub fn new(
        jobs: Vec<Job>,
        endpoints: &[Endpoint],
        config: DispatchConfig,
        transports: TransportSet,
        events: mpsc::UnboundedSender<DispatchEvent>,
    ) -> Self {
        let (primary_tx, primary_rx) = if config.probe.is_some() {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        Self {
            inner: Arc::new(Inner {
                config,
                endpoints_selected: endpoints.len(),
                limiters: Arc::new(RateLimiterPool::from_endpoints(endpoints)),
                transports,
                events,
                primary_tx,
                primary_rx: Mutex::new(primary_rx),
                state: Mutex::new(CampaignState {
                    jobs,
                    cursor: 0,
                    phase: Phase::Idle,
                    paused: false,
                    batch_seq: 0,
                    active: HashMap::new(),
                    probes: HashMap::new(),
                    primaries_since_probe: 0,
                    summary: None,
                }),
                counters: Mutex::new(CampaignCounters::default()),
            }),
        }
    }

    /// Begin (or resume after a completed run) dispatching batches
    ///
    /// Aggregate counters reset only on a genuine fresh start, i.e. when
    /// the cursor sits at position zero.
    pub fn start(&self) -> Result<(), DispatchError> {
        if self.inner.endpoints_selected == 0 {
            return Err(DispatchError::Configuration(
                "no endpoints selected".to_string(),
            ));
        }

        {
            let mut state = self.inner.state.lock();
            if state.jobs.is_empty() {
                return Err(DispatchError::Configuration(
                    "campaign job list is empty".to_string(),
                ));
            }
            match state.phase {
                Phase::Finalizing => return Err(DispatchError::Stopping),
                Phase::Active if !state.paused => return Ok(()),
                _ => {}
            }

            // Restarting a fully dispatched list re-runs it from the top.
            if state.cursor >= state.jobs.len() {
                state.cursor = 0;
            }
            if state.cursor == 0 {
                self.inner.counters.lock().reset();
                state.summary = None;
            }
            state.phase = Phase::Active;
            state.paused = false;
            state.primaries_since_probe = 0;
        }

        self.spawn_probe_pump();
        info!("campaign starting");
        self.inner.dispatch_next_batch();
        Ok(())
    }

    /// Let in-flight batches run out but dispatch nothing new
    pub fn pause(&self) {
        let mut state = self.inner.state.lock();
        if state.phase == Phase::Active && !state.paused {
            state.paused = true;
            info!("campaign paused");
        }
    }

    /// Clear the pause; re-dispatch when work remains, finalize otherwise
    pub fn resume(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.phase != Phase::Active || !state.paused {
                return;
            }
            state.paused = false;
            state.primaries_since_probe = 0;
        }
        info!("campaign resumed");
        self.inner.dispatch_next_batch();
    }

    /// Stop the campaign and clear all pending work
    ///
    /// Signals every active worker, waits for each with a bounded
    /// per-worker timeout (a worker that fails to quiesce is logged and
    /// abandoned), clears the undispatched remainder, resets the cursor,
    /// and finalizes with whatever was accumulated before the stop.
    pub async fn stop(&self) {
        let (workers, probes) = {
            let mut state = self.inner.state.lock();
            if state.phase == Phase::Idle && state.active.is_empty() && state.probes.is_empty() {
                return;
            }
            state.phase = Phase::Finalizing;
            state.paused = true;
            (
                std::mem::take(&mut state.active),
                std::mem::take(&mut state.probes),
            )
        };

        info!(
            workers = workers.len(),
            probes = probes.len(),
            "campaign stopping"
        );
        for handle in workers.values().chain(probes.values()) {
            handle.stop.store(true, Ordering::SeqCst);
        }

        let per_worker = self.inner.config.worker_stop_timeout();
        for (batch_id, handle) in workers.into_iter().chain(probes) {
            if timeout(per_worker, handle.join).await.is_err() {
                warn!(
                    batch = batch_id,
                    "worker failed to quiesce within the stop timeout, abandoning it"
                );
            }
        }

        {
            let mut state = self.inner.state.lock();
            let remaining = state.jobs.len().saturating_sub(state.cursor);
            if remaining > 0 {
                info!(remaining, "clearing undispatched jobs");
            }
            state.jobs.clear();
            state.cursor = 0;
        }

        self.inner.finalize(true);
    }

    /// Snapshot of the aggregate counters, for pollers
    #[must_use]
    pub fn counters(&self) -> CampaignCounters {
        *self.inner.counters.lock()
    }

    /// The frozen summary of the last finalized run, if any
    #[must_use]
    pub fn summary(&self) -> Option<CampaignSummary> {
        self.inner.state.lock().summary
    }

    /// Jobs not yet handed to a batch worker
    #[must_use]
    pub fn remaining_jobs(&self) -> usize {
        let state = self.inner.state.lock();
        state.jobs.len().saturating_sub(state.cursor)
    }

    /// Batch workers currently running (probes excluded)
    #[must_use]
    pub fn active_batches(&self) -> usize {
        self.inner.state.lock().active.len()
    }

    /// Whether no run is in progress and nothing is in flight
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        state.phase == Phase::Idle && state.active.is_empty() && state.probes.is_empty()
    }

    /// The shared rate-limiter pool, keyed by SMTP endpoint nickname
    #[must_use]
    pub fn limiters(&self) -> Arc<RateLimiterPool> {
        Arc::clone(&self.inner.limiters)
    }

    fn spawn_probe_pump(&self) {
        let Some(mut rx) = self.inner.primary_rx.lock().take() else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let Some(inner) = Weak::upgrade(&weak) else {
                    break;
                };
                inner.primary_succeeded(&job);
            }
        });
    }
}

impl Inner {
    /// Slice and start the next batch, or finalize when nothing remains
    fn dispatch_next_batch(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.phase != Phase::Active || state.paused {
            return;
        }

        if state.cursor >= state.jobs.len() {
            if state.active.is_empty() {
                drop(state);
                self.finalize(false);
            }
            return;
        }

        let end = (state.cursor + self.config.batch_size.max(1)).min(state.jobs.len());
        let slice: Vec<Job> = state.jobs[state.cursor..end].to_vec();
        state.cursor = end;
        state.batch_seq += 1;
        let batch_id = state.batch_seq;

        // Batches are homogeneous by construction; the first job picks
        // the transport for all of them.
        let kind = slice[0].kind;
        info!(
            batch = batch_id,
            jobs = slice.len(),
            %kind,
            cursor = end,
            "dispatching batch"
        );

        let mut worker = BatchWorker::new(
            batch_id,
            slice,
            self.config.concurrency,
            self.transports.for_kind(kind),
            Arc::clone(&self.limiters),
            self.events.clone(),
        );
        if let Some(tx) = &self.primary_tx {
            worker = worker.with_primary_channel(tx.clone());
        }
        let stop = worker.stop_handle();

        let inner = Arc::clone(self);
        let join = tokio::spawn(async move {
            let stats = worker.run().await;
            inner.worker_done(batch_id, &stats, false);
        });

        state.active.insert(batch_id, WorkerHandle { stop, join });
    }

    /// A worker finished: fold its counters, then keep the campaign moving
    fn worker_done(self: &Arc<Self>, batch_id: usize, stats: &BatchStats, probe: bool) {
        let should_dispatch = {
            let mut state = self.state.lock();
            if probe {
                state.probes.remove(&batch_id);
                return;
            }
            state.active.remove(&batch_id);
            // A fold after finalization would mutate a frozen aggregate;
            // only the stop path can race us here, and it snapshots last.
            if state.phase != Phase::Idle {
                self.counters.lock().fold(stats);
            }
            state.phase == Phase::Active && !state.paused
        };

        if should_dispatch {
            self.dispatch_next_batch();
        }
    }

    /// A primary job succeeded somewhere; maybe dispatch a probe
    fn primary_succeeded(self: &Arc<Self>, origin: &Job) {
        let Some(probe_config) = &self.config.probe else {
            return;
        };

        let mut state = self.state.lock();
        if state.phase != Phase::Active {
            return;
        }
        state.primaries_since_probe += 1;
        if state.primaries_since_probe < probe_config.after_every.max(1) {
            return;
        }
        state.primaries_since_probe = 0;

        state.batch_seq += 1;
        let batch_id = state.batch_seq;
        let probe_job = Job::probe_from(origin, &probe_config.recipient);
        info!(
            batch = batch_id,
            origin = %origin.id.short(),
            recipient = %probe_config.recipient,
            "dispatching delivery probe"
        );

        let worker = BatchWorker::new(
            batch_id,
            vec![probe_job],
            1,
            self.transports.for_kind(origin.kind),
            Arc::clone(&self.limiters),
            self.events.clone(),
        )
        .as_probe();
        let stop = worker.stop_handle();

        let inner = Arc::clone(self);
        let join = tokio::spawn(async move {
            let stats = worker.run().await;
            inner.worker_done(batch_id, &stats, true);
        });

        state.probes.insert(batch_id, WorkerHandle { stop, join });
    }

    /// Freeze the aggregate and return to idle; idempotent per run
    fn finalize(self: &Arc<Self>, stopped: bool) {
        let summary = {
            let mut state = self.state.lock();
            if state.phase == Phase::Idle {
                return;
            }
            state.phase = Phase::Idle;
            state.paused = false;
            let summary = CampaignSummary::from_counters(&self.counters.lock(), stopped);
            state.summary = Some(summary);
            summary
        };

        info!(%summary, "campaign finalized");
        let _ = self.events.send(DispatchEvent::CampaignFinished { summary });
    }
}
