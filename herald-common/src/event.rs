//! Progress events and aggregate counters
//!
//! Batch workers and the campaign orchestrator report progress as plain
//! events over a channel; whatever sits on the other end (a CLI renderer, a
//! test harness) decides how to present them.

use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::job::JobId;

/// How a completed job ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    /// The destination accepted the message
    Succeeded,
    /// The transport completed but the destination rejected or errored
    TransportFailed,
    /// The send task itself faulted unexpectedly
    Faulted,
}

impl fmt::Display for JobDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::TransportFailed => f.write_str("failed"),
            Self::Faulted => f.write_str("faulted"),
        }
    }
}

/// Counters for a single batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Jobs the batch was created with
    pub total: usize,
    /// Jobs that ran to completion (success, failure or fault)
    pub completed: usize,
    /// Completed jobs the destination accepted
    pub succeeded: usize,
    /// Completed jobs that failed or faulted
    pub failed: usize,
    /// Jobs removed from the queue before being admitted (stop)
    pub cancelled: usize,
}

impl BatchStats {
    /// Record one completion
    pub const fn record(&mut self, succeeded: bool) {
        self.completed += 1;
        if succeeded {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Campaign-wide aggregate, folded into by every finished batch
#[derive(Debug, Clone, Copy, Default)]
pub struct CampaignCounters {
    /// Jobs that ran to completion across all batches
    pub processed: u64,
    /// Processed jobs the destination accepted
    pub succeeded: u64,
    /// When the campaign run started
    pub started_at: Option<Instant>,
}

impl CampaignCounters {
    /// Reset for a fresh campaign start
    pub fn reset(&mut self) {
        *self = Self {
            processed: 0,
            succeeded: 0,
            started_at: Some(Instant::now()),
        };
    }

    /// Fold a finished batch into the aggregate
    pub fn fold(&mut self, stats: &BatchStats) {
        self.processed += stats.completed as u64;
        self.succeeded += stats.succeeded as u64;
    }
}

/// Frozen summary computed at campaign finalization
#[derive(Debug, Clone, Copy)]
pub struct CampaignSummary {
    /// Jobs processed before finalization
    pub processed: u64,
    /// Jobs the destinations accepted
    pub succeeded: u64,
    /// Success percentage over processed jobs
    pub success_rate: f64,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
    /// Processed jobs per second
    pub throughput: f64,
    /// Whether the run was cut short by an explicit stop
    pub stopped: bool,
}

impl CampaignSummary {
    /// Freeze the aggregate counters into a summary
    #[must_use]
    pub fn from_counters(counters: &CampaignCounters, stopped: bool) -> Self {
        let elapsed = counters
            .started_at
            .map_or(Duration::ZERO, |started| started.elapsed());
        let processed = counters.processed;
        let success_rate = (counters.succeeded as f64 / processed.max(1) as f64) * 100.0;
        let throughput = if elapsed.as_secs_f64() > 0.01 {
            processed as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        Self {
            processed,
            succeeded: counters.succeeded,
            success_rate,
            elapsed,
            throughput,
            stopped,
        }
    }
}

impl fmt::Display for CampaignSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} successful ({:.1}%) in {:.2}s ({:.1} jobs/s){}",
            self.succeeded,
            self.processed,
            self.success_rate,
            self.elapsed.as_secs_f64(),
            self.throughput,
            if self.stopped { ", stopped early" } else { "" },
        )
    }
}

/// One entry in the dispatch progress stream
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    /// A job ran to completion inside a batch
    JobCompleted {
        /// Batch sequence number
        batch: usize,
        /// The job's identifier
        job_id: JobId,
        /// Primary recipient, for the status line
        recipient: String,
        /// How the job ended up
        disposition: JobDisposition,
        /// Transport or fault message
        message: String,
        /// Duration of the send attempt
        elapsed: Duration,
        /// Whether the job was a delivery probe
        probe: bool,
    },
    /// Aggregate progress for one batch
    BatchProgress {
        /// Batch sequence number
        batch: usize,
        /// Jobs completed so far
        completed: usize,
        /// Jobs currently in flight
        active: usize,
        /// Jobs in the batch
        total: usize,
    },
    /// A batch ran to completion or was stopped
    BatchFinished {
        /// Batch sequence number
        batch: usize,
        /// False when the batch was cut short by a stop
        success: bool,
        /// Summary line for the batch
        message: String,
        /// Final counters
        stats: BatchStats,
        /// Whether the batch carried a delivery probe
        probe: bool,
    },
    /// The campaign finalized
    CampaignFinished {
        /// Frozen aggregate summary
        summary: CampaignSummary,
    },
}

impl fmt::Display for DispatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JobCompleted {
                batch,
                job_id,
                recipient,
                disposition,
                message,
                elapsed,
                probe,
            } => {
                let marker = if *probe { " [probe]" } else { "" };
                write!(
                    f,
                    "batch {batch}: job {}{marker} to {recipient} {disposition} ({:.2}s) - {message}",
                    job_id.short(),
                    elapsed.as_secs_f64(),
                )
            }
            Self::BatchProgress {
                batch,
                completed,
                active,
                total,
            } => write!(
                f,
                "batch {batch}: {completed}/{total} complete, {active} in flight"
            ),
            Self::BatchFinished {
                batch,
                success,
                message,
                ..
            } => {
                let state = if *success { "finished" } else { "stopped" };
                write!(f, "batch {batch} {state}: {message}")
            }
            Self::CampaignFinished { summary } => write!(f, "campaign finished: {summary}"),
        }
    }
}
