//! herald: a bulk message dispatcher
//!
//! Wires the configuration, row-data provider, preparation layer and
//! dispatch engine together into one campaign run. The binary in this
//! crate is a thin CLI over [`run`].

pub mod config;
pub mod rows;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use herald_common::{CampaignSummary, Job, SendOutcome};
use herald_dispatch::{CampaignOrchestrator, RateLimiter, Transport, TransportSet};
use herald_template::{JobPreparer, RowData};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub use config::{CampaignConfig, Config, ConfigError};
pub use rows::{RowsError, read_rows};

/// Transport used by `--dry-run`: logs each job and reports success
/// without touching the network
pub struct DryRunTransport;

#[async_trait]
impl Transport for DryRunTransport {
    async fn send(&self, job: &Job, _limiter: Option<&RateLimiter>) -> SendOutcome {
        info!(
            job_id = %job.id.short(),
            recipient = %job.primary_recipient(),
            endpoint = %job.endpoint.identity(),
            subject = %job.subject,
            "dry run, not sending"
        );
        SendOutcome::success("dry run", Duration::ZERO)
    }
}

/// Prepare and run one campaign to completion
///
/// With no rows, a single job is prepared straight from the templates.
/// An interrupt (ctrl-c) stops the campaign gracefully: in-flight sends
/// run out, pending work is cleared, and the summary reflects what
/// happened before the stop.
pub async fn run(
    config: Config,
    row_data: Vec<RowData>,
    dry_run: bool,
) -> anyhow::Result<CampaignSummary> {
    let mut preparer = JobPreparer::new(config.campaign.to_templates(), config.endpoints.clone())
        .context("campaign preparation failed")?;

    let jobs = if row_data.is_empty() {
        vec![preparer.prepare_single()?]
    } else {
        preparer.prepare_campaign(row_data)
    };
    anyhow::ensure!(!jobs.is_empty(), "no jobs could be prepared");
    info!(jobs = jobs.len(), "campaign prepared");

    let transports = if dry_run {
        TransportSet::uniform(Arc::new(DryRunTransport))
    } else {
        TransportSet::defaults()
    };

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let renderer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            info!("{event}");
        }
    });

    let orchestrator = CampaignOrchestrator::new(
        jobs,
        &config.endpoints,
        config.dispatch.clone(),
        transports,
        events_tx,
    );
    orchestrator.start()?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        if orchestrator.is_idle() {
            break;
        }
        tokio::select! {
            _ = &mut ctrl_c => {
                warn!("interrupt received, stopping the campaign");
                orchestrator.stop().await;
                break;
            }
            () = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    let summary = orchestrator
        .summary()
        .context("campaign ended without a summary")?;

    drop(orchestrator);
    let _ = renderer.await;

    Ok(summary)
}
