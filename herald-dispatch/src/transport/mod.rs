//! Transport capability and the per-kind implementations
//!
//! A transport takes one job plus its resolved payload fields (and, for
//! SMTP, the attached rate limiter) and resolves to a [`SendOutcome`]. It
//! never panics past its boundary: timeouts, authentication, network and
//! protocol failures all become `success = false` with a descriptive
//! message. Protocol internals beyond that contract are not this crate's
//! concern.

mod smtp;
mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use herald_common::{Job, SendOutcome, TransportKind};

pub use smtp::SmtpTransport;
pub use webhook::WebhookTransport;

use crate::rate_limiter::RateLimiter;

/// Sends one job to its destination
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attempt delivery of `job`, throttling through `limiter` when one
    /// is attached
    async fn send(&self, job: &Job, limiter: Option<&RateLimiter>) -> SendOutcome;
}

/// The transports a campaign dispatches with, one per kind
///
/// Batches are homogeneous by construction, so a batch worker picks its
/// transport once, from the first job's kind.
#[derive(Clone)]
pub struct TransportSet {
    webhook: Arc<dyn Transport>,
    smtp: Arc<dyn Transport>,
}

impl TransportSet {
    /// Build a set from explicit implementations
    #[must_use]
    pub fn new(webhook: Arc<dyn Transport>, smtp: Arc<dyn Transport>) -> Self {
        Self { webhook, smtp }
    }

    /// The real webhook and SMTP transports
    #[must_use]
    pub fn defaults() -> Self {
        Self::new(
            Arc::new(WebhookTransport::new()),
            Arc::new(SmtpTransport::new()),
        )
    }

    /// The same transport for both kinds; used by dry runs and tests
    #[must_use]
    pub fn uniform(transport: Arc<dyn Transport>) -> Self {
        Self {
            webhook: Arc::clone(&transport),
            smtp: transport,
        }
    }

    /// The transport for a job kind
    #[must_use]
    pub fn for_kind(&self, kind: TransportKind) -> Arc<dyn Transport> {
        match kind {
            TransportKind::Webhook => Arc::clone(&self.webhook),
            TransportKind::Smtp => Arc::clone(&self.smtp),
        }
    }
}
