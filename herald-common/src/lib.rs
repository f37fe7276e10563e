//! Shared data model for the herald bulk message dispatcher
//!
//! This crate defines what every other herald crate talks about: delivery
//! endpoints, prepared jobs, the transport outcome record, the dispatch
//! event stream and aggregate counters, plus the tracing bootstrap.

pub mod endpoint;
pub mod event;
pub mod job;
pub mod logging;

pub use endpoint::{Encryption, Endpoint, RateLimitParams, SmtpEndpoint, WebhookEndpoint};
pub use event::{BatchStats, CampaignCounters, CampaignSummary, DispatchEvent, JobDisposition};
pub use job::{Job, JobId, JobSource, JobStatus, SendOutcome, TransportKind};
