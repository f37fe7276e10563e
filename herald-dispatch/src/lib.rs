//! Dispatch engine for the herald bulk message dispatcher
//!
//! This crate provides the four pieces of the engine:
//! - per-endpoint token-bucket rate limiting ([`rate_limiter`])
//! - the bounded worker-pool job queue ([`queue`])
//! - batch execution with progress events ([`batch`])
//! - campaign orchestration with pause/resume/stop ([`orchestrator`])
//!
//! plus the [`transport`] capability with its webhook and SMTP
//! implementations.

pub mod batch;
mod error;
pub mod orchestrator;
pub mod queue;
pub mod rate_limiter;
pub mod transport;

pub use batch::BatchWorker;
pub use error::DispatchError;
pub use orchestrator::{CampaignOrchestrator, DispatchConfig, ProbeConfig};
pub use queue::{JobCompletion, JobQueueManager, JobRunner, ManagerState};
pub use rate_limiter::{RateLimiter, RateLimiterPool, RateLimiterStats};
pub use transport::{SmtpTransport, Transport, TransportSet, WebhookTransport};
