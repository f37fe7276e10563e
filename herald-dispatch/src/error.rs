//! Typed error handling for dispatch operations
//!
//! Transport-level failures never surface here: a send attempt that the
//! destination rejects, and a send task that faults, are both recorded as
//! failed-but-processed jobs and never abort a batch or the campaign.
//! These errors cover the control path only.

use thiserror::Error;

/// Errors raised by the campaign control path
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The campaign cannot start as configured (no endpoints selected,
    /// empty job list)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A control operation arrived while an explicit stop was draining
    /// the active workers
    #[error("campaign is stopping")]
    Stopping,
}

impl DispatchError {
    /// Returns `true` for start-time configuration problems
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
