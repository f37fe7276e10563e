//! Delivery endpoint configuration
//!
//! An endpoint is a configured delivery channel: either a webhook-style
//! account (a script user identified by email, posting to a web-app URL) or
//! an SMTP server. Endpoints are loaded once and are immutable for the
//! duration of a campaign run; SMTP endpoints carry the rate-limit
//! parameters their shared token bucket is built from.

use serde::{Deserialize, Serialize};

use crate::job::TransportKind;

/// Connection security for an SMTP endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encryption {
    /// No encryption (not recommended)
    None,
    /// Opportunistic STARTTLS upgrade
    #[default]
    #[serde(alias = "tls")]
    Starttls,
    /// Implicit TLS from the first byte
    Ssl,
}

/// Rate-limit parameters for an SMTP endpoint
///
/// A limit of `max_count` messages per `period_secs` seconds refills the
/// endpoint's token bucket at `max_count / period_secs` tokens per second,
/// with short bursts absorbed up to `burst` tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitParams {
    /// Messages allowed per period
    #[serde(default = "default_max_count")]
    pub max_count: u32,

    /// Period length in seconds
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,

    /// Burst size (maximum tokens in the bucket)
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitParams {
    fn default() -> Self {
        Self {
            max_count: default_max_count(),
            period_secs: default_period_secs(),
            burst: default_burst(),
        }
    }
}

const fn default_max_count() -> u32 {
    60
}

const fn default_period_secs() -> u64 {
    60
}

const fn default_burst() -> u32 {
    5
}

impl RateLimitParams {
    /// Sustained refill rate in tokens per second
    ///
    /// Clamped to a minimum positive rate so a zeroed configuration can
    /// never produce a bucket that refills nothing.
    #[must_use]
    pub fn tokens_per_second(&self) -> f64 {
        let period = self.period_secs.max(1);
        (f64::from(self.max_count) / period as f64).max(0.1)
    }

    /// Burst capacity, at least one token
    #[must_use]
    pub const fn burst_capacity(&self) -> u32 {
        if self.burst == 0 { 1 } else { self.burst }
    }
}

/// A webhook-style delivery account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    /// Account email, unique among webhook endpoints
    pub email: String,
    /// URL the message payload is posted to
    pub url: String,
    /// Default display name for the sender, if configured
    #[serde(default)]
    pub display_name: Option<String>,
}

/// An SMTP server endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpEndpoint {
    /// Nickname, unique among SMTP endpoints; keys the shared rate limiter
    pub nickname: String,
    /// Server hostname
    pub host: String,
    /// Server port
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Authentication username
    pub username: String,
    /// Authentication password
    pub password: String,
    /// Connection security mode
    #[serde(default)]
    pub encryption: Encryption,
    /// Configured default From address, e.g. `Sender <sender@example.com>`
    #[serde(default)]
    pub from_address: Option<String>,
    /// Throttling parameters for this server
    #[serde(default)]
    pub rate: RateLimitParams,
}

const fn default_smtp_port() -> u16 {
    587
}

/// A configured delivery channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Endpoint {
    /// Webhook-style account
    Webhook(WebhookEndpoint),
    /// SMTP server
    Smtp(SmtpEndpoint),
}

impl Endpoint {
    /// The identity this endpoint is known by: the webhook account email or
    /// the SMTP server nickname
    #[must_use]
    pub fn identity(&self) -> &str {
        match self {
            Self::Webhook(account) => &account.email,
            Self::Smtp(server) => &server.nickname,
        }
    }

    /// The transport kind jobs on this endpoint are dispatched with
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        match self {
            Self::Webhook(_) => TransportKind::Webhook,
            Self::Smtp(_) => TransportKind::Smtp,
        }
    }

    /// The SMTP configuration, if this is an SMTP endpoint
    #[must_use]
    pub const fn as_smtp(&self) -> Option<&SmtpEndpoint> {
        match self {
            Self::Smtp(server) => Some(server),
            Self::Webhook(_) => None,
        }
    }

    /// The webhook configuration, if this is a webhook endpoint
    #[must_use]
    pub const fn as_webhook(&self) -> Option<&WebhookEndpoint> {
        match self {
            Self::Webhook(account) => Some(account),
            Self::Smtp(_) => None,
        }
    }
}
