//! The unit of work: a fully resolved outbound message bound to an endpoint

use std::{fmt, sync::Arc, time::Duration};

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;

/// Which transport a job is dispatched with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// HTTP post to a webhook-style account
    Webhook,
    /// SMTP session against a configured server
    Smtp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Webhook => f.write_str("webhook"),
            Self::Smtp => f.write_str("smtp"),
        }
    }
}

/// Unique identifier for a job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Short form used in status lines
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }

    /// The full identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Created, not yet resolved
    Pending,
    /// Fully resolved and admitted to the campaign list
    Prepared,
    /// Handed to a transport
    Dispatched,
    /// Transport reported success
    Succeeded,
    /// Transport reported failure or the send task faulted
    Failed,
}

/// Where a job came from, for status lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobSource {
    /// Produced from a data row (1-indexed)
    Row(usize),
    /// Single send prepared without row data
    Single,
    /// Delivery probe derived from a primary job
    Probe {
        /// Short id of the job the probe was derived from
        origin: String,
    },
}

impl fmt::Display for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Row(n) => write!(f, "row {n}"),
            Self::Single => f.write_str("single"),
            Self::Probe { origin } => write!(f, "probe of {origin}"),
        }
    }
}

/// Result record every transport call resolves to
///
/// Transports never panic past their boundary: timeouts, authentication,
/// network and protocol failures all arrive here as `success = false` with
/// a descriptive message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    /// Whether the destination accepted the message
    pub success: bool,
    /// Human-readable result description
    pub message: String,
    /// Wall-clock duration of the attempt
    pub elapsed: Duration,
}

impl SendOutcome {
    /// A successful attempt
    #[must_use]
    pub fn success(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: true,
            message: message.into(),
            elapsed,
        }
    }

    /// A failed attempt
    #[must_use]
    pub fn failure(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            message: message.into(),
            elapsed,
        }
    }
}

/// A fully prepared send job
///
/// Created once during campaign preparation and immutable afterwards apart
/// from status transitions recorded by the dispatch layer. The recipient
/// list is guaranteed non-empty by preparation; a job that resolves to no
/// recipients is rejected before it can reach a batch.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique identifier
    pub id: JobId,
    /// Ordered, deduplicated recipient addresses
    pub recipients: Vec<String>,
    /// Resolved subject line
    pub subject: String,
    /// Resolved HTML body, if authored
    pub html_body: Option<String>,
    /// Resolved plain-text body, if authored
    pub plain_body: Option<String>,
    /// Resolved custom headers (To/Subject/From overrides already applied)
    pub headers: AHashMap<String, String>,
    /// The delivery channel chosen for this job
    pub endpoint: Arc<Endpoint>,
    /// Transport kind, derived from the endpoint at preparation
    pub kind: TransportKind,
    /// Sender display name (webhook transport)
    pub display_name: Option<String>,
    /// Full From address (SMTP transport), e.g. `Name <user@example.com>`
    pub from_address: Option<String>,
    /// Lifecycle status
    pub status: JobStatus,
    /// When the job was prepared
    pub created_at: DateTime<Utc>,
    /// Origin of the job, for status lines
    pub source: JobSource,
    /// Whether this is a delivery probe rather than a primary job
    pub probe: bool,
}

impl Job {
    /// First recipient, used as the identity of the job in logs
    #[must_use]
    pub fn primary_recipient(&self) -> &str {
        self.recipients.first().map_or("", String::as_str)
    }

    /// Build a delivery probe from a primary job
    ///
    /// Copies only the resolved-content fields and re-derives everything
    /// recipient-specific: the recipient list collapses to the probe
    /// address, the To header is overridden, Cc/Bcc are stripped, and the
    /// subject and bodies gain a probe marker referencing the origin job.
    #[must_use]
    pub fn probe_from(origin: &Self, probe_recipient: &str) -> Self {
        let origin_short = origin.id.short().to_string();

        let mut headers: AHashMap<String, String> = origin
            .headers
            .iter()
            .filter(|(name, _)| {
                let name = name.to_ascii_lowercase();
                name != "cc" && name != "bcc" && name != "to"
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        headers.insert("To".to_string(), probe_recipient.to_string());

        let banner = format!("[delivery probe, origin {origin_short}]");
        let html_body = origin
            .html_body
            .as_ref()
            .map(|body| format!("<p>{banner}</p>\n{body}"));
        let plain_body = origin
            .plain_body
            .as_ref()
            .map(|body| format!("{banner}\n\n{body}"));

        Self {
            id: JobId::generate(),
            recipients: vec![probe_recipient.to_string()],
            subject: format!("{banner} {}", origin.subject),
            html_body,
            plain_body,
            headers,
            endpoint: Arc::clone(&origin.endpoint),
            kind: origin.kind,
            display_name: origin.display_name.clone(),
            from_address: origin.from_address.clone(),
            status: JobStatus::Prepared,
            created_at: Utc::now(),
            source: JobSource::Probe {
                origin: origin_short,
            },
            probe: true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::endpoint::WebhookEndpoint;

    fn sample_job() -> Job {
        let endpoint = Arc::new(Endpoint::Webhook(WebhookEndpoint {
            email: "sender@example.com".to_string(),
            url: "https://hooks.example.com/send".to_string(),
            display_name: None,
        }));
        let mut headers = AHashMap::new();
        headers.insert("To".to_string(), "alice@example.com".to_string());
        headers.insert("Cc".to_string(), "copy@example.com".to_string());
        headers.insert("X-Campaign".to_string(), "spring".to_string());
        Job {
            id: JobId::generate(),
            recipients: vec!["alice@example.com".to_string()],
            subject: "Hello".to_string(),
            html_body: Some("<p>Hi</p>".to_string()),
            plain_body: Some("Hi".to_string()),
            headers,
            endpoint,
            kind: TransportKind::Webhook,
            display_name: Some("Sender".to_string()),
            from_address: None,
            status: JobStatus::Prepared,
            created_at: Utc::now(),
            source: JobSource::Row(1),
            probe: false,
        }
    }

    #[test]
    fn job_id_short_form() {
        let id = JobId::generate();
        assert_eq!(id.short().len(), 8);
        assert!(id.as_str().starts_with(id.short()));
    }

    #[test]
    fn probe_overrides_recipient_and_strips_copies() {
        let origin = sample_job();
        let probe = Job::probe_from(&origin, "inbox-check@example.com");

        assert!(probe.probe);
        assert_eq!(probe.recipients, vec!["inbox-check@example.com"]);
        assert_eq!(
            probe.headers.get("To").map(String::as_str),
            Some("inbox-check@example.com")
        );
        assert!(!probe.headers.contains_key("Cc"));
        assert_eq!(
            probe.headers.get("X-Campaign").map(String::as_str),
            Some("spring")
        );
        assert_ne!(probe.id, origin.id);
        assert!(probe.subject.contains(origin.id.short()));
        assert!(probe.subject.contains(&origin.subject));
        assert!(probe.html_body.unwrap().contains("delivery probe"));
    }

    #[test]
    fn probe_keeps_origin_untouched() {
        let origin = sample_job();
        let before = origin.clone();
        let _probe = Job::probe_from(&origin, "inbox-check@example.com");
        assert_eq!(origin.subject, before.subject);
        assert_eq!(origin.recipients, before.recipients);
        assert_eq!(origin.headers.len(), before.headers.len());
    }
}
