//! Webhook transport: one HTTP post per job

use std::time::{Duration, Instant};

use async_trait::async_trait;
use herald_common::{Job, SendOutcome};
use serde_json::{Value, json};

use crate::rate_limiter::RateLimiter;

use super::Transport;

/// Ceiling for one delivery attempt, connection included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Posts the resolved payload to the endpoint's web-app URL
pub struct WebhookTransport {
    client: reqwest::Client,
}

impl WebhookTransport {
    /// Build the transport with its shared HTTP client
    #[must_use]
    #[allow(clippy::expect_used, reason = "client build only fails on TLS misconfiguration")]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("failed to create HTTP client"),
        }
    }
}

impl Default for WebhookTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn payload_of(job: &Job) -> Value {
    let mut payload = json!({
        "to": job.recipients.join(", "),
        "subject": job.subject,
    });
    if let Some(html) = &job.html_body {
        payload["htmlBody"] = json!(html);
    }
    if let Some(plain) = &job.plain_body {
        payload["plainBody"] = json!(plain);
    }
    if !job.headers.is_empty() {
        payload["headers"] = json!(job.headers);
    }
    if let Some(name) = &job.display_name {
        payload["fromName"] = json!(name);
    }
    payload
}

#[async_trait]
impl Transport for WebhookTransport {
    async fn send(&self, job: &Job, _limiter: Option<&RateLimiter>) -> SendOutcome {
        let started = Instant::now();

        let Some(account) = job.endpoint.as_webhook() else {
            return SendOutcome::failure(
                "job reached the webhook transport without a webhook endpoint",
                started.elapsed(),
            );
        };

        let response = match self
            .client
            .post(&account.url)
            .json(&payload_of(job))
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) if error.is_timeout() => {
                return SendOutcome::failure("webhook timed out", started.elapsed());
            }
            Err(error) => {
                return SendOutcome::failure(
                    format!("webhook request failed: {error}"),
                    started.elapsed(),
                );
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return SendOutcome::failure(
                format!("webhook HTTP {status}: {snippet}"),
                started.elapsed(),
            );
        }

        match response.json::<Value>().await {
            Ok(body) => {
                let message = body
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if body.get("status").and_then(Value::as_str) == Some("success") {
                    SendOutcome::success(format!("webhook accepted: {message}"), started.elapsed())
                } else {
                    SendOutcome::failure(
                        format!("webhook rejected: {message}"),
                        started.elapsed(),
                    )
                }
            }
            Err(error) => SendOutcome::failure(
                format!("webhook returned an unparseable body: {error}"),
                started.elapsed(),
            ),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use ahash::AHashMap;
    use chrono::Utc;
    use herald_common::{
        Endpoint, JobId, JobSource, JobStatus, TransportKind, WebhookEndpoint,
    };

    use super::*;

    fn webhook_job() -> Job {
        let endpoint = Arc::new(Endpoint::Webhook(WebhookEndpoint {
            email: "script@example.com".to_string(),
            url: "https://hooks.example.com/send".to_string(),
            display_name: None,
        }));
        let mut headers = AHashMap::new();
        headers.insert("X-Campaign".to_string(), "spring".to_string());
        Job {
            id: JobId::generate(),
            recipients: vec!["a@example.com".to_string(), "b@example.com".to_string()],
            subject: "Hello".to_string(),
            html_body: Some("<p>Hi</p>".to_string()),
            plain_body: None,
            headers,
            endpoint,
            kind: TransportKind::Webhook,
            display_name: Some("The Team".to_string()),
            from_address: None,
            status: JobStatus::Prepared,
            created_at: Utc::now(),
            source: JobSource::Single,
            probe: false,
        }
    }

    #[test]
    fn payload_carries_resolved_fields() {
        let job = webhook_job();
        let payload = payload_of(&job);
        assert_eq!(payload["to"], "a@example.com, b@example.com");
        assert_eq!(payload["subject"], "Hello");
        assert_eq!(payload["htmlBody"], "<p>Hi</p>");
        assert!(payload.get("plainBody").is_none());
        assert_eq!(payload["headers"]["X-Campaign"], "spring");
        assert_eq!(payload["fromName"], "The Team");
    }

    #[tokio::test]
    async fn mismatched_endpoint_fails_without_io() {
        let mut job = webhook_job();
        job.endpoint = Arc::new(Endpoint::Smtp(herald_common::SmtpEndpoint {
            nickname: "bulk".to_string(),
            host: "mail.example.com".to_string(),
            port: 587,
            username: "u".to_string(),
            password: "p".to_string(),
            encryption: herald_common::Encryption::Starttls,
            from_address: None,
            rate: herald_common::RateLimitParams::default(),
        }));
        let outcome = WebhookTransport::new().send(&job, None).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("without a webhook endpoint"));
    }
}
