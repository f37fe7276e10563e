//! SMTP transport: one authenticated session per job
//!
//! The attached rate limiter is acquired before any connection is opened,
//! so a throttled endpoint holds back the send task without tying up a
//! server connection.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use herald_common::{Encryption, Job, SendOutcome, SmtpEndpoint};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{
        Mailbox, MultiPart,
        header::{ContentType, HeaderName, HeaderValue},
    },
    transport::smtp::authentication::Credentials,
};
use tracing::warn;

use crate::rate_limiter::RateLimiter;

use super::Transport;

/// How long a send task may wait on the endpoint's token bucket
const LIMITER_TIMEOUT: Duration = Duration::from_secs(15);

/// Ceiling for the SMTP session itself
const SESSION_TIMEOUT: Duration = Duration::from_secs(25);

/// Headers that travel as dedicated message fields, never as raw headers
const RESERVED_HEADERS: [&str; 3] = ["from", "to", "subject"];

/// Delivers jobs over SMTP per the endpoint's encryption mode
pub struct SmtpTransport {
    limiter_timeout: Duration,
}

impl SmtpTransport {
    /// Build the transport
    #[must_use]
    pub const fn new() -> Self {
        Self {
            limiter_timeout: LIMITER_TIMEOUT,
        }
    }

    async fn deliver(job: &Job, server: &SmtpEndpoint) -> Result<String, String> {
        let message = build_message(job, server)?;

        let mut builder = match server.encryption {
            Encryption::Ssl => AsyncSmtpTransport::<Tokio1Executor>::relay(&server.host)
                .map_err(|error| format!("SMTP relay setup failed: {error}"))?,
            Encryption::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&server.host)
                    .map_err(|error| format!("SMTP STARTTLS setup failed: {error}"))?
            }
            Encryption::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&server.host)
            }
        };
        builder = builder.port(server.port).timeout(Some(SESSION_TIMEOUT));
        if !server.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                server.username.clone(),
                server.password.clone(),
            ));
        }

        let mailer = builder.build();
        match mailer.send(message).await {
            Ok(response) => Ok(format!("SMTP accepted: {}", response.code())),
            Err(error) => Err(format!("SMTP send failed: {error}")),
        }
    }
}

impl Default for SmtpTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn build_message(job: &Job, server: &SmtpEndpoint) -> Result<Message, String> {
    let from: Mailbox = job
        .from_address
        .as_deref()
        .unwrap_or(&server.username)
        .parse()
        .map_err(|error| format!("invalid From address: {error}"))?;

    let mut builder = Message::builder().from(from).subject(job.subject.clone());
    for recipient in &job.recipients {
        let mailbox: Mailbox = recipient
            .parse()
            .map_err(|error| format!("invalid recipient {recipient}: {error}"))?;
        builder = builder.to(mailbox);
    }

    let mut message = match (&job.html_body, &job.plain_body) {
        (Some(html), Some(plain)) => builder
            .multipart(MultiPart::alternative_plain_html(
                plain.clone(),
                html.clone(),
            ))
            .map_err(|error| format!("message build failed: {error}"))?,
        (Some(html), None) => builder
            .header(ContentType::TEXT_HTML)
            .body(html.clone())
            .map_err(|error| format!("message build failed: {error}"))?,
        (None, Some(plain)) => builder
            .header(ContentType::TEXT_PLAIN)
            .body(plain.clone())
            .map_err(|error| format!("message build failed: {error}"))?,
        (None, None) => builder
            .header(ContentType::TEXT_PLAIN)
            .body(String::new())
            .map_err(|error| format!("message build failed: {error}"))?,
    };

    for (name, value) in &job.headers {
        if RESERVED_HEADERS
            .iter()
            .any(|reserved| name.eq_ignore_ascii_case(reserved))
        {
            continue;
        }
        match HeaderName::new_from_ascii(name.clone()) {
            Ok(header_name) => {
                message
                    .headers_mut()
                    .insert_raw(HeaderValue::new(header_name, value.clone()));
            }
            Err(error) => {
                warn!(header = %name, %error, "custom header dropped");
            }
        }
    }

    Ok(message)
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, job: &Job, limiter: Option<&RateLimiter>) -> SendOutcome {
        let started = Instant::now();

        let Some(server) = job.endpoint.as_smtp() else {
            return SendOutcome::failure(
                "job reached the SMTP transport without an SMTP endpoint",
                started.elapsed(),
            );
        };

        if let Some(limiter) = limiter
            && !limiter.acquire(self.limiter_timeout).await
        {
            return SendOutcome::failure("rate limit acquisition timed out", started.elapsed());
        }

        match Self::deliver(job, server).await {
            Ok(message) => SendOutcome::success(message, started.elapsed()),
            Err(message) => SendOutcome::failure(message, started.elapsed()),
        }
    }
}
