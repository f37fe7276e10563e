//! Campaign preparation: templates + row data + endpoints -> prepared jobs
//!
//! Preparation is where every placeholder, dynamic tag and spintax choice
//! is resolved for an individual job. A job leaves this module fully
//! resolved and immutable; the dispatch layer only records status
//! transitions from then on.

use std::sync::{Arc, LazyLock};

use ahash::AHashMap;
use chrono::Utc;
use herald_common::{Endpoint, Job, JobId, JobSource, JobStatus, SmtpEndpoint};
use regex::Regex;
use thiserror::Error;
use tracing::warn;

use crate::{
    recipients,
    resolver::{RowData, TemplateResolver, ctx},
};

#[allow(clippy::expect_used, reason = "the patterns are checked literals")]
mod patterns {
    use super::{LazyLock, Regex};

    /// `Display Name <user@example.com>`
    pub static NAME_ADDR: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(.*?)<([^<>]+)>$").expect("name-addr pattern"));

    /// The address inside angle brackets
    pub static ANGLE_ADDR: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<([^<>]+)>").expect("angle-addr pattern"));
}

/// Fallback sender address when an SMTP endpoint yields no usable one
const FALLBACK_SENDER: &str = "sender@herald.invalid";

/// Errors raised while preparing jobs
#[derive(Debug, Error)]
pub enum PrepareError {
    /// No endpoints were selected for the campaign
    #[error("no endpoints selected")]
    NoEndpoints,

    /// The job's recipient list resolved empty; the job must never reach
    /// the transport layer
    #[error("recipient list resolved empty for {0}")]
    NoRecipients(JobSource),
}

/// The authored content a campaign is prepared from
///
/// Subject and from-name lists are cycled across jobs; header lines are
/// `Name: value-template` pairs whose values are fully resolved per job.
#[derive(Debug, Clone, Default)]
pub struct ContentTemplates {
    /// Subject line templates, cycled per job
    pub subjects: Vec<String>,
    /// From-name templates, cycled per job
    pub from_names: Vec<String>,
    /// Recipient template, resolved against each row
    pub to: String,
    /// HTML body template
    pub html_body: Option<String>,
    /// Plain-text body template
    pub plain_body: Option<String>,
    /// Custom header templates as (name, value-template) pairs
    pub headers: Vec<(String, String)>,
}

impl ContentTemplates {
    /// Parse a header block of `Name: value` lines into header templates,
    /// ignoring lines without a colon
    #[must_use]
    pub fn parse_header_block(block: &str) -> Vec<(String, String)> {
        block
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                let (name, value) = line.split_once(':')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some((name.to_string(), value.trim().to_string()))
            })
            .collect()
    }

    fn has_to_header(&self) -> bool {
        self.headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("to"))
    }
}

/// Prepares jobs for one campaign, cycling endpoints and template lists
#[derive(Debug)]
pub struct JobPreparer {
    templates: ContentTemplates,
    endpoints: Vec<Arc<Endpoint>>,
    next_endpoint: usize,
    prepared: usize,
}

impl JobPreparer {
    /// Create a preparer over the selected endpoints
    pub fn new(
        templates: ContentTemplates,
        endpoints: Vec<Endpoint>,
    ) -> Result<Self, PrepareError> {
        if endpoints.is_empty() {
            return Err(PrepareError::NoEndpoints);
        }
        Ok(Self {
            templates,
            endpoints: endpoints.into_iter().map(Arc::new).collect(),
            next_endpoint: 0,
            prepared: 0,
        })
    }

    /// Jobs prepared so far
    #[must_use]
    pub const fn prepared(&self) -> usize {
        self.prepared
    }

    /// Prepare one job from a data row
    ///
    /// # Errors
    ///
    /// Returns [`PrepareError::NoRecipients`] when the row resolves to an
    /// empty recipient list (after any `To:` header override); such a job
    /// is excluded before it can reach a batch.
    pub fn prepare_row(&mut self, row: &RowData, source: JobSource) -> Result<Job, PrepareError> {
        let endpoint = self.cycle_endpoint();
        let job_id = JobId::generate();

        let mut resolver = TemplateResolver::new(row);
        seed_context(&mut resolver, &job_id, &endpoint);

        // Initial recipients from the To template; a custom To header may
        // still override or supply them below.
        let to_resolved = resolver.resolve_with_spintax(&self.templates.to);
        let mut recipient_list = recipients::parse(&to_resolved);
        if recipient_list.is_empty() && !self.templates.has_to_header() {
            return Err(PrepareError::NoRecipients(source));
        }
        if let Some(first) = recipient_list.first() {
            resolver.context_mut().insert(ctx::RECIPIENT, first.clone());
        }

        // Subject and from-name resolve early so later fields (bodies,
        // header values) can reference them through context tags.
        let mut subject = {
            let template = cycled(&self.templates.subjects, self.prepared);
            let resolved = resolver.resolve_with_spintax(template);
            if resolved.trim().is_empty() {
                "No Subject".to_string()
            } else {
                resolved
            }
        };
        resolver.context_mut().insert(ctx::SUBJECT, subject.clone());

        let from_name = {
            let template = cycled(&self.templates.from_names, self.prepared);
            resolver.resolve_with_spintax(template)
        };
        resolver
            .context_mut()
            .insert(ctx::FROM_NAME, from_name.clone());

        let html_body = self
            .templates
            .html_body
            .as_deref()
            .map(|template| resolver.resolve_with_spintax(template));
        let plain_body = self
            .templates
            .plain_body
            .as_deref()
            .map(|template| resolver.resolve_with_spintax(template));

        let mut headers: AHashMap<String, String> = AHashMap::new();
        for (name, value_template) in &self.templates.headers {
            let value = resolver.resolve_with_spintax(value_template);
            headers.insert(name.clone(), value);
        }

        if let Some(value) = header_value(&headers, "subject") {
            subject = value.to_string();
        }

        if let Some(value) = header_value(&headers, "to") {
            let overridden = recipients::parse(value);
            if overridden.is_empty() {
                warn!(
                    job_id = %job_id,
                    value,
                    "custom To header resolved to no valid addresses"
                );
            } else {
                resolver
                    .context_mut()
                    .insert(ctx::RECIPIENT, overridden[0].clone());
                recipient_list = overridden;
            }
        }

        if recipient_list.is_empty() {
            return Err(PrepareError::NoRecipients(source));
        }

        let from_header = header_value(&headers, "from").map(ToString::to_string);
        let kind = endpoint.kind();

        let (display_name, from_address, headers) = match endpoint.as_ref() {
            Endpoint::Webhook(account) => {
                let display = from_header
                    .as_deref()
                    .map(display_name_of)
                    .or_else(|| non_empty(&from_name))
                    .or_else(|| account.display_name.clone());
                // To/Subject/From travel as dedicated payload fields; the
                // forwarded header map must not repeat them.
                let forwarded = headers
                    .into_iter()
                    .filter(|(name, _)| {
                        let name = name.to_ascii_lowercase();
                        !matches!(name.as_str(), "to" | "subject" | "from" | "cc" | "bcc")
                    })
                    .collect();
                (display, None, forwarded)
            }
            Endpoint::Smtp(server) => {
                let address = from_header
                    .unwrap_or_else(|| build_from_address(&from_name, server));
                (None, Some(address), headers)
            }
        };

        self.prepared += 1;

        Ok(Job {
            id: job_id,
            recipients: recipient_list,
            subject,
            html_body,
            plain_body,
            headers,
            endpoint,
            kind,
            display_name,
            from_address,
            status: JobStatus::Prepared,
            created_at: Utc::now(),
            source,
            probe: false,
        })
    }

    /// Prepare a single job without row data
    pub fn prepare_single(&mut self) -> Result<Job, PrepareError> {
        self.prepare_row(&RowData::default(), JobSource::Single)
    }

    /// Prepare the whole campaign, skipping rows that fail resolution
    pub fn prepare_campaign<I>(&mut self, rows: I) -> Vec<Job>
    where
        I: IntoIterator<Item = RowData>,
    {
        rows.into_iter()
            .enumerate()
            .filter_map(|(index, row)| {
                match self.prepare_row(&row, JobSource::Row(index + 1)) {
                    Ok(job) => Some(job),
                    Err(error) => {
                        warn!(row = index + 1, %error, "row skipped during preparation");
                        None
                    }
                }
            })
            .collect()
    }

    fn cycle_endpoint(&mut self) -> Arc<Endpoint> {
        let endpoint = Arc::clone(&self.endpoints[self.next_endpoint % self.endpoints.len()]);
        self.next_endpoint += 1;
        endpoint
    }
}

fn seed_context(resolver: &mut TemplateResolver<'_>, job_id: &JobId, endpoint: &Endpoint) {
    resolver.context_mut().insert(ctx::JOB_ID, job_id.as_str());
    match endpoint {
        Endpoint::Webhook(account) => {
            resolver
                .context_mut()
                .insert(ctx::ENDPOINT_EMAIL, account.email.clone());
            resolver
                .context_mut()
                .insert(ctx::SMTP_NAME, account.email.clone());
        }
        Endpoint::Smtp(server) => {
            resolver
                .context_mut()
                .insert(ctx::SMTP_USER, server.username.clone());
            resolver
                .context_mut()
                .insert(ctx::SMTP_NAME, server.nickname.clone());
        }
    }
}

fn cycled(templates: &[String], index: usize) -> &str {
    if templates.is_empty() {
        ""
    } else {
        &templates[index % templates.len()]
    }
}

fn header_value<'h>(headers: &'h AHashMap<String, String>, name: &str) -> Option<&'h str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Pull the display-name part out of a From header value, falling back to
/// the whole value when it is not in name-addr form
fn display_name_of(from_header: &str) -> String {
    let trimmed = from_header.trim();
    patterns::NAME_ADDR.captures(trimmed).map_or_else(
        || trimmed.to_string(),
        |caps| caps[1].trim().trim_matches('"').to_string(),
    )
}

/// Build the SMTP From address, e.g. `Display Name <user@example.com>`
///
/// The address part prefers the server's configured from-address (bare or
/// in angle brackets) over its username; the display part prefers the
/// resolved from-name over any name embedded in the server configuration.
fn build_from_address(display_name: &str, server: &SmtpEndpoint) -> String {
    let configured = server
        .from_address
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();

    let mut address = server.username.trim().to_string();
    if let Some(caps) = patterns::ANGLE_ADDR.captures(configured) {
        address = caps[1].trim().to_string();
    } else if configured.contains('@') {
        address = configured.to_string();
    }

    if !address.contains('@') {
        warn!(
            nickname = %server.nickname,
            "no usable sender address on endpoint, using fallback"
        );
        address = FALLBACK_SENDER.to_string();
    }

    if let Some(name) = non_empty(display_name) {
        return format!("{name} <{address}>");
    }

    // No resolved display name; salvage one from the configured
    // name-addr form if present.
    if let Some(caps) = patterns::NAME_ADDR.captures(configured) {
        let name = caps[1].trim().trim_matches('"');
        if !name.is_empty() {
            return format!("{name} <{address}>");
        }
    }

    address
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use herald_common::{Encryption, RateLimitParams, TransportKind, WebhookEndpoint};
    use pretty_assertions::assert_eq;

    use super::*;

    fn webhook_endpoint() -> Endpoint {
        Endpoint::Webhook(WebhookEndpoint {
            email: "script@example.com".to_string(),
            url: "https://hooks.example.com/send".to_string(),
            display_name: Some("Fallback Name".to_string()),
        })
    }

    fn smtp_endpoint(nickname: &str) -> Endpoint {
        Endpoint::Smtp(SmtpEndpoint {
            nickname: nickname.to_string(),
            host: "mail.example.com".to_string(),
            port: 587,
            username: "mailer@example.com".to_string(),
            password: "secret".to_string(),
            encryption: Encryption::Starttls,
            from_address: None,
            rate: RateLimitParams::default(),
        })
    }

    fn templates() -> ContentTemplates {
        ContentTemplates {
            subjects: vec!["Hello {{first_name}}".to_string()],
            from_names: vec!["The Team".to_string()],
            to: "{{email}}".to_string(),
            html_body: Some("<p>Hi {{first_name}}</p>".to_string()),
            plain_body: Some("Hi {{first_name}}".to_string()),
            headers: Vec::new(),
        }
    }

    fn row(first_name: &str, email: &str) -> RowData {
        RowData::from_columns([("First Name", first_name), ("Email", email)])
    }

    #[test]
    fn prepares_a_job_from_a_row() {
        let mut preparer = JobPreparer::new(templates(), vec![webhook_endpoint()]).unwrap();
        let job = preparer
            .prepare_row(&row("Ada", "ada@example.com"), JobSource::Row(1))
            .unwrap();

        assert_eq!(job.recipients, vec!["ada@example.com"]);
        assert_eq!(job.subject, "Hello Ada");
        assert_eq!(job.html_body.as_deref(), Some("<p>Hi Ada</p>"));
        assert_eq!(job.plain_body.as_deref(), Some("Hi Ada"));
        assert_eq!(job.kind, TransportKind::Webhook);
        assert_eq!(job.display_name.as_deref(), Some("The Team"));
        assert_eq!(job.status, JobStatus::Prepared);
        assert!(!job.probe);
    }

    #[test]
    fn no_endpoints_is_a_configuration_error() {
        assert!(matches!(
            JobPreparer::new(templates(), Vec::new()),
            Err(PrepareError::NoEndpoints)
        ));
    }

    #[test]
    fn empty_recipient_row_is_rejected() {
        let mut preparer = JobPreparer::new(templates(), vec![webhook_endpoint()]).unwrap();
        let result = preparer.prepare_row(&row("Ada", "not-an-address"), JobSource::Row(3));
        assert!(matches!(result, Err(PrepareError::NoRecipients(_))));
    }

    #[test]
    fn campaign_skips_bad_rows_and_keeps_order() {
        let mut preparer = JobPreparer::new(templates(), vec![webhook_endpoint()]).unwrap();
        let jobs = preparer.prepare_campaign(vec![
            row("Ada", "ada@example.com"),
            row("Nobody", ""),
            row("Grace", "grace@example.com"),
        ]);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].recipients, vec!["ada@example.com"]);
        assert_eq!(jobs[1].recipients, vec!["grace@example.com"]);
        assert_eq!(jobs[1].source, JobSource::Row(3));
        assert_eq!(preparer.prepared(), 2);
    }

    #[test]
    fn endpoints_cycle_round_robin() {
        let mut preparer = JobPreparer::new(
            templates(),
            vec![smtp_endpoint("one"), smtp_endpoint("two")],
        )
        .unwrap();
        let jobs = preparer.prepare_campaign(vec![
            row("A", "a@example.com"),
            row("B", "b@example.com"),
            row("C", "c@example.com"),
        ]);
        let identities: Vec<&str> = jobs.iter().map(|job| job.endpoint.identity()).collect();
        assert_eq!(identities, vec!["one", "two", "one"]);
    }

    #[test]
    fn subject_and_from_name_lists_cycle_per_job() {
        let mut content = templates();
        content.subjects = vec!["First".to_string(), "Second".to_string()];
        let mut preparer = JobPreparer::new(content, vec![webhook_endpoint()]).unwrap();
        let jobs = preparer.prepare_campaign(vec![
            row("A", "a@example.com"),
            row("B", "b@example.com"),
            row("C", "c@example.com"),
        ]);
        let subjects: Vec<&str> = jobs.iter().map(|job| job.subject.as_str()).collect();
        assert_eq!(subjects, vec!["First", "Second", "First"]);
    }

    #[test]
    fn empty_subject_falls_back() {
        let mut content = templates();
        content.subjects = Vec::new();
        let mut preparer = JobPreparer::new(content, vec![webhook_endpoint()]).unwrap();
        let job = preparer
            .prepare_row(&row("Ada", "ada@example.com"), JobSource::Single)
            .unwrap();
        assert_eq!(job.subject, "No Subject");
    }

    #[test]
    fn to_header_overrides_recipients() {
        let mut content = templates();
        content.headers = ContentTemplates::parse_header_block("To: {{backup_email}}");
        let mut preparer = JobPreparer::new(content, vec![webhook_endpoint()]).unwrap();
        let row = RowData::from_columns([
            ("Email", "primary@example.com"),
            ("Backup Email", "backup@example.com"),
            ("First Name", "Ada"),
        ]);
        let job = preparer.prepare_row(&row, JobSource::Row(1)).unwrap();
        assert_eq!(job.recipients, vec!["backup@example.com"]);
        // The forwarded webhook header map must not repeat the To field.
        assert!(job.headers.is_empty());
    }

    #[test]
    fn to_header_alone_can_supply_recipients() {
        let mut content = templates();
        content.to = String::new();
        content.headers = ContentTemplates::parse_header_block("To: {{email}}");
        let mut preparer = JobPreparer::new(content, vec![webhook_endpoint()]).unwrap();
        let job = preparer
            .prepare_row(&row("Ada", "ada@example.com"), JobSource::Row(1))
            .unwrap();
        assert_eq!(job.recipients, vec!["ada@example.com"]);
    }

    #[test]
    fn subject_header_overrides_resolved_subject() {
        let mut content = templates();
        content.headers = ContentTemplates::parse_header_block("Subject: Override for {{first_name}}");
        let mut preparer = JobPreparer::new(content, vec![webhook_endpoint()]).unwrap();
        let job = preparer
            .prepare_row(&row("Ada", "ada@example.com"), JobSource::Row(1))
            .unwrap();
        assert_eq!(job.subject, "Override for Ada");
    }

    #[test]
    fn from_header_drives_webhook_display_name() {
        let mut content = templates();
        content.headers =
            ContentTemplates::parse_header_block(r#"From: "Support Desk" <support@example.com>"#);
        let mut preparer = JobPreparer::new(content, vec![webhook_endpoint()]).unwrap();
        let job = preparer
            .prepare_row(&row("Ada", "ada@example.com"), JobSource::Row(1))
            .unwrap();
        assert_eq!(job.display_name.as_deref(), Some("Support Desk"));
    }

    #[test]
    fn smtp_from_address_is_built_from_endpoint() {
        let mut preparer =
            JobPreparer::new(templates(), vec![smtp_endpoint("primary")]).unwrap();
        let job = preparer
            .prepare_row(&row("Ada", "ada@example.com"), JobSource::Row(1))
            .unwrap();
        assert_eq!(
            job.from_address.as_deref(),
            Some("The Team <mailer@example.com>")
        );
    }

    #[test]
    fn smtp_from_prefers_configured_address() {
        let mut endpoint = smtp_endpoint("primary");
        if let Endpoint::Smtp(server) = &mut endpoint {
            server.from_address = Some("Bulk Sender <bulk@example.com>".to_string());
        }
        let mut content = templates();
        content.from_names = Vec::new();
        let mut preparer = JobPreparer::new(content, vec![endpoint]).unwrap();
        let job = preparer
            .prepare_row(&row("Ada", "ada@example.com"), JobSource::Row(1))
            .unwrap();
        assert_eq!(
            job.from_address.as_deref(),
            Some("Bulk Sender <bulk@example.com>")
        );
    }

    #[test]
    fn smtp_tags_resolve_from_endpoint_identity() {
        let mut content = templates();
        content.subjects = vec!["via {{[smtp_name]}} as {{[smtp]}}".to_string()];
        let mut preparer =
            JobPreparer::new(content, vec![smtp_endpoint("primary")]).unwrap();
        let job = preparer
            .prepare_row(&row("Ada", "ada@example.com"), JobSource::Row(1))
            .unwrap();
        assert_eq!(job.subject, "via primary as mailer@example.com");
    }

    #[test]
    fn boundary_tags_stable_across_fields_of_one_job() {
        let mut content = templates();
        content.subjects = vec!["ref {{[bndn_6]}}".to_string()];
        content.plain_body = Some("your ref is {{[bndn_6]}}".to_string());
        let mut preparer = JobPreparer::new(content, vec![webhook_endpoint()]).unwrap();
        let job = preparer
            .prepare_row(&row("Ada", "ada@example.com"), JobSource::Row(1))
            .unwrap();
        let reference = job.subject.strip_prefix("ref ").unwrap();
        assert_eq!(
            job.plain_body.as_deref(),
            Some(format!("your ref is {reference}").as_str())
        );
    }

    #[test]
    fn header_block_parsing_ignores_malformed_lines() {
        let parsed = ContentTemplates::parse_header_block(
            "X-Campaign: spring\nnot a header\n: empty name\nReply-To: reply@example.com",
        );
        assert_eq!(
            parsed,
            vec![
                ("X-Campaign".to_string(), "spring".to_string()),
                ("Reply-To".to_string(), "reply@example.com".to_string()),
            ]
        );
    }
}
