//! Placeholder and dynamic tag resolution
//!
//! A template is resolved in three ordered passes before the caller runs
//! the spintax pass:
//!
//! 1. Data placeholders `{{key}}` against the row-data mapping
//! 2. Context placeholders `{{key}}` against the per-job context
//! 3. Dynamic tags `{{[name]}}` and the fixed boundary form `#{{[token]}}`
//!
//! The order matters: dynamic tags and spintax options may themselves be
//! authored with placeholder syntax pulled from row data, and spintax
//! choices must not be re-evaluated by the placeholder passes.
//!
//! Boundary tags (`bnd*`, `#{{[token]}}`) are memoized per job, keyed by
//! the literal tag text, so every occurrence within one job resolves to
//! the same value while two jobs resolve independently.

use std::sync::LazyLock;

use ahash::AHashMap;
use regex::{Captures, Regex};

use crate::charset::{self, Charset, MAX_RANDOM_LEN};

/// Context keys populated during job preparation
pub mod ctx {
    /// The job's unique identifier
    pub const JOB_ID: &str = "job_id";
    /// Primary recipient address
    pub const RECIPIENT: &str = "recipient";
    /// Resolved subject (available once the subject has been resolved)
    pub const SUBJECT: &str = "subject";
    /// Resolved from-name (available once the from-name has been resolved)
    pub const FROM_NAME: &str = "from_name";
    /// Webhook account email
    pub const ENDPOINT_EMAIL: &str = "endpoint_email";
    /// SMTP username
    pub const SMTP_USER: &str = "smtp_user";
    /// Endpoint identity (SMTP nickname or webhook email)
    pub const SMTP_NAME: &str = "smtp_name";
}

#[allow(clippy::expect_used, reason = "the patterns are checked literals")]
mod patterns {
    use super::{LazyLock, Regex};

    /// `{{key}}` with optional inner whitespace; never matches `{{[tag]}}`
    pub static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_][A-Za-z0-9_ .-]*?)\s*\}\}").expect("placeholder pattern")
    });

    /// `{{[anything]}}` or the fixed boundary token form
    pub static DYNAMIC_TAG: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"#\{\{\[token\]\}\}|\{\{\[([^\[\]]*)\]\}\}").expect("dynamic tag pattern")
    });

    /// `rnd`/`bnd` variable-length random tags
    pub static VAR_LEN: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(rnd|bnd)([a-z]{1,2})_([0-9]+)$").expect("var-len pattern"));
}

/// Normalize a data column name the way the row provider does: trimmed,
/// lower-cased, spaces to underscores
#[must_use]
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase().replace(' ', "_")
}

/// One row of provider data, keyed by normalized column name
#[derive(Debug, Clone, Default)]
pub struct RowData(AHashMap<String, String>);

impl RowData {
    /// Build a row from raw column/value pairs, normalizing the keys
    pub fn from_columns<I, K, V>(columns: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self(
            columns
                .into_iter()
                .map(|(key, value)| (normalize_key(key.as_ref()), value.into()))
                .collect(),
        )
    }

    /// Look up a value by normalized key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether the row carries no columns
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-job context mapping consulted by pass 2 and the context-mirror tags
#[derive(Debug, Clone, Default)]
pub struct JobContext(AHashMap<String, String>);

impl JobContext {
    /// Set a context value
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Look up a context value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn get_or_empty(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }
}

/// Boundary-tag cache scoped to exactly one job's resolution
#[derive(Debug, Default)]
pub struct BoundaryTags(AHashMap<String, String>);

impl BoundaryTags {
    fn resolve(&mut self, tag: &str, generate: impl FnOnce() -> String) -> String {
        self.0
            .entry(tag.to_string())
            .or_insert_with(generate)
            .clone()
    }

    /// Number of distinct boundary tags seen so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether any boundary tag has been resolved yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Resolver for one job's fields
///
/// Holds the job context (which preparation updates as fields resolve) and
/// the job-scoped boundary-tag cache. Dropped when the job's resolution
/// completes, taking the cache with it.
#[derive(Debug)]
pub struct TemplateResolver<'a> {
    row: &'a RowData,
    context: JobContext,
    boundary: BoundaryTags,
}

impl<'a> TemplateResolver<'a> {
    /// Create a resolver over one row of provider data
    #[must_use]
    pub fn new(row: &'a RowData) -> Self {
        Self {
            row,
            context: JobContext::default(),
            boundary: BoundaryTags::default(),
        }
    }

    /// The job context, for reads
    #[must_use]
    pub const fn context(&self) -> &JobContext {
        &self.context
    }

    /// The job context, for preparation to update between fields
    pub const fn context_mut(&mut self) -> &mut JobContext {
        &mut self.context
    }

    /// Run the three placeholder/tag passes over one template
    #[must_use]
    pub fn resolve(&mut self, template: &str) -> String {
        let after_data = replace_placeholders(template, |key| {
            self.row.get(key).map(ToString::to_string)
        });
        let after_context = replace_placeholders(&after_data, |key| {
            self.context.get(key).map(ToString::to_string)
        });
        self.replace_dynamic_tags(&after_context)
    }

    /// Placeholder/tag passes followed by the spintax pass
    #[must_use]
    pub fn resolve_with_spintax(&mut self, template: &str) -> String {
        crate::spintax::resolve(&self.resolve(template))
    }

    fn replace_dynamic_tags(&mut self, text: &str) -> String {
        if !text.contains("{{[") && !text.contains("#{{[") {
            return text.to_string();
        }

        patterns::DYNAMIC_TAG
            .replace_all(text, |caps: &Captures<'_>| self.expand_tag(caps))
            .into_owned()
    }

    fn expand_tag(&mut self, caps: &Captures<'_>) -> String {
        let whole = &caps[0];

        // The fixed boundary form: a 12-character alphanumeric token,
        // generated once per job.
        if whole == "#{{[token]}}" {
            return self
                .boundary
                .resolve(whole, || charset::random_string(12, Charset::Alnum));
        }

        let name = caps.get(1).map_or("", |m| m.as_str()).trim();
        match name {
            "ide" => self
                .context
                .get(ctx::JOB_ID)
                .map_or_else(|| charset::random_string(12, Charset::Alnum), String::from),
            "date" => chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            "tag" => charset::random_string(8, Charset::Alnum),
            "rnd" => charset::random_string(18, Charset::Alnum),
            "fromname" => self.context.get_or_empty(ctx::FROM_NAME).to_string(),
            "subject" => self.context.get_or_empty(ctx::SUBJECT).to_string(),
            "to" => self.context.get_or_empty(ctx::RECIPIENT).to_string(),
            "name" => {
                let recipient = self.context.get_or_empty(ctx::RECIPIENT);
                recipient
                    .split_once('@')
                    .map_or("", |(local, _)| local)
                    .to_string()
            }
            "smtp" => self.context.get_or_empty(ctx::SMTP_USER).to_string(),
            "smtp_name" => self.context.get_or_empty(ctx::SMTP_NAME).to_string(),
            _ => self.expand_random_tag(whole, name),
        }
    }

    fn expand_random_tag(&mut self, whole: &str, name: &str) -> String {
        let Some(caps) = patterns::VAR_LEN.captures(name) else {
            // Unrecognized tag content is left exactly as written.
            return whole.to_string();
        };

        let (Some(family), Ok(len)) = (Charset::from_key(&caps[2]), caps[3].parse::<usize>())
        else {
            return whole.to_string();
        };

        if len == 0 || len > MAX_RANDOM_LEN {
            return whole.to_string();
        }

        if &caps[1] == "bnd" {
            self.boundary
                .resolve(whole, || charset::random_string(len, family))
        } else {
            charset::random_string(len, family)
        }
    }
}

/// Replace `{{key}}` occurrences using `lookup`, leaving unknown keys as
/// written. Keys are matched case-insensitively with spaces normalized,
/// mirroring how the row provider cleans its column names.
fn replace_placeholders(text: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    if !text.contains("{{") {
        return text.to_string();
    }

    patterns::PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| {
            let key = normalize_key(&caps[1]);
            lookup(&key).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn row() -> RowData {
        RowData::from_columns([
            ("First Name", "Ada"),
            ("company", "Analytical Engines"),
            ("EMAIL", "ada@example.com"),
        ])
    }

    #[test]
    fn row_keys_are_normalized() {
        let row = row();
        assert_eq!(row.get("first_name"), Some("Ada"));
        assert_eq!(row.get("email"), Some("ada@example.com"));
        assert_eq!(row.get("First Name"), None);
    }

    #[test]
    fn data_placeholders_match_case_insensitively() {
        let row = row();
        let mut resolver = TemplateResolver::new(&row);
        assert_eq!(
            resolver.resolve("Hi {{First Name}} from {{ COMPANY }}"),
            "Hi Ada from Analytical Engines"
        );
    }

    #[test]
    fn unknown_placeholders_are_left_as_written() {
        let row = row();
        let mut resolver = TemplateResolver::new(&row);
        assert_eq!(resolver.resolve("Hi {{nickname}}"), "Hi {{nickname}}");
    }

    #[test]
    fn context_applies_after_data() {
        let row = RowData::from_columns([("greeting", "Hello {{recipient}}")]);
        let mut resolver = TemplateResolver::new(&row);
        resolver
            .context_mut()
            .insert(ctx::RECIPIENT, "ada@example.com");
        // The context value lands inside text that the data pass produced.
        assert_eq!(resolver.resolve("{{greeting}}"), "Hello ada@example.com");
    }

    #[test]
    fn context_mirror_tags() {
        let row = RowData::default();
        let mut resolver = TemplateResolver::new(&row);
        resolver
            .context_mut()
            .insert(ctx::RECIPIENT, "grace@example.com");
        resolver.context_mut().insert(ctx::SMTP_NAME, "bulk-1");
        assert_eq!(resolver.resolve("{{[to]}}"), "grace@example.com");
        assert_eq!(resolver.resolve("{{[name]}}"), "grace");
        assert_eq!(resolver.resolve("{{[smtp_name]}}"), "bulk-1");
        assert_eq!(resolver.resolve("{{[fromname]}}"), "");
    }

    #[test]
    fn fresh_tags_have_expected_shapes() {
        let row = RowData::default();
        let mut resolver = TemplateResolver::new(&row);

        let tag = resolver.resolve("{{[tag]}}");
        assert_eq!(tag.len(), 8);
        assert!(tag.chars().all(|c| c.is_ascii_alphanumeric()));

        let rnd = resolver.resolve("{{[rnd]}}");
        assert_eq!(rnd.len(), 18);

        let digits = resolver.resolve("{{[rndn_10]}}");
        assert_eq!(digits.len(), 10);
        assert!(digits.chars().all(|c| c.is_ascii_digit()));

        let upper_digits = resolver.resolve("{{[rndun_6]}}");
        assert_eq!(upper_digits.len(), 6);
        assert!(
            upper_digits
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        );
    }

    #[test]
    fn rnd_tags_reroll_every_occurrence() {
        let row = RowData::default();
        let mut resolver = TemplateResolver::new(&row);
        let out = resolver.resolve("{{[rnda_16]}}/{{[rnda_16]}}");
        let (left, right) = out.split_once('/').unwrap();
        assert_eq!(left.len(), 16);
        assert_eq!(right.len(), 16);
        // 62^16 values; a collision here means the generator is broken.
        assert_ne!(left, right);
    }

    #[test]
    fn boundary_tags_are_stable_within_a_job() {
        let row = RowData::default();
        let mut resolver = TemplateResolver::new(&row);
        let out = resolver.resolve("{{[bndn_6]}}-{{[bndn_6]}}");
        let (left, right) = out.split_once('-').unwrap();
        assert_eq!(left.len(), 6);
        assert_eq!(left, right);

        // The same tag resolved again through the same resolver still hits
        // the cache.
        let again = resolver.resolve("{{[bndn_6]}}");
        assert_eq!(again, left);
    }

    #[test]
    fn boundary_tags_are_independent_across_jobs() {
        let row = RowData::default();
        let first = TemplateResolver::new(&row).resolve("{{[bnda_12]}}");
        let second = TemplateResolver::new(&row).resolve("{{[bnda_12]}}");
        assert_ne!(first, second);
    }

    #[test]
    fn token_tag_is_a_fixed_twelve_char_boundary() {
        let row = RowData::default();
        let mut resolver = TemplateResolver::new(&row);
        let out = resolver.resolve("#{{[token]}} #{{[token]}}");
        let (left, right) = out.split_once(' ').unwrap();
        assert_eq!(left.len(), 12);
        assert_eq!(left, right);
        assert!(left.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn distinct_boundary_tags_get_distinct_values() {
        let row = RowData::default();
        let mut resolver = TemplateResolver::new(&row);
        let out = resolver.resolve("{{[bnda_8]}}|{{[bndl_8]}}");
        let (left, right) = out.split_once('|').unwrap();
        assert_ne!(left, right);
    }

    #[test]
    fn unrecognized_and_malformed_tags_pass_through() {
        let row = RowData::default();
        let mut resolver = TemplateResolver::new(&row);
        assert_eq!(resolver.resolve("{{[bogus]}}"), "{{[bogus]}}");
        assert_eq!(resolver.resolve("{{[rndx_5]}}"), "{{[rndx_5]}}");
        assert_eq!(resolver.resolve("{{[rndn_0]}}"), "{{[rndn_0]}}");
        assert_eq!(resolver.resolve("{{[rndn_2000]}}"), "{{[rndn_2000]}}");
    }

    #[test]
    fn ide_tag_prefers_the_context_id() {
        let row = RowData::default();
        let mut resolver = TemplateResolver::new(&row);
        resolver.context_mut().insert(ctx::JOB_ID, "abc123");
        assert_eq!(resolver.resolve("{{[ide]}}"), "abc123");
    }

    #[test]
    fn spintax_runs_after_tag_resolution() {
        let row = RowData::from_columns([("first_name", "Ada")]);
        let mut resolver = TemplateResolver::new(&row);
        for _ in 0..20 {
            let out = resolver.resolve_with_spintax("{Hi|Hello} {{first_name}}");
            assert!(out == "Hi Ada" || out == "Hello Ada", "got {out:?}");
        }
    }
}
