//! Recipient parsing and validation

use std::sync::LazyLock;

use regex::Regex;

#[allow(clippy::expect_used, reason = "the pattern is a checked literal")]
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    // Pragmatic RFC 5322 subset: dotted atoms on both sides, no quoted
    // local parts or address literals.
    Regex::new(
        r"(?i)^[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]*[a-z0-9])?$",
    )
    .expect("recipient pattern")
});

/// Parse recipient addresses out of free-form input
///
/// Splits on commas, semicolons and whitespace, validates each candidate,
/// and deduplicates case-insensitively while preserving the first casing
/// seen and the input order.
#[must_use]
pub fn parse(input: &str) -> Vec<String> {
    let mut seen = Vec::new();
    let mut recipients = Vec::new();

    for candidate in input.split([',', ';', ' ', '\t', '\n', '\r']) {
        let candidate = candidate.trim();
        if candidate.is_empty() || !EMAIL_RE.is_match(candidate) {
            continue;
        }
        let lowered = candidate.to_lowercase();
        if seen.contains(&lowered) {
            continue;
        }
        seen.push(lowered);
        recipients.push(candidate.to_string());
    }

    recipients
}

/// Whether `candidate` is a single valid address
#[must_use]
pub fn is_valid(candidate: &str) -> bool {
    EMAIL_RE.is_match(candidate.trim())
}
