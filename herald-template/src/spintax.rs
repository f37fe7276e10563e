//! Spintax expansion: `{option1|option2|...}` resolved by random choice
//!
//! Resolution is innermost-first so nested constructs like `{A|{B|C}}`
//! collapse from the inside out. A brace group without a pipe is not
//! spintax (stray literal braces, say) and is skipped rather than
//! consumed, and the pass count is capped so malformed input terminates
//! as literal text instead of erroring.

use std::sync::LazyLock;

use rand::seq::IndexedRandom;
use regex::Regex;

/// Upper bound on full passes over the text; one pass resolves one level
/// of nesting, so this comfortably covers any realistic template.
const MAX_PASSES: usize = 10;

#[allow(clippy::expect_used, reason = "the pattern is a checked literal")]
static GROUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^{}]*\}").expect("spintax group pattern"));

/// Expand every spintax construct in `input`
#[must_use]
pub fn resolve(input: &str) -> String {
    if !input.contains('{') {
        return input.to_string();
    }

    let mut text = input.to_string();
    for _ in 0..MAX_PASSES {
        let mut scan_from = 0;
        let mut changed = false;

        // One pass resolves every innermost group currently visible.
        while scan_from <= text.len() {
            let Some(found) = GROUP_RE.find_at(&text, scan_from) else {
                break;
            };
            let (start, end) = (found.start(), found.end());
            let inner = text[start + 1..end - 1].to_string();

            if inner.contains('|') {
                let options: Vec<&str> = inner.split('|').map(str::trim).collect();
                let choice = options
                    .choose(&mut rand::rng())
                    .copied()
                    .unwrap_or_default()
                    .to_string();
                text.replace_range(start..end, &choice);
                changed = true;
                // The substituted option contains no braces, so the next
                // innermost group cannot start before this position.
                scan_from = start;
            } else {
                // Not spintax; leave the braces as literal text.
                scan_from = end;
            }
        }

        if !changed {
            break;
        }
    }

    text
}
