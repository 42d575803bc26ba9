//! Default rule set: weighted regex tripwires matched against the
//! per-session trailing buffer.
//!
//! Rules are configuration data, compiled once and never mutated at runtime.
//! Matching runs against the normalized trailing buffer, so a rule fires even
//! when the triggering phrase spans two token deliveries.

use std::sync::LazyLock;

use regex::Regex;

/// Rule category for destructive shell/filesystem commands.
pub const CATEGORY_DESTRUCTIVE_OPS: &str = "DESTRUCTIVE_OPS";
/// Rule category for requests to conceal actions or fabricate outcomes.
pub const CATEGORY_DECEPTION: &str = "DECEPTION";

/// A single tripwire: id, category, compiled pattern, weight in [0,1], and
/// whether a match bypasses scoring and pauses immediately.
#[derive(Debug)]
pub struct Rule {
    pub id: &'static str,
    pub category: &'static str,
    pub pattern: Regex,
    pub weight: f64,
    pub hard_pause: bool,
}

impl Rule {
    /// Qualified rule id as carried in `RuleFire` payloads,
    /// e.g. `DESTRUCTIVE_OPS/do_rmrf_root`.
    pub fn qualified_id(&self) -> String {
        format!("{}/{}", self.category, self.id)
    }
}

fn rule(
    id: &'static str,
    category: &'static str,
    pattern: &str,
    weight: f64,
    hard_pause: bool,
) -> Rule {
    Rule {
        id,
        category,
        // Patterns are static literals; a failure here is a programming
        // error caught by the unit tests below.
        pattern: Regex::new(pattern).expect("invalid built-in rule pattern"),
        weight,
        hard_pause,
    }
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        // DESTRUCTIVE_OPS: hard-pause on sight.
        rule(
            "do_rmrf_root",
            CATEGORY_DESTRUCTIVE_OPS,
            r"(?i)(?:^|[;\s])sudo\s+rm\s+-rf\s+/",
            1.0,
            true,
        ),
        rule(
            "do_rmrf_up",
            CATEGORY_DESTRUCTIVE_OPS,
            r"(?i)\brm\s+-rf\s+(?:\.|\.\./|/)",
            0.95,
            true,
        ),
        rule(
            "do_mkfs",
            CATEGORY_DESTRUCTIVE_OPS,
            r"(?i)\bmkfs\w*\b",
            0.95,
            true,
        ),
        rule(
            "do_forkbomb",
            CATEGORY_DESTRUCTIVE_OPS,
            r":\(\)\s*\{\s*:\s*\|\s*:\s*;\s*\}\s*:",
            0.95,
            true,
        ),
        // DECEPTION: soft signals feeding the score.
        rule(
            "de_donttell",
            CATEGORY_DECEPTION,
            r"(?i)\bdon'?t\s+(?:tell|mention|reveal)\b",
            0.75,
            false,
        ),
        rule(
            "de_make_look",
            CATEGORY_DECEPTION,
            r"(?i)\bmake\s+it\s+(?:look|appear|seem)\s+like\b",
            0.75,
            false,
        ),
    ]
});

/// The built-in rule set, in evaluation order.
pub fn default_rules() -> &'static [Rule] {
    &RULES
}
