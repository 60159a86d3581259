//! Cleanup of raw engine output lines.
//!
//! The engine prefixes each segment with a time range such as `[0.00-1.20] `
//! and embeds tag tokens like `<|zh|>`, `<|NEUTRAL|>` or `<|Speech|>`.

use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static TIME_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\d+\.\d+-\d+\.\d+\]\s").expect("hardcoded time range pattern")
});

#[allow(clippy::expect_used)]
static TAG_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\|.*?\|>").expect("hardcoded tag token pattern"));

/// Strip time-range annotations, then `<|...|>` tag tokens.
///
/// The order matters: removing tags first could splice text into something
/// that looks like a time range.
pub fn remove_metadata(line: &str) -> String {
    let no_timestamps = TIME_RANGE.replace_all(line, "");
    TAG_TOKEN.replace_all(&no_timestamps, "").into_owned()
}
