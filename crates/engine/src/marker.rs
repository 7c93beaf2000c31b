//! Control-marker detection and stripping for model output.
//!
//! Markers are resolved by an ordered grammar with two matchers. The JSON
//! status object has priority; the legacy bracket tokens are consulted only
//! when no JSON status matched anywhere in the text. Detection always runs
//! on raw, unfiltered model output.

use ironloop_core::MarkerFlags;
use regex_lite::Regex;
use std::sync::OnceLock;

/// Legacy continue token, kept for models trained on the bracket protocol.
pub const CONTINUE_TOKEN: &str = "[CONTINUE]";
/// Legacy completion token.
pub const COMPLETE_TOKEN: &str = "[WORKFLOW_COMPLETE]";
/// Older spelling of the completion token, treated as equivalent.
pub const DONE_TOKEN: &str = "[WORKFLOW_DONE]";

/// Matches `{"status": "continue"}` and friends, case-insensitively, with
/// arbitrary whitespace around the key and value.
const JSON_STATUS_PATTERN: &str = r#"(?i)\{\s*"status"\s*:\s*"(continue|complete|stop)"\s*\}"#;

/// The JSON matcher, compiled on first use and shared thereafter.
fn json_matcher() -> Option<&'static Regex> {
    static MATCHER: OnceLock<Option<Regex>> = OnceLock::new();
    MATCHER
        .get_or_init(|| Regex::new(JSON_STATUS_PATTERN).ok())
        .as_ref()
}

/// Scan raw model output for control markers.
///
/// JSON statuses win outright: if any JSON status object is present, the
/// legacy tokens are never consulted. `matched_pattern` records the first
/// match for observability.
pub fn detect(text: &str) -> MarkerFlags {
    let mut flags = MarkerFlags::default();

    if let Some(re) = json_matcher() {
        for caps in re.captures_iter(text) {
            let Some(word) = caps.get(1) else { continue };
            match word.as_str().to_ascii_lowercase().as_str() {
                "continue" => flags.should_continue = true,
                "complete" => flags.complete = true,
                "stop" => flags.stop = true,
                _ => {}
            }
            if flags.matched_pattern.is_none() {
                flags.matched_pattern = caps.get(0).map(|m| m.as_str().to_string());
            }
        }
    }
    if !flags.is_empty() {
        return flags;
    }

    if text.contains(CONTINUE_TOKEN) {
        flags.should_continue = true;
        if flags.matched_pattern.is_none() {
            flags.matched_pattern = Some(CONTINUE_TOKEN.to_string());
        }
    }
    if text.contains(COMPLETE_TOKEN) {
        flags.complete = true;
        if flags.matched_pattern.is_none() {
            flags.matched_pattern = Some(COMPLETE_TOKEN.to_string());
        }
    }
    if text.contains(DONE_TOKEN) {
        flags.complete = true;
        if flags.matched_pattern.is_none() {
            flags.matched_pattern = Some(DONE_TOKEN.to_string());
        }
    }

    flags
}

/// Strip every marker form from `text`, for display and storage.
///
/// All forms are removed regardless of which matcher fired during
/// detection. Idempotent, and leaves all non-marker whitespace intact.
pub fn filter(text: &str) -> String {
    let stripped = match json_matcher() {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    };
    stripped
        .replace(CONTINUE_TOKEN, "")
        .replace(COMPLETE_TOKEN, "")
        .replace(DONE_TOKEN, "")
}
