use crate::compressor::wire::collect_model_output_text;
use regex::RegexBuilder;
use serde_json::Value;
use tracing::{debug, warn};

/// Pull the summary out of a decoded model output stream.
///
/// Returns `None` when the stream carries no visible text, whitespace
/// included, so a blank reply never becomes a summary turn.
pub fn extract_summary(payload: &Value, pattern: Option<&str>) -> Option<String> {
    let full_text = collect_model_output_text(payload);
    if full_text.trim().is_empty() {
        debug!(target: "compressor::net", "model output stream carried no visible text");
        return None;
    }
    Some(summarize_text(&full_text, pattern)).filter(|summary| !summary.is_empty())
}

/// Apply the snapshot pattern to `text`; the whole match wins, anything else
/// (no pattern, invalid pattern, no match, blank match) falls back to the
/// trimmed text.
pub fn summarize_text(text: &str, pattern: Option<&str>) -> String {
    if let Some(pattern) = pattern.map(str::trim).filter(|p| !p.is_empty()) {
        if let Some(matched) = match_pattern(text, pattern) {
            debug!(target: "compressor::net", "summary extracted via snapshot pattern");
            return matched;
        }
        debug!(target: "compressor::net", "snapshot pattern did not match model output");
    }
    text.trim().to_string()
}

fn match_pattern(text: &str, pattern: &str) -> Option<String> {
    let regex = match RegexBuilder::new(pattern).dot_matches_new_line(true).build() {
        Ok(regex) => regex,
        Err(err) => {
            warn!(target: "compressor::net", "invalid snapshot pattern: {err}");
            return None;
        }
    };
    regex
        .find(text)
        .map(|m| m.as_str().to_string())
        .filter(|matched| !matched.trim().is_empty())
}
