//! Cleanup applied to recognizer output before it reaches the brain.

use regex::Regex;
use std::sync::OnceLock;

/// Trim, drop non-speech markers such as `[silence]` or `(noise)`, and
/// collapse whitespace. An empty result means "no speech".
pub fn clean_transcript(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let Some(re) = non_speech_markers() else {
        return trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    };
    re.replace_all(trimmed, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn non_speech_markers() -> Option<&'static Regex> {
    static NON_SPEECH_RE: OnceLock<Option<Regex>> = OnceLock::new();
    NON_SPEECH_RE
        .get_or_init(|| {
            const MARKERS: &str = "silence|noise|inaudible|blank_audio|blank audio|music|laughter|applause|cough|breath(?:ing)?|wind(?: blowing)?|background|тиша|шум";
            Regex::new(&format!(
                r"(?i)\[\s*\]|\(\s*\)|\[\s*(?:{MARKERS})\s*\]|\(\s*(?:{MARKERS})\s*\)|\*\s*(?:{MARKERS})\s*\*"
            ))
            .map_err(|err| tracing::error!(error = %err, "non-speech marker pattern rejected"))
            .ok()
        })
        .as_ref()
}

/// Log-safe rendering of user content: the text itself only when content
/// logging is enabled, otherwise its length.
pub fn loggable(text: &str, log_content: bool) -> String {
    if log_content {
        text.to_string()
    } else {
        format!("<{} chars>", text.chars().count())
    }
}
