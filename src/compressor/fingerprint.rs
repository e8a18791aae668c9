//! Recognising the compression call among ordinary GenerateContent traffic.

pub const DEFAULT_SNIPPET: &str = "You are the component that summarizes internal chat history";
const SNIPPET_MAX_CHARS: usize = 120;

/// Short prefix of the compression prompt, fixed for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    snippet: String,
    variants: Vec<String>,
}

impl Fingerprint {
    pub fn from_prompt(prompt: &str) -> Self {
        let trimmed = prompt.trim();
        let snippet = if trimmed.is_empty() {
            DEFAULT_SNIPPET.to_string()
        } else {
            trimmed.chars().take(SNIPPET_MAX_CHARS).collect()
        };
        let mut variants = vec![snippet.clone()];
        let escaped = escape_for_json(&snippet);
        if escaped != snippet {
            variants.push(escaped);
        }
        Self { snippet, variants }
    }

    pub fn snippet(&self) -> &str {
        &self.snippet
    }

    /// True when `body` carries the snippet raw or JSON-escaped, since the
    /// prompt is embedded as a string inside the serialized request.
    pub fn matches_body(&self, body: &str) -> bool {
        self.variants
            .iter()
            .any(|candidate| !candidate.is_empty() && body.contains(candidate.as_str()))
    }

    /// True when a decoded turn text contains the raw snippet.
    pub fn matches_text(&self, text: &str) -> bool {
        text.contains(self.snippet.as_str())
    }
}

fn escape_for_json(text: &str) -> String {
    match serde_json::to_string(text) {
        Ok(encoded) if encoded.len() >= 2 => encoded[1..encoded.len() - 1].to_string(),
        _ => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_is_trimmed_prefix_of_prompt() {
        let prompt = format!("   {}   ", "p".repeat(300));
        let fp = Fingerprint::from_prompt(&prompt);
        assert_eq!(fp.snippet().len(), 120);
        assert!(fp.snippet().chars().all(|c| c == 'p'));
    }

    #[test]
    fn empty_prompt_falls_back_to_default_snippet() {
        assert_eq!(Fingerprint::from_prompt("  \n ").snippet(), DEFAULT_SNIPPET);
    }

    #[test]
    fn matches_json_escaped_body() {
        let fp = Fingerprint::from_prompt("Summarize \"everything\"\nnow");
        let body = serde_json::json!([[["Summarize \"everything\"\nnow"]]]).to_string();
        assert!(!body.contains(fp.snippet()));
        assert!(fp.matches_body(&body));
        assert!(!fp.matches_body("[[\"unrelated\"]]"));
    }
}
