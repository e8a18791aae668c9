use crate::compressor::paths::CompressorPaths;
use crate::compressor::tail::TailRetention;
use crate::error::CompressorError;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_TAIL_PERCENT: f64 = 30.0;
pub const DEFAULT_TAIL_MIN_CHARS: u64 = 2000;

pub const DEFAULT_COMPRESS_PROMPT: &str = r#"That concludes the above topic. Please remember the chat history and switch roles:

You are the component that summarizes internal chat history into a given structure.

When the conversation history grows too large, you will be invoked to distill the entire history into a concise, structured
XML snapshot. This snapshot is CRITICAL, as it will become the agent's *only* memory of the past. The agent will resume its
work based solely on this snapshot. All crucial details, plans, errors, and user directives MUST be preserved.

First, you will think through the entire history in a private <scratchpad>. Review the user's overall goal, the agent's
actions, tool outputs, file modifications, and any unresolved questions. Identify every piece of information that is essential
for future actions.

After your reasoning is complete, generate the final <state_snapshot> XML object. Be incredibly dense with information. Omit
any irrelevant conversational filler.

The structure MUST be as follows:

<state_snapshot>
    <overall_goal>
        <!-- A single, concise sentence describing the user's high-level objective. -->
        <!-- Example: "Refactor the authentication service to use a new JWT library." -->
    </overall_goal>

    <key_knowledge>
        <!-- Crucial facts, conventions, and constraints the agent must remember based on the conversation history and
interaction with the user. Use bullet points. -->
        <!-- Example:
         - Build Command: `npm run build`
         - Testing: Tests are run with `npm test`. Test files must end in `.test.ts`.
         - API Endpoint: The primary API endpoint is `https://api.example.com/v2`.

        -->
    </key_knowledge>

    <file_system_state>
        <!-- List files that have been created, read, modified, or deleted. Note their status and critical learnings. -->
        <!-- Example:
         - CWD: `/home/user/project/src`
         - READ: `package.json` - Confirmed 'axios' is a dependency.
         - MODIFIED: `services/auth.ts` - Replaced 'jsonwebtoken' with 'jose'.
         - CREATED: `tests/new-feature.test.ts` - Initial test structure for the new feature.
        -->
    </file_system_state>

    <recent_actions>
        <!-- A summary of the last few significant agent actions and their outcomes. Focus on facts. -->
        <!-- Example:
         - Ran `grep 'old_function'` which returned 3 results in 2 files.
         - Ran `npm run test`, which failed due to a snapshot mismatch in `UserProfile.test.ts`.
         - Ran `ls -F static/` and discovered image assets are stored as `.webp`.
        -->
    </recent_actions>

    <current_plan>
        <!-- The agent's step-by-step plan. Mark completed steps. -->
        <!-- Example:
         1. [DONE] Identify all files using the deprecated 'UserAPI'.
         2. [IN PROGRESS] Refactor `src/components/UserProfile.tsx` to use the new 'ProfileAPI'.
         3. [TODO] Refactor the remaining files.
         4. [TODO] Update tests to reflect the API change.
        -->
    </current_plan>
</state_snapshot>"#;

/// User-editable compression settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub compress_prompt: String,
    pub snapshot_regex: String,
    pub tail_percent: f64,
    pub tail_min_chars: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            compress_prompt: DEFAULT_COMPRESS_PROMPT.to_string(),
            snapshot_regex: String::new(),
            tail_percent: DEFAULT_TAIL_PERCENT,
            tail_min_chars: DEFAULT_TAIL_MIN_CHARS,
        }
    }
}

impl Settings {
    pub fn effective_prompt(&self) -> &str {
        if self.compress_prompt.trim().is_empty() {
            DEFAULT_COMPRESS_PROMPT
        } else {
            &self.compress_prompt
        }
    }

    pub fn snapshot_pattern(&self) -> Option<&str> {
        let trimmed = self.snapshot_regex.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    pub fn tail_retention(&self) -> TailRetention {
        TailRetention::new(self.tail_percent, self.tail_min_chars)
    }

    /// Read a loosely-typed settings object, keeping defaults for anything
    /// missing or unusable. Numbers may arrive as strings from form inputs.
    pub fn from_value(payload: &Value) -> Self {
        let mut next = Settings::default();
        let Some(object) = payload.as_object() else {
            return next;
        };
        if let Some(prompt) = object.get("compressPrompt").and_then(Value::as_str) {
            let trimmed = prompt.trim();
            if !trimmed.is_empty() {
                next.compress_prompt = trimmed.to_string();
            }
        }
        if let Some(pattern) = object.get("snapshotRegex").and_then(Value::as_str) {
            next.snapshot_regex = pattern.trim().to_string();
        }
        if let Some(percent) = object.get("tailPercent").and_then(loose_f64) {
            next.tail_percent = percent.clamp(0.0, 100.0);
        }
        if let Some(min_chars) = object.get("tailMinChars").and_then(loose_f64)
            && min_chars >= 0.0
        {
            next.tail_min_chars = min_chars.floor() as u64;
        }
        next
    }

    pub fn merge(&self, patch: &SettingsPatch) -> Self {
        let mut next = self.clone();
        if let Some(prompt) = &patch.compress_prompt {
            let trimmed = prompt.trim();
            next.compress_prompt = if trimmed.is_empty() {
                DEFAULT_COMPRESS_PROMPT.to_string()
            } else {
                trimmed.to_string()
            };
        }
        if let Some(pattern) = &patch.snapshot_regex {
            next.snapshot_regex = pattern.trim().to_string();
        }
        if let Some(percent) = patch.tail_percent
            && percent.is_finite()
        {
            next.tail_percent = percent.clamp(0.0, 100.0);
        }
        if let Some(min_chars) = patch.tail_min_chars {
            next.tail_min_chars = min_chars;
        }
        next
    }
}

fn loose_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

#[derive(Debug, Clone, Default)]
pub struct SettingsPatch {
    pub compress_prompt: Option<String>,
    pub snapshot_regex: Option<String>,
    pub tail_percent: Option<f64>,
    pub tail_min_chars: Option<u64>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.compress_prompt.is_none()
            && self.snapshot_regex.is_none()
            && self.tail_percent.is_none()
            && self.tail_min_chars.is_none()
    }

    /// Reject values a user typed that would otherwise be silently clamped
    /// or ignored.
    pub fn validate(&self) -> Result<(), CompressorError> {
        if let Some(pattern) = self.snapshot_regex.as_deref().map(str::trim)
            && !pattern.is_empty()
            && let Err(err) = regex::Regex::new(pattern)
        {
            return Err(CompressorError::InvalidSettings(format!(
                "snapshot regex does not compile: {err}"
            )));
        }
        if let Some(percent) = self.tail_percent
            && !(0.0..=100.0).contains(&percent)
        {
            return Err(CompressorError::InvalidSettings(format!(
                "tail percent must be within 0..=100, got {percent}"
            )));
        }
        Ok(())
    }
}

pub trait SettingsSource {
    fn snapshot(&self) -> Settings;
}

/// JSON-file backed settings, the persisted side of the settings boundary.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_paths(paths: &CompressorPaths) -> Self {
        Self::new(paths.settings_file.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Settings {
        match self.try_load() {
            Ok(settings) => settings,
            Err(err) => {
                warn!(target: "compressor::ui", "failed to load compressor settings: {err:#}");
                Settings::default()
            }
        }
    }

    fn try_load(&self) -> Result<Settings> {
        if !self.path.exists() {
            return Ok(Settings::default());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let parsed: Value = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(Settings::from_value(&parsed))
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, format!("{data}\n"))
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    pub fn update(&self, patch: &SettingsPatch) -> Result<Settings> {
        let next = self.load().merge(patch);
        self.save(&next)?;
        Ok(next)
    }

    pub fn reset(&self) -> Result<Settings> {
        let defaults = Settings::default();
        self.save(&defaults)?;
        Ok(defaults)
    }
}

impl SettingsSource for SettingsStore {
    fn snapshot(&self) -> Settings {
        self.load()
    }
}
