use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompressorError {
    #[error("payload does not match the expected positional shape: {0}")]
    ShapeMismatch(String),
    #[error("compression traffic was never observed: {0}")]
    CaptureMiss(String),
    #[error("timeout waiting for {label} after {waited_ms}ms")]
    AutomationTimeout { label: String, waited_ms: u64 },
    #[error("branch menu not found: {0}")]
    MenuNotFound(String),
    #[error("branch automation already running")]
    BranchBusy,
    #[error("create-prompt payload could not be rewritten: {0}")]
    RewriteFailure(String),
    #[error("prompt input not found in host page")]
    PromptInputMissing,
    #[error("settings invalid: {0}")]
    InvalidSettings(String),
    #[error("host ui action failed: {0}")]
    HostUi(String),
}

impl CompressorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ShapeMismatch(_) => ErrorCode::E001ShapeMismatch,
            Self::CaptureMiss(_) => ErrorCode::E002CaptureMiss,
            Self::AutomationTimeout { .. } | Self::MenuNotFound(_) | Self::HostUi(_) => {
                ErrorCode::E003AutomationTimeout
            }
            Self::BranchBusy => ErrorCode::E004BranchBusy,
            Self::RewriteFailure(_) => ErrorCode::E005RewriteFailure,
            Self::PromptInputMissing => ErrorCode::E006PromptInputMissing,
            Self::InvalidSettings(_) => ErrorCode::E007InvalidSettings,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    E001ShapeMismatch,
    E002CaptureMiss,
    E003AutomationTimeout,
    E004BranchBusy,
    E005RewriteFailure,
    E006PromptInputMissing,
    E007InvalidSettings,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001ShapeMismatch => "E001_SHAPE_MISMATCH",
            Self::E002CaptureMiss => "E002_CAPTURE_MISS",
            Self::E003AutomationTimeout => "E003_AUTOMATION_TIMEOUT",
            Self::E004BranchBusy => "E004_BRANCH_BUSY",
            Self::E005RewriteFailure => "E005_REWRITE_FAILURE",
            Self::E006PromptInputMissing => "E006_PROMPT_INPUT_MISSING",
            Self::E007InvalidSettings => "E007_INVALID_SETTINGS",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_the_label() {
        let err = CompressorError::AutomationTimeout {
            label: "branch menu trigger".to_string(),
            waited_ms: 5000,
        };
        assert_eq!(
            err.to_string(),
            "timeout waiting for branch menu trigger after 5000ms"
        );
        assert_eq!(err.code().as_str(), "E003_AUTOMATION_TIMEOUT");
    }
}
