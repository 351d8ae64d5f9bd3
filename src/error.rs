use thiserror::Error;

use crate::validator::FieldError;

/// Detailed error types for wizard operations.
#[derive(Debug, Error)]
pub enum WizardError {
    /// The current step has unmet requirements. Never persisted.
    #[error("Step {step_id} has {} invalid field(s)", errors.len())]
    Validation {
        step_id: u32,
        errors: Vec<FieldError>,
    },

    #[error("Could not {operation} session: {source}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("Report synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    /// Stored or submitted data disagrees with the wizard definition.
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Invalid wizard definition: {0}")]
    InvalidDefinition(String),

    #[error("Cannot {action} while {from}")]
    InvalidTransition { from: String, action: &'static str },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WizardError {
    pub fn contract(message: impl Into<String>) -> Self {
        Self::ContractViolation(message.into())
    }

    pub fn persistence(operation: &'static str, source: StoreError) -> Self {
        Self::Persistence { operation, source }
    }

    /// Check if the failed operation can be retried without re-answering anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence { .. } | Self::Synthesis(_))
    }

    /// Fatal errors abort the flow; the engine refuses to render past them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ContractViolation(_))
    }

    /// Errors the user can correct by editing answers.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Field errors carried by a validation failure.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation { errors, .. } => errors,
            _ => &[],
        }
    }
}

/// Failure reported by an entity store implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("entity store unavailable: {0}")]
    Unavailable(String),

    #[error("entity `{0}` not found")]
    NotFound(String),

    #[error("entity store rejected the write: {0}")]
    Rejected(String),
}

/// Failure of a single synthesis attempt.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Gemini client error: {0}")]
    Gemini(#[from] gemini_rust::ClientError),

    #[error("AI collaborator unavailable: {0}")]
    Transport(String),

    #[error("Parse error: {message}\n\nRaw response:\n{raw_text}")]
    Parse { message: String, raw_text: String },

    #[error("Response does not match the report schema: {}", violations.join("; "))]
    SchemaMismatch { violations: Vec<String> },
}

impl SynthesisError {
    /// Create a parse error, keeping only a displayable prefix of the raw text.
    pub fn parse_error(err: serde_json::Error, raw_text: &str) -> Self {
        Self::Parse {
            message: err.to_string(),
            raw_text: truncate_for_display(raw_text, 500),
        }
    }
}

fn truncate_for_display(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}... [truncated, {} total chars]",
        &text[..cut],
        text.len()
    )
}

pub type Result<T> = std::result::Result<T, WizardError>;
