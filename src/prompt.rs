//! Deterministic prompt assembly from completed answers.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::schema::{FieldKind, WizardDefinition};
use crate::state::{AnswerValue, Answers};

/// Prompt text plus the fingerprint used to recognise identical inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisPrompt {
    pub system_instruction: Option<String>,
    pub text: String,
    pub digest: String,
}

/// Renders answers in definition order. Same answers always give the same text.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    system_instruction: Option<String>,
    preamble: Option<String>,
    include_unanswered: bool,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    /// List optional fields without an answer as "(no answer)".
    pub fn include_unanswered(mut self, include: bool) -> Self {
        self.include_unanswered = include;
        self
    }

    pub fn build(
        &self,
        definition: &WizardDefinition,
        answers: &Answers,
        contract: &Value,
    ) -> SynthesisPrompt {
        let mut text = String::new();

        if let Some(preamble) = &self.preamble {
            text.push_str(&format!("{}\n\n", preamble.trim()));
        }
        text.push_str(&format!("Assessment: {}\n", definition.wizard_type));

        for step in &definition.steps {
            text.push_str(&format!("\n## Step {}", step.step_id));
            if let Some(title) = &step.title {
                text.push_str(&format!(": {title}"));
            }
            text.push('\n');

            for field in &step.fields {
                let rendered = match (answers.get(&field.key), &field.kind) {
                    (Some(AnswerValue::Scale(v)), FieldKind::BoundedScale { range }) => {
                        format!("{v} (on a scale of {} to {})", range.min, range.max)
                    }
                    (Some(AnswerValue::Text(t)), FieldKind::MultilineText) => {
                        let body = t.trim().lines().collect::<Vec<_>>().join("\n  ");
                        format!("\n  {body}")
                    }
                    (Some(value), _) => value.to_string().trim().to_string(),
                    (None, _) if self.include_unanswered => "(no answer)".to_string(),
                    (None, _) => continue,
                };
                text.push_str(&format!("- {}: {}\n", field.display_label(), rendered));
            }
        }

        text.push_str(
            "\nRespond only with a JSON object that satisfies the provided output schema.\n",
        );

        let digest = digest(self.system_instruction.as_deref(), &text, contract);
        SynthesisPrompt {
            system_instruction: self.system_instruction.clone(),
            text,
            digest,
        }
    }
}

/// SHA-256 over the system instruction, prompt and output contract.
fn digest(system: Option<&str>, text: &str, contract: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(system.unwrap_or_default().as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hasher.update([0u8]);
    hasher.update(contract.to_string().as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
