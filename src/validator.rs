//! Step-scoped, side-effect free answer validation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WizardError};
use crate::schema::{FieldKind, WizardDefinition};
use crate::state::{check_contract, AnswerValue, Answers};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    Missing,
    Blank,
    NotAnOption,
    NothingSelected,
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Missing => "this field is required",
            Self::Blank => "this field cannot be blank",
            Self::NotAnOption => "choose one of the listed options",
            Self::NothingSelected => "select at least one option",
        };
        f.write_str(text)
    }
}

/// A user-facing problem with one field on the current step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field_key: String,
    pub reason: ErrorReason,
}

impl FieldError {
    fn new(field_key: &str, reason: ErrorReason) -> Self {
        Self {
            field_key: field_key.to_string(),
            reason,
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field_key, self.reason)
    }
}

/// Validate the fields of `step_id` only.
///
/// Returns the user-facing errors in field order. Stored values that contradict
/// the definition (wrong type, unknown multi-choice option, scale out of range)
/// are contract violations and come back as `Err`.
pub fn validate(
    definition: &WizardDefinition,
    step_id: u32,
    answers: &Answers,
) -> Result<Vec<FieldError>> {
    let step = definition.step(step_id).ok_or_else(|| {
        WizardError::contract(format!(
            "wizard `{}` has no step {step_id}",
            definition.wizard_type
        ))
    })?;

    let mut errors = Vec::new();
    for field in &step.fields {
        let value = answers.get(&field.key);
        if let Some(value) = value {
            check_contract(field, value)?;
        }

        let reason = match (&field.kind, value) {
            (FieldKind::BoundedScale { .. }, _) => None,
            (FieldKind::SingleChoice { .. }, Some(AnswerValue::Text(choice))) => {
                (!field.kind.allows_option(choice)).then_some(ErrorReason::NotAnOption)
            }
            (_, None) if field.required => Some(match field.kind {
                FieldKind::MultiChoice { .. } => ErrorReason::NothingSelected,
                _ => ErrorReason::Missing,
            }),
            (FieldKind::Text | FieldKind::MultilineText, Some(AnswerValue::Text(text)))
                if field.required && text.trim().is_empty() =>
            {
                Some(ErrorReason::Blank)
            }
            (FieldKind::MultiChoice { .. }, Some(AnswerValue::Choices(selected)))
                if field.required && selected.is_empty() =>
            {
                Some(ErrorReason::NothingSelected)
            }
            _ => None,
        };

        if let Some(reason) = reason {
            errors.push(FieldError::new(&field.key, reason));
        }
    }
    Ok(errors)
}

/// First step, in order, whose validation fails. `None` when every step passes.
pub fn first_invalid_step(
    definition: &WizardDefinition,
    answers: &Answers,
) -> Result<Option<(u32, Vec<FieldError>)>> {
    for step in &definition.steps {
        let errors = validate(definition, step.step_id, answers)?;
        if !errors.is_empty() {
            return Ok(Some((step.step_id, errors)));
        }
    }
    Ok(None)
}
