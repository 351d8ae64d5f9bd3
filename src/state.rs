//! In-memory wizard state and its synchronous mutation API.
//!
//! Mutations never touch persistence. Saving happens at step boundaries through
//! the controller, so typing and saving stay decoupled.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WizardError};
use crate::report::Report;
use crate::schema::{FieldKind, FieldSpec, WizardDefinition};
use crate::session::{SessionId, WizardSession};

/// A single answer. The variant always matches the field's kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Scale(i64),
    Text(String),
    Choices(BTreeSet<String>),
}

impl AnswerValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn choices<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Choices(values.into_iter().map(Into::into).collect())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_choices(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::Choices(choices) => Some(choices),
            _ => None,
        }
    }

    pub fn as_scale(&self) -> Option<i64> {
        match self {
            Self::Scale(value) => Some(*value),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Scale(_) => "integer",
            Self::Text(_) => "string",
            Self::Choices(_) => "set of strings",
        }
    }
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scale(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
            Self::Choices(choices) => {
                let joined = choices.iter().map(String::as_str).collect::<Vec<_>>();
                f.write_str(&joined.join(", "))
            }
        }
    }
}

/// Field key to answer. Unset fields are absent, never null.
pub type Answers = BTreeMap<String, AnswerValue>;

/// Check that `value` is an acceptable stored value for `field`.
///
/// Single-choice values outside the option set are left to the validator,
/// which reports them as a user-facing error.
pub(crate) fn check_contract(field: &FieldSpec, value: &AnswerValue) -> Result<()> {
    let compatible = match (&field.kind, value) {
        (FieldKind::Text | FieldKind::MultilineText, AnswerValue::Text(_)) => true,
        (FieldKind::SingleChoice { .. }, AnswerValue::Text(_)) => true,
        (FieldKind::MultiChoice { .. }, AnswerValue::Choices(selected)) => {
            if let Some(unknown) = selected.iter().find(|o| !field.kind.allows_option(o)) {
                return Err(WizardError::contract(format!(
                    "`{unknown}` is not an option of multi-choice field `{}`",
                    field.key
                )));
            }
            true
        }
        (FieldKind::BoundedScale { range }, AnswerValue::Scale(v)) => {
            if !range.contains(*v) {
                return Err(WizardError::contract(format!(
                    "scale field `{}` holds {v}, outside {}..={}",
                    field.key, range.min, range.max
                )));
            }
            true
        }
        _ => false,
    };

    if compatible {
        Ok(())
    } else {
        Err(WizardError::contract(format!(
            "field `{}` is {} but holds a {}",
            field.key,
            field.kind,
            value.type_name()
        )))
    }
}

/// The mutable session as the UI sees it.
#[derive(Debug, Clone)]
pub struct WizardState {
    definition: Arc<WizardDefinition>,
    id: Option<SessionId>,
    owner_key: String,
    answers: Answers,
    is_complete: bool,
    report: Option<Report>,
    current_step: u32,
}

impl WizardState {
    /// Fresh, unpersisted state with every scale at its midpoint.
    pub fn fresh(definition: Arc<WizardDefinition>, owner_key: impl Into<String>) -> Self {
        let mut state = Self {
            definition,
            id: None,
            owner_key: owner_key.into(),
            answers: Answers::new(),
            is_complete: false,
            report: None,
            current_step: 1,
        };
        state.apply_scale_defaults();
        state
    }

    /// Rebuild state from a persisted session, refusing data that drifted from the definition.
    pub fn from_session(definition: Arc<WizardDefinition>, session: WizardSession) -> Result<Self> {
        for (key, value) in &session.answers {
            let (_, field) = definition.field(key).ok_or_else(|| {
                WizardError::contract(format!(
                    "stored answer `{key}` is not declared by wizard `{}`",
                    definition.wizard_type
                ))
            })?;
            check_contract(field, value)?;
        }

        let mut state = Self {
            definition,
            id: session.id,
            owner_key: session.owner_key,
            answers: session.answers,
            is_complete: session.is_complete,
            report: session.report,
            current_step: 1,
        };
        state.apply_scale_defaults();
        Ok(state)
    }

    fn apply_scale_defaults(&mut self) {
        for field in self.definition.fields() {
            if let Some(range) = field.scale_range() {
                self.answers
                    .entry(field.key.clone())
                    .or_insert(AnswerValue::Scale(range.midpoint()));
            }
        }
    }

    fn field_spec(&self, key: &str) -> Result<&FieldSpec> {
        self.definition
            .field(key)
            .map(|(_, field)| field)
            .ok_or_else(|| {
                WizardError::contract(format!(
                    "`{key}` is not a field of wizard `{}`",
                    self.definition.wizard_type
                ))
            })
    }

    /// Replace a field's value.
    ///
    /// An empty multi-choice selection clears the field.
    pub fn set_field(&mut self, key: &str, value: AnswerValue) -> Result<()> {
        let field = self.field_spec(key)?;
        check_contract(field, &value)?;

        if matches!(&value, AnswerValue::Choices(selected) if selected.is_empty()) {
            self.answers.remove(key);
        } else {
            self.answers.insert(key.to_string(), value);
        }
        Ok(())
    }

    /// Add `option` to a multi-choice selection if absent, remove it if present.
    pub fn toggle_option(&mut self, key: &str, option: &str) -> Result<()> {
        let field = self.field_spec(key)?;
        if !matches!(field.kind, FieldKind::MultiChoice { .. }) {
            return Err(WizardError::contract(format!(
                "toggle_option needs a multi_choice field, `{key}` is {}",
                field.kind
            )));
        }
        if !field.kind.allows_option(option) {
            return Err(WizardError::contract(format!(
                "`{option}` is not an option of multi-choice field `{key}`"
            )));
        }

        let mut selected = self
            .answers
            .get(key)
            .and_then(AnswerValue::as_choices)
            .cloned()
            .unwrap_or_default();
        if !selected.remove(option) {
            selected.insert(option.to_string());
        }

        if selected.is_empty() {
            self.answers.remove(key);
        } else {
            self.answers
                .insert(key.to_string(), AnswerValue::Choices(selected));
        }
        Ok(())
    }

    /// Remove an answer. Scale fields fall back to their midpoint.
    pub fn clear_field(&mut self, key: &str) -> Result<()> {
        let field = self.field_spec(key)?;
        match field.scale_range() {
            Some(range) => {
                self.answers
                    .insert(key.to_string(), AnswerValue::Scale(range.midpoint()));
            }
            None => {
                self.answers.remove(key);
            }
        }
        Ok(())
    }

    pub fn answer(&self, key: &str) -> Option<&AnswerValue> {
        self.answers.get(key)
    }

    pub fn answers(&self) -> &Answers {
        &self.answers
    }

    pub fn definition(&self) -> &Arc<WizardDefinition> {
        &self.definition
    }

    pub fn id(&self) -> Option<&SessionId> {
        self.id.as_ref()
    }

    pub fn owner_key(&self) -> &str {
        &self.owner_key
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    pub fn current_step(&self) -> u32 {
        self.current_step
    }

    pub(crate) fn set_current_step(&mut self, step_id: u32) {
        self.current_step = step_id.clamp(1, self.definition.step_count());
    }

    pub(crate) fn set_report(&mut self, report: Report) {
        self.report = Some(report);
    }

    /// Session payload as it would be persisted right now.
    pub fn to_session(&self) -> WizardSession {
        WizardSession {
            id: self.id.clone(),
            owner_key: self.owner_key.clone(),
            wizard_type: self.definition.wizard_type.clone(),
            answers: self.answers.clone(),
            is_complete: self.is_complete,
            report: self.report.clone(),
            last_saved_at: None,
        }
    }

    /// Payload for the completing save: same answers, `is_complete` raised.
    pub(crate) fn completed_draft(&self) -> WizardSession {
        let mut draft = self.to_session();
        draft.is_complete = true;
        draft
    }

    /// Payload for "start over": same identity, everything else reset.
    pub(crate) fn reset_draft(&self) -> WizardSession {
        let fresh = Self::fresh(self.definition.clone(), self.owner_key.clone());
        let mut draft = fresh.to_session();
        draft.id = self.id.clone();
        draft
    }

    /// Adopt what the store confirmed. Completion never reverts here except through
    /// an explicit reset draft, which also clears the report.
    pub(crate) fn apply_saved(&mut self, saved: &WizardSession) {
        self.id = saved.id.clone();
        self.answers = saved.answers.clone();
        self.is_complete = saved.is_complete;
        self.report = saved.report.clone();
    }
}
