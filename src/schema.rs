//! Static description of a wizard: its steps, their fields and what each field accepts.
//!
//! Definitions are pure data. They can be authored in Rust with the constructors
//! below or deserialized from JSON, then checked once with [`WizardDefinition::validate`].

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WizardError};

/// Inclusive integer range for a bounded scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleRange {
    pub min: i64,
    pub max: i64,
}

impl ScaleRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// Default displayed value, rounded towards `min`.
    /// Rounds toward `min`. Widened so the full `i64` span cannot overflow.
    pub fn midpoint(&self) -> i64 {
        let (min, max) = (i128::from(self.min), i128::from(self.max));
        (min + (max - min) / 2) as i64
    }

    pub fn contains(&self, value: i64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// What a field accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    MultilineText,
    SingleChoice { options: Vec<String> },
    MultiChoice { options: Vec<String> },
    BoundedScale { range: ScaleRange },
}

impl FieldKind {
    pub fn options(&self) -> Option<&[String]> {
        match self {
            Self::SingleChoice { options } | Self::MultiChoice { options } => Some(options),
            _ => None,
        }
    }

    pub fn allows_option(&self, option: &str) -> bool {
        self.options()
            .is_some_and(|options| options.iter().any(|o| o == option))
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::MultilineText => "multiline_text",
            Self::SingleChoice { .. } => "single_choice",
            Self::MultiChoice { .. } => "multi_choice",
            Self::BoundedScale { .. } => "bounded_scale",
        };
        f.write_str(name)
    }
}

/// One field on a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub key: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    /// Human wording used when the answers are rendered into a prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl FieldSpec {
    fn with_kind(key: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            key: key.into(),
            kind,
            required: false,
            label: None,
        }
    }

    pub fn text(key: impl Into<String>) -> Self {
        Self::with_kind(key, FieldKind::Text)
    }

    pub fn multiline_text(key: impl Into<String>) -> Self {
        Self::with_kind(key, FieldKind::MultilineText)
    }

    pub fn single_choice<I, S>(key: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options = options.into_iter().map(Into::into).collect();
        Self::with_kind(key, FieldKind::SingleChoice { options })
    }

    pub fn multi_choice<I, S>(key: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options = options.into_iter().map(Into::into).collect();
        Self::with_kind(key, FieldKind::MultiChoice { options })
    }

    pub fn bounded_scale(key: impl Into<String>, min: i64, max: i64) -> Self {
        Self::with_kind(
            key,
            FieldKind::BoundedScale {
                range: ScaleRange::new(min, max),
            },
        )
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.key)
    }

    pub fn scale_range(&self) -> Option<ScaleRange> {
        match self.kind {
            FieldKind::BoundedScale { range } => Some(range),
            _ => None,
        }
    }
}

/// One page of related fields, validated as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSchema {
    pub step_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub fields: Vec<FieldSpec>,
}

impl StepSchema {
    pub fn new(step_id: u32, fields: Vec<FieldSpec>) -> Self {
        Self {
            step_id,
            title: None,
            fields,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.key == key)
    }
}

/// The full, ordered set of steps for one wizard type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WizardDefinition {
    pub wizard_type: String,
    pub steps: Vec<StepSchema>,
}

impl WizardDefinition {
    /// Build and validate a definition.
    pub fn new(wizard_type: impl Into<String>, steps: Vec<StepSchema>) -> Result<Self> {
        let definition = Self {
            wizard_type: wizard_type.into(),
            steps,
        };
        definition.validate()?;
        Ok(definition)
    }

    /// Parse a JSON-authored definition and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let definition: Self = serde_json::from_str(json)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Check authoring rules: contiguous step ids from 1, unique keys, sane kinds.
    pub fn validate(&self) -> Result<()> {
        if self.wizard_type.trim().is_empty() {
            return Err(WizardError::InvalidDefinition(
                "wizard_type must not be empty".to_string(),
            ));
        }
        if self.steps.is_empty() {
            return Err(WizardError::InvalidDefinition(format!(
                "wizard `{}` has no steps",
                self.wizard_type
            )));
        }

        let mut seen = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            let expected = index as u32 + 1;
            if step.step_id != expected {
                return Err(WizardError::InvalidDefinition(format!(
                    "step ids must be contiguous from 1: expected {expected}, found {}",
                    step.step_id
                )));
            }

            for field in &step.fields {
                if field.key.is_empty() {
                    return Err(WizardError::InvalidDefinition(format!(
                        "step {} has a field with an empty key",
                        step.step_id
                    )));
                }
                if !seen.insert(field.key.as_str()) {
                    return Err(WizardError::InvalidDefinition(format!(
                        "field key `{}` is declared more than once",
                        field.key
                    )));
                }
                match &field.kind {
                    FieldKind::SingleChoice { options } | FieldKind::MultiChoice { options } => {
                        if options.is_empty() {
                            return Err(WizardError::InvalidDefinition(format!(
                                "choice field `{}` has no options",
                                field.key
                            )));
                        }
                        let unique: HashSet<_> = options.iter().collect();
                        if unique.len() != options.len() {
                            return Err(WizardError::InvalidDefinition(format!(
                                "choice field `{}` repeats an option",
                                field.key
                            )));
                        }
                    }
                    FieldKind::BoundedScale { range } if range.min > range.max => {
                        return Err(WizardError::InvalidDefinition(format!(
                            "scale field `{}` has min {} greater than max {}",
                            field.key, range.min, range.max
                        )));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    pub fn step_count(&self) -> u32 {
        self.steps.len() as u32
    }

    pub fn last_step_id(&self) -> u32 {
        self.step_count()
    }

    pub fn step(&self, step_id: u32) -> Option<&StepSchema> {
        step_id
            .checked_sub(1)
            .and_then(|index| self.steps.get(index as usize))
    }

    /// Look up a field together with the step that declares it.
    pub fn field(&self, key: &str) -> Option<(&StepSchema, &FieldSpec)> {
        self.steps
            .iter()
            .find_map(|step| step.field(key).map(|field| (step, field)))
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.steps.iter().flat_map(|step| step.fields.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_steps() -> Vec<StepSchema> {
        vec![
            StepSchema::new(
                1,
                vec![
                    FieldSpec::text("name").required(),
                    FieldSpec::multi_choice("interests", ["rust", "design"]),
                ],
            ),
            StepSchema::new(2, vec![FieldSpec::bounded_scale("confidence", 1, 5)]),
        ]
    }

    #[test]
    fn test_valid_definition() {
        let definition = WizardDefinition::new("career", two_steps()).unwrap();
        assert_eq!(definition.step_count(), 2);
        assert_eq!(definition.field("confidence").unwrap().0.step_id, 2);
        assert!(definition.step(0).is_none());
        assert!(definition.step(3).is_none());
    }

    #[test]
    fn test_rejects_gap_in_step_ids() {
        let mut steps = two_steps();
        steps[1].step_id = 3;
        let err = WizardDefinition::new("career", steps).unwrap_err();
        assert!(matches!(err, WizardError::InvalidDefinition(_)));
    }

    #[test]
    fn test_rejects_duplicate_keys_across_steps() {
        let mut steps = two_steps();
        steps[1].fields.push(FieldSpec::text("name"));
        assert!(WizardDefinition::new("career", steps).is_err());
    }

    #[test]
    fn test_rejects_inverted_scale_and_empty_choices() {
        let steps = vec![StepSchema::new(1, vec![FieldSpec::bounded_scale("s", 5, 1)])];
        assert!(WizardDefinition::new("x", steps).is_err());

        let empty: [&str; 0] = [];
        let steps = vec![StepSchema::new(1, vec![FieldSpec::single_choice("c", empty)])];
        assert!(WizardDefinition::new("x", steps).is_err());
    }

    #[test]
    fn test_midpoint() {
        assert_eq!(ScaleRange::new(1, 5).midpoint(), 3);
        assert_eq!(ScaleRange::new(0, 10).midpoint(), 5);
        assert_eq!(ScaleRange::new(1, 4).midpoint(), 2);
        assert_eq!(ScaleRange::new(-3, 3).midpoint(), 0);
        assert_eq!(ScaleRange::new(i64::MIN, i64::MAX).midpoint(), -1);
        assert_eq!(ScaleRange::new(i64::MAX - 1, i64::MAX).midpoint(), i64::MAX - 1);
    }

    #[test]
    fn test_json_authoring() {
        let json = r#"{
            "wizard_type": "interview",
            "steps": [
                {"step_id": 1, "title": "Role", "fields": [
                    {"key": "role", "kind": "single_choice", "options": ["backend", "frontend"], "required": true},
                    {"key": "stress", "kind": "bounded_scale", "range": {"min": 1, "max": 10}}
                ]}
            ]
        }"#;
        let definition = WizardDefinition::from_json(json).unwrap();
        let (_, role) = definition.field("role").unwrap();
        assert!(role.required);
        assert!(role.kind.allows_option("backend"));
        assert_eq!(
            definition.field("stress").unwrap().1.scale_range(),
            Some(ScaleRange::new(1, 10))
        );
    }
}
