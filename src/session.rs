use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::report::Report;
use crate::state::Answers;

/// Opaque identifier assigned by the entity store on first save.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The persisted wizard session entity.
///
/// `id` lives outside the stored field map; everything else round-trips
/// through the entity store as plain JSON fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WizardSession {
    #[serde(skip)]
    pub id: Option<SessionId>,
    pub owner_key: String,
    pub wizard_type: String,
    #[serde(default)]
    pub answers: Answers,
    #[serde(default)]
    pub is_complete: bool,
    /// Serialized as `null` when absent so a reset clears it in the store.
    #[serde(default)]
    pub report: Option<Report>,
    /// Diagnostics only; never used for conflict resolution.
    #[serde(default)]
    pub last_saved_at: Option<DateTime<Utc>>,
}

impl WizardSession {
    pub fn new(owner_key: impl Into<String>, wizard_type: impl Into<String>) -> Self {
        Self {
            id: None,
            owner_key: owner_key.into(),
            wizard_type: wizard_type.into(),
            answers: Answers::new(),
            is_complete: false,
            report: None,
            last_saved_at: None,
        }
    }

    pub fn has_report(&self) -> bool {
        self.report.is_some()
    }
}
