use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use crate::controller::{NavState, WizardController};
use crate::error::Result;
use crate::schema::WizardDefinition;
use crate::state::{Answers, WizardState};
use crate::store::PersistenceGateway;
use crate::synthesizer::ReportSynthesizer;
use crate::trace::{TraceLog, WizardEvent};
use crate::validator::first_invalid_step;

/// Where a resumed session lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum EntryPoint {
    /// Nothing stored yet.
    Welcome,
    MidFlow { step_id: u32 },
    /// Complete with a report on file.
    Completed,
    /// Complete but the report never arrived.
    ReportPending,
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Welcome => f.write_str("welcome"),
            Self::MidFlow { step_id } => write!(f, "mid_flow(step {step_id})"),
            Self::Completed => f.write_str("completed"),
            Self::ReportPending => f.write_str("report_pending"),
        }
    }
}

/// First step whose answers fail validation; the last step if every step passes.
pub fn resume_step(definition: &WizardDefinition, answers: &Answers) -> Result<u32> {
    Ok(match first_invalid_step(definition, answers)? {
        Some((step_id, _)) => step_id,
        None => definition.last_step_id(),
    })
}

/// Rebuilds a controller from whatever the store holds for an owner.
#[derive(Clone)]
pub struct SessionResumer {
    definition: Arc<WizardDefinition>,
    gateway: PersistenceGateway,
    synthesizer: ReportSynthesizer,
}

impl SessionResumer {
    pub fn new(
        definition: Arc<WizardDefinition>,
        gateway: PersistenceGateway,
        synthesizer: ReportSynthesizer,
    ) -> Self {
        Self {
            definition,
            gateway,
            synthesizer,
        }
    }

    #[instrument(skip_all, fields(owner_key = owner_key, wizard_type = %self.definition.wizard_type))]
    pub async fn resume(&self, owner_key: &str) -> Result<WizardController> {
        let stored = self.gateway.load_latest(owner_key).await?;

        let (state, nav, persisted, entry) = match stored {
            None => (
                WizardState::fresh(self.definition.clone(), owner_key),
                NavState::Idle,
                None,
                EntryPoint::Welcome,
            ),
            Some(session) => {
                let persisted = session.clone();
                let mut state = WizardState::from_session(self.definition.clone(), session)?;
                let last = self.definition.last_step_id();

                if !state.is_complete() {
                    let step_id = resume_step(&self.definition, state.answers())?;
                    state.set_current_step(step_id);
                    (state, NavState::Idle, Some(persisted), EntryPoint::MidFlow { step_id })
                } else if state.report().is_some() {
                    state.set_current_step(last);
                    (state, NavState::Done, Some(persisted), EntryPoint::Completed)
                } else {
                    state.set_current_step(last);
                    let nav = NavState::ReportFailed {
                        error: "report was not generated".to_string(),
                    };
                    (state, nav, Some(persisted), EntryPoint::ReportPending)
                }
            }
        };

        let step_id = state.current_step();
        info!(entry = %entry, step_id, "Resumed wizard session");
        let trace = TraceLog::new();
        trace.emit(WizardEvent::Resumed {
            entry: entry.to_string(),
            step_id,
        });

        Ok(WizardController::new(
            state,
            nav,
            persisted,
            self.gateway.clone(),
            self.synthesizer.clone(),
            trace,
            entry,
        ))
    }
}
