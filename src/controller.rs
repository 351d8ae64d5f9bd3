//! Step navigation state machine.
//!
//! A [`WizardController`] owns one session's [`WizardState`]. Every operation
//! takes the controller lock for its whole duration, so a second navigation
//! request arriving while a save is in flight waits for it instead of
//! interleaving or being dropped.
//!
//! Readers never take that lock. Each transition and edit publishes a
//! [`WizardSnapshot`] on a watch channel, so `Saving`, `Completing` and
//! `AwaitingReport` are observable while the operation is still running.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, WizardError};
use crate::report::Report;
use crate::resumer::EntryPoint;
use crate::session::WizardSession;
use crate::state::{AnswerValue, WizardState};
use crate::store::PersistenceGateway;
use crate::synthesizer::ReportSynthesizer;
use crate::trace::{TraceLog, WizardEvent};
use crate::validator::{first_invalid_step, validate, FieldError};

/// What a save was issued for; re-run by [`WizardController::retry_save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveIntent {
    Advance,
    Complete,
    StartOver,
    Checkpoint,
}

/// Navigation state. Exactly one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavState {
    Idle,
    Validating,
    /// `error` is set once the save failed and is waiting for a retry.
    Saving {
        intent: SaveIntent,
        error: Option<String>,
    },
    NavigatingForward,
    NavigatingBackward,
    Completing,
    AwaitingReport,
    Done,
    ReportFailed {
        error: String,
    },
}

impl NavState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Saving { .. } => "saving",
            Self::NavigatingForward => "navigating_forward",
            Self::NavigatingBackward => "navigating_backward",
            Self::Completing => "completing",
            Self::AwaitingReport => "awaiting_report",
            Self::Done => "done",
            Self::ReportFailed { .. } => "report_failed",
        }
    }

    /// A save that failed and has not been retried or abandoned.
    pub fn failed_save(&self) -> Option<SaveIntent> {
        match self {
            Self::Saving {
                intent,
                error: Some(_),
            } => Some(*intent),
            _ => None,
        }
    }

    fn accepts_edits(&self) -> bool {
        matches!(self, Self::Idle) || self.failed_save().is_some()
    }
}

impl fmt::Display for NavState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of a navigation request that got past validation and saving.
#[derive(Debug, Clone, PartialEq)]
pub enum NavOutcome {
    Advanced { step_id: u32 },
    /// Saved without moving forward (checkpoint or start over).
    Saved { step_id: u32 },
    Done(Report),
    /// The session is complete but synthesis failed; answers are intact.
    ReportFailed { error: String },
}

/// What readers see: navigation state plus the answers behind it.
#[derive(Debug, Clone)]
pub struct WizardSnapshot {
    pub nav: NavState,
    pub state: WizardState,
}

/// Receiver that yields on every published snapshot.
pub type WizardWatcher = watch::Receiver<WizardSnapshot>;

struct Inner {
    state: WizardState,
    nav: NavState,
    /// Last session the store confirmed; the diff baseline for the next save.
    persisted: Option<WizardSession>,
}

#[derive(Clone)]
pub struct WizardController {
    inner: Arc<Mutex<Inner>>,
    snapshots: Arc<watch::Sender<WizardSnapshot>>,
    gateway: PersistenceGateway,
    synthesizer: ReportSynthesizer,
    trace: TraceLog,
    entry: EntryPoint,
    owner_key: String,
}

impl WizardController {
    pub(crate) fn new(
        state: WizardState,
        nav: NavState,
        persisted: Option<WizardSession>,
        gateway: PersistenceGateway,
        synthesizer: ReportSynthesizer,
        trace: TraceLog,
        entry: EntryPoint,
    ) -> Self {
        let owner_key = state.owner_key().to_string();
        let (snapshots, _) = watch::channel(WizardSnapshot {
            nav: nav.clone(),
            state: state.clone(),
        });
        Self {
            snapshots: Arc::new(snapshots),
            inner: Arc::new(Mutex::new(Inner {
                state,
                nav,
                persisted,
            })),
            gateway,
            synthesizer,
            trace,
            entry,
            owner_key,
        }
    }

    /// Where the session was resumed into.
    pub fn entry(&self) -> &EntryPoint {
        &self.entry
    }

    pub fn owner_key(&self) -> &str {
        &self.owner_key
    }

    pub fn trace(&self) -> &TraceLog {
        &self.trace
    }

    /// Latest published navigation state. Never waits on a running operation.
    pub fn nav_state(&self) -> NavState {
        self.snapshots.borrow().nav.clone()
    }

    /// Latest published in-memory state.
    pub fn state(&self) -> WizardState {
        self.snapshots.borrow().state.clone()
    }

    pub fn current_step(&self) -> u32 {
        self.snapshots.borrow().state.current_step()
    }

    pub fn report(&self) -> Option<Report> {
        self.snapshots.borrow().state.report().cloned()
    }

    pub fn snapshot(&self) -> WizardSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Follow every transition and edit as it happens.
    pub fn subscribe(&self) -> WizardWatcher {
        self.snapshots.subscribe()
    }

    pub async fn set_field(&self, key: &str, value: AnswerValue) -> Result<()> {
        let mut inner = self.inner.lock().await;
        ensure(&inner.nav, NavState::accepts_edits, "edit answers")?;
        inner.state.set_field(key, value)?;
        self.publish(&inner);
        Ok(())
    }

    pub async fn toggle_option(&self, key: &str, option: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        ensure(&inner.nav, NavState::accepts_edits, "edit answers")?;
        inner.state.toggle_option(key, option)?;
        self.publish(&inner);
        Ok(())
    }

    pub async fn clear_field(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        ensure(&inner.nav, NavState::accepts_edits, "edit answers")?;
        inner.state.clear_field(key)?;
        self.publish(&inner);
        Ok(())
    }

    /// Validation errors for the current step, without changing state.
    pub fn current_errors(&self) -> Result<Vec<FieldError>> {
        let snapshot = self.snapshots.borrow();
        validate(
            snapshot.state.definition(),
            snapshot.state.current_step(),
            snapshot.state.answers(),
        )
    }

    /// Validate the current step, save, then advance or complete.
    #[instrument(skip_all, fields(owner_key = %self.owner_key))]
    pub async fn next(&self) -> Result<NavOutcome> {
        let mut inner = self.inner.lock().await;
        ensure(&inner.nav, |n| matches!(n, NavState::Idle), "advance")?;
        self.advance_locked(&mut inner).await
    }

    /// Complete from the last step. Every step must validate.
    ///
    /// Called on an earlier step this is a validation failure for that step.
    #[instrument(skip_all, fields(owner_key = %self.owner_key))]
    pub async fn complete(&self) -> Result<NavOutcome> {
        let mut inner = self.inner.lock().await;
        ensure(&inner.nav, |n| matches!(n, NavState::Idle), "complete")?;
        self.complete_locked(&mut inner).await
    }

    /// Move back one step. Never validates or saves.
    ///
    /// From a failed save this abandons the pending save first.
    pub async fn back(&self) -> Result<u32> {
        let mut inner = self.inner.lock().await;
        ensure(&inner.nav, NavState::accepts_edits, "go back")?;

        self.transition(&mut inner, NavState::NavigatingBackward);
        let step_id = inner.state.current_step().saturating_sub(1).max(1);
        inner.state.set_current_step(step_id);
        self.transition(&mut inner, NavState::Idle);
        Ok(step_id)
    }

    /// Persist current answers without navigating.
    pub async fn save_progress(&self) -> Result<NavOutcome> {
        let mut inner = self.inner.lock().await;
        ensure(&inner.nav, |n| matches!(n, NavState::Idle), "save progress")?;
        self.run_save(&mut inner, SaveIntent::Checkpoint).await
    }

    /// Re-run whatever save previously failed.
    pub async fn retry_save(&self) -> Result<NavOutcome> {
        let mut inner = self.inner.lock().await;
        let intent = inner.nav.failed_save().ok_or_else(|| WizardError::InvalidTransition {
            from: inner.nav.to_string(),
            action: "retry a save",
        })?;
        info!(?intent, "Retrying failed save");

        match intent {
            SaveIntent::Advance => {
                self.transition(&mut inner, NavState::Idle);
                self.advance_locked(&mut inner).await
            }
            SaveIntent::Complete => {
                self.transition(&mut inner, NavState::Idle);
                self.complete_locked(&mut inner).await
            }
            SaveIntent::StartOver | SaveIntent::Checkpoint => {
                self.run_save(&mut inner, intent).await
            }
        }
    }

    /// Give up on a failed save. Answers stay as typed.
    pub async fn abandon_save(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        ensure(
            &inner.nav,
            |n| n.failed_save().is_some(),
            "abandon a save",
        )?;
        self.transition(&mut inner, NavState::Idle);
        Ok(())
    }

    /// Ask for a new report after a failed synthesis. One attempt per call.
    pub async fn retry_report(&self) -> Result<NavOutcome> {
        let mut inner = self.inner.lock().await;
        ensure(
            &inner.nav,
            |n| matches!(n, NavState::ReportFailed { .. }),
            "retry the report",
        )?;
        self.run_synthesis(&mut inner).await
    }

    /// Reset answers, completion and report on the same session.
    pub async fn start_over(&self) -> Result<NavOutcome> {
        let mut inner = self.inner.lock().await;
        ensure(
            &inner.nav,
            |n| {
                matches!(
                    n,
                    NavState::Idle | NavState::Done | NavState::ReportFailed { .. }
                ) || n.failed_save().is_some()
            },
            "start over",
        )?;
        self.run_save(&mut inner, SaveIntent::StartOver).await
    }

    fn publish(&self, inner: &Inner) {
        self.snapshots.send_replace(WizardSnapshot {
            nav: inner.nav.clone(),
            state: inner.state.clone(),
        });
    }

    fn transition(&self, inner: &mut Inner, to: NavState) {
        let from = std::mem::replace(&mut inner.nav, to);
        debug!(from = %from, to = %inner.nav, "Navigation transition");
        self.trace.emit(WizardEvent::Transition {
            from: from.to_string(),
            to: inner.nav.to_string(),
        });
        self.publish(inner);
    }

    fn block(&self, inner: &mut Inner, step_id: u32, errors: Vec<FieldError>) -> WizardError {
        self.trace.emit(WizardEvent::ValidationBlocked {
            step_id,
            errors: errors.len(),
        });
        self.transition(inner, NavState::Idle);
        WizardError::Validation { step_id, errors }
    }

    async fn advance_locked(&self, inner: &mut Inner) -> Result<NavOutcome> {
        self.transition(inner, NavState::Validating);
        let step_id = inner.state.current_step();
        let errors = match validate(inner.state.definition(), step_id, inner.state.answers()) {
            Ok(errors) => errors,
            Err(e) => {
                self.transition(inner, NavState::Idle);
                return Err(e);
            }
        };
        if !errors.is_empty() {
            return Err(self.block(inner, step_id, errors));
        }

        let intent = if step_id == inner.state.definition().last_step_id() {
            SaveIntent::Complete
        } else {
            SaveIntent::Advance
        };
        self.run_save(inner, intent).await
    }

    async fn complete_locked(&self, inner: &mut Inner) -> Result<NavOutcome> {
        self.transition(inner, NavState::Validating);
        let step_id = inner.state.current_step();
        if step_id != inner.state.definition().last_step_id() {
            let errors = match validate(inner.state.definition(), step_id, inner.state.answers()) {
                Ok(errors) => errors,
                Err(e) => {
                    self.transition(inner, NavState::Idle);
                    return Err(e);
                }
            };
            return Err(self.block(inner, step_id, errors));
        }
        match first_invalid_step(inner.state.definition(), inner.state.answers()) {
            Ok(None) => self.run_save(inner, SaveIntent::Complete).await,
            Ok(Some((step_id, errors))) => Err(self.block(inner, step_id, errors)),
            Err(e) => {
                self.transition(inner, NavState::Idle);
                Err(e)
            }
        }
    }

    async fn run_save(&self, inner: &mut Inner, intent: SaveIntent) -> Result<NavOutcome> {
        self.transition(
            inner,
            NavState::Saving {
                intent,
                error: None,
            },
        );

        let draft = match intent {
            SaveIntent::Advance | SaveIntent::Checkpoint => inner.state.to_session(),
            SaveIntent::Complete => inner.state.completed_draft(),
            SaveIntent::StartOver => inner.state.reset_draft(),
        };

        let outcome = match self.gateway.save(&draft, inner.persisted.as_ref()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, ?intent, "Save failed; answers kept in memory");
                self.trace.emit(WizardEvent::SaveFailed {
                    message: e.to_string(),
                });
                self.transition(
                    inner,
                    NavState::Saving {
                        intent,
                        error: Some(e.to_string()),
                    },
                );
                return Err(e);
            }
        };

        if outcome.written() {
            self.trace.emit(WizardEvent::SaveIssued {
                changed_fields: outcome.changed_fields.clone(),
            });
        } else {
            self.trace.emit(WizardEvent::SaveSkipped);
        }
        inner.state.apply_saved(&outcome.session);
        inner.persisted = Some(outcome.session);

        let step_id = inner.state.current_step();
        match intent {
            SaveIntent::Advance => {
                self.transition(inner, NavState::NavigatingForward);
                inner.state.set_current_step(step_id + 1);
                self.transition(inner, NavState::Idle);
                Ok(NavOutcome::Advanced {
                    step_id: inner.state.current_step(),
                })
            }
            SaveIntent::Checkpoint => {
                self.transition(inner, NavState::Idle);
                Ok(NavOutcome::Saved { step_id })
            }
            SaveIntent::StartOver => {
                inner.state.set_current_step(1);
                self.transition(inner, NavState::Idle);
                info!("Session reset by start over");
                Ok(NavOutcome::Saved { step_id: 1 })
            }
            SaveIntent::Complete => {
                self.transition(inner, NavState::Completing);
                self.run_synthesis(inner).await
            }
        }
    }

    async fn run_synthesis(&self, inner: &mut Inner) -> Result<NavOutcome> {
        self.transition(inner, NavState::AwaitingReport);
        let session = inner.state.to_session();

        match self.synthesizer.synthesize(&session, &self.trace).await {
            Ok(report) => {
                inner.state.set_report(report.clone());
                if let Some(persisted) = inner.persisted.as_mut() {
                    persisted.report = Some(report.clone());
                }
                self.transition(inner, NavState::Done);
                Ok(NavOutcome::Done(report))
            }
            Err(e) => {
                let error = e.to_string();
                self.transition(
                    inner,
                    NavState::ReportFailed {
                        error: error.clone(),
                    },
                );
                Ok(NavOutcome::ReportFailed { error })
            }
        }
    }
}

fn ensure(nav: &NavState, allowed: impl Fn(&NavState) -> bool, action: &'static str) -> Result<()> {
    if allowed(nav) {
        Ok(())
    } else {
        Err(WizardError::InvalidTransition {
            from: nav.to_string(),
            action,
        })
    }
}
