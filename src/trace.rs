//! Diagnostics for a single wizard session.
//!
//! Every controller owns its own [`TraceLog`]: a timestamped list of
//! [`WizardEvent`]s and a set of aggregated [`EngineMetrics`]. Nothing here is
//! shared between owners.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Structured events recorded while a wizard runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WizardEvent {
    Resumed { entry: String, step_id: u32 },
    Transition { from: String, to: String },
    ValidationBlocked { step_id: u32, errors: usize },
    SaveIssued { changed_fields: Vec<String> },
    SaveSkipped,
    SaveFailed { message: String },
    SynthesisStarted { attempt: usize, prompt_digest: String },
    SynthesisSucceeded { prompt_digest: String },
    SynthesisFailed { message: String },
}

/// A timestamped event.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub timestamp: DateTime<Utc>,
    pub event: WizardEvent,
}

impl TraceEntry {
    pub fn new(event: WizardEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Aggregated counters for one session.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct EngineMetrics {
    /// Writes that reached the entity store.
    pub saves_issued: usize,
    /// Saves that found nothing to write.
    pub saves_skipped: usize,
    pub save_failures: usize,
    pub synthesis_attempts: usize,
    pub synthesis_failures: usize,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TraceLog {
    metrics: Arc<Mutex<EngineMetrics>>,
    entries: Arc<Mutex<Vec<TraceEntry>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event and update the matching counters.
    pub fn emit(&self, event: WizardEvent) {
        {
            let mut m = lock(&self.metrics);
            match &event {
                WizardEvent::SaveIssued { .. } => m.saves_issued += 1,
                WizardEvent::SaveSkipped => m.saves_skipped += 1,
                WizardEvent::SaveFailed { message } => {
                    m.save_failures += 1;
                    m.failures.push(message.clone());
                }
                WizardEvent::SynthesisStarted { .. } => m.synthesis_attempts += 1,
                WizardEvent::SynthesisFailed { message } => {
                    m.synthesis_failures += 1;
                    m.failures.push(message.clone());
                }
                _ => {}
            }
        }
        lock(&self.entries).push(TraceEntry::new(event));
    }

    pub fn snapshot(&self) -> EngineMetrics {
        lock(&self.metrics).clone()
    }

    pub fn trace_snapshot(&self) -> Vec<TraceEntry> {
        lock(&self.entries).clone()
    }

    /// Number of synthesis attempts made so far. Next attempt is this plus one.
    pub fn synthesis_attempts(&self) -> usize {
        lock(&self.metrics).synthesis_attempts
    }

    pub fn clear_traces(&self) {
        lock(&self.entries).clear();
    }
}
