mod common;

use std::sync::Arc;

use assessment_wizard::prelude::*;
use assessment_wizard::SaveIntent;
use async_trait::async_trait;
use common::*;
use serde_json::{json, Value};

/// Answers with a valid report, but arms a store failure first so the
/// write that attaches it is rejected.
struct FailingAttach {
    store: Arc<InMemoryEntityStore>,
}

#[async_trait]
impl AiCollaborator for FailingAttach {
    async fn generate(
        &self,
        _request: &SynthesisRequest,
    ) -> std::result::Result<Value, SynthesisError> {
        self.store.fail_next_writes(1);
        Ok(good_report())
    }
}

async fn ready_step_one(h: &Harness, owner: &str) -> WizardController {
    let wizard = h.engine.resume(owner).await.unwrap();
    wizard
        .set_field("name", AnswerValue::text("Linus"))
        .await
        .unwrap();
    wizard
        .set_field("goal", AnswerValue::text("Maintain a kernel"))
        .await
        .unwrap();
    wizard
}

#[tokio::test]
async fn test_failed_save_keeps_answers_and_waits_for_retry() {
    let h = harness(career_definition(), ScriptedCollaborator::new(vec![]));
    let wizard = ready_step_one(&h, "owner-1").await;
    let before = wizard.state();

    h.store.fail_next_writes(1);
    let err = wizard.next().await.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(err, WizardError::Persistence { .. }));

    let nav = wizard.nav_state();
    assert_eq!(nav.failed_save(), Some(SaveIntent::Advance));
    assert_eq!(wizard.current_step(), 1);
    assert_eq!(wizard.state().answers(), before.answers());
    assert!(wizard.state().id().is_none());

    // Navigation is refused until the save is retried or abandoned.
    assert!(matches!(
        wizard.next().await.unwrap_err(),
        WizardError::InvalidTransition { .. }
    ));

    let outcome = wizard.retry_save().await.unwrap();
    assert_eq!(outcome, NavOutcome::Advanced { step_id: 2 });
    assert_eq!(h.store.records().await.len(), 1);
    assert_eq!(wizard.trace().snapshot().save_failures, 1);
}

#[tokio::test]
async fn test_abandoned_save_returns_to_idle() {
    let h = harness(career_definition(), ScriptedCollaborator::new(vec![]));
    let wizard = ready_step_one(&h, "owner-2").await;

    h.store.fail_next_writes(1);
    wizard.next().await.unwrap_err();
    wizard
        .set_field("goal", AnswerValue::text("Write a filesystem"))
        .await
        .unwrap();
    wizard.abandon_save().await.unwrap();

    assert_eq!(wizard.nav_state(), NavState::Idle);
    assert_eq!(
        wizard.state().answer("goal"),
        Some(&AnswerValue::text("Write a filesystem"))
    );
    assert_eq!(h.store.write_count(), 0);
    assert!(wizard.abandon_save().await.is_err());
}

#[tokio::test]
async fn test_failed_completing_save_does_not_synthesize() {
    let h = harness(
        career_definition(),
        ScriptedCollaborator::new(vec![Ok(good_report())]),
    );
    let wizard = ready_step_one(&h, "owner-3").await;
    wizard.next().await.unwrap();

    h.store.fail_next_writes(1);
    wizard.next().await.unwrap_err();
    assert_eq!(
        wizard.nav_state().failed_save(),
        Some(SaveIntent::Complete)
    );
    assert!(!wizard.state().is_complete());
    assert_eq!(h.collaborator.calls(), 0);

    let outcome = wizard.retry_save().await.unwrap();
    assert!(matches!(outcome, NavOutcome::Done(_)));
    assert_eq!(h.collaborator.calls(), 1);
}

#[tokio::test]
async fn test_unchanged_resave_skips_the_write() {
    let h = harness(interview_definition(), ScriptedCollaborator::new(vec![]));
    let wizard = h.engine.resume("owner-4").await.unwrap();
    wizard
        .set_field("role", AnswerValue::text("SRE"))
        .await
        .unwrap();
    wizard.toggle_option("topics", "systems").await.unwrap();
    wizard.save_progress().await.unwrap();
    let writes = h.store.write_count();

    wizard.toggle_option("topics", "algorithms").await.unwrap();
    wizard.toggle_option("topics", "algorithms").await.unwrap();
    wizard.save_progress().await.unwrap();

    assert_eq!(h.store.write_count(), writes);
    let metrics = wizard.trace().snapshot();
    assert_eq!(metrics.saves_issued, 1);
    assert_eq!(metrics.saves_skipped, 1);
}

#[tokio::test]
async fn test_concurrent_next_calls_are_serialized() {
    let h = harness(interview_definition(), ScriptedCollaborator::new(vec![]));
    let wizard = h.engine.resume("owner-5").await.unwrap();
    wizard
        .set_field("role", AnswerValue::text("SRE"))
        .await
        .unwrap();
    wizard
        .set_field("level", AnswerValue::text("senior"))
        .await
        .unwrap();
    wizard.toggle_option("topics", "systems").await.unwrap();

    let other = wizard.clone();
    let (first, second) = tokio::join!(wizard.next(), other.next());
    let mut steps = vec![first.unwrap(), second.unwrap()];
    steps.sort_by_key(|o| match o {
        NavOutcome::Advanced { step_id } => *step_id,
        _ => 0,
    });
    assert_eq!(
        steps,
        vec![
            NavOutcome::Advanced { step_id: 2 },
            NavOutcome::Advanced { step_id: 3 },
        ]
    );
    assert_eq!(wizard.current_step(), 3);
    assert_eq!(h.store.records().await.len(), 1);
    assert_eq!(h.store.create_count(), 1);
}

#[tokio::test]
async fn test_second_first_save_reuses_existing_session() {
    let h = harness(career_definition(), ScriptedCollaborator::new(vec![]));
    let a = ready_step_one(&h, "owner-6").await;
    let b = ready_step_one(&h, "owner-6").await;

    a.save_progress().await.unwrap();
    b.set_field("goal", AnswerValue::text("Tooling"))
        .await
        .unwrap();
    b.save_progress().await.unwrap();

    let records = h.store.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(a.state().id(), b.state().id());
}

#[tokio::test]
async fn test_report_that_cannot_be_attached_is_pending() {
    init_tracing();
    let store = Arc::new(InMemoryEntityStore::new());
    let engine = WizardEngine::builder(
        career_definition(),
        career_report_schema(),
        store.clone(),
        Arc::new(FailingAttach {
            store: store.clone(),
        }),
    )
    .build()
    .unwrap();

    let wizard = engine.resume("owner-7").await.unwrap();
    wizard
        .set_field("name", AnswerValue::text("Barbara"))
        .await
        .unwrap();
    wizard
        .set_field("goal", AnswerValue::text("Distributed systems"))
        .await
        .unwrap();
    wizard.next().await.unwrap();

    let outcome = wizard.next().await.unwrap();
    assert!(matches!(outcome, NavOutcome::ReportFailed { .. }));
    assert!(matches!(wizard.nav_state(), NavState::ReportFailed { .. }));
    assert!(wizard.report().is_none());
    assert!(wizard.state().is_complete());

    let stored = &store.records().await[0];
    assert_eq!(stored.fields["is_complete"], json!(true));
    assert_eq!(stored.fields["report"], json!(null));

    let resumed = engine.resume("owner-7").await.unwrap();
    assert_eq!(*resumed.entry(), EntryPoint::ReportPending);
    assert!(resumed.report().is_none());
}
