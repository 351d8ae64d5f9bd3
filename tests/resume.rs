mod common;

use std::sync::Arc;

use assessment_wizard::prelude::*;
use assessment_wizard::{EntityRecord, WizardEvent};
use common::*;
use serde_json::{json, Value};

fn record(id: &str, fields: Value) -> EntityRecord {
    EntityRecord {
        id: id.to_string(),
        fields: fields.as_object().cloned().unwrap(),
    }
}

#[tokio::test]
async fn test_saved_answers_survive_a_fresh_resume() {
    let h = harness(interview_definition(), ScriptedCollaborator::new(vec![]));
    let wizard = h.engine.resume("owner-1").await.unwrap();
    wizard
        .set_field("role", AnswerValue::text("Platform engineer"))
        .await
        .unwrap();
    wizard.toggle_option("topics", "systems").await.unwrap();
    wizard.toggle_option("topics", "behavioral").await.unwrap();
    wizard.toggle_option("topics", "algorithms").await.unwrap();
    wizard.toggle_option("topics", "algorithms").await.unwrap();
    wizard
        .set_field("level", AnswerValue::text("mid"))
        .await
        .unwrap();
    wizard
        .set_field("nerves", AnswerValue::Scale(7))
        .await
        .unwrap();
    let before = wizard.state().answers().clone();

    wizard.save_progress().await.unwrap();

    let resumed = h.engine.resume("owner-1").await.unwrap();
    let state = resumed.state();
    assert_eq!(state.answers(), &before);
    assert_eq!(
        state.answer("topics"),
        Some(&AnswerValue::choices(["behavioral", "systems"]))
    );
    // Every step passes, so the last step is where the user lands.
    assert_eq!(*resumed.entry(), EntryPoint::MidFlow { step_id: 3 });
    assert_eq!(resumed.current_step(), 3);
}

#[tokio::test]
async fn test_resume_lands_on_first_invalid_step() {
    let h = harness(interview_definition(), ScriptedCollaborator::new(vec![]));
    let wizard = h.engine.resume("owner-2").await.unwrap();
    wizard
        .set_field("role", AnswerValue::text("SRE"))
        .await
        .unwrap();
    wizard.next().await.unwrap();

    let resumed = h.engine.resume("owner-2").await.unwrap();
    assert_eq!(*resumed.entry(), EntryPoint::MidFlow { step_id: 2 });
    assert_eq!(resumed.nav_state(), NavState::Idle);
    assert!(matches!(
        resumed.trace().trace_snapshot()[0].event,
        WizardEvent::Resumed { step_id: 2, .. }
    ));
}

#[tokio::test]
async fn test_abandoned_synthesis_resumes_into_report_failed() {
    let h = harness(
        career_definition(),
        ScriptedCollaborator::new(vec![Err(SynthesisError::Transport(
            "connection reset".into(),
        ))]),
    );
    let wizard = h.engine.resume("owner-3").await.unwrap();
    wizard
        .set_field("name", AnswerValue::text("Grace"))
        .await
        .unwrap();
    wizard
        .set_field("goal", AnswerValue::text("Compiler work"))
        .await
        .unwrap();
    wizard.next().await.unwrap();
    wizard.next().await.unwrap();
    drop(wizard);
    let writes = h.store.write_count();

    let resumed = h.engine.resume("owner-3").await.unwrap();
    assert_eq!(*resumed.entry(), EntryPoint::ReportPending);
    assert!(matches!(
        resumed.nav_state(),
        NavState::ReportFailed { .. }
    ));
    assert_eq!(resumed.current_step(), 2);
    assert_eq!(h.collaborator.calls(), 1);
    assert_eq!(h.store.write_count(), writes);

    // Steps are not replayed; a retry goes straight to synthesis.
    assert!(resumed.next().await.is_err());
    h.collaborator.push(Ok(good_report()));
    let outcome = resumed.retry_report().await.unwrap();
    assert!(matches!(outcome, NavOutcome::Done(_)));
    assert_eq!(h.collaborator.calls(), 2);

    let done = h.engine.resume("owner-3").await.unwrap();
    assert_eq!(*done.entry(), EntryPoint::Completed);
    assert_eq!(done.nav_state(), NavState::Done);
    assert!(done.report().is_some());
}

#[tokio::test]
async fn test_drifted_answers_are_a_contract_violation() {
    let store = Arc::new(InMemoryEntityStore::with_records(vec![
        record(
            "scale",
            json!({
                "owner_key": "owner-4",
                "wizard_type": "career",
                "answers": {"name": "Ada", "confidence": 9},
                "is_complete": false,
                "report": null,
                "last_saved_at": null
            }),
        ),
        record(
            "topics",
            json!({
                "owner_key": "owner-5",
                "wizard_type": "interview",
                "answers": {"topics": ["systems", "gardening"]},
                "is_complete": false,
                "report": null,
                "last_saved_at": null
            }),
        ),
    ]));

    let career = harness_with_store(
        career_definition(),
        ScriptedCollaborator::new(vec![]),
        store.clone(),
    );
    let err = career.engine.resume("owner-4").await.err().unwrap();
    assert!(err.is_fatal());

    let interview = harness_with_store(
        interview_definition(),
        ScriptedCollaborator::new(vec![]),
        store,
    );
    let err = interview.engine.resume("owner-5").await.err().unwrap();
    assert!(matches!(err, WizardError::ContractViolation(_)));
}

#[tokio::test]
async fn test_owners_and_wizard_types_do_not_mix() {
    let store = Arc::new(InMemoryEntityStore::new());
    let career = harness_with_store(
        career_definition(),
        ScriptedCollaborator::new(vec![]),
        store.clone(),
    );
    let interview = harness_with_store(
        interview_definition(),
        ScriptedCollaborator::new(vec![]),
        store.clone(),
    );

    let a = career.engine.resume("owner-6").await.unwrap();
    a.set_field("name", AnswerValue::text("Ada")).await.unwrap();
    a.save_progress().await.unwrap();

    let b = career.engine.resume("owner-7").await.unwrap();
    assert_eq!(*b.entry(), EntryPoint::Welcome);
    assert!(b.state().answer("name").is_none());

    let other_type = interview.engine.resume("owner-6").await.unwrap();
    assert_eq!(*other_type.entry(), EntryPoint::Welcome);

    other_type
        .set_field("role", AnswerValue::text("SRE"))
        .await
        .unwrap();
    other_type.save_progress().await.unwrap();
    assert_eq!(store.records().await.len(), 2);
}

#[tokio::test]
async fn test_resume_surfaces_store_outage() {
    let h = harness(career_definition(), ScriptedCollaborator::new(vec![]));
    h.store.fail_next_reads(1);
    let err = h.engine.resume("owner-8").await.err().unwrap();
    assert!(err.is_retryable());
    assert!(h.engine.resume("owner-8").await.is_ok());
}
