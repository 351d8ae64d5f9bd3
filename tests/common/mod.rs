#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use assessment_wizard::prelude::*;
use assessment_wizard::SynthesisRequest;
use async_trait::async_trait;
use serde_json::{json, Value};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Collaborator that replays queued responses and counts calls.
#[derive(Default)]
pub struct ScriptedCollaborator {
    responses: Mutex<VecDeque<std::result::Result<Value, SynthesisError>>>,
    requests: Mutex<Vec<SynthesisRequest>>,
    calls: AtomicUsize,
}

impl ScriptedCollaborator {
    pub fn new(responses: Vec<std::result::Result<Value, SynthesisError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        })
    }

    pub fn push(&self, response: std::result::Result<Value, SynthesisError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<SynthesisRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl AiCollaborator for ScriptedCollaborator {
    async fn generate(
        &self,
        request: &SynthesisRequest,
    ) -> std::result::Result<Value, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SynthesisError::Transport("no scripted response".into())))
    }
}

/// Two required text fields on step 1, a 1-5 scale on step 2.
pub fn career_definition() -> WizardDefinition {
    WizardDefinition::new(
        "career",
        vec![
            StepSchema::new(
                1,
                vec![
                    FieldSpec::text("name").required(),
                    FieldSpec::multiline_text("goal").required(),
                ],
            )
            .with_title("About you"),
            StepSchema::new(2, vec![FieldSpec::bounded_scale("confidence", 1, 5)])
                .with_title("Self assessment"),
        ],
    )
    .unwrap()
}

/// Three steps with choices, for resume and toggle tests.
pub fn interview_definition() -> WizardDefinition {
    WizardDefinition::new(
        "interview",
        vec![
            StepSchema::new(1, vec![FieldSpec::text("role").required()]),
            StepSchema::new(
                2,
                vec![
                    FieldSpec::single_choice("level", ["junior", "mid", "senior"]).required(),
                    FieldSpec::multi_choice("topics", ["systems", "algorithms", "behavioral"])
                        .required(),
                ],
            ),
            StepSchema::new(
                3,
                vec![
                    FieldSpec::bounded_scale("nerves", 0, 10),
                    FieldSpec::text("notes"),
                ],
            ),
        ],
    )
    .unwrap()
}

pub fn career_report_schema() -> ReportSchema {
    ReportSchema::new(vec![
        ReportField::string("summary"),
        ReportField::string_array("career_paths"),
        ReportField::string("caveats").optional(),
    ])
}

pub fn good_report() -> Value {
    json!({
        "summary": "Strong systems background with room to grow in leadership.",
        "career_paths": ["Backend engineer", "Site reliability engineer"]
    })
}

pub struct Harness {
    pub engine: WizardEngine,
    pub store: Arc<InMemoryEntityStore>,
    pub collaborator: Arc<ScriptedCollaborator>,
}

pub fn harness(definition: WizardDefinition, collaborator: Arc<ScriptedCollaborator>) -> Harness {
    harness_with_store(definition, collaborator, Arc::new(InMemoryEntityStore::new()))
}

pub fn harness_with_store(
    definition: WizardDefinition,
    collaborator: Arc<ScriptedCollaborator>,
    store: Arc<InMemoryEntityStore>,
) -> Harness {
    init_tracing();
    let engine = WizardEngine::builder(
        definition,
        career_report_schema(),
        store.clone(),
        collaborator.clone(),
    )
    .build()
    .unwrap();
    Harness {
        engine,
        store,
        collaborator,
    }
}
