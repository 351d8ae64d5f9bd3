//! Staged, resumable assessment wizards that end in a schema-constrained AI report.
//!
//! A [`WizardDefinition`] declares the steps and fields of one wizard type. A
//! [`WizardEngine`] binds that definition to an [`EntityStore`] and an
//! [`AiCollaborator`]; [`WizardEngine::resume`] hands back a
//! [`WizardController`] positioned wherever the owner left off. Each forward
//! step is validated and saved before the controller moves on. Completing the
//! last step triggers exactly one report synthesis, validated against the
//! declared [`ReportSchema`] before it is attached to the session.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use assessment_wizard::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let definition = WizardDefinition::new(
//!         "career",
//!         vec![
//!             StepSchema::new(1, vec![FieldSpec::text("name").required()]),
//!             StepSchema::new(2, vec![FieldSpec::bounded_scale("confidence", 1, 5)]),
//!         ],
//!     )?;
//!     let report = ReportSchema::new(vec![ReportField::string("summary")]);
//!     let collaborator = GeminiCollaborator::builder("your-api-key").build()?;
//!
//!     let engine = WizardEngine::builder(
//!         definition,
//!         report,
//!         Arc::new(InMemoryEntityStore::new()),
//!         Arc::new(collaborator),
//!     )
//!     .build()?;
//!
//!     let wizard = engine.resume("owner-42").await?;
//!     wizard.set_field("name", AnswerValue::text("Ada")).await?;
//!     wizard.next().await?;
//!     if let NavOutcome::Done(report) = wizard.next().await? {
//!         println!("{}", report.get_str("summary").unwrap_or_default());
//!     }
//!     Ok(())
//! }
//! ```

pub mod collaborator;
pub mod config;
pub mod controller;
pub mod error;
pub mod presenter;
pub mod prompt;
pub mod report;
pub mod resumer;
pub mod schema;
pub mod session;
pub mod state;
pub mod store;
pub mod synthesizer;
pub mod trace;
pub mod validator;

pub use collaborator::{
    AiCollaborator, GeminiCollaborator, GeminiCollaboratorBuilder, MockHandler, SynthesisRequest,
};
pub use config::{EngineConfig, WizardEngine, WizardEngineBuilder};
pub use controller::{
    NavOutcome, NavState, SaveIntent, WizardController, WizardSnapshot, WizardWatcher,
};
pub use error::{Result, StoreError, SynthesisError, WizardError};
pub use presenter::{render_markdown, ReportSection, ReportView, SectionBody};
pub use prompt::{PromptBuilder, SynthesisPrompt};
pub use report::{CompiledReportSchema, Report, ReportField, ReportFieldType, ReportSchema};
pub use resumer::{resume_step, EntryPoint, SessionResumer};
pub use schema::{FieldKind, FieldSpec, ScaleRange, StepSchema, WizardDefinition};
pub use session::{SessionId, WizardSession};
pub use state::{AnswerValue, Answers, WizardState};
pub use store::{
    EntityFilter, EntityRecord, EntityStore, Fields, InMemoryEntityStore, PersistenceGateway,
    SaveOutcome,
};
pub use synthesizer::ReportSynthesizer;
pub use trace::{EngineMetrics, TraceEntry, TraceLog, WizardEvent};
pub use validator::{first_invalid_step, validate, ErrorReason, FieldError};

/// Prelude module for convenient imports.
///
/// ```rust
/// use assessment_wizard::prelude::*;
/// ```
pub mod prelude {
    pub use crate::collaborator::{AiCollaborator, GeminiCollaborator, SynthesisRequest};
    pub use crate::config::{EngineConfig, WizardEngine, WizardEngineBuilder};
    pub use crate::controller::{NavOutcome, NavState, WizardController, WizardSnapshot};
    pub use crate::error::{Result, SynthesisError, WizardError};
    pub use crate::presenter::{render_markdown, ReportView};
    pub use crate::report::{Report, ReportField, ReportSchema};
    pub use crate::resumer::EntryPoint;
    pub use crate::schema::{FieldSpec, StepSchema, WizardDefinition};
    pub use crate::state::AnswerValue;
    pub use crate::store::{EntityStore, InMemoryEntityStore};

    // Re-export commonly used external types
    pub use gemini_rust::Model;
    pub use schemars::JsonSchema;
    pub use serde::{Deserialize, Serialize};
}
