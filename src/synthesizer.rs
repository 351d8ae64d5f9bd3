use std::sync::Arc;

use tracing::{error, info, instrument};

use crate::collaborator::{AiCollaborator, SynthesisRequest};
use crate::config::EngineConfig;
use crate::error::{Result, WizardError};
use crate::prompt::{PromptBuilder, SynthesisPrompt};
use crate::report::{CompiledReportSchema, Report};
use crate::schema::WizardDefinition;
use crate::session::WizardSession;
use crate::store::PersistenceGateway;
use crate::trace::{TraceLog, WizardEvent};

/// Turns a completed session into a validated, persisted report.
///
/// Each call to [`ReportSynthesizer::synthesize`] is exactly one collaborator
/// invocation. There is no internal retry loop.
#[derive(Clone)]
pub struct ReportSynthesizer {
    definition: Arc<WizardDefinition>,
    schema: CompiledReportSchema,
    collaborator: Arc<dyn AiCollaborator>,
    gateway: PersistenceGateway,
    prompts: PromptBuilder,
    temperature: f32,
}

impl ReportSynthesizer {
    pub fn new(
        definition: Arc<WizardDefinition>,
        schema: CompiledReportSchema,
        collaborator: Arc<dyn AiCollaborator>,
        gateway: PersistenceGateway,
        config: &EngineConfig,
    ) -> Self {
        let mut prompts = PromptBuilder::new()
            .with_system(config.system_instruction.clone())
            .include_unanswered(config.include_unanswered);
        if let Some(preamble) = &config.prompt_preamble {
            prompts = prompts.with_preamble(preamble.clone());
        }

        Self {
            definition,
            schema,
            collaborator,
            gateway,
            prompts,
            temperature: config.synthesis_temperature,
        }
    }

    pub fn report_schema(&self) -> &CompiledReportSchema {
        &self.schema
    }

    /// The prompt a session's answers produce.
    pub fn prompt_for(&self, session: &WizardSession) -> SynthesisPrompt {
        self.prompts
            .build(&self.definition, &session.answers, self.schema.contract())
    }

    /// Invoke the collaborator once and validate the response, without persisting.
    pub async fn generate_report(&self, session: &WizardSession, trace: &TraceLog) -> Result<Report> {
        let prompt = self.prompt_for(session);
        trace.emit(WizardEvent::SynthesisStarted {
            attempt: trace.synthesis_attempts() + 1,
            prompt_digest: prompt.digest.clone(),
        });

        let request = SynthesisRequest {
            system_instruction: prompt.system_instruction.clone(),
            prompt: prompt.text.clone(),
            output_schema: self.schema.contract().clone(),
            temperature: self.temperature,
        };

        let content = match self.collaborator.generate(&request).await {
            Ok(value) => self.schema.accept(value),
            Err(e) => Err(e),
        };

        match content {
            Ok(content) => Ok(Report::new(content, prompt.digest)),
            Err(e) => {
                error!(error = %e, "Report synthesis failed");
                trace.emit(WizardEvent::SynthesisFailed {
                    message: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Generate a report for a completed session and attach it before returning.
    #[instrument(skip_all, fields(owner_key = %session.owner_key, session_id = ?session.id))]
    pub async fn synthesize(&self, session: &WizardSession, trace: &TraceLog) -> Result<Report> {
        let Some(id) = session.id.as_ref().filter(|_| session.is_complete) else {
            return Err(WizardError::InvalidTransition {
                from: "the session is not saved as complete".to_string(),
                action: "synthesize a report",
            });
        };

        let report = self.generate_report(session, trace).await?;

        if let Err(e) = self.gateway.attach_report(id, &report).await {
            trace.emit(WizardEvent::SynthesisFailed {
                message: e.to_string(),
            });
            return Err(e);
        }

        info!(prompt_digest = %report.prompt_digest, "Report attached to session");
        trace.emit(WizardEvent::SynthesisSucceeded {
            prompt_digest: report.prompt_digest.clone(),
        });
        Ok(report)
    }
}
