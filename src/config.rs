//! Engine configuration and wiring.

use std::sync::Arc;

use tracing::info;

use crate::collaborator::AiCollaborator;
use crate::controller::WizardController;
use crate::error::Result;
use crate::report::{CompiledReportSchema, ReportSchema};
use crate::resumer::SessionResumer;
use crate::schema::WizardDefinition;
use crate::store::{EntityStore, PersistenceGateway};
use crate::synthesizer::ReportSynthesizer;

const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are an analyst. Read the assessment answers \
and write a clear, specific report grounded only in what the respondent said.";

/// Tunables for report synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Temperature for the collaborator call (default: 0.2)
    pub synthesis_temperature: f32,
    /// System instruction sent with every synthesis request
    pub system_instruction: String,
    /// Text placed before the answers in the prompt
    pub prompt_preamble: Option<String>,
    /// List unanswered optional fields in the prompt (default: false)
    pub include_unanswered: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            synthesis_temperature: 0.2,
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            prompt_preamble: None,
            include_unanswered: false,
        }
    }
}

/// Builder for [`WizardEngine`].
pub struct WizardEngineBuilder {
    definition: WizardDefinition,
    report_schema: ReportSchema,
    store: Arc<dyn EntityStore>,
    collaborator: Arc<dyn AiCollaborator>,
    config: EngineConfig,
}

impl WizardEngineBuilder {
    pub fn new(
        definition: WizardDefinition,
        report_schema: ReportSchema,
        store: Arc<dyn EntityStore>,
        collaborator: Arc<dyn AiCollaborator>,
    ) -> Self {
        Self {
            definition,
            report_schema,
            store,
            collaborator,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.config.synthesis_temperature = temperature;
        self
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config.system_instruction = instruction.into();
        self
    }

    pub fn with_prompt_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.config.prompt_preamble = Some(preamble.into());
        self
    }

    pub fn include_unanswered(mut self, include: bool) -> Self {
        self.config.include_unanswered = include;
        self
    }

    /// Check the definition, compile the report contract, wire the components.
    pub fn build(self) -> Result<WizardEngine> {
        self.definition.validate()?;
        let schema = CompiledReportSchema::compile(self.report_schema)?;

        let definition = Arc::new(self.definition);
        let gateway = PersistenceGateway::new(self.store, definition.wizard_type.clone());
        let synthesizer = ReportSynthesizer::new(
            definition.clone(),
            schema,
            self.collaborator,
            gateway.clone(),
            &self.config,
        );
        let resumer = SessionResumer::new(definition.clone(), gateway.clone(), synthesizer.clone());

        info!(
            wizard_type = %definition.wizard_type,
            steps = definition.step_count(),
            "Wizard engine ready"
        );

        Ok(WizardEngine {
            inner: Arc::new(EngineInner {
                definition,
                gateway,
                synthesizer,
                resumer,
                config: self.config,
            }),
        })
    }
}

struct EngineInner {
    definition: Arc<WizardDefinition>,
    gateway: PersistenceGateway,
    synthesizer: ReportSynthesizer,
    resumer: SessionResumer,
    config: EngineConfig,
}

/// One wizard type bound to a store and a collaborator. Cheap to clone.
#[derive(Clone)]
pub struct WizardEngine {
    inner: Arc<EngineInner>,
}

impl WizardEngine {
    pub fn builder(
        definition: WizardDefinition,
        report_schema: ReportSchema,
        store: Arc<dyn EntityStore>,
        collaborator: Arc<dyn AiCollaborator>,
    ) -> WizardEngineBuilder {
        WizardEngineBuilder::new(definition, report_schema, store, collaborator)
    }

    /// Open the owner's session, creating nothing until the first save.
    pub async fn resume(&self, owner_key: &str) -> Result<WizardController> {
        self.inner.resumer.resume(owner_key).await
    }

    pub fn definition(&self) -> &Arc<WizardDefinition> {
        &self.inner.definition
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.inner.gateway
    }

    pub fn synthesizer(&self) -> &ReportSynthesizer {
        &self.inner.synthesizer
    }
}
