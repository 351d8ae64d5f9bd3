//! The AI collaborator seam and its Gemini-backed implementation.

use std::sync::Arc;

use async_trait::async_trait;
use gemini_rust::{Gemini, GenerationConfig, Message, Model};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{Result, SynthesisError};

/// One schema-constrained generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub system_instruction: Option<String>,
    pub prompt: String,
    /// JSON Schema the response must satisfy.
    pub output_schema: Value,
    pub temperature: f32,
}

/// External AI collaborator.
///
/// Implementations make exactly one call per invocation; retrying is the
/// caller's decision.
#[async_trait]
pub trait AiCollaborator: Send + Sync {
    async fn generate(
        &self,
        request: &SynthesisRequest,
    ) -> std::result::Result<Value, SynthesisError>;
}

/// Handler used to short-circuit requests during tests.
///
/// Receives the request and returns the raw model text.
pub type MockHandler =
    Arc<dyn Fn(&SynthesisRequest) -> std::result::Result<String, SynthesisError> + Send + Sync>;

/// Builder for [`GeminiCollaborator`].
pub struct GeminiCollaboratorBuilder {
    api_key: String,
    model: Model,
    mock_handler: Option<MockHandler>,
}

impl GeminiCollaboratorBuilder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: Model::Gemini25Flash,
            mock_handler: None,
        }
    }

    pub fn with_model(mut self, model: Model) -> Self {
        self.model = model;
        self
    }

    /// Provide a mock handler to intercept all requests.
    ///
    /// This is primarily intended for unit tests where network calls should be avoided.
    pub fn with_mock(
        mut self,
        handler: impl Fn(&SynthesisRequest) -> std::result::Result<String, SynthesisError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.mock_handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<GeminiCollaborator> {
        let client = Gemini::with_model(&self.api_key, self.model.clone())
            .map_err(SynthesisError::from)?;
        Ok(GeminiCollaborator {
            client: Arc::new(client),
            model: self.model,
            mock_handler: self.mock_handler,
        })
    }
}

/// Calls Gemini with the output schema applied through the generation config.
#[derive(Clone)]
pub struct GeminiCollaborator {
    client: Arc<Gemini>,
    model: Model,
    mock_handler: Option<MockHandler>,
}

impl GeminiCollaborator {
    pub fn builder(api_key: impl Into<String>) -> GeminiCollaboratorBuilder {
        GeminiCollaboratorBuilder::new(api_key)
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    async fn raw_text(&self, request: &SynthesisRequest) -> std::result::Result<String, SynthesisError> {
        if let Some(mock) = &self.mock_handler {
            return (mock)(request);
        }

        let config = GenerationConfig {
            response_mime_type: Some("application/json".to_string()),
            response_schema: Some(request.output_schema.clone()),
            temperature: Some(request.temperature),
            ..Default::default()
        };

        let mut builder = self
            .client
            .generate_content()
            .with_message(Message::user(request.prompt.clone()));
        if let Some(system) = &request.system_instruction {
            builder = builder.with_system_instruction(system.clone());
        }

        let response = builder.with_generation_config(config).execute().await?;
        Ok(response.text())
    }
}

#[async_trait]
impl AiCollaborator for GeminiCollaborator {
    #[instrument(skip_all, fields(model = self.model.as_str()))]
    async fn generate(
        &self,
        request: &SynthesisRequest,
    ) -> std::result::Result<Value, SynthesisError> {
        let text = self.raw_text(request).await?;
        let cleaned = clean_json_text(&text);
        debug!(chars = cleaned.len(), "Received collaborator response");
        serde_json::from_str::<Value>(&cleaned).map_err(|e| SynthesisError::parse_error(e, &cleaned))
    }
}

/// Reduce model output to the JSON object it carries.
///
/// The report contract is always an object, so everything outside the first
/// fenced block and then outside the outermost braces is dropped.
pub(crate) fn clean_json_text(text: &str) -> String {
    let mut body = text.trim();

    if let Some((_, after_fence)) = body.split_once("```") {
        // Skip the info string (`json`, `JSON`, ...) on the opening fence line.
        let inner = after_fence
            .split_once('\n')
            .map_or(after_fence, |(_, rest)| rest);
        body = inner.split_once("```").map_or(inner, |(block, _)| block).trim();
    }

    match (body.find('{'), body.rfind('}')) {
        (Some(open), Some(close)) if open < close => body[open..=close].to_string(),
        _ => body.to_string(),
    }
}
