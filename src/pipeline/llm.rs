//! Inference boundary: one multimodal call per extraction.
//!
//! [`InferenceClient`] is the seam the extraction agent talks to. Two
//! implementations ship with the crate:
//!
//! * [`crate::pipeline::anthropic::AnthropicClient`]: native Messages API
//!   client that sends the PDF as a `document` content block.
//! * [`ProviderInference`]: adapter over any `edgequake-llm` vision
//!   provider, attaching the PDF to the user message.
//!
//! Neither retries. A failed call surfaces to the network as a fatal
//! extraction error.

use crate::config::ExtractionConfig;
use crate::error::ReceiptError;
use crate::pipeline::anthropic::AnthropicClient;
use crate::pipeline::encode::CanonicalDocument;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tracing::{debug, info};

/// Default model when the native Anthropic backend is selected.
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-haiku-latest";

/// Default model for other edgequake-llm providers.
pub const DEFAULT_PROVIDER_MODEL: &str = "gpt-4o-mini";

/// One extraction request.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub system: String,
    pub instruction: String,
    pub document: CanonicalDocument,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// Raw model reply, expected to hold a single JSON object.
#[derive(Debug, Clone, Default)]
pub struct InferenceResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A multimodal model that can read a PDF and answer with text.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Issue exactly one inference call.
    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, ReceiptError>;
}

/// [`InferenceClient`] over an `edgequake-llm` provider.
///
/// The PDF travels as a base64 attachment with media type
/// `application/pdf`. Providers that only accept raster images will reject
/// it; use the native Anthropic client for those cases.
pub struct ProviderInference {
    provider: Arc<dyn LLMProvider>,
    label: String,
}

impl ProviderInference {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
        }
    }
}

#[async_trait]
impl InferenceClient for ProviderInference {
    fn name(&self) -> &str {
        &self.label
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, ReceiptError> {
        let data = match &request.document {
            CanonicalDocument::InlinePdf { data } => data.clone(),
            CanonicalDocument::RemoteUrl { .. } => {
                return Err(ReceiptError::InvalidConfig(format!(
                    "provider '{}' needs inline documents; use DocumentSourceMode::Inline",
                    self.label
                )))
            }
        };

        let messages = vec![
            ChatMessage::system(request.system.as_str()),
            ChatMessage::user_with_images(
                request.instruction.as_str(),
                vec![ImageData::new(data, request.document.media_type())],
            ),
        ];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ReceiptError::LlmApiError {
                message: format!("{}: {}", self.label, e),
            })?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.label, response.prompt_tokens, response.completion_tokens
        );

        Ok(InferenceResponse {
            text: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

/// Resolve the inference backend, from most-specific to least-specific.
///
/// 1. **Pre-built client** (`config.inference`), used as-is.
/// 2. **Pre-built edgequake provider** (`config.provider`), wrapped.
/// 3. **Named provider** (`config.provider_name`): `"anthropic"` selects the
///    native client, any other name goes through
///    [`ProviderFactory::create_llm_provider`].
/// 4. **`ANTHROPIC_API_KEY`** present → native Anthropic client.
/// 5. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 6. **Full auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_inference(
    config: &ExtractionConfig,
) -> Result<Arc<dyn InferenceClient>, ReceiptError> {
    if let Some(ref client) = config.inference {
        return Ok(Arc::clone(client));
    }

    if let Some(ref provider) = config.provider {
        return Ok(Arc::new(ProviderInference::new(
            Arc::clone(provider),
            config.provider_name.as_deref().unwrap_or("custom"),
        )));
    }

    if let Some(ref name) = config.provider_name {
        if name.eq_ignore_ascii_case("anthropic") {
            return anthropic_from_env(config);
        }
        let model = config.model.as_deref().unwrap_or(DEFAULT_PROVIDER_MODEL);
        return create_provider(name, model);
    }

    if std::env::var("ANTHROPIC_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return anthropic_from_env(config);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ReceiptError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set ANTHROPIC_API_KEY, OPENAI_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;
    info!("Using auto-detected edgequake-llm provider");
    Ok(Arc::new(ProviderInference::new(llm_provider, "auto")))
}

fn anthropic_from_env(config: &ExtractionConfig) -> Result<Arc<dyn InferenceClient>, ReceiptError> {
    let model = config
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string());
    info!("Using native Anthropic client with model {}", model);
    Ok(Arc::new(AnthropicClient::from_env(model)?))
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn InferenceClient>, ReceiptError> {
    let provider = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        ReceiptError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    info!("Using edgequake-llm provider {} with model {}", name, model);
    Ok(Arc::new(ProviderInference::new(provider, name)))
}
