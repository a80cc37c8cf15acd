//! Configuration types for weigh-ticket extraction runs.
//!
//! All run behaviour is controlled through [`ExtractionConfig`], built via
//! its [`ExtractionConfigBuilder`]. One struct is shared by every job of a
//! [`crate::job::JobRunner`]; per-job data (URL, receipt id) never lives here.

use crate::error::ReceiptError;
use crate::pipeline::llm::InferenceClient;
use crate::progress::RunObserverRef;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for extraction runs.
///
/// # Example
/// ```rust
/// use weighticket_extract::{DocumentSourceMode, ExtractionConfig};
///
/// let config = ExtractionConfig::builder()
///     .model("claude-3-5-haiku-latest")
///     .document_source(DocumentSourceMode::Inline)
///     .max_steps(6)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// LLM model identifier. If None, uses the backend default.
    pub model: Option<String>,

    /// LLM provider name ("anthropic", "openai", "gemini", ...).
    pub provider_name: Option<String>,

    /// Pre-constructed edgequake-llm provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed inference client. Takes precedence over everything else.
    pub inference: Option<Arc<dyn InferenceClient>>,

    /// Sampling temperature for extraction. Default: 0.0.
    ///
    /// Extraction is transcription; any creativity shows up as invented
    /// ticket numbers.
    pub temperature: f32,

    /// Maximum tokens the model may generate for one record. Default: 3094.
    pub max_tokens: usize,

    /// Custom system prompt for the extraction call. If None, uses built-in default.
    pub system_prompt: Option<String>,

    /// How documents reach the model. Default: [`DocumentSourceMode::Inline`].
    pub document_source: DocumentSourceMode,

    /// Maximum agent dispatches per job. Default: 6.
    ///
    /// One extraction plus up to five save attempts. When the budget runs
    /// out the run ends with no receipt and the job stays pending.
    pub max_steps: usize,

    /// Initial delay before re-offering a failed save, doubled per failure. Default: 500.
    pub retry_backoff_ms: u64,

    /// Download timeout for source files in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per-inference-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Largest source file accepted, in bytes. Default: 32 MiB.
    pub max_document_bytes: usize,

    /// Concurrent jobs in [`crate::job::JobRunner::process_batch`]. Default: 4.
    pub concurrency: usize,

    /// Observer receiving per-step events.
    pub observer: Option<RunObserverRef>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            inference: None,
            temperature: 0.0,
            max_tokens: 3094,
            system_prompt: None,
            document_source: DocumentSourceMode::default(),
            max_steps: 6,
            retry_backoff_ms: 500,
            download_timeout_secs: 120,
            api_timeout_secs: 60,
            max_document_bytes: 32 * 1024 * 1024,
            concurrency: 4,
            observer: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("inference", &self.inference.as_ref().map(|c| c.name().to_string()))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("document_source", &self.document_source)
            .field("max_steps", &self.max_steps)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_document_bytes", &self.max_document_bytes)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn inference(mut self, client: Arc<dyn InferenceClient>) -> Self {
        self.config.inference = Some(client);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 1.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn document_source(mut self, mode: DocumentSourceMode) -> Self {
        self.config.document_source = mode;
        self
    }

    pub fn max_steps(mut self, n: usize) -> Self {
        self.config.max_steps = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_document_bytes(mut self, n: usize) -> Self {
        self.config.max_document_bytes = n;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn observer(mut self, observer: RunObserverRef) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ReceiptError> {
        let c = &self.config;
        if c.max_steps < 2 {
            return Err(ReceiptError::InvalidConfig(format!(
                "max_steps must be ≥ 2 (extract and save), got {}",
                c.max_steps
            )));
        }
        if c.max_tokens == 0 {
            return Err(ReceiptError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.max_document_bytes == 0 {
            return Err(ReceiptError::InvalidConfig(
                "max_document_bytes must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How a source document is handed to the model.
///
/// | Mode | PDF-looking input | Image input |
/// |------|-------------------|-------------|
/// | `Inline` | downloaded, signature checked, base64 | downloaded, wrapped in a PDF page |
/// | `RemoteUrl` | passed by URL, never downloaded | downloaded, wrapped in a PDF page |
///
/// `RemoteUrl` trusts the MIME hint and file extension, so a PNG served
/// under a `.pdf` name reaches the model unconverted. `Inline` decides from
/// the bytes alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DocumentSourceMode {
    /// Always download and embed (default).
    #[default]
    Inline,
    /// Let the provider fetch PDF-like inputs itself.
    RemoteUrl,
}
