//! Native Anthropic Messages API client.
//!
//! Sends the canonical PDF as a `document` content block, either inline
//! (`source.type = "base64"`) or by reference (`source.type = "url"`),
//! followed by the extraction instruction as a text block.

use crate::error::ReceiptError;
use crate::pipeline::encode::CanonicalDocument;
use crate::pipeline::llm::{InferenceClient, InferenceRequest, InferenceResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const PROVIDER: &str = "anthropic";

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Read `ANTHROPIC_API_KEY` (required) and `ANTHROPIC_BASE_URL` (optional).
    pub fn from_env(model: impl Into<String>) -> Result<Self, ReceiptError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ReceiptError::ProviderNotConfigured {
                provider: PROVIDER.to_string(),
                hint: "Set ANTHROPIC_API_KEY to use the Anthropic backend.".to_string(),
            })?;
        let mut client = Self::new(api_key, model);
        if let Ok(base) = std::env::var("ANTHROPIC_BASE_URL") {
            if !base.is_empty() {
                client = client.with_base_url(base);
            }
        }
        Ok(client)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_body<'a>(&'a self, request: &'a InferenceRequest) -> MessagesRequest<'a> {
        let source = match &request.document {
            CanonicalDocument::InlinePdf { data } => DocumentSource::Base64 {
                media_type: request.document.media_type(),
                data,
            },
            CanonicalDocument::RemoteUrl { url } => DocumentSource::Url { url },
        };
        MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: (!request.system.is_empty()).then_some(request.system.as_str()),
            messages: vec![Message {
                role: "user",
                content: vec![
                    ContentBlock::Document { source },
                    ContentBlock::Text {
                        text: &request.instruction,
                    },
                ],
            }],
        }
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentBlock<'a> {
    Document { source: DocumentSource<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum DocumentSource<'a> {
    Base64 {
        media_type: &'static str,
        data: &'a str,
    },
    Url {
        url: &'a str,
    },
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[async_trait]
impl InferenceClient for AnthropicClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, ReceiptError> {
        let body = self.build_body(request);
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ReceiptError::LlmApiError {
                message: format!("{PROVIDER}: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);

            return Err(match status.as_u16() {
                429 => ReceiptError::RateLimitExceeded {
                    provider: PROVIDER.to_string(),
                    retry_after_secs: retry_after,
                },
                401 | 403 => ReceiptError::AuthError {
                    provider: PROVIDER.to_string(),
                    detail,
                },
                code => ReceiptError::LlmApiError {
                    message: format!("{PROVIDER} HTTP {code}: {detail}"),
                },
            });
        }

        let parsed: MessagesResponse =
            response
                .json()
                .await
                .map_err(|e| ReceiptError::InvalidResponse {
                    detail: format!("malformed Messages API body: {e}"),
                })?;

        let text: String = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");
        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| (u.input_tokens, u.output_tokens))
            .unwrap_or((0, 0));

        debug!(
            "{} {}: {} input tokens, {} output tokens",
            PROVIDER, self.model, input_tokens, output_tokens
        );

        Ok(InferenceResponse {
            text,
            input_tokens,
            output_tokens,
        })
    }
}
